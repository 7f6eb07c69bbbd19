//! Scan, resolve and harvest stages.
//!
//! The [`Harvester`] owns all cross-stage state. Each fan-out stage runs on a
//! [`WorkerPool`] whose jobs share one [`Context`]; a failed job is logged
//! and dropped, and only conditions that leave nothing to do abort a run.

mod media;
mod state;

pub use state::HarvestState;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::HarvestSettings;
use crate::error::{HarvestError, JobError};
use crate::fetcher::{Fetcher, RateGate};
use crate::ids;
use crate::persist::{
    load_json, persist_if_absent, persist_json, post_key, profile_key, PersistError,
    DISCOVERED_USERS_KEY, SLUG_LIST_KEY,
};
use crate::pool::{stopped, WorkerPool};
use crate::rewrite::UrlRewriter;
use crate::scanner::SlugScanner;
use crate::storage::{self, Storage, StorageError, StorageLocation};

/// Counts for one pipeline iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub slugs: usize,
    pub users: usize,
    pub resolved: usize,
    pub profiles_written: usize,
    pub posts_written: usize,
    pub posts_skipped: usize,
    pub media_written: usize,
    pub not_found: usize,
    pub failures: usize,
}

#[derive(Debug, Default)]
struct Stats {
    resolved: AtomicUsize,
    profiles_written: AtomicUsize,
    posts_written: AtomicUsize,
    posts_skipped: AtomicUsize,
    media_written: AtomicUsize,
    not_found: AtomicUsize,
    failures: AtomicUsize,
}

impl Stats {
    fn bump(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 7] {
        [
            &self.resolved,
            &self.profiles_written,
            &self.posts_written,
            &self.posts_skipped,
            &self.media_written,
            &self.not_found,
            &self.failures,
        ]
    }

    fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn summary(&self, slugs: usize, users: usize) -> RunSummary {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        RunSummary {
            slugs,
            users,
            resolved: get(&self.resolved),
            profiles_written: get(&self.profiles_written),
            posts_written: get(&self.posts_written),
            posts_skipped: get(&self.posts_skipped),
            media_written: get(&self.media_written),
            not_found: get(&self.not_found),
            failures: get(&self.failures),
        }
    }
}

/// Everything a job needs, shared by all workers.
struct Context {
    settings: HarvestSettings,
    input: Arc<dyn Storage>,
    output: Arc<dyn Storage>,
    fetcher: Fetcher,
    rewriter: UrlRewriter,
    scanner: SlugScanner,
    state: HarvestState,
    stats: Stats,
    shutdown: watch::Receiver<bool>,
}

impl Context {
    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Log a job failure at the severity its cause deserves.
    fn job_failed(&self, stage: &str, id: &str, err: &JobError) {
        if err.is_not_found() {
            self.stats.bump(&self.stats.not_found);
            debug!("[{}] {} not found: {}", stage, id, err);
        } else if err.is_forbidden() {
            self.stats.bump(&self.stats.failures);
            warn!(
                "[{}] {} forbidden, possible upstream block: {}",
                stage, id, err
            );
        } else {
            self.stats.bump(&self.stats.failures);
            warn!("[{}] {} failed: {}", stage, id, err);
        }
    }

    /// Fetch the post behind a slug, record its author, and keep the post.
    async fn resolve_slug(&self, slug: &str) -> Result<(), JobError> {
        if !ids::is_safe_id(slug) {
            return Err(JobError::UnsafeId(slug.to_string()));
        }
        if let Some(user_id) = self.state.resolved_user(slug) {
            self.state.add_user(&user_id);
            return Ok(());
        }

        let record = self
            .fetcher
            .fetch_record(&self.settings.post_base, slug)
            .await?;
        let user_id = ids::user_id(&record).ok_or(JobError::MissingUserId)?;
        if !ids::is_safe_id(&user_id) {
            return Err(JobError::UnsafeId(user_id));
        }

        self.state.record_resolution(slug, &user_id);
        if self.state.add_user(&user_id) {
            debug!("Slug {} -> new user {}", slug, user_id);
        }
        self.stats.bump(&self.stats.resolved);

        // Keep the post now so the harvest stage does not fetch it again.
        let post_id = ids::post_id(&record, slug);
        if !ids::is_safe_id(&post_id) {
            return Err(JobError::UnsafeId(post_id));
        }
        let record = self.rewriter.rewrite(record);
        self.store_post(&user_id, &post_id, &record).await
    }

    /// Harvest one user's profile and every post it lists.
    async fn harvest_user(&self, user_id: &str) -> Result<(), JobError> {
        if !ids::is_safe_id(user_id) {
            return Err(JobError::UnsafeId(user_id.to_string()));
        }
        if !self.state.claim_user(user_id) {
            return Ok(());
        }

        let profile = self.load_or_fetch_profile(user_id).await?;
        let post_ids = ids::post_ids_from_profile(&profile);
        debug!("User {}: {} posts listed", user_id, post_ids.len());

        for post_id in post_ids {
            if self.is_stopping() {
                break;
            }
            if let Err(e) = self.harvest_post(user_id, &post_id).await {
                self.job_failed("post", &post_id, &e);
            }
        }
        Ok(())
    }

    async fn load_or_fetch_profile(&self, user_id: &str) -> Result<Value, JobError> {
        let key = profile_key(user_id);
        if self.output.exists(&key).await? {
            return Ok(load_json(self.output.as_ref(), &key).await?);
        }

        let profile = self
            .fetcher
            .fetch_record(&self.settings.profile_base, user_id)
            .await?;
        let profile = self.rewriter.rewrite(profile);
        persist_json(self.output.as_ref(), &key, &profile).await?;
        self.stats.bump(&self.stats.profiles_written);
        Ok(profile)
    }

    /// Fetch and keep one listed post. The listed id names both the request
    /// and the output key, whatever id the record itself reports.
    async fn harvest_post(&self, user_id: &str, listed_id: &str) -> Result<(), JobError> {
        if !ids::is_safe_id(listed_id) {
            return Err(JobError::UnsafeId(listed_id.to_string()));
        }
        if self.output.exists(&post_key(user_id, listed_id)).await? {
            self.stats.bump(&self.stats.posts_skipped);
            return Ok(());
        }

        let record = self
            .fetcher
            .fetch_record(&self.settings.post_base, listed_id)
            .await?;
        let record = self.rewriter.rewrite(record);
        self.store_post(user_id, listed_id, &record).await
    }

    /// Persist a rewritten post unless present, then pull its media.
    async fn store_post(&self, user_id: &str, post_id: &str, record: &Value) -> Result<(), JobError> {
        let key = post_key(user_id, post_id);
        if persist_if_absent(self.output.as_ref(), &key, record).await? {
            self.stats.bump(&self.stats.posts_written);
        } else {
            self.stats.bump(&self.stats.posts_skipped);
        }

        if self.settings.download_media {
            self.harvest_media(record).await;
        }
        Ok(())
    }
}

/// Pipeline orchestrator.
#[derive(Clone)]
pub struct Harvester {
    ctx: Arc<Context>,
}

impl Harvester {
    /// Build a harvester over already opened storage.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: HarvestSettings,
        input: Arc<dyn Storage>,
        output: Arc<dyn Storage>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, HarvestError> {
        settings.validate()?;

        let gate = RateGate::per_second(settings.rate_limit);
        let fetcher = Fetcher::new(
            gate,
            settings.request_timeout,
            settings.user_agent.as_deref(),
            settings.referer.clone(),
        )?;
        let rewriter = UrlRewriter::new(settings.legacy_hosts.clone(), settings.mirror_host.clone());

        Ok(Self {
            ctx: Arc::new(Context {
                settings,
                input,
                output,
                fetcher,
                rewriter,
                scanner: SlugScanner::default(),
                state: HarvestState::new(),
                stats: Stats::default(),
                shutdown,
            }),
        })
    }

    /// Open the configured input and output locations and build a harvester.
    pub async fn connect(
        settings: HarvestSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, HarvestError> {
        settings.validate()?;
        let input = StorageLocation::parse(&settings.input)?;
        let output = StorageLocation::parse(&settings.output)?;

        let (input, output) = storage::open_pair(&input, &output).await.map_err(|e| match e {
            StorageError::Io { .. } => HarvestError::Output(format!("{}: {}", settings.output, e)),
            other => HarvestError::Storage(other),
        })?;
        Self::new(settings, input, output, shutdown)
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.ctx.settings
    }

    pub fn output(&self) -> &Arc<dyn Storage> {
        &self.ctx.output
    }

    /// Run the pipeline, repeating every poll interval until shutdown.
    ///
    /// A single run (zero interval) returns its first error. When polling,
    /// a failed iteration is logged and the loop carries on; the result is
    /// the summary of the last iteration that completed.
    pub async fn run(&self) -> Result<RunSummary, HarvestError> {
        let interval = self.ctx.settings.poll_interval;
        if interval.is_zero() {
            info!("Starting harvest");
            return self.run_once().await;
        }

        let mut shutdown = self.ctx.shutdown.clone();
        let mut last = RunSummary::default();
        let mut iteration = 0u64;

        loop {
            iteration += 1;
            info!("Starting harvest iteration {}", iteration);
            match self.run_once().await {
                Ok(summary) => last = summary,
                Err(e) => error!("Harvest iteration {} failed: {}", iteration, e),
            }

            if self.ctx.is_stopping() {
                return Ok(last);
            }

            info!("Sleeping {}s before next iteration", interval.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stopped(&mut shutdown) => {
                    info!("Shutdown requested, not starting another iteration");
                    return Ok(last);
                }
            }
        }
    }

    /// One scan, resolve and harvest pass.
    pub async fn run_once(&self) -> Result<RunSummary, HarvestError> {
        self.ctx.state.begin_iteration();
        self.ctx.stats.reset();

        let slugs = self.scan().await?;
        let slug_count = slugs.len();
        let slugs: Vec<String> = match self.ctx.settings.limit {
            Some(limit) => slugs.into_iter().take(limit).collect(),
            None => slugs.into_iter().collect(),
        };

        let users = self.resolve(slugs).await?;
        if let Err(e) = self.write_discovered_users(&users).await {
            self.ctx.stats.bump(&self.ctx.stats.failures);
            warn!("Failed to write {}: {}", DISCOVERED_USERS_KEY, e);
        }

        if !self.ctx.is_stopping() {
            self.harvest_users(users.clone()).await;
        }

        let summary = self.ctx.stats.summary(slug_count, users.len());
        info!(
            "Iteration done: {} slugs, {} users, {} profiles and {} posts written, {} posts already present, {} media files, {} not found, {} failures",
            summary.slugs,
            summary.users,
            summary.profiles_written,
            summary.posts_written,
            summary.posts_skipped,
            summary.media_written,
            summary.not_found,
            summary.failures
        );
        Ok(summary)
    }

    /// Scan the input corpus. Finding nothing is fatal.
    pub async fn scan(&self) -> Result<BTreeSet<String>, HarvestError> {
        let ctx = &self.ctx;
        let slugs = ctx
            .scanner
            .scan_corpus(
                ctx.input.clone(),
                &ctx.settings.input_suffix,
                ctx.settings.workers,
                ctx.shutdown.clone(),
            )
            .await?;

        if slugs.is_empty() {
            return Err(HarvestError::NoSlugs {
                input: ctx.input.describe(),
            });
        }
        Ok(slugs)
    }

    /// Scan and write the sorted slug list to the output root.
    pub async fn scan_only(&self) -> Result<usize, HarvestError> {
        let slugs = self.scan().await?;
        let mut body = slugs.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        body.push('\n');
        self.ctx.output.write(SLUG_LIST_KEY, body.into_bytes()).await?;
        info!(
            "Wrote {} slugs to {}/{}",
            slugs.len(),
            self.ctx.output.describe(),
            SLUG_LIST_KEY
        );
        Ok(slugs.len())
    }

    /// Resolve slugs to their authors. Returns the sorted user ids; none is
    /// fatal unless a shutdown cut the stage short.
    pub async fn resolve(&self, slugs: Vec<String>) -> Result<Vec<String>, HarvestError> {
        let count = slugs.len();
        info!("Resolving {} slugs", count);

        let workers = self.ctx.settings.workers;
        let ctx = self.ctx.clone();
        let pool = WorkerPool::spawn(
            "resolve",
            workers,
            workers * 2,
            self.ctx.shutdown.clone(),
            move |_, slug: String| {
                let ctx = ctx.clone();
                async move {
                    if let Err(e) = ctx.resolve_slug(&slug).await {
                        ctx.job_failed("resolve", &slug, &e);
                    }
                }
            },
        );
        for slug in slugs {
            if !pool.submit(slug).await {
                break;
            }
        }
        pool.join().await;

        let users = self.ctx.state.users();
        info!("Discovered {} users", users.len());
        if users.is_empty() && !self.ctx.is_stopping() {
            return Err(HarvestError::NoUsers { slugs: count });
        }
        Ok(users)
    }

    /// Harvest profiles and posts for each user.
    pub async fn harvest_users(&self, users: Vec<String>) -> RunSummary {
        let count = users.len();
        info!("Harvesting {} users", count);

        let workers = self.ctx.settings.workers;
        let ctx = self.ctx.clone();
        let pool = WorkerPool::spawn(
            "harvest",
            workers,
            workers * 2,
            self.ctx.shutdown.clone(),
            move |_, user_id: String| {
                let ctx = ctx.clone();
                async move {
                    if let Err(e) = ctx.harvest_user(&user_id).await {
                        ctx.job_failed("profile", &user_id, &e);
                    }
                }
            },
        );
        for user_id in users {
            if !pool.submit(user_id).await {
                break;
            }
        }
        pool.join().await;

        self.ctx.stats.summary(0, count)
    }

    /// Harvest stage only, seeded from a user list.
    pub async fn harvest_listed(&self, users: Vec<String>) -> RunSummary {
        self.ctx.state.begin_iteration();
        self.ctx.stats.reset();
        self.harvest_users(users).await
    }

    /// Load a user list from a local file or, failing that, from a key in
    /// the output storage.
    pub async fn load_user_list(&self, source: &str) -> Result<Vec<String>, HarvestError> {
        let bytes = if Path::new(source).is_file() {
            tokio::fs::read(source)
                .await
                .map_err(|e| HarvestError::Config(format!("Failed to read {}: {}", source, e)))?
        } else {
            self.ctx.output.read(source).await?
        };

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| HarvestError::Config(format!("Invalid user list {}: {}", source, e)))?;
        let users = ids::user_ids_from_list(&value);
        if users.is_empty() {
            return Err(HarvestError::Config(format!(
                "User list {} contains no user ids",
                source
            )));
        }
        Ok(users)
    }

    async fn write_discovered_users(&self, users: &[String]) -> Result<(), PersistError> {
        let list = Value::from(users.to_vec());
        persist_json(self.ctx.output.as_ref(), DISCOVERED_USERS_KEY, &list).await?;
        debug!("Wrote {} users to {}", users.len(), DISCOVERED_USERS_KEY);
        Ok(())
    }
}
