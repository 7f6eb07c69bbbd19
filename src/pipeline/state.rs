//! Dedup state shared by the workers of one harvester.
//!
//! Each set has its own lock, held only for a single check-and-insert. No
//! lock is ever held across a network call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a worker panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct HarvestState {
    /// Slug -> user id. Survives poll iterations, so a resolved slug is never
    /// fetched again by this process.
    resolved: Mutex<HashMap<String, String>>,
    /// Users discovered in the current iteration.
    users: Mutex<BTreeSet<String>>,
    /// Users already scheduled for harvest in the current iteration.
    harvested: Mutex<HashSet<String>>,
    /// Media URLs already claimed in the current iteration.
    media: Mutex<HashSet<String>>,
}

impl HarvestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-iteration sets. Resolved slugs are kept.
    pub fn begin_iteration(&self) {
        lock(&self.users).clear();
        lock(&self.harvested).clear();
        lock(&self.media).clear();
    }

    /// User id a slug resolved to earlier, if any.
    pub fn resolved_user(&self, slug: &str) -> Option<String> {
        lock(&self.resolved).get(slug).cloned()
    }

    pub fn record_resolution(&self, slug: &str, user_id: &str) {
        lock(&self.resolved).insert(slug.to_string(), user_id.to_string());
    }

    /// Add a discovered user. Returns `true` the first time it is seen.
    pub fn add_user(&self, user_id: &str) -> bool {
        lock(&self.users).insert(user_id.to_string())
    }

    /// Discovered users, sorted.
    pub fn users(&self) -> Vec<String> {
        lock(&self.users).iter().cloned().collect()
    }

    /// Claim a user for harvesting. Only the first claim succeeds.
    pub fn claim_user(&self, user_id: &str) -> bool {
        lock(&self.harvested).insert(user_id.to_string())
    }

    /// Claim a media URL for download. Only the first claim succeeds.
    pub fn claim_media(&self, url: &str) -> bool {
        lock(&self.media).insert(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_succeed_once() {
        let state = HarvestState::new();
        assert!(state.claim_media("https://vines.s3.amazonaws.com/a.mp4"));
        assert!(!state.claim_media("https://vines.s3.amazonaws.com/a.mp4"));
        assert!(state.claim_user("777"));
        assert!(!state.claim_user("777"));
    }

    #[test]
    fn test_users_sorted_and_deduped() {
        let state = HarvestState::new();
        assert!(state.add_user("9"));
        assert!(state.add_user("10"));
        assert!(!state.add_user("9"));
        assert_eq!(state.users(), vec!["10", "9"]);
    }

    #[test]
    fn test_new_iteration_keeps_resolutions() {
        let state = HarvestState::new();
        state.record_resolution("abc123", "777");
        state.add_user("777");
        state.claim_user("777");
        state.claim_media("m");

        state.begin_iteration();

        assert_eq!(state.resolved_user("abc123").as_deref(), Some("777"));
        assert!(state.users().is_empty());
        assert!(state.claim_user("777"));
        assert!(state.claim_media("m"));
    }
}
