//! Harvest commands: run, scan and users.

use console::style;
use tokio::sync::watch;

use vine_harvest::{HarvestSettings, Harvester, RunSummary};

/// Run the full pipeline, looping when a poll interval is set.
pub async fn cmd_run(settings: HarvestSettings, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    print_plan(&settings);
    if !settings.poll_interval.is_zero() {
        println!(
            "{} Polling every {}s (Ctrl-C to stop)",
            style("→").cyan(),
            settings.poll_interval.as_secs()
        );
    }

    let harvester = Harvester::connect(settings, shutdown).await?;
    let summary = harvester.run().await?;
    print_summary(&summary);
    Ok(())
}

/// Scan only and write the slug list.
pub async fn cmd_scan(settings: HarvestSettings, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    println!(
        "{} Scanning {} for vine slugs",
        style("→").cyan(),
        settings.input
    );
    let harvester = Harvester::connect(settings, shutdown).await?;
    let count = harvester.scan_only().await?;
    println!(
        "{} Found {} slugs, list written to {}",
        style("✓").green(),
        count,
        harvester.output().describe()
    );
    Ok(())
}

/// Harvest the users named in a list.
pub async fn cmd_users(
    settings: HarvestSettings,
    list: &str,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let harvester = Harvester::connect(settings, shutdown).await?;
    let users = harvester.load_user_list(list).await?;
    println!(
        "{} Harvesting {} users from {}",
        style("→").cyan(),
        users.len(),
        list
    );

    let summary = harvester.harvest_listed(users).await;
    print_summary(&summary);
    Ok(())
}

fn print_plan(settings: &HarvestSettings) {
    println!(
        "{} Harvesting {} → {} ({} workers, {} req/s{})",
        style("→").cyan(),
        settings.input,
        settings.output,
        settings.workers,
        settings.rate_limit,
        if settings.download_media {
            ", with media"
        } else {
            ""
        }
    );
}

fn print_summary(summary: &RunSummary) {
    if summary.slugs > 0 {
        println!("  Slugs:      {}", summary.slugs);
    }
    println!("  Users:      {}", summary.users);
    println!("  Profiles:   {} new", summary.profiles_written);
    println!(
        "  Posts:      {} new, {} already present",
        summary.posts_written, summary.posts_skipped
    );
    if summary.media_written > 0 {
        println!("  Media:      {} new", summary.media_written);
    }
    if summary.not_found > 0 {
        println!("  Not found:  {}", style(summary.not_found).dim());
    }

    if summary.failures > 0 {
        println!(
            "{} Done with {} failures (rerun to pick them up)",
            style("!").yellow(),
            summary.failures
        );
    } else {
        println!("{} Done", style("✓").green());
    }
}
