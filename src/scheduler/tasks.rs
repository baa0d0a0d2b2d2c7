use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;
use crate::stats::DeliveryStats;
use crate::watcher::ConfigWatcher;

/// Register the periodic stats summary and, if enabled, config polling.
pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    config: &Config,
    config_path: &std::path::Path,
    registry: Arc<SourceRegistry>,
    stats: Arc<DeliveryStats>,
) -> anyhow::Result<()> {
    scheduler
        .add_cron_job(&config.stats.summary_cron, "stats-summary", move || {
            let stats = Arc::clone(&stats);
            Box::pin(async move {
                stats.log_summary();
            })
        })
        .await?;

    if config.watch.enabled {
        let watcher = Arc::new(ConfigWatcher::new(
            config_path,
            registry,
            Duration::from_millis(config.watch.settle_ms),
        ));
        // Record the starting mtime so the first tick doesn't count as a change
        watcher.tick().await;

        scheduler
            .add_cron_job(&config.watch.cron, "config-watch", move || {
                let watcher = Arc::clone(&watcher);
                Box::pin(async move {
                    watcher.tick().await;
                })
            })
            .await?;
        info!(path = %config_path.display(), "Watching config file for channel changes");
    }

    Ok(())
}
