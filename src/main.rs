mod admin;
mod classifier;
mod config;
mod delivery;
mod error;
mod manage;
mod normalizer;
mod pipeline;
mod platform;
mod registry;
mod scheduler;
mod stats;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::classifier::{Classifier, RelayRule};
use crate::config::{Config, ConfigStore};
use crate::delivery::{Delivery, HttpSender};
use crate::error::RelayError;
use crate::pipeline::Pipeline;
use crate::platform::telegram::TelegramSource;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;
use crate::stats::DeliveryStats;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("channels") {
        return manage::run(&args[1..]);
    }

    let config_path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let loaded = Config::load(&config_path);

    // Initialize logging
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Loading configuration from: {}", config_path.display());
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{}", RelayError::from(e));
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, &config_path).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config, config_path: &Path) -> Result<()> {
    info!("Configuration loaded successfully");
    info!("  Session: {}", config.telegram.session_name);
    info!("  Sink: {}", config.sink.url);
    info!("  Channels: {:?}", config.telegram.channel_ids);
    if let Some(relay) = &config.relay {
        info!("  Relay target: {} ({})", relay.target_name, relay.target_id);
    }

    let sender = HttpSender::new(&config.sink)?;
    if !sender.health_check().await {
        warn!("Sink is not healthy yet; deliveries will be retried as messages arrive");
    }
    let delivery: Arc<dyn Delivery> = Arc::new(sender);

    let registry = Arc::new(SourceRegistry::with_ids(
        config.telegram.channel_ids.iter().copied(),
    ));
    for (id, name) in config.telegram.channel_names() {
        registry.set_name(id, name);
    }
    let stats = Arc::new(DeliveryStats::new());

    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_builtin_tasks(
        &mut scheduler,
        &config,
        config_path,
        Arc::clone(&registry),
        Arc::clone(&stats),
    )
    .await?;
    scheduler.start().await?;

    if let Some(admin) = &config.admin {
        let state = AdminState {
            registry: Arc::clone(&registry),
            stats: Arc::clone(&stats),
            store: ConfigStore::new(config_path),
        };
        let bind = admin.bind;
        tokio::spawn(async move {
            if let Err(e) = admin::serve(bind, state).await {
                error!("{:#}", e);
            }
        });
    }

    let classifier = Classifier::new(config.relay.as_ref().map(RelayRule::from_config));
    let source = TelegramSource::new(
        &config.telegram.bot_token,
        config.telegram.session_name.clone(),
    );
    let mut pipeline = Pipeline::new(
        source,
        registry,
        classifier,
        delivery,
        stats,
        &config.pipeline,
    );

    pipeline.start().await.map_err(RelayError::from)?;
    info!("Relay is running. Press Ctrl-C to stop.");

    let result = pipeline
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Err(e) = scheduler.shutdown().await {
        warn!("{:#}", e);
    }

    result.map_err(RelayError::from)?;
    info!(state = ?pipeline.state(), "Relay stopped");
    Ok(())
}
