//! Receive loop: pulls events from the session, routes them, and hands
//! payloads to delivery tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::classifier::{Classifier, Decision};
use crate::config::PipelineConfig;
use crate::delivery::Delivery;
use crate::error::{ProcessingError, SessionError};
use crate::normalizer::{normalize, NormalizedPayload};
use crate::platform::{EventSource, InboundEvent};
use crate::registry::SourceRegistry;
use crate::stats::DeliveryStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Disconnected,
    Connecting,
    Listening,
    Stopping,
}

pub struct Pipeline<S: EventSource> {
    source: S,
    registry: Arc<SourceRegistry>,
    classifier: Classifier,
    delivery: Arc<dyn Delivery>,
    stats: Arc<DeliveryStats>,
    in_flight: JoinSet<()>,
    state: PipelineState,
    verify_sources: bool,
    shutdown_grace: Duration,
}

impl<S: EventSource> Pipeline<S> {
    pub fn new(
        source: S,
        registry: Arc<SourceRegistry>,
        classifier: Classifier,
        delivery: Arc<dyn Delivery>,
        stats: Arc<DeliveryStats>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            registry,
            classifier,
            delivery,
            stats,
            in_flight: JoinSet::new(),
            state: PipelineState::Disconnected,
            verify_sources: config.verify_sources,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Connect the session and start listening.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != PipelineState::Disconnected {
            debug!(state = ?self.state, "Pipeline already started");
            return Ok(());
        }

        self.state = PipelineState::Connecting;
        let session = match self.source.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.state = PipelineState::Disconnected;
                return Err(e);
            }
        };

        info!(
            session = %self.source.name(),
            user_id = session.user_id,
            username = session.username.as_deref().unwrap_or("-"),
            "Session connected"
        );
        self.state = PipelineState::Listening;

        if self.verify_sources {
            self.verify_registered_sources().await;
        }

        if self.registry.is_empty() {
            warn!("No channels monitored; only bot, private and group messages will be relayed");
        } else {
            info!(
                "Listening for messages from {} monitored channel(s)",
                self.registry.len()
            );
        }
        Ok(())
    }

    /// Look up every monitored source once. Failures are logged; the id stays monitored.
    async fn verify_registered_sources(&self) {
        for id in self.registry.ids() {
            match self.source.source_title(id).await {
                Ok(title) => {
                    info!(source_id = id, "Monitoring: {}", title);
                    self.registry.set_name(id, title);
                }
                Err(e) => warn!(source_id = id, "Cannot access source: {}", e),
            }
        }
    }

    /// Process events until `shutdown` resolves or the session ends, then stop.
    ///
    /// Returns an error when the session failed or ended on its own.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        if self.state != PipelineState::Listening {
            return Err(SessionError::NotConnected {
                name: self.source.name().to_string(),
            });
        }

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some(done) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    reap(&self.stats, done);
                }
                next = self.source.next_event() => match next {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        error!("Session failed: {}", e);
                        break Err(e);
                    }
                    None => {
                        error!(session = %self.source.name(), "Event stream ended");
                        break Err(SessionError::Disconnected {
                            name: self.source.name().to_string(),
                            reason: "event stream ended".to_string(),
                        });
                    }
                },
            }
        };

        self.stop().await;
        result
    }

    /// Route one event and, if it is wanted, spawn its delivery.
    ///
    /// Never blocks on the sink.
    pub fn handle_event(&mut self, event: InboundEvent) {
        self.stats.record_received(event.source_id, Utc::now());
        debug!(
            source_id = event.source_id,
            kind = %event.source_kind,
            message_id = event.message_id,
            "Event received"
        );

        let registered = self.registry.snapshot();
        let classifier = &self.classifier;
        let routed = std::panic::catch_unwind(AssertUnwindSafe(|| {
            match classifier.classify(&event, &registered) {
                Decision::Ignore(reason) => Err(reason),
                Decision::Process(route) => Ok(normalize(&event, &route)),
            }
        }));

        let payload = match routed {
            Ok(Ok(payload)) => payload,
            Ok(Err(reason)) => {
                debug!(source_id = event.source_id, "Ignored: {}", reason);
                return;
            }
            Err(panic) => {
                let err = ProcessingError::Panicked {
                    source_id: event.source_id,
                    message_id: event.message_id,
                    reason: panic_message(panic.as_ref()),
                };
                error!("{}", err);
                self.stats.record_failed();
                return;
            }
        };

        info!(
            source_id = payload.source_id,
            channel = %payload.source_name,
            message_id = payload.message_id,
            relayed = payload.relayed.unwrap_or(false),
            "Processing message"
        );
        self.spawn_delivery(payload);
    }

    fn spawn_delivery(&mut self, payload: NormalizedPayload) {
        let delivery = Arc::clone(&self.delivery);
        let stats = Arc::clone(&self.stats);

        self.in_flight.spawn(async move {
            let outcome = AssertUnwindSafe(delivery.deliver(&payload))
                .catch_unwind()
                .await;
            match outcome {
                Ok(true) => stats.record_sent(),
                Ok(false) => stats.record_failed(),
                Err(panic) => {
                    let err = ProcessingError::TaskFailed {
                        source_id: payload.source_id,
                        message_id: payload.message_id,
                        reason: panic_message(panic.as_ref()),
                    };
                    error!("{}", err);
                    stats.record_failed();
                }
            }
        });
    }

    /// Close the session and give in-flight deliveries the grace period.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        if matches!(
            self.state,
            PipelineState::Disconnected | PipelineState::Stopping
        ) {
            return;
        }
        self.state = PipelineState::Stopping;
        info!(
            session = %self.source.name(),
            connected = self.source.is_connected(),
            "Stopping pipeline"
        );

        if let Err(e) = self.source.close().await {
            warn!("Error while closing session: {}", e);
        }

        let pending = self.in_flight.len();
        if pending > 0 {
            info!(
                "Waiting up to {:?} for {} in-flight deliveries",
                self.shutdown_grace, pending
            );
            let stats = &self.stats;
            let in_flight = &mut self.in_flight;
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while let Some(done) = in_flight.join_next().await {
                    reap(stats, done);
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    "{} deliveries still running after grace period; leaving them to finish",
                    self.in_flight.len()
                );
                self.in_flight.detach_all();
            }
        }

        self.stats.log_summary();
        self.state = PipelineState::Disconnected;
        info!("Pipeline stopped");
    }
}

/// Account for a finished delivery task. Outcomes are recorded by the task
/// itself, so only tasks that died abnormally need counting here.
fn reap(stats: &DeliveryStats, done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!("Delivery task ended abnormally: {}", e);
        stats.record_failed();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
