use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::error::DeliveryError;
use crate::normalizer::NormalizedPayload;

const USER_AGENT: &str = concat!("relaybot/", env!("CARGO_PKG_VERSION"));

/// Hands payloads to the downstream sink.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver one payload. Retries are internal; the result is final.
    async fn deliver(&self, payload: &NormalizedPayload) -> bool;

    async fn health_check(&self) -> bool;
}

/// Success envelope returned by the sink
#[derive(Debug, Deserialize)]
struct SinkResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

enum Attempt {
    Accepted,
    Failed(DeliveryError),
}

pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    health_url: String,
    max_retries: u32,
    health_timeout: Duration,
    backoff_base: Duration,
}

impl HttpSender {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        info!(url = %config.url, max_retries = config.max_retries, "HTTP sender ready");

        Ok(Self {
            client,
            url: config.url.clone(),
            health_url: health_url(&config.url),
            max_retries: config.max_retries,
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Scale the backoff schedule; the wait before retry `n` is `base * 2^n`.
    #[cfg(test)]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn attempt(&self, payload: &NormalizedPayload) -> Attempt {
        let response = match self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Failed(e.into()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Attempt::Failed(e.into()),
        };
        debug!(status = status.as_u16(), body = %preview(&body, 200), "Sink response");

        if status != reqwest::StatusCode::OK {
            return Attempt::Failed(DeliveryError::Status {
                status: status.as_u16(),
                body: preview(&body, 100),
            });
        }

        match serde_json::from_str::<SinkResponse>(&body) {
            Ok(parsed) if parsed.success => Attempt::Accepted,
            Ok(parsed) => Attempt::Failed(DeliveryError::Rejected(
                parsed.message.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Err(e) => Attempt::Failed(DeliveryError::Unexpected(format!(
                "unparseable sink response: {e}"
            ))),
        }
    }
}

#[async_trait]
impl Delivery for HttpSender {
    async fn deliver(&self, payload: &NormalizedPayload) -> bool {
        let total = self.max_retries + 1;
        info!(
            url = %self.url,
            channel = %payload.source_name,
            message_id = payload.message_id,
            "Sending message to sink"
        );

        for attempt in 0..total {
            if attempt > 0 {
                info!("Retry {}/{}", attempt + 1, total);
            }

            let err = match self.attempt(payload).await {
                Attempt::Accepted => {
                    info!(
                        channel = %payload.source_name,
                        message_id = payload.message_id,
                        "Message delivered"
                    );
                    return true;
                }
                Attempt::Failed(err) => err,
            };

            if !err.is_transient() {
                error!(
                    message_id = payload.message_id,
                    "Delivery failed without retry: {}", err
                );
                return false;
            }

            warn!(
                message_id = payload.message_id,
                "Delivery attempt {}/{} failed: {}",
                attempt + 1,
                total,
                err
            );

            if attempt + 1 < total {
                let wait = self.backoff_delay(attempt);
                info!("Waiting {:?} before retrying", wait);
                tokio::time::sleep(wait).await;
            }
        }

        error!(
            message_id = payload.message_id,
            "Delivery failed after {} attempts", total
        );
        false
    }

    async fn health_check(&self) -> bool {
        debug!(url = %self.health_url, "Checking sink health");

        let response = match self
            .client
            .get(&self.health_url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Sink health check error: {}", e);
                return false;
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::OK {
            if let Ok(parsed) = serde_json::from_str::<SinkResponse>(&body) {
                if parsed.success {
                    info!("Sink health check passed");
                    return true;
                }
            }
        }

        warn!(status = status.as_u16(), "Sink health check failed: {}", preview(&body, 200));
        false
    }
}

/// Everything before the first `/api/`, plus `/health`.
pub fn health_url(url: &str) -> String {
    let base = url.split("/api/").next().unwrap_or(url);
    format!("{}/health", base.trim_end_matches('/'))
}

fn preview(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
