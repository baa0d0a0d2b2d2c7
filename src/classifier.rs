//! Per-event routing decision.
//!
//! The registry restricts only channels. Bot, private and group traffic is
//! always passed on, since whether it matters can't be told from the sender.

use std::collections::BTreeSet;

use crate::config::RelayConfig;
use crate::platform::{InboundEvent, SourceKind};
use crate::registry::UNKNOWN_NAME;

/// Identity a message is recorded and delivered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub source_id: i64,
    pub source_name: String,
    /// True when a bot relayed the message on behalf of another source
    pub relayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnregisteredChannel,
    UnknownKind,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::UnregisteredChannel => write!(f, "channel not monitored"),
            IgnoreReason::UnknownKind => write!(f, "unknown source kind"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignore(IgnoreReason),
    Process(Route),
}

/// Marker rule for bot accounts that relay alerts meant for another channel.
#[derive(Debug, Clone)]
pub struct RelayRule {
    target_id: i64,
    target_name: String,
    markers: Vec<String>,
}

impl RelayRule {
    pub fn new(target_id: i64, target_name: impl Into<String>, markers: Vec<String>) -> Self {
        Self {
            target_id,
            target_name: target_name.into(),
            markers,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        let mut markers = config.markers.clone();
        if config.match_target_id {
            markers.push(config.target_id.to_string());
        }
        Self::new(config.target_id, config.target_name.clone(), markers)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }
}

pub struct Classifier {
    relay: Option<RelayRule>,
}

impl Classifier {
    pub fn new(relay: Option<RelayRule>) -> Self {
        Self { relay }
    }

    /// Decide whether to process an event. Performs no I/O.
    pub fn classify(&self, event: &InboundEvent, registered: &BTreeSet<i64>) -> Decision {
        match event.source_kind {
            SourceKind::Channel => {
                if registered.contains(&event.source_id) {
                    Decision::Process(Route {
                        source_id: event.source_id,
                        source_name: title_or_unknown(event),
                        relayed: false,
                    })
                } else {
                    Decision::Ignore(IgnoreReason::UnregisteredChannel)
                }
            }
            SourceKind::Bot => Decision::Process(self.route_bot(event)),
            SourceKind::Private => {
                let who = event
                    .from_user
                    .as_ref()
                    .and_then(|u| u.username.clone().or_else(|| u.first_name.clone()))
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string());
                Decision::Process(Route {
                    source_id: event.source_id,
                    source_name: format!("Private_{who}"),
                    relayed: false,
                })
            }
            SourceKind::Group | SourceKind::Supergroup => Decision::Process(Route {
                source_id: event.source_id,
                source_name: title_or_unknown(event),
                relayed: false,
            }),
            SourceKind::Unknown => Decision::Ignore(IgnoreReason::UnknownKind),
        }
    }

    fn route_bot(&self, event: &InboundEvent) -> Route {
        if let (Some(rule), Some(body)) = (&self.relay, event.body()) {
            if rule.matches(body) {
                return Route {
                    source_id: rule.target_id,
                    source_name: rule.target_name.clone(),
                    relayed: true,
                };
            }
        }

        let name = event
            .source_title
            .clone()
            .or_else(|| event.from_user.as_ref().and_then(|u| u.username.clone()))
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        Route {
            source_id: event.source_id,
            source_name: name,
            relayed: false,
        }
    }
}

fn title_or_unknown(event: &InboundEvent) -> String {
    event
        .source_title
        .clone()
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}
