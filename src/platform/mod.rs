pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SessionError;

/// What kind of chat an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Channel,
    Group,
    Supergroup,
    Private,
    /// A chat with a bot account
    Bot,
    Unknown,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Channel => write!(f, "channel"),
            SourceKind::Group => write!(f, "group"),
            SourceKind::Supergroup => write!(f, "supergroup"),
            SourceKind::Private => write!(f, "private"),
            SourceKind::Bot => write!(f, "bot"),
            SourceKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// The user who sent a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSender {
    pub id: u64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub is_bot: bool,
}

/// Media carried by a message. Several flags may be set on malformed input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaFlags {
    pub photo: bool,
    pub video: bool,
    pub audio: bool,
    /// Present when the message carries a document; holds its file name if known
    pub document: Option<Option<String>>,
    pub sticker: bool,
    pub animation: bool,
    pub voice: bool,
    pub video_note: bool,
    pub poll: bool,
}

/// A message-arrived notification from the event source.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub source_id: i64,
    pub source_kind: SourceKind,
    pub source_title: Option<String>,
    pub message_id: i64,
    pub date: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub from_user: Option<UserSender>,
    pub media: MediaFlags,
}

impl InboundEvent {
    /// Text if present, otherwise the caption. Empty strings count as absent.
    pub fn body(&self) -> Option<&str> {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|s| !s.is_empty())
        }
        non_empty(&self.text).or_else(|| non_empty(&self.caption))
    }
}

/// Identity reported by the session once it is ready
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user_id: u64,
    pub username: Option<String>,
}

/// A chat session that delivers [`InboundEvent`]s.
///
/// The pipeline owns the source for its whole lifetime.
#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> &str;

    /// Establish the session. Returns once it is ready to deliver events.
    async fn connect(&mut self) -> Result<SessionInfo, SessionError>;

    /// Next event. `None` means the session ended; `Some(Err)` is a fatal session fault.
    async fn next_event(&mut self) -> Option<Result<InboundEvent, SessionError>>;

    /// Fetch a source's title by id.
    async fn source_title(&self, id: i64) -> Result<String, SessionError>;

    /// Close the session. Must be safe to call on a closed session.
    async fn close(&mut self) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::TimeZone;

    /// A text event from a channel, the usual case in tests.
    pub fn channel_event(source_id: i64, message_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            source_id,
            source_kind: SourceKind::Channel,
            source_title: Some("Test Channel".to_string()),
            message_id,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            text: Some(text.to_string()),
            caption: None,
            from_user: None,
            media: MediaFlags::default(),
        }
    }

    pub fn event_of_kind(kind: SourceKind, source_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            source_kind: kind,
            from_user: Some(UserSender {
                id: 42,
                username: Some("alice".to_string()),
                first_name: Some("Alice".to_string()),
                is_bot: kind == SourceKind::Bot,
            }),
            ..channel_event(source_id, 1, text)
        }
    }
}
