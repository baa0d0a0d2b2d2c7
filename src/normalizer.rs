use serde::{Deserialize, Serialize};

use crate::classifier::Route;
use crate::platform::{InboundEvent, MediaFlags};
use crate::registry::UNKNOWN_NAME;

/// Longest text forwarded to the sink, in characters
pub const MAX_TEXT_CHARS: usize = 4000;

/// Appended to text cut at [`MAX_TEXT_CHARS`]
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// The unit handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPayload {
    #[serde(rename = "channel_id")]
    pub source_id: i64,
    #[serde(rename = "channel_name")]
    pub source_name: String,
    pub message_id: i64,
    pub text: String,
    pub timestamp: i64,
    pub sender: Option<String>,
    #[serde(
        rename = "is_bot_forward",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relayed: Option<bool>,
}

/// Map an event and its route to a payload. Pure and deterministic.
pub fn normalize(event: &InboundEvent, route: &Route) -> NormalizedPayload {
    let text = match event.body() {
        Some(body) => body.to_string(),
        None => format!("[Media: {}]", media_label(&event.media)),
    };

    let sender = event.from_user.as_ref().map(|user| {
        let name = user
            .username
            .as_deref()
            .or(user.first_name.as_deref())
            .unwrap_or(UNKNOWN_NAME);
        format!("{} ({})", name, user.id)
    });

    NormalizedPayload {
        source_id: route.source_id,
        source_name: if route.source_name.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            route.source_name.clone()
        },
        message_id: event.message_id,
        text: truncate(text),
        timestamp: event.date.timestamp(),
        sender,
        relayed: route.relayed.then_some(true),
    }
}

/// Label for a message without text. The first matching flag wins.
pub fn media_label(media: &MediaFlags) -> String {
    if media.photo {
        "Photo".to_string()
    } else if media.video {
        "Video".to_string()
    } else if media.audio {
        "Audio".to_string()
    } else if let Some(file_name) = &media.document {
        format!("Document: {}", file_name.as_deref().unwrap_or(UNKNOWN_NAME))
    } else if media.sticker {
        "Sticker".to_string()
    } else if media.animation {
        "Animation".to_string()
    } else if media.voice {
        "Voice".to_string()
    } else if media.video_note {
        "Video Note".to_string()
    } else if media.poll {
        "Poll".to_string()
    } else {
        "Unknown Media".to_string()
    }
}

fn truncate(text: String) -> String {
    // Cut on a char boundary so multi-byte text never panics
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((cut, _)) => {
            let mut truncated = text[..cut].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => text,
    }
}
