use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::MessageOrigin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EventSource, InboundEvent, MediaFlags, SessionInfo, SourceKind, UserSender};
use crate::error::SessionError;

/// Telegram session that turns messages and channel posts into [`InboundEvent`]s.
///
/// The teloxide dispatcher runs on its own task and feeds an unbounded
/// channel; the pipeline pulls from it through [`EventSource::next_event`].
pub struct TelegramSource {
    bot: Bot,
    name: String,
    events: Option<mpsc::UnboundedReceiver<InboundEvent>>,
    shutdown: Option<ShutdownToken>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TelegramSource {
    pub fn new(bot_token: &str, name: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(bot_token),
            name: name.into(),
            events: None,
            shutdown: None,
            dispatcher: None,
        }
    }
}

#[async_trait]
impl EventSource for TelegramSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<SessionInfo, SessionError> {
        info!(session = %self.name, "Connecting to Telegram...");

        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| SessionError::ConnectFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel::<InboundEvent>();

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(forward_message))
            .branch(Update::filter_channel_post().endpoint(forward_message));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![tx])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        self.shutdown = Some(dispatcher.shutdown_token());
        self.dispatcher = Some(tokio::spawn(async move {
            dispatcher.dispatch().await;
        }));
        self.events = Some(rx);

        Ok(SessionInfo {
            user_id: me.user.id.0,
            username: me.user.username.clone(),
        })
    }

    async fn next_event(&mut self) -> Option<Result<InboundEvent, SessionError>> {
        // The sender lives in the dispatcher, so the channel closes when polling stops.
        let events = self.events.as_mut()?;
        events.recv().await.map(Ok)
    }

    async fn source_title(&self, id: i64) -> Result<String, SessionError> {
        let chat = self
            .bot
            .get_chat(ChatId(id))
            .await
            .map_err(|e| SessionError::Lookup {
                id,
                reason: e.to_string(),
            })?;
        Ok(chat.title().unwrap_or(crate::registry::UNKNOWN_NAME).to_string())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.events = None;

        let Some(handle) = self.dispatcher.take() else {
            return Ok(());
        };

        let token = self.shutdown.take();
        match token.as_ref().map(|t| t.shutdown()) {
            Some(Ok(done)) => {
                done.await;
                if let Err(e) = handle.await {
                    warn!(session = %self.name, "Dispatcher task ended abnormally: {}", e);
                }
            }
            // Dispatcher never got going; nothing to wait for
            _ => handle.abort(),
        }

        info!(session = %self.name, "Telegram session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.dispatcher
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn forward_message(
    msg: Message,
    tx: mpsc::UnboundedSender<InboundEvent>,
) -> ResponseResult<()> {
    let event = to_event(&msg);
    debug!(
        chat_id = event.source_id,
        kind = %event.source_kind,
        message_id = event.message_id,
        "Update received"
    );
    if tx.send(event).is_err() {
        debug!("Event receiver dropped; discarding update");
    }
    Ok(())
}

fn source_kind(msg: &Message) -> SourceKind {
    let chat = &msg.chat;
    if chat.is_channel() {
        SourceKind::Channel
    } else if relayed_by_bot(msg) {
        SourceKind::Bot
    } else if chat.is_supergroup() {
        SourceKind::Supergroup
    } else if chat.is_group() {
        SourceKind::Group
    } else if chat.is_private() {
        SourceKind::Private
    } else {
        SourceKind::Unknown
    }
}

/// Bots can't read each other's messages, so bot content only shows up
/// as inline results (`via_bot`) or as forwards of a bot's message.
fn relayed_by_bot(msg: &Message) -> bool {
    if msg.from.as_ref().is_some_and(|u| u.is_bot) || msg.via_bot.is_some() {
        return true;
    }
    matches!(
        msg.forward_origin(),
        Some(MessageOrigin::User { sender_user, .. }) if sender_user.is_bot
    )
}

/// Convert a teloxide message into the relay's event type.
pub fn to_event(msg: &Message) -> InboundEvent {
    let media = MediaFlags {
        photo: msg.photo().is_some(),
        video: msg.video().is_some(),
        audio: msg.audio().is_some(),
        document: msg.document().map(|d| d.file_name.clone()),
        sticker: msg.sticker().is_some(),
        animation: msg.animation().is_some(),
        voice: msg.voice().is_some(),
        video_note: msg.video_note().is_some(),
        poll: msg.poll().is_some(),
    };

    InboundEvent {
        source_id: msg.chat.id.0,
        source_kind: source_kind(msg),
        source_title: msg.chat.title().map(str::to_string),
        message_id: i64::from(msg.id.0),
        date: msg.date,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        from_user: msg.from.as_ref().map(|u| UserSender {
            id: u.id.0,
            username: u.username.clone(),
            first_name: Some(u.first_name.clone()).filter(|n| !n.is_empty()),
            is_bot: u.is_bot,
        }),
        media,
    }
}
