use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, ActionableMessage, InboundEvent};
use crate::error::BotError;
use crate::generation::{
    build_content, build_user_prompt, generate_or_fallback, CommentGenerator, GenerationRequest,
    PromptKind,
};
use crate::ledger::ReplyLedger;
use crate::platform::{ProtocolClient, RawEvent};
use crate::rate_limiter::RateLimiter;
use crate::resolver::ChannelMapping;

/// Characters of message text shown in log lines
const PREVIEW_CHARS: usize = 70;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub model: String,
    pub system_prompt: String,
    pub reply_to_direct_messages: bool,
    pub flush_on_send: bool,
    /// Events still waiting for a posting slot after this long are dropped
    pub max_event_age: Option<Duration>,
}

/// How one dispatch cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { target: i64, message_id: i32 },
    SendFailed { target: i64 },
    /// Too old by the time a posting slot was free
    Expired,
    Skipped,
}

/// Consumes inbound events one at a time: classify, admit, generate, send,
/// then record or roll back.
pub struct DispatchLoop {
    protocol: Arc<dyn ProtocolClient>,
    generator: Arc<dyn CommentGenerator>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<ReplyLedger>,
    mapping: ChannelMapping,
    settings: DispatchSettings,
}

impl DispatchLoop {
    pub fn new(
        protocol: Arc<dyn ProtocolClient>,
        generator: Arc<dyn CommentGenerator>,
        limiter: Arc<RateLimiter>,
        ledger: Arc<ReplyLedger>,
        mapping: ChannelMapping,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            protocol,
            generator,
            limiter,
            ledger,
            mapping,
            settings,
        }
    }

    /// Process events until every sender is dropped.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<RawEvent>) {
        info!("Dispatch loop started");
        while let Some(event) = events.recv().await {
            let outcome = self.handle(event).await;
            debug!("Dispatch outcome: {:?}", outcome);
            let backlog = events.len();
            if backlog > 0 {
                info!("{} event(s) waiting in the dispatch queue", backlog);
            }
        }
        info!("Event stream closed, dispatch loop stopping");
    }

    pub async fn handle(&self, event: RawEvent) -> DispatchOutcome {
        let received_at = event.received_at;
        match classify(event, &self.mapping, &self.ledger).await {
            InboundEvent::ChannelPost {
                message,
                source,
                target,
            } => {
                info!(
                    "New post from monitored channel {} (message {} in chat {}): {}",
                    source,
                    message.message_id,
                    message.origin,
                    preview(&message.text)
                );
                self.reply(PromptKind::ChannelPost, &message, target, received_at)
                    .await
            }
            InboundEvent::DiscussionReply(message) => {
                info!(
                    "Reply {} to bot message {:?} in chat {}: {}",
                    message.message_id,
                    message.reply_to,
                    message.origin,
                    preview(&message.text)
                );
                self.reply(
                    PromptKind::DiscussionReply,
                    &message,
                    message.origin,
                    received_at,
                )
                .await
            }
            InboundEvent::DirectMessage(message) => {
                if !self.settings.reply_to_direct_messages {
                    debug!(
                        "Ignoring private message from {} (direct replies disabled)",
                        message.origin
                    );
                    return DispatchOutcome::Skipped;
                }
                info!(
                    "Private message from {}: {}",
                    message.origin,
                    preview(&message.text)
                );
                let target = message.sender_id.unwrap_or(message.origin);
                self.reply(PromptKind::DirectMessage, &message, target, received_at)
                    .await
            }
            InboundEvent::Unclassified(reason) => {
                debug!("Ignoring event: {:?}", reason);
                DispatchOutcome::Skipped
            }
        }
    }

    async fn reply(
        &self,
        kind: PromptKind,
        message: &ActionableMessage,
        target: i64,
        received_at: Instant,
    ) -> DispatchOutcome {
        if let Some(media) = &message.media {
            info!("Message contains media: {}", media);
        }

        let requested_at = Instant::now();
        let admission = self.limiter.admit().await;
        let waited = admission.at().duration_since(requested_at);
        if !waited.is_zero() {
            info!("Waited {} seconds for a posting slot", waited.as_secs());
        }
        if let Some(max_age) = self.settings.max_event_age {
            let age = admission.at().duration_since(received_at);
            if age > max_age {
                self.limiter.rollback(admission).await;
                warn!(
                    "Dropping message {} from chat {}: {} minutes old by the time a slot was free",
                    message.message_id,
                    message.origin,
                    age.as_secs() / 60
                );
                return DispatchOutcome::Expired;
            }
        }
        info!("Rate limits: {}", self.limiter.usage().await);

        let content = build_content(&message.text, message.media.as_slice());
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            system_prompt: self.settings.system_prompt.clone(),
            user_prompt: build_user_prompt(kind, &content),
        };
        let text = generate_or_fallback(self.generator.as_ref(), &request).await;

        match self
            .protocol
            .send_message(target, &text, Some(message.message_id))
            .await
        {
            Ok(sent_id) => {
                info!(
                    "Reply {} posted to chat {} (in reply to {})",
                    sent_id, target, message.message_id
                );
                // Follow-up tracking only applies to public threads
                if kind != PromptKind::DirectMessage {
                    self.ledger.record(target, sent_id).await;
                    if self.settings.flush_on_send {
                        self.ledger.flush_logged().await;
                    }
                }
                DispatchOutcome::Sent {
                    target,
                    message_id: sent_id,
                }
            }
            Err(e) => {
                self.limiter.rollback(admission).await;
                let err = BotError::Send {
                    target,
                    reason: format!("{:#}", e),
                };
                error!(
                    "{} (origin chat {}, message {}); slot released",
                    err, message.origin, message.message_id
                );
                DispatchOutcome::SendFailed { target }
            }
        }
    }
}

fn preview(text: &str) -> String {
    if text.is_empty() {
        return "[No Text]".to_string();
    }
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("\"{}...\"", head)
    } else {
        format!("\"{}\"", head)
    }
}
