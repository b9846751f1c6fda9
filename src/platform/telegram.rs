use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{MessageEntityKind, MessageId, Recipient, ReplyParameters};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    ChannelRef, EntityKind, MediaDescriptor, Peer, PeerKind, ProtocolClient, RawEvent, RawMessage,
    ResolvedEntity,
};

/// Bot API session used for channel resolution and posting replies
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl ProtocolClient for TelegramClient {
    async fn resolve_entity(&self, reference: &ChannelRef) -> Result<ResolvedEntity> {
        let recipient = match reference {
            ChannelRef::Id(id) => Recipient::Id(ChatId(*id)),
            ChannelRef::Username(name) => Recipient::ChannelUsername(name.clone()),
        };
        let chat = self
            .bot
            .get_chat(recipient)
            .await
            .with_context(|| format!("getChat failed for {}", reference))?;

        let kind = if chat.is_channel() {
            EntityKind::Channel
        } else if chat.is_supergroup() {
            EntityKind::Supergroup
        } else if chat.is_private() {
            EntityKind::User
        } else {
            EntityKind::Group
        };

        Ok(ResolvedEntity {
            id: chat.id.0,
            title: chat.title().unwrap_or("untitled").to_string(),
            kind,
        })
    }

    async fn linked_discussion_group(&self, entity: &ResolvedEntity) -> Result<Option<i64>> {
        let chat = self
            .bot
            .get_chat(ChatId(entity.id))
            .await
            .with_context(|| format!("getChat failed for chat {}", entity.id))?;
        Ok(chat.linked_chat_id())
    }

    async fn send_message(&self, target: i64, text: &str, reply_to: Option<i32>) -> Result<i32> {
        let mut request = self.bot.send_message(ChatId(target), text.to_string());
        if let Some(id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(id)));
        }
        let sent = request
            .await
            .with_context(|| format!("sendMessage failed for chat {}", target))?;
        Ok(sent.id.0)
    }
}

/// Summarise the attachment of a message, if it has one
fn describe_media(msg: &Message) -> Option<MediaDescriptor> {
    if msg.photo().is_some() {
        Some(MediaDescriptor::Photo)
    } else if let Some(video) = msg.video() {
        Some(MediaDescriptor::Video {
            file_name: video.file_name.clone(),
        })
    } else if let Some(document) = msg.document() {
        Some(MediaDescriptor::Document {
            file_name: document.file_name.clone(),
        })
    } else if let Some(poll) = msg.poll() {
        Some(MediaDescriptor::Poll {
            question: poll.question.clone(),
        })
    } else if msg.sticker().is_some() {
        Some(MediaDescriptor::Other("Sticker".to_string()))
    } else if msg.voice().is_some() {
        Some(MediaDescriptor::Other("Voice".to_string()))
    } else if msg.audio().is_some() {
        Some(MediaDescriptor::Other("Audio".to_string()))
    } else {
        first_link(msg).map(|url| MediaDescriptor::WebPage {
            title: None,
            url: Some(url),
        })
    }
}

/// First URL in the text or caption. The Bot API does not expose preview titles.
fn first_link(msg: &Message) -> Option<String> {
    let (text, entities) = msg
        .text()
        .zip(msg.entities())
        .or_else(|| msg.caption().zip(msg.caption_entities()))?;
    entities.iter().find_map(|entity| match &entity.kind {
        MessageEntityKind::TextLink { url } => Some(url.to_string()),
        MessageEntityKind::Url => {
            // Entity offsets are in UTF-16 code units
            let units: Vec<u16> = text.encode_utf16().collect();
            let end = entity.offset.checked_add(entity.length)?;
            units
                .get(entity.offset..end)
                .map(String::from_utf16_lossy)
        }
        _ => None,
    })
}

fn to_raw_message(msg: &Message) -> RawMessage {
    let kind = if msg.chat.is_private() {
        PeerKind::User
    } else if msg.chat.is_channel() {
        PeerKind::Channel
    } else {
        PeerKind::Group
    };

    RawMessage {
        peer: Peer {
            id: msg.chat.id.0,
            kind,
        },
        message_id: msg.id.0,
        sender_id: msg.from.as_ref().map(|user| user.id.0 as i64),
        text: msg
            .text()
            .or_else(|| msg.caption())
            .unwrap_or_default()
            .to_string(),
        reply_to: msg.reply_to_message().map(|reply| reply.id.0),
        media: describe_media(msg),
        auto_forwarded_from: msg
            .is_automatic_forward()
            .then(|| msg.sender_chat.as_ref().map(|chat| chat.id.0))
            .flatten(),
    }
}

/// Receive updates and forward them, in arrival order, to the dispatch queue.
pub async fn listen(bot: Bot, events: mpsc::UnboundedSender<RawEvent>) -> Result<()> {
    info!("Starting Telegram listener...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(forward_message))
        .branch(Update::filter_channel_post().endpoint(forward_message));

    let fallback = events.clone();
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![events])
        .default_handler(move |upd| {
            let fallback = fallback.clone();
            async move {
                debug!("Update {:?} carries no message", upd.id);
                if fallback.send(RawEvent::empty()).is_err() {
                    warn!("Dispatch queue closed, dropping update");
                }
            }
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn forward_message(
    msg: Message,
    events: mpsc::UnboundedSender<RawEvent>,
) -> ResponseResult<()> {
    debug!("Message {} in chat {}", msg.id.0, msg.chat.id.0);
    if events.send(RawEvent::message(to_raw_message(&msg))).is_err() {
        warn!("Dispatch queue closed, dropping message {}", msg.id.0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_private_text_message() {
        let msg = parse(
            r#"{
                "message_id": 12,
                "from": {"id": 55, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": 55, "first_name": "Ann", "type": "private"},
                "date": 1700000000,
                "text": "hi bot"
            }"#,
        );

        let raw = to_raw_message(&msg);
        assert_eq!(
            raw.peer,
            Peer {
                id: 55,
                kind: PeerKind::User
            }
        );
        assert_eq!(raw.message_id, 12);
        assert_eq!(raw.sender_id, Some(55));
        assert_eq!(raw.text, "hi bot");
        assert_eq!(raw.reply_to, None);
        assert_eq!(raw.media, None);
        assert_eq!(raw.auto_forwarded_from, None);
    }

    #[test]
    fn test_channel_photo_post_uses_caption() {
        let msg = parse(
            r#"{
                "message_id": 5,
                "sender_chat": {"id": -100101, "title": "News", "type": "channel"},
                "chat": {"id": -100101, "title": "News", "type": "channel"},
                "date": 1700000000,
                "photo": [
                    {"file_id": "a", "file_unique_id": "a1", "file_size": 100, "width": 90, "height": 90}
                ],
                "caption": "Launch day"
            }"#,
        );

        let raw = to_raw_message(&msg);
        assert_eq!(raw.peer.kind, PeerKind::Channel);
        assert_eq!(raw.peer.id, -100101);
        assert_eq!(raw.sender_id, None);
        assert_eq!(raw.text, "Launch day");
        assert_eq!(raw.media, Some(MediaDescriptor::Photo));
        // A post in the channel itself is not a forwarded copy
        assert_eq!(raw.auto_forwarded_from, None);
    }

    #[test]
    fn test_discussion_copy_carries_source_channel() {
        let msg = parse(
            r#"{
                "message_id": 31,
                "from": {"id": 777000, "is_bot": false, "first_name": "Telegram"},
                "sender_chat": {"id": -100101, "title": "News", "type": "channel"},
                "chat": {"id": -100202, "title": "News chat", "type": "supergroup"},
                "date": 1700000001,
                "is_automatic_forward": true,
                "text": "Launch day"
            }"#,
        );

        let raw = to_raw_message(&msg);
        assert_eq!(raw.peer.kind, PeerKind::Group);
        assert_eq!(raw.peer.id, -100202);
        assert_eq!(raw.message_id, 31);
        assert_eq!(raw.auto_forwarded_from, Some(-100101));
    }

    #[test]
    fn test_group_reply_with_document() {
        let msg = parse(
            r#"{
                "message_id": 40,
                "from": {"id": 9, "is_bot": false, "first_name": "Bo"},
                "chat": {"id": -100202, "title": "News chat", "type": "supergroup"},
                "date": 1700000100,
                "reply_to_message": {
                    "message_id": 1000,
                    "from": {"id": 4242, "is_bot": true, "first_name": "Commenter"},
                    "chat": {"id": -100202, "title": "News chat", "type": "supergroup"},
                    "date": 1700000050,
                    "text": "Nice release"
                },
                "document": {"file_id": "d", "file_unique_id": "d1", "file_name": "notes.pdf"}
            }"#,
        );

        let raw = to_raw_message(&msg);
        assert_eq!(raw.peer.kind, PeerKind::Group);
        assert_eq!(raw.reply_to, Some(1000));
        assert_eq!(raw.text, "");
        assert_eq!(
            raw.media.map(|m| m.to_string()).as_deref(),
            Some("Document: notes.pdf")
        );
    }

    #[test]
    fn test_poll_descriptor() {
        let msg = parse(
            r#"{
                "message_id": 6,
                "chat": {"id": -100101, "title": "News", "type": "channel"},
                "date": 1700000000,
                "poll": {
                    "id": "1",
                    "question": "Tea or coffee?",
                    "options": [
                        {"text": "Tea", "voter_count": 0},
                        {"text": "Coffee", "voter_count": 0}
                    ],
                    "total_voter_count": 0,
                    "is_closed": false,
                    "is_anonymous": true,
                    "type": "regular",
                    "allows_multiple_answers": false
                }
            }"#,
        );

        assert_eq!(
            describe_media(&msg),
            Some(MediaDescriptor::Poll {
                question: "Tea or coffee?".into()
            })
        );
    }

    #[test]
    fn test_url_entity_after_non_ascii_text() {
        // "Привет 👋 " is 10 UTF-16 code units, the emoji taking two
        let msg = parse(
            r#"{
                "message_id": 7,
                "chat": {"id": -100101, "title": "News", "type": "channel"},
                "date": 1700000000,
                "text": "Привет 👋 https://example.com/post more",
                "entities": [{"type": "url", "offset": 10, "length": 24}]
            }"#,
        );

        let media = describe_media(&msg);
        assert_eq!(
            media,
            Some(MediaDescriptor::WebPage {
                title: None,
                url: Some("https://example.com/post".into())
            })
        );
        assert_eq!(
            media.map(|m| m.to_string()).as_deref(),
            Some("Webpage: https://example.com/post")
        );
    }

    #[test]
    fn test_out_of_range_entity_is_ignored() {
        let msg = parse(
            r#"{
                "message_id": 8,
                "chat": {"id": -100101, "title": "News", "type": "channel"},
                "date": 1700000000,
                "text": "short",
                "entities": [{"type": "url", "offset": 3, "length": 40}]
            }"#,
        );

        assert_eq!(describe_media(&msg), None);
    }
}
