pub mod telegram;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

/// Kind of chat a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Private chat with a user
    User,
    /// Group or supergroup
    Group,
    /// Broadcast channel
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub id: i64,
    pub kind: PeerKind,
}

/// Human-readable summary of a non-text attachment, fed to the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaDescriptor {
    Photo,
    Video { file_name: Option<String> },
    Document { file_name: Option<String> },
    Poll { question: String },
    WebPage { title: Option<String>, url: Option<String> },
    Other(String),
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDescriptor::Photo => write!(f, "Photo"),
            MediaDescriptor::Video { file_name } => {
                write!(f, "Video: {}", file_name.as_deref().unwrap_or("video"))
            }
            MediaDescriptor::Document { file_name } => {
                write!(f, "Document: {}", file_name.as_deref().unwrap_or("document"))
            }
            MediaDescriptor::Poll { question } => write!(f, "Poll: \"{}\"", question),
            MediaDescriptor::WebPage { title: Some(title), .. } => {
                write!(f, "Webpage: \"{}\"", title)
            }
            MediaDescriptor::WebPage {
                title: None,
                url: Some(url),
            } => write!(f, "Webpage: {}", url),
            MediaDescriptor::WebPage {
                title: None,
                url: None,
            } => write!(f, "Webpage"),
            MediaDescriptor::Other(kind) => write!(f, "Media of type: {}", kind),
        }
    }
}

/// A message as delivered by the protocol session, before classification
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub peer: Peer,
    pub message_id: i32,
    /// Author of the message, when the platform exposes one
    pub sender_id: Option<i64>,
    pub text: String,
    pub reply_to: Option<i32>,
    pub media: Option<MediaDescriptor>,
    /// Source channel, when this is the copy of a channel post that the
    /// platform forwards into the linked discussion group
    pub auto_forwarded_from: Option<i64>,
}

/// One inbound protocol event. Service updates carry no message.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub message: Option<RawMessage>,
    pub received_at: Instant,
}

impl RawEvent {
    pub fn message(message: RawMessage) -> Self {
        Self {
            message: Some(message),
            received_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self {
            message: None,
            received_at: Instant::now(),
        }
    }
}

/// A configured channel reference, by username or numeric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Username(String),
    Id(i64),
}

impl ChannelRef {
    /// Parse an operator-supplied reference. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(id) = trimmed.parse::<i64>() {
            return Some(ChannelRef::Id(id));
        }
        let name = trimmed.trim_start_matches('@');
        if name.is_empty() {
            return None;
        }
        Some(ChannelRef::Username(format!("@{}", name)))
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Username(name) => write!(f, "{}", name),
            ChannelRef::Id(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Channel,
    Supergroup,
    Group,
    User,
}

/// Canonical entity a channel reference resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub id: i64,
    pub title: String,
    pub kind: EntityKind,
}

impl ResolvedEntity {
    /// Whether replies can be posted directly into this entity.
    pub fn hosts_comments(&self) -> bool {
        self.kind == EntityKind::Supergroup
    }
}

/// The messaging-protocol session, seen from the dispatch engine.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn resolve_entity(&self, reference: &ChannelRef) -> Result<ResolvedEntity>;

    /// Id of the discussion group linked to `entity`, if any.
    async fn linked_discussion_group(&self, entity: &ResolvedEntity) -> Result<Option<i64>>;

    /// Post `text` to `target`, optionally as a reply. Returns the new message id.
    async fn send_message(&self, target: i64, text: &str, reply_to: Option<i32>) -> Result<i32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_descriptor_display() {
        assert_eq!(MediaDescriptor::Photo.to_string(), "Photo");
        assert_eq!(
            MediaDescriptor::Video {
                file_name: Some("clip.mp4".into())
            }
            .to_string(),
            "Video: clip.mp4"
        );
        assert_eq!(
            MediaDescriptor::Document { file_name: None }.to_string(),
            "Document: document"
        );
        assert_eq!(
            MediaDescriptor::Poll {
                question: "Tea or coffee?".into()
            }
            .to_string(),
            "Poll: \"Tea or coffee?\""
        );
        assert_eq!(
            MediaDescriptor::WebPage {
                title: None,
                url: Some("https://example.com".into())
            }
            .to_string(),
            "Webpage: https://example.com"
        );
        assert_eq!(
            MediaDescriptor::Other("Sticker".into()).to_string(),
            "Media of type: Sticker"
        );
    }

    #[test]
    fn test_channel_ref_parse() {
        assert_eq!(ChannelRef::parse("  "), None);
        assert_eq!(ChannelRef::parse("@"), None);
        assert_eq!(
            ChannelRef::parse(" rustnews "),
            Some(ChannelRef::Username("@rustnews".into()))
        );
        assert_eq!(
            ChannelRef::parse("@rustnews"),
            Some(ChannelRef::Username("@rustnews".into()))
        );
        assert_eq!(
            ChannelRef::parse("-1001234567890"),
            Some(ChannelRef::Id(-1001234567890))
        );
    }
}
