use crate::ledger::ReplyLedger;
use crate::platform::{MediaDescriptor, PeerKind, RawEvent, RawMessage};
use crate::resolver::ChannelMapping;

/// The parts of a message a dispatch cycle needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableMessage {
    /// Chat the message arrived in
    pub origin: i64,
    pub message_id: i32,
    pub sender_id: Option<i64>,
    pub text: String,
    pub reply_to: Option<i32>,
    pub media: Option<MediaDescriptor>,
}

impl From<RawMessage> for ActionableMessage {
    fn from(msg: RawMessage) -> Self {
        Self {
            origin: msg.peer.id,
            message_id: msg.message_id,
            sender_id: msg.sender_id,
            text: msg.text,
            reply_to: msg.reply_to,
            media: msg.media,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnclassifiedReason {
    NoPayload,
    UnmonitoredOrigin { origin: i64 },
    ReplyToOther { origin: i64, reply_to: i32 },
    /// A channel post that is commented on through its copy in `target`
    AwaitingDiscussionCopy { origin: i64, target: i64 },
    /// A non-reply message inside a discussion group we only post into
    DiscussionChatter { origin: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A fresh post from a monitored `source`. `message` lives in `target`,
    /// either the post itself or its discussion-group copy.
    ChannelPost {
        message: ActionableMessage,
        source: i64,
        target: i64,
    },
    /// Someone replied to one of the bot's own messages
    DiscussionReply(ActionableMessage),
    DirectMessage(ActionableMessage),
    Unclassified(UnclassifiedReason),
}

/// Decide what an inbound event is. Rule order matters: reply detection
/// wins over channel-post handling.
pub async fn classify(
    event: RawEvent,
    mapping: &ChannelMapping,
    ledger: &ReplyLedger,
) -> InboundEvent {
    let Some(msg) = event.message else {
        return InboundEvent::Unclassified(UnclassifiedReason::NoPayload);
    };

    if msg.peer.kind == PeerKind::User {
        return InboundEvent::DirectMessage(msg.into());
    }

    let origin = msg.peer.id;
    if !mapping.is_source(origin) && !mapping.is_posting_target(origin) {
        return InboundEvent::Unclassified(UnclassifiedReason::UnmonitoredOrigin { origin });
    }

    if let Some(reply_to) = msg.reply_to {
        if ledger.contains(origin, reply_to).await {
            return InboundEvent::DiscussionReply(msg.into());
        }
        return InboundEvent::Unclassified(UnclassifiedReason::ReplyToOther { origin, reply_to });
    }

    // Message ids are per chat, so a linked group can only be replied to
    // through the copy the platform forwards there
    if let Some(source) = msg.auto_forwarded_from {
        if mapping.posting_target(source) == Some(origin) {
            return InboundEvent::ChannelPost {
                message: msg.into(),
                source,
                target: origin,
            };
        }
    }

    match mapping.posting_target(origin) {
        Some(target) if target == origin => InboundEvent::ChannelPost {
            message: msg.into(),
            source: origin,
            target,
        },
        Some(target) => {
            InboundEvent::Unclassified(UnclassifiedReason::AwaitingDiscussionCopy { origin, target })
        }
        None => InboundEvent::Unclassified(UnclassifiedReason::DiscussionChatter { origin }),
    }
}
