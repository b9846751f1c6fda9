//! Prompt construction and the text-generation seam.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::BotError;
use crate::platform::MediaDescriptor;

/// Posted when the generator fails, so a dispatch cycle never aborts.
pub const FALLBACK_REPLY: &str = "That's interesting! Thanks for sharing.";

const EMPTY_POST_PLACEHOLDER: &str = "[Post contains media without text]";

/// Quotation marks models like to wrap replies in
const QUOTE_CHARS: &[char] = &['"', '«', '»', '„', '“', '”'];

/// What the generated text is answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    ChannelPost,
    DiscussionReply,
    DirectMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// A text-generation backend: system instruction + user prompt in, text out.
#[async_trait]
pub trait CommentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Message text plus a summary of its attachments.
pub fn build_content(text: &str, media: &[MediaDescriptor]) -> String {
    let mut content = text.to_string();
    if !media.is_empty() {
        let described: Vec<String> = media.iter().map(|m| m.to_string()).collect();
        content.push_str("\n\nMedia in post: ");
        content.push_str(&described.join(", "));
    }
    if content.trim().is_empty() {
        return EMPTY_POST_PLACEHOLDER.to_string();
    }
    content
}

pub fn build_user_prompt(kind: PromptKind, content: &str) -> String {
    match kind {
        PromptKind::ChannelPost => format!(
            "Comment on this Telegram channel post VERY BRIEFLY (1-3 sentences): \"{}\"",
            content
        ),
        PromptKind::DiscussionReply => format!(
            "Reply to this comment on your message VERY BRIEFLY (1-2 sentences): \"{}\"",
            content
        ),
        PromptKind::DirectMessage => format!(
            "Reply to this private message VERY BRIEFLY (1-3 sentences): \"{}\"",
            content
        ),
    }
}

/// Strip quotation marks and surrounding whitespace. `None` if nothing is left.
pub fn clean_reply(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !QUOTE_CHARS.contains(c)).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Generate a reply, substituting [`FALLBACK_REPLY`] on any failure.
pub async fn generate_or_fallback(
    generator: &dyn CommentGenerator,
    request: &GenerationRequest,
) -> String {
    let result = match generator.generate(request).await {
        Ok(raw) => clean_reply(&raw)
            .ok_or_else(|| BotError::Generation("model returned an empty reply".to_string())),
        Err(e) => Err(BotError::Generation(format!("{:#}", e))),
    };

    match result {
        Ok(text) => {
            debug!("Generated reply: {}", text);
            text
        }
        Err(e) => {
            warn!("{}; using fallback reply", e);
            FALLBACK_REPLY.to_string()
        }
    }
}
