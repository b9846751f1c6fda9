use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::BotError;

/// One bot message. Message ids are only unique within their chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct LedgerEntry {
    chat_id: i64,
    message_id: i32,
}

/// On-disk layout of the ledger file
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    messages: Vec<LedgerEntry>,
    /// Ids written before entries carried their chat
    #[serde(
        default,
        alias = "message_ids",
        skip_serializing_if = "Vec::is_empty"
    )]
    unscoped_message_ids: Vec<i32>,
}

/// Older files are a bare JSON array of ids
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredLedger {
    Legacy(Vec<i32>),
    Current(LedgerFile),
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeSet<LedgerEntry>,
    /// Chat unknown, so these match a reply in any chat
    unscoped: BTreeSet<i32>,
    dirty: bool,
}

/// Durable set of messages the bot has posted, used to recognise
/// replies addressed to the bot.
#[derive(Debug)]
pub struct ReplyLedger {
    path: PathBuf,
    state: RwLock<LedgerState>,
}

impl ReplyLedger {
    /// An empty ledger that will be flushed to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Load the ledger from `path`. A missing or unreadable file yields an
    /// empty ledger so reply detection degrades instead of the bot stopping.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let ledger = Self::new(path);
        match read_file(&ledger.path).await {
            Ok(Some(file)) => {
                info!(
                    "Loaded {} bot messages from {} ({} without a chat id)",
                    file.messages.len() + file.unscoped_message_ids.len(),
                    ledger.path.display(),
                    file.unscoped_message_ids.len()
                );
                let mut state = ledger.state.write().await;
                state.entries = file.messages.into_iter().collect();
                state.unscoped = file.unscoped_message_ids.into_iter().collect();
            }
            Ok(None) => {
                info!(
                    "Ledger file {} not found, starting with empty history",
                    ledger.path.display()
                );
            }
            Err(e) => {
                let err = BotError::Persistence {
                    path: ledger.path.display().to_string(),
                    reason: format!("{:#}", e),
                };
                error!("{}; starting with empty history", err);
            }
        }
        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, chat_id: i64, message_id: i32) {
        let mut state = self.state.write().await;
        if state.entries.insert(LedgerEntry {
            chat_id,
            message_id,
        }) {
            state.dirty = true;
        }
    }

    /// Whether `message_id` in `chat_id` is one of the bot's messages.
    pub async fn contains(&self, chat_id: i64, message_id: i32) -> bool {
        let state = self.state.read().await;
        state.entries.contains(&LedgerEntry {
            chat_id,
            message_id,
        }) || state.unscoped.contains(&message_id)
    }

    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.entries.len() + state.unscoped.len()
    }

    /// Whether there are entries recorded since the last flush.
    pub async fn is_dirty(&self) -> bool {
        self.state.read().await.dirty
    }

    /// Write the full set to disk via a temp file and rename.
    pub async fn flush(&self) -> Result<()> {
        // Hold the write lock so a record() during the write isn't marked clean
        let mut state = self.state.write().await;
        let file = LedgerFile {
            saved_at: Some(Utc::now()),
            messages: state.entries.iter().copied().collect(),
            unscoped_message_ids: state.unscoped.iter().copied().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).context("Failed to serialize ledger")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace ledger: {}", self.path.display()))?;

        state.dirty = false;
        info!(
            "Saved {} bot messages to {}",
            file.messages.len() + file.unscoped_message_ids.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Flush, logging instead of returning the error.
    pub async fn flush_logged(&self) {
        if let Err(e) = self.flush().await {
            let err = BotError::Persistence {
                path: self.path.display().to_string(),
                reason: format!("{:#}", e),
            };
            error!("{}", err);
        }
    }
}

async fn read_file(path: &Path) -> Result<Option<LedgerFile>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read ledger: {}", path.display()))
        }
    };

    let stored: StoredLedger =
        serde_json::from_str(&content).context("Failed to parse ledger file")?;
    Ok(Some(match stored {
        StoredLedger::Current(file) => file,
        StoredLedger::Legacy(ids) => LedgerFile {
            unscoped_message_ids: ids,
            ..LedgerFile::default()
        },
    }))
}
