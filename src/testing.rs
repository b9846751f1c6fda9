//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::generation::{CommentGenerator, GenerationRequest};
use crate::platform::{ChannelRef, EntityKind, ProtocolClient, ResolvedEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: i32,
    pub target: i64,
    pub text: String,
    pub reply_to: Option<i32>,
}

/// Protocol client backed by maps. Sent message ids start at 1000.
pub struct FakeProtocol {
    entities: HashMap<String, ResolvedEntity>,
    linked: HashMap<i64, i64>,
    broken_metadata: HashSet<i64>,
    fail_sends: AtomicBool,
    next_id: AtomicI32,
    sent: Mutex<Vec<SentMessage>>,
}

impl FakeProtocol {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            linked: HashMap::new(),
            broken_metadata: HashSet::new(),
            fail_sends: AtomicBool::new(false),
            next_id: AtomicI32::new(1000),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entity(mut self, reference: &str, id: i64, kind: EntityKind) -> Self {
        self.entities.insert(
            reference.to_string(),
            ResolvedEntity {
                id,
                title: format!("Chat {}", id),
                kind,
            },
        );
        self
    }

    pub fn with_linked_group(mut self, channel_id: i64, group_id: i64) -> Self {
        self.linked.insert(channel_id, group_id);
        self
    }

    pub fn with_broken_metadata(mut self, entity_id: i64) -> Self {
        self.broken_metadata.insert(entity_id);
        self
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolClient for FakeProtocol {
    async fn resolve_entity(&self, reference: &ChannelRef) -> Result<ResolvedEntity> {
        self.entities
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("chat not found"))
    }

    async fn linked_discussion_group(&self, entity: &ResolvedEntity) -> Result<Option<i64>> {
        if self.broken_metadata.contains(&entity.id) {
            anyhow::bail!("metadata unavailable");
        }
        Ok(self.linked.get(&entity.id).copied())
    }

    async fn send_message(&self, target: i64, text: &str, reply_to: Option<i32>) -> Result<i32> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("CHAT_WRITE_FORBIDDEN");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(SentMessage {
            id,
            target,
            text: text.to_string(),
            reply_to,
        });
        Ok(id)
    }
}

/// Generator returning a fixed reply, or failing when built with `failing()`.
pub struct FakeGenerator {
    reply: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommentGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => anyhow::bail!("upstream timed out"),
        }
    }
}
