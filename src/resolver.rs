use std::collections::HashMap;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::platform::{ChannelRef, ProtocolClient};

/// Monitored source chat → chat the replies are posted in.
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMapping {
    targets: HashMap<i64, i64>,
}

impl ChannelMapping {
    pub fn posting_target(&self, source: i64) -> Option<i64> {
        self.targets.get(&source).copied()
    }

    pub fn is_source(&self, id: i64) -> bool {
        self.targets.contains_key(&id)
    }

    /// Whether replies are posted into `id` for some monitored source.
    pub fn is_posting_target(&self, id: i64) -> bool {
        self.targets.values().any(|target| *target == id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

impl FromIterator<(i64, i64)> for ChannelMapping {
    fn from_iter<I: IntoIterator<Item = (i64, i64)>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Resolve every configured reference to its posting target.
///
/// References that fail to resolve, or have nowhere to post comments, are
/// logged and skipped. Only an empty result is an error.
pub async fn resolve_channels(
    client: &dyn ProtocolClient,
    references: &[ChannelRef],
) -> Result<ChannelMapping> {
    info!("Resolving {} channel(s)", references.len());

    let mut targets = HashMap::new();
    for reference in references {
        match resolve_one(client, reference).await {
            Ok(Some((source, target))) => {
                targets.insert(source, target);
            }
            Ok(None) => {}
            Err(e) => error!("{}. Skipping.", e),
        }
    }

    if targets.is_empty() {
        return Err(BotError::NoMonitoredTargets {
            configured: references.len(),
        }
        .into());
    }

    info!("Monitoring {} channel(s) with discussion targets", targets.len());
    Ok(ChannelMapping { targets })
}

async fn resolve_one(
    client: &dyn ProtocolClient,
    reference: &ChannelRef,
) -> Result<Option<(i64, i64)>, BotError> {
    let resolution_error = |e: anyhow::Error| BotError::Resolution {
        reference: reference.to_string(),
        reason: format!("{:#}", e),
    };

    let entity = client
        .resolve_entity(reference)
        .await
        .map_err(resolution_error)?;
    let linked = client
        .linked_discussion_group(&entity)
        .await
        .map_err(resolution_error)?;

    if let Some(group_id) = linked {
        info!(
            "Resolved channel '{}' ({}). Comments go to linked group {}",
            entity.title, entity.id, group_id
        );
        Ok(Some((entity.id, group_id)))
    } else if entity.hosts_comments() {
        info!(
            "Resolved group '{}' ({}). Comments are posted directly",
            entity.title, entity.id
        );
        Ok(Some((entity.id, entity.id)))
    } else {
        warn!(
            "Channel '{}' ({}) has no comment section. Skipping.",
            entity.title, entity.id
        );
        Ok(None)
    }
}
