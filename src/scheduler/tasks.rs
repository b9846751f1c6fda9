use std::sync::Arc;

use tracing::{debug, info};

use crate::ledger::ReplyLedger;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Scheduler;

/// Register the ledger flush and an hourly heartbeat
pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    ledger: Arc<ReplyLedger>,
    limiter: Arc<RateLimiter>,
    flush_cron: &str,
) -> anyhow::Result<()> {
    let flush_ledger = Arc::clone(&ledger);
    scheduler
        .add_cron_job(flush_cron, "ledger-flush", move || {
            let ledger = Arc::clone(&flush_ledger);
            Box::pin(async move {
                flush_if_dirty(&ledger).await;
            })
        })
        .await?;

    scheduler
        .add_cron_job("0 0 * * * *", "heartbeat", move || {
            let ledger = Arc::clone(&ledger);
            let limiter = Arc::clone(&limiter);
            Box::pin(async move {
                info!(
                    "Heartbeat: bot is alive ({}, {} tracked replies)",
                    limiter.usage().await,
                    ledger.len().await
                );
            })
        })
        .await?;

    Ok(())
}

/// Returns whether a flush was attempted.
pub async fn flush_if_dirty(ledger: &ReplyLedger) -> bool {
    if !ledger.is_dirty().await {
        debug!("Ledger unchanged since last flush");
        return false;
    }
    info!("Auto-saving message history...");
    ledger.flush_logged().await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_if_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = ReplyLedger::new(&path);

        assert!(!flush_if_dirty(&ledger).await);
        assert!(!path.exists());

        ledger.record(202, 10).await;
        assert!(flush_if_dirty(&ledger).await);
        assert!(ReplyLedger::load(&path).await.contains(202, 10).await);
        assert!(!flush_if_dirty(&ledger).await);
    }

    #[tokio::test]
    async fn test_invalid_flush_schedule_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new().await.unwrap();
        let ledger = Arc::new(ReplyLedger::new(dir.path().join("ledger.json")));
        let limiter = Arc::new(RateLimiter::new(1, 1));

        let result = register_builtin_tasks(&mut scheduler, ledger, limiter, "every tuesday").await;
        assert!(result.is_err());
        assert!(scheduler.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_registers_flush_and_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new().await.unwrap();
        let ledger = Arc::new(ReplyLedger::new(dir.path().join("ledger.json")));
        let limiter = Arc::new(RateLimiter::new(1, 1));

        register_builtin_tasks(&mut scheduler, ledger, limiter, "0 */10 * * * *")
            .await
            .unwrap();
        assert_eq!(scheduler.jobs(), ["ledger-flush", "heartbeat"]);
    }
}
