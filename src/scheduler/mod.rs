pub mod tasks;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

/// Boxed future produced by one run of a maintenance job
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cron-driven maintenance that runs beside the dispatch loop: the ledger
/// flush and the heartbeat.
///
/// A job never overlaps itself. A tick that fires while the previous run is
/// still going (a flush stuck on a slow disk, say) is skipped.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<String>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Register `task` under `name`. `cron_expr` is the six-field form
    /// with seconds, e.g. `0 */10 * * * *`.
    pub async fn add_cron_job<F>(&mut self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let running = Arc::new(AtomicBool::new(false));
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let name = job_name.clone();
            let running = Arc::clone(&running);
            let run = if running.swap(true, Ordering::AcqRel) {
                None
            } else {
                Some(task())
            };
            Box::pin(async move {
                match run {
                    Some(fut) => {
                        debug!("Running maintenance job: {}", name);
                        fut.await;
                        running.store(false, Ordering::Release);
                    }
                    None => warn!("Skipping '{}': previous run still in progress", name),
                }
            })
        })
        .with_context(|| format!("Invalid schedule '{}' for job {}", cron_expr, name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to register job: {}", name))?;

        info!("Maintenance job '{}' scheduled at '{}'", name, cron_expr);
        self.jobs.push(name.to_string());
        Ok(())
    }

    /// Names of the registered jobs, in registration order.
    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler running: {}", self.jobs.join(", "));
        Ok(())
    }

    /// Stop firing jobs. Called before the final ledger flush on shutdown.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shut down scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
