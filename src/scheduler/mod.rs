pub mod tasks;

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

/// Boxed future returned by a job on every tick
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs the relay's periodic jobs (stats summaries, config polling)
pub struct Scheduler {
    inner: JobScheduler,
    jobs: usize,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner, jobs: 0 })
    }

    /// Add a recurring job. `cron_expr` has a leading seconds field.
    pub async fn add_cron_job<F>(&mut self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                debug!("Running scheduled job: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Invalid cron expression for job '{}': {}", name, cron_expr))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        self.jobs += 1;

        info!("Scheduled job '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started with {} job(s)", self.jobs);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_cron() {
        let mut scheduler = Scheduler::new().await.unwrap();
        let result = scheduler
            .add_cron_job("every now and then", "bad", || Box::pin(async {}))
            .await;
        assert!(result.is_err());
        assert_eq!(scheduler.jobs, 0);
    }

    #[tokio::test]
    async fn test_accepts_seconds_field() {
        let mut scheduler = Scheduler::new().await.unwrap();
        scheduler
            .add_cron_job("*/5 * * * * *", "tick", || Box::pin(async {}))
            .await
            .unwrap();
        assert_eq!(scheduler.jobs, 1);
    }
}
