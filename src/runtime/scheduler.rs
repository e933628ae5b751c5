/// Background job acquisition service
///
/// Drives the job executor from a tokio-cron-scheduler repeated job: every acquire
/// interval due jobs are locked and executed.

use crate::runtime::executor::JobExecutor;
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct JobAcquisitionService {
    scheduler: Arc<RwLock<JobScheduler>>,
    executor: Arc<JobExecutor>,
    acquisition_job: RwLock<Option<Uuid>>,
}

impl JobAcquisitionService {
    pub async fn new(executor: Arc<JobExecutor>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            executor,
            acquisition_job: RwLock::new(None),
        })
    }

    /// Register the acquisition loop and start the scheduler
    pub async fn start(&self) -> Result<()> {
        let interval = Duration::from_millis(self.executor.engine().config().jobs.acquire_interval_ms);
        tracing::info!("⏰ Starting job acquisition every {:?}", interval);

        let executor = Arc::clone(&self.executor);
        let job = Job::new_repeated_async(interval, move |_uuid, _l| {
            let executor = Arc::clone(&executor);

            Box::pin(async move {
                match executor.acquire_and_execute().await {
                    Ok(0) => {}
                    Ok(executed) => tracing::info!("🔔 Acquisition cycle executed {} jobs", executed),
                    Err(e) => tracing::error!("❌ Job acquisition failed: {}", e),
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };
        *self.acquisition_job.write().await = Some(job_uuid);

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Job acquisition service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping job acquisition service");

        if let Some(job_uuid) = self.acquisition_job.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove acquisition job: {}", e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Job acquisition service stopped");
        Ok(())
    }
}
