use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use leadflow_queue::{JobNotification, JobType, QueueError, Subscription};

use super::campaign::CampaignJobOrchestrator;
use super::email::EmailDispatchWorker;

/// Concurrency limits per job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Campaign jobs running at once.
    pub campaign_concurrency: usize,
    /// Email sends in flight at once.
    pub email_concurrency: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            campaign_concurrency: 2,
            email_concurrency: 4,
        }
    }
}

/// Counters since the pool started.
#[derive(Debug, Default)]
pub struct PoolStats {
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl PoolStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Handler calls that returned `Ok`, whatever the job outcome.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Control handle for a running [`WorkerPool`].
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<PoolStats>,
}

impl WorkerPoolHandle {
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Stop taking notifications and wait for in-flight handlers to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "worker pool task panicked");
        }
    }
}

/// Competing-consumer loop over one queue subscription.
///
/// Each notification is handled on its own task. Campaign and email jobs draw
/// from separate permit pools, so long campaign runs never starve sends.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(
        subscription: Subscription,
        campaigns: Arc<CampaignJobOrchestrator>,
        emails: Arc<EmailDispatchWorker>,
        config: WorkerPoolConfig,
    ) -> Result<WorkerPoolHandle, QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PoolStats::default());

        let join = handle.spawn(pool_loop(
            subscription,
            Dispatch {
                campaigns,
                emails,
                campaign_permits: Arc::new(Semaphore::new(config.campaign_concurrency.max(1))),
                email_permits: Arc::new(Semaphore::new(config.email_concurrency.max(1))),
                stats: stats.clone(),
            },
            shutdown_rx,
        ));
        info!(
            campaign_concurrency = config.campaign_concurrency,
            email_concurrency = config.email_concurrency,
            "worker pool started"
        );

        Ok(WorkerPoolHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        })
    }
}

#[derive(Clone)]
struct Dispatch {
    campaigns: Arc<CampaignJobOrchestrator>,
    emails: Arc<EmailDispatchWorker>,
    campaign_permits: Arc<Semaphore>,
    email_permits: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

async fn pool_loop(mut subscription: Subscription, dispatch: Dispatch, mut shutdown: watch::Receiver<bool>) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = subscription.recv() => match next {
                Some(notification) => {
                    dispatch.stats.received.fetch_add(1, Ordering::Relaxed);
                    tasks.spawn(dispatch.clone().handle(notification));
                }
                None => {
                    debug!("queue closed; worker pool stopping");
                    break;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!(error = %err, "job handler task panicked");
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "job handler task panicked");
        }
    }
    info!("worker pool stopped");
}

impl Dispatch {
    async fn handle(self, notification: JobNotification) {
        let semaphore = match notification.job_type {
            JobType::Campaign => &self.campaign_permits,
            JobType::Email => &self.email_permits,
        };
        let Ok(_permit) = semaphore.clone().acquire_owned().await else {
            return;
        };

        let result = match notification.job_type {
            JobType::Campaign => match notification.campaign_job_id() {
                Some(id) => self
                    .campaigns
                    .on_notification(id)
                    .await
                    .map(|outcome| debug!(job_id = %id, ?outcome, "campaign notification handled"))
                    .map_err(|e| e.to_string()),
                None => Ok(()),
            },
            JobType::Email => match notification.email_job_id() {
                Some(id) => self
                    .emails
                    .on_notification(id)
                    .await
                    .map(|outcome| debug!(job_id = %id, ?outcome, "email notification handled"))
                    .map_err(|e| e.to_string()),
                None => Ok(()),
            },
        };

        match result {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_type = %notification.job_type,
                    job_id = %notification.job_id,
                    error = %err,
                    "job handler failed"
                );
            }
        }
    }
}
