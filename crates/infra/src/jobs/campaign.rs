use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use leadflow_campaigns::{
    AttemptOutcome, CampaignJob, CampaignJobStatus, IdempotencyKey, JobAttempt, JobPhase,
};
use leadflow_core::{CampaignId, CampaignJobId, Entity, TenantId};
use leadflow_queue::{JobNotification, JobQueue, QueueError};

use super::ActionOutcome;
use super::ledger::{AttemptLedger, AttemptRef};
use super::pipeline::{LeadFetchPipeline, PipelineRun, StopReason, ensure_current_attempt};
use crate::clock::Clock;
use crate::store::{CampaignJobStore, CampaignStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),
    #[error("campaign job not found: {0}")]
    JobNotFound(CampaignJobId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What a worker did with one campaign notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignRunOutcome {
    /// Missing row or not PENDING; nothing changed.
    Ignored { status: Option<CampaignJobStatus> },
    /// Not due yet; a delayed notification was scheduled.
    Deferred { until: DateTime<Utc> },
    Succeeded(CampaignJob),
    Failed(CampaignJob),
    Cancelled(CampaignJob),
}

/// Creates campaign jobs and runs them when notified.
pub struct CampaignJobOrchestrator {
    campaigns: Arc<dyn CampaignStore>,
    jobs: Arc<dyn CampaignJobStore>,
    ledger: AttemptLedger,
    pipeline: LeadFetchPipeline,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl CampaignJobOrchestrator {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        jobs: Arc<dyn CampaignJobStore>,
        ledger: AttemptLedger,
        pipeline: LeadFetchPipeline,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            jobs,
            ledger,
            pipeline,
            queue,
            clock,
        }
    }

    /// Create the campaign's job, or return the one that already exists.
    ///
    /// Safe to call any number of times: the idempotency key collapses every
    /// call onto one row. A notification goes out when the row is new, and
    /// again while it is still PENDING in case the first one was lost.
    pub fn submit(&self, tenant_id: TenantId, campaign_id: CampaignId) -> Result<CampaignJob, OrchestratorError> {
        if self.campaigns.get(tenant_id, campaign_id)?.is_none() {
            return Err(OrchestratorError::CampaignNotFound(campaign_id));
        }

        let key = IdempotencyKey::derive(campaign_id, JobPhase::Initial);
        let (job, created) = self
            .jobs
            .insert_if_absent(CampaignJob::new(tenant_id, campaign_id, key, self.clock.now()))?;
        if job.tenant_id() != tenant_id {
            return Err(StoreError::TenantIsolation.into());
        }

        if created || job.status().is_startable() {
            self.queue.enqueue(JobNotification::campaign(*job.id()))?;
        }
        if created {
            info!(job_id = %job.id(), campaign_id = %campaign_id, "campaign job created");
        } else {
            debug!(job_id = %job.id(), status = %job.status(), "campaign job already exists");
        }
        Ok(job)
    }

    /// Handle one delivery of a campaign job notification.
    pub async fn on_notification(&self, job_id: CampaignJobId) -> Result<CampaignRunOutcome, OrchestratorError> {
        let Some(job) = self.jobs.get(job_id)? else {
            debug!(job_id = %job_id, "notification for unknown campaign job");
            return Ok(CampaignRunOutcome::Ignored { status: None });
        };
        if !job.status().is_startable() {
            debug!(job_id = %job_id, status = %job.status(), "campaign job not startable; ignoring");
            return Ok(CampaignRunOutcome::Ignored {
                status: Some(job.status()),
            });
        }

        let now = self.clock.now();
        if !job.is_due(now) {
            let until = job.next_run_at();
            let delay = (until - now).to_std().unwrap_or(Duration::ZERO);
            self.queue.enqueue_after(JobNotification::campaign(job_id), delay)?;
            return Ok(CampaignRunOutcome::Deferred { until });
        }

        let mut number = 0;
        let started = self.jobs.transition(job_id, &mut |job| {
            number = job.start(now)?;
            Ok(())
        });
        let job = match started {
            Ok(job) => job,
            Err(StoreError::Rejected(err)) => {
                debug!(job_id = %job_id, error = %err, "lost the race to start campaign job");
                let status = self.jobs.get(job_id)?.map(|j| j.status());
                return Ok(CampaignRunOutcome::Ignored { status });
            }
            Err(err) => return Err(err.into()),
        };

        let attempt = AttemptRef {
            tenant_id: job.tenant_id(),
            job_id,
            number,
        };
        if let Err(err) = self.ledger.open(attempt) {
            self.fail_attempt(attempt, format!("could not open attempt: {err}"), 0, 0)?;
            return Err(err.into());
        }
        info!(job_id = %job_id, attempt = number, "campaign job started");

        let Some(campaign) = self.campaigns.get(job.tenant_id(), job.campaign_id())? else {
            let job = self.fail_attempt(attempt, "campaign not found".to_string(), 0, 0)?;
            return Ok(CampaignRunOutcome::Failed(job));
        };

        let run = self.pipeline.run(&campaign, attempt).await;
        self.finish(attempt, run)
    }

    fn finish(&self, attempt: AttemptRef, run: PipelineRun) -> Result<CampaignRunOutcome, OrchestratorError> {
        let processed = run.totals.fetched;
        let written = run.totals.written;

        match run.result {
            Ok(StopReason::Cancelled) => {
                self.ledger
                    .close(attempt, AttemptOutcome::Cancelled, None, processed, written)?;
                info!(job_id = %attempt.job_id, attempt = attempt.number, "campaign job stopped after cancellation");
                Ok(CampaignRunOutcome::Cancelled(self.load(attempt.job_id)?))
            }
            Ok(reason) => {
                let now = self.clock.now();
                let succeeded = self.jobs.transition(attempt.job_id, &mut |job| {
                    ensure_current_attempt(job, attempt.number)?;
                    job.succeed(now)
                });
                match succeeded {
                    Ok(job) => {
                        self.ledger
                            .close(attempt, AttemptOutcome::Succeeded, None, processed, written)?;
                        info!(
                            job_id = %attempt.job_id,
                            attempt = attempt.number,
                            stop = ?reason,
                            leads_written = job.leads_written(),
                            partial = job.is_partial_success(),
                            "campaign job succeeded"
                        );
                        Ok(CampaignRunOutcome::Succeeded(job))
                    }
                    Err(StoreError::Rejected(_)) => {
                        self.ledger
                            .close(attempt, AttemptOutcome::Cancelled, None, processed, written)?;
                        Ok(CampaignRunOutcome::Cancelled(self.load(attempt.job_id)?))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => {
                warn!(job_id = %attempt.job_id, attempt = attempt.number, error = %err, "campaign job failed");
                let job = self.fail_attempt(attempt, err.to_string(), processed, written)?;
                if job.status() == CampaignJobStatus::Failed {
                    Ok(CampaignRunOutcome::Failed(job))
                } else {
                    Ok(CampaignRunOutcome::Cancelled(job))
                }
            }
        }
    }

    /// Move the attempt's job to FAILED and close the attempt with `error`.
    ///
    /// If the job was cancelled or taken over meanwhile the row is left as is;
    /// the attempt still records the error.
    fn fail_attempt(
        &self,
        attempt: AttemptRef,
        error: String,
        processed: u64,
        written: u64,
    ) -> Result<CampaignJob, OrchestratorError> {
        let now = self.clock.now();
        let failed = self.jobs.transition(attempt.job_id, &mut |job| {
            ensure_current_attempt(job, attempt.number)?;
            job.fail(error.clone(), now)
        });
        let job = match failed {
            Ok(job) => job,
            Err(StoreError::Rejected(_)) => self.load(attempt.job_id)?,
            Err(err) => return Err(err.into()),
        };
        self.ledger
            .close(attempt, AttemptOutcome::Failed, Some(error), processed, written)?;
        Ok(job)
    }

    /// Retry a FAILED or CANCELLED job. Counters and history carry over.
    pub fn retry(
        &self,
        tenant_id: TenantId,
        job_id: CampaignJobId,
    ) -> Result<ActionOutcome<CampaignJob, CampaignJobStatus>, OrchestratorError> {
        self.require(tenant_id, job_id)?;
        let now = self.clock.now();
        match self.jobs.transition(job_id, &mut |job| job.rearm(now)) {
            Ok(job) => {
                self.queue.enqueue(JobNotification::campaign(job_id))?;
                info!(job_id = %job_id, "campaign job re-armed");
                Ok(ActionOutcome::Applied(job))
            }
            Err(StoreError::Rejected(_)) => Ok(ActionOutcome::Rejected {
                status: self.load(job_id)?.status(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel a PENDING or RUNNING job. A running pipeline stops at its next page boundary.
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        job_id: CampaignJobId,
    ) -> Result<ActionOutcome<CampaignJob, CampaignJobStatus>, OrchestratorError> {
        self.require(tenant_id, job_id)?;
        let now = self.clock.now();
        match self.jobs.transition(job_id, &mut |job| job.cancel(now)) {
            Ok(job) => {
                info!(job_id = %job_id, "campaign job cancelled");
                Ok(ActionOutcome::Applied(job))
            }
            Err(StoreError::Rejected(_)) => Ok(ActionOutcome::Rejected {
                status: self.load(job_id)?.status(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, job_id: CampaignJobId) -> Result<CampaignJob, OrchestratorError> {
        self.require(tenant_id, job_id)
    }

    /// Attempt history, oldest first.
    pub fn attempts(
        &self,
        tenant_id: TenantId,
        job_id: CampaignJobId,
    ) -> Result<Vec<JobAttempt>, OrchestratorError> {
        self.require(tenant_id, job_id)?;
        Ok(self.ledger.summaries(job_id)?)
    }

    /// Re-notify every PENDING job; run at startup to recover lost notifications.
    pub fn requeue_pending(&self, limit: usize) -> Result<usize, OrchestratorError> {
        let pending = self.jobs.list_by_status(CampaignJobStatus::Pending, limit)?;
        for job in &pending {
            self.queue.enqueue(JobNotification::campaign(*job.id()))?;
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "re-queued pending campaign jobs");
        }
        Ok(pending.len())
    }

    fn require(&self, tenant_id: TenantId, job_id: CampaignJobId) -> Result<CampaignJob, OrchestratorError> {
        self.jobs
            .get_for_tenant(tenant_id, job_id)?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    fn load(&self, job_id: CampaignJobId) -> Result<CampaignJob, OrchestratorError> {
        self.jobs.get(job_id)?.ok_or(OrchestratorError::JobNotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use leadflow_campaigns::{Campaign, LeadCriteria, ProspectRecord, RetryPolicy, SheetDestination};
    use leadflow_queue::{InMemoryJobQueue, Subscription};

    use super::*;
    use crate::clock::ManualClock;
    use crate::external::{InMemoryLeadProvider, InMemorySpreadsheetSink, ProviderError};
    use crate::jobs::PipelineConfig;
    use crate::store::{
        InMemoryAttemptStore, InMemoryCampaignJobStore, InMemoryCampaignStore, InMemoryLeadStore,
    };

    struct Harness {
        orchestrator: CampaignJobOrchestrator,
        subscription: Subscription,
        jobs: Arc<InMemoryCampaignJobStore>,
        tenant: TenantId,
        campaign_id: CampaignId,
    }

    fn harness(provider: InMemoryLeadProvider) -> Harness {
        let clock = ManualClock::arc(Utc::now());
        let tenant = TenantId::new();
        let campaign_id = CampaignId::new();
        let campaigns = Arc::new(InMemoryCampaignStore::new());
        campaigns
            .save(
                &Campaign::new(
                    campaign_id,
                    tenant,
                    "Berlin founders",
                    LeadCriteria::default(),
                    100,
                    5,
                    SheetDestination::new("sheet", "Leads"),
                    clock.now(),
                )
                .unwrap(),
            )
            .unwrap();

        let jobs = Arc::new(InMemoryCampaignJobStore::new());
        let ledger = AttemptLedger::new(Arc::new(InMemoryAttemptStore::new()), clock.clone());
        let pipeline = LeadFetchPipeline::new(
            Arc::new(provider),
            Arc::new(InMemorySpreadsheetSink::new()),
            Arc::new(InMemoryLeadStore::new()),
            jobs.clone(),
            ledger.clone(),
            clock.clone(),
            PipelineConfig {
                inter_batch_delay: Duration::ZERO,
                page_retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
        );
        let (queue, subscription) = InMemoryJobQueue::channel();
        let orchestrator =
            CampaignJobOrchestrator::new(campaigns, jobs.clone(), ledger, pipeline, Arc::new(queue), clock);

        Harness {
            orchestrator,
            subscription,
            jobs,
            tenant,
            campaign_id,
        }
    }

    fn leads(prefix: &str, n: usize) -> Vec<ProspectRecord> {
        (0..n)
            .map(|i| ProspectRecord::with_email(format!("{prefix}{i}@example.com")))
            .collect()
    }

    #[test]
    fn submit_is_idempotent() {
        let mut h = harness(InMemoryLeadProvider::new(vec![]));

        let first = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();
        let second = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(h.jobs.list_by_status(CampaignJobStatus::Pending, 10).unwrap().len(), 1);
        // Still PENDING, so the resubmit re-notifies.
        assert_eq!(h.subscription.drain().len(), 2);
    }

    #[test]
    fn submit_for_unknown_campaign_fails() {
        let h = harness(InMemoryLeadProvider::new(vec![]));
        let err = h.orchestrator.submit(h.tenant, CampaignId::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn run_succeeds_and_duplicate_delivery_is_ignored() {
        let h = harness(InMemoryLeadProvider::new(vec![leads("a", 5)]));
        let job = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();

        let outcome = h.orchestrator.on_notification(*job.id()).await.unwrap();
        let CampaignRunOutcome::Succeeded(done) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(done.leads_written(), 5);
        assert_eq!(done.attempt_count(), 1);

        let again = h.orchestrator.on_notification(*job.id()).await.unwrap();
        assert_eq!(
            again,
            CampaignRunOutcome::Ignored {
                status: Some(CampaignJobStatus::Succeeded)
            }
        );

        let attempts = h.orchestrator.attempts(h.tenant, *job.id()).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, Some(AttemptOutcome::Succeeded));
    }

    #[tokio::test]
    async fn failure_then_retry_resumes_from_cursor() {
        let provider = InMemoryLeadProvider::new(vec![leads("a", 5), leads("b", 5)])
            .fail_page(1, ProviderError::Unauthorized("revoked".into()));
        let mut h = harness(provider);
        let job = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();
        h.subscription.drain();

        let outcome = h.orchestrator.on_notification(*job.id()).await.unwrap();
        let CampaignRunOutcome::Failed(failed) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(failed.last_error().unwrap().contains("reauth required"));
        assert_eq!(failed.next_page(), 1);

        let retried = h.orchestrator.retry(h.tenant, *job.id()).unwrap();
        assert!(retried.is_applied());
        assert_eq!(h.subscription.drain().len(), 1);

        let outcome = h.orchestrator.on_notification(*job.id()).await.unwrap();
        let CampaignRunOutcome::Succeeded(done) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(done.attempt_count(), 2);
        assert_eq!(done.total_pages(), 2);
        assert_eq!(done.leads_written(), 10);
        assert_eq!(done.last_error(), None);

        let attempts = h.orchestrator.attempts(h.tenant, *job.id()).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, Some(AttemptOutcome::Failed));
        assert!(attempts[0].error.is_some());
    }

    #[test]
    fn retry_is_rejected_unless_failed_or_cancelled() {
        let h = harness(InMemoryLeadProvider::new(vec![]));
        let job = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();

        let outcome = h.orchestrator.retry(h.tenant, *job.id()).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Rejected {
                status: CampaignJobStatus::Pending
            }
        );
    }

    #[tokio::test]
    async fn cancelled_pending_job_is_not_started() {
        let h = harness(InMemoryLeadProvider::new(vec![leads("a", 5)]));
        let job = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();

        assert!(h.orchestrator.cancel(h.tenant, *job.id()).unwrap().is_applied());
        let outcome = h.orchestrator.on_notification(*job.id()).await.unwrap();
        assert_eq!(
            outcome,
            CampaignRunOutcome::Ignored {
                status: Some(CampaignJobStatus::Cancelled)
            }
        );
    }

    #[test]
    fn other_tenants_cannot_see_or_act_on_a_job() {
        let h = harness(InMemoryLeadProvider::new(vec![]));
        let job = h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();
        let stranger = TenantId::new();

        assert!(matches!(
            h.orchestrator.get(stranger, *job.id()),
            Err(OrchestratorError::Store(StoreError::TenantIsolation))
        ));
        assert!(h.orchestrator.cancel(stranger, *job.id()).is_err());
        assert_eq!(
            h.orchestrator.get(h.tenant, *job.id()).unwrap().status(),
            CampaignJobStatus::Pending
        );
    }

    #[test]
    fn requeue_pending_renotifies() {
        let mut h = harness(InMemoryLeadProvider::new(vec![]));
        h.orchestrator.submit(h.tenant, h.campaign_id).unwrap();
        h.subscription.drain();

        assert_eq!(h.orchestrator.requeue_pending(100).unwrap(), 1);
        assert_eq!(h.subscription.drain().len(), 1);
    }
}
