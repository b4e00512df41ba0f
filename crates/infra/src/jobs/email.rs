//! Email dispatch: one notification, one message, one send attempt.
//!
//! Admission is checked against the tenant's `email.send` window before the
//! job leaves QUEUED. A denied job is rescheduled for the window reset rather
//! than holding a worker slot. The job is bound to the mail account it was
//! created against; if the tenant reconnected a different mailbox since, the
//! job fails instead of sending from an address the user did not pick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use leadflow_core::{CampaignId, DomainError, EmailJobId, Entity, LeadId, TenantId};
use leadflow_mailing::{EmailJobStatus, EmailSendJob, MailChannelAccount, OutboundMessage};
use leadflow_queue::{JobNotification, JobQueue, QueueError};

use super::ActionOutcome;
use crate::clock::Clock;
use crate::external::{MailChannel, MailChannelError};
use crate::rate_limit::{EMAIL_SEND, RateKey, RateLimiter};
use crate::store::{EmailJobStore, MailAccountStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailDispatchConfig {
    /// Rate limiter operation sends are counted against.
    pub rate_limit_operation: String,
    /// Refresh the access token when it expires within this window.
    pub refresh_skew: Duration,
    /// Budget for one channel send.
    pub send_timeout: Duration,
    /// Reschedule delay when the limiter itself is unavailable.
    pub limiter_backoff: Duration,
}

impl Default for EmailDispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_operation: EMAIL_SEND.to_string(),
            refresh_skew: Duration::from_secs(5 * 60),
            send_timeout: Duration::from_secs(30),
            limiter_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("tenant {0} has no active mail account")]
    NoActiveAccount(TenantId),
    #[error("email job not found: {0}")]
    JobNotFound(EmailJobId),
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(EmailSendJob),
    Failed(EmailSendJob),
    /// Rescheduled; a delayed notification will arrive no earlier than `until`.
    Deferred { until: DateTime<Utc> },
    /// Missing row or not dispatchable; nothing changed.
    Ignored { status: Option<EmailJobStatus> },
}

pub struct EmailDispatchWorker {
    jobs: Arc<dyn EmailJobStore>,
    accounts: Arc<dyn MailAccountStore>,
    channel: Arc<dyn MailChannel>,
    limiter: Arc<dyn RateLimiter>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: EmailDispatchConfig,
}

impl EmailDispatchWorker {
    pub fn new(
        jobs: Arc<dyn EmailJobStore>,
        accounts: Arc<dyn MailAccountStore>,
        channel: Arc<dyn MailChannel>,
        limiter: Arc<dyn RateLimiter>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: EmailDispatchConfig,
    ) -> Self {
        Self {
            jobs,
            accounts,
            channel,
            limiter,
            queue,
            clock,
            config,
        }
    }

    /// Create an email job against the tenant's active account and queue it.
    pub fn submit(
        &self,
        tenant_id: TenantId,
        message: OutboundMessage,
        origin: Option<(CampaignId, Option<LeadId>)>,
    ) -> Result<EmailSendJob, DispatchError> {
        let account = self
            .accounts
            .active_for_tenant(tenant_id)?
            .ok_or(DispatchError::NoActiveAccount(tenant_id))?;

        let now = self.clock.now();
        let mut job = EmailSendJob::new(tenant_id, *account.id(), message, now)?;
        if let Some((campaign_id, lead_id)) = origin {
            job = job.for_campaign(campaign_id, lead_id);
        }
        let job_id = *job.id();
        self.jobs.insert(job.clone())?;
        self.queue.enqueue(JobNotification::email(job_id))?;

        match self.jobs.transition(job_id, &mut |j| j.mark_queued(now)) {
            Ok(queued) => job = queued,
            // A worker already picked it up.
            Err(StoreError::Rejected(_)) => {}
            Err(err) => return Err(err.into()),
        }
        debug!(job_id = %job_id, tenant_id = %tenant_id, "email job queued");
        Ok(job)
    }

    /// Handle one delivery of an email job notification.
    pub async fn on_notification(&self, job_id: EmailJobId) -> Result<DispatchOutcome, DispatchError> {
        let Some(job) = self.jobs.get(job_id)? else {
            debug!(job_id = %job_id, "notification for unknown email job");
            return Ok(DispatchOutcome::Ignored { status: None });
        };
        if !job.status().is_dispatchable() {
            debug!(job_id = %job_id, status = %job.status(), "email job not dispatchable; ignoring");
            return Ok(DispatchOutcome::Ignored {
                status: Some(job.status()),
            });
        }

        let tenant_id = job.tenant_id();
        let account = match self.accounts.active_for_tenant(tenant_id)? {
            Some(account) if *account.id() == job.account_id() => account,
            _ => {
                warn!(job_id = %job_id, tenant_id = %tenant_id, "mail account changed since the job was created");
                return self.fail(job_id, "mail account changed; reconnect required".to_string());
            }
        };

        let key = RateKey::new(self.config.rate_limit_operation.clone(), tenant_id);
        let now = self.clock.now();
        match self.limiter.check_and_consume(&key, 1).await {
            Ok(admission) if admission.allowed => {}
            Ok(admission) => {
                let delay = admission.retry_after(now);
                self.queue.enqueue_after(JobNotification::email(job_id), delay)?;
                debug!(job_id = %job_id, key = %key, ?delay, "send rate limited; rescheduled");
                return Ok(DispatchOutcome::Deferred {
                    until: admission.reset_at,
                });
            }
            Err(err) => {
                let delay = self.config.limiter_backoff;
                warn!(job_id = %job_id, error = %err, ?delay, "rate limiter unavailable; rescheduled");
                self.queue.enqueue_after(JobNotification::email(job_id), delay)?;
                let until = now + chrono::Duration::from_std(delay).unwrap_or_default();
                return Ok(DispatchOutcome::Deferred { until });
            }
        }

        match self.jobs.transition(job_id, &mut |j| j.begin_sending(now)) {
            Ok(_) => {}
            Err(StoreError::Rejected(err)) => {
                debug!(job_id = %job_id, error = %err, "email job moved before sending");
                let status = self.jobs.get(job_id)?.map(|j| j.status());
                return Ok(DispatchOutcome::Ignored { status });
            }
            Err(err) => return Err(err.into()),
        }

        let account = match self.refresh_if_needed(account).await {
            Ok(account) => account,
            Err(err) => return self.fail(job_id, format!("reauth required: {err}")),
        };

        let sent = tokio::time::timeout(self.config.send_timeout, self.channel.send(&account, job.message())).await;
        match sent {
            Ok(Ok(message_id)) => {
                let now = self.clock.now();
                let job = self
                    .jobs
                    .transition(job_id, &mut |j| j.mark_sent(message_id.clone(), now))?;
                info!(job_id = %job_id, message_id = %message_id, "email sent");
                Ok(DispatchOutcome::Sent(job))
            }
            Ok(Err(err)) => {
                warn!(job_id = %job_id, error = %err, "email send failed");
                self.fail(job_id, err.to_string())
            }
            Err(_) => {
                warn!(job_id = %job_id, timeout = ?self.config.send_timeout, "email send timed out");
                self.fail(
                    job_id,
                    format!("send timed out after {:?}", self.config.send_timeout),
                )
            }
        }
    }

    async fn refresh_if_needed(&self, mut account: MailChannelAccount) -> Result<MailChannelAccount, MailChannelError> {
        let now = self.clock.now();
        let skew = chrono::Duration::from_std(self.config.refresh_skew).unwrap_or_default();
        if !account.needs_refresh(now, skew) {
            return Ok(account);
        }

        let grant = self.channel.refresh(&account).await?;
        account.apply_refresh(grant.access_token, grant.expires_at, grant.refresh_token, self.clock.now());
        if let Err(err) = self.accounts.save(&account) {
            // The new token is still valid for this send.
            warn!(account_id = %account.id(), error = %err, "could not persist refreshed token");
        }
        debug!(account_id = %account.id(), "mail access token refreshed");
        Ok(account)
    }

    fn fail(&self, job_id: EmailJobId, error: String) -> Result<DispatchOutcome, DispatchError> {
        let now = self.clock.now();
        match self.jobs.transition(job_id, &mut |j| j.mark_failed(error.clone(), now)) {
            Ok(job) => Ok(DispatchOutcome::Failed(job)),
            Err(StoreError::Rejected(_)) => {
                let status = self.jobs.get(job_id)?.map(|j| j.status());
                Ok(DispatchOutcome::Ignored { status })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel a job that has not started sending.
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        job_id: EmailJobId,
    ) -> Result<ActionOutcome<EmailSendJob, EmailJobStatus>, DispatchError> {
        self.require(tenant_id, job_id)?;
        let now = self.clock.now();
        match self.jobs.transition(job_id, &mut |j| j.cancel(now)) {
            Ok(job) => Ok(ActionOutcome::Applied(job)),
            Err(StoreError::Rejected(_)) => Ok(ActionOutcome::Rejected {
                status: self.require(tenant_id, job_id)?.status(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Put a FAILED job back in the queue.
    pub fn retry(
        &self,
        tenant_id: TenantId,
        job_id: EmailJobId,
    ) -> Result<ActionOutcome<EmailSendJob, EmailJobStatus>, DispatchError> {
        self.require(tenant_id, job_id)?;
        let now = self.clock.now();
        let job = match self.jobs.transition(job_id, &mut |j| j.reset_for_retry(now)) {
            Ok(job) => job,
            Err(StoreError::Rejected(_)) => {
                return Ok(ActionOutcome::Rejected {
                    status: self.require(tenant_id, job_id)?.status(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.queue.enqueue(JobNotification::email(job_id))?;
        let job = match self.jobs.transition(job_id, &mut |j| j.mark_queued(now)) {
            Ok(queued) => queued,
            Err(StoreError::Rejected(_)) => job,
            Err(err) => return Err(err.into()),
        };
        info!(job_id = %job_id, "email job re-queued");
        Ok(ActionOutcome::Applied(job))
    }

    pub fn get(&self, tenant_id: TenantId, job_id: EmailJobId) -> Result<EmailSendJob, DispatchError> {
        self.require(tenant_id, job_id)
    }

    /// Re-notify PENDING and QUEUED jobs; run at startup to recover lost notifications.
    pub fn requeue_pending(&self, limit: usize) -> Result<usize, DispatchError> {
        let mut count = 0;
        for status in [EmailJobStatus::Pending, EmailJobStatus::Queued] {
            for job in self.jobs.list_by_status(status, limit)? {
                self.queue.enqueue(JobNotification::email(*job.id()))?;
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "re-queued email jobs");
        }
        Ok(count)
    }

    fn require(&self, tenant_id: TenantId, job_id: EmailJobId) -> Result<EmailSendJob, DispatchError> {
        self.jobs
            .get_for_tenant(tenant_id, job_id)?
            .ok_or(DispatchError::JobNotFound(job_id))
    }
}
