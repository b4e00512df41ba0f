//! Email send job row and its state machine.
//!
//! ```text
//! PENDING ─▶ QUEUED ─▶ SENDING ─▶ SENT
//!    │          │         └─────▶ FAILED ──explicit retry──▶ PENDING
//!    │          ├────────────────▶ FAILED   (account mismatch)
//!    └──────────┴────────────────▶ CANCELLED (external action only)
//! ```
//!
//! SENT, FAILED and CANCELLED are terminal for the worker. Only an explicit
//! retry moves a FAILED job again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{
    CampaignId, DomainError, DomainResult, EmailJobId, Entity, LeadId, MailAccountId, TenantId,
};

use crate::message::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailJobStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl EmailJobStatus {
    pub fn can_transition_to(self, next: EmailJobStatus) -> bool {
        use EmailJobStatus::*;
        match (self, next) {
            (Pending, Queued) | (Pending, Sending) | (Pending, Failed) | (Pending, Cancelled) => {
                true
            }
            (Queued, Sending) | (Queued, Failed) | (Queued, Cancelled) => true,
            (Sending, Sent) | (Sending, Failed) => true,
            (Failed, Pending) => true,
            (Pending, _) | (Queued, _) | (Sending, _) | (Sent, _) | (Failed, _) | (Cancelled, _) => {
                false
            }
        }
    }

    /// Statuses a worker may pick up from a notification.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, EmailJobStatus::Pending | EmailJobStatus::Queued)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EmailJobStatus::Sent | EmailJobStatus::Failed | EmailJobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmailJobStatus::Pending => "PENDING",
            EmailJobStatus::Queued => "QUEUED",
            EmailJobStatus::Sending => "SENDING",
            EmailJobStatus::Sent => "SENT",
            EmailJobStatus::Failed => "FAILED",
            EmailJobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for EmailJobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intended outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSendJob {
    id: EmailJobId,
    tenant_id: TenantId,
    /// Originating campaign; `None` for manual sends.
    campaign_id: Option<CampaignId>,
    lead_id: Option<LeadId>,
    /// Mail account the job was created against.
    account_id: MailAccountId,
    message: OutboundMessage,
    status: EmailJobStatus,
    error: Option<String>,
    provider_message_id: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmailSendJob {
    pub fn new(
        tenant_id: TenantId,
        account_id: MailAccountId,
        message: OutboundMessage,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        message.validate()?;
        Ok(Self {
            id: EmailJobId::new(),
            tenant_id,
            campaign_id: None,
            lead_id: None,
            account_id,
            message,
            status: EmailJobStatus::Pending,
            error: None,
            provider_message_id: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Attach the campaign (and lead) this message was generated for.
    pub fn for_campaign(mut self, campaign_id: CampaignId, lead_id: Option<LeadId>) -> Self {
        self.campaign_id = Some(campaign_id);
        self.lead_id = lead_id;
        self
    }

    pub fn campaign_id(&self) -> Option<CampaignId> {
        self.campaign_id
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        self.lead_id
    }

    pub fn account_id(&self) -> MailAccountId {
        self.account_id
    }

    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    pub fn status(&self) -> EmailJobStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn provider_message_id(&self) -> Option<&str> {
        self.provider_message_id.as_deref()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// PENDING → QUEUED once a start notification has been emitted.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Queued, now)
    }

    /// PENDING | QUEUED → SENDING after rate-limit admission.
    pub fn begin_sending(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Sending, now)
    }

    /// SENDING → SENT.
    pub fn mark_sent(&mut self, provider_message_id: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Sent, now)?;
        self.provider_message_id = Some(provider_message_id.into());
        self.sent_at = Some(now);
        self.error = None;
        Ok(())
    }

    /// → FAILED with a user-visible error.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Failed, now)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// PENDING | QUEUED → CANCELLED. Never called by the worker itself.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Cancelled, now)
    }

    /// FAILED → PENDING, on explicit user request.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(EmailJobStatus::Pending, now)?;
        self.error = None;
        Ok(())
    }

    fn transition(&mut self, next: EmailJobStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "email job {} cannot go from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for EmailSendJob {
    type Id = EmailJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
