//! Campaign job row and its state machine.
//!
//! ```text
//! PENDING ──start──▶ RUNNING ──succeed──▶ SUCCEEDED
//!    │                  │ └────fail─────▶ FAILED ────┐
//!    └──────cancel──────┴───cancel──────▶ CANCELLED ─┤
//!    ▲                                               │
//!    └───────────────────rearm (retry)───────────────┘
//! ```
//!
//! Every mutation validates the current status first, so a store can apply a
//! method inside its atomic read-modify-write and get the re-validation for free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, CampaignJobId, DomainError, DomainResult, Entity, TenantId};

use crate::idempotency::IdempotencyKey;

/// Campaign job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignJobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl CampaignJobStatus {
    /// Exhaustive transition table.
    pub fn can_transition_to(self, next: CampaignJobStatus) -> bool {
        use CampaignJobStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) => true,
            (Failed, Pending) | (Cancelled, Pending) => true,
            (Pending, _) | (Running, _) | (Succeeded, _) | (Failed, _) | (Cancelled, _) => false,
        }
    }

    /// Pending and running jobs occupy the campaign's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, CampaignJobStatus::Pending | CampaignJobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// A worker may only pick up a job in this status.
    pub fn is_startable(self) -> bool {
        matches!(self, CampaignJobStatus::Pending)
    }

    pub fn is_retriable(self) -> bool {
        matches!(self, CampaignJobStatus::Failed | CampaignJobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignJobStatus::Pending => "PENDING",
            CampaignJobStatus::Running => "RUNNING",
            CampaignJobStatus::Succeeded => "SUCCEEDED",
            CampaignJobStatus::Failed => "FAILED",
            CampaignJobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for CampaignJobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters produced by one processed provider page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageProgress {
    /// Records the provider returned for the page.
    pub fetched: u64,
    /// Rows successfully appended to the spreadsheet.
    pub written: u64,
    /// Duplicates and records without a usable identity.
    pub skipped: u64,
    /// Export batches that failed and were skipped.
    pub export_failures: u32,
    /// The page itself could not be fetched and was skipped.
    pub page_failed: bool,
    /// Provider page to resume from after this one.
    pub next_page: u32,
}

/// One execution lineage of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignJob {
    id: CampaignJobId,
    tenant_id: TenantId,
    campaign_id: CampaignId,
    idempotency_key: IdempotencyKey,
    status: CampaignJobStatus,
    attempt_count: u32,
    leads_processed: u64,
    leads_written: u64,
    leads_skipped: u64,
    total_pages: u32,
    page_failures: u32,
    export_failures: u32,
    next_page: u32,
    last_error: Option<String>,
    next_run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl CampaignJob {
    /// Create a pending job, due immediately.
    pub fn new(
        tenant_id: TenantId,
        campaign_id: CampaignId,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CampaignJobId::new(),
            tenant_id,
            campaign_id,
            idempotency_key,
            status: CampaignJobStatus::Pending,
            attempt_count: 0,
            leads_processed: 0,
            leads_written: 0,
            leads_skipped: 0,
            total_pages: 0,
            page_failures: 0,
            export_failures: 0,
            next_page: 0,
            last_error: None,
            next_run_at: now,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.idempotency_key
    }

    pub fn status(&self) -> CampaignJobStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn leads_processed(&self) -> u64 {
        self.leads_processed
    }

    pub fn leads_written(&self) -> u64 {
        self.leads_written
    }

    pub fn leads_skipped(&self) -> u64 {
        self.leads_skipped
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn page_failures(&self) -> u32 {
        self.page_failures
    }

    pub fn export_failures(&self) -> u32 {
        self.export_failures
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn next_run_at(&self) -> DateTime<Utc> {
        self.next_run_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now
    }

    /// Succeeded, but some fetched records were neither written nor counted as skipped.
    pub fn is_partial_success(&self) -> bool {
        self.status == CampaignJobStatus::Succeeded
            && self.leads_written + self.leads_skipped < self.leads_processed
    }

    /// PENDING → RUNNING. Returns the new attempt number.
    pub fn start(&mut self, now: DateTime<Utc>) -> DomainResult<u32> {
        self.transition(CampaignJobStatus::Running, now)?;
        self.attempt_count += 1;
        self.started_at = Some(now);
        self.finished_at = None;
        Ok(self.attempt_count)
    }

    /// Fold one page worth of counters into the job.
    ///
    /// Allowed while running, and after a cancellation that raced an in-flight
    /// page, so the leads that page persisted are still accounted for.
    pub fn record_page(&mut self, progress: PageProgress, now: DateTime<Utc>) -> DomainResult<()> {
        if !matches!(
            self.status,
            CampaignJobStatus::Running | CampaignJobStatus::Cancelled
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot record page progress while {}",
                self.status
            )));
        }

        self.leads_processed += progress.fetched;
        self.leads_written += progress.written;
        self.leads_skipped += progress.skipped;
        self.export_failures += progress.export_failures;
        self.total_pages += 1;
        if progress.page_failed {
            self.page_failures += 1;
        }
        self.next_page = self.next_page.max(progress.next_page);
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING → SUCCEEDED.
    pub fn succeed(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(CampaignJobStatus::Succeeded, now)?;
        self.last_error = None;
        self.finished_at = Some(now);
        Ok(())
    }

    /// RUNNING → FAILED.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(CampaignJobStatus::Failed, now)?;
        self.last_error = Some(error.into());
        self.finished_at = Some(now);
        Ok(())
    }

    /// PENDING | RUNNING → CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(CampaignJobStatus::Cancelled, now)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// FAILED | CANCELLED → PENDING, due now. Counters and attempt history are kept.
    pub fn rearm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(CampaignJobStatus::Pending, now)?;
        self.next_run_at = now;
        self.finished_at = None;
        Ok(())
    }

    /// Push the due time out without changing status.
    pub fn defer_until(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        self.next_run_at = at;
        self.updated_at = now;
    }

    fn transition(&mut self, next: CampaignJobStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "campaign job {} cannot go from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for CampaignJob {
    type Id = CampaignJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
