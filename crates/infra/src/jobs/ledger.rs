use std::sync::Arc;

use leadflow_campaigns::{AttemptAnnotation, AttemptEntry, AttemptEntryKind, AttemptOutcome, JobAttempt};
use leadflow_core::{CampaignJobId, TenantId};

use crate::clock::Clock;
use crate::store::{AttemptStore, StoreError};

/// Identifies one attempt of one campaign job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRef {
    pub tenant_id: TenantId,
    pub job_id: CampaignJobId,
    pub number: u32,
}

/// Writes attempt history as append-only entries and folds it back for reads.
#[derive(Clone)]
pub struct AttemptLedger {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
}

impl AttemptLedger {
    pub fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn open(&self, attempt: AttemptRef) -> Result<(), StoreError> {
        self.append(attempt, AttemptEntryKind::Opened)
    }

    pub fn annotate(&self, attempt: AttemptRef, note: AttemptAnnotation) -> Result<(), StoreError> {
        self.append(attempt, AttemptEntryKind::Annotated(note))
    }

    pub fn close(
        &self,
        attempt: AttemptRef,
        outcome: AttemptOutcome,
        error: Option<String>,
        leads_processed: u64,
        leads_written: u64,
    ) -> Result<(), StoreError> {
        self.append(
            attempt,
            AttemptEntryKind::Closed {
                outcome,
                error,
                leads_processed,
                leads_written,
            },
        )
    }

    /// Attempts of a job ordered by attempt number.
    pub fn summaries(&self, job_id: CampaignJobId) -> Result<Vec<JobAttempt>, StoreError> {
        let entries = self.store.list(job_id)?;
        Ok(JobAttempt::fold(&entries))
    }

    fn append(&self, attempt: AttemptRef, kind: AttemptEntryKind) -> Result<(), StoreError> {
        self.store.append(AttemptEntry::new(
            attempt.tenant_id,
            attempt.job_id,
            attempt.number,
            kind,
            self.clock.now(),
        ))
    }
}
