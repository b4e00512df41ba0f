//! Append-only attempt ledger entries.
//!
//! An attempt is never updated in place. Opening, annotating and closing it
//! each append a new [`AttemptEntry`]; [`JobAttempt::fold`] rebuilds the
//! per-attempt view from the entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{AttemptId, CampaignJobId, Entity, TenantId};

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// A non-fatal problem recorded during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptAnnotation {
    /// One spreadsheet export batch failed and its rows were skipped.
    BatchFailed {
        page: u32,
        batch: u32,
        rows: u32,
        error: String,
    },
    /// A provider page could not be fetched after retries and was skipped.
    PageSkipped { page: u32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptEntryKind {
    Opened,
    Annotated(AttemptAnnotation),
    Closed {
        outcome: AttemptOutcome,
        error: Option<String>,
        leads_processed: u64,
        leads_written: u64,
    },
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEntry {
    id: AttemptId,
    tenant_id: TenantId,
    pub job_id: CampaignJobId,
    pub attempt_number: u32,
    pub recorded_at: DateTime<Utc>,
    pub kind: AttemptEntryKind,
}

impl AttemptEntry {
    pub fn new(
        tenant_id: TenantId,
        job_id: CampaignJobId,
        attempt_number: u32,
        kind: AttemptEntryKind,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            tenant_id,
            job_id,
            attempt_number,
            recorded_at,
            kind,
        }
    }
}

impl Entity for AttemptEntry {
    type Id = AttemptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Folded view of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttempt {
    pub job_id: CampaignJobId,
    pub attempt_number: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while the attempt is open (or its worker died mid-run).
    pub outcome: Option<AttemptOutcome>,
    pub error: Option<String>,
    pub leads_processed: u64,
    pub leads_written: u64,
    pub annotations: Vec<AttemptAnnotation>,
}

impl JobAttempt {
    fn empty(job_id: CampaignJobId, attempt_number: u32) -> Self {
        Self {
            job_id,
            attempt_number,
            started_at: None,
            finished_at: None,
            outcome: None,
            error: None,
            leads_processed: 0,
            leads_written: 0,
            annotations: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    /// Rebuild attempt views from ledger entries, ordered by attempt number.
    ///
    /// Entries are applied in `recorded_at` order; a second `Closed` entry for
    /// the same attempt is ignored (first close wins).
    pub fn fold<'a>(entries: impl IntoIterator<Item = &'a AttemptEntry>) -> Vec<JobAttempt> {
        let mut sorted: Vec<&AttemptEntry> = entries.into_iter().collect();
        sorted.sort_by_key(|e| (e.attempt_number, e.recorded_at));

        let mut attempts: Vec<JobAttempt> = Vec::new();
        for entry in sorted {
            let needs_new = attempts
                .last()
                .is_none_or(|a| a.attempt_number != entry.attempt_number);
            if needs_new {
                attempts.push(JobAttempt::empty(entry.job_id, entry.attempt_number));
            }
            let Some(attempt) = attempts.last_mut() else {
                continue;
            };

            match &entry.kind {
                AttemptEntryKind::Opened => {
                    attempt.started_at.get_or_insert(entry.recorded_at);
                }
                AttemptEntryKind::Annotated(note) => attempt.annotations.push(note.clone()),
                AttemptEntryKind::Closed {
                    outcome,
                    error,
                    leads_processed,
                    leads_written,
                } => {
                    if attempt.outcome.is_none() {
                        attempt.outcome = Some(*outcome);
                        attempt.error = error.clone();
                        attempt.finished_at = Some(entry.recorded_at);
                        attempt.leads_processed = *leads_processed;
                        attempt.leads_written = *leads_written;
                    }
                }
            }
        }
        attempts
    }
}
