//! Campaign lead-fetch domain module.
//!
//! This crate contains the campaign job state machine, lead identity rules,
//! attempt ledger entries and idempotency key derivation, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod attempt;
pub mod campaign;
pub mod idempotency;
pub mod job;
pub mod lead;
pub mod retry;

pub use attempt::{AttemptAnnotation, AttemptEntry, AttemptEntryKind, AttemptOutcome, JobAttempt};
pub use campaign::{Campaign, LeadCriteria, MAX_PROVIDER_PAGE_SIZE, SheetDestination};
pub use idempotency::{IdempotencyKey, JobPhase};
pub use job::{CampaignJob, CampaignJobStatus, PageProgress};
pub use lead::{Lead, LeadIdentity, ProspectRecord, SHEET_HEADER};
pub use retry::{BackoffStrategy, RetryPolicy};
