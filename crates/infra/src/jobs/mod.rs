//! Background job handling: campaign lead fetch and email dispatch.
//!
//! Handlers are driven by at-least-once queue notifications. Every handler
//! starts with a status-gated re-read of the job row, and every status change
//! is a store `transition` that re-validates it, so duplicate or stale
//! deliveries are no-ops.

pub mod campaign;
pub mod email;
pub mod ledger;
pub mod pipeline;
pub mod pool;

pub use campaign::{CampaignJobOrchestrator, CampaignRunOutcome, OrchestratorError};
pub use email::{DispatchError, DispatchOutcome, EmailDispatchConfig, EmailDispatchWorker};
pub use ledger::{AttemptLedger, AttemptRef};
pub use pipeline::{
    LeadFetchPipeline, MAX_EXPORT_BATCH, PipelineConfig, PipelineError, PipelineRun, PipelineTotals,
    StopReason,
};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};

/// Result of an explicit user action (cancel, retry) against a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<J, S> {
    /// The job moved; carries the updated row.
    Applied(J),
    /// Not allowed from the job's current status; nothing changed.
    Rejected { status: S },
}

impl<J, S> ActionOutcome<J, S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied(_))
    }
}
