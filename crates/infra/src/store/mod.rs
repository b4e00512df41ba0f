//! Row stores for campaigns, jobs, attempts, leads and mail accounts.
//!
//! Each trait is the contract a transactional row store must satisfy; the
//! `InMemory*` types implement it for tests/dev. Status changes go through
//! `transition(id, f)`: a single atomic read-modify-write of one row, so the
//! state machine re-validates the status the worker observed earlier.
//! A SQL backend maps it to `UPDATE ... WHERE id = $1 AND status IN (...)`.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use leadflow_core::DomainError;

mod accounts;
mod attempts;
mod campaign_jobs;
mod campaigns;
mod email_jobs;
mod leads;

pub use accounts::{InMemoryMailAccountStore, MailAccountStore};
pub use attempts::{AttemptStore, InMemoryAttemptStore};
pub use campaign_jobs::{CampaignJobStore, InMemoryCampaignJobStore};
pub use campaigns::{CampaignStore, InMemoryCampaignStore};
pub use email_jobs::{EmailJobStore, InMemoryEmailJobStore};
pub use leads::{InMemoryLeadStore, LeadStore};

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },
    /// The state machine refused the mutation; the row is unchanged.
    #[error("rejected: {0}")]
    Rejected(DomainError),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    /// True when a transition was refused because the row had moved on.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, StoreError::Rejected(DomainError::InvalidTransition(_)))
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned)
}
