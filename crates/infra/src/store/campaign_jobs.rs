use std::collections::HashMap;
use std::sync::RwLock;

use leadflow_campaigns::{CampaignJob, CampaignJobStatus, IdempotencyKey};
use leadflow_core::{CampaignJobId, DomainResult, Entity, TenantId};

use super::{StoreError, read, write};

/// Campaign job rows.
pub trait CampaignJobStore: Send + Sync {
    /// Worker-side read; notifications carry only the job id.
    fn get(&self, id: CampaignJobId) -> Result<Option<CampaignJob>, StoreError>;

    /// Tenant-checked read for external actions.
    fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignJobId,
    ) -> Result<Option<CampaignJob>, StoreError>;

    fn find_by_key(&self, key: IdempotencyKey) -> Result<Option<CampaignJob>, StoreError>;

    /// Insert unless a row with the same idempotency key exists.
    ///
    /// Returns the stored row and whether it was created by this call. The
    /// key check and the insert are one atomic step (unique constraint).
    fn insert_if_absent(&self, job: CampaignJob) -> Result<(CampaignJob, bool), StoreError>;

    /// Atomically apply `f` to the current row and persist the result.
    ///
    /// If `f` fails the row is left untouched and the error comes back as
    /// [`StoreError::Rejected`].
    fn transition(
        &self,
        id: CampaignJobId,
        f: &mut dyn FnMut(&mut CampaignJob) -> DomainResult<()>,
    ) -> Result<CampaignJob, StoreError>;

    /// Jobs in `status`, oldest first.
    fn list_by_status(
        &self,
        status: CampaignJobStatus,
        limit: usize,
    ) -> Result<Vec<CampaignJob>, StoreError>;
}

#[derive(Debug, Default)]
struct Rows {
    jobs: HashMap<CampaignJobId, CampaignJob>,
    by_key: HashMap<IdempotencyKey, CampaignJobId>,
}

/// In-memory campaign job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCampaignJobStore {
    rows: RwLock<Rows>,
}

impl InMemoryCampaignJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignJobStore for InMemoryCampaignJobStore {
    fn get(&self, id: CampaignJobId) -> Result<Option<CampaignJob>, StoreError> {
        Ok(read(&self.rows)?.jobs.get(&id).cloned())
    }

    fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignJobId,
    ) -> Result<Option<CampaignJob>, StoreError> {
        let rows = read(&self.rows)?;
        match rows.jobs.get(&id) {
            Some(job) if job.tenant_id() == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn find_by_key(&self, key: IdempotencyKey) -> Result<Option<CampaignJob>, StoreError> {
        let rows = read(&self.rows)?;
        Ok(rows
            .by_key
            .get(&key)
            .and_then(|id| rows.jobs.get(id))
            .cloned())
    }

    fn insert_if_absent(&self, job: CampaignJob) -> Result<(CampaignJob, bool), StoreError> {
        let mut rows = write(&self.rows)?;
        let key = job.idempotency_key();

        if let Some(existing) = rows.by_key.get(&key).and_then(|id| rows.jobs.get(id)) {
            return Ok((existing.clone(), false));
        }
        if rows.jobs.contains_key(job.id()) {
            return Err(StoreError::already_exists("campaign job", job.id()));
        }

        rows.by_key.insert(key, *job.id());
        rows.jobs.insert(*job.id(), job.clone());
        Ok((job, true))
    }

    fn transition(
        &self,
        id: CampaignJobId,
        f: &mut dyn FnMut(&mut CampaignJob) -> DomainResult<()>,
    ) -> Result<CampaignJob, StoreError> {
        let mut rows = write(&self.rows)?;
        let current = rows
            .jobs
            .get(&id)
            .ok_or_else(|| StoreError::not_found("campaign job", id))?;

        let mut next = current.clone();
        f(&mut next).map_err(StoreError::Rejected)?;
        rows.jobs.insert(id, next.clone());
        Ok(next)
    }

    fn list_by_status(
        &self,
        status: CampaignJobStatus,
        limit: usize,
    ) -> Result<Vec<CampaignJob>, StoreError> {
        let rows = read(&self.rows)?;
        let mut result: Vec<_> = rows
            .jobs
            .values()
            .filter(|j| j.status() == status)
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at());
        result.truncate(limit);
        Ok(result)
    }
}
