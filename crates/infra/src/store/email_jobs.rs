use std::collections::HashMap;
use std::sync::RwLock;

use leadflow_core::{DomainResult, EmailJobId, Entity, TenantId};
use leadflow_mailing::{EmailJobStatus, EmailSendJob};

use super::{StoreError, read, write};

/// Email send job rows.
pub trait EmailJobStore: Send + Sync {
    fn insert(&self, job: EmailSendJob) -> Result<(), StoreError>;

    fn get(&self, id: EmailJobId) -> Result<Option<EmailSendJob>, StoreError>;

    fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: EmailJobId,
    ) -> Result<Option<EmailSendJob>, StoreError>;

    /// Atomic read-modify-write; see [`super::CampaignJobStore::transition`].
    fn transition(
        &self,
        id: EmailJobId,
        f: &mut dyn FnMut(&mut EmailSendJob) -> DomainResult<()>,
    ) -> Result<EmailSendJob, StoreError>;

    fn list_by_status(
        &self,
        status: EmailJobStatus,
        limit: usize,
    ) -> Result<Vec<EmailSendJob>, StoreError>;
}

/// In-memory email job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEmailJobStore {
    jobs: RwLock<HashMap<EmailJobId, EmailSendJob>>,
}

impl InMemoryEmailJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmailJobStore for InMemoryEmailJobStore {
    fn insert(&self, job: EmailSendJob) -> Result<(), StoreError> {
        let mut jobs = write(&self.jobs)?;
        if jobs.contains_key(job.id()) {
            return Err(StoreError::already_exists("email job", job.id()));
        }
        jobs.insert(*job.id(), job);
        Ok(())
    }

    fn get(&self, id: EmailJobId) -> Result<Option<EmailSendJob>, StoreError> {
        Ok(read(&self.jobs)?.get(&id).cloned())
    }

    fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: EmailJobId,
    ) -> Result<Option<EmailSendJob>, StoreError> {
        let jobs = read(&self.jobs)?;
        match jobs.get(&id) {
            Some(job) if job.tenant_id() == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn transition(
        &self,
        id: EmailJobId,
        f: &mut dyn FnMut(&mut EmailSendJob) -> DomainResult<()>,
    ) -> Result<EmailSendJob, StoreError> {
        let mut jobs = write(&self.jobs)?;
        let current = jobs
            .get(&id)
            .ok_or_else(|| StoreError::not_found("email job", id))?;

        let mut next = current.clone();
        f(&mut next).map_err(StoreError::Rejected)?;
        jobs.insert(id, next.clone());
        Ok(next)
    }

    fn list_by_status(
        &self,
        status: EmailJobStatus,
        limit: usize,
    ) -> Result<Vec<EmailSendJob>, StoreError> {
        let jobs = read(&self.jobs)?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.status() == status).cloned().collect();

        result.sort_by_key(|j| j.created_at());
        result.truncate(limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadflow_core::MailAccountId;
    use leadflow_mailing::OutboundMessage;

    use super::*;

    fn job() -> EmailSendJob {
        let message = OutboundMessage::new("lead@x.com", "Hi", "", "Hello").unwrap();
        EmailSendJob::new(TenantId::new(), MailAccountId::new(), message, Utc::now()).unwrap()
    }

    #[test]
    fn insert_get_and_transition() {
        let store = InMemoryEmailJobStore::new();
        let j = job();
        let id = *j.id();
        store.insert(j.clone()).unwrap();
        assert!(matches!(store.insert(j), Err(StoreError::AlreadyExists { .. })));

        let queued = store.transition(id, &mut |j| j.mark_queued(Utc::now())).unwrap();
        assert_eq!(queued.status(), EmailJobStatus::Queued);
        assert_eq!(store.list_by_status(EmailJobStatus::Queued, 10).unwrap().len(), 1);
        assert!(store.list_by_status(EmailJobStatus::Pending, 10).unwrap().is_empty());
    }

    #[test]
    fn terminal_job_refuses_cancel() {
        let store = InMemoryEmailJobStore::new();
        let j = job();
        let id = *j.id();
        store.insert(j).unwrap();

        store.transition(id, &mut |j| j.begin_sending(Utc::now())).unwrap();
        store.transition(id, &mut |j| j.mark_sent("m-1", Utc::now())).unwrap();

        let err = store.transition(id, &mut |j| j.cancel(Utc::now())).unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(store.get(id).unwrap().unwrap().status(), EmailJobStatus::Sent);
    }
}
