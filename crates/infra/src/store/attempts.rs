use std::collections::HashMap;
use std::sync::RwLock;

use leadflow_campaigns::AttemptEntry;
use leadflow_core::{CampaignJobId, Entity};

use super::{StoreError, read, write};

/// Append-only attempt ledger rows: no update, no delete.
pub trait AttemptStore: Send + Sync {
    fn append(&self, entry: AttemptEntry) -> Result<(), StoreError>;

    /// All entries for a job in insertion order.
    fn list(&self, job_id: CampaignJobId) -> Result<Vec<AttemptEntry>, StoreError>;
}

/// In-memory attempt ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    entries: RwLock<HashMap<CampaignJobId, Vec<AttemptEntry>>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptStore for InMemoryAttemptStore {
    fn append(&self, entry: AttemptEntry) -> Result<(), StoreError> {
        let mut entries = write(&self.entries)?;
        let for_job = entries.entry(entry.job_id).or_default();
        if for_job.iter().any(|e| e.id() == entry.id()) {
            return Err(StoreError::already_exists("attempt entry", entry.id()));
        }
        for_job.push(entry);
        Ok(())
    }

    fn list(&self, job_id: CampaignJobId) -> Result<Vec<AttemptEntry>, StoreError> {
        Ok(read(&self.entries)?.get(&job_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadflow_campaigns::AttemptEntryKind;
    use leadflow_core::TenantId;

    use super::*;

    #[test]
    fn entries_are_append_only() {
        let store = InMemoryAttemptStore::new();
        let job_id = CampaignJobId::new();
        let entry = AttemptEntry::new(TenantId::new(), job_id, 1, AttemptEntryKind::Opened, Utc::now());

        store.append(entry.clone()).unwrap();
        assert!(matches!(
            store.append(entry),
            Err(StoreError::AlreadyExists { .. })
        ));
        assert_eq!(store.list(job_id).unwrap().len(), 1);
        assert!(store.list(CampaignJobId::new()).unwrap().is_empty());
    }
}
