use std::collections::HashMap;
use std::sync::RwLock;

use leadflow_campaigns::Campaign;
use leadflow_core::{CampaignId, Entity, TenantId};

use super::{StoreError, read, write};

/// Campaign configuration rows.
pub trait CampaignStore: Send + Sync {
    fn get(&self, tenant_id: TenantId, id: CampaignId) -> Result<Option<Campaign>, StoreError>;

    /// Insert or replace a campaign. Ownership never changes once stored.
    fn save(&self, campaign: &Campaign) -> Result<(), StoreError>;
}

/// In-memory campaign store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    rows: RwLock<HashMap<CampaignId, Campaign>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn get(&self, tenant_id: TenantId, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        let rows = read(&self.rows)?;
        match rows.get(&id) {
            Some(c) if c.tenant_id() == tenant_id => Ok(Some(c.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn save(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let mut rows = write(&self.rows)?;
        if let Some(existing) = rows.get(campaign.id()) {
            if existing.tenant_id() != campaign.tenant_id() {
                return Err(StoreError::TenantIsolation);
            }
        }
        rows.insert(*campaign.id(), campaign.clone());
        Ok(())
    }
}
