use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use leadflow_campaigns::{Lead, LeadIdentity};
use leadflow_core::{CampaignId, Entity, TenantId};

use super::{StoreError, read, write};

/// Lead rows, unique per `(campaign, identity)`.
pub trait LeadStore: Send + Sync {
    /// Persist the leads whose identity is new for the campaign.
    ///
    /// Returns the survivors in input order. Within one call the first
    /// occurrence of an identity wins; later ones are dropped. Filtering and
    /// insert happen under one write so concurrent calls cannot both insert
    /// the same identity.
    fn insert_new(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        leads: Vec<Lead>,
    ) -> Result<Vec<Lead>, StoreError>;

    fn list(&self, tenant_id: TenantId, campaign_id: CampaignId) -> Result<Vec<Lead>, StoreError>;
}

#[derive(Debug, Default)]
struct CampaignLeads {
    tenant_id: Option<TenantId>,
    identities: HashSet<LeadIdentity>,
    rows: Vec<Lead>,
}

/// In-memory lead store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLeadStore {
    campaigns: RwLock<HashMap<CampaignId, CampaignLeads>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeadStore for InMemoryLeadStore {
    fn insert_new(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        leads: Vec<Lead>,
    ) -> Result<Vec<Lead>, StoreError> {
        let mut campaigns = write(&self.campaigns)?;
        let bucket = campaigns.entry(campaign_id).or_default();
        match bucket.tenant_id {
            Some(owner) if owner != tenant_id => return Err(StoreError::TenantIsolation),
            _ => bucket.tenant_id = Some(tenant_id),
        }

        if leads
            .iter()
            .any(|l| l.tenant_id() != tenant_id || l.campaign_id != campaign_id)
        {
            return Err(StoreError::TenantIsolation);
        }

        let mut survivors = Vec::with_capacity(leads.len());
        for lead in leads {
            if bucket.identities.insert(lead.identity.clone()) {
                bucket.rows.push(lead.clone());
                survivors.push(lead);
            }
        }
        Ok(survivors)
    }

    fn list(&self, tenant_id: TenantId, campaign_id: CampaignId) -> Result<Vec<Lead>, StoreError> {
        let campaigns = read(&self.campaigns)?;
        match campaigns.get(&campaign_id) {
            Some(bucket) if bucket.tenant_id == Some(tenant_id) => Ok(bucket.rows.clone()),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadflow_campaigns::ProspectRecord;

    use super::*;

    fn lead(tenant_id: TenantId, campaign_id: CampaignId, email: &str) -> Lead {
        Lead::from_prospect(tenant_id, campaign_id, ProspectRecord::with_email(email), Utc::now())
            .unwrap()
    }

    #[test]
    fn identity_is_unique_per_campaign_and_first_seen_wins() {
        let store = InMemoryLeadStore::new();
        let tenant = TenantId::new();
        let campaign = CampaignId::new();

        let first = store
            .insert_new(
                tenant,
                campaign,
                vec![lead(tenant, campaign, "A@X.com"), lead(tenant, campaign, "a@x.com")],
            )
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].email, "A@X.com");

        let second = store
            .insert_new(
                tenant,
                campaign,
                vec![lead(tenant, campaign, " a@X.COM "), lead(tenant, campaign, "b@x.com")],
            )
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].identity.as_str(), "b@x.com");

        assert_eq!(store.list(tenant, campaign).unwrap().len(), 2);
    }

    #[test]
    fn same_identity_is_allowed_in_another_campaign() {
        let store = InMemoryLeadStore::new();
        let tenant = TenantId::new();
        let (c1, c2) = (CampaignId::new(), CampaignId::new());

        store.insert_new(tenant, c1, vec![lead(tenant, c1, "a@x.com")]).unwrap();
        let survivors = store.insert_new(tenant, c2, vec![lead(tenant, c2, "a@x.com")]).unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn other_tenant_cannot_read_or_write_campaign_leads() {
        let store = InMemoryLeadStore::new();
        let (owner, intruder) = (TenantId::new(), TenantId::new());
        let campaign = CampaignId::new();
        store.insert_new(owner, campaign, vec![lead(owner, campaign, "a@x.com")]).unwrap();

        assert_eq!(store.list(intruder, campaign), Err(StoreError::TenantIsolation));
        assert_eq!(
            store.insert_new(intruder, campaign, vec![lead(intruder, campaign, "z@x.com")]),
            Err(StoreError::TenantIsolation)
        );
    }
}
