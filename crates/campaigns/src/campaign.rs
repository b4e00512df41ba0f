use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, DomainError, DomainResult, Entity, TenantId};

/// Largest page the lead-search provider accepts.
pub const MAX_PROVIDER_PAGE_SIZE: u32 = 100;

/// Search filters forwarded to the lead provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadCriteria {
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub company_sizes: Vec<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

impl LeadCriteria {
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
            && self.locations.is_empty()
            && self.industries.is_empty()
            && self.company_sizes.is_empty()
            && self.keywords.as_deref().is_none_or(|k| k.trim().is_empty())
    }
}

/// Spreadsheet the campaign exports its leads into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetDestination {
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

impl SheetDestination {
    pub fn new(spreadsheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }
}

/// Tenant-owned campaign configuration.
///
/// Identity is immutable; criteria and limits may be edited between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    id: CampaignId,
    tenant_id: TenantId,
    pub name: String,
    pub criteria: LeadCriteria,
    pub max_leads: u64,
    pub page_size: u32,
    pub destination: SheetDestination,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        id: CampaignId,
        tenant_id: TenantId,
        name: impl Into<String>,
        criteria: LeadCriteria,
        max_leads: u64,
        page_size: u32,
        destination: SheetDestination,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("campaign name cannot be empty"));
        }
        validate_limits(max_leads, page_size)?;
        if destination.spreadsheet_id.trim().is_empty() {
            return Err(DomainError::validation("destination spreadsheet id cannot be empty"));
        }

        Ok(Self {
            id,
            tenant_id,
            name,
            criteria,
            max_leads,
            page_size,
            destination,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the search criteria and limits used by future runs.
    pub fn update_criteria(
        &mut self,
        criteria: LeadCriteria,
        max_leads: u64,
        page_size: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        validate_limits(max_leads, page_size)?;
        self.criteria = criteria;
        self.max_leads = max_leads;
        self.page_size = page_size;
        self.updated_at = now;
        Ok(())
    }
}

fn validate_limits(max_leads: u64, page_size: u32) -> DomainResult<()> {
    if max_leads == 0 {
        return Err(DomainError::validation("max_leads must be positive"));
    }
    if page_size == 0 || page_size > MAX_PROVIDER_PAGE_SIZE {
        return Err(DomainError::validation(format!(
            "page_size must be within 1..={MAX_PROVIDER_PAGE_SIZE} (got {page_size})"
        )));
    }
    Ok(())
}

impl Entity for Campaign {
    type Id = CampaignId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(max_leads: u64, page_size: u32) -> DomainResult<Campaign> {
        Campaign::new(
            CampaignId::new(),
            TenantId::new(),
            "Founders in Berlin",
            LeadCriteria::default(),
            max_leads,
            page_size,
            SheetDestination::new("sheet-1", "Leads"),
            Utc::now(),
        )
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        assert!(campaign(10, 0).is_err());
        assert!(campaign(10, MAX_PROVIDER_PAGE_SIZE + 1).is_err());
        assert!(campaign(10, MAX_PROVIDER_PAGE_SIZE).is_ok());
    }

    #[test]
    fn rejects_zero_max_leads() {
        assert_eq!(
            campaign(0, 25).unwrap_err(),
            DomainError::validation("max_leads must be positive")
        );
    }

    #[test]
    fn update_criteria_keeps_identity() {
        let mut c = campaign(10, 25).unwrap();
        let id = *c.id();
        let criteria = LeadCriteria {
            titles: vec!["CTO".to_string()],
            ..Default::default()
        };

        c.update_criteria(criteria.clone(), 50, 10, Utc::now()).unwrap();

        assert_eq!(*c.id(), id);
        assert_eq!(c.criteria, criteria);
        assert_eq!(c.max_leads, 50);
    }

    #[test]
    fn blank_keywords_count_as_empty_criteria() {
        let criteria = LeadCriteria {
            keywords: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(criteria.is_empty());
    }
}
