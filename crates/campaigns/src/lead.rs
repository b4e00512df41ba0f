use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{CampaignId, Entity, LeadId, TenantId};

/// Column order used when leads are appended to the destination spreadsheet.
pub const SHEET_HEADER: [&str; 7] = [
    "email",
    "first_name",
    "last_name",
    "title",
    "company",
    "location",
    "linkedin_url",
];

/// Normalized contact identity used for deduplication within a campaign.
///
/// Two prospects are the same lead when their emails match after trimming and
/// lowercasing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadIdentity(String);

impl LeadIdentity {
    /// Normalize a raw email; returns `None` when it cannot identify a contact.
    pub fn from_email(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let (local, domain) = normalized.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        if normalized.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LeadIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw record as returned by the lead-search provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectRecord {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub linkedin_url: Option<String>,
}

impl ProspectRecord {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Option<LeadIdentity> {
        self.email.as_deref().and_then(LeadIdentity::from_email)
    }
}

/// A deduplicated prospect attached to a campaign.
///
/// Created by the lead fetch pipeline and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    id: LeadId,
    tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub identity: LeadIdentity,
    /// Email as the provider spelled it (first-seen wins).
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub linkedin_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Build a lead from a provider record, or `None` if it carries no usable email.
    pub fn from_prospect(
        tenant_id: TenantId,
        campaign_id: CampaignId,
        record: ProspectRecord,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let identity = record.identity()?;
        let email = record.email.map(|e| e.trim().to_string())?;

        Some(Self {
            id: LeadId::new(),
            tenant_id,
            campaign_id,
            identity,
            email,
            first_name: record.first_name,
            last_name: record.last_name,
            title: record.title,
            company: record.company,
            location: record.location,
            linkedin_url: record.linkedin_url,
            created_at: now,
        })
    }

    /// Spreadsheet row, ordered like [`SHEET_HEADER`].
    pub fn to_row(&self) -> Vec<String> {
        let cell = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            self.email.clone(),
            cell(&self.first_name),
            cell(&self.last_name),
            cell(&self.title),
            cell(&self.company),
            cell(&self.location),
            cell(&self.linkedin_url),
        ]
    }
}

impl Entity for Lead {
    type Id = LeadId;

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
    use proptest::prelude::*;

    #[test]
    fn identity_is_case_insensitive() {
        assert_eq!(
            LeadIdentity::from_email("A@X.com"),
            LeadIdentity::from_email("  a@x.COM ")
        );
    }

    #[test]
    fn identity_rejects_unusable_emails() {
        assert!(LeadIdentity::from_email("").is_none());
        assert!(LeadIdentity::from_email("no-at-sign").is_none());
        assert!(LeadIdentity::from_email("@x.com").is_none());
        assert!(LeadIdentity::from_email("a@").is_none());
        assert!(LeadIdentity::from_email("a@b@c").is_none());
        assert!(LeadIdentity::from_email("a b@c.com").is_none());
    }

    #[test]
    fn lead_keeps_provider_spelling_and_row_order() {
        let record = ProspectRecord {
            email: Some(" Ada@Example.com".to_string()),
            first_name: Some("Ada".to_string()),
            company: Some("Analytical".to_string()),
            ..Default::default()
        };
        let lead = Lead::from_prospect(TenantId::new(), CampaignId::new(), record, Utc::now())
            .unwrap();

        assert_eq!(lead.email, "Ada@Example.com");
        assert_eq!(lead.identity.as_str(), "ada@example.com");

        let row = lead.to_row();
        assert_eq!(row.len(), SHEET_HEADER.len());
        assert_eq!(row[0], "Ada@Example.com");
        assert_eq!(row[1], "Ada");
        assert_eq!(row[4], "Analytical");
        assert_eq!(row[2], "");
    }

    #[test]
    fn prospect_without_email_is_not_a_lead() {
        let record = ProspectRecord {
            first_name: Some("Nobody".to_string()),
            ..Default::default()
        };
        assert!(Lead::from_prospect(TenantId::new(), CampaignId::new(), record, Utc::now()).is_none());
    }

    proptest! {
        /// Case changes and surrounding whitespace never produce a new identity.
        #[test]
        fn normalization_is_stable(local in "[a-zA-Z0-9._]{1,12}", domain in "[a-zA-Z0-9]{1,10}\\.[a-z]{2,4}") {
            let raw = format!("{local}@{domain}");
            let upper = format!("  {}  ", raw.to_uppercase());

            let a = LeadIdentity::from_email(&raw).unwrap();
            let b = LeadIdentity::from_email(&upper).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(LeadIdentity::from_email(a.as_str()).unwrap(), a);
        }
    }
}
