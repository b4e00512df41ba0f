//! Deterministic idempotency keys for campaign job creation.
//!
//! Repeated creation requests for the same logical unit of work must collapse
//! onto the existing job row, so the key is a pure function of
//! `(campaign_id, phase)`: a UUIDv5 in a fixed namespace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadflow_core::CampaignId;

/// Namespace for campaign job keys. Must never change: existing rows are keyed by it.
const CAMPAIGN_JOB_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a5e_7d3b_5c41_9e0a_8b2f_4d6c_1a39);

/// Phase of campaign work a job row represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// The campaign's lead fetch + export run.
    Initial,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Initial => "initial",
        }
    }
}

/// Key identifying one logical campaign job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn derive(campaign_id: CampaignId, phase: JobPhase) -> Self {
        let name = format!("{}:{}", campaign_id, phase.as_str());
        Self(Uuid::new_v5(&CAMPAIGN_JOB_NAMESPACE, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn different_campaigns_get_different_keys() {
        let a = IdempotencyKey::derive(CampaignId::new(), JobPhase::Initial);
        let b = IdempotencyKey::derive(CampaignId::new(), JobPhase::Initial);
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let key = IdempotencyKey::derive(CampaignId::new(), JobPhase::Initial);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(raw in any::<u128>()) {
            let campaign_id = CampaignId::from_uuid(Uuid::from_u128(raw));
            prop_assert_eq!(
                IdempotencyKey::derive(campaign_id, JobPhase::Initial),
                IdempotencyKey::derive(campaign_id, JobPhase::Initial)
            );
        }
    }
}
