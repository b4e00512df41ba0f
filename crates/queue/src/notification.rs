use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadflow_core::{CampaignJobId, EmailJobId};

/// Which worker a notification is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Campaign,
    Email,
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobType::Campaign => f.write_str("campaign"),
            JobType::Email => f.write_str("email"),
        }
    }
}

/// Job-start notification.
///
/// Carries nothing but the job identifier: handlers re-read all state from
/// storage, which is what makes redelivery harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNotification {
    pub job_type: JobType,
    pub job_id: Uuid,
}

impl JobNotification {
    pub fn campaign(job_id: CampaignJobId) -> Self {
        Self {
            job_type: JobType::Campaign,
            job_id: job_id.into(),
        }
    }

    pub fn email(job_id: EmailJobId) -> Self {
        Self {
            job_type: JobType::Email,
            job_id: job_id.into(),
        }
    }

    pub fn campaign_job_id(&self) -> Option<CampaignJobId> {
        (self.job_type == JobType::Campaign).then(|| CampaignJobId::from_uuid(self.job_id))
    }

    pub fn email_job_id(&self) -> Option<EmailJobId> {
        (self.job_type == JobType::Email).then(|| EmailJobId::from_uuid(self.job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let id = EmailJobId::new();
        let json = serde_json::to_value(JobNotification::email(id)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "jobType": "email", "jobId": id.to_string() })
        );
    }

    #[test]
    fn typed_accessors_respect_job_type() {
        let n = JobNotification::campaign(CampaignJobId::new());
        assert!(n.campaign_job_id().is_some());
        assert!(n.email_job_id().is_none());
    }
}
