//! `leadflow-core`: shared building blocks for the outreach domain.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AttemptId, CampaignId, CampaignJobId, EmailJobId, LeadId, MailAccountId, TenantId,
};
