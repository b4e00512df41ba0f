//! Entity trait: identity + continuity across state changes.

use crate::id::TenantId;

/// Entity marker + minimal interface.
///
/// Every persisted row in the outreach domain is tenant-owned, so the tenant is
/// part of the contract: stores use it to enforce tenant isolation on reads.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Returns the owning tenant.
    fn tenant_id(&self) -> TenantId;
}
