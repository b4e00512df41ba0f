use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::{DomainError, DomainResult, Entity, MailAccountId, TenantId};

/// Per-tenant OAuth-backed sender identity.
///
/// A tenant has at most one *active* account; reconnecting a mailbox creates a
/// new account and deactivates the previous one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailChannelAccount {
    id: MailAccountId,
    tenant_id: TenantId,
    pub sender_email: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    active: bool,
    pub updated_at: DateTime<Utc>,
}

impl MailChannelAccount {
    pub fn connect(
        tenant_id: TenantId,
        sender_email: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let refresh_token = refresh_token.into();
        if refresh_token.is_empty() {
            return Err(DomainError::validation("mail account requires a refresh token"));
        }
        Ok(Self {
            id: MailAccountId::new(),
            tenant_id,
            sender_email: sender_email.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            active: true,
            updated_at: now,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True when the access token is expired or will expire within `skew`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }

    /// Store a freshly issued access token. Providers may rotate the refresh token.
    pub fn apply_refresh(
        &mut self,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        rotated_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.access_token = access_token.into();
        self.expires_at = expires_at;
        if let Some(token) = rotated_refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = token;
        }
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
    }
}

// Tokens never reach logs.
impl core::fmt::Debug for MailChannelAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MailChannelAccount")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("sender_email", &self.sender_email)
            .field("expires_at", &self.expires_at)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Entity for MailChannelAccount {
    type Id = MailAccountId;

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

    fn account(expires_in: Duration) -> MailChannelAccount {
        let now = Utc::now();
        MailChannelAccount::connect(
            TenantId::new(),
            "sales@example.com",
            "access-1",
            "refresh-1",
            now + expires_in,
            now,
        )
        .unwrap()
    }

    #[test]
    fn refresh_needed_inside_skew_window() {
        let now = Utc::now();
        assert!(account(Duration::minutes(2)).needs_refresh(now, Duration::minutes(5)));
        assert!(account(Duration::minutes(-1)).needs_refresh(now, Duration::zero()));
        assert!(!account(Duration::hours(1)).needs_refresh(now, Duration::minutes(5)));
    }

    #[test]
    fn apply_refresh_keeps_refresh_token_unless_rotated() {
        let mut acc = account(Duration::zero());
        let later = Utc::now() + Duration::hours(1);

        acc.apply_refresh("access-2", later, None, Utc::now());
        assert_eq!(acc.access_token(), "access-2");
        assert_eq!(acc.refresh_token(), "refresh-1");
        assert_eq!(acc.expires_at(), later);

        acc.apply_refresh("access-3", later, Some("refresh-2".to_string()), Utc::now());
        assert_eq!(acc.refresh_token(), "refresh-2");
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let acc = account(Duration::hours(1));
        let rendered = format!("{acc:?}");
        assert!(!rendered.contains("access-1"));
        assert!(!rendered.contains("refresh-1"));
        assert!(rendered.contains("sales@example.com"));
    }

    #[test]
    fn connect_requires_refresh_token() {
        let now = Utc::now();
        let err = MailChannelAccount::connect(TenantId::new(), "a@b.c", "x", "", now, now);
        assert!(err.is_err());
    }
}
