use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use leadflow_core::{Entity, MailAccountId, TenantId};
use leadflow_mailing::MailChannelAccount;

use super::{StoreError, read, write};

/// Mail channel accounts; at most one active per tenant.
pub trait MailAccountStore: Send + Sync {
    /// Store a newly connected account and deactivate the tenant's previous one.
    fn connect(&self, account: MailChannelAccount, now: DateTime<Utc>) -> Result<(), StoreError>;

    fn active_for_tenant(&self, tenant_id: TenantId) -> Result<Option<MailChannelAccount>, StoreError>;

    /// Persist token changes for an existing account.
    fn save(&self, account: &MailChannelAccount) -> Result<(), StoreError>;
}

/// In-memory account store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMailAccountStore {
    accounts: RwLock<HashMap<MailAccountId, MailChannelAccount>>,
}

impl InMemoryMailAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailAccountStore for InMemoryMailAccountStore {
    fn connect(&self, account: MailChannelAccount, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut accounts = write(&self.accounts)?;
        if accounts.contains_key(account.id()) {
            return Err(StoreError::already_exists("mail account", account.id()));
        }
        for previous in accounts
            .values_mut()
            .filter(|a| a.tenant_id() == account.tenant_id() && a.is_active())
        {
            previous.deactivate(now);
        }
        accounts.insert(*account.id(), account);
        Ok(())
    }

    fn active_for_tenant(&self, tenant_id: TenantId) -> Result<Option<MailChannelAccount>, StoreError> {
        let accounts = read(&self.accounts)?;
        Ok(accounts
            .values()
            .find(|a| a.tenant_id() == tenant_id && a.is_active())
            .cloned())
    }

    fn save(&self, account: &MailChannelAccount) -> Result<(), StoreError> {
        let mut accounts = write(&self.accounts)?;
        match accounts.get(account.id()).map(|a| a.tenant_id()) {
            Some(owner) if owner != account.tenant_id() => Err(StoreError::TenantIsolation),
            Some(_) => {
                accounts.insert(*account.id(), account.clone());
                Ok(())
            }
            None => Err(StoreError::not_found("mail account", account.id())),
        }
    }
}
