use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use leadflow_core::{Entity, MailAccountId};
use leadflow_mailing::{MailChannelAccount, OutboundMessage};

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailChannelError {
    /// Refresh token revoked or expired; the user must reconnect.
    #[error("mail channel authorization revoked: {0}")]
    Unauthorized(String),
    /// The provider refused this message.
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("mail channel unavailable: {0}")]
    Transient(String),
}

/// Fresh credentials issued by a token refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Some providers rotate the refresh token on use.
    pub refresh_token: Option<String>,
}

/// Per-tenant mailbox connection.
#[async_trait]
pub trait MailChannel: Send + Sync {
    /// Exchange the account's refresh token for a new access token.
    async fn refresh(&self, account: &MailChannelAccount) -> Result<TokenGrant, MailChannelError>;

    /// Send one message; returns the provider's message id.
    async fn send(
        &self,
        account: &MailChannelAccount,
        message: &OutboundMessage,
    ) -> Result<String, MailChannelError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub account_id: MailAccountId,
    /// Access token the send was authorized with.
    pub access_token: String,
    pub message: OutboundMessage,
    pub message_id: String,
}

#[derive(Debug, Default)]
struct ChannelState {
    sent: Vec<SentMessage>,
    send_failures: VecDeque<MailChannelError>,
    refresh_failure: Option<MailChannelError>,
    refreshes: usize,
}

/// Records sends; refresh and send can be scripted to fail.
pub struct InMemoryMailChannel {
    state: Mutex<ChannelState>,
    token_ttl: chrono::Duration,
    latency: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl InMemoryMailChannel {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            token_ttl: chrono::Duration::hours(1),
            latency: None,
            clock,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next send with `error`.
    pub fn fail_next_send(&self, error: MailChannelError) {
        self.lock().send_failures.push_back(error);
    }

    /// Fail every refresh until cleared with `None`.
    pub fn set_refresh_failure(&self, error: Option<MailChannelError>) {
        self.lock().refresh_failure = error;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn refreshes(&self) -> usize {
        self.lock().refreshes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for InMemoryMailChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailChannel for InMemoryMailChannel {
    async fn refresh(&self, _account: &MailChannelAccount) -> Result<TokenGrant, MailChannelError> {
        let mut state = self.lock();
        if let Some(err) = state.refresh_failure.clone() {
            return Err(err);
        }
        state.refreshes += 1;
        Ok(TokenGrant {
            access_token: format!("access-{}", state.refreshes),
            expires_at: self.clock.now() + self.token_ttl,
            refresh_token: None,
        })
    }

    async fn send(
        &self,
        account: &MailChannelAccount,
        message: &OutboundMessage,
    ) -> Result<String, MailChannelError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        let message_id = format!("msg-{}", state.sent.len() + 1);
        state.sent.push(SentMessage {
            account_id: *account.id(),
            access_token: account.access_token().to_string(),
            message: message.clone(),
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::TenantId;

    #[tokio::test]
    async fn refresh_issues_new_token_until_revoked() {
        let channel = InMemoryMailChannel::new();
        let now = Utc::now();
        let account =
            MailChannelAccount::connect(TenantId::new(), "me@x.com", "at", "rt", now, now).unwrap();

        let grant = channel.refresh(&account).await.unwrap();
        assert_eq!(grant.access_token, "access-1");
        assert!(grant.expires_at > now);

        channel.set_refresh_failure(Some(MailChannelError::Unauthorized("revoked".into())));
        assert!(channel.refresh(&account).await.is_err());
        assert_eq!(channel.refreshes(), 1);
    }
}
