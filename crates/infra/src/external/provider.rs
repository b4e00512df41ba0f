use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use leadflow_campaigns::{LeadCriteria, ProspectRecord};

/// Zero-based page index plus page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub index: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPage {
    pub leads: Vec<ProspectRecord>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials rejected or revoked. Retrying cannot help.
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("provider request failed: {0}")]
    Transient(String),
}

/// Lead-search provider: `search(filters, page) -> { leads, has_more }`.
#[async_trait]
pub trait LeadProvider: Send + Sync {
    async fn search(&self, criteria: &LeadCriteria, page: PageRequest) -> Result<LeadPage, ProviderError>;
}

/// Serves fixed pages; individual pages can be scripted to fail first.
#[derive(Debug, Default)]
pub struct InMemoryLeadProvider {
    pages: Vec<Vec<ProspectRecord>>,
    failures: Mutex<HashMap<u32, VecDeque<ProviderError>>>,
    latency: Option<Duration>,
    calls: Mutex<Vec<PageRequest>>,
}

impl InMemoryLeadProvider {
    pub fn new(pages: Vec<Vec<ProspectRecord>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// Queue an error returned by the next request for `index`.
    pub fn fail_page(self, index: u32, error: ProviderError) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(index)
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl LeadProvider for InMemoryLeadProvider {
    async fn search(&self, _criteria: &LeadCriteria, page: PageRequest) -> Result<LeadPage, ProviderError> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(page);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&page.index)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        let index = page.index as usize;
        Ok(LeadPage {
            leads: self.pages.get(index).cloned().unwrap_or_default(),
            has_more: index + 1 < self.pages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failure_is_served_once() {
        let provider = InMemoryLeadProvider::new(vec![vec![ProspectRecord::with_email("a@x.com")]])
            .fail_page(0, ProviderError::Transient("503".into()));
        let req = PageRequest { index: 0, size: 25 };

        assert!(provider.search(&LeadCriteria::default(), req).await.is_err());
        let page = provider.search(&LeadCriteria::default(), req).await.unwrap();
        assert_eq!(page.leads.len(), 1);
        assert!(!page.has_more);
        assert_eq!(provider.calls().len(), 2);
    }
}
