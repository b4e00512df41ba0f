use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use leadflow_campaigns::SheetDestination;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The connected account lacks write scope on the destination.
    #[error("insufficient write scope: {0}")]
    InsufficientScope(String),
    #[error("spreadsheet append failed: {0}")]
    Transient(String),
}

/// Spreadsheet sink: `append_rows(destination, rows)`.
#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    async fn append_rows(&self, destination: &SheetDestination, rows: Vec<Vec<String>>) -> Result<(), SinkError>;
}

#[derive(Debug, Default)]
struct SinkState {
    calls: usize,
    failures: HashMap<usize, SinkError>,
    rows: HashMap<(String, String), Vec<Vec<String>>>,
}

/// Records appended rows per sheet; individual calls can be scripted to fail.
#[derive(Debug, Default)]
pub struct InMemorySpreadsheetSink {
    state: Mutex<SinkState>,
}

impl InMemorySpreadsheetSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th append (1-based, across all sheets) fail.
    pub fn fail_call(self, call: usize, error: SinkError) -> Self {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .failures
            .insert(call, error);
        self
    }

    pub fn rows(&self, destination: &SheetDestination) -> Vec<Vec<String>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .rows
            .get(&sheet_key(destination))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).calls
    }
}

fn sheet_key(destination: &SheetDestination) -> (String, String) {
    (destination.spreadsheet_id.clone(), destination.sheet_name.clone())
}

#[async_trait]
impl SpreadsheetSink for InMemorySpreadsheetSink {
    async fn append_rows(&self, destination: &SheetDestination, rows: Vec<Vec<String>>) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.calls += 1;
        let call = state.calls;
        if let Some(err) = state.failures.remove(&call) {
            return Err(err);
        }
        state.rows.entry(sheet_key(destination)).or_default().extend(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_call_appends_nothing() {
        let sink = InMemorySpreadsheetSink::new().fail_call(2, SinkError::Transient("500".into()));
        let dest = SheetDestination::new("s1", "Leads");

        sink.append_rows(&dest, vec![vec!["a".into()]]).await.unwrap();
        assert!(sink.append_rows(&dest, vec![vec!["b".into()]]).await.is_err());
        sink.append_rows(&dest, vec![vec!["c".into()]]).await.unwrap();

        assert_eq!(sink.rows(&dest), vec![vec!["a".to_string()], vec!["c".to_string()]]);
        assert_eq!(sink.calls(), 3);
    }
}
