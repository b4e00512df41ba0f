//! Contracts for the third-party services the workers call.
//!
//! Real HTTP clients live outside this crate. The `InMemory*` types are
//! scriptable fakes used by tests and local runs.

mod mail;
mod provider;
mod sheets;

pub use mail::{InMemoryMailChannel, MailChannel, MailChannelError, SentMessage, TokenGrant};
pub use provider::{InMemoryLeadProvider, LeadPage, LeadProvider, PageRequest, ProviderError};
pub use sheets::{InMemorySpreadsheetSink, SinkError, SpreadsheetSink};
