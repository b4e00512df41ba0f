//! Infrastructure layer: row stores, rate limiting, external service
//! contracts, background workers and configuration.

pub mod clock;
pub mod config;
pub mod external;
pub mod jobs;
pub mod rate_limit;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LeadflowConfig};
pub use jobs::{
    ActionOutcome, CampaignJobOrchestrator, CampaignRunOutcome, DispatchOutcome, EmailDispatchWorker, WorkerPool,
    WorkerPoolHandle,
};
pub use rate_limit::{Admission, FixedWindowRateLimiter, RateKey, RateLimitConfig, RateLimitError, RateLimiter};
pub use store::StoreError;
