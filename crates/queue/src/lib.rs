//! Job-start notifications and the at-least-once queue they travel on.

pub mod in_memory;
pub mod notification;
pub mod queue;

pub use in_memory::InMemoryJobQueue;
pub use notification::{JobNotification, JobType};
pub use queue::{JobQueue, QueueError, Subscription};
