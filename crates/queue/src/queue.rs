//! Queue abstraction for job-start notifications (mechanics only).
//!
//! Delivery is **at-least-once** with **no ordering guarantee**: a notification
//! may arrive twice, late, or after a newer one for the same job. Consumers
//! must treat every delivery as a hint and re-read the job row before acting.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::notification::JobNotification;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// All consumers are gone.
    #[error("queue closed")]
    Closed,

    /// Delayed delivery needs a running tokio runtime.
    #[error("delayed enqueue requires a tokio runtime")]
    NoRuntime,
}

/// Receiving end of a queue. Competing consumers share one subscription
/// behind a worker pool; each notification goes to exactly one `recv` call.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<JobNotification>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<JobNotification>) -> Self {
        Self { receiver }
    }

    /// Wait for the next notification. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<JobNotification> {
        self.receiver.recv().await
    }

    /// Take a notification if one is immediately available.
    pub fn try_recv(&mut self) -> Option<JobNotification> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently queued (test/inspection helper).
    pub fn drain(&mut self) -> Vec<JobNotification> {
        let mut out = Vec::new();
        while let Some(n) = self.try_recv() {
            out.push(n);
        }
        out
    }
}

/// Producer side of the notification queue.
pub trait JobQueue: Send + Sync {
    /// Deliver as soon as possible.
    fn enqueue(&self, notification: JobNotification) -> Result<(), QueueError>;

    /// Deliver no earlier than `delay` from now. Used to reschedule instead of
    /// blocking a worker slot.
    fn enqueue_after(&self, notification: JobNotification, delay: Duration) -> Result<(), QueueError>;
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn enqueue(&self, notification: JobNotification) -> Result<(), QueueError> {
        (**self).enqueue(notification)
    }

    fn enqueue_after(&self, notification: JobNotification, delay: Duration) -> Result<(), QueueError> {
        (**self).enqueue_after(notification, delay)
    }
}
