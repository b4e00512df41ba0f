//! In-memory notification queue for tests/dev.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::notification::JobNotification;
use crate::queue::{JobQueue, QueueError, Subscription};

/// Unbounded in-process queue.
///
/// - No persistence: a process restart loses queued notifications (job rows
///   are the source of truth, a sweeper can re-notify PENDING rows)
/// - Delayed delivery is a detached tokio timer per notification
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    sender: mpsc::UnboundedSender<JobNotification>,
}

impl InMemoryJobQueue {
    /// Create a queue together with its single consuming subscription.
    pub fn channel() -> (Self, Subscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, Subscription::new(receiver))
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, notification: JobNotification) -> Result<(), QueueError> {
        trace!(job_type = %notification.job_type, job_id = %notification.job_id, "enqueue");
        self.sender.send(notification).map_err(|_| QueueError::Closed)
    }

    fn enqueue_after(&self, notification: JobNotification, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.enqueue(notification);
        }
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let sender = self.sender.clone();
        trace!(
            job_type = %notification.job_type,
            job_id = %notification.job_id,
            delay_ms = delay.as_millis() as u64,
            "enqueue delayed"
        );
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means shutdown; the row stays PENDING for the next start.
            let _ = sender.send(notification);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::{CampaignJobId, EmailJobId};

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let (queue, mut sub) = InMemoryJobQueue::channel();
        let a = JobNotification::campaign(CampaignJobId::new());
        let b = JobNotification::email(EmailJobId::new());

        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        assert_eq!(sub.recv().await, Some(a));
        assert_eq!(sub.recv().await, Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_notification_arrives_after_delay() {
        let (queue, mut sub) = InMemoryJobQueue::channel();
        let n = JobNotification::email(EmailJobId::new());

        queue.enqueue_after(n, Duration::from_secs(30)).unwrap();
        tokio::task::yield_now().await;
        assert!(sub.try_recv().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(sub.recv().await, Some(n));
    }

    #[test]
    fn delayed_enqueue_outside_runtime_is_an_error() {
        let (queue, _sub) = InMemoryJobQueue::channel();
        let n = JobNotification::email(EmailJobId::new());
        assert_eq!(
            queue.enqueue_after(n, Duration::from_secs(1)),
            Err(QueueError::NoRuntime)
        );
    }

    #[test]
    fn enqueue_after_consumer_dropped_reports_closed() {
        let (queue, sub) = InMemoryJobQueue::channel();
        drop(sub);
        assert_eq!(
            queue.enqueue(JobNotification::campaign(CampaignJobId::new())),
            Err(QueueError::Closed)
        );
    }
}
