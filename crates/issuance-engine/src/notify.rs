//! Notification fan-out
//!
//! Dispatch never blocks the caller and never fails it: events go onto a
//! broadcast channel (for the SSE stream) and each registered [`Notifier`]
//! receives them on its own spawned task.

use crate::error::NotifyError;
use async_trait::async_trait;
use issuance_types::EngineEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A downstream notification channel (email, chat, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs
    fn channel(&self) -> &'static str;

    async fn deliver(&self, event: &EngineEvent) -> Result<(), NotifyError>;
}

/// Notifier that writes events to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &EngineEvent) -> Result<(), NotifyError> {
        tracing::info!(event = event.name(), payload = ?event, "Notification");
        Ok(())
    }
}

/// Broadcasts engine events and forwards them to registered notifiers.
#[derive(Clone)]
pub struct NotificationHub {
    event_tx: broadcast::Sender<EngineEvent>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            event_tx,
            notifiers: Arc::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        Arc::make_mut(&mut self.notifiers).push(notifier);
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Fire-and-forget dispatch
    pub fn dispatch(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event.clone());

        for notifier in self.notifiers.iter() {
            let notifier = Arc::clone(notifier);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.deliver(&event).await {
                    tracing::warn!(
                        channel = notifier.channel(),
                        event = event.name(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            });
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("notifiers", &self.notifiers.len())
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn channel(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _event: &EngineEvent) -> Result<(), NotifyError> {
            Err(NotifyError {
                channel: "failing",
                message: "smtp down".into(),
            })
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        fn channel(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &EngineEvent) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn low_balance() -> EngineEvent {
        EngineEvent::BalanceLow {
            account_id: "0.0.1001".into(),
            balance: 1,
            threshold: 5,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events_despite_failing_notifier() {
        let counting = Arc::new(Counting::default());
        let hub = NotificationHub::new(16)
            .with_notifier(Arc::new(Failing))
            .with_notifier(counting.clone());
        let mut rx = hub.subscribe();

        hub.dispatch(low_balance());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "balance_low");

        for _ in 0..50 {
            if counting.0.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_fine() {
        NotificationHub::default().dispatch(low_balance());
    }
}
