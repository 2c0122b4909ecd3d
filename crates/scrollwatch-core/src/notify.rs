//! Block/unblock notification fan-out

use scrollwatch_api::{PageSignal, SubscriberScope};
use scrollwatch_util::Domain;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of buffered notifications per subscriber
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// A domain changed blocking state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub domain: Domain,
    pub signal: PageSignal,
}

/// Best-effort publisher of [`Notification`]s.
///
/// Delivery is at most once: a subscriber that falls behind skips what it
/// missed and is expected to re-check status.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn notify(&self, domain: Domain, signal: PageSignal) {
        let notification = Notification { domain, signal };
        match self.tx.send(notification) {
            Ok(receivers) => debug!(receivers, "Notification published"),
            Err(broadcast::error::SendError(n)) => {
                debug!(domain = %n.domain, signal = ?n.signal, "No subscribers for notification")
            }
        }
    }

    pub fn subscribe(&self, scope: SubscriberScope) -> Subscription {
        Subscription {
            scope,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_CAPACITY)
    }
}

/// Receiving end filtered by scope
#[derive(Debug)]
pub struct Subscription {
    scope: SubscriberScope,
    rx: broadcast::Receiver<Notification>,
}

impl Subscription {
    pub fn scope(&self) -> &SubscriberScope {
        &self.scope
    }

    /// Next notification in scope; `None` once the notifier is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.scope.matches(&n.domain) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued notification in scope, if any
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(n) if self.scope.matches(&n.domain) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, notifications dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
