//! Connectivity tracking.
//!
//! The monitor only reports edges. Repeating the current state is a no-op, so
//! each online/offline transition reaches every subscriber exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{Error, Result};

const CHANNEL_CAPACITY: usize = 16;
const PROBE_TIMEOUT_SECS: u64 = 5;

/// Connectivity state reported by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub const fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Tracks whether the device can reach the network.
#[derive(Debug)]
pub struct NetworkMonitor {
    online: AtomicBool,
    // Held across swap and send so transitions are broadcast in the order they happen.
    transition: Mutex<()>,
    sender: broadcast::Sender<Connectivity>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            transition: Mutex::new(()),
            sender,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn connectivity(&self) -> Connectivity {
        Connectivity::from_online(self.is_online())
    }

    /// Report the current platform signal. Returns `true` when it changed the state.
    pub fn set_online(&self, online: bool) -> bool {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        if online {
            tracing::info!("Network connectivity restored");
        } else {
            tracing::warn!("Network connectivity lost; working offline");
        }
        // No receivers is fine; nobody is listening yet.
        let _ = self.sender.send(Connectivity::from_online(online));
        true
    }

    /// Listen for transitions. Dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Poll `url` with `HEAD` every `every` and feed the result into [`Self::set_online`].
    ///
    /// Any HTTP response counts as online; only transport failures count as offline.
    pub fn spawn_probe(self: &Arc<Self>, url: impl Into<String>, every: Duration) -> Result<JoinHandle<()>> {
        let url = url.into();
        if !crate::util::is_http_url(&url) {
            return Err(Error::InvalidInput(format!(
                "probe url must include http:// or https://, got '{url}'"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build probe client: {error}")))?;
        let monitor = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = match client.head(&url).send().await {
                    Ok(_) => true,
                    Err(error) => {
                        tracing::debug!("Connectivity probe to {url} failed: {error}");
                        false
                    }
                };
                monitor.set_online(reachable);
            }
        }))
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Receiving end of connectivity transitions
#[derive(Debug)]
pub struct ConnectivitySubscription {
    receiver: broadcast::Receiver<Connectivity>,
}

impl ConnectivitySubscription {
    /// Wait for the next transition. `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<Connectivity> {
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Connectivity listener skipped {skipped} stale transitions");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next transition if one is already waiting
    pub fn try_next(&mut self) -> Option<Connectivity> {
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_signals_are_not_transitions() {
        let monitor = NetworkMonitor::new(false);
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
    }

    #[test]
    fn each_subscriber_sees_each_transition_once() {
        let monitor = NetworkMonitor::new(true);
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(false);
        monitor.set_online(true);

        for subscription in [&mut first, &mut second] {
            assert_eq!(subscription.try_next(), Some(Connectivity::Offline));
            assert_eq!(subscription.try_next(), Some(Connectivity::Online));
            assert_eq!(subscription.try_next(), None);
        }
    }

    #[test]
    fn concurrent_signals_leave_the_last_broadcast_matching_the_state() {
        for _ in 0..20 {
            let monitor = NetworkMonitor::new(false);
            let mut subscription = monitor.subscribe();

            std::thread::scope(|scope| {
                for worker in 0..4 {
                    let monitor = &monitor;
                    scope.spawn(move || {
                        for step in 0..200 {
                            monitor.set_online((worker + step) % 2 == 0);
                        }
                    });
                }
            });

            let mut last = None;
            while let Some(state) = subscription.try_next() {
                last = Some(state);
            }
            if let Some(last) = last {
                assert_eq!(last, monitor.connectivity());
            }
        }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let monitor = NetworkMonitor::default();
        let subscription = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(monitor.subscriber_count(), 0);
        assert!(monitor.set_online(false));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_waits_for_transition() {
        let monitor = Arc::new(NetworkMonitor::new(false));
        let mut subscription = monitor.subscribe();

        let signaller = Arc::clone(&monitor);
        tokio::spawn(async move {
            signaller.set_online(true);
        });

        assert_eq!(subscription.next().await, Some(Connectivity::Online));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_rejects_non_http_url() {
        let monitor = Arc::new(NetworkMonitor::default());
        assert!(monitor
            .spawn_probe("example.com", Duration::from_secs(1))
            .is_err());
    }
}
