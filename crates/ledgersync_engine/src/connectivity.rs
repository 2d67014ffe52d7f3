//! Online/offline tracking.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// A connectivity change reported by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The host regained network access.
    Online,
    /// The host lost network access.
    Offline,
}

/// Tracks whether the backend is believed to be reachable.
///
/// The flag is seeded from the host's connectivity state at startup and
/// updated from host events and from connectivity failures seen during
/// sync passes. Subscribers (the sync worker, UI indicators) receive every
/// change through a [`watch`] channel; the worker starts a pass on each
/// offline → online transition.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the host's current connectivity state.
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            online: Arc::new(online),
        }
    }

    /// Returns the current connectivity flag.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Applies a host connectivity event. Returns true if the flag changed.
    pub fn handle(&self, event: ConnectivityEvent) -> bool {
        self.set_online(event == ConnectivityEvent::Online)
    }

    /// Sets the connectivity flag. Returns true if it changed.
    ///
    /// Repeating the current state does not notify subscribers, so a
    /// duplicated "online" event cannot schedule a second pass.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Returns a receiver notified on every change of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
