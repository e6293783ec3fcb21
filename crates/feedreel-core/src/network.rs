//! Connectivity and link-quality tracking
//!
//! The monitor is the only writer of [`NetworkState`]. Sessions hold a
//! `watch` receiver and react to snapshots; they never write back.

use crate::types::*;
use tokio::sync::watch;
use tracing::info;

/// Publishes connectivity changes to any number of sessions
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Current snapshot
    pub fn state(&self) -> NetworkState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.update(|state| state.online = online);
    }

    /// Apply a link-type hint such as `4g` or `slow-2g`
    pub fn update_link_type(&self, effective_type: &str) {
        let quality = NetworkQuality::from_effective_type(effective_type);
        self.update(|state| state.quality = quality);
    }

    pub fn set_quality(&self, quality: NetworkQuality) {
        self.update(|state| state.quality = quality);
    }

    fn update(&self, apply: impl FnOnce(&mut NetworkState)) {
        self.tx.send_if_modified(|state| {
            let before = *state;
            apply(state);
            if *state != before {
                info!(online = state.online, quality = %state.quality, "Network state changed");
                true
            } else {
                false
            }
        });
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkState::default())
    }
}
