//! Session event emission
//!
//! The controller never renders anything. It publishes state changes and
//! user-facing notices; a view layer subscribes and draws them.

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Transient user-facing messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    /// A load failed and will be re-attempted
    Retrying { attempt: u32, max: u32 },
    /// The current source gave up; moving on
    LoadFailed { id: String },
    /// Connectivity lost while loading
    NoNetwork,
    /// Catalog fetch failed, playing from the cached copy
    ServingCachedCatalog,
    /// Catalog fetch failed and nothing is cached
    CatalogUnavailable,
    /// Jump target does not exist
    NotFound { id: String },
    /// Every source in the catalog has failed
    NoPlayableContent,
    /// Catalog is being refetched
    Reloading,
}

impl Notice {
    /// Terminal notices stay up until something replaces them
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            Notice::NoNetwork | Notice::CatalogUnavailable | Notice::NoPlayableContent
        )
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Retrying { attempt, max } => write!(f, "Retrying... ({}/{})", attempt, max),
            Notice::LoadFailed { id } => {
                write!(f, "Could not load video #{}. Skipping to the next one...", id)
            }
            Notice::NoNetwork => write!(f, "No network connection. Reconnecting..."),
            Notice::ServingCachedCatalog => {
                write!(f, "Using saved data. Some videos may be out of date.")
            }
            Notice::CatalogUnavailable => write!(
                f,
                "Could not load the video list. Check your connection and try again."
            ),
            Notice::NotFound { id } => write!(f, "No video with ID #{}", id),
            Notice::NoPlayableContent => write!(f, "No playable videos. Reload to try again."),
            Notice::Reloading => write!(f, "Reloading video list..."),
        }
    }
}

/// Events published by a playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Catalog replaced
    CatalogLoaded { entries: usize, from_cache: bool },

    /// Status transition
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
        index: usize,
    },

    /// A new entry was selected
    IndexChanged {
        index: usize,
        id: String,
        direction: Direction,
    },

    /// Next entry is being warmed up
    Preloading { index: usize, url: String },

    /// Source gave up and was blacklisted
    Blacklisted { url: String },

    /// Show a notice
    Notice(Notice),

    /// Hide the current notice
    NoticeDismissed,

    /// Mute preference changed
    MuteChanged { muted: bool },
}

/// Event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Broadcasts session events to any number of subscribers.
///
/// Emitting never blocks; with no subscribers events are dropped and slow
/// subscribers observe `Lagged`.
#[derive(Debug)]
pub struct EventEmitter {
    session_id: SessionId,
    sequence: AtomicU64,
    tx: broadcast::Sender<EventRecord>,
}

impl EventEmitter {
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            session_id,
            sequence: AtomicU64::new(0),
            tx,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(sequence, event = ?event, "Session event");
        let _ = self.tx.send(EventRecord {
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence,
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<EventRecord> {
        self.tx.clone()
    }
}
