//! Feedreel Core - Feed Playback Library
//!
//! This crate provides the playback session controller for a scrolling
//! video feed:
//! - Catalog fetching, parsing, and offline fallback
//! - Source selection with wraparound navigation
//! - Adaptive (HLS/DASH) and direct (progressive file) backends
//! - Load timeouts, exponential backoff, and per-session blacklisting
//! - Network-aware timeouts and next-source preloading
//! - Write-through persistence of position, history, and preferences
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Feedreel Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Catalog    │  │   Network    │  │    Retry     │           │
//! │  │   Source     │  │   Monitor    │  │   Policy     │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │ Controller  │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │    Media     │  │    Event    │  │  Failure /   │            │
//! │  │   Backends   │  │   Emitter   │  │  Validation  │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod catalog;
pub mod store;
pub mod backend;
pub mod network;
pub mod cache;
pub mod retry;
pub mod preload;
pub mod events;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{CatalogError, Error, MediaLoadError, NotFoundError, Result, StoreError};
pub use types::*;
pub use catalog::{parse_catalog, CatalogSource, HttpCatalogSource};
pub use store::{JsonFileStore, MemoryStore, PersistentStore, SessionStore, WatchHistory};
pub use backend::{
    AdaptiveBackend, BackendFactory, BackendKind, DirectBackend, HostBackendFactory,
    MediaBackend, MediaHost,
};
pub use network::NetworkMonitor;
pub use cache::{FailureCache, HttpProbe, ReachabilityProbe, ValidationCache};
pub use retry::{RetryDecision, RetryPolicy};
pub use preload::Preloader;
pub use events::{EventRecord, Notice, SessionEvent};
pub use session::{Command, PlaybackController, SessionBuilder, SessionHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Feedreel Core initialized");
}
