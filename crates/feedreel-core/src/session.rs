//! Playback session controller - the feed's state machine
//!
//! Coordinates:
//! - Catalog loading with cache fallback
//! - Source selection and wraparound navigation
//! - Backend preparation, load timeouts, and retry/backoff
//! - Blacklisting, auto-advance, and the all-sources-failed stop
//! - Network reactions, preloading, and write-through persistence
//!
//! The controller is the sole owner of session state. Timers, backends and
//! probes only post messages back to it; every message carries the load it
//! was issued for and is dropped once that load is no longer current.

use crate::{
    backend::{
        select_backend, BackendFactory, BackendSignal, HostBackendFactory, MediaBackend,
        MediaHost, PrepareOptions, SignalSink,
    },
    cache::{FailureCache, ReachabilityProbe, ValidationCache},
    catalog::{parse_catalog, CatalogSource},
    error::{CatalogError, MediaLoadError, NotFoundError},
    events::{EventEmitter, EventRecord, Notice, SessionEvent},
    preload::{PreloadContext, Preloader},
    retry::{load_timeout, RetryDecision, RetryPolicy},
    store::{MemoryStore, PersistentStore, SessionStore, WatchHistory},
    types::*,
    Error, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

/// Format used for watch-history timestamps
const WATCHED_AT_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKind {
    LoadTimeout,
    Backoff,
    Advance,
    ResumeSave,
    NoticeDismiss,
}

#[derive(Debug)]
enum Internal {
    Timer { kind: TimerKind, token: u64 },
    Validated { load_id: u64, reachable: bool },
}

/// Cancelable one-shot and periodic timers posting back to the controller
struct Timers {
    tx: mpsc::UnboundedSender<Internal>,
    handles: HashMap<TimerKind, AbortHandle>,
}

impl Timers {
    fn new(tx: mpsc::UnboundedSender<Internal>) -> Self {
        Self {
            tx,
            handles: HashMap::new(),
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration, token: u64) {
        self.cancel(kind);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::Timer { kind, token });
        });
        debug!(?kind, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        self.handles.insert(kind, handle.abort_handle());
    }

    fn repeat(&mut self, kind: TimerKind, period: Duration, token: u64) {
        self.cancel(kind);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if tx.send(Internal::Timer { kind, token }).is_err() {
                    break;
                }
            }
        });
        self.handles.insert(kind, handle.abort_handle());
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn is_pending(&self, kind: TimerKind) -> bool {
        self.handles
            .get(&kind)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Commands accepted by a running session
#[derive(Debug)]
pub enum Command {
    Next,
    Previous,
    JumpToId {
        id: String,
        reply: oneshot::Sender<std::result::Result<(), NotFoundError>>,
    },
    Reload {
        reply: oneshot::Sender<std::result::Result<(), CatalogError>>,
    },
    ToggleMute,
    SeekBy(f64),
    SetPlaybackRate {
        rate: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Builder wiring a controller to its collaborators
pub struct SessionBuilder {
    config: SessionConfig,
    source: Option<Arc<dyn CatalogSource>>,
    store: Option<Arc<dyn PersistentStore>>,
    network: Option<watch::Receiver<NetworkState>>,
    host: Option<Arc<dyn MediaHost>>,
    backends: Option<Arc<dyn BackendFactory>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            source: None,
            store: None,
            network: None,
            host: None,
            backends: None,
            probe: None,
        }
    }

    pub fn catalog_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn network(mut self, network: watch::Receiver<NetworkState>) -> Self {
        self.network = Some(network);
        self
    }

    /// Playback surface used for both backend variants and preloading
    pub fn host(mut self, host: Arc<dyn MediaHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Override the backend factory built from the host
    pub fn backends(mut self, backends: Arc<dyn BackendFactory>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<PlaybackController> {
        self.config.validate()?;

        let source = self
            .source
            .ok_or_else(|| Error::InvalidConfig("catalog source is required".into()))?;
        let host = self
            .host
            .ok_or_else(|| Error::InvalidConfig("media host is required".into()))?;
        if self.config.validate_sources && self.probe.is_none() {
            return Err(Error::InvalidConfig(
                "validate_sources requires a reachability probe".into(),
            ));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistentStore>);
        let network = self
            .network
            .unwrap_or_else(|| watch::channel(NetworkState::default()).1);
        let backends = self.backends.unwrap_or_else(|| {
            Arc::new(HostBackendFactory::new(host.clone())) as Arc<dyn BackendFactory>
        });
        let preloader = Preloader::new(host, self.config.preload_enabled);

        Ok(PlaybackController::new(
            self.config,
            source,
            SessionStore::new(store),
            network,
            backends,
            preloader,
            self.probe,
        ))
    }
}

/// The playback session controller
pub struct PlaybackController {
    id: SessionId,
    config: SessionConfig,
    policy: RetryPolicy,
    catalog: Catalog,
    state: SessionState,
    source: Arc<dyn CatalogSource>,
    store: SessionStore,
    network: watch::Receiver<NetworkState>,
    network_seen: NetworkState,
    network_alive: bool,
    backends: Arc<dyn BackendFactory>,
    backend: Option<Box<dyn MediaBackend>>,
    preloader: Preloader,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    failures: FailureCache,
    validation: ValidationCache,
    watch_history: WatchHistory,
    muted: bool,
    playback_rate: f64,
    notice: Option<Notice>,
    notice_seq: u64,
    load_id: u64,
    timers: Timers,
    events: EventEmitter,
    inbox_rx: mpsc::UnboundedReceiver<Internal>,
    signal_tx: mpsc::UnboundedSender<(u64, BackendSignal)>,
    signal_rx: mpsc::UnboundedReceiver<(u64, BackendSignal)>,
}

impl PlaybackController {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    fn new(
        config: SessionConfig,
        source: Arc<dyn CatalogSource>,
        store: SessionStore,
        network: watch::Receiver<NetworkState>,
        backends: Arc<dyn BackendFactory>,
        preloader: Preloader,
        probe: Option<Arc<dyn ReachabilityProbe>>,
    ) -> Self {
        let id = SessionId::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let network_seen = *network.borrow();

        Self {
            id,
            policy: RetryPolicy::from_config(&config),
            muted: store.muted(config.default_muted),
            watch_history: store.watch_history(),
            config,
            catalog: Catalog::default(),
            state: SessionState::default(),
            source,
            store,
            network,
            network_seen,
            network_alive: true,
            backends,
            backend: None,
            preloader,
            probe,
            failures: FailureCache::new(),
            validation: ValidationCache::new(),
            playback_rate: 1.0,
            notice: None,
            notice_seq: 0,
            load_id: 0,
            timers: Timers::new(inbox_tx),
            events: EventEmitter::new(id, 256),
            inbox_rx,
            signal_tx,
            signal_rx,
        }
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn current_index(&self) -> usize {
        self.state.current_index
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn failures(&self) -> &FailureCache {
        &self.failures
    }

    pub fn validation(&self) -> &ValidationCache {
        &self.validation
    }

    pub fn watch_history(&self) -> &WatchHistory {
        &self.watch_history
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Load the catalog from the store, or from the source when forced or
    /// nothing is cached. Falls back to the cached copy if the fetch fails.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn load_catalog(&mut self, force_refresh: bool) -> std::result::Result<(), CatalogError> {
        if !force_refresh {
            if let Some(cached) = self.store.catalog() {
                info!(entries = cached.len(), "Catalog loaded from store");
                self.replace_catalog(cached, true);
                return Ok(());
            }
        }

        let fetched = if self.network.borrow().online {
            match self.source.fetch().await {
                Ok(text) => parse_catalog(&text),
                Err(e) => Err(e),
            }
        } else {
            Err(CatalogError::Network("offline".into()))
        };

        match fetched {
            Ok(catalog) => {
                info!(entries = catalog.len(), "Catalog fetched");
                if let Err(e) = self.store.save_catalog(&catalog) {
                    warn!(error = %e, "Failed to cache catalog");
                }
                self.replace_catalog(catalog, false);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Catalog fetch failed");
                if let Some(cached) = self.store.catalog() {
                    self.replace_catalog(cached, true);
                    self.notify(Notice::ServingCachedCatalog, None);
                    Ok(())
                } else {
                    self.notify(Notice::CatalogUnavailable, None);
                    match e {
                        CatalogError::Empty => Err(CatalogError::Empty),
                        _ => Err(CatalogError::NoData),
                    }
                }
            }
        }
    }

    fn replace_catalog(&mut self, catalog: Catalog, from_cache: bool) {
        let entries = catalog.len();
        self.catalog = catalog;
        if self.state.current_index >= entries {
            self.state.current_index = 0;
        }
        self.events.emit(SessionEvent::CatalogLoaded {
            entries,
            from_cache,
        });
    }

    /// Load the catalog and resume where the last session stopped
    pub async fn start(&mut self) -> std::result::Result<(), CatalogError> {
        self.load_catalog(false).await?;
        self.resume_last_position();
        Ok(())
    }

    /// Select the stored index at the stored position, or the first entry
    pub fn resume_last_position(&mut self) {
        match self.store.last_index().filter(|i| *i < self.catalog.len()) {
            Some(index) => {
                let seconds = self.store.last_time_seconds();
                info!(index, seconds, "Resuming last position");
                self.select_index(index as i64, seconds, Direction::Up);
            }
            None => self.select_index(0, 0.0, Direction::Up),
        }
    }

    /// Clear caches and refetch the catalog, then resume
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn reload(&mut self) -> std::result::Result<(), CatalogError> {
        info!("Reloading catalog");
        self.validation.clear();
        self.failures.clear();
        self.state.retry_count = 0;
        self.stop_current_load();
        self.set_status(SessionStatus::Idle);
        self.notify(Notice::Reloading, None);

        self.load_catalog(true).await?;
        self.resume_last_position();
        Ok(())
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Select an entry. Ignored while a load is pending or with no catalog.
    pub fn select_index(&mut self, index: i64, resume_seconds: f64, direction: Direction) {
        if self.state.status.is_load_in_flight() {
            debug!(index, status = %self.state.status, "Selection ignored, load in flight");
            return;
        }
        let Some(requested) = self.catalog.normalize(index) else {
            debug!(index, "Selection ignored, catalog empty");
            return;
        };

        self.stop_current_load();
        self.state.retry_count = 0;
        self.state.direction = direction;

        let Some(target) = self.first_playable_from(requested) else {
            self.exhaust();
            return;
        };
        let resume_seconds = if target == requested && resume_seconds.is_finite() {
            resume_seconds.max(0.0)
        } else {
            0.0
        };

        self.state.current_index = target;
        self.state.resume_seconds = resume_seconds;
        self.persist_position(target, resume_seconds);

        let id = self.catalog.get(target).map(|e| e.id.clone()).unwrap_or_default();
        info!(index = target, id = %id, %direction, "Selected entry");
        self.events.emit(SessionEvent::IndexChanged {
            index: target,
            id,
            direction,
        });

        self.set_status(SessionStatus::Loading);
        self.start_attempt();
    }

    /// Jump to the first entry with a matching id
    pub fn jump_to_id(&mut self, raw_id: &str) -> std::result::Result<(), NotFoundError> {
        let id = raw_id.trim();
        match self.catalog.position_of(id) {
            Some(index) => {
                self.select_index(index as i64, 0.0, Direction::Up);
                Ok(())
            }
            None => {
                info!(id, "Jump target not found");
                self.notify(Notice::NotFound { id: id.to_string() }, None);
                Err(NotFoundError { id: id.to_string() })
            }
        }
    }

    pub fn advance(&mut self, direction: Direction) {
        let index = self.state.current_index as i64 + direction.offset();
        self.select_index(index, 0.0, direction);
    }

    pub fn next(&mut self) {
        self.advance(Direction::Up);
    }

    pub fn previous(&mut self) {
        self.advance(Direction::Down);
    }

    /// Skip forward past blacklisted entries. `None` after a full pass.
    fn first_playable_from(&self, start: usize) -> Option<usize> {
        let len = self.catalog.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&index| {
                self.catalog
                    .get(index)
                    .map(|entry| !self.failures.has(&entry.url))
                    .unwrap_or(false)
            })
    }

    fn exhaust(&mut self) {
        warn!(entries = self.catalog.len(), "Every source has failed");
        self.set_status(SessionStatus::Exhausted);
        self.notify(Notice::NoPlayableContent, None);
    }

    // =========================================================================
    // Load attempts
    // =========================================================================

    /// Begin one attempt on the current entry; status must already be Loading
    fn start_attempt(&mut self) {
        self.load_id += 1;
        let load_id = self.load_id;
        let Some(entry) = self.catalog.get(self.state.current_index).cloned() else {
            return;
        };

        let quality = self.network.borrow().quality;
        self.timers
            .schedule(TimerKind::LoadTimeout, load_timeout(&self.config, quality), load_id);

        if self.config.validate_sources {
            if let Some(probe) = self.probe.clone() {
                let cache = self.validation.clone();
                let first_attempt = self.state.retry_count == 0;
                let tx = self.timers.tx.clone();
                tokio::spawn(async move {
                    let reachable = if first_attempt {
                        cache.check(&entry.url, probe.as_ref()).await
                    } else {
                        cache.revalidate(&entry.url, probe.as_ref()).await
                    };
                    let _ = tx.send(Internal::Validated { load_id, reachable });
                });
                return;
            }
        }

        self.prepare_backend(&entry);
    }

    fn prepare_backend(&mut self, entry: &CatalogEntry) {
        let sink = SignalSink::new(self.load_id, self.signal_tx.clone());
        let (url, kind) = match select_backend(&entry.url) {
            Ok(selected) => selected,
            Err(e) => {
                sink.send(BackendSignal::Error(e));
                return;
            }
        };

        if self.backend.as_ref().map(|b| b.kind()) != Some(kind) {
            if let Some(mut previous) = self.backend.take() {
                previous.teardown();
            }
            self.backend = Some(self.backends.create(kind));
        }

        let options = PrepareOptions {
            resume_at: self.state.resume_seconds,
            muted: self.muted,
        };
        debug!(load_id = self.load_id, %kind, url = %url, "Preparing backend");
        if let Some(backend) = self.backend.as_mut() {
            backend.prepare(&url, options, sink);
        }
    }

    /// Cancel every per-load timer and release the backend entirely
    fn stop_current_load(&mut self) {
        self.timers.cancel(TimerKind::LoadTimeout);
        self.timers.cancel(TimerKind::Backoff);
        self.timers.cancel(TimerKind::Advance);
        self.timers.cancel(TimerKind::ResumeSave);
        if let Some(mut backend) = self.backend.take() {
            backend.teardown();
        }
        self.load_id += 1;
    }

    /// Drop the failed attachment but keep the backend for the next attempt
    fn abandon_attempt(&mut self) {
        self.timers.cancel(TimerKind::LoadTimeout);
        self.timers.cancel(TimerKind::ResumeSave);
        if let Some(backend) = self.backend.as_mut() {
            backend.teardown();
        }
        self.load_id += 1;
    }

    /// The backend can play the current source
    pub fn report_backend_ready(&mut self) {
        if !matches!(
            self.state.status,
            SessionStatus::Loading | SessionStatus::Retrying
        ) {
            debug!(status = %self.state.status, "Ready ignored");
            return;
        }

        self.timers.cancel(TimerKind::LoadTimeout);
        self.timers.cancel(TimerKind::Backoff);
        self.state.retry_count = 0;
        self.set_status(SessionStatus::Playing);
        self.dismiss_transient_notice();

        if let Some(backend) = self.backend.as_ref() {
            if self.playback_rate != 1.0 {
                backend.set_playback_rate(self.playback_rate);
            }
        }

        self.record_watched();
        self.timers.repeat(
            TimerKind::ResumeSave,
            self.config.resume_save_interval(),
            self.load_id,
        );
        self.maybe_preload();
    }

    /// A load attempt failed or timed out
    pub fn report_backend_error(&mut self, error: MediaLoadError) {
        if !matches!(
            self.state.status,
            SessionStatus::Loading | SessionStatus::Retrying | SessionStatus::Playing
        ) {
            debug!(status = %self.state.status, error = %error, "Error ignored");
            return;
        }

        if !self.network.borrow().online {
            info!(error = %error, "Load failed while offline, not counting it");
            self.go_offline();
            return;
        }

        self.abandon_attempt();
        let Some(entry) = self.catalog.get(self.state.current_index).cloned() else {
            return;
        };

        match self.policy.decide(self.state.retry_count) {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    url = %entry.url,
                    attempt,
                    max = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    code = error.error_code(),
                    "Load failed, retrying"
                );
                self.state.retry_count = attempt;
                self.set_status(SessionStatus::Retrying);
                self.notify(
                    Notice::Retrying {
                        attempt,
                        max: self.policy.max_retries,
                    },
                    None,
                );
                self.timers.schedule(TimerKind::Backoff, delay, self.load_id);
            }
            RetryDecision::GiveUp => {
                warn!(url = %entry.url, error = %error, "Retries exhausted, blacklisting source");
                self.failures.add(entry.url.clone());
                self.events.emit(SessionEvent::Blacklisted { url: entry.url });
                self.set_status(SessionStatus::Error);
                self.notify(
                    Notice::LoadFailed { id: entry.id },
                    Some(self.config.error_display()),
                );
                self.timers.schedule(
                    TimerKind::Advance,
                    self.config.error_display(),
                    self.load_id,
                );
            }
        }
    }

    /// The current source finished playing
    pub fn report_playback_ended(&mut self) {
        if self.state.status != SessionStatus::Playing {
            debug!(status = %self.state.status, "Ended ignored");
            return;
        }
        self.set_status(SessionStatus::Advancing);
        self.advance(Direction::Up);
    }

    fn go_offline(&mut self) {
        self.timers.cancel(TimerKind::Backoff);
        self.abandon_attempt();
        self.set_status(SessionStatus::Offline);
        self.notify(Notice::NoNetwork, None);
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// React to the latest network snapshot
    pub fn handle_network_change(&mut self) {
        let current = *self.network.borrow_and_update();
        let previous = std::mem::replace(&mut self.network_seen, current);

        if previous.online && !current.online {
            match self.state.status {
                SessionStatus::Loading | SessionStatus::Retrying => self.go_offline(),
                _ => self.notify(Notice::NoNetwork, None),
            }
        } else if current.online {
            // Offline may have been entered on a drop the watch never delivered
            let parked = self.state.status == SessionStatus::Offline;
            if (parked || !previous.online) && self.notice == Some(Notice::NoNetwork) {
                self.dismiss_notice();
            }
            if parked {
                info!("Back online, resuming load");
                self.set_status(SessionStatus::Loading);
                self.start_attempt();
            }
        }
    }

    // =========================================================================
    // Playback passthroughs
    // =========================================================================

    /// Flip and persist the mute preference
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if let Err(e) = self.store.save_muted(self.muted) {
            warn!(error = %e, "Failed to persist mute preference");
        }
        if let Some(backend) = self.backend.as_ref() {
            backend.set_muted(self.muted);
        }
        self.events.emit(SessionEvent::MuteChanged { muted: self.muted });
        self.muted
    }

    /// Seek relative to the current position. `None` if nothing seekable.
    pub fn seek_by(&mut self, delta_seconds: f64) -> Option<f64> {
        if !delta_seconds.is_finite() {
            return None;
        }
        let position = self.backend.as_ref()?.seek_by(delta_seconds)?;
        debug!(delta_seconds, position, "Seeked");
        Some(position)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::InvalidPlaybackRate(rate));
        }
        self.playback_rate = rate;
        if let Some(backend) = self.backend.as_ref() {
            backend.set_playback_rate(rate);
        }
        Ok(())
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for one internal message (timer, backend signal, probe result)
    /// and apply it.
    pub async fn step(&mut self) {
        tokio::select! {
            Some(message) = self.inbox_rx.recv() => self.dispatch_internal(message),
            Some((load_id, signal)) = self.signal_rx.recv() => self.dispatch_signal(load_id, signal),
        }
    }

    /// Run the session until shutdown or until every handle is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(session_id = %self.id, "Session started");
        if let Err(e) = self.start().await {
            warn!(error = %e, "Session started without a catalog");
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(message) = self.inbox_rx.recv() => self.dispatch_internal(message),
                Some((load_id, signal)) = self.signal_rx.recv() => self.dispatch_signal(load_id, signal),
                changed = self.network.changed(), if self.network_alive => match changed {
                    Ok(()) => self.handle_network_change(),
                    Err(_) => {
                        debug!("Network monitor dropped");
                        self.network_alive = false;
                    }
                },
            }
        }

        self.shutdown();
    }

    /// Spawn the event loop and return a handle to drive it
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = SessionHandle {
            tx,
            events: self.events.sender(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::JumpToId { id, reply } => {
                let _ = reply.send(self.jump_to_id(&id));
            }
            Command::Reload { reply } => {
                let _ = reply.send(self.reload().await);
            }
            Command::ToggleMute => {
                self.toggle_mute();
            }
            Command::SeekBy(delta) => {
                self.seek_by(delta);
            }
            Command::SetPlaybackRate { rate, reply } => {
                let _ = reply.send(self.set_playback_rate(rate));
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    fn dispatch_signal(&mut self, load_id: u64, signal: BackendSignal) {
        if load_id != self.load_id {
            debug!(load_id, current = self.load_id, ?signal, "Dropping stale backend signal");
            return;
        }
        match signal {
            BackendSignal::Ready => self.report_backend_ready(),
            BackendSignal::Error(e) => self.report_backend_error(e),
            BackendSignal::Ended => self.report_playback_ended(),
        }
    }

    fn dispatch_internal(&mut self, message: Internal) {
        match message {
            Internal::Timer { kind, token } => self.on_timer(kind, token),
            Internal::Validated { load_id, reachable } => {
                if load_id != self.load_id || self.state.status != SessionStatus::Loading {
                    return;
                }
                if reachable {
                    if let Some(entry) = self.catalog.get(self.state.current_index).cloned() {
                        self.prepare_backend(&entry);
                    }
                } else {
                    self.report_backend_error(MediaLoadError::Unreachable);
                }
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind, token: u64) {
        if kind == TimerKind::NoticeDismiss {
            if token == self.notice_seq {
                self.dismiss_notice();
            }
            return;
        }
        if token != self.load_id {
            debug!(?kind, "Dropping stale timer");
            return;
        }

        match (kind, self.state.status) {
            (TimerKind::LoadTimeout, SessionStatus::Loading) => {
                self.report_backend_error(MediaLoadError::Timeout)
            }
            (TimerKind::Backoff, SessionStatus::Retrying) => {
                self.set_status(SessionStatus::Loading);
                self.start_attempt();
            }
            (TimerKind::Advance, SessionStatus::Error) => {
                self.set_status(SessionStatus::Advancing);
                self.advance(Direction::Up);
            }
            (TimerKind::ResumeSave, SessionStatus::Playing) => self.save_resume_position(),
            (kind, status) => debug!(?kind, %status, "Timer no longer relevant"),
        }
    }

    /// Release the backend and cancel every timer
    pub fn shutdown(&mut self) {
        info!(session_id = %self.id, "Session shutting down");
        self.timers.cancel_all();
        if let Some(mut backend) = self.backend.take() {
            backend.teardown();
        }
        self.load_id += 1;
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn set_status(&mut self, to: SessionStatus) {
        let from = self.state.status;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Unexpected state transition");
        }
        self.state.status = to;
        info!(%from, %to, index = self.state.current_index, "State transition");
        self.events.emit(SessionEvent::StatusChanged {
            from,
            to,
            index: self.state.current_index,
        });
    }

    /// Show a notice. Sticky notices stay until replaced or dismissed.
    fn notify(&mut self, notice: Notice, display: Option<Duration>) {
        self.notice_seq += 1;
        self.timers.cancel(TimerKind::NoticeDismiss);
        if !notice.is_sticky() {
            let display = display.unwrap_or_else(|| self.config.notice_display());
            self.timers
                .schedule(TimerKind::NoticeDismiss, display, self.notice_seq);
        }
        self.notice = Some(notice.clone());
        self.events.emit(SessionEvent::Notice(notice));
    }

    fn dismiss_notice(&mut self) {
        self.timers.cancel(TimerKind::NoticeDismiss);
        if self.notice.take().is_some() {
            self.events.emit(SessionEvent::NoticeDismissed);
        }
    }

    /// Playback recovered; clear the retry or offline notice
    fn dismiss_transient_notice(&mut self) {
        if matches!(
            self.notice,
            Some(Notice::Retrying { .. }) | Some(Notice::NoNetwork)
        ) {
            self.dismiss_notice();
        }
    }

    fn persist_position(&self, index: usize, seconds: f64) {
        if let Err(e) = self.store.save_last_index(index) {
            warn!(error = %e, "Failed to persist index");
        }
        if let Err(e) = self.store.save_last_time_seconds(seconds) {
            warn!(error = %e, "Failed to persist resume position");
        }
    }

    fn save_resume_position(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let position = backend.position();
        if backend.is_paused() || !position.is_finite() || position <= 0.0 {
            return;
        }
        self.state.resume_seconds = position;
        if let Err(e) = self.store.save_last_time_seconds(position) {
            warn!(error = %e, "Failed to persist resume position");
        }
    }

    fn record_watched(&mut self) {
        let Some(entry) = self.catalog.get(self.state.current_index) else {
            return;
        };
        let watched_at = chrono::Local::now().format(WATCHED_AT_FORMAT).to_string();
        self.watch_history.insert(entry.id.clone(), watched_at);
        if let Err(e) = self.store.save_watch_history(&self.watch_history) {
            warn!(error = %e, "Failed to persist watch history");
        }
    }

    fn maybe_preload(&mut self) {
        let quality = self.network.borrow().quality;
        let ctx = PreloadContext {
            status: self.state.status,
            quality,
            catalog: &self.catalog,
            current_index: self.state.current_index,
            failures: &self.failures,
        };
        if let Some(index) = self.preloader.maybe_warm(&ctx) {
            let url = self
                .catalog
                .get(index)
                .map(|entry| entry.url.clone())
                .unwrap_or_default();
            self.events.emit(SessionEvent::Preloading { index, url });
        }
    }

    #[cfg(test)]
    fn timer_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_pending(kind)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.teardown();
        }
    }
}

/// Cloneable handle to a spawned session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<EventRecord>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::SessionClosed)
    }

    pub async fn next(&self) -> Result<()> {
        self.send(Command::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.send(Command::Previous).await
    }

    pub async fn jump_to_id(&self, id: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::JumpToId {
            id: id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::SessionClosed)?.map_err(Error::from)
    }

    pub async fn reload(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reload { reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)?.map_err(Error::from)
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute).await
    }

    pub async fn seek_by(&self, delta_seconds: f64) -> Result<()> {
        self.send(Command::SeekBy(delta_seconds)).await
    }

    pub async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetPlaybackRate { rate, reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }
}
