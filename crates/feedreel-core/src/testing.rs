//! Scripted collaborators for driving a session without a real player
//!
//! Compiled for the crate's tests and behind the `testing` feature.

use crate::{
    backend::{AttachPath, AttachRequest, HostEvent, MediaHost},
    cache::ReachabilityProbe,
    catalog::CatalogSource,
    error::{CatalogError, ValidationFailure},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// How the host answers an attach for a given URL
#[derive(Debug, Clone, PartialEq)]
pub enum SourceScript {
    /// Report readiness right away
    Ready,
    /// Report a fatal error right away
    Fail(String),
    /// Never answer
    Hang,
}

#[derive(Debug)]
struct HostState {
    scripts: HashMap<String, SourceScript>,
    default_script: SourceScript,
    unsupported: HashSet<String>,
    engine: bool,
    attaches: Vec<AttachRequest>,
    detaches: usize,
    preloads: Vec<String>,
    live: Option<mpsc::UnboundedSender<HostEvent>>,
    position: f64,
    duration: Option<f64>,
    paused: bool,
    muted: bool,
    rate: f64,
    plays: usize,
}

/// In-memory [`MediaHost`] answering attaches from a per-URL script
#[derive(Debug)]
pub struct ScriptedHost {
    state: Mutex<HostState>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new(SourceScript::Ready)
    }
}

impl ScriptedHost {
    /// Host answering every URL without a script with `default_script`
    pub fn new(default_script: SourceScript) -> Self {
        Self {
            state: Mutex::new(HostState {
                scripts: HashMap::new(),
                default_script,
                unsupported: HashSet::new(),
                engine: true,
                attaches: Vec::new(),
                detaches: 0,
                preloads: Vec::new(),
                live: None,
                position: 0.0,
                duration: None,
                paused: true,
                muted: true,
                rate: 1.0,
                plays: 0,
            }),
        }
    }

    pub fn script(&self, url: impl Into<String>, script: SourceScript) {
        self.state.lock().scripts.insert(url.into(), script);
    }

    /// Decline a MIME type in `can_play_type`
    pub fn decline_type(&self, mime: impl Into<String>) {
        self.state.lock().unsupported.insert(mime.into());
    }

    pub fn set_streaming_engine(&self, available: bool) {
        self.state.lock().engine = available;
    }

    /// Simulate playback progress
    pub fn set_progress(&self, position: f64, duration: Option<f64>, paused: bool) {
        let mut state = self.state.lock();
        state.position = position;
        state.duration = duration;
        state.paused = paused;
    }

    /// Emit an event on the live attachment. Returns false if nothing is attached.
    pub fn emit(&self, event: HostEvent) -> bool {
        self.state
            .lock()
            .live
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    pub fn finish_current(&self) -> bool {
        self.emit(HostEvent::Ended)
    }

    pub fn attaches(&self) -> Vec<AttachRequest> {
        self.state.lock().attaches.clone()
    }

    pub fn attach_count(&self) -> usize {
        self.state.lock().attaches.len()
    }

    /// Attaches made for one URL
    pub fn attach_count_for(&self, url: &str) -> usize {
        self.state
            .lock()
            .attaches
            .iter()
            .filter(|request| request.url.as_str() == url)
            .count()
    }

    pub fn detach_count(&self) -> usize {
        self.state.lock().detaches
    }

    pub fn preloads(&self) -> Vec<String> {
        self.state.lock().preloads.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().plays
    }
}

impl MediaHost for ScriptedHost {
    fn can_play_type(&self, mime: &str) -> bool {
        !self.state.lock().unsupported.contains(mime)
    }

    fn has_streaming_engine(&self) -> bool {
        self.state.lock().engine
    }

    fn attach(&self, request: AttachRequest) -> mpsc::UnboundedReceiver<HostEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        let script = state
            .scripts
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| state.default_script.clone());
        match script {
            SourceScript::Ready => {
                let event = match request.path {
                    AttachPath::Engine => HostEvent::ManifestParsed,
                    AttachPath::Native => HostEvent::MetadataLoaded,
                };
                let _ = tx.send(event);
            }
            SourceScript::Fail(detail) => {
                let _ = tx.send(HostEvent::Error {
                    fatal: true,
                    detail,
                });
            }
            SourceScript::Hang => {}
        }

        state.muted = request.muted;
        state.position = request.resume_at;
        state.attaches.push(request);
        state.live = Some(tx);
        rx
    }

    fn detach(&self) {
        let mut state = self.state.lock();
        state.live = None;
        state.detaches += 1;
    }

    fn preload(&self, url: &str) {
        self.state.lock().preloads.push(url.to_string());
    }

    fn play(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.plays += 1;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn seek(&self, seconds: f64) {
        self.state.lock().position = seconds;
    }

    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
    }
}

/// Catalog source serving a fixed response and counting fetches
#[derive(Debug)]
pub struct StaticCatalogSource {
    response: Mutex<Result<String, CatalogError>>,
    fetches: AtomicUsize,
}

impl StaticCatalogSource {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            response: Mutex::new(Ok(payload.into())),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Source whose every fetch fails
    pub fn failing(error: CatalogError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_payload(&self, payload: impl Into<String>) {
        *self.response.lock() = Ok(payload.into());
    }

    pub fn set_error(&self, error: CatalogError) {
        *self.response.lock() = Err(error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch(&self) -> Result<String, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.response.lock().clone()
    }
}

/// Probe rejecting a fixed set of URLs and counting calls
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    unreachable: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, url: &str, reachable: bool) {
        let mut unreachable = self.unreachable.lock();
        if reachable {
            unreachable.remove(url);
        } else {
            unreachable.insert(url.to_string());
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> Result<(), ValidationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().contains(url) {
            Err(ValidationFailure {
                url: url.to_string(),
                reason: "unreachable".into(),
            })
        } else {
            Ok(())
        }
    }
}

/// Build a catalog payload with a header from `(id, url)` pairs
pub fn catalog_payload<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut payload = String::from("id,url\n");
    for (id, url) in rows {
        payload.push_str(id);
        payload.push(',');
        payload.push_str(url);
        payload.push('\n');
    }
    payload
}
