//! Media backends for adaptive and direct playback
//!
//! A backend turns a source URL into exactly one `Ready` or `Error` signal
//! per `prepare` call. After `Ready` it may further report `Ended` or a late
//! fatal error. The platform playback surface itself is the [`MediaHost`].

mod adaptive;
mod attachment;
mod direct;

pub use adaptive::AdaptiveBackend;
pub use direct::DirectBackend;

use crate::error::MediaLoadError;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Manifest types handled by the adaptive backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestType {
    Hls,
    Dash,
}

impl ManifestType {
    /// MIME type a native player advertises for this manifest
    pub fn mime_type(&self) -> &'static str {
        match self {
            ManifestType::Hls => "application/vnd.apple.mpegurl",
            ManifestType::Dash => "application/dash+xml",
        }
    }
}

/// Which backend variant handles a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Adaptive(ManifestType),
    Direct,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Adaptive(ManifestType::Hls) => write!(f, "adaptive/hls"),
            BackendKind::Adaptive(ManifestType::Dash) => write!(f, "adaptive/dash"),
            BackendKind::Direct => write!(f, "direct"),
        }
    }
}

/// Detect manifest type from the URL path, ignoring query and fragment
pub fn detect_manifest_type(url: &Url) -> Option<ManifestType> {
    let path = url.path().to_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return Some(ManifestType::Hls);
    }
    if path.ends_with(".mpd") {
        return Some(ManifestType::Dash);
    }
    None
}

/// MIME type for a progressive file, from its extension
pub fn mime_type_for(url: &Url) -> Option<&'static str> {
    let path = url.path().to_lowercase();
    let (_, ext) = path.rsplit_once('.')?;
    match ext {
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "ogv" | "ogg" => Some("video/ogg"),
        // Commonly unsupported; hosts are expected to decline it
        "mkv" => Some("video/x-matroska"),
        _ => None,
    }
}

/// Route a raw catalog URL to a backend variant
pub fn select_backend(raw_url: &str) -> Result<(Url, BackendKind), MediaLoadError> {
    let url = Url::parse(raw_url)
        .map_err(|e| MediaLoadError::Unsupported(format!("invalid URL '{}': {}", raw_url, e)))?;
    let kind = match detect_manifest_type(&url) {
        Some(manifest) => BackendKind::Adaptive(manifest),
        None => BackendKind::Direct,
    };
    Ok((url, kind))
}

/// How the host should attach a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPath {
    /// Through the host's segmented streaming engine
    Engine,
    /// Through the host's native media element
    Native,
}

/// Source attachment request handed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct AttachRequest {
    pub url: Url,
    pub mime: Option<&'static str>,
    pub path: AttachPath,
    /// Position to seek to once playable
    pub resume_at: f64,
    pub muted: bool,
}

/// Raw notifications from the host's playback surface
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ManifestParsed,
    MetadataLoaded,
    Ended,
    Error { fatal: bool, detail: String },
}

/// The platform's playback surface
pub trait MediaHost: Send + Sync {
    /// Whether the host reports it can play this MIME type
    fn can_play_type(&self, mime: &str) -> bool;

    /// Whether a segmented streaming engine is available
    fn has_streaming_engine(&self) -> bool;

    /// Attach a source. Events for it arrive on the returned channel until
    /// the next `detach`.
    fn attach(&self, request: AttachRequest) -> mpsc::UnboundedReceiver<HostEvent>;

    /// Release the current source
    fn detach(&self);

    /// Detached, muted, metadata-only warm-up of a URL. Errors are ignored.
    fn preload(&self, url: &str);

    fn play(&self);
    fn set_muted(&self, muted: bool);
    fn seek(&self, seconds: f64);
    fn position(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn is_paused(&self) -> bool;
    fn set_playback_rate(&self, rate: f64);
}

/// Outcome signals a backend reports for one load
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    Ready,
    Error(MediaLoadError),
    Ended,
}

/// Where a backend reports signals, tagged with the load they belong to
#[derive(Debug, Clone)]
pub struct SignalSink {
    load_id: u64,
    tx: mpsc::UnboundedSender<(u64, BackendSignal)>,
}

impl SignalSink {
    pub fn new(load_id: u64, tx: mpsc::UnboundedSender<(u64, BackendSignal)>) -> Self {
        Self { load_id, tx }
    }

    pub fn load_id(&self) -> u64 {
        self.load_id
    }

    /// Returns false once the receiving session is gone
    pub fn send(&self, signal: BackendSignal) -> bool {
        self.tx.send((self.load_id, signal)).is_ok()
    }
}

/// Per-load options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrepareOptions {
    pub resume_at: f64,
    pub muted: bool,
}

/// A playback backend variant
pub trait MediaBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Start preparing `url`. Tears down any previous attachment first and
    /// reports exactly one `Ready` or `Error` on `sink`.
    fn prepare(&mut self, url: &Url, options: PrepareOptions, sink: SignalSink);

    /// Release the current attachment, if any
    fn teardown(&mut self);

    fn host(&self) -> &dyn MediaHost;

    fn set_muted(&self, muted: bool) {
        self.host().set_muted(muted);
    }

    /// Seek relative to the current position, clamped to the media duration.
    /// Returns the new position, or `None` when the duration is unknown.
    fn seek_by(&self, delta_seconds: f64) -> Option<f64> {
        let host = self.host();
        let duration = host.duration().filter(|d| d.is_finite() && *d > 0.0)?;
        let target = (host.position() + delta_seconds).clamp(0.0, duration);
        host.seek(target);
        if host.is_paused() {
            host.play();
        }
        Some(target)
    }

    fn set_playback_rate(&self, rate: f64) {
        self.host().set_playback_rate(rate);
    }

    fn position(&self) -> f64 {
        self.host().position()
    }

    fn is_paused(&self) -> bool {
        self.host().is_paused()
    }
}

/// Creates backend instances for the controller
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> Box<dyn MediaBackend>;
}

/// Factory building both variants on top of one host
pub struct HostBackendFactory {
    host: Arc<dyn MediaHost>,
}

impl HostBackendFactory {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }
}

impl BackendFactory for HostBackendFactory {
    fn create(&self, kind: BackendKind) -> Box<dyn MediaBackend> {
        match kind {
            BackendKind::Adaptive(manifest) => {
                Box::new(AdaptiveBackend::new(self.host.clone(), manifest))
            }
            BackendKind::Direct => Box::new(DirectBackend::new(self.host.clone())),
        }
    }
}
