//! Adaptive (manifest-based) playback

use super::attachment::{Attachment, Classifier, Readiness};
use super::{
    AttachPath, AttachRequest, BackendKind, HostEvent, ManifestType, MediaBackend, MediaHost,
    PrepareOptions, SignalSink,
};
use crate::error::MediaLoadError;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Plays segmented streams, preferring the host's streaming engine and
/// falling back to native manifest support.
pub struct AdaptiveBackend {
    attachment: Attachment,
    manifest: ManifestType,
}

impl AdaptiveBackend {
    pub fn new(host: Arc<dyn MediaHost>, manifest: ManifestType) -> Self {
        Self {
            attachment: Attachment::new(host),
            manifest,
        }
    }
}

/// Engine path: manifest parse means ready, non-fatal errors are swallowed
fn classify_engine(event: &HostEvent) -> Readiness {
    match event {
        HostEvent::ManifestParsed => Readiness::Ready,
        HostEvent::Error { fatal: true, detail } => Readiness::Fatal(detail.clone()),
        HostEvent::Error { fatal: false, .. } | HostEvent::MetadataLoaded | HostEvent::Ended => {
            Readiness::Ignore
        }
    }
}

/// Native path behaves like a plain media element
fn classify_native(event: &HostEvent) -> Readiness {
    match event {
        HostEvent::MetadataLoaded => Readiness::Ready,
        HostEvent::Error { detail, .. } => Readiness::Fatal(detail.clone()),
        HostEvent::ManifestParsed | HostEvent::Ended => Readiness::Ignore,
    }
}

impl MediaBackend for AdaptiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Adaptive(self.manifest)
    }

    #[instrument(skip_all, fields(url = %url))]
    fn prepare(&mut self, url: &Url, options: PrepareOptions, sink: SignalSink) {
        let host = self.attachment.host();
        let (path, mime, classify) = if host.has_streaming_engine() {
            (AttachPath::Engine, None, classify_engine as Classifier)
        } else if host.can_play_type(self.manifest.mime_type()) {
            (
                AttachPath::Native,
                Some(self.manifest.mime_type()),
                classify_native as Classifier,
            )
        } else {
            self.attachment.reject(
                &sink,
                MediaLoadError::Unsupported(format!("{:?} streaming not supported", self.manifest)),
            );
            return;
        };

        debug!(?path, manifest = ?self.manifest, "Attaching adaptive source");
        self.attachment.start(
            AttachRequest {
                url: url.clone(),
                mime,
                path,
                resume_at: options.resume_at,
                muted: options.muted,
            },
            sink,
            classify,
        );
    }

    fn teardown(&mut self) {
        self.attachment.release();
    }

    fn host(&self) -> &dyn MediaHost {
        self.attachment.host()
    }
}
