//! Direct (progressive file) playback

use super::attachment::{Attachment, Readiness};
use super::{
    mime_type_for, AttachPath, AttachRequest, BackendKind, HostEvent, MediaBackend, MediaHost,
    PrepareOptions, SignalSink,
};
use crate::error::MediaLoadError;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Plays single files through the host's native media element.
///
/// The container is sniffed from the file extension and the source is
/// declined up front when the host cannot play that MIME type.
pub struct DirectBackend {
    attachment: Attachment,
}

impl DirectBackend {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self {
            attachment: Attachment::new(host),
        }
    }
}

fn classify(event: &HostEvent) -> Readiness {
    match event {
        HostEvent::MetadataLoaded => Readiness::Ready,
        HostEvent::Error { detail, .. } => Readiness::Fatal(detail.clone()),
        HostEvent::ManifestParsed | HostEvent::Ended => Readiness::Ignore,
    }
}

impl MediaBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    #[instrument(skip_all, fields(url = %url))]
    fn prepare(&mut self, url: &Url, options: PrepareOptions, sink: SignalSink) {
        let Some(mime) = mime_type_for(url) else {
            self.attachment.reject(
                &sink,
                MediaLoadError::Unsupported(format!("unrecognized container: {}", url.path())),
            );
            return;
        };

        if !self.attachment.host().can_play_type(mime) {
            self.attachment
                .reject(&sink, MediaLoadError::Unsupported(mime.to_string()));
            return;
        }

        debug!(mime, "Attaching direct source");
        self.attachment.start(
            AttachRequest {
                url: url.clone(),
                mime: Some(mime),
                path: AttachPath::Native,
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
