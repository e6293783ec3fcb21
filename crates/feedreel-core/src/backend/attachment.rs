//! Shared host attachment handling for both backend variants

use super::{AttachRequest, BackendSignal, HostEvent, MediaHost, SignalSink};
use crate::error::MediaLoadError;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a variant reads a host event before the source is ready
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Readiness {
    Ready,
    Fatal(String),
    Ignore,
}

pub(crate) type Classifier = fn(&HostEvent) -> Readiness;

/// One live host attachment and the task translating its events
pub(crate) struct Attachment {
    host: Arc<dyn MediaHost>,
    task: Option<JoinHandle<()>>,
    attached: bool,
}

impl Attachment {
    pub(crate) fn new(host: Arc<dyn MediaHost>) -> Self {
        Self {
            host,
            task: None,
            attached: false,
        }
    }

    pub(crate) fn host(&self) -> &dyn MediaHost {
        self.host.as_ref()
    }

    /// Attach `request` and translate host events into backend signals
    pub(crate) fn start(&mut self, request: AttachRequest, sink: SignalSink, classify: Classifier) {
        self.release();

        let mut events = self.host.attach(request);
        self.attached = true;

        self.task = Some(tokio::spawn(async move {
            let mut settled = false;
            while let Some(event) = events.recv().await {
                if settled {
                    match event {
                        HostEvent::Ended => {
                            sink.send(BackendSignal::Ended);
                            return;
                        }
                        HostEvent::Error { fatal: true, detail } => {
                            sink.send(BackendSignal::Error(MediaLoadError::BackendFatal(detail)));
                            return;
                        }
                        other => debug!(load_id = sink.load_id(), event = ?other, "Host event after ready"),
                    }
                    continue;
                }

                match classify(&event) {
                    Readiness::Ready => {
                        settled = true;
                        sink.send(BackendSignal::Ready);
                    }
                    Readiness::Fatal(detail) => {
                        sink.send(BackendSignal::Error(MediaLoadError::BackendFatal(detail)));
                        return;
                    }
                    Readiness::Ignore => {
                        debug!(load_id = sink.load_id(), event = ?event, "Ignoring host event")
                    }
                }
            }

            if !settled {
                sink.send(BackendSignal::Error(MediaLoadError::BackendFatal(
                    "host released the source before it was ready".into(),
                )));
            }
        }));
    }

    /// Report an error without touching the host
    pub(crate) fn reject(&mut self, sink: &SignalSink, error: MediaLoadError) {
        self.release();
        sink.send(BackendSignal::Error(error));
    }

    pub(crate) fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.attached {
            self.host.detach();
            self.attached = false;
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.release();
    }
}
