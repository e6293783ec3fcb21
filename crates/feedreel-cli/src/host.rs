//! Headless media host
//!
//! Treats a source as playable when an HTTP HEAD request for it succeeds,
//! then "plays" it for a fixed dwell time before reporting the end.

use feedreel_core::backend::{AttachPath, AttachRequest, HostEvent, MediaHost};
use parking_lot::Mutex;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct Playback {
    task: Option<JoinHandle<()>>,
    started: Option<Instant>,
    offset: f64,
    rate: f64,
}

pub struct HttpHost {
    client: Client,
    dwell: Duration,
    playback: Mutex<Playback>,
}

impl HttpHost {
    pub fn new(client: Client, dwell: Duration) -> Self {
        Self {
            client,
            dwell,
            playback: Mutex::new(Playback {
                rate: 1.0,
                ..Default::default()
            }),
        }
    }
}

impl MediaHost for HttpHost {
    fn can_play_type(&self, mime: &str) -> bool {
        // Matroska is the one container browsers commonly refuse
        mime != "video/x-matroska"
    }

    fn has_streaming_engine(&self) -> bool {
        true
    }

    fn attach(&self, request: AttachRequest) -> mpsc::UnboundedReceiver<HostEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let dwell = self.dwell;

        let task = tokio::spawn(async move {
            let ready = match request.path {
                AttachPath::Engine => HostEvent::ManifestParsed,
                AttachPath::Native => HostEvent::MetadataLoaded,
            };
            match client.head(request.url.as_str()).send().await {
                Ok(response) if response.status().is_success() => {
                    let _ = tx.send(ready);
                    tokio::time::sleep(dwell).await;
                    let _ = tx.send(HostEvent::Ended);
                }
                Ok(response) => {
                    let _ = tx.send(HostEvent::Error {
                        fatal: true,
                        detail: format!("HTTP {}", response.status()),
                    });
                }
                Err(e) => {
                    let _ = tx.send(HostEvent::Error {
                        fatal: true,
                        detail: e.to_string(),
                    });
                }
            }
            // Hold the channel open until detached
            std::future::pending::<()>().await;
        });

        let mut playback = self.playback.lock();
        if let Some(previous) = playback.task.replace(task) {
            previous.abort();
        }
        playback.started = Some(Instant::now());
        playback.offset = request.resume_at;
        rx
    }

    fn detach(&self) {
        let mut playback = self.playback.lock();
        if let Some(task) = playback.task.take() {
            task.abort();
        }
        playback.started = None;
    }

    fn preload(&self, url: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let outcome = client.head(&url).send().await.map(|r| r.status());
            debug!(url = %url, ?outcome, "Preload probe finished");
        });
    }

    fn play(&self) {}

    fn set_muted(&self, muted: bool) {
        debug!(muted, "Mute changed");
    }

    fn seek(&self, seconds: f64) {
        let mut playback = self.playback.lock();
        playback.offset = seconds;
        if playback.started.is_some() {
            playback.started = Some(Instant::now());
        }
    }

    fn position(&self) -> f64 {
        let playback = self.playback.lock();
        match playback.started {
            Some(started) => playback.offset + started.elapsed().as_secs_f64() * playback.rate,
            None => 0.0,
        }
    }

    fn duration(&self) -> Option<f64> {
        Some(self.dwell.as_secs_f64())
    }

    fn is_paused(&self) -> bool {
        self.playback.lock().started.is_none()
    }

    fn set_playback_rate(&self, rate: f64) {
        self.playback.lock().rate = rate;
    }
}
