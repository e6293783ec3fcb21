//! Integration tests for Feedreel Core

use feedreel_core::{
    store::keys,
    testing::{catalog_payload, ScriptedHost, ScriptedProbe, SourceScript, StaticCatalogSource},
    Catalog, CatalogEntry, CatalogError, Direction, Error, EventRecord, MediaLoadError,
    MemoryStore, NetworkMonitor, NetworkQuality, NotFoundError, Notice, PersistentStore,
    PlaybackController, SessionConfig, SessionEvent, SessionState, SessionStatus, SessionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const A: &str = "https://cdn.example/a.mp4";
const B: &str = "https://cdn.example/b.m3u8";
const C: &str = "https://cdn.example/c.webm";

struct Harness {
    host: Arc<ScriptedHost>,
    source: Arc<StaticCatalogSource>,
    store: Arc<MemoryStore>,
    monitor: NetworkMonitor,
    probe: Arc<ScriptedProbe>,
    controller: PlaybackController,
}

fn harness_with(config: SessionConfig, host: ScriptedHost, payload: String) -> Harness {
    let host = Arc::new(host);
    let source = Arc::new(StaticCatalogSource::new(payload));
    let store = Arc::new(MemoryStore::new());
    let monitor = NetworkMonitor::default();
    let probe = Arc::new(ScriptedProbe::new());

    let controller = PlaybackController::builder(config)
        .catalog_source(source.clone())
        .store(store.clone())
        .network(monitor.subscribe())
        .host(host.clone())
        .probe(probe.clone())
        .build()
        .unwrap();

    Harness {
        host,
        source,
        store,
        monitor,
        probe,
        controller,
    }
}

fn harness(host: ScriptedHost) -> Harness {
    harness_with(
        SessionConfig::default(),
        host,
        catalog_payload([("1", A), ("2", B), ("3", C)]),
    )
}

/// Step the controller until `done` holds, giving up after a bounded number of messages
async fn step_until(controller: &mut PlaybackController, done: impl Fn(&PlaybackController) -> bool) {
    for _ in 0..200 {
        if done(controller) {
            return;
        }
        controller.step().await;
    }
    panic!("condition not reached, status {}", controller.status());
}

fn within(actual: Duration, expected: Duration) -> bool {
    actual >= expected && actual < expected + Duration::from_millis(5)
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_plays_first_entry_and_preloads_next() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.monitor.set_quality(NetworkQuality::Good);

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    assert_eq!(h.controller.catalog().len(), 3);

    h.controller.step().await;
    assert_eq!(h.controller.status(), SessionStatus::Playing);
    assert_eq!(h.controller.current_index(), 0);
    assert_eq!(h.host.preloads(), vec![B.to_string()]);
    assert!(h.controller.watch_history().contains_key("1"));

    let store = SessionStore::new(h.store.clone());
    assert_eq!(store.last_index(), Some(0));
    assert!(store.watch_history().contains_key("1"));
}

#[tokio::test(start_paused = true)]
async fn test_start_resumes_stored_position() {
    let h = harness(ScriptedHost::new(SourceScript::Ready));
    let store = SessionStore::new(h.store.clone());
    store.save_last_index(2).unwrap();
    store.save_last_time_seconds(42.0).unwrap();

    let mut controller = h.controller;
    controller.start().await.unwrap();

    assert_eq!(controller.current_index(), 2);
    let attach = &h.host.attaches()[0];
    assert_eq!(attach.url.as_str(), C);
    assert_eq!(attach.resume_at, 42.0);
    assert!(attach.muted);
}

#[tokio::test(start_paused = true)]
async fn test_stored_index_out_of_range_starts_at_zero() {
    let h = harness(ScriptedHost::new(SourceScript::Ready));
    h.store.write(keys::LAST_INDEX, "9").unwrap();

    let mut controller = h.controller;
    controller.start().await.unwrap();
    assert_eq!(controller.current_index(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_playback_end_advances() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.controller.start().await.unwrap();
    h.controller.step().await;

    assert!(h.host.finish_current());
    h.controller.step().await;
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    assert_eq!(h.controller.current_index(), 1);

    h.controller.step().await;
    assert_eq!(h.controller.status(), SessionStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_selection_wraps_both_ways() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.controller.load_catalog(false).await.unwrap();

    h.controller.select_index(-1, 0.0, Direction::Down);
    assert_eq!(h.controller.current_index(), 2);
    h.controller.step().await;

    h.controller.select_index(7, 0.0, Direction::Up);
    assert_eq!(h.controller.current_index(), 1);
    h.controller.step().await;

    h.controller.previous();
    assert_eq!(h.controller.current_index(), 0);
    assert_eq!(h.controller.state().direction, Direction::Down);
}

// =============================================================================
// Retry and Blacklisting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_then_blacklist_then_advance() {
    let host = ScriptedHost::new(SourceScript::Ready);
    host.script(A, SourceScript::Fail("decode error".into()));
    let mut h = harness(host);

    h.controller.start().await.unwrap();

    let mut delays = Vec::new();
    let mut retry_started: Option<Instant> = None;
    while h.controller.status() != SessionStatus::Error {
        h.controller.step().await;
        match h.controller.status() {
            SessionStatus::Retrying if retry_started.is_none() => {
                retry_started = Some(Instant::now());
            }
            SessionStatus::Loading => {
                if let Some(started) = retry_started.take() {
                    delays.push(started.elapsed());
                }
            }
            _ => {}
        }
    }

    assert_eq!(delays.len(), 3);
    for (delay, expected) in delays.iter().zip([1000, 2000, 4000]) {
        assert!(within(*delay, Duration::from_millis(expected)), "{:?}", delay);
    }
    assert_eq!(h.host.attach_count_for(A), 4);
    assert!(h.controller.failures().has(A));
    assert_eq!(
        h.controller.notice(),
        Some(&Notice::LoadFailed { id: "1".into() })
    );

    let failed_at = Instant::now();
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    assert!(failed_at.elapsed() >= Duration::from_millis(2000));
    assert_eq!(h.controller.current_index(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blacklisted_entry_is_skipped() {
    let host = ScriptedHost::new(SourceScript::Ready);
    host.script(B, SourceScript::Fail("404".into()));
    let mut h = harness(host);
    h.controller.start().await.unwrap();
    h.controller.step().await;

    h.controller.next();
    step_until(&mut h.controller, |c| {
        c.status() == SessionStatus::Playing && c.current_index() == 2
    })
    .await;

    // Index 1 is blacklisted now; moving back onto it lands on 2 instead
    h.controller.select_index(1, 0.0, Direction::Up);
    assert_eq!(h.controller.current_index(), 2);
    assert_eq!(h.host.attach_count_for(B), 4);
}

#[tokio::test(start_paused = true)]
async fn test_all_sources_failed_stops() {
    let mut h = harness_with(
        SessionConfig::default(),
        ScriptedHost::new(SourceScript::Fail("gone".into())),
        catalog_payload([("1", A), ("2", C)]),
    );
    h.controller.start().await.unwrap();

    step_until(&mut h.controller, |c| c.status() == SessionStatus::Exhausted).await;
    assert_eq!(h.controller.failures().len(), 2);
    assert_eq!(h.controller.notice(), Some(&Notice::NoPlayableContent));

    // Nothing is queued and nothing else is scheduled
    let mut pending = tokio_test::task::spawn(h.controller.step());
    tokio_test::assert_pending!(pending.poll());
    drop(pending);
    let idle = tokio::time::timeout(Duration::from_secs(600), h.controller.step()).await;
    assert!(idle.is_err());
    assert_eq!(h.host.attach_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_container_goes_through_retry() {
    let mut h = harness_with(
        SessionConfig::default(),
        ScriptedHost::new(SourceScript::Ready),
        catalog_payload([("1", "https://cdn.example/x.avi"), ("2", A)]),
    );
    h.controller.start().await.unwrap();

    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    assert_eq!(h.controller.current_index(), 1);
    assert!(h.controller.failures().has("https://cdn.example/x.avi"));
}

// =============================================================================
// Timeouts and Network
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_load_timeout_by_network_quality() {
    for (quality, expected) in [
        (NetworkQuality::Good, Duration::from_secs(20)),
        (NetworkQuality::Poor, Duration::from_secs(30)),
    ] {
        let mut h = harness(ScriptedHost::new(SourceScript::Hang));
        h.monitor.set_quality(quality);
        h.controller.start().await.unwrap();

        let started = Instant::now();
        h.controller.step().await;
        assert_eq!(h.controller.status(), SessionStatus::Retrying);
        assert!(within(started.elapsed(), expected), "{:?}", started.elapsed());
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_preload_on_poor_network() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.monitor.set_quality(NetworkQuality::Poor);

    h.controller.start().await.unwrap();
    h.controller.step().await;
    assert_eq!(h.controller.status(), SessionStatus::Playing);
    assert!(h.host.preloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_offline_pauses_and_online_resumes() {
    let mut h = harness(ScriptedHost::new(SourceScript::Hang));
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.status(), SessionStatus::Loading);

    h.monitor.set_online(false);
    h.controller.handle_network_change();
    assert_eq!(h.controller.status(), SessionStatus::Offline);
    assert_eq!(h.controller.state().retry_count, 0);
    assert_eq!(h.controller.notice(), Some(&Notice::NoNetwork));

    // The offline state outlives the load timeout
    let idle = tokio::time::timeout(Duration::from_secs(60), h.controller.step()).await;
    assert!(idle.is_err());
    assert_eq!(h.controller.status(), SessionStatus::Offline);

    h.monitor.set_online(true);
    h.controller.handle_network_change();
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    assert_eq!(h.controller.current_index(), 0);
    assert_eq!(h.host.attach_count_for(A), 2);
    assert!(h.controller.notice().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_flap_still_resumes() {
    let mut h = harness(ScriptedHost::new(SourceScript::Hang));
    h.controller.start().await.unwrap();

    // The drop is never delivered through the watch before the error lands
    h.monitor.set_online(false);
    h.controller
        .report_backend_error(MediaLoadError::BackendFatal("network".into()));
    assert_eq!(h.controller.status(), SessionStatus::Offline);

    h.monitor.set_online(true);
    h.controller.handle_network_change();
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    assert_eq!(h.controller.state().retry_count, 0);
    assert_eq!(h.host.attach_count_for(A), 2);
    assert!(h.controller.notice().is_none());

    // Navigation works again once the load settles
    h.controller.report_backend_ready();
    h.controller.next();
    assert_eq!(h.controller.current_index(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_online_skips_pending_backoff() {
    let host = ScriptedHost::new(SourceScript::Fail("flaky".into()));
    let mut h = harness(host);
    h.controller.start().await.unwrap();
    h.controller.step().await;
    assert_eq!(h.controller.status(), SessionStatus::Retrying);

    h.monitor.set_online(false);
    h.controller.handle_network_change();
    assert_eq!(h.controller.status(), SessionStatus::Offline);

    h.monitor.set_online(true);
    h.controller.handle_network_change();
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    assert_eq!(h.controller.state().retry_count, 1);
    assert_eq!(h.host.attach_count_for(A), 2);
}

// =============================================================================
// Catalog
// =============================================================================

#[tokio::test]
async fn test_empty_catalog_leaves_state_unchanged() {
    let mut h = harness_with(
        SessionConfig::default(),
        ScriptedHost::default(),
        "id,url\n".to_string(),
    );

    let result = h.controller.load_catalog(false).await;
    assert_eq!(result, Err(CatalogError::Empty));
    assert_eq!(h.controller.state(), &SessionState::default());
    assert_eq!(h.controller.notice(), Some(&Notice::CatalogUnavailable));

    h.controller.select_index(0, 0.0, Direction::Up);
    assert_eq!(h.controller.status(), SessionStatus::Idle);
    assert_eq!(h.host.attach_count(), 0);
}

#[tokio::test]
async fn test_fetch_failure_without_cache_is_no_data() {
    let mut h = harness(ScriptedHost::default());
    h.source.set_error(CatalogError::Network("HTTP 503".into()));

    assert_eq!(h.controller.load_catalog(true).await, Err(CatalogError::NoData));
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_cache() {
    let mut h = harness(ScriptedHost::default());
    let cached = Catalog::new(vec![CatalogEntry::new("9", A)]);
    SessionStore::new(h.store.clone()).save_catalog(&cached).unwrap();
    h.source.set_error(CatalogError::Network("HTTP 503".into()));

    h.controller.load_catalog(true).await.unwrap();
    assert_eq!(h.controller.catalog(), &cached);
    assert_eq!(h.controller.notice(), Some(&Notice::ServingCachedCatalog));
}

#[tokio::test]
async fn test_cached_catalog_skips_fetch() {
    let mut h = harness(ScriptedHost::default());
    h.controller.load_catalog(false).await.unwrap();
    h.controller.load_catalog(false).await.unwrap();
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test]
async fn test_offline_fetch_uses_cache() {
    let mut h = harness(ScriptedHost::default());
    h.controller.load_catalog(false).await.unwrap();
    h.monitor.set_online(false);

    h.controller.load_catalog(true).await.unwrap();
    assert_eq!(h.source.fetch_count(), 1);
    assert_eq!(h.controller.notice(), Some(&Notice::ServingCachedCatalog));
}

#[tokio::test(start_paused = true)]
async fn test_reload_clears_blacklist() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.controller.start().await.unwrap();
    h.controller.step().await;

    // The ready signal of the abandoned attempt is dropped
    h.controller.select_index(1, 0.0, Direction::Up);
    h.controller.report_backend_error(MediaLoadError::Timeout);
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    assert_eq!(h.controller.state().retry_count, 0);
    assert!(h.controller.failures().is_empty());

    // Force a blacklist by scripting failures for B
    h.host.script(B, SourceScript::Fail("gone".into()));
    h.controller.select_index(1, 0.0, Direction::Up);
    step_until(&mut h.controller, |c| c.failures().has(B)).await;

    let failed_attempts = h.host.attach_count_for(B);

    h.host.script(B, SourceScript::Ready);
    h.controller.reload().await.unwrap();
    assert!(h.controller.failures().is_empty());
    assert!(h.controller.validation().is_empty());
    assert_eq!(h.source.fetch_count(), 2);

    // B is eligible again and is loaded rather than skipped
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    h.controller.select_index(1, 0.0, Direction::Up);
    assert_eq!(h.controller.current_index(), 1);
    assert_eq!(h.controller.status(), SessionStatus::Loading);
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    assert_eq!(h.controller.current_index(), 1);
    assert!(h.host.attach_count_for(B) > failed_attempts);
}

// =============================================================================
// Jump
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_jump_to_id() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.controller.start().await.unwrap();
    h.controller.step().await;

    h.controller.jump_to_id(" 3 ").unwrap();
    assert_eq!(h.controller.current_index(), 2);
    assert_eq!(h.controller.status(), SessionStatus::Loading);
}

#[tokio::test(start_paused = true)]
async fn test_jump_to_missing_id() {
    let mut h = harness(ScriptedHost::new(SourceScript::Ready));
    h.controller.start().await.unwrap();
    h.controller.step().await;
    let before = h.controller.state().clone();

    let err = h.controller.jump_to_id("999").unwrap_err();
    assert_eq!(err, NotFoundError { id: "999".into() });
    assert_eq!(h.controller.state(), &before);
    assert_eq!(
        h.controller.notice(),
        Some(&Notice::NotFound { id: "999".into() })
    );
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_source_is_revalidated_on_retry() {
    let config = SessionConfig {
        validate_sources: true,
        ..Default::default()
    };
    let mut h = harness_with(
        config,
        ScriptedHost::new(SourceScript::Ready),
        catalog_payload([("1", A), ("2", B)]),
    );
    h.probe.set_reachable(A, false);

    h.controller.start().await.unwrap();
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Retrying).await;
    assert_eq!(h.probe.call_count(), 1);
    assert_eq!(h.host.attach_count(), 0);
    assert_eq!(h.controller.validation().get(A), Some(false));

    h.probe.set_reachable(A, true);
    step_until(&mut h.controller, |c| c.status() == SessionStatus::Playing).await;
    assert_eq!(h.probe.call_count(), 2);
    assert_eq!(h.controller.validation().get(A), Some(true));
    assert_eq!(h.controller.current_index(), 0);
}

#[test]
fn test_validation_requires_probe() {
    let config = SessionConfig {
        validate_sources: true,
        ..Default::default()
    };
    let result = PlaybackController::builder(config)
        .catalog_source(Arc::new(StaticCatalogSource::new("id,url\n1,a.mp4")))
        .host(Arc::new(ScriptedHost::default()))
        .build();
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

// =============================================================================
// Spawned Session
// =============================================================================

async fn wait_for(events: &mut broadcast::Receiver<EventRecord>, wanted: SessionEvent) {
    loop {
        let record = events.recv().await.unwrap();
        if record.event == wanted {
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_spawned_session_handles_commands() {
    let h = harness(ScriptedHost::new(SourceScript::Ready));
    let (handle, task) = h.controller.spawn();
    let mut events = handle.subscribe();

    tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(
            &mut events,
            SessionEvent::StatusChanged {
                from: SessionStatus::Loading,
                to: SessionStatus::Playing,
                index: 0,
            },
        ),
    )
    .await
    .unwrap();

    handle.jump_to_id("2").await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(
            &mut events,
            SessionEvent::IndexChanged {
                index: 1,
                id: "2".into(),
                direction: Direction::Up,
            },
        ),
    )
    .await
    .unwrap();

    assert!(matches!(
        handle.jump_to_id("404").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        handle.set_playback_rate(-1.0).await,
        Err(Error::InvalidPlaybackRate(_))
    ));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(matches!(handle.next().await, Err(Error::SessionClosed)));
}
