//! Health monitor tests

mod helpers;

use helpers::*;
use jukebox_common::events::{
    ConnectionQuality, DeviceHealth, JukeboxEvent, PlaybackHealth, RecoveryCause,
    TokenHealth,
};
use jukebox_session::config::HealthConfig;
use jukebox_session::device::SdkEvent;
use jukebox_session::error::ApiError;
use jukebox_session::health::HealthMonitor;
use jukebox_session::recovery::ConnectionTracker;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

struct HealthRig {
    rig: SessionRig,
    connection: Arc<ConnectionTracker>,
    monitor: Arc<HealthMonitor>,
}

async fn health_rig() -> HealthRig {
    let rig = SessionRig::new(
        FakeSdkLoader::new(SdkBehavior::Ready(DEVICE_ID.to_string())),
        FakePlayerApi::new().with_device(DEVICE_ID),
    );
    rig.session.initialize().await.unwrap();

    let connection = Arc::new(ConnectionTracker::new(3, rig.events.clone()));
    let monitor = Arc::new(HealthMonitor::new(
        rig.session.clone(),
        rig.player.clone(),
        rig.tokens.clone(),
        Arc::clone(&connection),
        rig.recovery.clone(),
        rig.events.clone(),
        HealthConfig::default(),
    ));

    HealthRig {
        rig,
        connection,
        monitor,
    }
}

#[tokio::test(start_paused = true)]
async fn test_playing_on_our_device_is_healthy() {
    let mut h = health_rig().await;
    h.rig
        .player
        .set_state(Some(player_state(DEVICE_ID, true, Some("t1"))));
    let mut events = h.rig.events.subscribe();

    let status = h.monitor.tick().await;

    assert_eq!(status.device, DeviceHealth::Healthy);
    assert_eq!(status.playback, PlaybackHealth::Playing);
    assert_eq!(status.token, TokenHealth::Valid);
    assert_eq!(status.connection, ConnectionQuality::Good);
    assert_eq!(h.monitor.current(), status);
    assert!(h.rig.drain_triggers().is_empty());
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, JukeboxEvent::HealthUpdated { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_paused_track_reads_as_paused() {
    let h = health_rig().await;
    h.rig
        .player
        .set_state(Some(player_state(DEVICE_ID, false, Some("t1"))));

    let status = h.monitor.tick().await;
    assert_eq!(status.device, DeviceHealth::Healthy);
    assert_eq!(status.playback, PlaybackHealth::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_other_device_is_disconnected_and_signals_recovery() {
    let mut h = health_rig().await;
    h.rig
        .player
        .set_state(Some(player_state("phone", true, Some("t1"))));

    let status = h.monitor.tick().await;

    assert_eq!(status.device, DeviceHealth::Disconnected);
    assert_eq!(h.rig.drain_triggers(), vec![RecoveryCause::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_playing_anywhere_is_stopped_and_disconnected() {
    let mut h = health_rig().await;
    h.rig.player.set_state(None);

    let status = h.monitor.tick().await;

    assert_eq!(status.device, DeviceHealth::Disconnected);
    assert_eq!(status.playback, PlaybackHealth::Stopped);
    assert_eq!(h.rig.drain_triggers(), vec![RecoveryCause::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_api_failure_is_unresponsive() {
    let mut h = health_rig().await;
    h.rig
        .player
        .set_player_state_error(Some(ApiError::Network("timed out".to_string())));

    let status = h.monitor.tick().await;

    assert_eq!(status.device, DeviceHealth::Unresponsive);
    assert_eq!(status.playback, PlaybackHealth::Error);
    assert!(h.rig.drain_triggers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_playback_errors_are_unresponsive() {
    let h = health_rig().await;
    h.rig
        .player
        .set_state(Some(player_state(DEVICE_ID, false, Some("t1"))));
    let sdk = h.rig.loader.latest();
    for _ in 0..3 {
        sdk.emit(SdkEvent::PlaybackError("stalled".to_string())).await;
    }
    settle().await;

    let status = h.monitor.tick().await;
    assert_eq!(status.device, DeviceHealth::Unresponsive);
}

#[tokio::test(start_paused = true)]
async fn test_token_failure_is_reported() {
    let h = health_rig().await;
    h.rig.credentials.failing.store(true, Ordering::SeqCst);
    h.rig.tokens.clear_cache();
    assert!(h.rig.tokens.get_token().await.is_err());

    let status = h.monitor.tick().await;
    assert_eq!(status.token, TokenHealth::Error);
}

#[tokio::test(start_paused = true)]
async fn test_cadence_follows_connection_quality() {
    let h = health_rig().await;
    let calls = || h.rig.player.player_state_calls.load(Ordering::SeqCst);
    let baseline = calls();

    let task = tokio::spawn(Arc::clone(&h.monitor).run());
    settle().await;
    assert_eq!(calls(), baseline + 1, "First check runs immediately");

    // good quality: 30s cadence
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls(), baseline + 1);

    // poor quality wakes the loop and switches to 10s
    for _ in 0..3 {
        h.connection.record_failure();
    }
    settle().await;
    assert_eq!(h.connection.quality(), ConnectionQuality::Poor);
    assert_eq!(calls(), baseline + 2);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(calls(), baseline + 2);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls(), baseline + 3);

    task.abort();
}

#[test]
fn test_health_intervals_by_quality() {
    let config = HealthConfig::default();
    assert_eq!(config.interval_for(ConnectionQuality::Good), Duration::from_secs(30));
    assert_eq!(config.interval_for(ConnectionQuality::Unstable), Duration::from_secs(15));
    assert_eq!(config.interval_for(ConnectionQuality::Poor), Duration::from_secs(10));
}
