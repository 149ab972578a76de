//! Integration tests for the session manager
//!
//! A mock engine stands in for the decode/effects/output pipeline; the
//! tests drive the manager through real session workflows and verify the
//! handoff, completion, and scrobbling semantics end to end.

use chorus_playback::{
    EngineFactory, EngineStatus, LoopRegion, PlaybackEngine, PlaybackStatus, Result, Scrobbler,
    SessionConfig, SessionError, SessionEvent, SessionManager, Song, StoppedNotice,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ===== Test Helpers =====

struct MockState {
    loaded: Option<PathBuf>,
    status: EngineStatus,
    position: Duration,
    duration: Duration,
    rate: f32,
    pitch: f32,
    released: bool,
}

/// Test-side handle to one created engine
#[derive(Clone)]
struct MockHandle {
    state: Arc<Mutex<MockState>>,
    notices: mpsc::UnboundedSender<StoppedNotice>,
}

impl MockHandle {
    fn set_position(&self, position: Duration) {
        self.state.lock().unwrap().position = position;
    }

    fn position(&self) -> Duration {
        self.state.lock().unwrap().position
    }

    fn status(&self) -> EngineStatus {
        self.state.lock().unwrap().status
    }

    fn rate(&self) -> f32 {
        self.state.lock().unwrap().rate
    }

    fn pitch(&self) -> f32 {
        self.state.lock().unwrap().pitch
    }

    fn released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    /// Simulate the pipeline stopping on its own (natural end or runtime
    /// failure).
    fn finish(&self, error: Option<&str>) {
        self.state.lock().unwrap().status = EngineStatus::Stopped;
        let _ = self.notices.send(StoppedNotice {
            error: error.map(str::to_string),
        });
    }
}

/// Mock engine; file behavior is configured on the factory
struct MockEngine {
    state: Arc<Mutex<MockState>>,
    notices: mpsc::UnboundedSender<StoppedNotice>,
    durations: Arc<Mutex<HashMap<PathBuf, Duration>>>,
}

impl PlaybackEngine for MockEngine {
    fn load(&mut self, path: &Path) -> Result<()> {
        if path.starts_with("/missing") {
            return Err(SessionError::NotFound(path.display().to_string()));
        }
        let duration = self
            .durations
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(Duration::from_secs(200));
        let mut state = self.state.lock().unwrap();
        state.loaded = Some(path.to_path_buf());
        state.duration = duration;
        state.position = Duration::ZERO;
        state.status = EngineStatus::Paused;
        Ok(())
    }

    fn play(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.loaded.is_some() {
            state.status = EngineStatus::Playing;
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.loaded.is_some() {
            state.status = EngineStatus::Paused;
        }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.loaded.is_some() && state.status != EngineStatus::Stopped {
            state.status = EngineStatus::Stopped;
            let _ = self.notices.send(StoppedNotice { error: None });
        }
    }

    fn seek(&mut self, position: Duration) {
        let mut state = self.state.lock().unwrap();
        state.position = position.min(state.duration);
    }

    fn position(&self) -> Duration {
        self.state.lock().unwrap().position
    }

    fn duration(&self) -> Duration {
        self.state.lock().unwrap().duration
    }

    fn status(&self) -> EngineStatus {
        self.state.lock().unwrap().status
    }

    fn set_rate(&mut self, rate: f32) {
        self.state.lock().unwrap().rate = rate;
    }

    fn set_pitch_semitones(&mut self, semitones: f32) {
        self.state.lock().unwrap().pitch = semitones;
    }

    fn release_internals(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.loaded = None;
        state.status = EngineStatus::Stopped;
        state.released = true;
    }
}

#[derive(Clone, Default)]
struct MockFactory {
    durations: Arc<Mutex<HashMap<PathBuf, Duration>>>,
    engines: Arc<Mutex<Vec<MockHandle>>>,
}

impl MockFactory {
    fn set_duration(&self, path: &str, duration: Duration) {
        self.durations
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), duration);
    }

    fn engine(&self, index: usize) -> MockHandle {
        self.engines.lock().unwrap()[index].clone()
    }

    fn engine_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    fn latest(&self) -> MockHandle {
        self.engines
            .lock()
            .unwrap()
            .last()
            .expect("no engine created")
            .clone()
    }
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    fn create(&self, notices: mpsc::UnboundedSender<StoppedNotice>) -> MockEngine {
        let state = Arc::new(Mutex::new(MockState {
            loaded: None,
            status: EngineStatus::Stopped,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            rate: 1.0,
            pitch: 0.0,
            released: false,
        }));
        self.engines.lock().unwrap().push(MockHandle {
            state: Arc::clone(&state),
            notices: notices.clone(),
        });
        MockEngine {
            state,
            notices,
            durations: Arc::clone(&self.durations),
        }
    }
}

/// Scrobbler that records every call
#[derive(Default)]
struct RecordingScrobbler {
    now_playing: Mutex<Vec<String>>,
    scrobbles: Mutex<Vec<(String, Duration)>>,
}

#[async_trait]
impl Scrobbler for RecordingScrobbler {
    async fn update_now_playing(&self, song: &Song) {
        self.now_playing.lock().unwrap().push(song.title.clone());
    }

    async fn scrobble(&self, song: &Song, played: Duration, _timestamp: DateTime<Utc>) {
        self.scrobbles
            .lock()
            .unwrap()
            .push((song.title.clone(), played));
    }
}

fn song(path: &str, title: &str, duration_secs: u64) -> Song {
    Song {
        path: PathBuf::from(path),
        title: title.to_string(),
        artist: "Artist".to_string(),
        duration: Duration::from_secs(duration_secs),
        saved_loop: None,
        loop_active: false,
    }
}

fn looped_song(path: &str, duration_secs: u64, start_secs: u64, end_secs: u64) -> Song {
    Song {
        saved_loop: Some(LoopRegion {
            start: Duration::from_secs(start_secs),
            end: Duration::from_secs(end_secs),
        }),
        loop_active: true,
        ..song(path, "Looped", duration_secs)
    }
}

fn harness() -> (
    SessionManager<MockFactory>,
    chorus_playback::SessionChannels,
    MockFactory,
    Arc<RecordingScrobbler>,
) {
    let factory = MockFactory::default();
    let scrobbler = Arc::new(RecordingScrobbler::default());
    let (manager, channels) = SessionManager::new(
        factory.clone(),
        Arc::clone(&scrobbler) as Arc<dyn Scrobbler>,
        SessionConfig::default(),
    );
    (manager, channels, factory, scrobbler)
}

/// Let spawned tasks (notice forwarders, scrobble calls) run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn drain_events(channels: &mut chorus_playback::SessionChannels) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = channels.events_rx.try_recv() {
        events.push(event);
    }
    events
}

// ===== Session lifecycle =====

#[tokio::test(start_paused = true)]
async fn play_starts_session_immediately() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    assert!(manager.start_new_session(song("/music/a.flac", "A", 200)));

    let state = manager.state();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert!(state.is_playing);
    assert_eq!(state.position, Duration::ZERO);
    assert_eq!(state.duration, Duration::from_secs(200));
    assert_eq!(
        state.current_song.as_ref().map(|s| s.title.as_str()),
        Some("A")
    );
    assert_eq!(manager.engine_status(), Some(EngineStatus::Playing));
    assert!(manager.monitor_running());

    settle().await;
    assert_eq!(*scrobbler.now_playing.lock().unwrap(), vec!["A"]);

    let events = drain_events(&mut channels);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::TrackChanged { song: Some(s) } if s.title == "A")));
    assert_eq!(factory.engine_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_load_leaves_session_idle() {
    let (mut manager, mut channels, factory, _) = harness();

    assert!(!manager.start_new_session(song("/missing/gone.flac", "Gone", 200)));

    let state = manager.state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert!(state.current_song.is_none());
    assert!(!state.is_playing);
    assert_eq!(factory.engine_count(), 1);

    let events = drain_events(&mut channels);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionError { .. })));
    // The failed session must not leave a stale TrackChanged(Some) behind.
    assert!(matches!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TrackChanged { .. }))
            .last(),
        Some(SessionEvent::TrackChanged { song: None })
    ));
}

#[tokio::test(start_paused = true)]
async fn new_session_supersedes_old_without_waiting() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(120));

    // Start B while A is still playing. The switch must not wait for A's
    // stop notice.
    manager.start_new_session(song("/music/b.flac", "B", 180));
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("B")
    );
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert_eq!(factory.engine_count(), 2);
    assert_eq!(factory.engine(1).status(), EngineStatus::Playing);

    // A's stop notice arrives later; it completes the old session from the
    // values captured at handoff time and leaves B untouched.
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(scrobbles, vec![("A".to_string(), Duration::from_secs(120))]);
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("B")
    );
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn rapid_track_changes_complete_each_exactly_once() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(150));
    manager.start_new_session(song("/music/b.flac", "B", 200));
    factory.engine(1).set_position(Duration::from_secs(110));
    manager.start_new_session(song("/music/c.flac", "C", 200));

    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let mut scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    scrobbles.sort();
    assert_eq!(
        scrobbles,
        vec![
            ("A".to_string(), Duration::from_secs(150)),
            ("B".to_string(), Duration::from_secs(110)),
        ]
    );
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("C")
    );
}

// ===== Completion classification =====

#[tokio::test(start_paused = true)]
async fn natural_end_keeps_song_and_scrobbles_full_duration() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(199_600));

    // Let the monitor tick so the manager's last observed position is
    // near the end, then let the pipeline run out.
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);
    engine.finish(None);
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let state = manager.state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert!(!state.is_playing);
    assert_eq!(
        state.current_song.as_ref().map(|s| s.title.as_str()),
        Some("A"),
        "natural end must keep the song for track advancement"
    );

    let events = drain_events(&mut channels);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackEndedNaturally { song } if song.title == "A")));

    // Played to completion scrobbles at the full duration, not at the
    // last polled position.
    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(scrobbles, vec![("A".to_string(), Duration::from_secs(200))]);
}

#[tokio::test(start_paused = true)]
async fn error_stop_clears_song_and_reports() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_secs(140));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);
    engine.finish(Some("device disconnected"));
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let state = manager.state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert!(state.current_song.is_none());

    let events = drain_events(&mut channels);
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::SessionError { message } if message.contains("device disconnected"))
    ));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackEndedNaturally { .. })));

    // Error at the position actually reached still counts for history.
    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(scrobbles, vec![("A".to_string(), Duration::from_secs(140))]);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_near_end_is_not_a_natural_end() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_millis(199_900));

    manager.stop();
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let state = manager.state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert!(state.current_song.is_none(), "explicit stop clears the song");

    let events = drain_events(&mut channels);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackEndedNaturally { .. })));

    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(
        scrobbles,
        vec![("A".to_string(), Duration::from_millis(199_900))]
    );
}

#[tokio::test(start_paused = true)]
async fn short_song_is_never_scrobbled() {
    let (mut manager, mut channels, factory, scrobbler) = harness();
    factory.set_duration("/music/jingle.flac", Duration::from_secs(20));

    manager.start_new_session(song("/music/jingle.flac", "Jingle", 20));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(19_800));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);
    engine.finish(None);
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    // The natural-end event still fires; only the scrobble is skipped.
    let events = drain_events(&mut channels);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackEndedNaturally { .. })));
    assert!(scrobbler.scrobbles.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_below_threshold_does_not_scrobble() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(30)); // < 50% and < 240s

    manager.stop();
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    assert!(scrobbler.scrobbles.lock().unwrap().is_empty());
}

// ===== Pause / resume / seek =====

#[tokio::test(start_paused = true)]
async fn pause_resume_workflow() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(42));

    manager.pause();
    assert_eq!(manager.state().status, PlaybackStatus::Paused);
    assert!(!manager.state().is_playing);
    assert_eq!(manager.state().position, Duration::from_secs(42));
    assert_eq!(factory.engine(0).status(), EngineStatus::Paused);

    manager.resume();
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert!(manager.state().is_playing);
    assert_eq!(factory.engine(0).status(), EngineStatus::Playing);
    // No reload happened; the same engine continued.
    assert_eq!(factory.engine_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_without_session_is_a_no_op() {
    let (mut manager, _channels, factory, _) = harness();

    manager.pause();
    assert_eq!(manager.state().status, PlaybackStatus::Stopped);
    assert_eq!(factory.engine_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn resume_from_stopped_reloads_at_last_position() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(199_700));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);
    engine.finish(None);
    settle().await;
    manager.pump_engine_events(&mut channels);

    // Song survived the natural end; resume builds a fresh pipeline.
    assert_eq!(manager.state().status, PlaybackStatus::Stopped);
    manager.resume();

    assert_eq!(factory.engine_count(), 2);
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert_eq!(factory.engine(1).status(), EngineStatus::Playing);
    // The reload seeks to the remembered position, clamped away from the
    // file end so it cannot instantly re-trigger natural-end detection.
    let position = factory.engine(1).position();
    assert!(position <= Duration::from_millis(199_900));
    assert!(position >= Duration::from_millis(199_600));
}

#[tokio::test(start_paused = true)]
async fn seek_near_end_is_clamped() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    manager.seek(Duration::from_secs(200));

    assert_eq!(
        factory.engine(0).position(),
        Duration::from_millis(199_900)
    );
    assert_eq!(manager.state().position, Duration::from_millis(199_900));
}

#[tokio::test(start_paused = true)]
async fn seek_while_paused_emits_a_position_update() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    manager.pause();
    drain_events(&mut channels);

    manager.seek(Duration::from_secs(60));
    assert_eq!(factory.engine(0).position(), Duration::from_secs(60));

    // The monitor is not running while paused, so the seek itself must
    // surface the new position.
    manager.pump_engine_events(&mut channels);
    let events = drain_events(&mut channels);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::PositionChanged { position, .. } if *position == Duration::from_secs(60)
    )));
}

#[tokio::test(start_paused = true)]
async fn rate_and_pitch_apply_live_and_survive_track_change() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    manager.set_rate(1.25);
    manager.set_pitch_semitones(-2.0);
    assert_eq!(factory.engine(0).rate(), 1.25);
    assert_eq!(factory.engine(0).pitch(), -2.0);

    // The settings belong to the session, not the pipeline; a new track
    // starts with them already applied.
    manager.start_new_session(song("/music/b.flac", "B", 200));
    settle().await;
    manager.pump_engine_events(&mut channels);
    assert_eq!(factory.engine(1).rate(), 1.25);
    assert_eq!(factory.engine(1).pitch(), -2.0);
}

// ===== Loop-region playback =====

#[tokio::test(start_paused = true)]
async fn active_loop_starts_playback_at_loop_start() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(looped_song("/music/looped.flac", 200, 30, 45));
    assert_eq!(factory.engine(0).position(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn monitor_triggers_loop_seek_back_to_start() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(looped_song("/music/looped.flac", 200, 30, 45));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(44_960));

    // 44.96s + 50ms edge reaches the 45s end; the poll requests the seek
    // and the manager routes it back through the coordinator.
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);

    assert_eq!(engine.position(), Duration::from_secs(30));
    assert_eq!(engine.status(), EngineStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn loop_ending_at_file_end_defers_to_natural_completion() {
    let (mut manager, mut channels, factory, _) = harness();
    factory.set_duration("/music/looped.flac", Duration::from_millis(45_100));

    // Loop end 45s, file end 45.1s: inside the guard window, so the loop
    // stands down and the song is allowed to finish.
    let mut song = looped_song("/music/looped.flac", 45, 30, 45);
    song.duration = Duration::from_millis(45_100);
    manager.start_new_session(song);
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(44_960));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);

    assert_eq!(engine.position(), Duration::from_millis(44_960));
}

#[tokio::test(start_paused = true)]
async fn seek_outside_loop_region_snaps_to_loop_start() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(looped_song("/music/looped.flac", 200, 30, 45));
    manager.seek(Duration::from_secs(120));
    assert_eq!(factory.engine(0).position(), Duration::from_secs(30));

    manager.seek(Duration::from_secs(40));
    assert_eq!(factory.engine(0).position(), Duration::from_secs(40));
}

// ===== Monitor lifecycle =====

#[tokio::test(start_paused = true)]
async fn monitor_stops_itself_when_playback_pauses() {
    let (mut manager, _channels, _factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    assert!(manager.monitor_running());

    manager.pause();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!manager.monitor_running());

    manager.resume();
    assert!(manager.monitor_running());
}

#[tokio::test(start_paused = true)]
async fn position_updates_flow_while_playing() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(7));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);

    assert_eq!(manager.state().position, Duration::from_secs(7));
    let events = drain_events(&mut channels);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::PositionChanged { position, .. } if *position == Duration::from_secs(7)
    )));
}

// ===== Resource interlock =====

#[tokio::test(start_paused = true)]
async fn force_release_and_reload_restores_playback() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(90));

    manager.force_release_engine();
    assert!(factory.engine(0).released());
    assert_eq!(manager.state().status, PlaybackStatus::Paused);
    assert_eq!(manager.state().position, Duration::from_secs(90));
    // The song identity never changes while released.
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("A")
    );

    manager.force_reload_engine();
    assert_eq!(factory.engine_count(), 2);
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert_eq!(factory.engine(1).position(), Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn force_reload_keeps_paused_sessions_paused() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    manager.pause();
    factory.engine(0).set_position(Duration::from_secs(90));

    manager.force_release_engine();
    manager.force_reload_engine();

    assert_eq!(manager.state().status, PlaybackStatus::Paused);
    assert_eq!(factory.latest().status(), EngineStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn stop_while_released_finalizes_synchronously() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(120));
    manager.force_release_engine();

    // A released engine sends no stop notice; the explicit stop must not
    // wait for one.
    manager.stop();
    settle().await;
    manager.pump_engine_events(&mut channels);
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert!(manager.state().current_song.is_none());
    assert_eq!(manager.state().status, PlaybackStatus::Stopped);
    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(scrobbles, vec![("A".to_string(), Duration::from_secs(120))]);
    let events = drain_events(&mut channels);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::TrackChanged { song: None })));
}

#[tokio::test(start_paused = true)]
async fn resume_while_released_reloads_and_plays() {
    let (mut manager, _channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(60));
    manager.force_release_engine();

    manager.resume();

    assert_eq!(factory.engine_count(), 2);
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert!(manager.state().is_playing);
    assert_eq!(factory.engine(1).status(), EngineStatus::Playing);
    assert_eq!(factory.engine(1).position(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn seek_while_released_moves_the_remembered_position() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(60));
    manager.force_release_engine();
    drain_events(&mut channels);

    manager.seek(Duration::from_secs(90));

    // No new engine yet; the position is only remembered.
    assert_eq!(factory.engine_count(), 1);
    assert_eq!(manager.state().position, Duration::from_secs(90));
    let events = drain_events(&mut channels);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::PositionChanged { position, .. } if *position == Duration::from_secs(90)
    )));

    manager.force_reload_engine();
    assert_eq!(factory.engine(1).position(), Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn new_song_while_released_completes_the_old_one() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    factory.engine(0).set_position(Duration::from_secs(130));
    manager.force_release_engine();

    // A released engine sends no stop notice; switching songs must still
    // complete the old session exactly once.
    manager.start_new_session(song("/music/b.flac", "B", 200));
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;

    let scrobbles = scrobbler.scrobbles.lock().unwrap().clone();
    assert_eq!(scrobbles, vec![("A".to_string(), Duration::from_secs(130))]);
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("B")
    );
    assert_eq!(manager.state().status, PlaybackStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn late_notice_from_replaced_engine_is_ignored() {
    let (mut manager, mut channels, factory, _) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    manager.force_release_engine();
    manager.force_reload_engine();

    // The old generation fires a spurious notice after being replaced.
    factory.engine(0).finish(Some("stale pipeline"));
    settle().await;
    manager.pump_engine_events(&mut channels);

    assert_eq!(manager.state().status, PlaybackStatus::Playing);
    assert_eq!(
        manager.state().current_song.as_ref().map(|s| s.title.as_str()),
        Some("A")
    );
    let events = drain_events(&mut channels);
    assert!(!events.iter().any(
        |e| matches!(e, SessionEvent::SessionError { message } if message.contains("stale"))
    ));
}

// ===== Idle stop =====

#[tokio::test(start_paused = true)]
async fn stop_with_song_but_no_engine_still_finalizes() {
    let (mut manager, mut channels, factory, scrobbler) = harness();

    manager.start_new_session(song("/music/a.flac", "A", 200));
    let engine = factory.engine(0);
    engine.set_position(Duration::from_millis(199_700));

    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.pump_engine_events(&mut channels);
    engine.finish(None);
    settle().await;
    manager.pump_engine_events(&mut channels);
    settle().await;
    scrobbler.scrobbles.lock().unwrap().clear();
    drain_events(&mut channels);

    // Stopped-with-song (after natural end): an explicit stop clears it.
    manager.stop();
    settle().await;

    assert!(manager.state().current_song.is_none());
    let events = drain_events(&mut channels);
    assert!(matches!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TrackChanged { .. }))
            .last(),
        Some(SessionEvent::TrackChanged { song: None })
    ));
}
