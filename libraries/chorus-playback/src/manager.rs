//! Session manager - core orchestration
//!
//! Owns the *current* engine infrastructure, performs the old→new handoff
//! on track change, routes stop notices through completion handling, and
//! exposes the session-level command layer.
//!
//! All methods must be called from one logical consumer context (the
//! facade's driver task); background tasks talk to the manager exclusively
//! through the generation-tagged engine-event channel.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::completion::{complete_stop, CapturedStop, StopClass};
use crate::coordinator::EngineCoordinator;
use crate::engine::{EngineFactory, EngineStatus};
use crate::events::{EngineEvent, SessionEvent};
use crate::scrobble::{is_scrobble_eligible, Scrobbler};
use crate::types::{PlaybackStatus, SessionConfig, SessionState, Song};

/// Receiving ends created alongside a [`SessionManager`]
pub struct SessionChannels {
    /// Engine-side events; feed these back into
    /// [`SessionManager::handle_engine_event`]
    pub(crate) engine_rx: mpsc::UnboundedReceiver<EngineEvent>,

    /// Outward session events
    pub events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    /// Live state snapshots
    pub state_rx: watch::Receiver<SessionState>,
}

/// Position/playing-state remembered across an engine release
#[derive(Debug, Clone, Copy)]
struct ReleasedSession {
    position: Duration,
    was_playing: bool,
}

/// Top-level session orchestrator
pub struct SessionManager<F: EngineFactory> {
    config: SessionConfig,
    factory: F,
    scrobbler: Arc<dyn Scrobbler>,
    state: SessionState,

    /// The one current engine infrastructure
    current: Option<EngineCoordinator<F::Engine>>,

    /// Superseded infrastructure still draining its stop notice, keyed by
    /// generation, together with the values captured at handoff time
    draining: HashMap<u64, (CapturedStop, EngineCoordinator<F::Engine>)>,

    /// Captured values for an explicit stop issued on the current
    /// generation, consumed when its stop notice arrives
    pending_explicit: Option<CapturedStop>,

    /// Remembered transport state while the engine is force-released
    released: Option<ReleasedSession>,

    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    current_song_tx: watch::Sender<Option<PathBuf>>,
    state_tx: watch::Sender<SessionState>,
}

impl<F: EngineFactory> SessionManager<F> {
    /// Create a manager plus the channels its consumers read from.
    pub fn new(
        factory: F,
        scrobbler: Arc<dyn Scrobbler>,
        config: SessionConfig,
    ) -> (Self, SessionChannels) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (current_song_tx, _) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        let manager = Self {
            config,
            factory,
            scrobbler,
            state: SessionState::default(),
            current: None,
            draining: HashMap::new(),
            pending_explicit: None,
            released: None,
            engine_tx,
            events_tx,
            current_song_tx,
            state_tx,
        };
        let channels = SessionChannels {
            engine_rx,
            events_rx,
            state_rx,
        };
        (manager, channels)
    }

    /// Current session state (exclusively mutated here).
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    // ===== Session lifecycle =====

    /// Start a new session for `song`, superseding any current one.
    ///
    /// The old infrastructure is detached, its position/duration captured
    /// synchronously, and its eventual stop notice completes the *old*
    /// song from those captured values. The new session starts without
    /// waiting for the old teardown. Returns false when the load failed,
    /// in which case no song is active.
    pub fn start_new_session(&mut self, song: Song) -> bool {
        self.supersede_current();

        if song.path.as_os_str().is_empty() {
            warn!(title = %song.title, "rejecting song without a path");
            self.finalize_idle();
            return false;
        }

        info!(song = %song.path.display(), "starting new session");
        self.load_new_session(song)
    }

    /// Detach the current infrastructure and schedule its completion.
    fn supersede_current(&mut self) {
        self.pending_explicit = None;

        let Some(mut old) = self.current.take() else {
            return;
        };

        // A force-released engine has no pipeline left, so no stop notice
        // will ever arrive; complete it synchronously instead.
        if let Some(released) = self.released.take() {
            if let Some(song) = old.song().cloned() {
                let captured = CapturedStop {
                    position: released.position,
                    duration: song.duration,
                    song,
                    explicit: true,
                };
                self.run_detached_completion(&captured, None);
            }
            return;
        }

        let Some(song) = old.song().cloned() else {
            return;
        };

        // Capture before issuing the stop; the engine may be torn down by
        // the time its notice arrives.
        old.stop_monitor();
        let captured = CapturedStop {
            position: old.position(),
            duration: old.duration(),
            song,
            explicit: true,
        };
        old.stop();
        debug!(
            generation = old.generation(),
            position = ?captured.position,
            "superseded session awaiting stop notice"
        );
        self.draining.insert(old.generation(), (captured, old));
    }

    /// Load `song` into fresh infrastructure and start playing from zero.
    fn load_new_session(&mut self, song: Song) -> bool {
        let mut coordinator = self.new_coordinator();

        self.state.current_song = Some(song.clone());
        self.current_song_tx.send_replace(Some(song.path.clone()));
        coordinator.set_song(song.clone());

        if let Err(e) = coordinator.load(&song.path, self.state.rate, self.state.pitch_semitones) {
            warn!(song = %song.path.display(), error = %e, "session load failed");
            self.emit(SessionEvent::SessionError {
                message: e.to_string(),
            });
            self.finalize_idle();
            return false;
        }

        self.state.position = Duration::ZERO;
        self.state.duration = coordinator.duration();
        coordinator.play(true);
        self.current = Some(coordinator);

        self.state.set_status(PlaybackStatus::Playing);
        self.state.is_playing = true;
        self.emit(SessionEvent::TrackChanged {
            song: Some(song.clone()),
        });
        self.emit_state_changed();

        let scrobbler = Arc::clone(&self.scrobbler);
        tokio::spawn(async move {
            scrobbler.update_now_playing(&song).await;
        });
        true
    }

    /// Load `song` into fresh infrastructure, resuming at `position`.
    ///
    /// Issues play only when `should_play`; otherwise the session comes
    /// back paused at `position`.
    fn reload_session(&mut self, song: Song, position: Duration, should_play: bool) -> bool {
        let mut coordinator = self.new_coordinator();

        self.state.current_song = Some(song.clone());
        self.current_song_tx.send_replace(Some(song.path.clone()));
        coordinator.set_song(song.clone());

        if let Err(e) = coordinator.load(&song.path, self.state.rate, self.state.pitch_semitones) {
            warn!(song = %song.path.display(), error = %e, "session reload failed");
            self.emit(SessionEvent::SessionError {
                message: e.to_string(),
            });
            self.finalize_idle();
            return false;
        }

        self.state.duration = coordinator.duration();
        coordinator.seek(position);

        if should_play {
            coordinator.resume(true);
            self.state.position = coordinator.position();
            self.current = Some(coordinator);
            self.state.set_status(PlaybackStatus::Playing);
            self.state.is_playing = true;
        } else {
            self.state.position = coordinator.position();
            self.current = Some(coordinator);
            self.state.set_status(PlaybackStatus::Paused);
        }
        self.emit_state_changed();
        true
    }

    // ===== Command layer =====

    /// Pause, only when playing.
    pub fn pause(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(coordinator) = self.current.as_mut() {
            coordinator.pause();
            self.state.position = coordinator.position();
        }
        self.state.set_status(PlaybackStatus::Paused);
        self.emit_state_changed();
    }

    /// Resume: from `Paused` the pipeline continues; from `Stopped` with a
    /// song still set, the session is fully reloaded at the last known
    /// position.
    pub fn resume(&mut self) {
        // A released engine cannot resume in place; rebuild it at the
        // remembered position and start playing.
        if let Some(released) = self.released.take() {
            if let Some(song) = self.state.current_song.clone() {
                self.current = None;
                info!(song = %song.path.display(), position = ?released.position,
                    "resume while released, reloading");
                self.reload_session(song, released.position, true);
            }
            return;
        }

        match self.state.status {
            PlaybackStatus::Playing => {}
            PlaybackStatus::Paused => {
                if let Some(coordinator) = self.current.as_mut() {
                    coordinator.resume(true);
                    self.state.set_status(PlaybackStatus::Playing);
                    self.state.is_playing = true;
                    self.emit_state_changed();
                }
            }
            PlaybackStatus::Stopped => {
                if let Some(song) = self.state.current_song.clone() {
                    let position = self.state.position;
                    info!(song = %song.path.display(), ?position, "resume from stopped, reloading");
                    self.reload_session(song, position, true);
                }
            }
        }
    }

    /// Explicit stop.
    ///
    /// Completion handling runs even when already stopped, so scrobble and
    /// finalization semantics hold for idle state too.
    pub fn stop(&mut self) {
        // A force-released engine has no pipeline, so no stop notice will
        // ever arrive; finalize synchronously from the remembered position.
        if let Some(released) = self.released.take() {
            self.current = None;
            if let Some(song) = self.state.current_song.clone() {
                let captured = CapturedStop {
                    position: released.position,
                    duration: self.state.duration,
                    song,
                    explicit: true,
                };
                self.run_detached_completion(&captured, None);
            }
            self.finalize_idle();
            return;
        }

        match self.current.as_mut() {
            Some(coordinator) => {
                let captured = self.state.current_song.clone().map(|song| CapturedStop {
                    position: coordinator.position(),
                    duration: coordinator.duration(),
                    song,
                    explicit: true,
                });
                self.pending_explicit = captured;
                coordinator.stop();
            }
            None => {
                // Already idle; still run the explicit completion pass.
                if let Some(song) = self.state.current_song.clone() {
                    let captured = CapturedStop {
                        position: self.state.position,
                        duration: self.state.duration,
                        song,
                        explicit: true,
                    };
                    self.run_detached_completion(&captured, None);
                }
                self.finalize_idle();
            }
        }
    }

    /// Loop-aware seek within the current session.
    pub fn seek(&mut self, position: Duration) {
        // With the engine released there is nothing to seek; move the
        // remembered position so the eventual reload lands there.
        if let Some(released) = self.released.as_mut() {
            let clamped = position.min(self.state.duration);
            released.position = clamped;
            self.state.position = clamped;
            self.state_tx.send_replace(self.state.clone());
            self.emit(SessionEvent::PositionChanged {
                position: clamped,
                duration: self.state.duration,
            });
            return;
        }

        if let Some(coordinator) = self.current.as_mut() {
            coordinator.seek(position);
            self.state.position = coordinator.position();
            self.state_tx.send_replace(self.state.clone());
        }
    }

    /// Change the playback rate live.
    pub fn set_rate(&mut self, rate: f32) {
        self.state.rate = rate;
        if let Some(coordinator) = self.current.as_mut() {
            coordinator.set_rate(rate);
        }
        self.emit_state_changed();
    }

    /// Change the pitch shift live.
    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.state.pitch_semitones = semitones;
        if let Some(coordinator) = self.current.as_mut() {
            coordinator.set_pitch_semitones(semitones);
        }
        self.emit_state_changed();
    }

    // ===== Resource interlock =====

    /// Release the engine's hold on the current song's file (so another
    /// component can rewrite it), remembering position and playing state.
    /// The current song identity does not change.
    pub fn force_release_engine(&mut self) {
        let Some(coordinator) = self.current.as_mut() else {
            return;
        };
        if self.state.current_song.is_none() {
            return;
        }

        let released = ReleasedSession {
            position: coordinator.position(),
            was_playing: self.state.status == PlaybackStatus::Playing,
        };
        info!(position = ?released.position, was_playing = released.was_playing,
            "releasing engine for external file operation");
        coordinator.release_internals();
        self.released = Some(released);
        self.state.position = released.position;
        self.state.set_status(PlaybackStatus::Paused);
        self.emit_state_changed();
    }

    /// Rebuild the engine for the current song at the remembered position,
    /// resuming playback if it was playing at release time.
    pub fn force_reload_engine(&mut self) {
        let Some(released) = self.released.take() else {
            return;
        };
        let Some(song) = self.state.current_song.clone() else {
            return;
        };
        // The released engine kept its coordinator slot; discard it and
        // build fresh infrastructure for the reload.
        self.current = None;
        info!(song = %song.path.display(), position = ?released.position, "reloading released engine");
        self.reload_session(song, released.position, released.was_playing);
    }

    // ===== Engine event handling =====

    /// Drain and route every engine event queued on `channels`.
    ///
    /// The facade's driver task does this continuously; embedders and
    /// tests call it after letting background tasks run.
    pub fn pump_engine_events(&mut self, channels: &mut SessionChannels) {
        while let Ok(event) = channels.engine_rx.try_recv() {
            self.handle_engine_event(event);
        }
    }

    /// Route one engine event. Stale generations are dropped (or, for
    /// draining infrastructure, complete the superseded session).
    pub(crate) fn handle_engine_event(&mut self, event: EngineEvent) {
        let generation = event.generation();

        if let EngineEvent::Stopped { error, .. } = &event {
            if self.draining.contains_key(&generation) {
                self.finalize_superseded(generation, error.clone());
                return;
            }
        }

        let is_current = self
            .current
            .as_ref()
            .is_some_and(|c| c.generation() == generation);
        if !is_current {
            debug!(generation, "dropping event from stale generation");
            return;
        }

        match event {
            EngineEvent::Position {
                position, duration, ..
            } => {
                self.state.position = position;
                self.state.duration = duration;
                self.state_tx.send_replace(self.state.clone());
                self.emit(SessionEvent::PositionChanged { position, duration });
            }
            EngineEvent::LoopSeekRequested { target, .. } => {
                if let Some(coordinator) = self.current.as_mut() {
                    coordinator.seek(target);
                }
            }
            EngineEvent::Stopped { error, .. } => {
                self.complete_current(error);
            }
        }
    }

    // ===== Completion =====

    /// Completion pass for the current session's stop notice.
    fn complete_current(&mut self, error: Option<String>) {
        // Dropping the coordinator stops the monitor and disposes the
        // infrastructure deterministically.
        let coordinator = self.current.take();
        drop(coordinator);

        let captured = self.pending_explicit.take().or_else(|| {
            self.state.current_song.clone().map(|song| CapturedStop {
                position: self.state.position,
                duration: self.state.duration,
                song,
                explicit: false,
            })
        });
        let Some(captured) = captured else {
            self.finalize_idle();
            return;
        };

        let outcome = complete_stop(&captured, error.is_some());
        debug!(class = ?outcome.class, position = ?captured.position, "completion pass");

        if let Some(message) = error {
            warn!(song = %captured.song.path.display(), %message, "engine stopped with error");
            self.emit(SessionEvent::SessionError { message });
        }
        if outcome.class == StopClass::Abnormal {
            // Not an error, not explicit, not near the end: either an
            // engine-state invariant broke or a format lied about its
            // duration. Keep the branch observable.
            warn!(
                song = %captured.song.path.display(),
                position = ?captured.position,
                duration = ?captured.duration,
                "stop did not classify as error, explicit, or natural end"
            );
        }

        if let Some(played) = outcome.scrobble_at {
            self.maybe_scrobble(captured.song.clone(), played);
        }

        if outcome.clear_song {
            self.finalize_idle();
        } else {
            self.state.set_status(PlaybackStatus::Stopped);
            self.emit_state_changed();
            if outcome.ended_naturally {
                info!(song = %captured.song.path.display(), "playback ended naturally");
                self.emit(SessionEvent::PlaybackEndedNaturally {
                    song: captured.song,
                });
            }
        }
    }

    /// Completion pass for a superseded generation; never touches current
    /// session state.
    fn finalize_superseded(&mut self, generation: u64, error: Option<String>) {
        let Some((captured, coordinator)) = self.draining.remove(&generation) else {
            return;
        };
        debug!(generation, "finalizing superseded session");
        self.run_detached_completion(&captured, error);
        drop(coordinator);
    }

    /// Scrobble-only completion for sessions that no longer own state.
    fn run_detached_completion(&self, captured: &CapturedStop, error: Option<String>) {
        let outcome = complete_stop(captured, error.is_some());
        if let Some(played) = outcome.scrobble_at {
            self.maybe_scrobble(captured.song.clone(), played);
        }
    }

    /// Clear the session: no current song, stopped, not playing.
    fn finalize_idle(&mut self) {
        self.pending_explicit = None;
        self.current = None;
        self.released = None;
        self.state.current_song = None;
        self.current_song_tx.send_replace(None);
        self.state.position = Duration::ZERO;
        self.state.duration = Duration::ZERO;
        self.state.set_status(PlaybackStatus::Stopped);
        self.emit(SessionEvent::TrackChanged { song: None });
        self.emit_state_changed();
    }

    fn maybe_scrobble(&self, song: Song, played: Duration) {
        if !is_scrobble_eligible(song.duration, played, self.config.scrobble) {
            debug!(song = %song.path.display(), ?played, "below scrobble threshold");
            return;
        }
        let scrobbler = Arc::clone(&self.scrobbler);
        // Fire-and-forget; the collaborator logs its own failures.
        tokio::spawn(async move {
            scrobbler.scrobble(&song, played, Utc::now()).await;
        });
    }

    // ===== Helpers =====

    fn new_coordinator(&self) -> EngineCoordinator<F::Engine> {
        EngineCoordinator::new(
            &self.factory,
            self.engine_tx.clone(),
            self.current_song_tx.subscribe(),
            self.config.monitor_interval,
        )
    }

    fn emit_state_changed(&mut self) {
        self.state_tx.send_replace(self.state.clone());
        self.emit(SessionEvent::StateChanged {
            state: self.state.clone(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // The receiver side may be gone during shutdown; nothing to do.
        let _ = self.events_tx.send(event);
    }

    /// Engine status of the current infrastructure, if any.
    pub fn engine_status(&self) -> Option<EngineStatus> {
        self.current.as_ref().map(|c| c.status())
    }

    /// Whether the position monitor of the current infrastructure runs.
    pub fn monitor_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.monitor_running())
    }
}
