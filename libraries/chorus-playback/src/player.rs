//! Session facade
//!
//! Commands sent to the driver task; outcomes observed via events and
//! state snapshots. The driver task is the single consumer context that
//! all session mutation is serialized through: it alternates between user
//! commands and generation-tagged engine events, feeding both into the
//! manager.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::EngineFactory;
use crate::events::SessionEvent;
use crate::manager::SessionManager;
use crate::scrobble::Scrobbler;
use crate::types::{SessionConfig, SessionState, Song};

/// Commands accepted by the session driver
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Start a new session for a song
    Play(Song),

    /// Pause playback
    Pause,

    /// Resume (from pause, or reload from stopped-with-song)
    Resume,

    /// Explicit stop
    Stop,

    /// Seek within the current song
    Seek(Duration),

    /// Change playback rate live
    SetRate(f32),

    /// Change pitch shift live
    SetPitchSemitones(f32),

    /// Release the engine for the current song (external file operation)
    ForceReleaseEngine,

    /// Reload the released engine at the remembered position
    ForceReloadEngine,

    /// Stop the driver task
    Shutdown,
}

/// Handle to a running playback session
pub struct Player {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
    driver: JoinHandle<()>,
}

impl Player {
    /// Spawn the driver task. Returns the handle plus the session event
    /// stream for the UI side.
    pub fn spawn<F: EngineFactory>(
        factory: F,
        scrobbler: Arc<dyn Scrobbler>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (mut manager, channels) = SessionManager::new(factory, scrobbler, config);
        let mut engine_rx = channels.engine_rx;
        let state_rx = channels.state_rx;
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SessionCommand>();

        let driver = tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        match command {
                            None | Some(SessionCommand::Shutdown) => {
                                info!("session driver shutting down");
                                manager.stop();
                                return;
                            }
                            Some(command) => apply_command(&mut manager, command),
                        }
                    }
                    Some(event) = engine_rx.recv() => {
                        manager.handle_engine_event(event);
                    }
                }
            }
        });

        (
            Self {
                commands: command_tx,
                state_rx,
                driver,
            },
            channels.events_rx,
        )
    }

    /// Start playback of `song` (fire-and-forget).
    pub fn play(&self, song: Song) {
        self.send(SessionCommand::Play(song));
    }

    pub fn pause(&self) {
        self.send(SessionCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(SessionCommand::Resume);
    }

    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    pub fn seek(&self, position: Duration) {
        self.send(SessionCommand::Seek(position));
    }

    pub fn set_rate(&self, rate: f32) {
        self.send(SessionCommand::SetRate(rate));
    }

    pub fn set_pitch_semitones(&self, semitones: f32) {
        self.send(SessionCommand::SetPitchSemitones(semitones));
    }

    /// Temporarily free the engine so another component can rewrite the
    /// current song's file.
    pub fn force_release_engine(&self) {
        self.send(SessionCommand::ForceReleaseEngine);
    }

    /// Restore a released engine at the remembered position.
    pub fn force_reload_engine(&self) {
        self.send(SessionCommand::ForceReloadEngine);
    }

    /// Latest state snapshot.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch for state snapshots.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Stop the driver and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        let _ = self.driver.await;
    }

    fn send(&self, command: SessionCommand) {
        // A closed channel means the driver is gone; commands become no-ops.
        let _ = self.commands.send(command);
    }
}

fn apply_command<F: EngineFactory>(manager: &mut SessionManager<F>, command: SessionCommand) {
    match command {
        SessionCommand::Play(song) => {
            manager.start_new_session(song);
        }
        SessionCommand::Pause => manager.pause(),
        SessionCommand::Resume => manager.resume(),
        SessionCommand::Stop => manager.stop(),
        SessionCommand::Seek(position) => manager.seek(position),
        SessionCommand::SetRate(rate) => manager.set_rate(rate),
        SessionCommand::SetPitchSemitones(semitones) => manager.set_pitch_semitones(semitones),
        SessionCommand::ForceReleaseEngine => manager.force_release_engine(),
        SessionCommand::ForceReloadEngine => manager.force_reload_engine(),
        SessionCommand::Shutdown => unreachable!("handled by the driver loop"),
    }
}
