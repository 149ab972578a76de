//! Engine coordination
//!
//! Composes one engine instance, the loop policy, and the position monitor
//! into a single "current playback" unit. Each coordinator carries a unique
//! generation id; everything it (or its monitor, or its stop-notice
//! forwarder) emits is tagged with that id so the manager can drop messages
//! from superseded infrastructure by a plain compare.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{EngineFactory, EngineStatus, PlaybackEngine};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::loop_policy;
use crate::monitor::PositionMonitor;
use crate::types::Song;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// The engine infrastructure for one session generation
pub(crate) struct EngineCoordinator<E: PlaybackEngine + 'static> {
    generation: u64,
    engine: Arc<Mutex<E>>,
    song: Option<Song>,
    monitor: PositionMonitor,
    monitor_interval: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
    current_song: watch::Receiver<Option<PathBuf>>,
    forwarder: Option<JoinHandle<()>>,
}

impl<E: PlaybackEngine + 'static> EngineCoordinator<E> {
    /// Build fresh infrastructure with its own generation id.
    pub(crate) fn new<F>(
        factory: &F,
        events: mpsc::UnboundedSender<EngineEvent>,
        current_song: watch::Receiver<Option<PathBuf>>,
        monitor_interval: Duration,
    ) -> Self
    where
        F: EngineFactory<Engine = E>,
    {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Mutex::new(factory.create(notice_tx)));

        // Forward raw stop notices as generation-tagged events. The task
        // outlives an explicit stop so an in-flight notice still drains.
        let forward_events = events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notice) = notice_rx.recv().await {
                if forward_events
                    .send(EngineEvent::Stopped {
                        generation,
                        error: notice.error,
                    })
                    .is_err()
                {
                    return;
                }
            }
        });

        debug!(generation, "engine infrastructure created");
        Self {
            generation,
            engine,
            song: None,
            monitor: PositionMonitor::new(),
            monitor_interval,
            events,
            current_song,
            forwarder: Some(forwarder),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Bind the loop policy to `song`.
    pub(crate) fn set_song(&mut self, song: Song) {
        self.song = Some(song);
    }

    pub(crate) fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    /// Load `path`, propagating the session's rate and pitch into the
    /// fresh pipeline.
    pub(crate) fn load(&mut self, path: &Path, rate: f32, pitch_semitones: f32) -> Result<()> {
        let mut engine = self.lock_engine();
        engine.load(path)?;
        engine.set_rate(rate);
        engine.set_pitch_semitones(pitch_semitones);
        Ok(())
    }

    /// Seek to the loop-aware initial position, start playback, and
    /// optionally start the position monitor.
    pub(crate) fn play(&mut self, start_monitor: bool) {
        let initial = {
            let mut engine = self.lock_engine();
            let duration = engine.duration();
            let initial = self
                .song
                .as_ref()
                .map(|s| loop_policy::initial_position(s, duration))
                .unwrap_or(Duration::ZERO);
            if initial > Duration::ZERO {
                engine.seek(initial);
            }
            engine.play();
            initial
        };
        debug!(generation = self.generation, ?initial, "playback started");
        if start_monitor {
            self.start_monitor();
        }
    }

    /// Resume from pause: snap the current position into the loop region
    /// first, then play.
    pub(crate) fn resume(&mut self, start_monitor: bool) {
        {
            let mut engine = self.lock_engine();
            let duration = engine.duration();
            let position = engine.position();
            if let Some(song) = self.song.as_ref() {
                let adjusted = loop_policy::adjust_seek(song, position, duration);
                if adjusted != position {
                    engine.seek(adjusted);
                }
            }
            engine.play();
        }
        if start_monitor {
            self.start_monitor();
        }
    }

    pub(crate) fn pause(&mut self) {
        // The monitor notices the status change and exits on its own.
        self.lock_engine().pause();
    }

    /// Request a stop. The stopped notice arrives asynchronously through
    /// the forwarder.
    pub(crate) fn stop(&mut self) {
        self.monitor.stop();
        self.lock_engine().stop();
    }

    /// Loop-aware, end-of-file-safe seek.
    ///
    /// The requested position is first snapped by the loop policy, then
    /// clamped away from the last few samples of the file so a seek cannot
    /// immediately retrigger natural-end detection. When not playing, the
    /// monitor is not running, so a position event is emitted here.
    pub(crate) fn seek(&mut self, requested: Duration) {
        let (position, duration, status) = {
            let mut engine = self.lock_engine();
            let duration = engine.duration();
            let adjusted = self
                .song
                .as_ref()
                .map(|s| loop_policy::adjust_seek(s, requested, duration))
                .unwrap_or(requested);
            let clamped = adjusted.min(duration.saturating_sub(seek_margin(duration)));
            engine.seek(clamped);
            (engine.position(), duration, engine.status())
        };

        if status != EngineStatus::Playing {
            let _ = self.events.send(EngineEvent::Position {
                generation: self.generation,
                position,
                duration,
            });
        }
    }

    pub(crate) fn position(&self) -> Duration {
        self.lock_engine().position()
    }

    pub(crate) fn duration(&self) -> Duration {
        self.lock_engine().duration()
    }

    pub(crate) fn status(&self) -> EngineStatus {
        self.lock_engine().status()
    }

    pub(crate) fn set_rate(&mut self, rate: f32) {
        self.lock_engine().set_rate(rate);
    }

    pub(crate) fn set_pitch_semitones(&mut self, semitones: f32) {
        self.lock_engine().set_pitch_semitones(semitones);
    }

    /// Free the engine's pipeline (file handles) while keeping this
    /// coordinator, its generation, and its monitor slot alive.
    pub(crate) fn release_internals(&mut self) {
        self.monitor.stop();
        self.lock_engine().release_internals();
    }

    pub(crate) fn stop_monitor(&mut self) {
        self.monitor.stop();
    }

    pub(crate) fn monitor_running(&self) -> bool {
        self.monitor.is_running()
    }

    fn start_monitor(&mut self) {
        let Some(song) = self.song.clone() else {
            warn!(generation = self.generation, "monitor start without a bound song");
            return;
        };
        self.monitor.start(
            Arc::clone(&self.engine),
            song,
            self.generation,
            self.monitor_interval,
            self.current_song.clone(),
            self.events.clone(),
        );
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, E> {
        // A poisoned lock only means a panic inside an engine call on
        // another thread; the state itself is still usable.
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E: PlaybackEngine + 'static> Drop for EngineCoordinator<E> {
    fn drop(&mut self) {
        self.monitor.stop();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        debug!(generation = self.generation, "engine infrastructure disposed");
    }
}

/// How far from the end of the file a seek may land.
fn seek_margin(duration: Duration) -> Duration {
    if duration > Duration::from_millis(200) {
        Duration::from_millis(100)
    } else if duration > Duration::ZERO {
        (duration / 2).min(Duration::from_millis(50))
    } else {
        Duration::ZERO
    }
}
