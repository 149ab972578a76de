//! Background position polling
//!
//! One monitor task per active coordinator. While the monitored song is
//! playing, each tick reads position/duration from the engine, emits a
//! position event, and runs the loop check. The task stops itself when the
//! engine leaves `Playing` or the session's current song no longer matches
//! the one it was started for; loop-triggered seeks are *requested* through
//! the manager channel, never applied from the poll task.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::engine::{EngineStatus, PlaybackEngine};
use crate::events::EngineEvent;
use crate::loop_policy;
use crate::types::Song;

/// Handle for the poll task of one engine generation
#[derive(Debug, Default)]
pub(crate) struct PositionMonitor {
    handle: Option<JoinHandle<()>>,
}

impl PositionMonitor {
    pub(crate) fn new() -> Self {
        Self { handle: None }
    }

    /// Start polling `engine` for `song`. Replaces a previous poll task.
    pub(crate) fn start<E: PlaybackEngine + 'static>(
        &mut self,
        engine: Arc<Mutex<E>>,
        song: Song,
        generation: u64,
        interval: Duration,
        current_song: watch::Receiver<Option<PathBuf>>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) {
        self.stop();
        debug!(generation, song = %song.path.display(), "position monitor started");
        self.handle = Some(tokio::spawn(poll_task(
            engine,
            song,
            generation,
            interval,
            current_song,
            events,
        )));
    }

    /// Stop the poll task, if one is running.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PositionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_task<E: PlaybackEngine>(
    engine: Arc<Mutex<E>>,
    song: Song,
    generation: u64,
    interval: Duration,
    current_song: watch::Receiver<Option<PathBuf>>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if current_song.borrow().as_deref() != Some(song.path.as_path()) {
            debug!(generation, "monitored song superseded, poll task exiting");
            return;
        }

        // Read everything in one short critical section; the guard must
        // not live across an await.
        let (status, position, duration) = {
            let Ok(guard) = engine.lock() else {
                warn!(generation, "engine lock poisoned, poll task exiting");
                return;
            };
            (guard.status(), guard.position(), guard.duration())
        };

        if status != EngineStatus::Playing {
            debug!(generation, ?status, "engine no longer playing, poll task exiting");
            return;
        }

        if events
            .send(EngineEvent::Position {
                generation,
                position,
                duration,
            })
            .is_err()
        {
            return;
        }

        if let Some(target) = loop_policy::loop_seek_target(&song, position, duration) {
            debug!(generation, ?position, ?target, "loop seek due");
            if events
                .send(EngineEvent::LoopSeekRequested { generation, target })
                .is_err()
            {
                return;
            }
        }
    }
}
