//! Session events
//!
//! Two layers of message passing:
//!
//! - [`EngineEvent`]: internal, generation-tagged messages flowing from a
//!   coordinator (and its position monitor) to the session manager. Each
//!   engine infrastructure instance carries a generation id; the manager
//!   drops messages whose generation is no longer current instead of
//!   juggling subscriptions.
//! - [`SessionEvent`]: outward messages for the UI/consumer side.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{SessionState, Song};

/// Internal engine-side event, tagged with the emitting generation
#[derive(Debug, Clone)]
pub(crate) enum EngineEvent {
    /// The pipeline of `generation` stopped (error, explicit, or natural end)
    Stopped {
        generation: u64,
        error: Option<String>,
    },

    /// Periodic position poll result
    Position {
        generation: u64,
        position: Duration,
        duration: Duration,
    },

    /// The loop check decided a seek back to loop start is due
    LoopSeekRequested { generation: u64, target: Duration },
}

impl EngineEvent {
    pub(crate) fn generation(&self) -> u64 {
        match self {
            EngineEvent::Stopped { generation, .. }
            | EngineEvent::Position { generation, .. }
            | EngineEvent::LoopSeekRequested { generation, .. } => *generation,
        }
    }
}

/// Events emitted by the session for UI synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state changed (status, playing flag, rate, pitch, song)
    StateChanged {
        /// Snapshot taken right after the change
        state: SessionState,
    },

    /// A different song became current (None = session cleared)
    TrackChanged {
        /// The new current song
        song: Option<Song>,
    },

    /// Periodic position update (100ms while playing, or once after a
    /// seek issued while not playing)
    PositionChanged {
        /// Current playback position
        position: Duration,
        /// Duration of the loaded file
        duration: Duration,
    },

    /// Playback stopped because the file was consumed to (near) its end.
    /// The consumer is expected to pick a next song and call play again,
    /// or leave the session stopped with the song still set.
    PlaybackEndedNaturally {
        /// The song that just finished
        song: Song,
    },

    /// A load or runtime failure was converted into a stopped session
    SessionError {
        /// Human-readable failure description
        message: String,
    },
}
