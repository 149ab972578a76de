//! Core types for session management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::scrobble::ScrobbleThresholds;

/// A song known to the library
///
/// Identity is the file path. Loop fields are edited externally (loop
/// editor); the session core only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// File path for audio decoding (stable identity)
    pub path: PathBuf,

    /// Song title
    pub title: String,

    /// Artist name
    pub artist: String,

    /// Total duration as reported by the library
    pub duration: Duration,

    /// Saved loop region (optional)
    pub saved_loop: Option<LoopRegion>,

    /// Whether the saved loop is currently enabled
    pub loop_active: bool,
}

impl Song {
    /// The loop region that should affect playback, if any.
    ///
    /// Returns the saved loop only when it is active and valid for this
    /// song's duration. An invalid region is ignored, not deleted.
    pub fn effective_loop(&self) -> Option<LoopRegion> {
        if !self.loop_active {
            return None;
        }
        self.saved_loop.filter(|l| l.is_valid(self.duration))
    }
}

/// A `[start, end)` loop window within a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    /// Loop start, from the beginning of the song
    pub start: Duration,

    /// Loop end (exclusive)
    pub end: Duration,
}

impl LoopRegion {
    /// A region is valid when `end > start` and both fall within the song.
    pub fn is_valid(&self, song_duration: Duration) -> bool {
        self.end > self.start && self.end <= song_duration
    }
}

/// Playback status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// No audio running
    Stopped,

    /// Currently playing
    Playing,

    /// Paused mid-song
    Paused,
}

/// Repeat mode for next-track selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    /// Stop after the current song, never advance
    None,

    /// Play the list through once, no wrap-around
    PlayOnce,

    /// Replay the current song forever
    RepeatOne,

    /// Loop the whole list
    RepeatAll,
}

/// Observable session state
///
/// Owned exclusively by the session manager; consumers get snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Song currently loaded for playback, if any
    pub current_song: Option<Song>,

    /// Whether audio is audibly running (implies `status == Playing`)
    pub is_playing: bool,

    /// Playback status
    pub status: PlaybackStatus,

    /// Last observed playback position
    pub position: Duration,

    /// Duration of the loaded file
    pub duration: Duration,

    /// Playback rate (1.0 = normal speed)
    pub rate: f32,

    /// Pitch shift in semitones (0.0 = unchanged)
    pub pitch_semitones: f32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_song: None,
            is_playing: false,
            status: PlaybackStatus::Stopped,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            rate: 1.0,
            pitch_semitones: 0.0,
        }
    }
}

impl SessionState {
    /// Set the status, keeping the `is_playing ⇒ Playing` invariant.
    pub(crate) fn set_status(&mut self, status: PlaybackStatus) {
        self.status = status;
        if status != PlaybackStatus::Playing {
            self.is_playing = false;
        }
    }
}

/// Configuration for the session manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Scrobble eligibility thresholds
    pub scrobble: ScrobbleThresholds,

    /// Position poll interval (default: 100ms)
    pub monitor_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scrobble: ScrobbleThresholds::default(),
            monitor_interval: Duration::from_millis(100),
        }
    }
}
