//! Platform-agnostic engine trait
//!
//! Abstracts the decode + effects + output pipeline for one loaded file.
//! The session core drives an engine through this seam; desktop provides a
//! symphonia/cpal implementation in `chorus-engine`, tests provide mocks.

use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Transport status of the underlying output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No pipeline running
    Stopped,

    /// Output sink is rendering audio
    Playing,

    /// Pipeline loaded, output suspended
    Paused,
}

/// Raised by an engine when its pipeline stops for any reason
///
/// `error` is set when the output stage failed at runtime; `None` covers
/// both explicit stops and natural end of file. Delivery is asynchronous:
/// a notice is not guaranteed to have arrived by the time `stop()` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedNotice {
    /// Runtime failure reported by the output stage, if any
    pub error: Option<String>,
}

/// One decode + effects + output pipeline for exactly one loaded file
///
/// All transport methods are no-ops while no pipeline is loaded. `load`
/// disposes any previous pipeline first; a failed `load` must release every
/// partially-constructed resource before the error propagates.
pub trait PlaybackEngine: Send {
    /// Build a fresh pipeline for `path`, replacing any previous one.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Start or resume the output sink.
    fn play(&mut self);

    /// Suspend the output sink without tearing the pipeline down.
    fn pause(&mut self);

    /// Request the pipeline to stop. The stopped notice arrives
    /// asynchronously on the sender handed to the engine at construction.
    fn stop(&mut self);

    /// Seek the reader to `position`.
    fn seek(&mut self, position: Duration);

    /// Current playback position (zero when nothing is loaded).
    fn position(&self) -> Duration;

    /// Duration of the loaded file (zero when nothing is loaded).
    fn duration(&self) -> Duration;

    /// Transport status mapped from the output sink.
    fn status(&self) -> EngineStatus;

    /// Change audible speed live; no pipeline rebuild.
    fn set_rate(&mut self, rate: f32);

    /// Change audible pitch live; no pipeline rebuild.
    fn set_pitch_semitones(&mut self, semitones: f32);

    /// Release the pipeline (file handles, OS resources) without dropping
    /// the engine itself, keeping the slot for a later reload.
    fn release_internals(&mut self);
}

/// Creates engines wired to a stop-notice channel
///
/// The session manager creates one engine per session generation; the
/// factory is what lets it do that without knowing the platform.
pub trait EngineFactory: Send + Sync + 'static {
    /// Concrete engine type produced by this factory
    type Engine: PlaybackEngine + 'static;

    /// Create an engine that posts [`StoppedNotice`]s on `notices`.
    fn create(&self, notices: mpsc::UnboundedSender<StoppedNotice>) -> Self::Engine;
}
