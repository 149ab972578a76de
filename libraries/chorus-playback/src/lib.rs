//! Chorus - Playback Session Management
//!
//! Platform-agnostic session core for Chorus: owns the lifecycle of one
//! audio engine at a time, applies loop-region playback, polls position,
//! classifies why playback stopped, and decides scrobbling and track
//! advancement.
//!
//! This crate provides:
//! - Session manager with old→new engine handoff on track change
//! - Loop-region policy (initial position, seek snapping, loop re-trigger)
//! - Background position monitor (100ms poll)
//! - Stop classification (error / explicit / natural end) and scrobble
//!   eligibility
//! - Next-track selection (repeat modes + shuffle)
//! - Loop-region persistence with legacy-format migration
//!
//! # Architecture
//!
//! `chorus-playback` is completely platform-agnostic: no dependency on
//! cpal, symphonia, or any UI shell. The audio pipeline is reached through
//! the [`PlaybackEngine`] / [`EngineFactory`] traits; `chorus-engine`
//! implements them for desktop.
//!
//! Engine infrastructure is created fresh per session generation. Each
//! generation tags everything it emits with its id, and the manager drops
//! messages from superseded generations, so a stop notice from a stale
//! engine can never be misattributed to the current session.
//!
//! # Example
//!
//! ```rust,no_run
//! use chorus_playback::{Player, SessionConfig, NullScrobbler, Song};
//! use std::sync::Arc;
//! use std::time::Duration;
//! # use chorus_playback::{EngineFactory, PlaybackEngine, StoppedNotice};
//! # struct MyFactory;
//! # impl EngineFactory for MyFactory {
//! #     type Engine = MyEngine;
//! #     fn create(&self, _n: tokio::sync::mpsc::UnboundedSender<StoppedNotice>) -> MyEngine { MyEngine }
//! # }
//! # struct MyEngine;
//! # impl PlaybackEngine for MyEngine {
//! #     fn load(&mut self, _p: &std::path::Path) -> chorus_playback::Result<()> { Ok(()) }
//! #     fn play(&mut self) {}
//! #     fn pause(&mut self) {}
//! #     fn stop(&mut self) {}
//! #     fn seek(&mut self, _p: Duration) {}
//! #     fn position(&self) -> Duration { Duration::ZERO }
//! #     fn duration(&self) -> Duration { Duration::ZERO }
//! #     fn status(&self) -> chorus_playback::EngineStatus { chorus_playback::EngineStatus::Stopped }
//! #     fn set_rate(&mut self, _r: f32) {}
//! #     fn set_pitch_semitones(&mut self, _s: f32) {}
//! #     fn release_internals(&mut self) {}
//! # }
//!
//! # #[tokio::main] async fn main() {
//! let (player, mut events) = Player::spawn(
//!     MyFactory,
//!     Arc::new(NullScrobbler),
//!     SessionConfig::default(),
//! );
//!
//! player.play(Song {
//!     path: "/music/song.flac".into(),
//!     title: "Song".into(),
//!     artist: "Artist".into(),
//!     duration: Duration::from_secs(180),
//!     saved_loop: None,
//!     loop_active: false,
//! });
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

mod completion;
mod coordinator;
mod engine;
mod error;
mod events;
mod loop_policy;
mod loop_store;
mod manager;
mod monitor;
mod player;
mod scrobble;
mod selector;
pub mod types;

// Public exports
pub use completion::{classify_stop, complete_stop, CapturedStop, CompletionOutcome, StopClass};
pub use engine::{EngineFactory, EngineStatus, PlaybackEngine, StoppedNotice};
pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use loop_policy::{adjust_seek, initial_position, loop_seek_target};
pub use loop_store::{LoopStore, StoredLoop};
pub use manager::{SessionChannels, SessionManager};
pub use player::{Player, SessionCommand};
pub use scrobble::{is_scrobble_eligible, NullScrobbler, ScrobbleThresholds, Scrobbler};
pub use selector::select_next_song;
pub use types::{LoopRegion, PlaybackStatus, RepeatMode, SessionConfig, SessionState, Song};
