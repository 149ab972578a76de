//! Chorus - Desktop Audio Engine
//!
//! Desktop implementation of the `chorus-playback` engine seam:
//!
//! - Decode: symphonia streaming decode to interleaved stereo f32
//! - Effects: rubato tempo and pitch stages (live ratio changes)
//! - Output: cpal stream owned by a dedicated audio thread
//!
//! Wire it into a session with [`DesktopEngineFactory`]:
//!
//! ```rust,no_run
//! use chorus_engine::DesktopEngineFactory;
//! use chorus_playback::{NullScrobbler, Player, SessionConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main] async fn main() {
//! let (player, events) = Player::spawn(
//!     DesktopEngineFactory,
//!     Arc::new(NullScrobbler),
//!     SessionConfig::default(),
//! );
//! # let _ = (player, events);
//! # }
//! ```

mod controller;
mod effects;
mod error;
mod output;
mod source;

pub use controller::{DesktopEngineFactory, EngineController};
pub use effects::EffectsProcessor;
pub use error::{EngineError, Result};
pub use source::FileAudioSource;
