//! Stop classification and completion outcomes
//!
//! Interprets a stopped notice against the song, position, and duration
//! captured at the moment the stop was issued - never re-read afterward,
//! since the engine may already be torn down. The manager applies the
//! resulting [`CompletionOutcome`]; this module stays a pure decision.

use std::time::Duration;

use crate::types::Song;

/// Positions within this window of the full duration count as played
/// to completion.
pub const NATURAL_END_WINDOW: Duration = Duration::from_millis(500);

/// Values captured synchronously when a stop was issued (or, for
/// engine-initiated stops, the last monitored values)
#[derive(Debug, Clone)]
pub struct CapturedStop {
    /// The song the stopping pipeline was playing
    pub song: Song,

    /// Position at capture time
    pub position: Duration,

    /// Duration at capture time
    pub duration: Duration,

    /// Whether the stop was requested through the command layer
    pub explicit: bool,
}

/// Why the pipeline stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopClass {
    /// The output stage reported a runtime failure
    Errored,

    /// An explicit stop command (or session handoff) was issued
    Explicit,

    /// The file was consumed to (near) its full duration
    NaturalEnd,

    /// None of the above; likely an engine-state invariant violation
    Abnormal,
}

/// What the manager must do with a completed stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// Classification the outcome was derived from
    pub class: StopClass,

    /// Played duration to hand to the scrobbler, if any
    pub scrobble_at: Option<Duration>,

    /// Whether the session loses its current song
    pub clear_song: bool,

    /// Whether a `PlaybackEndedNaturally` event is due
    pub ended_naturally: bool,
}

/// Classify a stop.
///
/// Error beats everything; an explicit stop is final even at the very end
/// of the file; otherwise a position within [`NATURAL_END_WINDOW`] of the
/// duration counts as natural end; anything left is abnormal.
pub fn classify_stop(captured: &CapturedStop, error: bool) -> StopClass {
    if error {
        return StopClass::Errored;
    }
    if captured.explicit {
        return StopClass::Explicit;
    }

    let near_end = captured.duration > Duration::ZERO
        && captured.position + NATURAL_END_WINDOW >= captured.duration;
    if near_end {
        StopClass::NaturalEnd
    } else {
        StopClass::Abnormal
    }
}

/// Derive the completion outcome for a captured stop.
///
/// Natural end scrobbles at the *full duration* (the convention is
/// "played to completion") and keeps the current song so a consumer can
/// advance; every other class scrobbles at the captured position and
/// clears the session.
pub fn complete_stop(captured: &CapturedStop, error: bool) -> CompletionOutcome {
    let class = classify_stop(captured, error);
    match class {
        StopClass::NaturalEnd => CompletionOutcome {
            class,
            scrobble_at: Some(captured.duration),
            clear_song: false,
            ended_naturally: true,
        },
        StopClass::Errored | StopClass::Explicit | StopClass::Abnormal => CompletionOutcome {
            class,
            scrobble_at: Some(captured.position),
            clear_song: true,
            ended_naturally: false,
        },
    }
}
