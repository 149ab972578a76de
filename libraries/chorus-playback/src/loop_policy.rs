//! Loop-region playback decisions
//!
//! Stateless-per-call logic computing where playback should start, where a
//! requested seek should land, and when a loop-triggered seek back to the
//! region start is due. All decisions are keyed on the current song's
//! effective loop (active and valid for the song's duration).

use std::time::Duration;

use crate::types::Song;

/// How close to the loop end a poll may land before the loop re-triggers.
/// The 100ms poll can overshoot the exact end, so the edge is pulled in.
pub const LOOP_EDGE: Duration = Duration::from_millis(50);

/// Loops ending this close to the physical end of the file do not
/// re-trigger; natural end-of-file detection takes over instead.
pub const NATURAL_END_GUARD: Duration = Duration::from_millis(200);

/// Where playback of `song` should begin.
///
/// The loop start when an active, valid loop exists and its start falls
/// inside the loaded file; zero otherwise.
pub fn initial_position(song: &Song, duration: Duration) -> Duration {
    match song.effective_loop() {
        Some(region) if region.start < duration => region.start,
        _ => Duration::ZERO,
    }
}

/// Snap a requested seek into the loop region.
///
/// A request outside `[start, end)` lands on the loop start; a request
/// inside the region (or with no effective loop) passes through unchanged.
pub fn adjust_seek(song: &Song, requested: Duration, duration: Duration) -> Duration {
    let Some(region) = song.effective_loop() else {
        return requested;
    };
    if region.start >= duration {
        return requested;
    }
    if requested < region.start || requested >= region.end {
        region.start
    } else {
        requested
    }
}

/// Whether the position poll should seek back to the loop start.
///
/// Due once playback reaches `end - LOOP_EDGE`, unless the position is
/// already within `NATURAL_END_GUARD` of the file's actual end - in that
/// case the loop stands down and lets natural completion fire.
pub fn loop_seek_target(song: &Song, position: Duration, duration: Duration) -> Option<Duration> {
    let region = song.effective_loop()?;
    if position + LOOP_EDGE < region.end {
        return None;
    }
    if position + NATURAL_END_GUARD >= duration {
        return None;
    }
    Some(region.start)
}
