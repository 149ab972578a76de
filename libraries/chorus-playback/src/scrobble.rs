//! Scrobble eligibility and the listening-history collaborator
//!
//! Eligibility is a pure rule; the collaborator trait is fire-and-forget
//! from the session's perspective (failures are logged by the implementor
//! and never become session errors).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Song;

/// Songs at or below this duration are never scrobbled.
const MIN_SCROBBLE_DURATION: Duration = Duration::from_secs(30);

/// Configured scrobble thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScrobbleThresholds {
    /// Percentage of the song that must have played (0-100)
    pub percentage: f64,

    /// Absolute cap in seconds; playing this long always qualifies
    pub absolute_secs: u64,
}

impl Default for ScrobbleThresholds {
    fn default() -> Self {
        // Last.fm convention: half the song, or four minutes
        Self {
            percentage: 50.0,
            absolute_secs: 240,
        }
    }
}

/// Whether `played` of a song lasting `duration` qualifies for a scrobble.
///
/// The effective requirement is the *smaller* of the percentage-derived
/// threshold and the absolute one, so very long songs still qualify after
/// the absolute time even if the percentage was not reached.
pub fn is_scrobble_eligible(
    duration: Duration,
    played: Duration,
    thresholds: ScrobbleThresholds,
) -> bool {
    if duration <= MIN_SCROBBLE_DURATION {
        return false;
    }

    let from_percentage = duration.mul_f64(thresholds.percentage / 100.0);
    let absolute = Duration::from_secs(thresholds.absolute_secs);
    let required = from_percentage.min(absolute);

    played >= required
}

/// Listening-history collaborator
///
/// Implementations talk to an external service; they must swallow and log
/// their own failures.
#[async_trait]
pub trait Scrobbler: Send + Sync {
    /// Announce the song that just started playing.
    async fn update_now_playing(&self, song: &Song);

    /// Report a sufficiently-played song.
    async fn scrobble(&self, song: &Song, played: Duration, timestamp: DateTime<Utc>);
}

/// No-op collaborator for sessions without scrobbling configured
#[derive(Debug, Default)]
pub struct NullScrobbler;

#[async_trait]
impl Scrobbler for NullScrobbler {
    async fn update_now_playing(&self, _song: &Song) {}

    async fn scrobble(&self, _song: &Song, _played: Duration, _timestamp: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn thresholds(percentage: f64, absolute_secs: u64) -> ScrobbleThresholds {
        ScrobbleThresholds {
            percentage,
            absolute_secs,
        }
    }

    #[test]
    fn effective_threshold_is_min_of_percentage_and_absolute() {
        let t = thresholds(50.0, 240);
        let duration = Duration::from_secs(100);

        // Effective requirement: min(50s, 240s) = 50s
        assert!(is_scrobble_eligible(duration, Duration::from_secs(60), t));
        assert!(is_scrobble_eligible(duration, Duration::from_secs(50), t));
        assert!(!is_scrobble_eligible(duration, Duration::from_secs(40), t));
    }

    #[test]
    fn absolute_cap_applies_to_long_songs() {
        let t = thresholds(50.0, 240);
        let duration = Duration::from_secs(3600);

        // 50% would be 1800s; the 240s cap wins
        assert!(is_scrobble_eligible(duration, Duration::from_secs(240), t));
        assert!(!is_scrobble_eligible(duration, Duration::from_secs(239), t));
    }

    #[test]
    fn short_songs_never_scrobble() {
        let t = thresholds(50.0, 240);
        let duration = Duration::from_secs(20);

        assert!(!is_scrobble_eligible(duration, Duration::from_secs(20), t));
        assert!(!is_scrobble_eligible(duration, Duration::from_secs(3600), t));
    }

    #[test]
    fn thirty_seconds_exactly_is_still_too_short() {
        let t = thresholds(50.0, 240);
        assert!(!is_scrobble_eligible(
            Duration::from_secs(30),
            Duration::from_secs(30),
            t
        ));
    }

    proptest! {
        #[test]
        fn eligibility_is_monotonic_in_played_time(
            duration_s in 31u64..7200,
            played_s in 0u64..7200,
            extra_s in 0u64..600,
        ) {
            let t = ScrobbleThresholds::default();
            let duration = Duration::from_secs(duration_s);
            let played = Duration::from_secs(played_s);
            let longer = played + Duration::from_secs(extra_s);

            // Playing longer never revokes eligibility
            if is_scrobble_eligible(duration, played, t) {
                prop_assert!(is_scrobble_eligible(duration, longer, t));
            }
        }
    }
}
