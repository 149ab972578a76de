//! Next-track selection
//!
//! Pure decision function consumed by the completion/transition flow after
//! a song ends naturally.

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::types::{RepeatMode, Song};

/// Pick the song that should play after `current`.
///
/// Rules, in priority order:
/// 1. No current song or empty list: nothing.
/// 2. `RepeatOne`: the current song again.
/// 3. `None`: nothing.
/// 4. Shuffle: uniform pick from the list minus the current song. A
///    single-song list replays that song only under `RepeatAll`.
/// 5. Sequential: the next list entry; at the last entry, wrap to the
///    first only under `RepeatAll`.
pub fn select_next_song(
    current: Option<&Song>,
    songs: &[Song],
    repeat: RepeatMode,
    shuffle: bool,
) -> Option<Song> {
    let current = current?;
    if songs.is_empty() {
        return None;
    }

    match repeat {
        RepeatMode::RepeatOne => return Some(current.clone()),
        RepeatMode::None => return None,
        RepeatMode::PlayOnce | RepeatMode::RepeatAll => {}
    }

    if shuffle {
        let candidates: Vec<&Song> = songs.iter().filter(|s| s.path != current.path).collect();
        if let Some(pick) = candidates.choose(&mut thread_rng()) {
            return Some((*pick).clone());
        }
        // Everything filtered out: replay a singleton list under RepeatAll
        if songs.len() == 1 && repeat == RepeatMode::RepeatAll {
            return Some(songs[0].clone());
        }
        return None;
    }

    let index = songs.iter().position(|s| s.path == current.path)?;
    if index + 1 < songs.len() {
        Some(songs[index + 1].clone())
    } else if repeat == RepeatMode::RepeatAll {
        Some(songs[0].clone())
    } else {
        None
    }
}
