//! Loop-region persistence
//!
//! Stores saved loops as a JSON object mapping absolute file path to
//! `{Start, End, IsActive}`, with durations written the way the legacy
//! store wrote them: `HH:MM:SS` plus a seven-digit fractional part when
//! the duration is not a whole second. Legacy entries carrying only
//! `{Start, End}` load as `IsActive = false` and are written back in the
//! full form, so one save round-trip migrates them.
//!
//! A single exclusive lock around load/save keeps read-modify-write
//! updates atomic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::types::LoopRegion;

/// One persisted loop entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLoop {
    /// Loop start
    #[serde(rename = "Start", with = "timespan")]
    pub start: Duration,

    /// Loop end (exclusive)
    #[serde(rename = "End", with = "timespan")]
    pub end: Duration,

    /// Whether the loop is enabled; absent in legacy entries
    #[serde(rename = "IsActive", default)]
    pub is_active: bool,
}

impl From<StoredLoop> for LoopRegion {
    fn from(stored: StoredLoop) -> Self {
        LoopRegion {
            start: stored.start,
            end: stored.end,
        }
    }
}

/// File-backed loop store, one lock per store
#[derive(Debug)]
pub struct LoopStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LoopStore {
    /// Open a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read the saved loop for `song_path`, if any.
    pub fn get(&self, song_path: &Path) -> Result<Option<StoredLoop>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let map = self.read_map()?;
        Ok(map.get(&key(song_path)).cloned())
    }

    /// Save or replace the loop for `song_path`.
    pub fn set(&self, song_path: &Path, entry: StoredLoop) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut map = self.read_map()?;
        map.insert(key(song_path), entry);
        self.write_map(&map)
    }

    /// Remove the loop for `song_path`.
    pub fn remove(&self, song_path: &Path) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut map = self.read_map()?;
        if map.remove(&key(song_path)).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }

    /// Flip the active flag for `song_path` in one locked read-modify-write.
    pub fn set_active(&self, song_path: &Path, active: bool) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut map = self.read_map()?;
        if let Some(entry) = map.get_mut(&key(song_path)) {
            entry.is_active = active;
            self.write_map(&map)?;
        }
        Ok(())
    }

    fn read_map(&self) -> Result<BTreeMap<String, StoredLoop>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| SessionError::Persistence(e.to_string()))
    }

    fn write_map(&self, map: &BTreeMap<String, StoredLoop>) -> Result<()> {
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| SessionError::Persistence(e.to_string()))?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), entries = map.len(), "loop store saved");
        Ok(())
    }
}

fn key(song_path: &Path) -> String {
    song_path.to_string_lossy().into_owned()
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SessionError {
    SessionError::Persistence("loop store lock poisoned".to_string())
}

/// Serde adapter for legacy `HH:MM:SS(.fffffff)` duration strings
mod timespan {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const TICKS_PER_SECOND: u128 = 10_000_000;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let total_secs = value.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        let ticks = u128::from(value.subsec_nanos()) / 100;

        let text = if ticks == 0 {
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        } else {
            format!("{hours:02}:{minutes:02}:{seconds:02}.{ticks:07}")
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| de::Error::custom(format!("invalid duration: {text}")))
    }

    fn parse(text: &str) -> Option<Duration> {
        let (clock, fraction) = match text.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (text, None),
        };

        let mut parts = clock.split(':');
        let hours: u64 = parts.next()?.parse().ok()?;
        let minutes: u64 = parts.next()?.parse().ok()?;
        let seconds: u64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
            return None;
        }

        let mut duration = Duration::from_secs(hours * 3600 + minutes * 60 + seconds);
        if let Some(fraction) = fraction {
            if fraction.is_empty() || fraction.len() > 7 {
                return None;
            }
            let digits: u128 = fraction.parse().ok()?;
            let ticks = digits * 10u128.pow(7 - fraction.len() as u32);
            let nanos = (ticks * 100) % (TICKS_PER_SECOND * 100);
            duration += Duration::from_nanos(nanos as u64);
        }
        Some(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn legacy_entry_without_is_active_loads_inactive() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("loops.json");
        fs::write(
            &store_path,
            r#"{ "/music/a.mp3": { "Start": "00:00:30", "End": "00:00:45" } }"#,
        )
        .unwrap();

        let store = LoopStore::new(&store_path);
        let entry = store.get(Path::new("/music/a.mp3")).unwrap().unwrap();
        assert_eq!(entry.start, Duration::from_secs(30));
        assert_eq!(entry.end, Duration::from_secs(45));
        assert!(!entry.is_active);
    }

    #[test]
    fn migration_is_idempotent_after_first_save() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("loops.json");
        fs::write(
            &store_path,
            r#"{ "/music/a.mp3": { "Start": "00:00:30", "End": "00:00:45" } }"#,
        )
        .unwrap();

        let store = LoopStore::new(&store_path);
        let entry = store.get(Path::new("/music/a.mp3")).unwrap().unwrap();
        store.set(Path::new("/music/a.mp3"), entry.clone()).unwrap();

        let first_save = fs::read_to_string(&store_path).unwrap();
        let reloaded = store.get(Path::new("/music/a.mp3")).unwrap().unwrap();
        assert_eq!(reloaded, entry);

        store.set(Path::new("/music/a.mp3"), reloaded).unwrap();
        let second_save = fs::read_to_string(&store_path).unwrap();
        assert_eq!(first_save, second_save);
    }

    #[test]
    fn fractional_durations_round_trip() {
        let dir = tempdir().unwrap();
        let store = LoopStore::new(dir.path().join("loops.json"));

        let entry = StoredLoop {
            start: Duration::from_millis(30_500),
            end: Duration::from_millis(45_250),
            is_active: true,
        };
        store.set(Path::new("/music/b.flac"), entry.clone()).unwrap();

        let loaded = store.get(Path::new("/music/b.flac")).unwrap().unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn whole_seconds_serialize_without_fraction() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("loops.json");
        let store = LoopStore::new(&store_path);

        store
            .set(
                Path::new("/music/c.ogg"),
                StoredLoop {
                    start: Duration::from_secs(30),
                    end: Duration::from_secs(45),
                    is_active: true,
                },
            )
            .unwrap();

        let raw = fs::read_to_string(&store_path).unwrap();
        assert!(raw.contains("\"00:00:30\""));
        assert!(raw.contains("\"00:00:45\""));
    }

    #[test]
    fn set_active_is_a_locked_read_modify_write() {
        let dir = tempdir().unwrap();
        let store = LoopStore::new(dir.path().join("loops.json"));
        let path = Path::new("/music/d.wav");

        store
            .set(
                path,
                StoredLoop {
                    start: Duration::from_secs(10),
                    end: Duration::from_secs(20),
                    is_active: false,
                },
            )
            .unwrap();

        store.set_active(path, true).unwrap();
        assert!(store.get(path).unwrap().unwrap().is_active);

        store.set_active(path, false).unwrap();
        assert!(!store.get(path).unwrap().unwrap().is_active);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = LoopStore::new(dir.path().join("absent.json"));
        assert!(store.get(Path::new("/music/a.mp3")).unwrap().is_none());
    }
}
