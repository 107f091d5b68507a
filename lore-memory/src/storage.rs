//! Append-only event storage
//!
//! One JSON file per event under the project's `events/` directory, named by
//! event id. Files are written through [`crate::durable::atomic_write`], so a
//! reader never observes a partially written event. Parsed events are cached
//! per handle; since events never change once written, a cached entry stays
//! valid for as long as its file exists.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::durable::{atomic_write, file_age, is_temp_file};
use crate::error::{MemoryError, Result};
use crate::event::{EventId, EventRecord};
use crate::temporal::is_expired;

const EVENT_EXTENSION: &str = "json";

/// Retention settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Events older than this are deleted during maintenance
    pub ttl_days: i64,
    /// Per-project cap; oldest events beyond it are deleted
    pub max_events: usize,
    /// Leftover temp files older than this are removed
    pub stale_temp_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_days: 90,
            max_events: 500,
            stale_temp_secs: 3600,
        }
    }
}

/// File-backed event store for a single project
pub struct EventStore {
    events_dir: PathBuf,
    config: StoreConfig,
    cache: DashMap<EventId, EventRecord>,
    /// Serializes eviction passes that share this handle
    evicting: Mutex<()>,
}

impl EventStore {
    /// Open (creating if needed) the store rooted at `events_dir`
    pub fn open(events_dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let events_dir = events_dir.as_ref().to_path_buf();
        fs::create_dir_all(&events_dir)?;

        log::debug!("EventStore opened at: {}", events_dir.display());

        Ok(Self {
            events_dir,
            config,
            cache: DashMap::new(),
            evicting: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &EventId) -> PathBuf {
        self.events_dir
            .join(format!("{}.{}", id.as_str(), EVENT_EXTENSION))
    }

    /// Persist a new event
    ///
    /// The record is serialized, flushed to the device in a temp file and
    /// renamed into place. Existing ids are never overwritten.
    pub fn append(&self, record: &EventRecord) -> Result<EventId> {
        let path = self.path_for(&record.id);
        if path.exists() {
            return Err(MemoryError::other(format!(
                "event {} already exists",
                record.id
            )));
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        atomic_write(&path, &bytes)?;
        self.cache.insert(record.id.clone(), record.clone());

        log::debug!("Appended event {} ({} bytes)", record.id, bytes.len());
        Ok(record.id.clone())
    }

    /// All committed events, oldest first
    ///
    /// Records that fail to parse are logged and skipped.
    pub fn list_all(&self) -> Result<Vec<EventRecord>> {
        let mut events = Vec::new();
        let mut present = std::collections::HashSet::new();
        let mut skipped = 0;

        for entry in fs::read_dir(&self.events_dir)? {
            let entry = entry?;
            let Some(id) = event_id_from_path(&entry.path()) else {
                continue;
            };
            present.insert(id.clone());

            if let Some(cached) = self.cache.get(&id) {
                events.push(cached.clone());
                continue;
            }

            match self.load(&id) {
                Ok(record) => {
                    self.cache.insert(id, record.clone());
                    events.push(record);
                }
                Err(e) => {
                    log::warn!("Failed to read event {}: {}. Skipping.", id, e);
                    skipped += 1;
                }
            }
        }

        // Drop cache entries whose files were evicted by another process
        self.cache.retain(|id, _| present.contains(id));

        if skipped > 0 {
            log::warn!("Skipped {} unreadable events", skipped);
        }

        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    fn load(&self, id: &EventId) -> Result<EventRecord> {
        let bytes = fs::read(self.path_for(id))?;
        let record: EventRecord = serde_json::from_slice(&bytes)?;
        if &record.id != id {
            return Err(MemoryError::other(format!(
                "file name does not match event id {}",
                record.id
            )));
        }
        Ok(record)
    }

    /// Get an event by id
    ///
    /// # Errors
    /// `NotFound` if no file exists for `id`; parse failures are passed through.
    pub fn get(&self, id: &EventId) -> Result<EventRecord> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let record = self.load(id).map_err(|e| match e {
            MemoryError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                MemoryError::not_found(id.to_string())
            }
            other => other,
        })?;
        self.cache.insert(id.clone(), record.clone());
        Ok(record)
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.cache.contains_key(id) || self.path_for(id).exists()
    }

    fn delete(&self, id: &EventId) -> Result<()> {
        self.cache.remove(id);
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete events older than the TTL
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<Vec<EventId>> {
        let _guard = self.evicting.lock();
        let ttl = Duration::days(self.config.ttl_days);
        let mut evicted = Vec::new();

        for event in self.list_all()? {
            if is_expired(event.created_at, now, ttl) {
                self.delete(&event.id)?;
                evicted.push(event.id);
            }
        }

        if !evicted.is_empty() {
            log::info!("Evicted {} expired events", evicted.len());
        }
        Ok(evicted)
    }

    /// Delete the oldest events beyond the per-project cap
    pub fn evict_over_capacity(&self) -> Result<Vec<EventId>> {
        let _guard = self.evicting.lock();
        let events = self.list_all()?;
        let excess = events.len().saturating_sub(self.config.max_events);
        let mut evicted = Vec::with_capacity(excess);

        for event in events.into_iter().take(excess) {
            self.delete(&event.id)?;
            evicted.push(event.id);
        }

        if !evicted.is_empty() {
            log::info!(
                "Evicted {} events over the {} event cap",
                evicted.len(),
                self.config.max_events
            );
        }
        Ok(evicted)
    }

    /// Remove temp files left behind by writers that crashed mid-write
    pub fn cleanup_temp_files(&self) -> Result<usize> {
        let stale_after = StdDuration::from_secs(self.config.stale_temp_secs);
        let mut removed = 0;

        for entry in fs::read_dir(&self.events_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !is_temp_file(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if file_age(&path).is_some_and(|age| age >= stale_after) {
                if let Err(e) = fs::remove_file(&path) {
                    log::debug!("Could not remove temp file {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Number of committed events
    pub fn len(&self) -> Result<usize> {
        Ok(fs::read_dir(&self.events_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| event_id_from_path(&e.path()).is_some())
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Event id for a committed event file, `None` for temp or foreign files
fn event_id_from_path(path: &Path) -> Option<EventId> {
    let name = path.file_name()?.to_str()?;
    if is_temp_file(name) {
        return None;
    }
    let stem = name.strip_suffix(&format!(".{EVENT_EXTENSION}"))?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::temp_path_for;
    use crate::event::Category;
    use tempfile::TempDir;

    fn event_at(at: DateTime<Utc>) -> EventRecord {
        EventRecord::builder()
            .content(format!("lesson written at {at}"))
            .category(Category::Pattern)
            .created_at(at)
            .entity("cargo")
            .build()
            .unwrap()
    }

    fn open(dir: &TempDir, config: StoreConfig) -> EventStore {
        EventStore::open(dir.path().join("events"), config).unwrap()
    }

    #[test]
    fn test_append_and_list() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let now = Utc::now();

        let older = event_at(now - Duration::hours(2));
        let newer = event_at(now);
        store.append(&newer).unwrap();
        store.append(&older).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, older.id);
        assert_eq!(all[1], newer);
        assert_eq!(store.get(&older.id).unwrap(), older);
    }

    #[test]
    fn test_get_missing_event_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let event = event_at(Utc::now());

        let err = store.get(&event.id).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(ref id) if *id == event.id.to_string()));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_append_rejects_existing_id() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let event = event_at(Utc::now());
        store.append(&event).unwrap();
        assert!(store.append(&event).is_err());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_second_handle_sees_committed_events() {
        let dir = TempDir::new().unwrap();
        let writer = open(&dir, StoreConfig::default());
        let reader = open(&dir, StoreConfig::default());

        let event = event_at(Utc::now());
        writer.append(&event).unwrap();
        assert_eq!(reader.list_all().unwrap(), vec![event]);
    }

    #[test]
    fn test_crash_before_rename_is_invisible() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let committed = event_at(Utc::now());
        store.append(&committed).unwrap();

        // Complete temp file that never got renamed
        let orphan = event_at(Utc::now());
        let target = store.path_for(&orphan.id);
        let temp = temp_path_for(&target).unwrap();
        fs::write(&temp, serde_json::to_vec(&orphan).unwrap()).unwrap();

        // Half-flushed temp file
        let partial = event_at(Utc::now());
        let temp = temp_path_for(&store.path_for(&partial.id)).unwrap();
        let bytes = serde_json::to_vec(&partial).unwrap();
        fs::write(&temp, &bytes[..bytes.len() / 2]).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all, vec![committed]);
        assert!(!store.contains(&orphan.id));
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let good = event_at(Utc::now());
        store.append(&good).unwrap();

        fs::write(
            dir.path()
                .join("events")
                .join("20260101T000000000Z-00000000.json"),
            b"{ not json",
        )
        .unwrap();
        fs::write(dir.path().join("events").join("README.txt"), b"ignored").unwrap();

        assert_eq!(store.list_all().unwrap(), vec![good]);
    }

    #[test]
    fn test_evict_expired() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let now = Utc::now();

        let old = event_at(now - Duration::days(91));
        let recent = event_at(now - Duration::days(89));
        store.append(&old).unwrap();
        store.append(&recent).unwrap();

        let evicted = store.evict_expired(now).unwrap();
        assert_eq!(evicted, vec![old.id]);
        assert_eq!(store.list_all().unwrap(), vec![recent]);
    }

    #[test]
    fn test_evict_over_capacity_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, StoreConfig::default());
        let start = Utc::now() - Duration::days(30);

        let mut first = None;
        for i in 0..501 {
            let event = event_at(start + Duration::minutes(i));
            if i == 0 {
                first = Some(event.id.clone());
            }
            store.append(&event).unwrap();
        }

        let evicted = store.evict_over_capacity().unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0], first.clone().unwrap());

        let remaining = store.list_all().unwrap();
        assert_eq!(remaining.len(), 500);
        assert!(remaining.iter().all(|e| Some(&e.id) != first.as_ref()));
    }

    #[test]
    fn test_cleanup_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = open(
            &dir,
            StoreConfig {
                stale_temp_secs: 0,
                ..Default::default()
            },
        );
        let temp = temp_path_for(&dir.path().join("events").join("x.json")).unwrap();
        fs::write(&temp, b"partial").unwrap();

        assert_eq!(store.cleanup_temp_files().unwrap(), 1);
        assert!(!temp.exists());
    }
}
