//! Core assertions
//!
//! A small topic-keyed table of durable facts. Writing a topic again
//! replaces the previous fact; the table never holds more than `capacity`
//! entries, evicting the least recently updated one.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::escape;
use crate::durable::{read_json, write_json_atomic, FileLock};
use crate::error::{MemoryError, Result};
use crate::project::{lock_path_for, ProjectLayout};

const OPEN_TAG: &str = "<core-assertions>\n";
const CLOSE_TAG: &str = "</core-assertions>";

/// Core assertion settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssertionsConfig {
    pub capacity: usize,
    /// Entries not updated for this long are dropped by `compact`
    pub max_age_days: i64,
    pub lock_timeout_ms: u64,
    pub stale_lock_secs: u64,
}

impl Default for AssertionsConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            max_age_days: 180,
            lock_timeout_ms: 50,
            stale_lock_secs: 10,
        }
    }
}

/// A durable topic-keyed fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreAssertion {
    pub topic: String,
    pub assertion: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssertionTable {
    #[serde(default)]
    entries: Vec<CoreAssertion>,
}

impl AssertionTable {
    fn upsert(&mut self, topic: &str, assertion: &str, now: DateTime<Utc>) {
        self.entries.retain(|e| e.topic != topic);
        self.entries.push(CoreAssertion {
            topic: topic.to_string(),
            assertion: assertion.to_string(),
            updated_at: now,
        });
    }

    /// Drop least recently updated entries beyond `capacity`
    fn enforce_capacity(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(i, _)| i)
            else {
                break;
            };
            let removed = self.entries.remove(oldest);
            log::debug!("Evicted core assertion '{}'", removed.topic);
            evicted += 1;
        }
        evicted
    }
}

/// File-backed core assertion table for one project
#[derive(Debug, Clone)]
pub struct CoreAssertionsStore {
    path: PathBuf,
    config: AssertionsConfig,
}

impl CoreAssertionsStore {
    pub fn new(layout: &ProjectLayout, config: AssertionsConfig) -> Self {
        Self {
            path: layout.core_assertions(),
            config,
        }
    }

    fn load(&self) -> AssertionTable {
        match read_json::<AssertionTable>(&self.path) {
            Ok(table) => table.unwrap_or_default(),
            Err(e) => {
                log::warn!("Core assertions unreadable, treating as empty: {}", e);
                AssertionTable::default()
            }
        }
    }

    fn modify<T>(&self, apply: impl FnOnce(&mut AssertionTable) -> T) -> Result<T> {
        let _guard = FileLock::acquire(
            lock_path_for(&self.path),
            StdDuration::from_millis(self.config.lock_timeout_ms),
            StdDuration::from_secs(self.config.stale_lock_secs),
        )?;
        let mut table = self.load();
        let result = apply(&mut table);
        write_json_atomic(&self.path, &table)?;
        Ok(result)
    }

    /// Insert or replace the assertion for `topic`
    pub fn upsert(&self, topic: &str, assertion: &str, now: DateTime<Utc>) -> Result<()> {
        let topic = topic.trim();
        let assertion = assertion.trim();
        if topic.is_empty() {
            return Err(MemoryError::invalid_record("assertion topic is empty"));
        }
        if assertion.is_empty() {
            return Err(MemoryError::invalid_record("assertion text is empty"));
        }

        let capacity = self.config.capacity;
        self.modify(|table| {
            table.upsert(topic, assertion, now);
            table.enforce_capacity(capacity);
        })
    }

    /// Enforce the cap and drop entries past the age ceiling
    ///
    /// Returns the number of entries removed.
    pub fn compact(&self, now: DateTime<Utc>) -> Result<usize> {
        let capacity = self.config.capacity;
        let ceiling = Duration::days(self.config.max_age_days);
        self.modify(|table| {
            let before = table.entries.len();
            table.entries.retain(|e| now - e.updated_at <= ceiling);
            let aged = before - table.entries.len();
            aged + table.enforce_capacity(capacity)
        })
    }

    /// All live entries, most recently updated first
    pub fn list(&self) -> Vec<CoreAssertion> {
        let mut entries = self.load().entries;
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    pub fn len(&self) -> usize {
        self.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render every entry, or the empty string when there are none
    pub fn render(&self) -> String {
        self.render_within(usize::MAX)
    }

    /// Render as many entries as fit in `max_chars`, newest first
    pub fn render_within(&self, max_chars: usize) -> String {
        let wrapper = OPEN_TAG.chars().count() + CLOSE_TAG.chars().count();
        let Some(mut remaining) = max_chars.checked_sub(wrapper) else {
            return String::new();
        };

        let mut body = String::new();
        for entry in self.list() {
            let line = format!(
                "<assertion topic=\"{}\">{}</assertion>\n",
                escape(&entry.topic),
                escape(&entry.assertion)
            );
            let len = line.chars().count();
            if len > remaining {
                continue;
            }
            remaining -= len;
            body.push_str(&line);
        }

        if body.is_empty() {
            return String::new();
        }
        format!("{OPEN_TAG}{body}{CLOSE_TAG}")
    }
}
