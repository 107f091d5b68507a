//! Citation feedback and threshold auto-tuning
//!
//! The controller owns two files per project: the injection log (per-event
//! counters plus a rolling window of injection samples) and the scorer state
//! (the current `min_score_threshold`). Every update is a short
//! read-modify-write under a file lock; if the lock cannot be taken in time
//! the update is skipped rather than blocking the host.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::durable::{read_json, write_json_atomic, FileLock};
use crate::error::{MemoryError, Result};
use crate::event::EventId;
use crate::project::{lock_path_for, ProjectLayout};

/// Feedback loop settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Lower bound of the score threshold
    pub min_threshold: f32,
    /// Upper bound of the score threshold
    pub max_threshold: f32,
    /// Threshold used before any tuning has happened
    pub initial_threshold: f32,
    /// Citation rate the controller steers toward
    pub target_citation_rate: f32,
    /// Proportional gain: threshold change per unit of rate error
    pub gain: f32,
    /// Maximum number of injection samples kept in the rolling window
    pub window_size: usize,
    /// Samples older than this do not count toward the citation rate
    pub window_days: i64,
    /// Retune is a no-op until the window holds this many samples
    pub min_samples: usize,
    /// Uncited injections after which an event is demoted
    pub demotion_injections: u32,
    pub lock_timeout_ms: u64,
    pub stale_lock_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.05,
            max_threshold: 0.25,
            initial_threshold: 0.12,
            target_citation_rate: 0.15,
            gain: 0.25,
            window_size: 100,
            window_days: 14,
            min_samples: 10,
            demotion_injections: 3,
            lock_timeout_ms: 50,
            stale_lock_secs: 10,
        }
    }
}

impl FeedbackConfig {
    /// Clamp a threshold into the configured closed interval
    pub fn clamp(&self, threshold: f32) -> f32 {
        if threshold.is_nan() {
            return self.initial_threshold.clamp(self.min_threshold, self.max_threshold);
        }
        threshold.clamp(self.min_threshold, self.max_threshold)
    }
}

/// Per-event feedback counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionEntry {
    pub times_injected: u32,
    pub times_cited: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_injected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cited_at: Option<DateTime<Utc>>,
    /// Sticky once set
    #[serde(default)]
    pub demoted: bool,
}

impl InjectionEntry {
    /// Injected at least `min_injections` times and never cited
    pub fn meets_demotion(&self, min_injections: u32) -> bool {
        self.times_injected >= min_injections && self.times_cited == 0
    }

    pub fn is_demoted(&self, min_injections: u32) -> bool {
        self.demoted || self.meets_demotion(min_injections)
    }
}

/// One injection of one event, for the rolling citation rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSample {
    pub event_id: EventId,
    pub injected_at: DateTime<Utc>,
    pub cited: bool,
}

/// Persisted feedback substrate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionLog {
    #[serde(default)]
    pub entries: BTreeMap<EventId, InjectionEntry>,
    #[serde(default)]
    pub samples: VecDeque<InjectionSample>,
}

impl InjectionLog {
    pub fn is_demoted(&self, id: &EventId, min_injections: u32) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.is_demoted(min_injections))
    }

    pub fn demoted_ids(&self, min_injections: u32) -> HashSet<EventId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_demoted(min_injections))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cited / injected over samples inside the window
    ///
    /// Returns the rate and the number of samples it is based on.
    pub fn citation_rate(&self, now: DateTime<Utc>, window: Duration) -> (f32, usize) {
        let recent: Vec<_> = self
            .samples
            .iter()
            .filter(|s| now - s.injected_at <= window)
            .collect();
        if recent.is_empty() {
            return (0.0, 0);
        }
        let cited = recent.iter().filter(|s| s.cited).count();
        (cited as f32 / recent.len() as f32, recent.len())
    }
}

/// Persisted scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerState {
    pub min_score_threshold: f32,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_citation_rate: Option<f32>,
}

/// Result of a feedback update
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    /// Update committed; `updated` entries changed
    Applied { updated: usize },
    /// Update dropped for this cycle
    Skipped { reason: String },
}

impl FeedbackOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Result of a tuning cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetuneReport {
    pub previous: f32,
    pub threshold: f32,
    /// `None` when the window held too few samples to tune
    pub citation_rate: Option<f32>,
    pub samples: usize,
}

/// One proportional control step, always clamped to the bounds
///
/// A citation rate below target raises the threshold (pickier), above
/// target lowers it (inject more).
pub fn next_threshold(current: f32, citation_rate: f32, config: &FeedbackConfig) -> f32 {
    let error = config.target_citation_rate - citation_rate;
    config.clamp(config.clamp(current) + config.gain * error)
}

/// Where an unparseable state file is kept for inspection
pub fn corrupt_path_for(file: &Path) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    file.with_file_name(name)
}

/// Owns the injection log and scorer state of one project
#[derive(Debug, Clone)]
pub struct FeedbackController {
    log_path: PathBuf,
    scorer_path: PathBuf,
    config: FeedbackConfig,
}

impl FeedbackController {
    pub fn new(layout: &ProjectLayout, config: FeedbackConfig) -> Self {
        Self {
            log_path: layout.injection_log(),
            scorer_path: layout.scorer_state(),
            config,
        }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    fn lock(&self, file: &Path) -> Result<FileLock> {
        FileLock::acquire(
            lock_path_for(file),
            StdDuration::from_millis(self.config.lock_timeout_ms),
            StdDuration::from_secs(self.config.stale_lock_secs),
        )
    }

    /// Current injection log; corrupt or missing files read as empty
    pub fn snapshot(&self) -> InjectionLog {
        match read_json::<InjectionLog>(&self.log_path) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                log::warn!("Injection log unreadable, treating as empty: {}", e);
                InjectionLog::default()
            }
        }
    }

    /// Current threshold, clamped to the configured bounds
    pub fn threshold(&self) -> f32 {
        match read_json::<ScorerState>(&self.scorer_path) {
            Ok(Some(state)) => self.config.clamp(state.min_score_threshold),
            Ok(None) => self.config.clamp(self.config.initial_threshold),
            Err(e) => {
                log::warn!("Scorer state unreadable, using initial threshold: {}", e);
                self.config.clamp(self.config.initial_threshold)
            }
        }
    }

    /// Injection log for a read-modify-write; caller holds the lock
    ///
    /// A file that no longer parses is renamed to `*.corrupt` so the next
    /// write does not destroy it.
    fn load_for_update(&self) -> Result<InjectionLog> {
        match read_json::<InjectionLog>(&self.log_path) {
            Ok(state) => Ok(state.unwrap_or_default()),
            Err(MemoryError::Json(e)) => {
                let aside = corrupt_path_for(&self.log_path);
                log::warn!(
                    "Injection log corrupt ({}), moving it to {}",
                    e,
                    aside.display()
                );
                fs::rename(&self.log_path, &aside)?;
                Ok(InjectionLog::default())
            }
            Err(e) => Err(e),
        }
    }

    fn update_log<F>(&self, op: &str, apply: F) -> FeedbackOutcome
    where
        F: FnOnce(&mut InjectionLog) -> usize,
    {
        let result = (|| -> Result<usize> {
            let _guard = self.lock(&self.log_path)?;
            let mut state = self.load_for_update()?;
            let updated = apply(&mut state);
            if updated > 0 {
                write_json_atomic(&self.log_path, &state)?;
            }
            Ok(updated)
        })();

        match result {
            Ok(updated) => FeedbackOutcome::Applied { updated },
            Err(MemoryError::LockTimeout(path)) => {
                log::warn!("{op} skipped: lock {} busy", path.display());
                FeedbackOutcome::Skipped {
                    reason: "lock timeout".to_string(),
                }
            }
            Err(e) => {
                log::warn!("{op} skipped: {}", e);
                FeedbackOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Whether `id` is excluded from candidacy by the demotion rule
    pub fn is_demoted(&self, state: &InjectionLog, id: &EventId) -> bool {
        state.is_demoted(id, self.config.demotion_injections)
    }

    pub fn demoted_ids(&self, state: &InjectionLog) -> HashSet<EventId> {
        state.demoted_ids(self.config.demotion_injections)
    }

    /// Count one injection for each shown id
    ///
    /// Entries that reached the demotion rule in an earlier cycle and were
    /// still not cited by now become permanently demoted.
    pub fn record_injection(&self, ids: &[EventId], now: DateTime<Utc>) -> FeedbackOutcome {
        let config = self.config;
        self.update_log("record_injection", |state| {
            for (id, entry) in state.entries.iter_mut() {
                if !entry.demoted && entry.meets_demotion(config.demotion_injections) {
                    log::info!(
                        "Demoting event {} after {} uncited injections",
                        id,
                        entry.times_injected
                    );
                    entry.demoted = true;
                }
            }

            for id in ids {
                let entry = state.entries.entry(id.clone()).or_default();
                entry.times_injected += 1;
                entry.last_injected_at = Some(now);

                state.samples.push_back(InjectionSample {
                    event_id: id.clone(),
                    injected_at: now,
                    cited: false,
                });
            }
            while state.samples.len() > config.window_size {
                state.samples.pop_front();
            }
            ids.len()
        })
    }

    /// Count one citation for each id the host reported as useful
    pub fn record_citation(&self, ids: &[EventId], now: DateTime<Utc>) -> FeedbackOutcome {
        self.update_log("record_citation", |state| {
            for id in ids {
                let entry = state.entries.entry(id.clone()).or_default();
                entry.times_cited += 1;
                entry.last_cited_at = Some(now);

                if let Some(sample) = state
                    .samples
                    .iter_mut()
                    .rev()
                    .find(|s| &s.event_id == id && !s.cited)
                {
                    sample.cited = true;
                }
            }
            ids.len()
        })
    }

    /// Drop log entries for events that no longer exist
    pub fn prune(&self, live: &HashSet<EventId>) -> FeedbackOutcome {
        self.update_log("prune", |state| {
            let before = state.entries.len() + state.samples.len();
            state.entries.retain(|id, _| live.contains(id));
            state.samples.retain(|s| live.contains(&s.event_id));
            before - (state.entries.len() + state.samples.len())
        })
    }

    /// Run one tuning cycle against the rolling citation rate
    pub fn retune(&self, now: DateTime<Utc>) -> Option<RetuneReport> {
        let result = (|| -> Result<RetuneReport> {
            let _guard = self.lock(&self.scorer_path)?;
            let previous = self.threshold();
            let (rate, samples) = self
                .snapshot()
                .citation_rate(now, Duration::days(self.config.window_days));

            if samples < self.config.min_samples {
                return Ok(RetuneReport {
                    previous,
                    threshold: previous,
                    citation_rate: None,
                    samples,
                });
            }

            let threshold = next_threshold(previous, rate, &self.config);
            write_json_atomic(
                &self.scorer_path,
                &ScorerState {
                    min_score_threshold: threshold,
                    updated_at: now,
                    last_citation_rate: Some(rate),
                },
            )?;

            log::info!(
                "Retuned threshold {:.3} -> {:.3} (citation rate {:.2} over {} samples)",
                previous,
                threshold,
                rate,
                samples
            );

            Ok(RetuneReport {
                previous,
                threshold,
                citation_rate: Some(rate),
                samples,
            })
        })();

        match result {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!("retune skipped: {}", e);
                None
            }
        }
    }
}
