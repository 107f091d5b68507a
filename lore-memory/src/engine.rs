//! Memory engine facade
//!
//! Wires the store, scorer, budgeter, feedback controller, core assertions
//! and read governor of one project behind the four host triggers: record,
//! recall, cite and maintain.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assertions::CoreAssertionsStore;
use crate::budget::Budgeter;
use crate::config::EngineConfig;
use crate::dedup::{collapse_by_fingerprint, find_duplicate};
use crate::error::Result;
use crate::event::{EventId, EventRecord, WriteRequest};
use crate::extract::{referenced_ids, ContextSnapshot, Extractor};
use crate::feedback::{FeedbackController, FeedbackOutcome, RetuneReport};
use crate::governor::{ReadGovernor, ReadTrigger};
use crate::project::{ProjectKey, ProjectLayout};
use crate::scoring::Scorer;
use crate::storage::EventStore;

/// Result of a write trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "id", rename_all = "snake_case")]
pub enum AppendOutcome {
    /// A new event was persisted
    Stored(EventId),
    /// An equivalent event already exists; nothing was written
    Duplicate(EventId),
}

impl AppendOutcome {
    pub fn id(&self) -> &EventId {
        match self {
            Self::Stored(id) | Self::Duplicate(id) => id,
        }
    }
}

/// Read trigger payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub trigger: ReadTrigger,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub context: ContextSnapshot,
}

impl ReadRequest {
    pub fn new(trigger: ReadTrigger, session_id: impl Into<String>) -> Self {
        Self {
            trigger,
            session_id: session_id.into(),
            context: ContextSnapshot::default(),
        }
    }

    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.context.files.push(path.into());
        self
    }

    pub fn concept(mut self, concept: impl Into<String>) -> Self {
        self.context.concepts.push(concept.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.context.text = Some(text.into());
        self
    }
}

/// What a maintenance pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub over_capacity: usize,
    pub temp_files_removed: usize,
    pub log_entries_pruned: usize,
    pub assertions_removed: usize,
    pub sessions_pruned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retune: Option<RetuneReport>,
}

/// Cross-session memory for a single project
pub struct MemoryEngine {
    layout: ProjectLayout,
    config: EngineConfig,
    store: EventStore,
    extractor: Extractor,
    scorer: Scorer,
    budgeter: Budgeter,
    feedback: FeedbackController,
    assertions: CoreAssertionsStore,
    governor: ReadGovernor,
}

impl MemoryEngine {
    /// Open the engine for `project_key` under `data_root`
    pub fn open(data_root: &Path, project_key: &ProjectKey, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let layout = ProjectLayout::new(data_root, project_key);
        layout.ensure()?;

        let store = EventStore::open(layout.events_dir(), config.store)?;
        log::info!("Memory engine opened for project {}", project_key);

        Ok(Self {
            extractor: Extractor::new(&config.extractor),
            scorer: Scorer::new(config.scoring.clone()),
            budgeter: Budgeter::new(config.budget.clone()),
            feedback: FeedbackController::new(&layout, config.feedback),
            assertions: CoreAssertionsStore::new(&layout, config.assertions),
            governor: ReadGovernor::new(&layout, config.governor),
            store,
            layout,
            config,
        })
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn feedback(&self) -> &FeedbackController {
        &self.feedback
    }

    pub fn assertions(&self) -> &CoreAssertionsStore {
        &self.assertions
    }

    /// Write trigger: validate, deduplicate and persist a lesson
    ///
    /// Referenced ids that exist in the store are counted as citations.
    pub fn record(&self, request: WriteRequest, now: DateTime<Utc>) -> Result<AppendOutcome> {
        request.validate()?;

        let mut builder = EventRecord::builder()
            .created_at(now)
            .kind(request.kind)
            .content(request.content.trim())
            .source(request.source)
            .entities(self.extractor.entities_for(&request));
        if let Some(category) = request.category {
            builder = builder.category(category);
        }
        if let Some(problem_type) = request.problem_type {
            builder = builder.problem_type(problem_type);
        }
        for id in &request.referenced_ids {
            builder = builder.referenced_id(id.parse()?);
        }
        let record = builder.build()?;

        let existing = self.store.list_all()?;
        if let Some(duplicate) = find_duplicate(&record, &existing, &self.config.dedup) {
            log::info!("Skipping duplicate of event {}", duplicate.id);
            return Ok(AppendOutcome::Duplicate(duplicate.id.clone()));
        }

        let id = self.store.append(&record)?;
        log::info!(
            "Recorded event {} ({}, {} entities)",
            id,
            record.category.as_str(),
            record.entities.len()
        );

        let cited: Vec<EventId> = record
            .referenced_ids
            .iter()
            .filter(|r| self.store.contains(r))
            .cloned()
            .collect();
        if !cited.is_empty() {
            self.feedback.record_citation(&cited, now);
        }

        Ok(AppendOutcome::Stored(id))
    }

    /// Read trigger: render core assertions plus the best matching events
    ///
    /// Never fails; any storage problem degrades to an empty string.
    pub fn recall(&self, request: &ReadRequest, now: DateTime<Utc>) -> String {
        match self.try_recall(request, now) {
            Ok(block) => block,
            Err(e) => {
                log::warn!("Recall failed, returning no memories: {}", e);
                String::new()
            }
        }
    }

    fn try_recall(&self, request: &ReadRequest, now: DateTime<Utc>) -> Result<String> {
        let decision = self.governor.admit(request.trigger, &request.session_id, now)?;
        if !decision.is_allowed() {
            log::debug!("Read denied for session {}: {:?}", request.session_id, decision);
            return Ok(String::new());
        }

        if request.trigger == ReadTrigger::SessionStart {
            if let Err(e) = self.assertions.compact(now) {
                log::warn!("Core assertion compaction skipped: {}", e);
            }
        }

        let max_chars = self.budgeter.config().max_total_chars;
        let core = self.assertions.render_within(max_chars);
        let used = match core.chars().count() {
            0 => 0,
            n => n + 1,
        };

        let context = self.extractor.context(&request.context);
        let memories = if context.is_empty() {
            String::new()
        } else {
            let injection_log = self.feedback.snapshot();
            let threshold = self.feedback.threshold();
            let (ranked, stats) = self.scorer.rank(
                self.store.list_all()?,
                &context,
                now,
                threshold,
                |id| self.feedback.is_demoted(&injection_log, id),
            );
            log::debug!(
                "Ranked {} of {} events (gated {}, below threshold {:.3}: {}, demoted {})",
                ranked.len(),
                stats.considered,
                stats.gated,
                threshold,
                stats.below_threshold,
                stats.demoted
            );

            let selection = self
                .budgeter
                .select_within(collapse_by_fingerprint(ranked), max_chars.saturating_sub(used));
            if !selection.is_empty() {
                self.feedback.record_injection(&selection.ids(), now);
            }
            selection.render()
        };

        Ok(match (core.is_empty(), memories.is_empty()) {
            (true, _) => memories,
            (false, true) => core,
            (false, false) => format!("{core}\n{memories}"),
        })
    }

    /// Citation report: ids the host found useful
    ///
    /// Unknown ids are ignored.
    pub fn cite(&self, ids: &[EventId], now: DateTime<Utc>) -> FeedbackOutcome {
        let known: Vec<EventId> = ids
            .iter()
            .filter(|id| self.store.contains(id))
            .cloned()
            .collect();
        if known.len() < ids.len() {
            log::debug!("Ignoring {} unknown cited ids", ids.len() - known.len());
        }
        if known.is_empty() {
            return FeedbackOutcome::Applied { updated: 0 };
        }
        self.feedback.record_citation(&known, now)
    }

    /// Citation report derived from ids embedded in free text
    pub fn cite_from_text(&self, text: &str, now: DateTime<Utc>) -> FeedbackOutcome {
        let ids: Vec<EventId> = referenced_ids(text).into_iter().collect();
        self.cite(&ids, now)
    }

    /// Insert or replace a core assertion
    pub fn assert_fact(&self, topic: &str, assertion: &str, now: DateTime<Utc>) -> Result<()> {
        self.assertions.upsert(topic, assertion, now)
    }

    /// Retention, cleanup and a tuning cycle; every step is best effort
    pub fn maintain(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.store.evict_expired(now) {
            Ok(ids) => report.expired = ids.len(),
            Err(e) => log::warn!("TTL eviction failed: {}", e),
        }
        match self.store.evict_over_capacity() {
            Ok(ids) => report.over_capacity = ids.len(),
            Err(e) => log::warn!("Capacity eviction failed: {}", e),
        }
        match self.store.cleanup_temp_files() {
            Ok(n) => report.temp_files_removed = n,
            Err(e) => log::warn!("Temp file cleanup failed: {}", e),
        }

        match self.store.list_all() {
            Ok(events) => {
                let live: HashSet<EventId> = events.into_iter().map(|e| e.id).collect();
                if let FeedbackOutcome::Applied { updated } = self.feedback.prune(&live) {
                    report.log_entries_pruned = updated;
                }
            }
            Err(e) => log::warn!("Injection log pruning skipped: {}", e),
        }

        match self.assertions.compact(now) {
            Ok(n) => report.assertions_removed = n,
            Err(e) => log::warn!("Core assertion compaction failed: {}", e),
        }
        match self.governor.prune() {
            Ok(n) => report.sessions_pruned = n,
            Err(e) => log::warn!("Session pruning failed: {}", e),
        }

        report.retune = self.feedback.retune(now);
        log::info!("Maintenance finished: {:?}", report);
        report
    }

    /// Summary counts for diagnostics
    pub fn stats(&self) -> serde_json::Value {
        let events = self.store.list_all().unwrap_or_else(|e| {
            log::warn!("Stats without events: {}", e);
            Vec::new()
        });

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
        for event in &events {
            let kind = serde_json::to_value(event.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            *by_kind.entry(kind).or_insert(0) += 1;
            *by_category.entry(event.category.as_str().to_string()).or_insert(0) += 1;
            *by_source.entry(event.source.as_str().to_string()).or_insert(0) += 1;
        }

        serde_json::json!({
            "totalEvents": events.len(),
            "byKind": by_kind,
            "byCategory": by_category,
            "bySource": by_source,
            "demotedEvents": self.feedback.demoted_ids(&self.feedback.snapshot()).len(),
            "minScoreThreshold": self.feedback.threshold(),
            "coreAssertions": self.assertions.len(),
        })
    }
}
