//! Event record types and builders
//!
//! An event is one immutable lesson captured at the end of a work session.
//! Only the write path creates events; everything downstream reads them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// On-disk schema version written into every event
pub const SCHEMA_VERSION: u32 = 1;

/// Timestamp prefix layout for event ids (UTC, millisecond precision)
const ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const ID_TIME_LEN: usize = 19;
const ID_SUFFIX_LEN: usize = 8;

/// Unique, chronologically sortable event identifier
///
/// Layout: `20261016T093000123Z-1a2b3c4d`. Lexicographic order of two ids
/// equals the order of their creation timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Generate a new id stamped with `at`
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            at.format(ID_TIME_FORMAT),
            &suffix[..ID_SUFFIX_LEN]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id shape without allocating
    pub fn is_valid(s: &str) -> bool {
        let bytes = s.as_bytes();
        if bytes.len() != ID_TIME_LEN + 1 + ID_SUFFIX_LEN {
            return false;
        }
        bytes.iter().enumerate().all(|(i, b)| match i {
            8 => *b == b'T',
            18 => *b == b'Z',
            19 => *b == b'-',
            0..=17 => b.is_ascii_digit(),
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(b),
        })
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventId {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(MemoryError::invalid_id(s))
        }
    }
}

impl TryFrom<String> for EventId {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(MemoryError::invalid_id(value))
        }
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Origin/purpose tag of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Lesson,
    ManualCapture,
    Summary,
}

/// Provenance of an event, used as a scoring input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Validated checkpoint archived at session end
    #[default]
    AutoCheckpoint,
    /// Explicitly captured by the user
    Manual,
    /// Distilled from several earlier events
    Distilled,
    /// Raw capture taken right before context compaction
    Precompact,
}

impl EventSource {
    /// Provenance strength in [0, 1]
    pub fn provenance_score(&self) -> f32 {
        match self {
            Self::Manual => 1.0,
            Self::Distilled => 0.85,
            Self::AutoCheckpoint => 0.6,
            Self::Precompact => 0.3,
        }
    }

    /// Raw unprocessed captures are stored but never injected
    pub fn is_injectable(&self) -> bool {
        !matches!(self, Self::Precompact)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoCheckpoint => "auto_checkpoint",
            Self::Manual => "manual",
            Self::Distilled => "distilled",
            Self::Precompact => "precompact",
        }
    }
}

/// Closed category vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Gotcha,
    Pattern,
    Fix,
    Pitfall,
    Decision,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gotcha => "gotcha",
            Self::Pattern => "pattern",
            Self::Fix => "fix",
            Self::Pitfall => "pitfall",
            Self::Decision => "decision",
        }
    }
}

impl FromStr for Category {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gotcha" => Ok(Self::Gotcha),
            "pattern" => Ok(Self::Pattern),
            "fix" => Ok(Self::Fix),
            "pitfall" => Ok(Self::Pitfall),
            "decision" => Ok(Self::Decision),
            other => Err(MemoryError::invalid_record(format!(
                "unknown category: {other}"
            ))),
        }
    }
}

/// Controlled problem-type vocabulary
///
/// The snake_case name doubles as a synthetic concept entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    BuildError,
    TestFailure,
    RuntimeError,
    Performance,
    Configuration,
    Dependency,
    Concurrency,
    Security,
    DataIntegrity,
    Tooling,
    ApiMisuse,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildError => "build_error",
            Self::TestFailure => "test_failure",
            Self::RuntimeError => "runtime_error",
            Self::Performance => "performance",
            Self::Configuration => "configuration",
            Self::Dependency => "dependency",
            Self::Concurrency => "concurrency",
            Self::Security => "security",
            Self::DataIntegrity => "data_integrity",
            Self::Tooling => "tooling",
            Self::ApiMisuse => "api_misuse",
        }
    }
}

/// An immutable recorded lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub kind: EventKind,
    /// Human-readable lesson body
    pub content: String,
    /// Normalized match tokens, populated once at write time
    #[serde(default)]
    pub entities: BTreeSet<String>,
    pub source: EventSource,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<ProblemType>,
    /// Prior events this one says helped
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub referenced_ids: BTreeSet<EventId>,
}

impl EventRecord {
    /// Create a new builder for EventRecord
    pub fn builder() -> EventRecordBuilder {
        EventRecordBuilder::new()
    }

    /// Intrinsic quality in [0, 1], independent of any query
    pub fn quality(&self) -> f32 {
        let mut quality = 0.4;
        if self.content.chars().count() >= 80 {
            quality += 0.2;
        }
        if self.problem_type.is_some() {
            quality += 0.2;
        }
        if !self.referenced_ids.is_empty() {
            quality += 0.2;
        }
        quality
    }
}

/// Write trigger payload supplied by the host at session end
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WriteRequest {
    pub content: String,
    pub category: Option<Category>,
    /// Host-chosen search terms (2 to 7)
    #[serde(default, alias = "entities")]
    pub search_terms: Vec<String>,
    /// Files touched by the lesson, expanded into file entities
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub problem_type: Option<ProblemType>,
    #[serde(default)]
    pub referenced_ids: Vec<String>,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default)]
    pub source: EventSource,
}

/// Accepted number of host-supplied search terms
pub const SEARCH_TERMS_RANGE: std::ops::RangeInclusive<usize> = 2..=7;

impl WriteRequest {
    /// Precondition check; a failing request is never persisted
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::invalid_record("content is empty"));
        }
        if self.category.is_none() {
            return Err(MemoryError::invalid_record("category is required"));
        }
        let terms = self
            .search_terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .count();
        if !SEARCH_TERMS_RANGE.contains(&terms) {
            return Err(MemoryError::invalid_record(format!(
                "expected {}-{} search terms, got {terms}",
                SEARCH_TERMS_RANGE.start(),
                SEARCH_TERMS_RANGE.end()
            )));
        }
        for id in &self.referenced_ids {
            if !EventId::is_valid(id) {
                return Err(MemoryError::invalid_id(id.clone()));
            }
        }
        Ok(())
    }
}

/// Builder for EventRecord with fluent API
#[derive(Debug, Default)]
pub struct EventRecordBuilder {
    id: Option<EventId>,
    created_at: Option<DateTime<Utc>>,
    kind: EventKind,
    content: Option<String>,
    entities: BTreeSet<String>,
    source: EventSource,
    category: Option<Category>,
    problem_type: Option<ProblemType>,
    referenced_ids: BTreeSet<EventId>,
}

impl EventRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id (generated from `created_at` if not set)
    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the creation time (defaults to now)
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Add a single already-normalized entity
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.insert(entity.into());
        self
    }

    pub fn entities(mut self, entities: impl IntoIterator<Item = String>) -> Self {
        self.entities.extend(entities);
        self
    }

    pub fn source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Set the problem type; its name is also folded into the entities
    pub fn problem_type(mut self, problem_type: ProblemType) -> Self {
        self.problem_type = Some(problem_type);
        self
    }

    pub fn referenced_id(mut self, id: EventId) -> Self {
        self.referenced_ids.insert(id);
        self
    }

    /// Build the EventRecord
    pub fn build(self) -> Result<EventRecord, EventRecordBuilderError> {
        let content = self
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(EventRecordBuilderError::MissingContent)?;
        let category = self
            .category
            .ok_or(EventRecordBuilderError::MissingCategory)?;
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let id = self.id.unwrap_or_else(|| EventId::generate(created_at));

        let mut entities = self.entities;
        if let Some(problem_type) = self.problem_type {
            entities.insert(problem_type.as_str().to_string());
        }

        Ok(EventRecord {
            id,
            created_at,
            schema_version: SCHEMA_VERSION,
            kind: self.kind,
            content,
            entities,
            source: self.source,
            category,
            problem_type: self.problem_type,
            referenced_ids: self.referenced_ids,
        })
    }
}

/// Errors that can occur when building an EventRecord
#[derive(Debug, thiserror::Error)]
pub enum EventRecordBuilderError {
    #[error("Missing required field: content")]
    MissingContent,
    #[error("Missing required field: category")]
    MissingCategory,
}

impl From<EventRecordBuilderError> for MemoryError {
    fn from(err: EventRecordBuilderError) -> Self {
        MemoryError::invalid_record(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_id_generation() {
        let now = Utc::now();
        let id1 = EventId::generate(now);
        let id2 = EventId::generate(now);
        assert_ne!(id1, id2);
        assert!(EventId::is_valid(id1.as_str()));
    }

    #[test]
    fn test_event_id_orders_by_time() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        let a = EventId::generate(early);
        let b = EventId::generate(late);
        assert!(a < b);
        assert!(a.as_str().starts_with("20260102T030405000Z-"));
    }

    #[test]
    fn test_event_id_parse() {
        let id: EventId = "20261016T093000123Z-1a2b3c4d".parse().unwrap();
        assert_eq!(id.to_string(), "20261016T093000123Z-1a2b3c4d");

        assert!("not-an-id".parse::<EventId>().is_err());
        assert!("20261016T093000123Z-1A2B3C4D".parse::<EventId>().is_err());
        assert!("20261016X093000123Z-1a2b3c4d".parse::<EventId>().is_err());
    }

    #[test]
    fn test_event_id_rejected_on_deserialize() {
        let result: Result<EventId, _> = serde_json::from_str("\"garbage\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_folds_problem_type() {
        let event = EventRecord::builder()
            .content("cargo test hangs when the tokio runtime is nested")
            .category(Category::Gotcha)
            .entity("tokio")
            .problem_type(ProblemType::TestFailure)
            .build()
            .unwrap();

        assert!(event.entities.contains("tokio"));
        assert!(event.entities.contains("test_failure"));
        assert_eq!(event.schema_version, SCHEMA_VERSION);
        assert_eq!(event.source, EventSource::AutoCheckpoint);
    }

    #[test]
    fn test_builder_missing_required() {
        let result = EventRecord::builder().category(Category::Fix).build();
        assert!(matches!(
            result,
            Err(EventRecordBuilderError::MissingContent)
        ));

        let result = EventRecord::builder().content("body").build();
        assert!(matches!(
            result,
            Err(EventRecordBuilderError::MissingCategory)
        ));
    }

    #[test]
    fn test_quality() {
        let bare = EventRecord::builder()
            .content("short")
            .category(Category::Fix)
            .build()
            .unwrap();
        assert!((bare.quality() - 0.4).abs() < 1e-6);

        let rich = EventRecord::builder()
            .content("x".repeat(100))
            .category(Category::Fix)
            .problem_type(ProblemType::Performance)
            .referenced_id("20261016T093000123Z-1a2b3c4d".parse().unwrap())
            .build()
            .unwrap();
        assert!((rich.quality() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_write_request_validation() {
        let mut request = WriteRequest {
            content: "Use --locked in CI".to_string(),
            category: Some(Category::Pattern),
            search_terms: vec!["cargo".into(), "ci".into()],
            ..Default::default()
        };
        assert!(request.validate().is_ok());

        request.search_terms = vec!["cargo".into()];
        assert!(matches!(
            request.validate(),
            Err(MemoryError::InvalidRecord(_))
        ));

        request.search_terms = (0..8).map(|i| format!("t{i}")).collect();
        assert!(request.validate().is_err());

        request.search_terms = vec!["cargo".into(), "ci".into()];
        request.category = None;
        assert!(request.validate().is_err());

        request.category = Some(Category::Pattern);
        request.referenced_ids = vec!["bogus".into()];
        assert!(matches!(request.validate(), Err(MemoryError::InvalidId(_))));
    }

    #[test]
    fn test_write_request_accepts_entities_alias() {
        let json = r#"{
            "content": "Login redirects loop when the session cookie is SameSite=Strict",
            "category": "gotcha",
            "entities": ["auth", "login.py"],
            "problem_type": "runtime_error"
        }"#;
        let request: WriteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.search_terms, vec!["auth", "login.py"]);
        assert_eq!(request.problem_type, Some(ProblemType::RuntimeError));
        assert_eq!(request.kind, EventKind::Lesson);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = EventRecord::builder()
            .content("Content")
            .category(Category::Pitfall)
            .source(EventSource::Manual)
            .build()
            .unwrap();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"source\":\"manual\""));
        let deserialized: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_precompact_not_injectable() {
        assert!(!EventSource::Precompact.is_injectable());
        assert!(EventSource::AutoCheckpoint.is_injectable());
        assert!(EventSource::Manual.provenance_score() > EventSource::Precompact.provenance_score());
    }
}
