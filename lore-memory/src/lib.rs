//! Lore Memory Engine
//!
//! Embedded, file-backed cross-session memory. Lessons learned in one work
//! session are recorded as immutable events, ranked against the context of
//! a later session and injected back as a budgeted text block. Citation
//! feedback tunes how picky the ranking is.
//!
//! ## Features
//!
//! - **Crash-safe store** - one JSON file per event, written temp → fsync → rename
//! - **Lexical relevance** - tiered entity overlap gated on a match, with two-phase recency decay
//! - **Injection budget** - score-tiered excerpts under a global character cap
//! - **Self-tuning** - citation rate drives a clamped proportional threshold controller
//! - **Core assertions** - topic-keyed durable facts, always rendered first
//!
//! ## Example
//!
//! ```ignore
//! use lore_memory::{EngineConfig, MemoryEngine, ProjectKey, ReadRequest, ReadTrigger};
//!
//! let key = ProjectKey::for_checkout(&project_root, None);
//! let engine = MemoryEngine::open(&data_root, &key, EngineConfig::default())?;
//!
//! // Session end: record what was learned
//! engine.record(request, Utc::now())?;
//!
//! // Session start: get the memories relevant to the files in play
//! let block = engine.recall(
//!     &ReadRequest::new(ReadTrigger::SessionStart, "session-42").file("src/auth/login.py"),
//!     Utc::now(),
//! );
//! ```

pub mod assertions;
pub mod budget;
pub mod config;
pub mod dedup;
pub mod durable;
pub mod engine;
pub mod error;
pub mod event;
pub mod extract;
pub mod feedback;
pub mod governor;
pub mod project;
pub mod scoring;
pub mod storage;
pub mod temporal;

// Re-exports for convenience
pub use assertions::{AssertionsConfig, CoreAssertion, CoreAssertionsStore};
pub use budget::{parse_shown_ids, BudgetConfig, Budgeter, Selection};
pub use config::{EngineConfig, CONFIG_FILE_NAME};
pub use engine::{AppendOutcome, MaintenanceReport, MemoryEngine, ReadRequest};
pub use error::{MemoryError, Result};
pub use event::{
    Category, EventId, EventKind, EventRecord, EventRecordBuilder, EventSource, ProblemType,
    WriteRequest,
};
pub use extract::{referenced_ids, ContextSnapshot, Extractor};
pub use feedback::{FeedbackConfig, FeedbackController, FeedbackOutcome};
pub use governor::{ReadDecision, ReadTrigger};
pub use project::{ProjectKey, ProjectLayout};
pub use scoring::{ScoredEvent, Scorer, ScoringConfig, ScoringWeights};
pub use storage::{EventStore, StoreConfig};
pub use temporal::DecayCurve;
