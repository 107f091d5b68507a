//! Engine configuration
//!
//! Every section has working defaults; an optional `config.json` in the
//! data root overrides any subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assertions::AssertionsConfig;
use crate::budget::BudgetConfig;
use crate::dedup::DedupConfig;
use crate::durable::read_json;
use crate::error::{MemoryError, Result};
use crate::extract::ExtractorConfig;
use crate::feedback::FeedbackConfig;
use crate::governor::GovernorConfig;
use crate::scoring::ScoringConfig;
use crate::storage::StoreConfig;

/// File name of the optional override file inside the data root
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration for the whole memory engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub extractor: ExtractorConfig,
    pub scoring: ScoringConfig,
    pub budget: BudgetConfig,
    pub feedback: FeedbackConfig,
    pub assertions: AssertionsConfig,
    pub governor: GovernorConfig,
    pub dedup: DedupConfig,
}

impl EngineConfig {
    /// Load overrides from `path`
    ///
    /// A missing file yields defaults. An unreadable or invalid file is
    /// logged and also yields defaults.
    pub fn load(path: &Path) -> Self {
        let loaded = match read_json::<EngineConfig>(path) {
            Ok(Some(config)) => config,
            Ok(None) => return Self::default(),
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match loaded.validate() {
            Ok(()) => {
                log::debug!("Loaded config from {}", path.display());
                loaded
            }
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Reject values no engine could run with
    pub fn validate(&self) -> Result<()> {
        if self.store.ttl_days <= 0 {
            return Err(MemoryError::config("store.ttl_days must be positive"));
        }
        if self.store.max_events == 0 {
            return Err(MemoryError::config("store.max_events must be positive"));
        }

        let w = &self.scoring.weights;
        let weights = [w.overlap, w.recency, w.quality, w.provenance];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) || weights.iter().sum::<f32>() <= 0.0 {
            return Err(MemoryError::config(
                "scoring.weights must be non-negative with a positive sum",
            ));
        }
        if self.scoring.decay.half_life_days <= 0.0 || self.scoring.decay.linear_window_hours < 0.0 {
            return Err(MemoryError::config("scoring.decay parameters out of range"));
        }

        if self.budget.max_count == 0 || self.budget.max_total_chars == 0 {
            return Err(MemoryError::config("budget limits must be positive"));
        }
        if self.budget.tiers.is_empty() {
            return Err(MemoryError::config("budget.tiers must not be empty"));
        }

        let f = &self.feedback;
        if !(0.0..=1.0).contains(&f.min_threshold)
            || !(0.0..=1.0).contains(&f.max_threshold)
            || f.min_threshold > f.max_threshold
        {
            return Err(MemoryError::config(format!(
                "feedback threshold bounds [{}, {}] are invalid",
                f.min_threshold, f.max_threshold
            )));
        }
        if !(0.0..=1.0).contains(&f.target_citation_rate) || f.gain < 0.0 {
            return Err(MemoryError::config("feedback target or gain out of range"));
        }
        if f.window_size == 0 || f.demotion_injections == 0 {
            return Err(MemoryError::config("feedback window and demotion counts must be positive"));
        }

        if self.assertions.capacity == 0 {
            return Err(MemoryError::config("assertions.capacity must be positive"));
        }
        if !(0.0..=1.0).contains(&self.dedup.jaccard_threshold) {
            return Err(MemoryError::config("dedup.jaccard_threshold must be in [0, 1]"));
        }

        Ok(())
    }
}
