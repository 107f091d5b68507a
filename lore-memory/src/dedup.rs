//! Duplicate detection
//!
//! Two lessons are duplicates when their normalized content is identical,
//! or when they share a category, were written close together and carry
//! nearly the same entity set.

use std::collections::{BTreeSet, HashSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::EventRecord;
use crate::scoring::ScoredEvent;

/// Duplicate detection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum entity-set Jaccard similarity for a near duplicate
    pub jaccard_threshold: f32,
    /// Near duplicates must be within this many days of each other
    pub window_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            jaccard_threshold: 0.9,
            window_days: 7,
        }
    }
}

/// SHA-256 of lower-cased, whitespace-collapsed content
pub fn content_fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Jaccard similarity of two entity sets; two empty sets are dissimilar
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Find an existing event that `candidate` duplicates
pub fn find_duplicate<'a>(
    candidate: &EventRecord,
    existing: &'a [EventRecord],
    config: &DedupConfig,
) -> Option<&'a EventRecord> {
    let fingerprint = content_fingerprint(&candidate.content);
    let window = Duration::days(config.window_days);

    existing.iter().find(|other| {
        if content_fingerprint(&other.content) == fingerprint {
            return true;
        }
        other.category == candidate.category
            && (candidate.created_at - other.created_at).abs() <= window
            && jaccard(&candidate.entities, &other.entities) >= config.jaccard_threshold
    })
}

/// Keep only the first event per content fingerprint
///
/// Input is expected in rank order, so the best-scoring copy survives.
pub fn collapse_by_fingerprint(ranked: Vec<ScoredEvent>) -> Vec<ScoredEvent> {
    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|r| seen.insert(content_fingerprint(&r.event.content)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Category;
    use chrono::{DateTime, Utc};

    fn event(content: &str, category: Category, entities: &[&str], at: DateTime<Utc>) -> EventRecord {
        EventRecord::builder()
            .content(content)
            .category(category)
            .created_at(at)
            .entities(entities.iter().map(|s| s.to_string()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace_and_case() {
        assert_eq!(
            content_fingerprint("Use  --locked\nin CI"),
            content_fingerprint("use --locked in ci")
        );
        assert_ne!(content_fingerprint("a"), content_fingerprint("b"));
    }

    #[test]
    fn test_fingerprint_is_lowercase_sha256_hex() {
        assert_eq!(
            content_fingerprint("  ABC "),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_exact_content_duplicate() {
        let now = Utc::now();
        let existing = vec![event("Pin the toolchain", Category::Fix, &["cargo"], now)];
        let candidate = event("pin the   toolchain", Category::Pattern, &["rustup"], now);
        assert!(find_duplicate(&candidate, &existing, &DedupConfig::default()).is_some());
    }

    #[test]
    fn test_near_duplicate_requires_category_and_window() {
        let now = Utc::now();
        let entities = ["auth", "login.py", "login"];
        let existing = vec![event("first wording", Category::Gotcha, &entities, now)];
        let config = DedupConfig::default();

        let same = event("second wording", Category::Gotcha, &entities, now);
        assert!(find_duplicate(&same, &existing, &config).is_some());

        let other_category = event("second wording", Category::Fix, &entities, now);
        assert!(find_duplicate(&other_category, &existing, &config).is_none());

        let much_later = event(
            "second wording",
            Category::Gotcha,
            &entities,
            now + Duration::days(30),
        );
        assert!(find_duplicate(&much_later, &existing, &config).is_none());
    }
}
