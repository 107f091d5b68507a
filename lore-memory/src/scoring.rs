//! Relevance scoring
//!
//! Combines entity overlap, recency, intrinsic quality and source
//! provenance into a single score in [0, 1]. Overlap doubles as a hard
//! gate: an event with no matching entity is never a candidate, however
//! recent it is.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventId, EventRecord};
use crate::extract::{stem_of, ContextEntities, ContextEntity, EntityRole};
use crate::temporal::{age_of, DecayCurve};

/// Match strength per tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierStrengths {
    pub basename: f32,
    pub stem: f32,
    pub concept: f32,
    pub substring: f32,
    pub directory: f32,
    /// Both sides must be at least this long for a substring match
    pub min_substring_len: usize,
}

impl Default for TierStrengths {
    fn default() -> Self {
        Self {
            basename: 1.0,
            stem: 0.6,
            concept: 0.5,
            substring: 0.35,
            directory: 0.3,
            min_substring_len: 4,
        }
    }
}

/// Signal weights; normalized by their sum when scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub overlap: f32,
    pub recency: f32,
    pub quality: f32,
    pub provenance: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::two_signal()
    }
}

impl ScoringWeights {
    /// Equal overlap/recency weighting (default)
    pub fn two_signal() -> Self {
        Self {
            overlap: 0.5,
            recency: 0.5,
            quality: 0.0,
            provenance: 0.0,
        }
    }

    /// Overlap 35 / recency 30 / quality 20 / provenance 15
    pub fn four_signal() -> Self {
        Self {
            overlap: 0.35,
            recency: 0.30,
            quality: 0.20,
            provenance: 0.15,
        }
    }

    fn total(&self) -> f32 {
        self.overlap + self.recency + self.quality + self.provenance
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub tiers: TierStrengths,
    pub decay: DecayCurve,
}

/// Which tier produced the best entity match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Basename,
    Stem,
    Concept,
    Substring,
    Directory,
}

/// Strongest single match between context and event
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub tier: MatchTier,
    pub strength: f32,
    pub context_token: String,
    pub event_entity: String,
}

/// Per-signal breakdown of a score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub overlap: f32,
    pub recency: f32,
    pub quality: f32,
    pub provenance: f32,
    /// Weighted combination in [0, 1]
    pub combined: f32,
    pub best_match: Option<EntityMatch>,
}

impl ScoreBreakdown {
    /// Entity gate: zero overlap rejects the event outright
    pub fn passes_gate(&self) -> bool {
        self.overlap > 0.0
    }
}

/// An event that survived gating, threshold and demotion
#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub event: EventRecord,
    pub score: ScoreBreakdown,
}

/// Outcome counts of one ranking pass, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankStats {
    pub considered: usize,
    pub gated: usize,
    pub below_threshold: usize,
    pub demoted: usize,
}

/// Scores events against the current context
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Best single-token match across the whole context (max, not mean)
    pub fn entity_overlap(
        &self,
        event: &EventRecord,
        context: &ContextEntities,
    ) -> Option<EntityMatch> {
        let mut best: Option<EntityMatch> = None;

        for ctx in context.iter() {
            for entity in &event.entities {
                let Some((tier, strength)) = self.match_strength(ctx, entity) else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| strength > b.strength) {
                    best = Some(EntityMatch {
                        tier,
                        strength,
                        context_token: ctx.token.clone(),
                        event_entity: entity.clone(),
                    });
                }
                if strength >= self.config.tiers.basename {
                    return best;
                }
            }
        }

        best
    }

    fn match_strength(&self, ctx: &ContextEntity, entity: &str) -> Option<(MatchTier, f32)> {
        let tiers = &self.config.tiers;
        let token = ctx.token.as_str();

        let exact = token == entity;
        let substring = !exact
            && token.chars().count() >= tiers.min_substring_len
            && entity.chars().count() >= tiers.min_substring_len
            && (entity.contains(token) || token.contains(entity));

        match ctx.role {
            EntityRole::Basename if exact => Some((MatchTier::Basename, tiers.basename)),
            EntityRole::Basename if stem_of(token) == stem_of(entity) => {
                Some((MatchTier::Stem, tiers.stem))
            }
            EntityRole::Stem if exact || stem_of(entity) == token => {
                Some((MatchTier::Stem, tiers.stem))
            }
            EntityRole::Concept if exact => Some((MatchTier::Concept, tiers.concept)),
            EntityRole::Directory if exact => Some((MatchTier::Directory, tiers.directory)),
            EntityRole::Basename | EntityRole::Stem | EntityRole::Concept if substring => {
                Some((MatchTier::Substring, tiers.substring))
            }
            _ => None,
        }
    }

    /// Score one event at time `now`
    pub fn score(
        &self,
        event: &EventRecord,
        context: &ContextEntities,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let best_match = self.entity_overlap(event, context);
        let overlap = best_match.as_ref().map_or(0.0, |m| m.strength);
        let recency = self.config.decay.score(age_of(event.created_at, now));
        let quality = event.quality();
        let provenance = event.source.provenance_score();

        let w = &self.config.weights;
        let total = w.total();
        let combined = if total > 0.0 {
            (w.overlap * overlap
                + w.recency * recency
                + w.quality * quality
                + w.provenance * provenance)
                / total
        } else {
            0.0
        };

        ScoreBreakdown {
            overlap,
            recency,
            quality,
            provenance,
            combined: combined.clamp(0.0, 1.0),
            best_match,
        }
    }

    /// Score, gate and filter events, highest first
    ///
    /// Ties are broken by creation time, most recent first.
    pub fn rank<F>(
        &self,
        events: impl IntoIterator<Item = EventRecord>,
        context: &ContextEntities,
        now: DateTime<Utc>,
        min_score_threshold: f32,
        is_demoted: F,
    ) -> (Vec<ScoredEvent>, RankStats)
    where
        F: Fn(&EventId) -> bool,
    {
        let mut stats = RankStats::default();
        let mut ranked = Vec::new();

        for event in events {
            stats.considered += 1;
            if is_demoted(&event.id) {
                stats.demoted += 1;
                continue;
            }
            let score = self.score(&event, context, now);
            if !score.passes_gate() {
                stats.gated += 1;
                continue;
            }
            if score.combined < min_score_threshold {
                stats.below_threshold += 1;
                continue;
            }
            ranked.push(ScoredEvent { event, score });
        }

        ranked.sort_by(compare_ranked);
        (ranked, stats)
    }
}

/// Descending score, then newest first
pub fn compare_ranked(a: &ScoredEvent, b: &ScoredEvent) -> Ordering {
    b.score
        .combined
        .partial_cmp(&a.score.combined)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.event.created_at.cmp(&a.event.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, EventSource};
    use chrono::Duration;

    fn event_with(entities: &[&str], created_at: DateTime<Utc>) -> EventRecord {
        EventRecord::builder()
            .content("lesson body")
            .category(Category::Gotcha)
            .created_at(created_at)
            .entities(entities.iter().map(|s| s.to_string()))
            .build()
            .unwrap()
    }

    fn overlap(event_entities: &[&str], context: &[&str]) -> f32 {
        let event = event_with(event_entities, Utc::now());
        Scorer::default()
            .entity_overlap(&event, &ContextEntities::from_tokens(context))
            .map_or(0.0, |m| m.strength)
    }

    #[test]
    fn test_tier_strengths() {
        assert_eq!(overlap(&["login.py"], &["login.py"]), 1.0);
        assert_eq!(overlap(&["login.py"], &["login.rs"]), 0.6);
        assert_eq!(overlap(&["login"], &["src/login.rs"]), 0.6);
        assert_eq!(overlap(&["auth"], &["auth"]), 0.5);
        assert_eq!(overlap(&["connection_pool"], &["pool_size", "connection"]), 0.35);
        assert_eq!(overlap(&["auth"], &["src/auth/x.txt"]), 0.3);
        assert_eq!(overlap(&["auth"], &["billing"]), 0.0);
    }

    #[test]
    fn test_overlap_is_max_not_mean() {
        // one strong match beats many misses
        assert_eq!(
            overlap(&["login.py"], &["login.py", "a", "b", "c", "d"]),
            1.0
        );
    }

    #[test]
    fn test_short_tokens_never_substring_match() {
        assert_eq!(overlap(&["db"], &["dbg"]), 0.0);
    }

    #[test]
    fn test_entity_gate_rejects_fresh_irrelevant_event() {
        let now = Utc::now();
        let event = event_with(&["billing", "invoice.rs"], now);
        let ctx = ContextEntities::from_tokens(["login.py"]);

        let score = Scorer::default().score(&event, &ctx, now);
        assert_eq!(score.recency, 1.0);
        assert!(!score.passes_gate());

        let (ranked, stats) = Scorer::default().rank(vec![event], &ctx, now, 0.0, |_| false);
        assert!(ranked.is_empty());
        assert_eq!(stats.gated, 1);
    }

    #[test]
    fn test_two_signal_combination() {
        let now = Utc::now();
        let event = event_with(&["auth", "login.py"], now - Duration::hours(24));
        let ctx = ContextEntities::from_tokens(["login.py"]);

        let score = Scorer::default().score(&event, &ctx, now);
        assert_eq!(score.overlap, 1.0);
        assert!((score.recency - 0.75).abs() < 1e-4);
        assert!((score.combined - 0.875).abs() < 1e-4);
    }

    #[test]
    fn test_four_signal_combination() {
        let now = Utc::now();
        let mut event = event_with(&["auth"], now);
        event.source = EventSource::Manual;

        let scorer = Scorer::new(ScoringConfig {
            weights: ScoringWeights::four_signal(),
            ..Default::default()
        });
        let score = scorer.score(&event, &ContextEntities::from_tokens(["auth"]), now);

        let expected = 0.35 * 0.5 + 0.30 * 1.0 + 0.20 * 0.4 + 0.15 * 1.0;
        assert!((score.combined - expected).abs() < 1e-4);
    }

    #[test]
    fn test_rank_threshold_demotion_and_order() {
        let now = Utc::now();
        let fresh = event_with(&["auth"], now - Duration::hours(1));
        let older = event_with(&["auth"], now - Duration::days(10));
        let demoted = event_with(&["auth"], now);
        let stale = event_with(&["auth"], now - Duration::days(80));
        let demoted_id = demoted.id.clone();

        let ctx = ContextEntities::from_tokens(["auth"]);
        let (ranked, stats) = Scorer::default().rank(
            vec![older.clone(), demoted, fresh.clone(), stale],
            &ctx,
            now,
            0.26,
            |id| *id == demoted_id,
        );

        let ids: Vec<_> = ranked.iter().map(|r| r.event.id.clone()).collect();
        assert_eq!(ids, vec![fresh.id, older.id]);
        assert_eq!(stats.demoted, 1);
        assert_eq!(stats.below_threshold, 1);
    }

    #[test]
    fn test_ties_break_newest_first() {
        let now = Utc::now();
        let mut a = event_with(&["auth"], now - Duration::hours(3));
        let b = event_with(&["auth"], now - Duration::hours(1));
        // identical scores regardless of age
        let scorer = Scorer::new(ScoringConfig {
            weights: ScoringWeights {
                overlap: 1.0,
                recency: 0.0,
                quality: 0.0,
                provenance: 0.0,
            },
            ..Default::default()
        });
        a.content = "other".into();

        let (ranked, _) = scorer.rank(
            vec![a.clone(), b.clone()],
            &ContextEntities::from_tokens(["auth"]),
            now,
            0.0,
            |_| false,
        );
        assert_eq!(ranked[0].event.id, b.id);
        assert_eq!(ranked[1].event.id, a.id);
    }
}
