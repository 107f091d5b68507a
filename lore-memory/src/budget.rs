//! Injection budgeting
//!
//! Turns ranked candidates into the `<lore-memories>` block handed to the
//! host. Higher scores earn longer excerpts; the whole block, wrapper
//! included, never exceeds the global character cap.

use serde::{Deserialize, Serialize};

use crate::event::EventId;
use crate::scoring::{compare_ranked, ScoredEvent};

const OPEN_TAG: &str = "<lore-memories>\n";
const CLOSE_TAG: &str = "</lore-memories>";
const ELLIPSIS: char = '…';

/// Excerpt length granted to events scoring at least `min_score`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimit {
    pub min_score: f32,
    pub max_chars: usize,
}

/// Injection budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum number of events per read
    pub max_count: usize,
    /// Global cap on rendered characters per read
    pub max_total_chars: usize,
    /// Per-block limits, checked from highest `min_score` down
    pub tiers: Vec<TierLimit>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_count: 5,
            max_total_chars: 8000,
            tiers: vec![
                TierLimit {
                    min_score: 0.6,
                    max_chars: 600,
                },
                TierLimit {
                    min_score: 0.4,
                    max_chars: 350,
                },
                TierLimit {
                    min_score: 0.0,
                    max_chars: 200,
                },
            ],
        }
    }
}

impl BudgetConfig {
    /// Block limit for a score; scores below every tier get the smallest one
    pub fn block_limit(&self, score: f32) -> usize {
        let mut tiers = self.tiers.clone();
        tiers.sort_by(|a, b| b.min_score.total_cmp(&a.min_score));
        tiers
            .iter()
            .find(|t| score >= t.min_score)
            .or_else(|| tiers.last())
            .map_or(0, |t| t.max_chars)
    }
}

/// One rendered `<memory>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBlock {
    pub id: EventId,
    pub text: String,
    pub truncated: bool,
}

impl RenderedBlock {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Budgeted selection, in injection order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub blocks: Vec<RenderedBlock>,
    /// Candidates dropped because not even their first word fit
    pub skipped: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn ids(&self) -> Vec<EventId> {
        self.blocks.iter().map(|b| b.id.clone()).collect()
    }

    /// Full `<lore-memories>` block, or the empty string
    pub fn render(&self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }
        let mut out = String::from(OPEN_TAG);
        for block in &self.blocks {
            out.push_str(&block.text);
            out.push('\n');
        }
        out.push_str(CLOSE_TAG);
        out
    }
}

/// Selects and renders the top candidates under the budget
#[derive(Debug, Clone, Default)]
pub struct Budgeter {
    config: BudgetConfig,
}

impl Budgeter {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Select under the configured count and character limits
    pub fn select(&self, candidates: Vec<ScoredEvent>) -> Selection {
        self.select_within(candidates, self.config.max_total_chars)
    }

    /// Select with an explicit character allowance for the whole block
    ///
    /// Used when other output (core assertions) already consumed part of
    /// the global cap.
    pub fn select_within(&self, mut candidates: Vec<ScoredEvent>, max_total_chars: usize) -> Selection {
        let mut selection = Selection::default();
        let wrapper = OPEN_TAG.chars().count() + CLOSE_TAG.chars().count();
        let Some(mut remaining) = max_total_chars.checked_sub(wrapper) else {
            return selection;
        };

        candidates.retain(|c| c.event.source.is_injectable());
        candidates.sort_by(compare_ranked);

        for candidate in candidates.into_iter().take(self.config.max_count) {
            // each block is followed by a newline inside the wrapper
            let limit = self
                .config
                .block_limit(candidate.score.combined)
                .min(remaining.saturating_sub(1));

            match render_block(&candidate, limit) {
                Some(block) => {
                    remaining -= block.char_count() + 1;
                    selection.blocks.push(block);
                }
                None => {
                    log::debug!("Event {} does not fit the remaining budget", candidate.event.id);
                    selection.skipped += 1;
                }
            }
        }

        selection
    }
}

/// Render one candidate into at most `limit` characters
fn render_block(candidate: &ScoredEvent, limit: usize) -> Option<RenderedBlock> {
    let event = &candidate.event;
    let head = format!(
        "<memory id=\"{}\" category=\"{}\" score=\"{:.2}\">",
        event.id,
        event.category.as_str(),
        candidate.score.combined
    );
    let tail = "</memory>";
    let available = limit.checked_sub(head.chars().count() + tail.chars().count())?;

    let content = event.content.trim();
    let escaped = escape(content);
    let (body, truncated) = if escaped.chars().count() <= available {
        (escaped, false)
    } else {
        (excerpt(content, available)?, true)
    };

    Some(RenderedBlock {
        id: event.id.clone(),
        text: format!("{head}{body}{tail}"),
        truncated,
    })
}

/// Escaped prefix ending at a word boundary, plus an ellipsis, within
/// `available` characters
fn excerpt(content: &str, available: usize) -> Option<String> {
    let budget = available.checked_sub(1)?;
    let mut used = 0;
    let mut cut = None;

    for (idx, ch) in content.char_indices() {
        if ch.is_whitespace() {
            cut = Some(idx);
        }
        used += escaped_len(ch);
        if used > budget {
            break;
        }
    }

    let prefix = content[..cut?].trim_end();
    if prefix.is_empty() {
        return None;
    }
    let mut out = escape(prefix);
    out.push(ELLIPSIS);
    Some(out)
}

fn escaped_len(ch: char) -> usize {
    match ch {
        '&' => 5,
        '<' | '>' => 4,
        '"' => 6,
        _ => 1,
    }
}

/// XML-escape `&`, `<`, `>` and `"`
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Ids of the `<memory>` elements in a rendered block, in order
pub fn parse_shown_ids(block: &str) -> Vec<EventId> {
    const MARKER: &str = "<memory id=\"";
    block
        .match_indices(MARKER)
        .filter_map(|(start, _)| {
            let rest = &block[start + MARKER.len()..];
            let end = rest.find('"')?;
            rest[..end].parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, EventRecord, EventSource};
    use crate::scoring::ScoreBreakdown;
    use chrono::{Duration, Utc};

    fn candidate(content: &str, score: f32, minutes_ago: i64) -> ScoredEvent {
        let event = EventRecord::builder()
            .content(content)
            .category(Category::Pattern)
            .created_at(Utc::now() - Duration::minutes(minutes_ago))
            .entity("auth")
            .build()
            .unwrap();
        ScoredEvent {
            event,
            score: ScoreBreakdown {
                overlap: 1.0,
                recency: 1.0,
                quality: 0.4,
                provenance: 0.6,
                combined: score,
                best_match: None,
            },
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_block_limit_tiers() {
        let config = BudgetConfig::default();
        assert_eq!(config.block_limit(0.9), 600);
        assert_eq!(config.block_limit(0.6), 600);
        assert_eq!(config.block_limit(0.45), 350);
        assert_eq!(config.block_limit(0.1), 200);
    }

    #[test]
    fn test_takes_top_n_in_rank_order() {
        let candidates: Vec<_> = (0..8)
            .map(|i| candidate(&format!("lesson {i}"), i as f32 / 10.0, 0))
            .collect();
        let expected: Vec<_> = candidates[3..].iter().rev().map(|c| c.event.id.clone()).collect();

        let selection = Budgeter::default().select(candidates);
        assert_eq!(selection.ids(), expected);
    }

    #[test]
    fn test_precompact_never_injected() {
        let mut raw = candidate("raw capture", 0.99, 0);
        raw.event.source = EventSource::Precompact;
        let kept = candidate("distilled lesson", 0.5, 0);

        let selection = Budgeter::default().select(vec![raw, kept.clone()]);
        assert_eq!(selection.ids(), vec![kept.event.id]);
    }

    #[test]
    fn test_truncates_at_word_boundary() {
        let c = candidate(&words(200), 0.9, 0);
        let content = c.event.content.clone();
        let selection = Budgeter::default().select(vec![c]);

        let block = &selection.blocks[0];
        assert!(block.truncated);
        assert!(block.char_count() <= 600);

        let start = block.text.find('>').unwrap() + 1;
        let body = block.text[start..].strip_suffix("</memory>").unwrap();
        let kept = body.strip_suffix(ELLIPSIS).unwrap();
        assert!(content.starts_with(kept));
        assert!(content[kept.len()..].starts_with(' '));
    }

    #[test]
    fn test_global_cap_holds() {
        let budgeter = Budgeter::new(BudgetConfig {
            max_count: 50,
            max_total_chars: 1500,
            ..Default::default()
        });
        let candidates: Vec<_> = (0..50).map(|i| candidate(&words(150), 0.9, i)).collect();

        let selection = budgeter.select(candidates);
        let rendered = selection.render();
        assert!(!selection.is_empty());
        assert!(rendered.chars().count() <= 1500);
        for block in &selection.blocks {
            assert!(block.text.ends_with("…</memory>") || !block.truncated);
        }
    }

    #[test]
    fn test_tiny_budget_renders_nothing() {
        let selection = Budgeter::default().select_within(vec![candidate("short", 0.9, 0)], 20);
        assert!(selection.is_empty());
        assert_eq!(selection.render(), "");
    }

    #[test]
    fn test_unbreakable_first_word_is_skipped() {
        let long_word = "x".repeat(400);
        let selection = Budgeter::default().select(vec![
            candidate(&long_word, 0.1, 0),
            candidate("fits fine", 0.05, 0),
        ]);
        assert_eq!(selection.skipped, 1);
        assert_eq!(selection.blocks.len(), 1);
    }

    #[test]
    fn test_content_is_escaped() {
        let selection =
            Budgeter::default().select(vec![candidate("use <T> & \"quotes\"", 0.9, 0)]);
        assert!(selection.blocks[0]
            .text
            .contains("use &lt;T&gt; &amp; &quot;quotes&quot;"));
    }

    #[test]
    fn test_parse_shown_ids() {
        let candidates = vec![candidate("one", 0.9, 0), candidate("two", 0.8, 5)];
        let expected: Vec<_> = candidates.iter().map(|c| c.event.id.clone()).collect();

        let rendered = Budgeter::default().select(candidates).render();
        assert!(rendered.starts_with("<lore-memories>"));
        assert_eq!(parse_shown_ids(&rendered), expected);
        assert!(parse_shown_ids("<memory id=\"bogus\">x</memory>").is_empty());
    }
}
