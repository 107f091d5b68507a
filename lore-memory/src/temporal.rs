//! Time handling for event relevance and retention
//!
//! Recency follows a two-phase curve:
//! - **Fresh phase** (age ≤ 48h): linear ramp from 1.0 down to 0.5
//! - **Aging phase** (age > 48h): exponential decay anchored at 0.5 with a
//!   7-day half-life
//!
//! ```text
//! score │╲
//!   1.0 │ ╲
//!       │  ╲
//!   0.5 │   ●___
//!       │       ╲______
//!       │              ╲____________
//!       └───┬──────────────────────► age
//!          48h
//! ```
//!
//! Both phases evaluate to the anchor value at the boundary, so the curve is
//! continuous there.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Parameters of the recency curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayCurve {
    /// Length of the linear phase in hours
    pub linear_window_hours: f64,
    /// Score at the end of the linear phase
    pub anchor: f64,
    /// Half-life of the exponential phase in days
    pub half_life_days: f64,
}

impl Default for DecayCurve {
    fn default() -> Self {
        Self {
            linear_window_hours: 48.0,
            anchor: 0.5,
            half_life_days: 7.0,
        }
    }
}

impl DecayCurve {
    /// Recency score in (0, 1] for an event of the given age
    ///
    /// Future timestamps (clock skew) count as age zero.
    pub fn score(&self, age: Duration) -> f32 {
        let hours = age_hours(age);
        if hours <= self.linear_window_hours {
            self.linear_phase(hours) as f32
        } else {
            self.exponential_phase(hours) as f32
        }
    }

    /// Linear branch, valid for `0 ≤ hours ≤ linear_window_hours`
    pub fn linear_phase(&self, hours: f64) -> f64 {
        let fraction = hours.max(0.0) / self.linear_window_hours;
        1.0 - (1.0 - self.anchor) * fraction
    }

    /// Exponential branch, valid for `hours ≥ linear_window_hours`
    pub fn exponential_phase(&self, hours: f64) -> f64 {
        let past_window_days = (hours - self.linear_window_hours).max(0.0) / 24.0;
        self.anchor * 2f64.powf(-past_window_days / self.half_life_days)
    }
}

/// Age in fractional hours, clamped at zero
pub fn age_hours(age: Duration) -> f64 {
    (age.num_milliseconds() as f64 / MILLIS_PER_HOUR).max(0.0)
}

/// Elapsed time between `created_at` and `now`, never negative
pub fn age_of(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - created_at).max(Duration::zero())
}

/// Check whether something created at `created_at` has outlived `ttl`
pub fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - created_at > ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_event_scores_one() {
        let curve = DecayCurve::default();
        assert_eq!(curve.score(Duration::zero()), 1.0);
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let curve = DecayCurve::default();
        assert_eq!(curve.score(Duration::hours(-5)), 1.0);
    }

    #[test]
    fn test_linear_phase() {
        let curve = DecayCurve::default();
        assert!((curve.score(Duration::hours(24)) - 0.75).abs() < 1e-6);
        assert!((curve.score(Duration::hours(12)) - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_continuity_at_boundary() {
        let curve = DecayCurve::default();
        let linear = curve.linear_phase(48.0);
        let exponential = curve.exponential_phase(48.0);
        assert!((linear - exponential).abs() < f64::EPSILON);
        assert_eq!(linear, 0.5);
        assert_eq!(curve.score(Duration::hours(48)), 0.5);
    }

    #[test]
    fn test_half_life() {
        let curve = DecayCurve::default();
        let one_half_life = curve.score(Duration::hours(48) + Duration::days(7));
        let two_half_lives = curve.score(Duration::hours(48) + Duration::days(14));
        assert!((one_half_life - 0.25).abs() < 1e-6);
        assert!((two_half_lives - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_monotonic() {
        let curve = DecayCurve::default();
        let mut previous = f32::MAX;
        for hours in (0..24 * 60).step_by(7) {
            let score = curve.score(Duration::hours(hours));
            assert!(score <= previous);
            assert!(score > 0.0);
            previous = score;
        }
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let ttl = Duration::days(90);
        assert!(!is_expired(now - Duration::days(89), now, ttl));
        assert!(is_expired(now - Duration::days(91), now, ttl));
    }

    #[test]
    fn test_age_of_clamps() {
        let now = Utc::now();
        assert_eq!(age_of(now + Duration::hours(1), now), Duration::zero());
        assert_eq!(age_of(now - Duration::hours(1), now), Duration::hours(1));
    }
}
