//! Lesson Record: a single routing/performance/error-handling/context lesson
//! with Bayesian confidence, source-weighted authority, and TTL decay.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category a lesson applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonCategory {
    Routing,
    Performance,
    ErrorHandling,
    ContextManagement,
}

/// Bayesian Beta prior and maturity/decay constants, per §4.F / §6.
#[derive(Debug, Clone)]
pub struct PlaybookConfig {
    pub max_lessons: usize,
    pub maturity: u32,
    pub half_life: ChronoDuration,
    pub stability_window: ChronoDuration,
    pub alpha0: f64,
    pub beta0: f64,
    /// Open Question #1 (SPEC_FULL.md §9): whether a burst of consecutive
    /// successes should recover confidence faster than the plain Bayesian
    /// update. Decided `false` (no acceleration) — exposed for callers who
    /// want the alternate behaviour.
    pub burst_acceleration: bool,
    /// Open Question #2: whether the 0.5 sourceWeight stability threshold is
    /// inclusive (`>=`) or strict (`>`). Decided strict, matching the literal
    /// wording "exceeds... by more than 0.5".
    pub stability_threshold_inclusive: bool,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            max_lessons: 50,
            maturity: 10,
            half_life: ChronoDuration::hours(24),
            stability_window: ChronoDuration::minutes(5),
            alpha0: 0.1,
            beta0: 0.9,
            burst_acceleration: false,
            stability_threshold_inclusive: false,
        }
    }
}

/// One routing lesson plus its observation/authority metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRecord {
    pub id: Uuid,
    pub text: String,
    pub category: LessonCategory,
    pub applies_when: String,
    pub source_weight: f64,
    pub origin_timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub observation_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub confidence: f64,
    pub model_version: String,
}

impl LessonRecord {
    pub fn new(
        text: impl Into<String>,
        category: LessonCategory,
        applies_when: impl Into<String>,
        source_weight: f64,
        model_version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            category,
            applies_when: applies_when.into(),
            source_weight,
            origin_timestamp: now,
            updated_at: now,
            observation_count: 0,
            success_count: 0,
            failure_count: 0,
            confidence: 0.1,
            model_version: model_version.into(),
        }
    }

    /// Recompute `confidence` from the Bayesian Beta posterior blended with
    /// the cold-start prior, per §4.F.
    pub fn recompute_confidence(&mut self, config: &PlaybookConfig) {
        let posterior = (config.alpha0 + self.success_count as f64)
            / (config.alpha0 + config.beta0 + self.observation_count as f64);
        let m = (self.observation_count as f64 / config.maturity as f64).min(1.0);
        let confidence = (1.0 - m) * 0.1 + m * posterior;
        self.confidence = confidence.clamp(0.01, 0.99);
    }

    /// Record an outcome: increments observation/success/failure counts and
    /// recomputes confidence. A success never decreases confidence, a
    /// failure never increases it, relative to the pre-update value — this
    /// holds because the Beta posterior mean moves monotonically with each
    /// additional success or failure at fixed `observation_count + 1`.
    pub fn record_outcome(&mut self, success: bool, config: &PlaybookConfig) {
        self.observation_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.updated_at = Utc::now();
        self.recompute_confidence(config);
        debug_assert_eq!(self.success_count + self.failure_count, self.observation_count);
    }

    /// `score = sourceWeight * confidence * exp(-age / HALF_LIFE)`.
    pub fn score(&self, config: &PlaybookConfig) -> f64 {
        let age = Utc::now() - self.updated_at;
        let age_ratio = age.num_milliseconds() as f64 / config.half_life.num_milliseconds() as f64;
        self.source_weight * self.confidence * (-age_ratio).exp()
    }

    fn key(&self) -> (LessonCategory, &str) {
        (self.category, self.applies_when.as_str())
    }

    pub fn same_key(&self, other: &LessonRecord) -> bool {
        self.key() == other.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_confidence_is_near_prior() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("use backend A for analyze", LessonCategory::Routing, "taskKind=analyze", 1.0, "v1");
        lesson.record_outcome(true, &config);
        assert_eq!(lesson.observation_count, 1);
        assert_eq!(lesson.success_count, 1);
        assert!(lesson.confidence < 0.2, "confidence={}", lesson.confidence);
    }

    #[test]
    fn ten_consecutive_successes_drive_confidence_high() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("x", LessonCategory::Routing, "y", 1.0, "v1");
        for _ in 0..10 {
            lesson.record_outcome(true, &config);
        }
        assert!(lesson.confidence > 0.85, "confidence={}", lesson.confidence);
    }

    #[test]
    fn mixed_outcomes_converge_near_half() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("x", LessonCategory::Routing, "y", 1.0, "v1");
        for _ in 0..5 {
            lesson.record_outcome(true, &config);
        }
        for _ in 0..5 {
            lesson.record_outcome(false, &config);
        }
        assert!((lesson.confidence - 0.5).abs() < 0.1, "confidence={}", lesson.confidence);
    }

    #[test]
    fn success_never_decreases_confidence() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("x", LessonCategory::Routing, "y", 1.0, "v1");
        for _ in 0..3 {
            lesson.record_outcome(true, &config);
        }
        let before = lesson.confidence;
        lesson.record_outcome(true, &config);
        assert!(lesson.confidence >= before);
    }

    #[test]
    fn failure_never_increases_confidence() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("x", LessonCategory::Routing, "y", 1.0, "v1");
        for _ in 0..3 {
            lesson.record_outcome(true, &config);
        }
        let before = lesson.confidence;
        lesson.record_outcome(false, &config);
        assert!(lesson.confidence <= before);
    }

    #[test]
    fn observation_count_equals_success_plus_failure() {
        let config = PlaybookConfig::default();
        let mut lesson = LessonRecord::new("x", LessonCategory::Routing, "y", 1.0, "v1");
        lesson.record_outcome(true, &config);
        lesson.record_outcome(false, &config);
        lesson.record_outcome(true, &config);
        assert_eq!(lesson.success_count + lesson.failure_count, lesson.observation_count);
    }
}
