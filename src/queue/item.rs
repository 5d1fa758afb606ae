//! Queue Item: one unit of deferred post-hoc analysis work.

use crate::router::RoutingContext;
use chrono::{DateTime, Utc};

/// Priority class assigned to a queue item at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Failure,
    PlaybookMiss,
    RoutineSample,
}

impl PriorityClass {
    pub const FAILURE_BASE: f64 = 3.0;
    pub const PLAYBOOK_MISS_BASE: f64 = 2.0;
    pub const ROUTINE_SAMPLE_BASE: f64 = 1.0;

    pub fn base(self) -> f64 {
        match self {
            Self::Failure => Self::FAILURE_BASE,
            Self::PlaybookMiss => Self::PLAYBOOK_MISS_BASE,
            Self::RoutineSample => Self::ROUTINE_SAMPLE_BASE,
        }
    }
}

/// One item awaiting background post-hoc analysis.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub request: String,
    pub response: Option<String>,
    pub routing_context: RoutingContext,
    pub priority_class: PriorityClass,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueueItem {
    pub fn new(request: impl Into<String>, routing_context: RoutingContext, priority_class: PriorityClass) -> Self {
        Self {
            request: request.into(),
            response: None,
            routing_context,
            priority_class,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// `base * max(0, 1 - age/ttl) - 0.5 * retryCount`.
    pub fn effective_priority(&self, ttl: chrono::Duration) -> f64 {
        let age = Utc::now() - self.timestamp;
        let age_ratio = age.num_milliseconds() as f64 / ttl.num_milliseconds().max(1) as f64;
        let decay = (1.0 - age_ratio).max(0.0);
        self.priority_class.base() * decay - 0.5 * self.retry_count as f64
    }

    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.timestamp > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::{Complexity, FilePattern, TaskKind};
    use crate::router::RouteSource;

    fn ctx() -> RoutingContext {
        RoutingContext {
            input_size: 10,
            task_kind: TaskKind::General,
            complexity: Complexity::Low,
            file_pattern: FilePattern::Single,
            forced_backend: None,
            selected_backend: None,
            route_source: RouteSource::Auto,
            confidence: 0.5,
            reasoning: String::new(),
        }
    }

    #[test]
    fn fresh_item_has_undiscounted_effective_priority() {
        let item = QueueItem::new("req", ctx(), PriorityClass::Failure);
        let priority = item.effective_priority(chrono::Duration::minutes(10));
        assert!((priority - 3.0).abs() < 0.05);
    }

    #[test]
    fn retries_reduce_effective_priority() {
        let mut item = QueueItem::new("req", ctx(), PriorityClass::Failure);
        item.retry_count = 2;
        let priority = item.effective_priority(chrono::Duration::minutes(10));
        assert!(priority < 3.0 - 0.9);
    }

    #[test]
    fn priority_base_values_match_documented_classes() {
        assert_eq!(PriorityClass::Failure.base(), 3.0);
        assert_eq!(PriorityClass::PlaybookMiss.base(), 2.0);
        assert_eq!(PriorityClass::RoutineSample.base(), 1.0);
    }
}
