//! Background Analysis Queue: a priority, capacity-bounded, TTL-aware ring
//! buffer draining only during idle periods.

use crate::queue::item::{PriorityClass, QueueItem};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tunables enumerated in §6's environment/configuration list.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_capacity: usize,
    pub sample_rate: f64,
    pub item_ttl: ChronoDuration,
    pub max_items_per_wake: usize,
    pub idle_threshold: ChronoDuration,
    pub max_retries: u32,
    pub dead_letter_max: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            sample_rate: 0.02,
            item_ttl: ChronoDuration::milliseconds(600_000),
            max_items_per_wake: 5,
            idle_threshold: ChronoDuration::milliseconds(60_000),
            max_retries: 3,
            dead_letter_max: 20,
        }
    }
}

/// Outcome of an attempted enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A routine sample was dropped by the sampler (below `sample_rate`).
    SampledOut,
}

struct Inner {
    items: VecDeque<QueueItem>,
    dead_letter: VecDeque<QueueItem>,
    last_activity: DateTime<Utc>,
}

/// Multi-writer, single-drainer priority queue. Guarded by a single
/// `Arc<Mutex<_>>`; the drainer runs as one long-lived `tokio::task`.
pub struct BackgroundQueue {
    config: QueueConfig,
    inner: Arc<Mutex<Inner>>,
    expired_count: AtomicU64,
    poison_count: AtomicU64,
}

impl BackgroundQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                dead_letter: VecDeque::new(),
                last_activity: Utc::now(),
            })),
            expired_count: AtomicU64::new(0),
            poison_count: AtomicU64::new(0),
        }
    }

    /// Enqueue an item. Failures and playbook misses are always enqueued;
    /// routine samples pass through the `sample_rate` gate. `roll` is an
    /// externally supplied uniform [0,1) draw so callers control randomness.
    pub async fn enqueue(&self, item: QueueItem, roll: f64) -> EnqueueOutcome {
        if item.priority_class == PriorityClass::RoutineSample && roll >= self.config.sample_rate {
            return EnqueueOutcome::SampledOut;
        }

        let mut inner = self.inner.lock().await;
        inner.last_activity = Utc::now();

        if item.priority_class == PriorityClass::Failure {
            // Insert at the head before resorting (head-of-line discipline).
            inner.items.push_front(item);
        } else {
            inner.items.push_back(item);
        }

        self.resort(&mut inner);
        self.enforce_capacity(&mut inner);
        EnqueueOutcome::Enqueued
    }

    fn resort(&self, inner: &mut Inner) {
        let ttl = self.config.item_ttl;
        let mut items: Vec<QueueItem> = inner.items.drain(..).collect();
        items.sort_by(|a, b| {
            b.effective_priority(ttl)
                .partial_cmp(&a.effective_priority(ttl))
                .unwrap()
                .then(a.timestamp.cmp(&b.timestamp))
        });
        inner.items = items.into();
    }

    fn enforce_capacity(&self, inner: &mut Inner) {
        let ttl = self.config.item_ttl;
        while inner.items.len() > self.config.queue_capacity {
            // Lowest score, oldest among ties, sits at the back after `resort`.
            let worst_idx = inner
                .items
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.effective_priority(ttl)
                        .partial_cmp(&b.effective_priority(ttl))
                        .unwrap()
                        .then(b.timestamp.cmp(&a.timestamp))
                })
                .map(|(i, _)| i);
            if let Some(i) = worst_idx {
                inner.items.remove(i);
                warn!("background queue over capacity, evicted lowest-score item");
            } else {
                break;
            }
        }
    }

    /// Seconds since the last enqueue or externally observed request start.
    pub async fn idle_for(&self) -> ChronoDuration {
        Utc::now() - self.inner.lock().await.last_activity
    }

    pub async fn touch_activity(&self) {
        self.inner.lock().await.last_activity = Utc::now();
    }

    /// Drain up to `max_items_per_wake` items if idle for `idle_threshold`,
    /// skipping (and counting) expired ones.
    pub async fn drain_if_idle(&self) -> Vec<QueueItem> {
        let mut inner = self.inner.lock().await;
        if Utc::now() - inner.last_activity < self.config.idle_threshold {
            return Vec::new();
        }

        let mut drained = Vec::new();
        while drained.len() < self.config.max_items_per_wake {
            let Some(item) = inner.items.pop_front() else {
                break;
            };
            if item.is_expired(self.config.item_ttl) {
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                debug!("expired background queue item skipped on drain");
                continue;
            }
            drained.push(item);
        }
        drained
    }

    /// Re-enqueue a failed analysis item with `retry_count` incremented, or
    /// move it to the bounded dead-letter queue past `max_retries`.
    pub async fn record_analysis_failure(&self, mut item: QueueItem) {
        item.retry_count += 1;
        if item.retry_count > self.config.max_retries {
            let mut inner = self.inner.lock().await;
            if inner.dead_letter.len() >= self.config.dead_letter_max {
                inner.dead_letter.pop_front();
            }
            inner.dead_letter.push_back(item);
            self.poison_count.fetch_add(1, Ordering::Relaxed);
            warn!("background queue item exceeded max retries, moved to dead letter");
        } else {
            let mut inner = self.inner.lock().await;
            inner.items.push_back(item);
            self.resort(&mut inner);
        }
    }

    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    pub fn poison_count(&self) -> u64 {
        self.poison_count.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn dead_letter_len(&self) -> usize {
        self.inner.lock().await.dead_letter.len()
    }
}

/// Spawn the single long-lived drainer task, woken on a periodic interval,
/// invoking `on_drain` with whatever items were yielded this wake.
pub fn spawn_drainer<F, Fut>(queue: Arc<BackgroundQueue>, wake_interval: Duration, on_drain: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(Vec<QueueItem>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(wake_interval);
        loop {
            ticker.tick().await;
            let drained = queue.drain_if_idle().await;
            if !drained.is_empty() {
                on_drain(drained).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::{Complexity, FilePattern, TaskKind};
    use crate::router::RouteSource;
    use crate::router::RoutingContext;

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

    #[tokio::test]
    async fn failures_and_misses_always_enqueue_samples_are_gated() {
        let queue = BackgroundQueue::new(QueueConfig::default());
        let failure = QueueItem::new("req", ctx(), PriorityClass::Failure);
        assert_eq!(queue.enqueue(failure, 0.99).await, EnqueueOutcome::Enqueued);

        let sample = QueueItem::new("req", ctx(), PriorityClass::RoutineSample);
        assert_eq!(queue.enqueue(sample, 0.5).await, EnqueueOutcome::SampledOut);

        let sample2 = QueueItem::new("req", ctx(), PriorityClass::RoutineSample);
        assert_eq!(queue.enqueue(sample2, 0.001).await, EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn drain_yields_items_in_non_increasing_priority_order() {
        let queue = BackgroundQueue::new(QueueConfig {
            idle_threshold: ChronoDuration::milliseconds(0),
            ..QueueConfig::default()
        });

        for _ in 0..2 {
            queue.enqueue(QueueItem::new("sample", ctx(), PriorityClass::RoutineSample), 0.0).await;
        }
        queue.enqueue(QueueItem::new("miss", ctx(), PriorityClass::PlaybookMiss), 0.0).await;
        for _ in 0..2 {
            queue.enqueue(QueueItem::new("fail", ctx(), PriorityClass::Failure), 0.0).await;
        }

        let drained = queue.drain_if_idle().await;
        assert_eq!(drained.len(), 5);
        for pair in drained.windows(2) {
            let p0 = pair[0].effective_priority(ChronoDuration::milliseconds(600_000));
            let p1 = pair[1].effective_priority(ChronoDuration::milliseconds(600_000));
            assert!(p0 >= p1 - 1e-9);
        }
        assert_eq!(drained[0].priority_class, PriorityClass::Failure);
        assert_eq!(drained[1].priority_class, PriorityClass::Failure);
    }

    #[tokio::test]
    async fn drain_respects_max_items_per_wake_and_leaves_remainder() {
        let queue = BackgroundQueue::new(QueueConfig {
            idle_threshold: ChronoDuration::milliseconds(0),
            max_items_per_wake: 5,
            ..QueueConfig::default()
        });

        for _ in 0..2 {
            queue.enqueue(QueueItem::new("sample", ctx(), PriorityClass::RoutineSample), 0.0).await;
        }
        queue.enqueue(QueueItem::new("miss", ctx(), PriorityClass::PlaybookMiss), 0.0).await;
        for _ in 0..2 {
            queue.enqueue(QueueItem::new("fail", ctx(), PriorityClass::Failure), 0.0).await;
        }
        queue.enqueue(QueueItem::new("sample-extra", ctx(), PriorityClass::RoutineSample), 0.0).await;

        let drained = queue.drain_if_idle().await;
        assert_eq!(drained.len(), 5);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn does_not_drain_while_active() {
        let queue = BackgroundQueue::new(QueueConfig::default());
        queue.enqueue(QueueItem::new("fail", ctx(), PriorityClass::Failure), 0.0).await;
        let drained = queue.drain_if_idle().await;
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn exceeding_max_retries_moves_item_to_dead_letter() {
        let queue = BackgroundQueue::new(QueueConfig {
            max_retries: 1,
            ..QueueConfig::default()
        });
        let mut item = QueueItem::new("fail", ctx(), PriorityClass::Failure);
        item.retry_count = 1;
        queue.record_analysis_failure(item).await;
        assert_eq!(queue.dead_letter_len().await, 1);
        assert_eq!(queue.poison_count(), 1);
    }

    #[tokio::test]
    async fn over_capacity_evicts_lowest_score_item() {
        let queue = BackgroundQueue::new(QueueConfig {
            queue_capacity: 2,
            idle_threshold: ChronoDuration::milliseconds(0),
            ..QueueConfig::default()
        });
        queue.enqueue(QueueItem::new("fail", ctx(), PriorityClass::Failure), 0.0).await;
        queue.enqueue(QueueItem::new("miss", ctx(), PriorityClass::PlaybookMiss), 0.0).await;
        queue.enqueue(QueueItem::new("fail2", ctx(), PriorityClass::Failure), 0.0).await;
        assert_eq!(queue.len().await, 2);
    }
}
