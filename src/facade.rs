//! Composes the Router, Execution Loop, Background Queue, Playbook Store,
//! and Council behind the five operations a host exposes to callers:
//! `route`, `execute`, `recordOutcome`, `council`, and `health`.

use crate::backend::health::BreakerState;
use crate::backend::types::{BackendKey, SendOptions};
use crate::council::{Council, CouncilConfig, CouncilResult, ConfidenceLevel, SynthesisMode};
use crate::error::Result;
use crate::execution::{ExecutionLoop, ExecutionResult, RoutingOutcome, ToolProtocol};
use crate::queue::{BackgroundQueue, EnqueueOutcome, PriorityClass, QueueItem};
use crate::router::{RouteSource, Router, RoutingContext, TaskContext};
use crate::workflow_mode::WorkflowMode;
use tracing::{info, instrument, warn};

/// One backend's reachability as surfaced by `RelayCore::health`.
#[derive(Debug, Clone)]
pub struct BackendHealthEntry {
    pub backend: BackendKey,
    pub state: BreakerState,
    pub last_latency_ms: Option<u64>,
}

/// Aggregate fleet status returned by `RelayCore::health`.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub backends: Vec<BackendHealthEntry>,
    pub mode: WorkflowMode,
    pub queue_depth: usize,
    pub dead_letter_depth: usize,
    pub router_status: &'static str,
}

/// Top-level facade. Owns the Router and the Background Queue; the Council
/// is built on demand from the Router's registry and health monitor since
/// its candidate topics are call-specific, not session-wide state.
pub struct RelayCore {
    router: Router,
    queue: BackgroundQueue,
    council_config: CouncilConfig,
    fallback_chain: Vec<BackendKey>,
}

impl RelayCore {
    pub fn new(
        router: Router,
        queue: BackgroundQueue,
        council_config: CouncilConfig,
        fallback_chain: Vec<BackendKey>,
    ) -> Self {
        Self {
            router,
            queue,
            council_config,
            fallback_chain,
        }
    }

    /// Current workflow mode, recomputed from the live fleet snapshot rather
    /// than cached on the facade; the detector itself applies the 30s TTL.
    async fn current_mode(&self) -> WorkflowMode {
        self.router.mode_detector().detect_mode(&self.router.fleet_snapshot().await)
    }

    /// `route(taskContext) -> { backend, options, routingContext }`.
    #[instrument(skip(self, task), fields(file_count = task.file_count))]
    pub async fn route(&self, task: &TaskContext) -> Result<(BackendKey, SendOptions, RoutingContext)> {
        self.router.route(task).await
    }

    /// `execute(taskContext) -> { response, backendUsed, attempts, wasTruncated, routingContext }`.
    ///
    /// `sample_roll` is an externally supplied uniform `[0,1)` draw used only
    /// to gate routine-sample enqueueing; the core never generates its own
    /// randomness, matching the Background Queue's `enqueue` contract.
    #[instrument(skip(self, task), fields(protocol = ?protocol))]
    pub async fn execute(
        &self,
        task: &TaskContext,
        protocol: ToolProtocol,
        sample_roll: f64,
    ) -> Result<(ExecutionResult, RoutingOutcome)> {
        let mode = self.current_mode().await;
        let registry = self.router.registry();
        let exec = ExecutionLoop::new(&self.router, registry);
        let (result, outcome) = exec.execute(task, protocol, mode, &self.fallback_chain).await?;

        self.enqueue_for_analysis(
            &task.prompt,
            Some(&result.response.content),
            result.routing_context.clone(),
            &outcome,
            sample_roll,
        )
        .await;

        Ok((result, outcome))
    }

    /// `recordOutcome({success, outputLength, backend, modelId?, taskKind, processingTimeMs})`.
    ///
    /// Feeds the Router's learning recorder and queues the outcome for
    /// background reflection, for callers reporting an outcome observed
    /// outside the Execution Loop (e.g. a host re-running a prior request).
    pub async fn record_outcome(
        &self,
        outcome: RoutingOutcome,
        request: &str,
        response: Option<&str>,
        routing_context: RoutingContext,
        sample_roll: f64,
    ) -> EnqueueOutcome {
        self.router.record_outcome(outcome.task_kind, &outcome.backend, outcome.success);
        self.enqueue_for_analysis(request, response, routing_context, &outcome, sample_roll).await
    }

    async fn enqueue_for_analysis(
        &self,
        request: &str,
        response: Option<&str>,
        routing_context: RoutingContext,
        outcome: &RoutingOutcome,
        sample_roll: f64,
    ) -> EnqueueOutcome {
        let priority = if !outcome.success {
            PriorityClass::Failure
        } else if routing_context.route_source != RouteSource::Learned {
            PriorityClass::PlaybookMiss
        } else {
            PriorityClass::RoutineSample
        };

        let mut item = QueueItem::new(request, routing_context, priority);
        if let Some(response) = response {
            item = item.with_response(response);
        }
        self.queue.enqueue(item, sample_roll).await
    }

    /// `council({prompt, topic, confidence, numBackends?, maxTokens}) -> { backendsQueried, responses[], synthesisHint, processingTimeMs }`.
    pub async fn council(
        &self,
        prompt: &str,
        topic: &str,
        confidence: ConfidenceLevel,
        max_tokens: u32,
        mode: SynthesisMode,
    ) -> Result<CouncilResult> {
        let council = Council::new(self.council_config.clone(), self.router.registry(), self.router.health());
        let result = council.deliberate(prompt, topic, confidence, max_tokens, mode).await?;
        info!(backends = result.backends_queried.len(), topic, "council fan-out completed");
        Ok(result)
    }

    /// `health({checkType, forceRediscovery?}) -> { backends, mode, metrics, routerStatus }`.
    ///
    /// `check_type` is accepted for interface parity with the exposed
    /// contract but every check currently returns the same snapshot; a
    /// narrower `checkType` is a place for a host to add cheaper probes
    /// later without changing this signature.
    pub async fn health(&self, _check_type: &str, force_rediscovery: bool) -> HealthReport {
        if force_rediscovery {
            for target in self.router.discovery().scan_targets() {
                self.router.discovery().invalidate(target.port).await;
                if let Err(e) = self.router.discovery().refresh_from_router(target).await {
                    warn!(port = target.port, error = %e, "local-router model discovery probe failed");
                }
            }
        }

        let keys: Vec<BackendKey> = self.router.registry().keys().cloned().collect();
        let mut backends = Vec::with_capacity(keys.len());
        for key in &keys {
            let record = self.router.health().snapshot(key).await;
            backends.push(BackendHealthEntry {
                backend: key.clone(),
                state: record.as_ref().map(|r| r.state).unwrap_or(BreakerState::Healthy),
                last_latency_ms: record.and_then(|r| r.last_latency_ms),
            });
        }

        let any_open = backends.iter().any(|b| b.state == BreakerState::Open);
        let router_status = if any_open { "degraded" } else { "healthy" };

        HealthReport {
            backends,
            mode: self.current_mode().await,
            queue_depth: self.queue.len().await,
            dead_letter_depth: self.queue.dead_letter_len().await,
            router_status,
        }
    }
}
