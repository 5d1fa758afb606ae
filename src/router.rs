//! Router: builds the Routing Context and selects a backend, options, and
//! rationale for a single request.

use crate::backend::discovery::{DiscoveredModelSnapshot, ModelDiscovery};
use crate::backend::health::HealthMonitor;
use crate::backend::registry::BackendRegistry;
use crate::backend::types::{BackendKey, BackendLocality, SendOptions};
use crate::complexity::{Complexity, FilePattern, TaskClassifier, TaskKind};
use crate::error::{Error, Result};
use crate::planner::{CapacityPlanner, OverflowDecision, RemoteBackendSpec};
use crate::playbook::store::PlaybookStore;
use crate::workflow_mode::{FleetSnapshot, WorkflowMode, WorkflowModeDetector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Why the Router chose the backend it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Forced,
    Auto,
    Rule,
    Learned,
    Fallback,
}

/// The per-request record of what the Router decided and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub input_size: usize,
    pub task_kind: TaskKind,
    pub complexity: Complexity,
    pub file_pattern: FilePattern,
    pub forced_backend: Option<BackendKey>,
    pub selected_backend: Option<BackendKey>,
    pub route_source: RouteSource,
    pub confidence: f64,
    pub reasoning: String,
    pub workflow_mode: WorkflowMode,
}

impl RoutingContext {
    fn new(input_size: usize, task_kind: TaskKind, complexity: Complexity, file_pattern: FilePattern) -> Self {
        Self {
            input_size,
            task_kind,
            complexity,
            file_pattern,
            forced_backend: None,
            selected_backend: None,
            route_source: RouteSource::Auto,
            confidence: 0.0,
            reasoning: String::new(),
            workflow_mode: WorkflowMode::CloudFallback,
        }
    }
}

/// A request as seen by the Router: a prompt, optional file count, and an
/// optional forced backend that bypasses learned routing.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub prompt: String,
    pub file_count: usize,
    pub forced_backend: Option<BackendKey>,
    pub generation_mode: bool,
}

impl TaskContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            file_count: 1,
            forced_backend: None,
            generation_mode: false,
        }
    }

    pub fn with_file_count(mut self, count: usize) -> Self {
        self.file_count = count;
        self
    }

    pub fn with_forced_backend(mut self, key: BackendKey) -> Self {
        self.forced_backend = Some(key);
        self
    }

    pub fn with_generation_mode(mut self, generation: bool) -> Self {
        self.generation_mode = generation;
        self
    }
}

/// Static `(taskKind, complexity, filePattern) -> backend` fallback table,
/// consulted when the Playbook has no applicable lesson.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteTable {
    rules: HashMap<(TaskKind, Complexity, FilePattern), BackendKey>,
}

impl StaticRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, kind: TaskKind, complexity: Complexity, pattern: FilePattern, backend: BackendKey) -> Self {
        self.rules.insert((kind, complexity, pattern), backend);
        self
    }

    fn lookup(&self, kind: TaskKind, complexity: Complexity, pattern: FilePattern) -> Option<&BackendKey> {
        self.rules.get(&(kind, complexity, pattern))
    }
}

/// Historical outcome counters the Router uses to compute a learned
/// confidence for a backend, keyed by `(taskKind, backend)`.
#[derive(Debug, Clone, Default)]
pub struct RoutingHistory {
    counters: HashMap<(TaskKind, BackendKey), (u32, u32)>,
}

impl RoutingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: TaskKind, backend: &BackendKey, success: bool) {
        let entry = self.counters.entry((kind, backend.clone())).or_insert((0, 0));
        if success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    /// Backend with the best success ratio for this task kind among
    /// `candidates`, and its confidence. `None` if there's no history.
    fn best_for(&self, kind: TaskKind, candidates: &[BackendKey]) -> Option<(BackendKey, f64)> {
        candidates
            .iter()
            .filter_map(|backend| {
                self.counters
                    .get(&(kind, backend.clone()))
                    .map(|(s, f)| (backend.clone(), *s as f64 / (*s + *f).max(1) as f64))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }
}

/// Configuration bundling the Router's policy knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub learned_confidence_base: f64,
    pub playbook_top_k: usize,
    pub forbidden_backends: Vec<BackendKey>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            learned_confidence_base: 0.6,
            playbook_top_k: 3,
            forbidden_backends: Vec::new(),
        }
    }
}

/// Composes the Health Monitor, Model Discovery, Capacity Planner, Workflow
/// Mode Detector, and Playbook Store to produce a routing decision per
/// request. Idempotent: same state in, same decision out.
pub struct Router {
    config: RouterConfig,
    registry: BackendRegistry,
    health: HealthMonitor,
    discovery: ModelDiscovery,
    planner: CapacityPlanner,
    mode_detector: WorkflowModeDetector,
    playbook: PlaybookStore,
    route_table: StaticRouteTable,
    remote_specs: HashMap<BackendKey, RemoteBackendSpec>,
    history: Mutex<RoutingHistory>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: BackendRegistry,
        health: HealthMonitor,
        discovery: ModelDiscovery,
        planner: CapacityPlanner,
        mode_detector: WorkflowModeDetector,
        playbook: PlaybookStore,
        route_table: StaticRouteTable,
        remote_specs: HashMap<BackendKey, RemoteBackendSpec>,
    ) -> Self {
        Self {
            config,
            registry,
            health,
            discovery,
            planner,
            mode_detector,
            playbook,
            route_table,
            remote_specs,
            history: Mutex::new(RoutingHistory::new()),
        }
    }

    /// Feed a routing outcome back into the learned-confidence history, used
    /// by the Execution Loop once a request completes.
    pub fn record_outcome(&self, kind: TaskKind, backend: &BackendKey, success: bool) {
        self.history.lock().unwrap().record(kind, backend, success);
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn playbook(&self) -> &PlaybookStore {
        &self.playbook
    }

    pub fn discovery(&self) -> &ModelDiscovery {
        &self.discovery
    }

    pub fn mode_detector(&self) -> &WorkflowModeDetector {
        &self.mode_detector
    }

    /// Build the Workflow Mode Detector's input from the registry's local
    /// backends, the Health Monitor's alive set, and Model Discovery's
    /// cached live readings.
    pub async fn fleet_snapshot(&self) -> FleetSnapshot {
        let local_keys: Vec<BackendKey> = self
            .registry
            .iterate()
            .filter(|d| d.locality == BackendLocality::Local)
            .map(|d| d.key.clone())
            .collect();
        let alive = self.health.alive_set(&local_keys).await;

        let mut total_loaded = 0u32;
        let mut healthy_snapshots: Vec<DiscoveredModelSnapshot> = Vec::new();

        for key in &alive {
            let Some(port) = self.registry.descriptor(key).and_then(|d| d.scan_port) else {
                continue;
            };
            if let Some(snapshot) = self.discovery.cached(port).await {
                let loaded_here = self.discovery.loaded_count(port).await.max(1);
                total_loaded += loaded_here;
                healthy_snapshots.push(snapshot);
            }
        }

        let single_local_healthy = healthy_snapshots.len() == 1;
        let single_local_tier = single_local_healthy.then(|| healthy_snapshots[0].tier());

        FleetSnapshot {
            local_models_loaded: total_loaded,
            single_local_healthy,
            single_local_tier,
            multi_model_capable: total_loaded >= 2,
        }
    }

    /// Run the 6-step routing algorithm for one request.
    pub async fn route(&self, task: &TaskContext) -> Result<(BackendKey, SendOptions, RoutingContext)> {
        let input_size = task.prompt.chars().count();
        let task_kind = TaskClassifier::classify_kind(&task.prompt);
        let complexity = TaskClassifier::classify_complexity(&task.prompt, input_size);
        let file_pattern = TaskClassifier::classify_file_pattern(task.file_count);

        let mut ctx = RoutingContext::new(input_size, task_kind, complexity, file_pattern);
        ctx.forced_backend = task.forced_backend.clone();

        ctx.workflow_mode = self.mode_detector.detect_mode(&self.fleet_snapshot().await);

        let mut backend = if let Some(forced) = &task.forced_backend {
            if self.config.forbidden_backends.contains(forced) || self.registry.get(forced).is_none() {
                return Err(Error::policy_rejection(forced.to_string()));
            }
            ctx.route_source = RouteSource::Forced;
            ctx.confidence = 1.0;
            ctx.reasoning = "backend forced by caller".to_string();
            forced.clone()
        } else {
            let candidates: Vec<BackendKey> = self.registry.keys().cloned().collect();
            let alive = self.health.alive_set(&candidates).await;

            let (_decorated, applied) = self.playbook.enhance_routing("", self.config.playbook_top_k);

            if let Some((best, ratio)) = self.history_best(task_kind, &alive) {
                ctx.route_source = RouteSource::Learned;
                ctx.confidence = ratio;
                ctx.reasoning = format!("{applied} applicable lessons; learned best backend for {task_kind}");
                best
            } else if let Some(rule_backend) = self.route_table.lookup(task_kind, complexity, file_pattern) {
                ctx.route_source = RouteSource::Rule;
                ctx.confidence = self.config.learned_confidence_base;
                ctx.reasoning = format!("static rule match for ({task_kind}, {complexity:?}, {file_pattern:?})");
                rule_backend.clone()
            } else if let Some(first_alive) = alive.first() {
                ctx.route_source = RouteSource::Fallback;
                ctx.confidence = self.config.learned_confidence_base;
                ctx.reasoning = "no rule or lesson matched; falling back to first alive backend".to_string();
                first_alive.clone()
            } else {
                return Err(Error::breaker_open("<all backends>"));
            }
        };

        let (descriptor, _adapter) = self
            .registry
            .get(&backend)
            .ok_or_else(|| Error::policy_rejection(backend.to_string()))?;

        let plan = match descriptor.locality {
            BackendLocality::Local => {
                let snapshot = match descriptor.scan_port {
                    Some(port) => self
                        .discovery
                        .cached(port)
                        .await
                        .unwrap_or_else(|| fallback_local_snapshot(descriptor.context_chars)),
                    None => fallback_local_snapshot(descriptor.context_chars),
                };
                self.planner.plan_local(&snapshot, input_size, task.generation_mode)
            }
            BackendLocality::Remote => {
                let spec = self.remote_specs.get(&backend).cloned().unwrap_or(RemoteBackendSpec {
                    context_chars: descriptor.context_chars,
                    tokens_per_second: descriptor.tokens_per_second,
                });
                self.planner.plan_remote(&spec, input_size, task_kind, task.generation_mode)
            }
        };

        let plan = match plan {
            Ok(plan) => plan,
            Err(Error::CapacityOverflow { .. }) if descriptor.locality == BackendLocality::Local => {
                // Step 5: overflow recommends escalation; retry on a remote candidate.
                if let Some(remote) = self.first_remote_alive().await {
                    backend = remote;
                    ctx.reasoning.push_str("; escalated to cloud on overflow");
                    let spec = self.remote_specs.get(&backend).cloned().ok_or_else(|| {
                        Error::config(format!("no remote spec registered for {backend}"))
                    })?;
                    self.planner.plan_remote(&spec, input_size, task_kind, task.generation_mode)?
                } else {
                    return Err(Error::capacity_overflow(input_size, backend.to_string(), descriptor.context_chars));
                }
            }
            Err(e) => return Err(e),
        };

        ctx.selected_backend = Some(backend.clone());
        let options = SendOptions::new(plan.max_output_tokens, plan.request_timeout_ms);

        Ok((backend, options, ctx))
    }

    fn history_best(&self, kind: TaskKind, alive: &[BackendKey]) -> Option<(BackendKey, f64)> {
        self.history.lock().unwrap().best_for(kind, alive)
    }

    async fn first_remote_alive(&self) -> Option<BackendKey> {
        for key in self.registry.keys() {
            if let Some(desc) = self.registry.descriptor(key) {
                if desc.locality == BackendLocality::Remote && !self.health.is_open(key).await {
                    return Some(key.clone());
                }
            }
        }
        None
    }
}

fn fallback_local_snapshot(context_chars: usize) -> DiscoveredModelSnapshot {
    DiscoveredModelSnapshot {
        model_id: "unknown-local".to_string(),
        n_params_billions: 8.0,
        n_ctx_train: context_chars / 4,
        n_ctx_current: context_chars / 4,
        parallel_slots: 1,
        server_dialect: "llama.cpp".to_string(),
        capabilities: Vec::new(),
        is_orchestrator: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::adapters::MockAdapter;
    use crate::backend::discovery::DiscoveryConfig;
    use crate::backend::health::HealthConfig;
    use crate::backend::types::{BackendDescriptor, BackendLocality, FinishReason};
    use crate::planner::PlannerConfig;
    use crate::playbook::PlaybookConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_router(forbid: Vec<BackendKey>) -> Router {
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendDescriptor::new("local-a", "Local A", BackendLocality::Local).with_context_chars(32_000),
            Arc::new(MockAdapter::new("ok", FinishReason::Stop)),
        );
        registry.register(
            BackendDescriptor::new("cloud-a", "Cloud A", BackendLocality::Remote).with_context_chars(200_000),
            Arc::new(MockAdapter::new("ok", FinishReason::Stop)),
        );

        Router::new(
            RouterConfig {
                forbidden_backends: forbid,
                ..RouterConfig::default()
            },
            registry,
            HealthMonitor::new(HealthConfig::default()),
            ModelDiscovery::new(DiscoveryConfig::default()),
            CapacityPlanner::new(PlannerConfig::default()),
            WorkflowModeDetector::new(Duration::from_secs(30)),
            PlaybookStore::new(PlaybookConfig::default()),
            StaticRouteTable::new(),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn forced_backend_short_circuits_with_full_confidence() {
        let router = make_router(vec![]);
        let task = TaskContext::new("hello").with_forced_backend(BackendKey::new("local-a"));
        let (backend, _opts, ctx) = router.route(&task).await.unwrap();
        assert_eq!(backend, BackendKey::new("local-a"));
        assert_eq!(ctx.route_source, RouteSource::Forced);
        assert_eq!(ctx.confidence, 1.0);
    }

    #[tokio::test]
    async fn forbidden_forced_backend_is_rejected() {
        let router = make_router(vec![BackendKey::new("local-a")]);
        let task = TaskContext::new("hello").with_forced_backend(BackendKey::new("local-a"));
        let err = router.route(&task).await.unwrap_err();
        assert!(matches!(err, Error::PolicyRejection { .. }));
    }

    #[tokio::test]
    async fn unforced_request_falls_back_to_an_alive_backend() {
        let router = make_router(vec![]);
        let task = TaskContext::new("What is a closure?");
        let (backend, _opts, ctx) = router.route(&task).await.unwrap();
        assert!(backend == BackendKey::new("local-a") || backend == BackendKey::new("cloud-a"));
        assert_ne!(ctx.route_source, RouteSource::Forced);
    }

    #[tokio::test]
    async fn routing_is_idempotent_given_the_same_state() {
        let router = make_router(vec![]);
        let task = TaskContext::new("Explain this function").with_forced_backend(BackendKey::new("local-a"));
        let (b1, o1, _c1) = router.route(&task).await.unwrap();
        let (b2, o2, _c2) = router.route(&task).await.unwrap();
        assert_eq!(b1, b2);
        assert_eq!(o1.max_tokens, o2.max_tokens);
        assert_eq!(o1.timeout_ms, o2.timeout_ms);
    }

    fn make_router_with_scan_port(port: u16) -> Router {
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendDescriptor::new("local-a", "Local A", BackendLocality::Local)
                .with_context_chars(32_000)
                .with_scan_port(port),
            Arc::new(MockAdapter::new("ok", FinishReason::Stop)),
        );

        Router::new(
            RouterConfig::default(),
            registry,
            HealthMonitor::new(HealthConfig::default()),
            ModelDiscovery::new(DiscoveryConfig::default()),
            CapacityPlanner::new(PlannerConfig::default()),
            WorkflowModeDetector::new(Duration::from_secs(30)),
            PlaybookStore::new(PlaybookConfig::default()),
            StaticRouteTable::new(),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn local_plan_uses_the_descriptor_scan_port_cache_entry_over_the_fallback() {
        let router = make_router_with_scan_port(9001);
        router
            .discovery
            .store(
                9001,
                DiscoveredModelSnapshot {
                    model_id: "qwen2.5-coder-32b".to_string(),
                    n_params_billions: 32.0,
                    n_ctx_train: 65_000,
                    n_ctx_current: 65_000,
                    parallel_slots: 4,
                    server_dialect: "llama.cpp".to_string(),
                    capabilities: Vec::new(),
                    is_orchestrator: false,
                },
            )
            .await;

        let task = TaskContext::new("hello").with_forced_backend(BackendKey::new("local-a"));
        let (_backend, _opts, ctx) = router.route(&task).await.unwrap();

        // A single healthy local backend whose cached snapshot is a large
        // tier yields single-reflection, not the cloud-fallback default that
        // an unpopulated cache (and the old hardcoded port-0 lookup) produced.
        assert_eq!(ctx.workflow_mode, WorkflowMode::SingleReflection);
    }

    #[tokio::test]
    async fn local_plan_falls_back_when_descriptor_has_no_scan_port() {
        let router = make_router(vec![]);
        let task = TaskContext::new("hello").with_forced_backend(BackendKey::new("local-a"));
        let (_backend, _opts, ctx) = router.route(&task).await.unwrap();
        assert_eq!(ctx.workflow_mode, WorkflowMode::CloudFallback);
    }
}
