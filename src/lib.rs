//! # relay-core
//!
//! A request router and orchestrator for heterogeneous language-model
//! backends: local llama.cpp/vLLM/Ollama-dialect servers alongside remote
//! cloud-style JSON APIs.
//!
//! ## Core components
//!
//! - **Backend Registry / Health Monitor / Model Discovery**: adapter
//!   handles, circuit breakers, and live capability probing.
//! - **Capacity Planner**: output-token budgets, timeouts, and overflow
//!   decisions per `(backend, inputChars, taskKind)`.
//! - **Workflow Mode Detector**: classifies the current local fleet into
//!   dual-iteration, single-reflection, pass-through, or cloud-fallback.
//! - **Playbook Store**: Bayesian-confidence routing lessons with
//!   source-weighted authority and stability dampening.
//! - **Background Analysis Queue**: priority ring buffer feeding delayed
//!   post-hoc reflection.
//! - **Router / Execution Loop**: builds the routing decision, invokes the
//!   backend, and drives truncation-aware retry and escalation.
//! - **Council**: parallel cross-backend deliberation with vote/debate/full
//!   synthesis modes.
//! - **`RelayCore`**: the facade composing all of the above behind five
//!   operations — `route`, `execute`, `record_outcome`, `council`, `health`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_core::{RelayCore, TaskContext};
//!
//! # async fn run(core: RelayCore) -> relay_core::Result<()> {
//! let task = TaskContext::new("Explain this function");
//! let (backend, options, ctx) = core.route(&task).await?;
//! println!("routed to {backend} with confidence {}", ctx.confidence);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod complexity;
pub mod council;
pub mod error;
pub mod execution;
pub mod facade;
pub mod planner;
pub mod playbook;
pub mod queue;
pub mod router;
pub mod workflow_mode;

pub use backend::{
    BackendAdapter, BackendDescriptor, BackendKey, BackendLocality, BackendRegistry,
    BreakerState, DiscoveredModelSnapshot, DiscoveryConfig, FinishReason, HealthConfig,
    HealthMonitor, HealthRecord, HttpAdapterConfig, HttpBackendAdapter, LocalServerAdapter,
    LocalServerDialect, ModelCapability, ModelDiscovery, ModelTier, Response, ResponseMetadata,
    RoleHint, ScanTarget, SendOptions, Usage,
};
pub use complexity::{Complexity, FilePattern, TaskClassifier, TaskKind};
pub use council::{
    Council, CouncilConfig, CouncilResponse, CouncilResult, ConfidenceLevel, SynthesisMode,
};
pub use error::{Error, Result};
pub use execution::{is_truncated, truncation, ExecutionLoop, ExecutionResult, RoutingOutcome, ToolProtocol};
pub use facade::{BackendHealthEntry, HealthReport, RelayCore};
pub use planner::{CapacityPlanner, OverflowDecision, PlanDecision, PlannerConfig, RemoteBackendSpec};
pub use playbook::{LessonCategory, LessonRecord, PlaybookConfig, PlaybookStore, SqlitePlaybookMirror, StoreOutcome};
pub use queue::{spawn_drainer, BackgroundQueue, EnqueueOutcome, PriorityClass, QueueConfig, QueueItem};
pub use router::{RouteSource, Router, RouterConfig, RoutingContext, RoutingHistory, StaticRouteTable, TaskContext};
pub use workflow_mode::{FleetSnapshot, ModeRoleMap, WorkflowMode, WorkflowModeDetector};
