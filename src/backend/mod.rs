//! Backend Registry, Health Monitor, and Model Discovery.
//!
//! These three components sit at the bottom of the dependency order: the
//! Capacity Planner, Router, and Execution Loop all read from them, but none
//! of them depend on anything above.

pub mod adapters;
pub mod discovery;
pub mod health;
pub mod registry;
pub mod types;

pub use adapters::{HttpAdapterConfig, HttpBackendAdapter, LocalServerAdapter, LocalServerDialect};
pub use discovery::{DiscoveredModelSnapshot, DiscoveryConfig, ModelCapability, ModelDiscovery, ModelTier, ScanTarget};
pub use health::{BreakerState, HealthConfig, HealthMonitor, HealthRecord};
pub use registry::{BackendAdapter, BackendRegistry};
pub use types::{
    BackendDescriptor, BackendKey, BackendLocality, FinishReason, Response, ResponseMetadata,
    RoleHint, SendOptions, Usage,
};

#[cfg(test)]
pub use adapters::MockAdapter;
