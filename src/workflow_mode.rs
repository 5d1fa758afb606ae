//! Workflow Mode Detector: classifies the current local fleet into one of
//! {DUAL_ITERATIVE, SINGLE_REFLECTION, PASS_THROUGH, CLOUD_FALLBACK}.

use crate::backend::discovery::ModelTier;
use crate::backend::types::{BackendKey, RoleHint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// The current capability regime of the local fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    DualIterative,
    SingleReflection,
    PassThrough,
    CloudFallback,
}

/// Inputs the detector needs: which local backends are healthy, and at most
/// one "large" and one "small or coder" model tier observed among them.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub local_models_loaded: u32,
    pub single_local_healthy: bool,
    pub single_local_tier: Option<ModelTier>,
    pub multi_model_capable: bool,
}

/// Role → backend assignment and ordered fallback chain for the current mode.
#[derive(Debug, Clone, Default)]
pub struct ModeRoleMap {
    pub generator: Option<BackendKey>,
    pub reviewer: Option<BackendKey>,
    pub fixer: Option<BackendKey>,
    pub fallback_chain: Vec<BackendKey>,
}

struct CachedMode {
    mode: WorkflowMode,
    cached_at: Instant,
    multi_model_capable: bool,
}

/// Detects the workflow mode from the health set and the local
/// multi-model router's Model Discovery snapshot, with a 30s TTL cache
/// force-invalidated on a multi-model-capability transition.
pub struct WorkflowModeDetector {
    ttl: Duration,
    cached: Mutex<Option<CachedMode>>,
}

impl WorkflowModeDetector {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Evaluate the ordered rules, first match wins:
    /// 1. ≥2 loaded local models → DUAL_ITERATIVE
    /// 2. single healthy local, tier large (≥14B) → SINGLE_REFLECTION
    /// 3. single healthy local, tier small (<7B) → PASS_THROUGH
    /// 4. else → CLOUD_FALLBACK
    fn evaluate(snapshot: &FleetSnapshot) -> WorkflowMode {
        if snapshot.local_models_loaded >= 2 {
            WorkflowMode::DualIterative
        } else if snapshot.single_local_healthy && snapshot.single_local_tier == Some(ModelTier::Large) {
            WorkflowMode::SingleReflection
        } else if snapshot.single_local_healthy && snapshot.single_local_tier == Some(ModelTier::Small) {
            WorkflowMode::PassThrough
        } else {
            WorkflowMode::CloudFallback
        }
    }

    /// Detect the current mode, respecting the TTL cache unless a
    /// multi-model-capability transition forces invalidation.
    pub fn detect_mode(&self, snapshot: &FleetSnapshot) -> WorkflowMode {
        let mut cached = self.cached.lock().unwrap();

        if let Some(c) = cached.as_ref() {
            let transitioned = c.multi_model_capable != snapshot.multi_model_capable;
            if !transitioned && c.cached_at.elapsed() < self.ttl {
                return c.mode;
            }
            if transitioned {
                debug!("multi-model capability transitioned, invalidating workflow mode cache");
            }
        }

        let mode = Self::evaluate(snapshot);
        *cached = Some(CachedMode {
            mode,
            cached_at: Instant::now(),
            multi_model_capable: snapshot.multi_model_capable,
        });
        mode
    }

    /// Role map and fallback chain for a mode, given the candidate backends
    /// tagged by role hint.
    pub fn role_map(
        mode: WorkflowMode,
        local_backends: &[(BackendKey, Vec<RoleHint>)],
        cloud_backends: &[BackendKey],
    ) -> ModeRoleMap {
        let mut map = ModeRoleMap::default();

        let find_role = |role: RoleHint| {
            local_backends
                .iter()
                .find(|(_, roles)| roles.contains(&role))
                .map(|(k, _)| k.clone())
        };

        match mode {
            WorkflowMode::DualIterative => {
                map.generator = find_role(RoleHint::Generator);
                map.reviewer = find_role(RoleHint::Reviewer);
                map.fixer = map.reviewer.clone();
                map.fallback_chain = cloud_backends.to_vec();
            }
            WorkflowMode::SingleReflection => {
                map.generator = find_role(RoleHint::Generator);
                map.reviewer = map.generator.clone();
                map.fallback_chain = cloud_backends.to_vec();
            }
            WorkflowMode::PassThrough => {
                map.generator = find_role(RoleHint::Generator);
                map.fallback_chain = cloud_backends.to_vec();
            }
            WorkflowMode::CloudFallback => {
                map.generator = cloud_backends.first().cloned();
                map.fallback_chain = cloud_backends.to_vec();
            }
        }

        map
    }
}
