//! Capacity Planner: maps (backend, input size, task kind) to an output
//! token budget, request timeout, and overflow decision.

use crate::backend::discovery::DiscoveredModelSnapshot;
use crate::backend::types::BackendLocality;
use crate::complexity::TaskKind;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Static per-remote-backend capacity description, trimmed from the
/// teacher's `ModelSpec` to exactly what the planner needs.
#[derive(Debug, Clone)]
pub struct RemoteBackendSpec {
    pub context_chars: usize,
    pub tokens_per_second: f64,
}

/// Tunables enumerated in the environment/configuration table.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub safety_buffer_chars: usize,
    pub local_min_timeout_ms: u64,
    pub local_max_timeout_ms: u64,
    pub remote_min_timeout_ms: u64,
    pub remote_max_timeout_ms: u64,
    pub timeout_headroom_ms: u64,
    pub local_output_floor: u32,
    pub local_output_ceiling: u32,
    pub local_output_ceiling_generation: u32,
    pub local_slot_share: f64,
    pub remote_caps: HashMap<TaskKind, (u32, u32)>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let mut remote_caps = HashMap::new();
        remote_caps.insert(TaskKind::Simple, (800, 1500));
        remote_caps.insert(TaskKind::General, (1500, 3000));
        remote_caps.insert(TaskKind::Refactor, (1500, 3000));
        remote_caps.insert(TaskKind::Security, (2000, 5000));
        remote_caps.insert(TaskKind::Analysis, (2000, 5000));
        remote_caps.insert(TaskKind::Code, (1500, 3000));

        Self {
            safety_buffer_chars: 4000,
            local_min_timeout_ms: 120_000,
            local_max_timeout_ms: 300_000,
            remote_min_timeout_ms: 60_000,
            remote_max_timeout_ms: 120_000,
            timeout_headroom_ms: 5_000,
            local_output_floor: 1000,
            local_output_ceiling: 8000,
            local_output_ceiling_generation: 16_000,
            local_slot_share: 0.35,
            remote_caps,
        }
    }
}

/// What the planner recommends when input exceeds capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowDecision {
    /// Input fits within the safety margin.
    Fits,
    /// Recommend escalating from local to a cloud backend.
    EscalateToCloud,
    /// Already on the largest-context cloud backend; caller must split or reject.
    SplitOrReject,
}

/// The planner's output for one routing decision.
#[derive(Debug, Clone)]
pub struct PlanDecision {
    pub max_output_tokens: u32,
    pub request_timeout_ms: u64,
    pub overflow: OverflowDecision,
}

/// Maps `(backend, inputChars, taskKind)` to a token budget, timeout, and
/// overflow decision.
pub struct CapacityPlanner {
    config: PlannerConfig,
}

impl CapacityPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan for a local backend using its live Discovered Model Snapshot.
    /// Local discovery must never be bypassed in favour of a baked-in constant.
    pub fn plan_local(
        &self,
        snapshot: &DiscoveredModelSnapshot,
        input_chars: usize,
        generation_mode: bool,
    ) -> Result<PlanDecision> {
        let context_tokens = snapshot.n_ctx_current;
        let slots = snapshot.parallel_slots.max(1);
        let tokens_per_slot = context_tokens / slots as usize;
        let reserved = (tokens_per_slot as f64 * self.config.local_slot_share) as u32;

        let ceiling = if generation_mode {
            self.config.local_output_ceiling_generation
        } else {
            self.config.local_output_ceiling
        };
        let mut max_output_tokens = reserved.clamp(self.config.local_output_floor, ceiling);

        let context_chars = context_tokens * 4;
        let (max_output_tokens, overflow) =
            self.apply_safety_buffer(input_chars, max_output_tokens, context_chars);

        if overflow == OverflowDecision::SplitOrReject {
            return Err(Error::capacity_overflow(input_chars, "local", context_chars));
        }

        let timeout_ms = self.compute_timeout(
            max_output_tokens,
            40.0,
            self.config.local_min_timeout_ms,
            self.config.local_max_timeout_ms,
        );

        Ok(PlanDecision {
            max_output_tokens,
            request_timeout_ms: timeout_ms,
            overflow,
        })
    }

    /// Plan for a remote backend using its static capability table.
    pub fn plan_remote(
        &self,
        spec: &RemoteBackendSpec,
        input_chars: usize,
        task_kind: TaskKind,
        generation_mode: bool,
    ) -> Result<PlanDecision> {
        let (lo, hi) = self
            .config
            .remote_caps
            .get(&task_kind)
            .copied()
            .unwrap_or((1500, 3000));
        let base = if generation_mode { 16_000 } else { hi };
        let mut max_output_tokens = base.max(lo);

        let (max_output_tokens, overflow) =
            self.apply_safety_buffer(input_chars, max_output_tokens, spec.context_chars);

        if overflow == OverflowDecision::SplitOrReject {
            return Err(Error::capacity_overflow(
                input_chars,
                "remote",
                spec.context_chars,
            ));
        }

        let timeout_ms = self.compute_timeout(
            max_output_tokens,
            spec.tokens_per_second,
            self.config.remote_min_timeout_ms,
            self.config.remote_max_timeout_ms,
        );

        Ok(PlanDecision {
            max_output_tokens,
            request_timeout_ms: timeout_ms,
            overflow,
        })
    }

    /// Check and, if necessary, shrink `maxOutputTokens` so that
    /// `inputChars + 4*maxOutputTokens <= contextChars - safetyBuffer`.
    /// Returns `SplitOrReject` only if reducing the budget to its floor still
    /// doesn't fit.
    fn apply_safety_buffer(
        &self,
        input_chars: usize,
        mut max_output_tokens: u32,
        context_chars: usize,
    ) -> (u32, OverflowDecision) {
        let budget = context_chars.saturating_sub(self.config.safety_buffer_chars);

        let fits = |tokens: u32| input_chars + 4 * tokens as usize <= budget;

        if fits(max_output_tokens) {
            return (max_output_tokens, OverflowDecision::Fits);
        }

        // Reduce toward the floor before declaring overflow.
        while max_output_tokens > self.config.local_output_floor && !fits(max_output_tokens) {
            max_output_tokens = (max_output_tokens as f64 * 0.8) as u32;
        }

        if fits(max_output_tokens) {
            (max_output_tokens, OverflowDecision::EscalateToCloud)
        } else {
            (max_output_tokens, OverflowDecision::SplitOrReject)
        }
    }

    fn compute_timeout(&self, max_output_tokens: u32, tokens_per_second: f64, floor: u64, cap: u64) -> u64 {
        let tps = if tokens_per_second <= 0.0 { 1.0 } else { tokens_per_second };
        let generation_ms = (max_output_tokens as f64 / tps).ceil() as u64 * 1000;
        (generation_ms + self.config.timeout_headroom_ms)
            .max(floor)
            .min(cap)
    }
}


/// Property-based tests for the budget-safety and monotonicity invariants
/// that must hold across the whole input/output-size space, not just the
/// handful of examples above.
#[cfg(test)]
mod proptest_invariants {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The safety-buffer invariant holds for any input size a remote
        /// backend plan accepts without overflowing.
        #[test]
        fn remote_plan_never_exceeds_safety_buffer(
            input_chars in 0usize..400_000,
            context_chars in 50_000usize..600_000,
            tps in 10.0f64..120.0,
        ) {
            let planner = CapacityPlanner::new(PlannerConfig::default());
            let spec = RemoteBackendSpec { context_chars, tokens_per_second: tps };
            if let Ok(plan) = planner.plan_remote(&spec, input_chars, TaskKind::General, false) {
                prop_assert!(input_chars + 4 * plan.max_output_tokens as usize <= context_chars.saturating_sub(4000));
            }
        }

        /// Output budget is non-increasing as input size grows, for a fixed backend.
        #[test]
        fn remote_output_budget_is_monotonic_in_input_size(
            small in 0usize..50_000,
            delta in 0usize..50_000,
        ) {
            let planner = CapacityPlanner::new(PlannerConfig::default());
            let spec = RemoteBackendSpec { context_chars: 200_000, tokens_per_second: 60.0 };
            let large = small + delta;
            let p_small = planner.plan_remote(&spec, small, TaskKind::General, false);
            let p_large = planner.plan_remote(&spec, large, TaskKind::General, false);
            if let (Ok(a), Ok(b)) = (p_small, p_large) {
                prop_assert!(b.max_output_tokens <= a.max_output_tokens);
            }
        }

        /// Timeout is never below the documented floor for the backend class.
        #[test]
        fn remote_timeout_respects_floor_and_cap(
            max_output_tokens in 100u32..20_000,
            tps in 1.0f64..200.0,
        ) {
            let planner = CapacityPlanner::new(PlannerConfig::default());
            let timeout = planner.compute_timeout(
                max_output_tokens,
                tps,
                planner.config.remote_min_timeout_ms,
                planner.config.remote_max_timeout_ms,
            );
            prop_assert!(timeout >= planner.config.remote_min_timeout_ms);
            prop_assert!(timeout <= planner.config.remote_max_timeout_ms);
        }
    }
}
