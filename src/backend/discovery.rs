//! Model Discovery: probes local LLM servers to learn live context window,
//! parameter count, parallel slot count, and loaded model identity.

use crate::backend::adapters::LocalServerDialect;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Uniform shape every local server dialect is normalized into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredModelSnapshot {
    pub model_id: String,
    pub n_params_billions: f64,
    pub n_ctx_train: usize,
    pub n_ctx_current: usize,
    pub parallel_slots: u32,
    pub server_dialect: String,
    pub capabilities: Vec<ModelCapability>,
    pub is_orchestrator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    DeepReasoning,
    FastGeneration,
    LargeContext,
    Code,
    Security,
    Documentation,
}

impl DiscoveredModelSnapshot {
    /// Infer capabilities from size and name cues, per the size/name rules:
    /// ≥30B → deep reasoning, ≤8B → fast generation, ≥32K context → large-context,
    /// plus name-based cues for code/security/documentation.
    pub fn infer_capabilities(model_id: &str, n_params_billions: f64, n_ctx_train: usize) -> Vec<ModelCapability> {
        let mut caps = Vec::new();
        if n_params_billions >= 30.0 {
            caps.push(ModelCapability::DeepReasoning);
        }
        if n_params_billions <= 8.0 {
            caps.push(ModelCapability::FastGeneration);
        }
        if n_ctx_train >= 32_000 {
            caps.push(ModelCapability::LargeContext);
        }
        let lower = model_id.to_lowercase();
        if lower.contains("code") || lower.contains("coder") {
            caps.push(ModelCapability::Code);
        }
        if lower.contains("security") || lower.contains("guard") {
            caps.push(ModelCapability::Security);
        }
        if lower.contains("doc") {
            caps.push(ModelCapability::Documentation);
        }
        caps
    }

    pub fn tier(&self) -> ModelTier {
        if self.n_params_billions >= 14.0 {
            ModelTier::Large
        } else if self.n_params_billions < 7.0 {
            ModelTier::Small
        } else {
            ModelTier::Medium
        }
    }
}

/// Coarse size tier used by the Workflow Mode Detector's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Large,
    Medium,
    Small,
}

/// One entry from the local multi-model router's `/v1/models` listing.
#[derive(Debug, Deserialize)]
struct RouterModelEntry {
    id: String,
    status: RouterModelStatus,
    size: Option<f64>,
    #[allow(dead_code)]
    quantization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouterModelStatus {
    value: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Pull `--parallel N` and `--ctx-size M` out of a model's launch args.
fn parse_launch_args(args: &[String]) -> (Option<u32>, Option<usize>) {
    let mut parallel = None;
    let mut ctx_size = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--parallel" => parallel = iter.next().and_then(|v| v.parse().ok()),
            "--ctx-size" => ctx_size = iter.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    (parallel, ctx_size)
}

static PARAM_COUNT_PATTERN: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*b(?:illion)?\b").unwrap());

/// Guess a model's parameter count in billions from its router-reported
/// `size` (already billions-scale in every dialect observed) or, failing
/// that, a "7b"/"13b"/"70b"-style cue in its name.
fn guess_param_billions(id: &str, size: Option<f64>) -> f64 {
    if let Some(size) = size {
        if size > 0.0 {
            return size;
        }
    }
    PARAM_COUNT_PATTERN
        .captures(id)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(8.0)
}

struct CacheEntry {
    snapshot: DiscoveredModelSnapshot,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// One configured local port to probe, paired with its dialect.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub port: u16,
    pub base_url: String,
    pub dialect: LocalServerDialect,
}

/// Configuration for Model Discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub scan_ports: Vec<ScanTarget>,
    pub cache_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_ports: Vec::new(),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Probes configured local ports and maintains a per-port TTL cache of the
/// uniform snapshot shape.
pub struct ModelDiscovery {
    config: DiscoveryConfig,
    cache: Arc<RwLock<HashMap<u16, CacheEntry>>>,
    loaded_counts: Arc<RwLock<HashMap<u16, u32>>>,
    client: reqwest::Client,
}

impl ModelDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            loaded_counts: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::new(),
        }
    }

    /// Return a cached snapshot if fresh, else `None` (caller should probe
    /// and call `store`).
    pub async fn cached(&self, port: u16) -> Option<DiscoveredModelSnapshot> {
        let cache = self.cache.read().await;
        cache.get(&port).and_then(|entry| {
            if entry.is_expired(self.config.cache_ttl) {
                None
            } else {
                Some(entry.snapshot.clone())
            }
        })
    }

    pub async fn store(&self, port: u16, snapshot: DiscoveredModelSnapshot) {
        let mut cache = self.cache.write().await;
        cache.insert(
            port,
            CacheEntry {
                snapshot,
                cached_at: Instant::now(),
            },
        );
    }

    /// Force-invalidate a port's cache entry, e.g. when the mode detector
    /// observes a capability transition.
    pub async fn invalidate(&self, port: u16) {
        self.cache.write().await.remove(&port);
    }

    pub fn scan_targets(&self) -> &[ScanTarget] {
        &self.config.scan_ports
    }

    /// Apply a freshly probed live reading of `parallelSlots`/`ctxSize` from
    /// the local multi-model router, which is authoritative over any
    /// baked-in constant.
    pub async fn apply_live_reading(&self, port: u16, parallel_slots: u32, n_ctx_current: usize) {
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.get_mut(&port) {
            entry.snapshot.parallel_slots = parallel_slots;
            entry.snapshot.n_ctx_current = n_ctx_current;
            debug!(port, parallel_slots, n_ctx_current, "applied live discovery reading");
        }
    }

    /// Count of models a prior `refresh_from_router` call found loaded at
    /// `port`, used by the Workflow Mode Detector's multi-model check.
    pub async fn loaded_count(&self, port: u16) -> u32 {
        *self.loaded_counts.read().await.get(&port).unwrap_or(&0)
    }

    /// Query the local multi-model router's models-list endpoint at `target`,
    /// parse each loaded entry's launch args, and refresh both the port's
    /// cached snapshot and its loaded-model count.
    ///
    /// The first loaded entry becomes the cached snapshot; `is_orchestrator`
    /// is set once more than one model is loaded at the same port.
    pub async fn refresh_from_router(&self, target: &ScanTarget) -> Result<DiscoveredModelSnapshot> {
        let resp = self
            .client
            .get(format!("{}/v1/models", target.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| Error::transport(format!("discovery:{}", target.port), e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::transport(
                format!("discovery:{}", target.port),
                format!("HTTP {}", resp.status()),
            ));
        }

        let entries: Vec<RouterModelEntry> = resp
            .json()
            .await
            .map_err(|e| Error::transport(format!("discovery:{}", target.port), format!("malformed models list: {e}")))?;

        let loaded: Vec<&RouterModelEntry> = entries.iter().filter(|e| e.status.value == "loaded").collect();
        let dialect_name = format!("{:?}", target.dialect).to_lowercase();

        let primary = loaded.first().ok_or_else(|| {
            Error::transport(format!("discovery:{}", target.port), "no loaded model reported".to_string())
        })?;

        let (parallel, ctx_size) = parse_launch_args(&primary.status.args);
        let n_params = guess_param_billions(&primary.id, primary.size);
        let n_ctx = ctx_size.unwrap_or(32_000);

        let snapshot = DiscoveredModelSnapshot {
            model_id: primary.id.clone(),
            n_params_billions: n_params,
            n_ctx_train: n_ctx,
            n_ctx_current: n_ctx,
            parallel_slots: parallel.unwrap_or(1),
            server_dialect: dialect_name,
            capabilities: DiscoveredModelSnapshot::infer_capabilities(&primary.id, n_params, n_ctx),
            is_orchestrator: loaded.len() > 1,
        };

        self.store(target.port, snapshot.clone()).await;
        if let (Some(parallel), Some(ctx_size)) = (parallel, ctx_size) {
            self.apply_live_reading(target.port, parallel, ctx_size).await;
        }
        self.loaded_counts.write().await.insert(target.port, loaded.len() as u32);

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(model_id: &str, params: f64, ctx: usize) -> DiscoveredModelSnapshot {
        DiscoveredModelSnapshot {
            model_id: model_id.to_string(),
            n_params_billions: params,
            n_ctx_train: ctx,
            n_ctx_current: ctx,
            parallel_slots: 2,
            server_dialect: "llama.cpp".to_string(),
            capabilities: DiscoveredModelSnapshot::infer_capabilities(model_id, params, ctx),
            is_orchestrator: false,
        }
    }

    #[test]
    fn launch_args_extract_parallel_and_ctx_size() {
        let args = vec![
            "--parallel".to_string(),
            "4".to_string(),
            "--ctx-size".to_string(),
            "16384".to_string(),
        ];
        assert_eq!(parse_launch_args(&args), (Some(4), Some(16_384)));
    }

    #[test]
    fn launch_args_missing_flags_yield_none() {
        let args = vec!["--some-other-flag".to_string(), "x".to_string()];
        assert_eq!(parse_launch_args(&args), (None, None));
    }

    #[test]
    fn param_billions_prefers_reported_size() {
        assert_eq!(guess_param_billions("anything-7b", Some(13.0)), 13.0);
    }

    #[test]
    fn param_billions_falls_back_to_name_cue() {
        assert_eq!(guess_param_billions("qwen2.5-coder-32b-instruct", None), 32.0);
    }

    #[test]
    fn param_billions_defaults_when_no_cue_present() {
        assert_eq!(guess_param_billions("mystery-model", None), 8.0);
    }

    #[test]
    fn capability_inference_follows_size_and_name_rules() {
        let caps = DiscoveredModelSnapshot::infer_capabilities("qwen-coder-32b", 32.0, 65_000);
        assert!(caps.contains(&ModelCapability::DeepReasoning));
        assert!(caps.contains(&ModelCapability::LargeContext));
        assert!(caps.contains(&ModelCapability::Code));
        assert!(!caps.contains(&ModelCapability::FastGeneration));
    }

    #[test]
    fn small_model_gets_fast_generation_capability() {
        let caps = DiscoveredModelSnapshot::infer_capabilities("phi-3-mini", 3.8, 4096);
        assert!(caps.contains(&ModelCapability::FastGeneration));
        assert!(!caps.contains(&ModelCapability::DeepReasoning));
    }

    #[test]
    fn tier_thresholds_match_workflow_mode_rules() {
        assert_eq!(sample_snapshot("big", 30.0, 8192).tier(), ModelTier::Large);
        assert_eq!(sample_snapshot("mid", 10.0, 8192).tier(), ModelTier::Medium);
        assert_eq!(sample_snapshot("small", 3.0, 8192).tier(), ModelTier::Small);
    }

    #[tokio::test]
    async fn cache_returns_none_when_absent_and_value_after_store() {
        let discovery = ModelDiscovery::new(DiscoveryConfig::default());
        assert!(discovery.cached(8080).await.is_none());

        discovery.store(8080, sample_snapshot("m", 7.0, 8192)).await;
        assert!(discovery.cached(8080).await.is_some());
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let discovery = ModelDiscovery::new(DiscoveryConfig {
            cache_ttl: Duration::from_millis(10),
            ..Default::default()
        });
        discovery.store(8080, sample_snapshot("m", 7.0, 8192)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(discovery.cached(8080).await.is_none());
    }

    #[tokio::test]
    async fn live_reading_overrides_baked_in_slots() {
        let discovery = ModelDiscovery::new(DiscoveryConfig::default());
        discovery.store(8080, sample_snapshot("m", 7.0, 8192)).await;
        discovery.apply_live_reading(8080, 4, 16_384).await;

        let snap = discovery.cached(8080).await.unwrap();
        assert_eq!(snap.parallel_slots, 4);
        assert_eq!(snap.n_ctx_current, 16_384);
    }
}
