//! Council: fans a prompt out to multiple backends in parallel for
//! cross-checked deliberation, with vote/debate/full synthesis modes.

use crate::backend::health::HealthMonitor;
use crate::backend::registry::BackendRegistry;
use crate::backend::types::{BackendKey, SendOptions};
use crate::error::{Error, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// How confident the caller needs the Council's answer to be, mapped to the
/// minimum number of backends queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    fn required_count(self) -> usize {
        match self {
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
        }
    }
}

/// Synthesis strategy applied once all responses are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisMode {
    /// Return the raw response set; the caller synthesizes.
    Raw,
    /// Extract `VOTE:`/`REASON:` from each response, tally, return the plurality.
    Vote,
    /// Run up to `rounds` rounds, each seeded with the previous round's responses.
    Debate { rounds: u32 },
    /// Each backend anonymously ranks the others; a designated chair synthesizes.
    Full { chair: BackendKey },
}

/// Static `topic -> ordered backend list` table, constructed once at startup.
#[derive(Debug, Clone, Default)]
pub struct CouncilConfig {
    pub topics: HashMap<String, Vec<BackendKey>>,
    pub max_concurrency: usize,
}

impl CouncilConfig {
    pub fn new() -> Self {
        Self {
            topics: HashMap::new(),
            max_concurrency: 4,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>, backends: Vec<BackendKey>) -> Self {
        self.topics.insert(topic.into(), backends);
        self
    }
}

/// One backend's response within a Council call.
#[derive(Debug, Clone)]
pub struct CouncilResponse {
    pub backend: BackendKey,
    pub content: String,
    pub latency_ms: u64,
    pub ok: bool,
}

/// Outcome of a Council call.
#[derive(Debug, Clone)]
pub struct CouncilResult {
    pub backends_queried: Vec<BackendKey>,
    pub responses: Vec<CouncilResponse>,
    pub synthesis_hint: Option<String>,
    pub processing_time_ms: u64,
}

/// Fans a prompt out to multiple backends for cross-checked deliberation.
pub struct Council<'a> {
    config: CouncilConfig,
    registry: &'a BackendRegistry,
    health: &'a HealthMonitor,
}

impl<'a> Council<'a> {
    pub fn new(config: CouncilConfig, registry: &'a BackendRegistry, health: &'a HealthMonitor) -> Self {
        Self { config, registry, health }
    }

    /// Candidate backends for `topic` filtered by current health, truncated
    /// to at least `confidence.required_count()` if available.
    async fn candidates(&self, topic: &str, confidence: ConfidenceLevel) -> Result<Vec<BackendKey>> {
        let ordered = self
            .config
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::config(format!("no backend list configured for topic {topic}")))?;

        let mut alive = Vec::new();
        for key in &ordered {
            if !self.health.is_open(key).await {
                alive.push(key.clone());
            }
        }

        if alive.len() < 2 {
            return Err(Error::internal(format!(
                "council requires at least 2 available backends for topic {topic}, found {}",
                alive.len()
            )));
        }

        let target = confidence.required_count().min(alive.len());
        alive.truncate(target);
        Ok(alive)
    }

    /// Fan a prompt out in parallel to the topic's available backends, then
    /// apply the requested synthesis mode.
    pub async fn deliberate(
        &self,
        prompt: &str,
        topic: &str,
        confidence: ConfidenceLevel,
        max_tokens: u32,
        mode: SynthesisMode,
    ) -> Result<CouncilResult> {
        let started = Instant::now();
        let backends = self.candidates(topic, confidence).await?;

        let mut responses = self.fan_out(prompt, max_tokens, &backends).await;

        let synthesis_hint = match mode {
            SynthesisMode::Raw => None,
            SynthesisMode::Vote => Some(Self::tally_votes(&responses)),
            SynthesisMode::Debate { rounds } => {
                for _ in 1..rounds {
                    let combined = Self::combine_round(&responses);
                    let next_prompt = format!("{prompt}\n\n# Prior round responses\n{combined}");
                    responses = self.fan_out(&next_prompt, max_tokens, &backends).await;
                }
                Some(Self::combine_round(&responses))
            }
            SynthesisMode::Full { ref chair } => {
                let ranked = Self::combine_round(&responses);
                let chair_prompt = format!(
                    "Synthesize the following peer responses into a single answer, \
                     acting as chair:\n\n{ranked}"
                );
                if let Some(adapter) = self.registry.adapter(chair) {
                    let opts = SendOptions::new(max_tokens, 60_000);
                    adapter.send(&chair_prompt, &opts).await.ok().map(|r| r.content)
                } else {
                    None
                }
            }
        };

        Ok(CouncilResult {
            backends_queried: backends,
            responses,
            synthesis_hint,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn fan_out(&self, prompt: &str, max_tokens: u32, backends: &[BackendKey]) -> Vec<CouncilResponse> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let tasks = backends.iter().map(|key| {
            let key = key.clone();
            let adapter = self.registry.adapter(&key);
            let semaphore = semaphore.clone();
            let prompt = prompt.to_string();
            async move {
                let _permit = semaphore.acquire().await.ok();
                let started = Instant::now();
                let Some(adapter) = adapter else {
                    return CouncilResponse {
                        backend: key,
                        content: String::new(),
                        latency_ms: 0,
                        ok: false,
                    };
                };
                let opts = SendOptions::new(max_tokens, 60_000);
                match adapter.send(&prompt, &opts).await {
                    Ok(resp) => CouncilResponse {
                        backend: key,
                        content: resp.content,
                        latency_ms: started.elapsed().as_millis() as u64,
                        ok: true,
                    },
                    Err(_) => CouncilResponse {
                        backend: key,
                        content: String::new(),
                        latency_ms: started.elapsed().as_millis() as u64,
                        ok: false,
                    },
                }
            }
        });
        join_all(tasks).await
    }

    fn tally_votes(responses: &[CouncilResponse]) -> String {
        let mut tally: HashMap<String, u32> = HashMap::new();
        for r in responses {
            if let Some(vote) = Self::extract_vote(&r.content) {
                *tally.entry(vote).or_insert(0) += 1;
            }
        }
        tally
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(vote, _)| vote)
            .unwrap_or_else(|| "no-consensus".to_string())
    }

    fn extract_vote(content: &str) -> Option<String> {
        content.lines().find_map(|line| {
            line.trim()
                .strip_prefix("VOTE:")
                .map(|v| v.trim().to_string())
        })
    }

    fn combine_round(responses: &[CouncilResponse]) -> String {
        responses
            .iter()
            .map(|r| format!("[{}] {}", r.backend, r.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::adapters::MockAdapter;
    use crate::backend::health::HealthConfig;
    use crate::backend::types::{BackendDescriptor, BackendLocality, FinishReason};
    use std::sync::Arc;

    fn registry_with(n: usize) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        for i in 0..n {
            registry.register(
                BackendDescriptor::new(format!("b{i}"), format!("Backend {i}"), BackendLocality::Remote),
                Arc::new(MockAdapter::new(format!("VOTE: yes\nREASON: looks fine"), FinishReason::Stop)),
            );
        }
        registry
    }

    #[tokio::test]
    async fn fewer_than_two_available_backends_fails() {
        let registry = registry_with(1);
        let health = HealthMonitor::new(HealthConfig::default());
        let config = CouncilConfig::new().with_topic("security", vec![BackendKey::new("b0")]);
        let council = Council::new(config, &registry, &health);

        let result = council
            .deliberate("review this", "security", ConfidenceLevel::Low, 500, SynthesisMode::Raw)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn raw_mode_returns_all_queried_responses() {
        let registry = registry_with(3);
        let health = HealthMonitor::new(HealthConfig::default());
        let config = CouncilConfig::new().with_topic(
            "security",
            vec![BackendKey::new("b0"), BackendKey::new("b1"), BackendKey::new("b2")],
        );
        let council = Council::new(config, &registry, &health);

        let result = council
            .deliberate("review this", "security", ConfidenceLevel::Low, 500, SynthesisMode::Raw)
            .await
            .unwrap();
        assert_eq!(result.backends_queried.len(), 2);
        assert_eq!(result.responses.len(), 2);
        assert!(result.synthesis_hint.is_none());
    }

    #[tokio::test]
    async fn vote_mode_tallies_plurality() {
        let registry = registry_with(2);
        let health = HealthMonitor::new(HealthConfig::default());
        let config = CouncilConfig::new().with_topic("security", vec![BackendKey::new("b0"), BackendKey::new("b1")]);
        let council = Council::new(config, &registry, &health);

        let result = council
            .deliberate("review this", "security", ConfidenceLevel::Low, 500, SynthesisMode::Vote)
            .await
            .unwrap();
        assert_eq!(result.synthesis_hint.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn open_breaker_excludes_backend_from_candidates() {
        let registry = registry_with(3);
        let health = HealthMonitor::new(HealthConfig {
            failure_threshold: 1,
            ..HealthConfig::default()
        });
        health.record_failure(&BackendKey::new("b0")).await;

        let config = CouncilConfig::new().with_topic(
            "security",
            vec![BackendKey::new("b0"), BackendKey::new("b1"), BackendKey::new("b2")],
        );
        let council = Council::new(config, &registry, &health);
        let result = council
            .deliberate("review this", "security", ConfidenceLevel::High, 500, SynthesisMode::Raw)
            .await
            .unwrap();
        assert!(!result.backends_queried.contains(&BackendKey::new("b0")));
    }
}
