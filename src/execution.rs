//! Execution Loop: invokes the chosen backend, detects truncation, and
//! drives the retry/escalation/dual-mode-iteration cascade.

use crate::backend::registry::BackendRegistry;
use crate::backend::types::{BackendKey, FinishReason, Response, SendOptions};
use crate::complexity::TaskKind;
use crate::error::{Error, Result};
use crate::router::{RoutingContext, Router, TaskContext};
use crate::workflow_mode::WorkflowMode;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_LOCAL_RETRIES: u32 = 2;
const LOCAL_TOKEN_SCALE: f64 = 1.5;
const CLOUD_TOKEN_SCALE: f64 = 2.0;
const TOKEN_CAP_DEFAULT: u32 = 8_000;
const TOKEN_CAP_GENERATION: u32 = 16_000;

/// Whether a tool's protocol requires block-level edits (SEARCH/REPLACE
/// style), which enables the <50% length heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProtocol {
    FreeForm,
    BlockEdits,
}

/// Structural truncation heuristics, independent of the intent-classifying
/// regexes in `complexity.rs` — this module only asks "is the output
/// structurally complete?".
pub mod truncation {
    use super::ToolProtocol;

    fn balanced(text: &str, open: char, close: char) -> bool {
        let mut depth: i64 = 0;
        for c in text.chars() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
        }
        depth == 0
    }

    fn fences_balanced(text: &str) -> bool {
        text.matches("```").count() % 2 == 0
    }

    fn search_replace_balanced(text: &str) -> bool {
        let opens = text.matches("<<<<<<< SEARCH").count();
        let mids = text.matches("=======").count();
        let closes = text.matches(">>>>>>> REPLACE").count();
        if opens == 0 && mids == 0 && closes == 0 {
            true
        } else {
            opens == mids && mids == closes
        }
    }

    fn trailing_ellipsis(text: &str) -> bool {
        let trimmed = text.trim_end();
        trimmed.ends_with("...") || trimmed.ends_with('\u{2026}')
    }

    /// True if `output` looks structurally incomplete relative to `input`.
    pub fn is_structurally_incomplete(input: &str, output: &str, protocol: ToolProtocol) -> bool {
        if !balanced(output, '{', '}') || !balanced(output, '[', ']') || !balanced(output, '(', ')') {
            return true;
        }
        if !fences_balanced(output) {
            return true;
        }
        if !search_replace_balanced(output) {
            return true;
        }
        if trailing_ellipsis(output) {
            return true;
        }
        if protocol == ToolProtocol::BlockEdits && !input.is_empty() {
            let ratio = output.chars().count() as f64 / input.chars().count() as f64;
            if ratio < 0.5 {
                return true;
            }
        }
        false
    }
}

/// True if the response was truncated, either by explicit finish reason or
/// by structural incompleteness.
pub fn is_truncated(input: &str, response: &Response, protocol: ToolProtocol) -> bool {
    response.is_truncated_by_finish_reason()
        || truncation::is_structurally_incomplete(input, &response.content, protocol)
}

/// Event emitted after a request resolves, feeding the Router's learning
/// recorder and the Background Queue.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub success: bool,
    pub output_length: usize,
    pub backend: BackendKey,
    pub model_id: Option<String>,
    pub task_kind: TaskKind,
    pub processing_time_ms: u64,
}

/// Result of running the Execution Loop for one request.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Response,
    pub backend_used: BackendKey,
    pub attempts: u32,
    pub was_truncated: bool,
    pub routing_context: RoutingContext,
}

/// Drives backend invocation, truncation detection, and the retry/escalation
/// cascade around a `Router`.
pub struct ExecutionLoop<'a> {
    router: &'a Router,
    registry: &'a BackendRegistry,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(router: &'a Router, registry: &'a BackendRegistry) -> Self {
        Self { router, registry }
    }

    fn token_cap(&self, generation_mode: bool) -> u32 {
        if generation_mode {
            TOKEN_CAP_GENERATION
        } else {
            TOKEN_CAP_DEFAULT
        }
    }

    /// Execute one request end to end: route, invoke, detect truncation,
    /// retry with token scaling, escalate to the fallback chain, and
    /// optionally attempt one dual-mode iteration.
    pub async fn execute(
        &self,
        task: &TaskContext,
        protocol: ToolProtocol,
        mode: WorkflowMode,
        fallback_chain: &[BackendKey],
    ) -> Result<(ExecutionResult, RoutingOutcome)> {
        let started = Instant::now();
        let (mut backend, mut options, routing_context) = self.router.route(task).await?;
        let cap = self.token_cap(task.generation_mode);

        let mut attempts = 0u32;
        let mut last_response: Option<Response> = None;
        let mut truncated = true;
        let mut fallback_idx = 0usize;

        'outer: loop {
            let mut local_retries = 0u32;
            loop {
                attempts += 1;
                let send_result = self.invoke(&backend, &task.prompt, &options).await;

                match send_result {
                    Ok(response) => {
                        truncated = is_truncated(&task.prompt, &response, protocol);
                        last_response = Some(response);
                        if !truncated {
                            break 'outer;
                        }
                        if mode == WorkflowMode::DualIterative && local_retries == MAX_LOCAL_RETRIES {
                            if let Some(fixed) = self.try_dual_mode_iteration(&task.prompt, last_response.as_ref().unwrap()).await {
                                last_response = Some(fixed);
                                truncated = false;
                                break 'outer;
                            }
                        }
                        if local_retries >= MAX_LOCAL_RETRIES {
                            break;
                        }
                        local_retries += 1;
                        options.max_tokens = ((options.max_tokens as f64) * LOCAL_TOKEN_SCALE).min(cap as f64) as u32;
                        debug!(backend = %backend, attempt = attempts, "response truncated, retrying with scaled token budget");
                    }
                    Err(e) if e.is_locally_recoverable() => {
                        warn!(backend = %backend, error = %e, "transport error, will escalate to fallback chain");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            if fallback_idx >= fallback_chain.len() {
                break;
            }
            backend = fallback_chain[fallback_idx].clone();
            fallback_idx += 1;
            options.max_tokens = ((options.max_tokens as f64) * CLOUD_TOKEN_SCALE).min(cap as f64) as u32;
        }

        let response = last_response.ok_or_else(|| Error::internal("execution loop produced no response"))?;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let outcome = RoutingOutcome {
            success: !truncated,
            output_length: response.content.chars().count(),
            backend: backend.clone(),
            model_id: response.metadata.model_id.clone(),
            task_kind: routing_context.task_kind,
            processing_time_ms,
        };

        self.router.record_outcome(routing_context.task_kind, &backend, outcome.success);

        Ok((
            ExecutionResult {
                response,
                backend_used: backend,
                attempts,
                was_truncated: truncated,
                routing_context,
            },
            outcome,
        ))
    }

    async fn invoke(&self, backend: &BackendKey, prompt: &str, options: &SendOptions) -> Result<Response> {
        let adapter = self
            .registry
            .adapter(backend)
            .ok_or_else(|| Error::policy_rejection(backend.to_string()))?;
        tokio::time::timeout(Duration::from_millis(options.timeout_ms), adapter.send(prompt, options))
            .await
            .map_err(|_| Error::timeout(backend.to_string(), options.timeout_ms))?
    }

    /// One dual-mode iteration: the reviewer gets the generator's output and
    /// is asked to review-and-complete it. Accepted only if the reviewer
    /// signals "FIXED" or its own output is structurally complete.
    async fn try_dual_mode_iteration(&self, original_prompt: &str, generator_output: &Response) -> Option<Response> {
        let reviewer_key = self.find_reviewer()?;
        let adapter = self.registry.adapter(&reviewer_key)?;
        let review_prompt = format!(
            "Review and complete the following truncated output for the request:\n\n{original_prompt}\n\n---\n\n{}",
            generator_output.content
        );
        let opts = SendOptions::new(4_000, 60_000);
        let reviewed = adapter.send(&review_prompt, &opts).await.ok()?;

        let signals_fixed = reviewed.content.contains("FIXED");
        let structurally_complete =
            !truncation::is_structurally_incomplete(original_prompt, &reviewed.content, ToolProtocol::FreeForm);

        if signals_fixed || structurally_complete {
            Some(reviewed)
        } else {
            None
        }
    }

    fn find_reviewer(&self) -> Option<BackendKey> {
        self.registry
            .iterate()
            .find(|d| d.supports_role(crate::backend::types::RoleHint::Reviewer))
            .map(|d| d.key.clone())
    }
}
