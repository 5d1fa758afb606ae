//! Core types shared by the Backend Registry, Health Monitor, and Model Discovery.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable identity for a registered backend. Cheap to clone and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendKey(pub String);

impl BackendKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BackendKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BackendKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a backend is reached over a local server dialect or a remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendLocality {
    Local,
    Remote,
}

/// Role a backend is suited for within dual-mode iteration or Council deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleHint {
    Generator,
    Reviewer,
    Chair,
}

/// Static capability and capacity description of a registered backend.
///
/// Owned solely by the Backend Registry; lifetime is the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub key: BackendKey,
    pub display_name: String,
    pub specialization: Option<String>,
    pub locality: BackendLocality,
    /// Static context ceiling in characters. For local backends this is a
    /// fallback only; the live Discovered Model Snapshot takes precedence.
    pub context_chars: usize,
    pub tokens_per_second: f64,
    pub role_hints: Vec<RoleHint>,
    /// Model Discovery scan port this backend's live readings are cached
    /// under. `None` for backends with no local-router probe (e.g. most
    /// remote backends, or a local backend discovery hasn't been wired to).
    pub scan_port: Option<u16>,
}

impl BackendDescriptor {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, locality: BackendLocality) -> Self {
        Self {
            key: BackendKey::new(key),
            display_name: display_name.into(),
            specialization: None,
            locality,
            context_chars: 32_000,
            tokens_per_second: 40.0,
            role_hints: vec![RoleHint::Generator],
            scan_port: None,
        }
    }

    pub fn with_specialization(mut self, spec: impl Into<String>) -> Self {
        self.specialization = Some(spec.into());
        self
    }

    pub fn with_context_chars(mut self, chars: usize) -> Self {
        self.context_chars = chars;
        self
    }

    pub fn with_tokens_per_second(mut self, tps: f64) -> Self {
        self.tokens_per_second = tps;
        self
    }

    pub fn with_role_hints(mut self, hints: Vec<RoleHint>) -> Self {
        self.role_hints = hints;
        self
    }

    pub fn with_scan_port(mut self, port: u16) -> Self {
        self.scan_port = Some(port);
        self
    }

    pub fn supports_role(&self, role: RoleHint) -> bool {
        self.role_hints.contains(&role)
    }
}

/// Options accompanying a `send` call to a backend adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOptions {
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub thinking: bool,
    pub router_model: Option<String>,
}

impl SendOptions {
    pub fn new(max_tokens: u32, timeout_ms: u64) -> Self {
        Self {
            max_tokens,
            timeout_ms,
            thinking: false,
            router_model: None,
        }
    }

    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn with_router_model(mut self, model: impl Into<String>) -> Self {
        self.router_model = Some(model.into());
        self
    }
}

/// The reason a backend stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    Other,
}

impl FinishReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_use" | "tool_calls" => Self::ToolUse,
            _ => Self::Other,
        }
    }
}

/// Metadata accompanying a backend response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub finish_reason: Option<FinishReason>,
    pub model_id: Option<String>,
}

/// Token usage reported by a backend, if any.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub total_tokens: Option<u32>,
}

/// Uniform response shape every backend adapter maps its wire format into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub headers: Option<HashMap<String, String>>,
    pub metadata: ResponseMetadata,
    pub usage: Option<Usage>,
}

impl Response {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            headers: None,
            metadata: ResponseMetadata::default(),
            usage: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.metadata.finish_reason = Some(reason);
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.metadata.model_id = Some(model_id.into());
        self
    }

    pub fn is_truncated_by_finish_reason(&self) -> bool {
        self.metadata.finish_reason == Some(FinishReason::Length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_maps_known_wire_values() {
        assert_eq!(FinishReason::from_wire("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("something_new"), FinishReason::Other);
    }

    #[test]
    fn response_truncation_flag_follows_finish_reason() {
        let r = Response::new("partial").with_finish_reason(FinishReason::Length);
        assert!(r.is_truncated_by_finish_reason());

        let r2 = Response::new("complete").with_finish_reason(FinishReason::Stop);
        assert!(!r2.is_truncated_by_finish_reason());
    }

    #[test]
    fn descriptor_builder_tracks_role_hints() {
        let d = BackendDescriptor::new("local-a", "Local A", BackendLocality::Local)
            .with_role_hints(vec![RoleHint::Generator, RoleHint::Reviewer]);
        assert!(d.supports_role(RoleHint::Reviewer));
        assert!(!d.supports_role(RoleHint::Chair));
    }
}
