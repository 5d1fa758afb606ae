//! Backend Registry: holds adapter handles and their static descriptors.

use crate::backend::types::{BackendDescriptor, BackendKey, Response, SendOptions};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Transport contract every backend implementation must satisfy.
///
/// Adapters are stateless with respect to orchestration: they perform the
/// call and map the wire format, but never decide retries or fallback.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Send a prompt to the backend and await its response.
    async fn send(&self, prompt: &str, opts: &SendOptions) -> Result<Response>;

    /// Cheap health probe. Backends that don't offer one fall back to the
    /// Health Monitor issuing a tiny `send` instead.
    async fn is_healthy(&self) -> bool {
        true
    }
}

struct RegisteredBackend {
    descriptor: BackendDescriptor,
    adapter: Arc<dyn BackendAdapter>,
}

/// Holds a mapping from backend key to adapter plus its static descriptor.
pub struct BackendRegistry {
    backends: HashMap<BackendKey, RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend. A later call with the same key replaces the earlier one.
    pub fn register(&mut self, descriptor: BackendDescriptor, adapter: Arc<dyn BackendAdapter>) {
        let key = descriptor.key.clone();
        self.backends.insert(key, RegisteredBackend { descriptor, adapter });
    }

    pub fn get(&self, key: &BackendKey) -> Option<(&BackendDescriptor, &Arc<dyn BackendAdapter>)> {
        self.backends.get(key).map(|b| (&b.descriptor, &b.adapter))
    }

    pub fn descriptor(&self, key: &BackendKey) -> Option<&BackendDescriptor> {
        self.backends.get(key).map(|b| &b.descriptor)
    }

    pub fn adapter(&self, key: &BackendKey) -> Option<Arc<dyn BackendAdapter>> {
        self.backends.get(key).map(|b| b.adapter.clone())
    }

    pub fn iterate(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backends.values().map(|b| &b.descriptor)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BackendKey> {
        self.backends.keys()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{BackendLocality, FinishReason};

    struct EchoAdapter;

    #[async_trait]
    impl BackendAdapter for EchoAdapter {
        async fn send(&self, prompt: &str, _opts: &SendOptions) -> Result<Response> {
            Ok(Response::new(prompt.to_string()).with_finish_reason(FinishReason::Stop))
        }
    }

    #[test]
    fn register_and_get_roundtrips() {
        let mut registry = BackendRegistry::new();
        let descriptor = BackendDescriptor::new("local-a", "Local A", BackendLocality::Local);
        registry.register(descriptor, Arc::new(EchoAdapter));

        let (desc, _adapter) = registry.get(&BackendKey::new("local-a")).unwrap();
        assert_eq!(desc.display_name, "Local A");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn registered_adapter_is_callable() {
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendDescriptor::new("local-a", "Local A", BackendLocality::Local),
            Arc::new(EchoAdapter),
        );

        let adapter = registry.adapter(&BackendKey::new("local-a")).unwrap();
        let resp = adapter
            .send("hello", &SendOptions::new(100, 1000))
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
    }

    #[test]
    fn unknown_key_returns_none() {
        let registry = BackendRegistry::new();
        assert!(registry.get(&BackendKey::new("missing")).is_none());
    }
}
