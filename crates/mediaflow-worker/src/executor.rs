//! Handler registry: dispatches leased items to the handler for their kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mediaflow_core::error::AppError;
use mediaflow_core::types::OperationKind;

use crate::item::{DeadLetter, LeasedItem};

/// Processes leased items of one kind.
#[async_trait]
pub trait QueueHandler: Send + Sync + std::fmt::Debug {
    /// The kind this handler processes.
    fn kind(&self) -> OperationKind;

    /// Handle one delivery. `Ok` acknowledges the item.
    async fn handle(&self, item: &LeasedItem) -> Result<Option<Value>, JobExecutionError>;

    /// Called once when an item of this kind moves to the failed state,
    /// whether through a failed delivery or an expired lease.
    async fn on_dead_letter(&self, _item: &DeadLetter) {}
}

/// Error from handling a delivery
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, do not retry
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Whether the queue should redeliver the item.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Permanent(_) => false,
            Self::Internal(err) => !err.is_client_error(),
        }
    }
}

/// Dispatches items to the handler registered for their kind
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<OperationKind, Arc<dyn QueueHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for its kind
    pub fn register(&mut self, handler: Arc<dyn QueueHandler>) {
        let kind = handler.kind();
        tracing::info!(kind = %kind, "Registered queue handler");
        self.handlers.insert(kind, handler);
    }

    /// Handler for `kind`, if any
    pub fn get(&self, kind: &OperationKind) -> Option<Arc<dyn QueueHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Dispatch an item to its handler
    pub async fn execute(&self, item: &LeasedItem) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handlers.get(&item.kind).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No handler registered for kind '{}'",
                item.kind
            ))
        })?;

        tracing::debug!(
            kind = %item.kind,
            item_id = %item.id,
            attempt = item.attempt,
            max_attempts = item.max_attempts,
            "Dispatching item"
        );

        handler.handle(item).await
    }

    /// Tell the handler of the item's kind that the item is dead
    pub async fn dead_lettered(&self, item: &DeadLetter) {
        match self.handlers.get(&item.kind) {
            Some(handler) => handler.on_dead_letter(item).await,
            None => tracing::warn!(kind = %item.kind, item_id = %item.id, "Dead item has no handler"),
        }
    }

    /// Check if a handler is registered for a kind
    pub fn has_handler(&self, kind: &OperationKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Kinds with a registered handler, sorted
    pub fn registered_kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl QueueHandler for Echo {
        fn kind(&self) -> OperationKind {
            OperationKind::new(OperationKind::IMAGE_RESIZE)
        }

        async fn handle(&self, item: &LeasedItem) -> Result<Option<Value>, JobExecutionError> {
            Ok(Some(item.payload.clone()))
        }
    }

    #[derive(Debug, Default)]
    struct Graveyard {
        dead: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueHandler for Graveyard {
        fn kind(&self) -> OperationKind {
            OperationKind::new(OperationKind::AUDIO_CONVERT)
        }

        async fn handle(&self, _item: &LeasedItem) -> Result<Option<Value>, JobExecutionError> {
            Err(JobExecutionError::Permanent("never works".into()))
        }

        async fn on_dead_letter(&self, item: &DeadLetter) {
            self.dead.lock().unwrap().push(item.error.clone());
        }
    }

    fn leased(kind: &str) -> LeasedItem {
        LeasedItem {
            id: mediaflow_core::types::QueueItemId::new(),
            kind: OperationKind::new(kind),
            payload: serde_json::json!({"x": 1}),
            attempt: 1,
            max_attempts: 3,
            token: 0,
        }
    }

    #[tokio::test]
    async fn test_dispatches_by_kind() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo));
        assert!(registry.has_handler(&OperationKind::new(OperationKind::IMAGE_RESIZE)));

        let result = registry.execute(&leased(OperationKind::IMAGE_RESIZE)).await.unwrap();
        assert_eq!(result, Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_missing_handler_is_permanent() {
        let registry = HandlerRegistry::new();
        let err = registry.execute(&leased("unknown")).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_dead_letters_reach_their_handler() {
        let graveyard = Arc::new(Graveyard::default());
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(graveyard.clone());

        let item = leased(OperationKind::AUDIO_CONVERT);
        registry
            .dead_lettered(&DeadLetter::from_delivery(&item, "lease expired"))
            .await;
        registry
            .dead_lettered(&DeadLetter::from_delivery(&leased(OperationKind::IMAGE_RESIZE), "x"))
            .await;
        assert_eq!(*graveyard.dead.lock().unwrap(), vec!["lease expired".to_string()]);
    }

    #[test]
    fn test_internal_error_retryability() {
        assert!(JobExecutionError::Internal(AppError::storage("disk")).is_retryable());
        assert!(!JobExecutionError::Internal(AppError::validation("bad")).is_retryable());
    }
}
