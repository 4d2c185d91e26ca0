//! Execution runtime boundary
//!
//! shipload does not execute module bytes itself. An embedding application
//! supplies a `Runtime` that creates named execution contexts and runs
//! verified module bytes inside them.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a runtime while creating a context or running a module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Creates fresh execution contexts
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create(&self, name: &str) -> Result<Arc<dyn ExecutionContext>, RuntimeError>;
}

/// A live instance that loaded modules run in
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Application name the context was created for
    fn name(&self) -> &str;

    /// Run compiled module bytes under `id`
    async fn run_module(&self, id: &str, bytes: &[u8]) -> Result<(), RuntimeError>;

    /// Release the context after a rejected load
    async fn close(&self) {}
}
