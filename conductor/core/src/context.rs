//! Retrieval Context
//!
//! The seam to whatever knowledge store supplies background text for a
//! prompt. The orchestration layer only needs the text back.

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::SessionId;

/// Errors from a context provider
#[derive(Debug, Error)]
pub enum ContextError {
    /// The backing store could not be reached
    #[error("{0}")]
    Unavailable(String),

    /// The query failed
    #[error("query failed: {0}")]
    Query(String),
}

/// Supplies retrieval context for a user message
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Up to `top_k` pieces of context for `query`, joined into one string
    ///
    /// An empty string means no context was found.
    async fn retrieve_context(
        &self,
        query: &str,
        session_id: &SessionId,
        top_k: usize,
    ) -> Result<String, ContextError>;
}

/// A context provider that never finds anything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn retrieve_context(
        &self,
        _query: &str,
        _session_id: &SessionId,
        _top_k: usize,
    ) -> Result<String, ContextError> {
        Ok(String::new())
    }
}

/// A context provider that always returns the same text
#[derive(Clone, Debug, Default)]
pub struct StaticContext(pub String);

#[async_trait]
impl ContextProvider for StaticContext {
    async fn retrieve_context(
        &self,
        _query: &str,
        _session_id: &SessionId,
        _top_k: usize,
    ) -> Result<String, ContextError> {
        Ok(self.0.clone())
    }
}
