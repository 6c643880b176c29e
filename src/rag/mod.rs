//! Optional retrieved-knowledge capability.
//!
//! The bot ships without a provider; when one is configured its output is
//! inserted into the prompt's retrieved-knowledge section.

use async_trait::async_trait;

#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Knowledge relevant to `query`, already formatted for the prompt.
    async fn retrieve(&self, query: &str) -> anyhow::Result<Option<String>>;
}
