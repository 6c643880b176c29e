pub mod client;

pub use client::LlmClient;

use async_trait::async_trait;

/// Single request/response text completion.
///
/// Implementations swallow their own failures: a provider error, a timeout
/// and an empty body all come back as `None`.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Option<String>;
}
