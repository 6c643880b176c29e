use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

use super::CompletionProvider;
use crate::config::Config;

#[derive(Clone)]
pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    chat_model: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let mut chat_config = OpenAIConfig::new().with_api_base(&config.llm_url);

        if let Some(key) = &config.llm_api_key {
            chat_config = chat_config.with_api_key(key);
        } else {
            warn!("No LLM API key configured; completion requests will likely be rejected");
            chat_config = chat_config.with_api_key("unused");
        }

        Self {
            chat_client: Client::with_config(chat_config),
            chat_model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            max_output_tokens: config.llm_max_output_tokens,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    /// Sends `prompt` as a single user turn and returns the first choice's text.
    pub async fn completion(&self, prompt: &str) -> anyhow::Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into()];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_output_tokens)
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.chat_client.chat().create(request))
            .await
            .map_err(|_| anyhow::anyhow!("LLM request timed out after {:?}", self.timeout))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(content)
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, prompt: &str) -> Option<String> {
        match self.completion(prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                warn!("LLM returned an empty completion");
                None
            }
            Err(e) => {
                error!("LLM completion failed: {}", e);
                None
            }
        }
    }
}
