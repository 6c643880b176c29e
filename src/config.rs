use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_temperature: f32,
    pub llm_max_output_tokens: u32,
    pub llm_timeout_secs: u64,
    pub database_url: String,
    /// Messages pulled verbatim into every prompt
    pub recent_message_window: usize,
    pub status_message: String,
    pub dev_guild_id: Option<u64>,
    pub register_commands: bool,
}

/// Gemini's OpenAI-compatible endpoint
const DEFAULT_LLM_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_LLM_MODEL: &str = "gemini-flash-latest";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
            llm_url: env::var("LLM_URL").unwrap_or_else(|_| DEFAULT_LLM_URL.to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            llm_api_key: env::var("LLM_API_KEY")
                .or_else(|_| env::var("GEMINI_API_KEY"))
                .ok(),
            llm_temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .unwrap_or(0.7),
            llm_max_output_tokens: env::var("LLM_MAX_OUTPUT_TOKENS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/rollcord.db".to_string()),
            recent_message_window: env::var("RECENT_MESSAGE_WINDOW")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Listening in allowed channels".to_string()),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "llm_api_key",
                &self.llm_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("llm_temperature", &self.llm_temperature)
            .field("llm_max_output_tokens", &self.llm_max_output_tokens)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("database_url", &self.database_url)
            .field("recent_message_window", &self.recent_message_window)
            .field("status_message", &self.status_message)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("register_commands", &self.register_commands)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Missing token
        env::remove_var("DISCORD_TOKEN");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when DISCORD_TOKEN is missing");

        // 2. Defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::remove_var("LLM_MODEL");
        env::remove_var("RECENT_MESSAGE_WINDOW");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(config.recent_message_window, 5);
        assert!((config.llm_temperature - 0.7).abs() < f32::EPSILON);

        // 3. Debug redaction
        env::set_var("LLM_API_KEY", "secret_api_key");
        let config_redacted = Config::build().unwrap();
        let debug_output = format!("{:?}", config_redacted);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("secret_api_key"));
        assert!(debug_output.contains("[REDACTED]"));

        env::remove_var("DISCORD_TOKEN");
        env::remove_var("LLM_API_KEY");
    }
}
