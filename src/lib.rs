pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod handler;
pub mod inbound;
pub mod llm;
pub mod prompt;
pub mod rag;
pub mod reply;
pub mod store;
pub mod summarize;

#[cfg(test)]
mod testing;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    /// Shared with the per-message tasks spawned from the event handler
    pub handler: std::sync::Arc<handler::MessageHandler>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
