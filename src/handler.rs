//! Per-message orchestration.
//!
//! filter → authorize → load context → build prompt → complete → reply,
//! then a detached task logs the exchange, bumps the channel counter and
//! refreshes the rolling summary when it is due.

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::context::ConversationContext;
use crate::db::{NewMessage, Role, SummaryUpdate};
use crate::inbound::InboundMessage;
use crate::llm::CompletionProvider;
use crate::prompt::{build_prompt, estimate_tokens, PromptContext};
use crate::rag::RetrievalProvider;
use crate::reply::{split_message, ReplySink};
use crate::store::ContextStore;
use crate::summarize::{should_summarize, SummaryUpdater};

pub const COMPLETION_APOLOGY: &str = "Sorry, I encountered an error while generating a response.";
pub const GENERIC_APOLOGY: &str = "An error occurred. Please try again later.";

/// One user turn plus one assistant turn
const MESSAGES_PER_EXCHANGE: u64 = 2;
const DEFAULT_RECENT_WINDOW: usize = 5;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("allow-list lookup failed: {0:#}")]
    Authorization(anyhow::Error),
    #[error("failed to load conversation context: {0:#}")]
    ContextLoad(anyhow::Error),
    #[error("completion provider returned no response")]
    EmptyCompletion,
    #[error("reply delivery failed after {sent} chunk(s): {cause:#}")]
    Delivery { sent: usize, cause: anyhow::Error },
}

#[derive(Debug)]
pub enum Outcome {
    /// Bot author or blank content
    Filtered,
    /// Neither the channel nor its parent is allow-listed
    NotAllowed,
    /// The reply went out. `persistence` finishes logging and memory upkeep in the background.
    Replied {
        chunks: usize,
        persistence: JoinHandle<()>,
    },
    Failed {
        error: HandlerError,
        apology_sent: bool,
    },
}

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

pub struct MessageHandler {
    store: Arc<dyn ContextStore>,
    llm: Arc<dyn CompletionProvider>,
    retrieval: Option<Arc<dyn RetrievalProvider>>,
    summarizer: SummaryUpdater,
    bot: BotIdentity,
    recent_window: usize,
}

struct Generated {
    prior_summary: String,
    response: String,
}

impl MessageHandler {
    pub fn new(
        store: Arc<dyn ContextStore>,
        llm: Arc<dyn CompletionProvider>,
        bot: BotIdentity,
    ) -> Self {
        Self {
            store,
            summarizer: SummaryUpdater::new(Arc::clone(&llm)),
            llm,
            retrieval: None,
            bot,
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }

    pub fn with_retrieval(mut self, provider: Arc<dyn RetrievalProvider>) -> Self {
        self.retrieval = Some(provider);
        self
    }

    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window;
        self
    }

    pub async fn handle(&self, message: &InboundMessage, sink: &dyn ReplySink) -> Outcome {
        if message.author_is_bot || message.content.trim().is_empty() {
            return Outcome::Filtered;
        }

        let channel_id = match self.effective_channel(message).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                info!(
                    "Message in non-allowed channel. channel={} parent={}",
                    message.channel_id,
                    message.parent_channel_id.as_deref().unwrap_or("none")
                );
                return Outcome::NotAllowed;
            }
            Err(e) => return self.fail(HandlerError::Authorization(e), sink).await,
        };

        info!(
            "Processing message from {} in channel={} base={}",
            message.author_name, message.channel_id, channel_id
        );

        let generated = match self.generate(message, &channel_id, sink).await {
            Ok(generated) => generated,
            Err(error) => return self.fail(error, sink).await,
        };

        let chunks = split_message(&generated.response, DISCORD_MESSAGE_LIMIT);
        let mut first_reply_id = None;
        let mut delivered: Vec<&str> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if chunk.trim().is_empty() {
                continue;
            }
            match sink.send(chunk).await {
                Ok(id) => {
                    if first_reply_id.is_none() {
                        first_reply_id = id;
                    }
                    delivered.push(chunk);
                }
                Err(cause) => {
                    let sent = delivered.len();
                    let error = HandlerError::Delivery { sent, cause };
                    if sent > 0 {
                        error!("Error handling message {}: {}", message.message_id, error);
                        return Outcome::Failed {
                            error,
                            apology_sent: false,
                        };
                    }
                    return self.fail(error, sink).await;
                }
            }
        }

        let sent = delivered.len();
        info!(
            "Replied with {} chunk(s) in channel={} base={}",
            sent, message.channel_id, channel_id
        );

        let assistant_id = first_reply_id.unwrap_or_else(|| format!("{}-bot", message.message_id));
        let job = PersistJob {
            user: NewMessage {
                channel_id: channel_id.clone(),
                message_id: message.message_id.clone(),
                author_id: message.author_id.clone(),
                author_name: message.author_name.clone(),
                content: message.content.clone(),
                role: Role::User,
                server_id: message.server_id.clone(),
                timestamp: message.timestamp,
            },
            assistant: NewMessage {
                channel_id: channel_id.clone(),
                message_id: assistant_id,
                author_id: self.bot.id.clone(),
                author_name: self.bot.name.clone(),
                content: delivered.join("\n"),
                role: Role::Assistant,
                server_id: message.server_id.clone(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            channel_id,
            server_id: message.server_id.clone(),
            prior_summary: generated.prior_summary,
        };

        let store = Arc::clone(&self.store);
        let summarizer = self.summarizer.clone();
        let persistence = tokio::spawn(async move { job.run(store.as_ref(), &summarizer).await });

        Outcome::Replied {
            chunks: sent,
            persistence,
        }
    }

    /// The message's own channel if allowed, otherwise its thread parent if allowed.
    async fn effective_channel(&self, message: &InboundMessage) -> anyhow::Result<Option<String>> {
        if self.store.is_channel_allowed(&message.channel_id).await? {
            return Ok(Some(message.channel_id.clone()));
        }
        if let Some(parent) = &message.parent_channel_id {
            if self.store.is_channel_allowed(parent).await? {
                return Ok(Some(parent.clone()));
            }
        }
        Ok(None)
    }

    async fn generate(
        &self,
        message: &InboundMessage,
        channel_id: &str,
        sink: &dyn ReplySink,
    ) -> Result<Generated, HandlerError> {
        let context = ConversationContext::load(self.store.as_ref(), channel_id, self.recent_window)
            .await
            .map_err(HandlerError::ContextLoad)?;

        let retrieved = self.retrieve(&message.content).await;
        let recent = context.recent_text();
        let prompt = build_prompt(&PromptContext {
            instructions: &context.instructions.text,
            summary: context.summary_text(),
            recent_messages: &recent,
            user_message: &message.content,
            retrieved: retrieved.as_deref(),
        });
        debug!("Prompt built for channel={}: ~{} tokens", channel_id, estimate_tokens(&prompt));

        sink.start_typing().await;

        let response = self
            .llm
            .complete(&prompt)
            .await
            .filter(|text| !text.trim().is_empty())
            .ok_or(HandlerError::EmptyCompletion)?;

        Ok(Generated {
            prior_summary: context.summary_text().to_string(),
            response,
        })
    }

    async fn retrieve(&self, query: &str) -> Option<String> {
        let provider = self.retrieval.as_ref()?;
        match provider.retrieve(query).await {
            Ok(knowledge) => knowledge,
            Err(e) => {
                warn!("Knowledge retrieval failed, continuing without it: {:#}", e);
                None
            }
        }
    }

    async fn fail(&self, error: HandlerError, sink: &dyn ReplySink) -> Outcome {
        error!("Error handling message: {}", error);
        let apology = match error {
            HandlerError::EmptyCompletion => COMPLETION_APOLOGY,
            _ => GENERIC_APOLOGY,
        };
        let apology_sent = match sink.send(apology).await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to send error reply: {:#}", e);
                false
            }
        };
        Outcome::Failed {
            error,
            apology_sent,
        }
    }
}

/// Work that runs after the reply is out. Every failure is logged and dropped.
struct PersistJob {
    user: NewMessage,
    assistant: NewMessage,
    channel_id: String,
    server_id: Option<String>,
    prior_summary: String,
}

impl PersistJob {
    async fn run(self, store: &dyn ContextStore, summarizer: &SummaryUpdater) {
        let PersistJob {
            user,
            assistant,
            channel_id,
            server_id,
            prior_summary,
        } = self;
        let user_content = user.content.clone();
        let assistant_content = assistant.content.clone();

        if let Err(e) = store.append_message(user).await {
            error!("Failed to log user message: {:#}", e);
        }
        if let Err(e) = store.append_message(assistant).await {
            error!("Failed to log bot message: {:#}", e);
        }

        let result = update_memory(
            store,
            summarizer,
            &channel_id,
            server_id.as_deref(),
            &prior_summary,
            &user_content,
            &assistant_content,
        )
        .await;
        if let Err(e) = result {
            error!(
                "Failed to update summary or message count for channel={}: {:#}",
                channel_id, e
            );
        }
    }
}

async fn update_memory(
    store: &dyn ContextStore,
    summarizer: &SummaryUpdater,
    channel_id: &str,
    server_id: Option<&str>,
    prior_summary: &str,
    user_content: &str,
    assistant_content: &str,
) -> anyhow::Result<()> {
    let count = store
        .increment_message_count(channel_id, MESSAGES_PER_EXCHANGE, server_id)
        .await?;
    info!("Message count incremented to {} for channel={}", count, channel_id);

    if !should_summarize(count) {
        debug!("Summary trigger not reached at message_count={}", count);
        return Ok(());
    }

    info!("Summary trigger activated at message_count={}", count);
    let updated = summarizer
        .update_summary(prior_summary, user_content, assistant_content)
        .await;
    let stored = store
        .upsert_summary(
            channel_id,
            SummaryUpdate {
                summary: Some(updated),
                message_count: None,
            },
            server_id,
        )
        .await?;
    if stored {
        info!("Summary stored at message_count={} for channel={}", count, channel_id);
    } else {
        warn!("Channel {} was reset during summary refresh, dropping summary", channel_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::testing::{RecordingSink, ScriptedLlm};
    use async_trait::async_trait;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn handler(db: &Database, llm: Arc<ScriptedLlm>) -> MessageHandler {
        MessageHandler::new(
            Arc::new(db.clone()),
            llm,
            BotIdentity {
                id: "999".to_string(),
                name: "Rollcord".to_string(),
            },
        )
    }

    fn inbound(channel: &str, id: &str, content: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.to_string(),
            channel_id: channel.to_string(),
            parent_channel_id: None,
            server_id: Some("G1".to_string()),
            author_id: "42".to_string(),
            author_name: "alice".to_string(),
            author_is_bot: false,
            content: content.to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn replies(text: &str) -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm::new(vec![Some(text.to_string())]))
    }

    async fn expect_replied(outcome: Outcome) -> usize {
        match outcome {
            Outcome::Replied {
                chunks,
                persistence,
            } => {
                persistence.await.unwrap();
                chunks
            }
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bot_and_blank_messages_are_filtered() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let llm = replies("hi");
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        let mut from_bot = inbound("C1", "m1", "hello");
        from_bot.author_is_bot = true;
        assert!(matches!(handler.handle(&from_bot, &sink).await, Outcome::Filtered));

        let blank = inbound("C1", "m2", "   \n");
        assert!(matches!(handler.handle(&blank, &sink).await, Outcome::Filtered));

        assert!(llm.prompts().is_empty());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_channel_not_allowed_is_ignored() {
        let db = test_db();
        let llm = replies("hi");
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        let outcome = handler.handle(&inbound("C1", "m1", "hello"), &sink).await;

        assert!(matches!(outcome, Outcome::NotAllowed));
        assert!(llm.prompts().is_empty());
        assert!(sink.sent().is_empty());
        assert!(db.get_summary("C1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_below_trigger_only_counts() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.increment_message_count("C1", 9, None).unwrap();
        let llm = replies("Sure thing.");
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        let outcome = handler.handle(&inbound("C1", "m1", "Can you help?"), &sink).await;
        assert_eq!(expect_replied(outcome).await, 1);

        assert_eq!(sink.sent(), vec!["Sure thing."]);
        let summary = db.get_summary("C1").unwrap().unwrap();
        assert_eq!(summary.message_count, 11);
        assert_eq!(summary.summary, "");
        // Only the reply completion, no summary refresh
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_exchange_reaching_trigger_refreshes_summary() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.increment_message_count("C1", 8, None).unwrap();
        db.upsert_summary(
            "C1",
            &SummaryUpdate {
                summary: Some("User is learning Rust.".to_string()),
                message_count: None,
            },
            None,
        )
        .unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Some("Use an Arc<Mutex<_>>.".to_string()),
            Some("User is learning Rust and asked about shared state.".to_string()),
        ]));
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        let outcome = handler
            .handle(&inbound("C1", "m1", "How do I share state?"), &sink)
            .await;
        expect_replied(outcome).await;

        let summary = db.get_summary("C1").unwrap().unwrap();
        assert_eq!(summary.message_count, 10);
        assert_eq!(
            summary.summary,
            "User is learning Rust and asked about shared state."
        );

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("User is learning Rust."));
        assert!(prompts[1].contains("EXISTING SUMMARY:\nUser is learning Rust."));
        assert!(prompts[1].contains("User: How do I share state?"));
        assert!(prompts[1].contains("Assistant: Use an Arc<Mutex<_>>."));
    }

    #[tokio::test]
    async fn test_reset_restores_no_record_state() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.increment_message_count("C1", 18, None).unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Some("first".to_string()),
            Some("Summary of the chat.".to_string()),
            Some("second".to_string()),
        ]));
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        expect_replied(handler.handle(&inbound("C1", "m1", "one"), &sink).await).await;
        assert_eq!(db.get_summary("C1").unwrap().unwrap().message_count, 20);

        db.reset_summary("C1").unwrap();
        assert!(db.get_summary("C1").unwrap().is_none());

        expect_replied(handler.handle(&inbound("C1", "m2", "two"), &sink).await).await;
        let summary = db.get_summary("C1").unwrap().unwrap();
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.summary, "");
        assert!(llm.prompts()[2].contains("No previous context."));
    }

    #[tokio::test]
    async fn test_completion_failure_sends_apology() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![None]));
        let handler = handler(&db, llm);
        let sink = RecordingSink::new();

        let outcome = handler.handle(&inbound("C1", "m1", "hello"), &sink).await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: HandlerError::EmptyCompletion,
                apology_sent: true
            }
        ));
        assert_eq!(sink.sent(), vec![COMPLETION_APOLOGY]);
        assert!(db.get_summary("C1").unwrap().is_none());
        assert!(db.get_recent_messages("C1", 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_load_failure_sends_single_apology() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.execute_batch("DROP TABLE summaries").unwrap();
        let llm = replies("unused");
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        let outcome = handler.handle(&inbound("C1", "m1", "hello"), &sink).await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: HandlerError::ContextLoad(_),
                apology_sent: true
            }
        ));
        assert_eq!(sink.sent(), vec![GENERIC_APOLOGY]);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_skips_persistence() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let handler = handler(&db, replies("hello back"));
        let sink = RecordingSink::failing_after(0);

        let outcome = handler.handle(&inbound("C1", "m1", "hello"), &sink).await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: HandlerError::Delivery { sent: 0, .. },
                apology_sent: false
            }
        ));
        assert!(db.get_summary("C1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_thread_uses_parent_channel_memory() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let handler = handler(&db, replies("threaded answer"));
        let sink = RecordingSink::new();

        let mut message = inbound("T1", "m1", "question in a thread");
        message.parent_channel_id = Some("C1".to_string());
        expect_replied(handler.handle(&message, &sink).await).await;

        assert_eq!(db.get_summary("C1").unwrap().unwrap().message_count, 2);
        assert!(db.get_summary("T1").unwrap().is_none());
        let logged = db.get_recent_messages("C1", 5).unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].content, "question in a thread");
        assert_eq!(logged[1].author, "Rollcord");
    }

    #[tokio::test]
    async fn test_long_reply_is_split_and_logged_once() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let response = (0..120)
            .map(|i| format!("Step {}: do the next thing carefully and check it.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let handler = handler(&db, replies(&response));
        let sink = RecordingSink::new();

        let chunks = expect_replied(handler.handle(&inbound("C1", "m1", "plan?"), &sink).await).await;

        assert!(chunks > 1);
        let sent = sink.sent();
        assert!(sent.iter().all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(sent.join("\n"), response);

        let logged = db.get_recent_messages("C1", 5).unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].content, response);
    }

    #[tokio::test]
    async fn test_prompt_includes_stored_context() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.set_instructions("Always answer in French.").unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Some("Bonjour".to_string()),
            Some("Salut".to_string()),
        ]));
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        expect_replied(handler.handle(&inbound("C1", "m1", "hello"), &sink).await).await;
        expect_replied(handler.handle(&inbound("C1", "m2", "how are you"), &sink).await).await;

        let prompts = llm.prompts();
        assert!(prompts[0].contains("Always answer in French."));
        assert!(prompts[0].contains("No recent messages."));
        assert!(prompts[1].contains("alice: hello\nRollcord: Bonjour"));
        assert!(prompts[1].contains("USER'S CURRENT MESSAGE:\nhow are you"));
    }

    #[tokio::test]
    async fn test_instruction_changes_apply_to_next_message() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Some("a".to_string()), Some("b".to_string())]));
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        db.set_instructions("Version one.").unwrap();
        expect_replied(handler.handle(&inbound("C1", "m1", "x"), &sink).await).await;
        db.set_instructions("Version two.").unwrap();
        expect_replied(handler.handle(&inbound("C1", "m2", "y"), &sink).await).await;

        let prompts = llm.prompts();
        assert!(prompts[0].contains("Version one."));
        assert!(prompts[1].contains("Version two."));
    }

    #[tokio::test]
    async fn test_failed_summary_refresh_keeps_previous_summary() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.increment_message_count("C1", 8, None).unwrap();
        db.upsert_summary(
            "C1",
            &SummaryUpdate {
                summary: Some("User is learning Rust.".to_string()),
                message_count: None,
            },
            None,
        )
        .unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Some("Here you go.".to_string()), None]));
        let handler = handler(&db, llm.clone());
        let sink = RecordingSink::new();

        expect_replied(handler.handle(&inbound("C1", "m1", "Any tips?"), &sink).await).await;

        let summary = db.get_summary("C1").unwrap().unwrap();
        assert_eq!(summary.message_count, 10);
        assert_eq!(summary.summary, "User is learning Rust.");
        assert_eq!(llm.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_chunks_are_neither_sent_nor_logged() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let first = "a".repeat(DISCORD_MESSAGE_LIMIT - 1);
        let second = "b".repeat(DISCORD_MESSAGE_LIMIT - 1);
        let response = format!("{}\n   \n{}", first, second);
        let handler = handler(&db, replies(&response));
        let sink = RecordingSink::new();

        let chunks = expect_replied(handler.handle(&inbound("C1", "m1", "go"), &sink).await).await;

        assert_eq!(chunks, 2);
        assert_eq!(sink.sent(), vec![first.clone(), second.clone()]);
        let logged = db.get_recent_messages("C1", 5).unwrap();
        assert_eq!(logged[1].content, format!("{}\n{}", first, second));
    }

    /// Real database underneath, but the message log always fails.
    struct BrokenLog(Database);

    #[async_trait]
    impl ContextStore for BrokenLog {
        async fn is_channel_allowed(&self, channel_id: &str) -> anyhow::Result<bool> {
            ContextStore::is_channel_allowed(&self.0, channel_id).await
        }

        async fn get_instructions(&self) -> anyhow::Result<crate::db::SystemInstructions> {
            ContextStore::get_instructions(&self.0).await
        }

        async fn get_summary(
            &self,
            channel_id: &str,
        ) -> anyhow::Result<Option<crate::db::ConversationSummary>> {
            ContextStore::get_summary(&self.0, channel_id).await
        }

        async fn upsert_summary(
            &self,
            channel_id: &str,
            update: SummaryUpdate,
            server_id: Option<&str>,
        ) -> anyhow::Result<bool> {
            ContextStore::upsert_summary(&self.0, channel_id, update, server_id).await
        }

        async fn increment_message_count(
            &self,
            channel_id: &str,
            by: u64,
            server_id: Option<&str>,
        ) -> anyhow::Result<u64> {
            ContextStore::increment_message_count(&self.0, channel_id, by, server_id).await
        }

        async fn append_message(&self, _message: NewMessage) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn get_recent_messages(
            &self,
            channel_id: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<crate::db::RecentMessage>> {
            ContextStore::get_recent_messages(&self.0, channel_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_log_failure_still_counts_exchange() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let handler = MessageHandler::new(
            Arc::new(BrokenLog(db.clone())),
            replies("Still here."),
            BotIdentity {
                id: "999".to_string(),
                name: "Rollcord".to_string(),
            },
        );
        let sink = RecordingSink::new();

        let outcome = handler.handle(&inbound("C1", "m1", "hello"), &sink).await;
        expect_replied(outcome).await;

        assert_eq!(sink.sent(), vec!["Still here."]);
        assert!(db.get_recent_messages("C1", 5).unwrap().is_empty());
        assert_eq!(db.get_summary("C1").unwrap().unwrap().message_count, 2);
    }

    struct StaticKnowledge(Option<&'static str>);

    #[async_trait]
    impl RetrievalProvider for StaticKnowledge {
        async fn retrieve(&self, _query: &str) -> anyhow::Result<Option<String>> {
            match self.0 {
                Some(text) => Ok(Some(text.to_string())),
                None => anyhow::bail!("index offline"),
            }
        }
    }

    #[tokio::test]
    async fn test_retrieved_knowledge_is_optional() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        let sink = RecordingSink::new();

        let llm = replies("ok");
        let with_knowledge = handler(&db, llm.clone())
            .with_retrieval(Arc::new(StaticKnowledge(Some("1. [faq.md] Doors open at 9."))));
        expect_replied(with_knowledge.handle(&inbound("C1", "m1", "when?"), &sink).await).await;
        assert!(llm.prompts()[0].contains("1. [faq.md] Doors open at 9."));

        let llm = replies("ok");
        let broken = handler(&db, llm.clone()).with_retrieval(Arc::new(StaticKnowledge(None)));
        expect_replied(broken.handle(&inbound("C1", "m2", "when?"), &sink).await).await;
        assert!(llm.prompts()[0].contains("No retrieved knowledge for this query."));
    }

    #[tokio::test]
    async fn test_channels_are_processed_independently() {
        let db = test_db();
        db.add_allowed_channel("C1", None, None).unwrap();
        db.add_allowed_channel("C2", None, None).unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Some("one".to_string()), Some("two".to_string())]));
        let handler = handler(&db, llm);
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();

        let msg_a = inbound("C1", "a1", "hello from C1");
        let msg_b = inbound("C2", "b1", "hello from C2");
        let (a, b) = tokio::join!(handler.handle(&msg_a, &sink_a), handler.handle(&msg_b, &sink_b));
        expect_replied(a).await;
        expect_replied(b).await;

        assert_eq!(sink_a.sent().len(), 1);
        assert_eq!(sink_b.sent().len(), 1);
        assert_eq!(db.get_summary("C1").unwrap().unwrap().message_count, 2);
        assert_eq!(db.get_summary("C2").unwrap().unwrap().message_count, 2);
    }
}
