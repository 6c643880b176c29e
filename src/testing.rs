//! Test doubles shared by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::llm::CompletionProvider;
use crate::reply::ReplySink;

/// Returns queued responses in order, then `None`. Records every prompt.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Option<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses.lock().unwrap().pop_front().flatten()
    }
}

/// Captures sent chunks; optionally fails once `fail_after` chunks have gone out.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<String>>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(count: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_after: Some(count),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(&self, content: &str) -> anyhow::Result<Option<String>> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
            anyhow::bail!("transport unavailable");
        }
        sent.push(content.to_string());
        Ok(Some(format!("reply-{}", sent.len())))
    }
}
