use crate::llm::TextModel;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays canned replies in order and records every prompt it receives.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("script exhausted")),
        }
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
        self.next(prompt)
    }

    async fn generate_with_images(
        &self,
        _model: &str,
        prompt: &str,
        _images: Vec<String>,
    ) -> Result<String> {
        self.next(prompt)
    }
}
