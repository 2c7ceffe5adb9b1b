// SPDX-License-Identifier: MIT OR Apache-2.0

//! README summarization through an OpenAI-compatible chat endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::retry::{RemoteFailure, RetryPolicy};
use crate::config::{RemoteConfig, SummarizerConfig};

const SYSTEM_PROMPT: &str = "You are an expert in software and programming who writes precise, \
     complete abstracts of GitHub repository README files.";

const USER_PROMPT: &str = "Summarize the following README text. Leave out non-essential material \
     such as how to contribute or donate, and focus on what the repository is and what it can do. \
     Keep the summary under 50 words:";

/// Turns long text into a short abstract.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, RemoteFailure>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Summarizer backed by `POST {base_url}/chat/completions`.
pub struct ChatSummarizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_chars: usize,
    max_tokens: usize,
    temperature: f32,
    retry: RetryPolicy,
}

impl ChatSummarizer {
    /// Returns `Ok(None)` when no API key is configured; summaries are then left empty.
    pub fn from_config(config: &SummarizerConfig, remote: &RemoteConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key() else {
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .context("Summarizer API key contains invalid characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(remote.timeout())
            .build()
            .context("Failed to build summarizer HTTP client")?;

        Ok(Some(Self {
            client,
            base_url: config.base_url().to_string(),
            model: config.model().to_string(),
            max_chars: config.max_chars(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            retry: remote.retry_policy(),
        }))
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, RemoteFailure> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteFailure::from_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteFailure::permanent(format!("parse completion: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, RemoteFailure> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        let prompt = build_user_prompt(text, self.max_chars);
        self.retry
            .run("summarize", || self.complete_once(&prompt))
            .await
    }
}

fn build_user_prompt(text: &str, max_chars: usize) -> String {
    format!("{} {}", USER_PROMPT, truncate_chars(text, max_chars))
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 0), "");
    }

    #[test]
    fn prompt_carries_truncated_text() {
        let text = "x".repeat(5000);
        let prompt = build_user_prompt(&text, 4000);
        assert!(prompt.starts_with(USER_PROMPT));
        assert_eq!(prompt.len(), USER_PROMPT.len() + 1 + 4000);
    }

    #[test]
    fn disabled_without_api_key() {
        let summarizer =
            ChatSummarizer::from_config(&SummarizerConfig::default(), &RemoteConfig::default())
                .unwrap();
        assert!(summarizer.is_none());
    }

    #[test]
    fn parses_completion_shape() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":" A fast tool. "}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some(" A fast tool. ")
        );
    }
}
