// src/summarize/ai.rs
// AI backend abstraction: prompt in, summary text out. One concrete provider
// (OpenAI chat completions) plus a deterministic mock selected by
// `AI_TEST_MODE=mock`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;

#[async_trait::async_trait]
pub trait AiClient: Send + Sync {
    /// Generate a summary for the composed prompt. Any transport, quota or
    /// malformed-response problem surfaces as an `Err`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynAiClient = Arc<dyn AiClient>;

/// Factory: build a client according to config and environment.
/// `AI_TEST_MODE=mock` returns a deterministic mock client.
pub fn build_ai_client(config: &AiConfig) -> DynAiClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockAi::fixed("Mock summary of recent activity."));
    }
    Arc::new(OpenAiClient::new(config))
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("repo-digest/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[async_trait::async_trait]
impl AiClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("no AI API key configured"));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You are a technical writing assistant who summarizes GitHub \
                   project activity. Produce a clear, structured Markdown update; \
                   keep original PR and release links; highlight the items marked \
                   high priority.";
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
            max_tokens: 2000,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("AI backend request")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("AI backend returned {status}"));
        }

        let body: Resp = resp.json().await.context("decoding AI response")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(anyhow!("AI backend returned an empty completion"));
        }
        Ok(content)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// --- Test helper ---

/// Deterministic client for tests/local runs. Records every prompt, can be
/// told to fail its next N calls, and can be slowed down to exercise timeouts.
pub struct MockAi {
    response: String,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    fail_next: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockAi {
    pub fn fixed(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn fail_next_calls(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AiClient for MockAi {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("mock AI failure"));
        }
        Ok(self.response.clone())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
