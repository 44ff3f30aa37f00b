//! Completion Port and its adapters.
//!
//! A [`Completer`] answers prompts (optionally grounded in a context
//! string), runs slower "reasoning" prompts used for query rewriting and
//! judgment, and polishes finished answers. Adapters:
//!
//! - **[`OllamaCompleter`]**: `/api/chat` for chat and polish, `/api/generate`
//!   for reasoning.
//! - **[`OpenAiCompleter`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint (e.g. DeepSeek's `deepseek-chat` / `deepseek-reasoner`).
//! - **[`DisabledCompleter`]**: always fails.
//!
//! Chat and polish calls use `completion.timeout_secs`; reasoning calls use
//! the longer `completion.reasoning_timeout_secs`. A timeout is reported
//! like any other backend error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::http::{join_url, JsonClient};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.deepseek.com";

const GROUNDED_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question using \
the context below. Prefer information from the context when it is relevant, and keep the answer \
concise.\n\nContext:\n";

const GENERAL_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question.";

const POLISH_SYSTEM_PROMPT: &str = "You are a professional editor. Rewrite the text so it reads \
fluently and precisely. Keep the meaning unchanged and fix grammar and phrasing. Reply with the \
rewritten text only.";

const REASONER_SYSTEM_PROMPT: &str = "You are a reasoning model. Analyse the problem step by step, \
then put the final answer inside <answer></answer> tags.";

/// Generates text from prompts.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Answer `prompt`. When `context` is given it grounds the answer.
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String>;

    /// Run a deliberate multi-step prompt (rewriting, expansion, judgment).
    async fn reason(&self, prompt: &str, context: Option<&str>) -> Result<String>;

    /// Stylistic rewrite of finished text.
    async fn polish(&self, text: &str) -> Result<String>;
}

/// A completer that always fails.
pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    async fn complete(&self, _prompt: &str, _context: Option<&str>) -> Result<String> {
        bail!("Completion provider is disabled")
    }

    async fn reason(&self, _prompt: &str, _context: Option<&str>) -> Result<String> {
        bail!("Completion provider is disabled")
    }

    async fn polish(&self, _text: &str) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

fn grounded_system_prompt(context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("{}{}", GROUNDED_SYSTEM_PROMPT, ctx),
        _ => GENERAL_SYSTEM_PROMPT.to_string(),
    }
}

fn polish_prompt(text: &str) -> String {
    format!("Polish the following text.\n\nOriginal:\n{}\n\nPolished text:", text)
}

fn non_empty(content: Option<&str>, what: &str) -> Result<String> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        Some(_) => bail!("{} returned empty content", what),
        None => bail!("Invalid {} response: missing content", what),
    }
}

// ============ Ollama ============

/// Completer backed by a local Ollama server.
pub struct OllamaCompleter {
    base_url: String,
    chat_model: String,
    reasoning_model: String,
    chat: JsonClient,
    reasoning: JsonClient,
}

impl OllamaCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let chat_model = config
            .chat_model
            .clone()
            .context("completion.chat_model required for Ollama provider")?;
        let reasoning_model = config
            .reasoning_model()
            .unwrap_or(chat_model.as_str())
            .to_string();
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            chat_model,
            reasoning_model,
            chat: JsonClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?,
            reasoning: JsonClient::new(
                Duration::from_secs(config.reasoning_timeout_secs),
                config.max_retries,
            )?,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
        });
        let json = self
            .chat
            .post(&join_url(&self.base_url, "/api/chat"), None, &body)
            .await?;
        non_empty(
            json.pointer("/message/content").and_then(Value::as_str),
            "Ollama chat",
        )
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        self.chat(&grounded_system_prompt(context), prompt).await
    }

    async fn reason(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        let prompt = match context {
            Some(ctx) if !ctx.trim().is_empty() => format!(
                "Context:\n{}\n\nQuestion:\n{}\n\nReason about it first, then give the answer.",
                ctx, prompt
            ),
            _ => prompt.to_string(),
        };
        let body = json!({
            "model": self.reasoning_model,
            "prompt": prompt,
            "stream": false,
        });
        let json = self
            .reasoning
            .post(&join_url(&self.base_url, "/api/generate"), None, &body)
            .await?;
        non_empty(
            json.get("response").and_then(Value::as_str),
            "Ollama generate",
        )
    }

    async fn polish(&self, text: &str) -> Result<String> {
        let polished = self.chat(POLISH_SYSTEM_PROMPT, &polish_prompt(text)).await?;
        Ok(polished.trim().to_string())
    }
}

// ============ OpenAI-compatible ============

/// Completer backed by an OpenAI-compatible `/chat/completions` endpoint.
///
/// The bearer key is read from the environment variable named by
/// `completion.api_key_env`.
pub struct OpenAiCompleter {
    base_url: String,
    api_key: String,
    chat_model: String,
    reasoning_model: String,
    chat: JsonClient,
    reasoning: JsonClient,
}

impl OpenAiCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let chat_model = config
            .chat_model
            .clone()
            .context("completion.chat_model required for OpenAI provider")?;
        let reasoning_model = config
            .reasoning_model()
            .unwrap_or(chat_model.as_str())
            .to_string();
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!("{} environment variable not set", config.api_key_env)
        })?;
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            chat_model,
            reasoning_model,
            chat: JsonClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?,
            reasoning: JsonClient::new(
                Duration::from_secs(config.reasoning_timeout_secs),
                config.max_retries,
            )?,
        })
    }

    async fn chat_completion(
        &self,
        client: &JsonClient,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
        });
        let json = client
            .post(
                &join_url(&self.base_url, "/chat/completions"),
                Some(&self.api_key),
                &body,
            )
            .await?;
        non_empty(
            json.pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            "chat completion",
        )
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        self.chat_completion(
            &self.chat,
            &self.chat_model,
            &grounded_system_prompt(context),
            prompt,
        )
        .await
    }

    async fn reason(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        let system = match context {
            Some(ctx) if !ctx.trim().is_empty() => {
                format!("{}\n\nReference context:\n{}", REASONER_SYSTEM_PROMPT, ctx)
            }
            _ => REASONER_SYSTEM_PROMPT.to_string(),
        };
        self.chat_completion(&self.reasoning, &self.reasoning_model, &system, prompt)
            .await
    }

    async fn polish(&self, text: &str) -> Result<String> {
        let polished = self
            .chat_completion(
                &self.chat,
                &self.chat_model,
                POLISH_SYSTEM_PROMPT,
                &polish_prompt(text),
            )
            .await?;
        Ok(polished.trim().to_string())
    }
}

/// Create the configured [`Completer`].
pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "ollama" => Ok(Arc::new(OllamaCompleter::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiCompleter::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

/// Reduce raw reasoning output to its final answer.
///
/// Drops `<think>…</think>` blocks (an unterminated block drops the rest of
/// the text) and, when an `<answer>` tag is present, keeps only its body.
pub fn final_answer(text: &str) -> String {
    let mut visible = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        visible.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    visible.push_str(rest);

    if let Some(start) = visible.find("<answer>") {
        let body = &visible[start + "<answer>".len()..];
        let body = match body.find("</answer>") {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim().to_string();
    }

    visible.trim().to_string()
}
