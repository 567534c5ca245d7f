//! OpenAI-compatible HTTP clients for chat completions and embeddings.
//!
//! Works against any endpoint speaking the `/chat/completions` and
//! `/embeddings` wire format (OpenRouter, LM Studio, vLLM, ...).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{ChatClient, ChatCompletion, ChatRequest, EmbeddingsClient, Usage};

/// Connection parameters shared by both client kinds.
#[derive(Debug, Clone)]
pub struct OpenAiCompatOptions {
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub default_headers: HashMap<String, String>,
}

pub struct OpenAiCompatChat {
    opts: OpenAiCompatOptions,
    http: reqwest::Client,
}

impl OpenAiCompatChat {
    pub fn new(opts: OpenAiCompatOptions) -> Self {
        Self { opts, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatChat {
    fn provider(&self) -> &str {
        &self.opts.provider
    }

    fn model(&self) -> &str {
        &self.opts.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let url = format!("{}/chat/completions", normalize_base_url(&self.opts.base_url));
        let body = json!({
            "model": self.opts.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(0.2),
            "max_tokens": request.max_tokens,
        });

        let mut req = self.http.post(&url).json(&body);
        for (k, v) in &self.opts.default_headers {
            req = req.header(k, v);
        }
        if let Some(key) = &self.opts.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.with_context(|| format!("POST {url} failed"))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_else(|_| "<no body>".into());
            bail!("chat completion failed ({status}): {text}");
        }

        let raw: Value = res.json().await.context("invalid JSON from chat endpoint")?;
        Ok(completion_from_raw(raw))
    }
}

/// Extract text and usage from a raw `/chat/completions` response body.
/// Shared with the response cache, which replays stored raw bodies.
pub(crate) fn completion_from_raw(raw: Value) -> ChatCompletion {
    let text = raw["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let usage = map_usage(&raw["usage"]);
    ChatCompletion { text, usage, raw }
}

fn map_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    Some(Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64(),
        completion_tokens: usage["completion_tokens"].as_u64(),
        total_tokens: usage["total_tokens"].as_u64(),
    })
}

pub struct OpenAiCompatEmbeddings {
    opts: OpenAiCompatOptions,
    http: reqwest::Client,
}

impl OpenAiCompatEmbeddings {
    pub fn new(opts: OpenAiCompatOptions) -> Self {
        Self { opts, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl EmbeddingsClient for OpenAiCompatEmbeddings {
    fn provider(&self) -> &str {
        &self.opts.provider
    }

    fn model(&self) -> &str {
        &self.opts.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", normalize_base_url(&self.opts.base_url));
        let body = json!({ "model": self.opts.model, "input": texts });

        let mut req = self.http.post(&url).json(&body);
        for (k, v) in &self.opts.default_headers {
            req = req.header(k, v);
        }
        if let Some(key) = &self.opts.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.with_context(|| format!("POST {url} failed"))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_else(|_| "<no body>".into());
            bail!("embeddings request failed ({status}): {text}");
        }

        let raw: Value = res.json().await.context("invalid JSON from embeddings endpoint")?;
        let data = raw["data"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .map(|a| a.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
                .unwrap_or_default();
            if vector.is_empty() {
                bail!("embeddings response item missing 'embedding' array");
            }
            out.push(vector);
        }
        Ok(out)
    }
}

fn normalize_base_url(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
