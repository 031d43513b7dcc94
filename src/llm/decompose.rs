//! LLM-powered query decomposition.
//!
//! Sends one fixed instruction to the configured model and parses the reply
//! as a [`Decomposition`]. The model gives no structured-output guarantee, so
//! the reply is scraped defensively: an optional markdown fence is stripped
//! and any parse or transport failure yields the one-subquery fallback. The
//! decomposer never errors to its caller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::Decomposition;

const DECOMPOSITION_PROMPT: &str = "You are a geospatial data analyst expert. Your task is to \
decompose a natural language query into multiple searchable concepts.

Given a user query about geospatial or demographic data, identify:
1. PRIMARY variables - The main data the user wants (e.g., poverty rates, income, housing)
2. NORMALIZATION variables - Data needed to normalize/compute ratios (e.g., population, area)
3. FILTER variables - Criteria for filtering results (e.g., rural, urban, above threshold)
4. GEOGRAPHIC scope - The geographic level (county, state, tract, block group)
5. TEMPORAL scope - Time period if mentioned
6. RELATED concepts - Variables that might be semantically related to expand the search

Return a JSON object with this structure:
{
    \"primary_concepts\": [\"concept1\", \"concept2\"],
    \"normalization_concepts\": [\"concept1\"],
    \"filter_concepts\": [\"concept1\"],
    \"geographic_level\": \"county|state|tract|blockgroup|null\",
    \"temporal_filter\": {\"start\": \"year\", \"end\": \"year\"} or null,
    \"related_concepts\": [\"concept1\", \"concept2\"],
    \"search_queries\": [
        {\"query\": \"search term 1\", \"purpose\": \"primary|normalization|filter|related\"},
        {\"query\": \"search term 2\", \"purpose\": \"primary|normalization|filter|related\"}
    ]
}

User Query: ";

pub struct QueryDecomposer {
    client: reqwest::Client,
    config: LlmConfig,
}

impl QueryDecomposer {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    /// Decompose a natural-language query. Never fails: any transport or
    /// parse problem is logged and the single-subquery fallback returned.
    pub async fn decompose(&self, query: &str) -> Decomposition {
        let prompt = format!("{DECOMPOSITION_PROMPT}{query}\n\nReturn ONLY valid JSON, no other text.");

        let response = match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, &prompt).await,
            "openai" => call_openai(&self.client, &self.config, &prompt).await,
            other => Err(anyhow::anyhow!("Unknown LLM provider: {other}")),
        };

        let content = match response {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Query decomposition call failed: {e}");
                return Decomposition::fallback(query);
            }
        };

        match parse_decomposition(&content) {
            Some(decomposition) => {
                tracing::info!(
                    "Decomposed query into {} search terms",
                    decomposition.search_queries.len()
                );
                decomposition
            }
            None => {
                tracing::error!("Failed to parse decomposition JSON. Raw: {content}");
                Decomposition::fallback(query)
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::pipeline::Decomposer for QueryDecomposer {
    async fn decompose(&self, query: &str) -> Result<Decomposition> {
        Ok(QueryDecomposer::decompose(self, query).await)
    }
}

fn parse_decomposition(content: &str) -> Option<Decomposition> {
    serde_json::from_str(strip_code_fence(content).trim()).ok()
}

/// Take the content of a leading ```` ```json ```` (or generic ```` ``` ````)
/// fence up to the next fence; pass anything unfenced through unchanged.
fn strip_code_fence(content: &str) -> &str {
    for marker in ["```json", "```"] {
        if let Some(start) = content.find(marker) {
            let rest = &content[start + marker.len()..];
            return match rest.find("```") {
                Some(end) => &rest[..end],
                None => rest,
            };
        }
    }
    content
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

async fn call_ollama(client: &reqwest::Client, config: &LlmConfig, prompt: &str) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages: vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
        stream: false,
        options: OllamaOptions {
            temperature: config.temperature,
        },
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama chat API for decomposition")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp.json().await?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

async fn call_openai(client: &reqwest::Client, config: &LlmConfig, prompt: &str) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages: vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
        temperature: config.temperature,
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API for decomposition")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp.json().await?;
    Ok(body
        .choices
        .first()
        .map(|c| c.message.content.clone())
        .unwrap_or_default())
}
