//! Evaluates a free-text smart-rule condition against a specific tool call.
//!
//! Calls the configured LLM endpoint with a strict-schema system prompt; on
//! any transport error, malformed response, timeout, or cancellation falls
//! back to a deterministic keyword-overlap heuristic. Never stores the
//! result — caching is a caller concern outside this crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const SYSTEM_PROMPT: &str = "You decide whether a free-text policy condition applies to a tool call. \
Respond with strict JSON only: {\"matches\": bool, \"reason\": string}. No other text.";

const SENSITIVE_PATTERNS: &[&str] = &[
    ".env", "password", "credential", "api key", "api_key", "ssh", "id_rsa", "/etc/passwd", "/etc/shadow",
];

const STOPWORDS: &[&str] = &[
    "the", "this", "that", "with", "from", "into", "onto", "block", "blocks", "blocking", "deny", "denies", "any",
    "targeting", "when", "where", "which", "calls", "tool", "tools",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartRuleVerdict {
    pub matches: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SmartRuleConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct LlmRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<LlmMessage<'a>>,
}

#[derive(Serialize)]
struct LlmMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct LlmChoice {
    message: LlmChoiceMessage,
}

#[derive(Deserialize)]
struct LlmChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct LlmResponse {
    choices: Vec<LlmChoice>,
}

pub struct SmartRuleEvaluator {
    http: reqwest::Client,
    config: SmartRuleConfig,
}

impl SmartRuleEvaluator {
    pub fn new(config: SmartRuleConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    /// Never errors: any failure path resolves to the fallback heuristic.
    pub async fn evaluate(
        &self,
        tool_name: &str,
        args: &Value,
        condition: &str,
        cancel: &CancellationToken,
    ) -> SmartRuleVerdict {
        if let Some(endpoint) = self.config.endpoint.as_deref() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(tool_name, "smart rule evaluation cancelled, using fallback");
                }
                result = self.call_llm(endpoint, tool_name, args, condition) => {
                    match result {
                        Ok(verdict) => return verdict,
                        Err(err) => tracing::debug!(error = %err, "smart rule llm call failed, using fallback"),
                    }
                }
            }
        }
        fallback_heuristic(args, condition)
    }

    async fn call_llm(&self, endpoint: &str, tool_name: &str, args: &Value, condition: &str) -> Result<SmartRuleVerdict, reqwest::Error> {
        let user_prompt = format!(
            "Condition: {condition}\nTool: {tool_name}\nArguments (JSON): {}",
            serde_json::to_string(args).unwrap_or_default()
        );
        let body = LlmRequest {
            model: &self.config.model,
            temperature: 0.0,
            max_tokens: 200,
            messages: vec![
                LlmMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                LlmMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let mut request = self.http.post(endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let parsed: LlmResponse = response.json().await?;
        let raw = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        match serde_json::from_str::<SmartRuleVerdict>(raw) {
            Ok(verdict) => Ok(verdict),
            Err(_) => Ok(fallback_heuristic(args, condition)),
        }
    }
}

fn fallback_heuristic(args: &Value, condition: &str) -> SmartRuleVerdict {
    let condition_lower = condition.to_lowercase();
    let args_text = serde_json::to_string(args).unwrap_or_default().to_lowercase();

    let sensitive_mentioned: Vec<&str> = SENSITIVE_PATTERNS
        .iter()
        .filter(|p| condition_lower.contains(*p))
        .copied()
        .collect();

    if !sensitive_mentioned.is_empty() {
        let matched = sensitive_mentioned.iter().find(|p| args_text.contains(**p));
        return match matched {
            Some(pattern) => SmartRuleVerdict {
                matches: true,
                reason: format!("arguments mention sensitive pattern '{pattern}'"),
            },
            None => SmartRuleVerdict {
                matches: false,
                reason: "condition names sensitive patterns not present in arguments".to_string(),
            },
        };
    }

    let content_words: Vec<&str> = condition_lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(w))
        .collect();

    let matched_word = content_words.iter().find(|w| args_text.contains(**w));
    match matched_word {
        Some(word) => SmartRuleVerdict {
            matches: true,
            reason: format!("arguments contain condition keyword '{word}'"),
        },
        None => SmartRuleVerdict {
            matches: false,
            reason: "no condition keyword found in arguments".to_string(),
        },
    }
}
