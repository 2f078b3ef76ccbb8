//! LLM second pass: a second opinion on the deterministic parse.
//!
//! The LLM output is never authoritative for constraint application; the
//! cross-check diff is recorded on the contract for operator review and
//! the deterministic parse remains the source of truth.

use quayside_protocol::config::LlmConfig;
use quayside_protocol::{defaults, Clause, LlmAgreement};
use quayside_registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm endpoint returned {status}: {detail}")]
    Endpoint { status: u16, detail: String },
    #[error("llm response is not valid extraction json: {0}")]
    BadResponse(String),
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
}

/// One clause as reported by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmClause {
    pub clause_id: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub section_ref: Option<String>,
}

/// Extraction shape the model must return (`response_format: json_object`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmExtraction {
    #[serde(default)]
    pub clauses: Vec<LlmClause>,
    #[serde(default)]
    pub family_id: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Rate-limited client for the chat-completions endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    limiter: Arc<Semaphore>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            limiter: Arc::new(Semaphore::new(defaults::MAX_INFLIGHT_LLM_CALLS)),
        }
    }

    /// Run the second pass over one document.
    pub async fn second_pass(
        &self,
        text: &str,
        snapshot: &RegistrySnapshot,
    ) -> Result<LlmExtraction, LlmError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| LlmError::Transport("limiter closed".to_string()))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(snapshot),
                },
                ChatMessage {
                    role: "user",
                    content: text.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let deadline = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(
            deadline,
            self.http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| LlmError::Timeout(deadline))?
        .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Endpoint {
                status: status.as_u16(),
                detail,
            });
        }
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| LlmError::BadResponse("no choices in response".to_string()))?;
        serde_json::from_str(content).map_err(|e| LlmError::BadResponse(e.to_string()))
    }
}

/// Serialised clause inventory and family catalogue for the system prompt.
fn system_prompt(snapshot: &RegistrySnapshot) -> String {
    let clause_ids: Vec<&str> = snapshot
        .canonical_clauses()
        .map(|c| c.clause_id.as_str())
        .collect();
    let family_ids: Vec<&str> = snapshot
        .family_signatures()
        .map(|f| f.family_id.as_str())
        .collect();
    format!(
        "You extract structured clauses from commodity contracts. \
         Respond with a JSON object {{\"clauses\": [{{\"clause_id\", \"parameter\", \
         \"value\", \"unit\", \"section_ref\"}}], \"family_id\"}}. \
         Recognised clause ids: {}. Recognised families: {}.",
        clause_ids.join(", "),
        family_ids.join(", ")
    )
}

/// Diff the deterministic clauses against the model's. The result is
/// recorded on the contract; it never alters the deterministic output.
pub fn cross_check(deterministic: &[Clause], llm: &LlmExtraction) -> LlmAgreement {
    let det_ids: BTreeSet<&str> = deterministic.iter().map(|c| c.clause_id.as_str()).collect();
    let llm_ids: BTreeSet<&str> = llm.clauses.iter().map(|c| c.clause_id.as_str()).collect();
    LlmAgreement {
        matched: det_ids.intersection(&llm_ids).map(|s| s.to_string()).collect(),
        deterministic_only: det_ids.difference(&llm_ids).map(|s| s.to_string()).collect(),
        llm_only: llm_ids.difference(&det_ids).map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_protocol::Confidence;
    use quayside_registry::TemplateRegistry;

    #[test]
    fn test_cross_check_partitions() {
        let deterministic = vec![
            Clause::new("PRICE", "commercial", "t", "Section 5", Confidence::High),
            Clause::new("DEMURRAGE", "shipping", "t", "Section 9", Confidence::High),
        ];
        let llm = LlmExtraction {
            clauses: vec![
                LlmClause {
                    clause_id: "PRICE".to_string(),
                    parameter: None,
                    value: Some(335.0),
                    unit: None,
                    section_ref: None,
                },
                LlmClause {
                    clause_id: "SANCTIONS".to_string(),
                    parameter: None,
                    value: None,
                    unit: None,
                    section_ref: None,
                },
            ],
            family_id: None,
        };
        let agreement = cross_check(&deterministic, &llm);
        assert_eq!(agreement.matched, vec!["PRICE".to_string()]);
        assert_eq!(agreement.deterministic_only, vec!["DEMURRAGE".to_string()]);
        assert_eq!(agreement.llm_only, vec!["SANCTIONS".to_string()]);
    }

    #[test]
    fn test_system_prompt_names_inventory() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let prompt = system_prompt(&snapshot);
        assert!(prompt.contains("PRICE"));
        assert!(prompt.contains("vessel_purchase_fob"));
        assert!(prompt.contains("json"));
    }

    #[test]
    fn test_extraction_deserialises_from_model_content() {
        let content = r#"{"clauses":[{"clause_id":"PRICE","value":335.0,"unit":"$/ton"}],"family_id":"vessel_purchase_fob"}"#;
        let extraction: LlmExtraction = serde_json::from_str(content).unwrap();
        assert_eq!(extraction.clauses.len(), 1);
        assert_eq!(extraction.clauses[0].value, Some(335.0));
        assert_eq!(extraction.family_id.as_deref(), Some("vessel_purchase_fob"));
    }
}
