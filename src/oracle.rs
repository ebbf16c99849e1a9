//! Generation Oracle
//!
//! Turns a problem statement into candidate program text:
//! - [`CodeOracle`] is the seam the solver talks to
//! - [`OllamaClient`] implements it against Ollama's `/api/generate`
//! - [`extract_code`] pulls the program out of a fenced reply
//!
//! The prompt lists the capability catalog so the model knows which names
//! it may use. This is advice only; the sandbox enforces the catalog.

use crate::catalog::CapabilityCatalog;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// System instruction sent with every generation request
pub const SYSTEM_RULE: &str = "Generate compact Python program to solve this problem. \
Use natural language on output of print function.\n\n\
Ensure the code is complete and use logic processing to solve the problem, syntactically correct, \
and doesn't require user input or imports.\n\
Provide only the Python code within a code block, no explanations.";

static FENCED_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("fenced code pattern")
});

/// Oracle errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One generation request
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub problem: &'a str,
    pub model: &'a str,
    pub catalog: &'a CapabilityCatalog,
}

impl GenerationRequest<'_> {
    pub fn prompt(&self) -> String {
        build_prompt(self.problem, self.catalog)
    }
}

/// Source of candidate programs
#[async_trait]
pub trait CodeOracle: Send + Sync {
    /// Raw model reply for `request`
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, OracleError>;
}

/// Render the user prompt for `problem`.
pub fn build_prompt(problem: &str, catalog: &CapabilityCatalog) -> String {
    format!(
        "\n<problem>{}</problem>\n<allowed-built-ins>{}</allowed-built-ins>\n<allowed-modules>{}</allowed-modules>\n\n{} ",
        problem,
        catalog.primitives_list(),
        catalog.modules_list(),
        SYSTEM_RULE
    )
}

/// Trimmed body of the first ```` ```python ```` (or ```` ```py ````) block.
/// Text without such a block is returned unchanged.
pub fn extract_code(raw: &str) -> String {
    match FENCED_CODE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => raw.to_string(),
    }
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Ollama-backed oracle
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, temperature: f64) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature,
            client,
        })
    }

    pub fn from_config(config: &crate::Config) -> Result<Self, OracleError> {
        Self::new(&config.ollama_url, config.request_timeout, config.temperature)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CodeOracle for OllamaClient {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, OracleError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = request.model, "Requesting generation from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": request.model,
                "system": SYSTEM_RULE,
                "prompt": request.prompt(),
                "stream": false,
                "options": {
                    "temperature": self.temperature,
                }
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse =
            serde_json::from_str(&body).map_err(|e| OracleError::Malformed(e.to_string()))?;

        debug!(bytes = parsed.response.len(), "Generation received");
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_from_fence() {
        let raw = "Here you go:\n```python\nprint(2+2)\n```\nHope this helps.";
        assert_eq!(extract_code(raw), "print(2+2)");
    }

    #[test]
    fn test_extract_code_takes_first_block() {
        let raw = "```python\nx = 1\nprint(x)\n```\n\n```python\nprint('second')\n```";
        assert_eq!(extract_code(raw), "x = 1\nprint(x)");
    }

    #[test]
    fn test_extract_code_short_tag_and_crlf() {
        assert_eq!(extract_code("```py\r\nprint(1)\r\n```"), "print(1)");
    }

    #[test]
    fn test_extract_code_without_fence_is_identity() {
        let raw = "print('no fence')";
        assert_eq!(extract_code(raw), raw);
        // untagged fences are not python blocks
        let untagged = "```\nprint(1)\n```";
        assert_eq!(extract_code(untagged), untagged);
    }

    #[test]
    fn test_prompt_embeds_catalog() {
        let catalog = CapabilityCatalog::standard();
        let prompt = build_prompt("compute 2+2", &catalog);
        assert!(prompt.starts_with("\n<problem>compute 2+2</problem>\n"));
        assert!(prompt.contains("<allowed-built-ins>abs, all, any,"));
        assert!(prompt.contains("<allowed-modules>math, random, re, time</allowed-modules>"));
        assert!(prompt.ends_with("no explanations. "));
    }

    #[test]
    fn test_status_error_display() {
        let err = OracleError::Status {
            status: 404,
            body: "model 'nope' not found".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned 404: model 'nope' not found");
    }
}
