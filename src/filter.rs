//! Chat Filter
//!
//! Answers `/logiq` requests inside an Open-WebUI style chat body:
//!
//! ```json
//! {"model": "llama2", "messages": [{"role": "user", "content": "/logiq compute 2+2"}]}
//! ```
//!
//! When the last user message carries the activation prefix, the remainder
//! is solved and an `assistant` message holding the rendered artifact is
//! appended. Any other body is returned as-is.

use crate::solver::{Solution, Solver};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Remainder of `message` after `prefix`, trimmed. `None` when the message
/// does not start with the prefix.
pub fn strip_activation_prefix(message: &str, prefix: &str) -> Option<String> {
    message
        .strip_prefix(prefix)
        .map(|rest| rest.trim().to_string())
}

/// Text of the last `user` message. Content may be a string or a list of
/// `{"type": "text", "text": ...}` parts.
pub fn last_user_message(body: &Value) -> Option<String> {
    let messages = body.get("messages")?.as_array()?;
    let message = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))?;

    match message.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Prefix-activated solver over chat bodies
#[derive(Clone)]
pub struct ChatFilter {
    solver: Arc<Solver>,
    prefix: String,
    default_model: String,
}

impl ChatFilter {
    pub fn new(solver: Arc<Solver>, prefix: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            solver,
            prefix: prefix.into(),
            default_model: default_model.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Problem carried by `body`, if its last user message is activated
    pub fn activation(&self, body: &Value) -> Option<String> {
        last_user_message(body).and_then(|text| strip_activation_prefix(&text, &self.prefix))
    }

    /// Solve an activated body and append the answer. Bodies without the
    /// prefix come back unchanged.
    pub async fn apply(&self, mut body: Value) -> Value {
        let Some(problem) = self.activation(&body) else {
            debug!("Chat body not activated, passing through");
            return body;
        };

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string();

        info!(model = %model, "Chat activation: {} chars", problem.len());
        let solution = self.solver.solve(&problem, &model).await;
        append_answer(&mut body, &solution);
        body
    }
}

fn append_answer(body: &mut Value, solution: &Solution) {
    let reply = json!({
        "role": "assistant",
        "content": solution.rendered(),
    });
    if let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) {
        messages.push(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_activation_prefix() {
        assert_eq!(
            strip_activation_prefix("/logiq  what is 2+2?  ", "/logiq"),
            Some("what is 2+2?".to_string())
        );
        assert_eq!(strip_activation_prefix("/logiq", "/logiq"), Some(String::new()));
        assert_eq!(strip_activation_prefix("what is /logiq", "/logiq"), None);
        assert_eq!(strip_activation_prefix(" /logiq x", "/logiq"), None);
    }

    #[test]
    fn test_last_user_message_skips_assistant() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "user", "content": "/logiq second"},
                {"role": "assistant", "content": "reply"}
            ]
        });
        assert_eq!(last_user_message(&body), Some("/logiq second".to_string()));
    }

    #[test]
    fn test_last_user_message_with_parts() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": "data:..."}},
                    {"type": "text", "text": "/logiq count primes below 10"}
                ]
            }]
        });
        assert_eq!(
            last_user_message(&body),
            Some("/logiq count primes below 10".to_string())
        );
    }

    #[test]
    fn test_last_user_message_missing() {
        assert_eq!(last_user_message(&json!({})), None);
        assert_eq!(last_user_message(&json!({"messages": []})), None);
        assert_eq!(
            last_user_message(&json!({"messages": [{"role": "system", "content": "x"}]})),
            None
        );
    }
}
