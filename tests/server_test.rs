//! HTTP route tests

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use logiq::sandbox::Executor;
use logiq::{CodeOracle, Config, GenerationRequest, LogiqServer, OracleError, Solver};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Answers every request with the same reply and records the model asked for
struct FixedOracle {
    reply: String,
    models: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl CodeOracle for FixedOracle {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, OracleError> {
        self.models.lock().unwrap().push(request.model.to_string());
        Ok(self.reply.clone())
    }
}

fn server(reply: &str) -> (axum::Router, Arc<FixedOracle>) {
    let oracle = Arc::new(FixedOracle {
        reply: reply.to_string(),
        models: std::sync::Mutex::new(Vec::new()),
    });
    let config = Config {
        max_retries: 2,
        ..Config::default()
    };
    let solver = Arc::new(Solver::new(oracle.clone(), Executor::standard(), config.max_retries).unwrap());
    (LogiqServer::new(&config, solver).build_router(), oracle)
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = server("print(1)");

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_secs"].is_number());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_solve_success() {
    let (app, oracle) = server("```python\nprint(2+2)\n```");

    let (status, json) = post_json(app, "/api/solve", json!({"problem": "compute 2+2"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["attempts"], 1);
    assert_eq!(json["code"], "print(2+2)");
    assert_eq!(json["output"], "4");
    assert!(json["rendered"].as_str().unwrap().starts_with("<details>\n<summary>LogiQ</summary>"));
    assert!(json["request_id"].is_string());
    assert_eq!(oracle.models.lock().unwrap().as_slice(), ["llama2"]);
}

#[tokio::test]
async fn test_solve_exhausted() {
    let (app, _) = server("I cannot write code today.");

    let (status, json) = post_json(app, "/api/solve", json!({"problem": "x", "model": "mistral"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "exhausted_failed");
    assert_eq!(json["attempts"], 2);
    assert!(json.get("code").is_none());
    assert_eq!(json["rendered"], logiq::APOLOGY);
}

#[tokio::test]
async fn test_solve_rejects_blank_problem() {
    let (app, oracle) = server("print(1)");

    let (status, json) = post_json(app, "/api/solve", json!({"problem": "   "})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
    assert!(oracle.models.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_activation() {
    let (app, oracle) = server("```python\nprint('forty-two')\n```");
    let body = json!({
        "model": "codellama",
        "messages": [
            {"role": "user", "content": "/logiq what is six times seven?"}
        ]
    });

    let (status, json) = post_json(app, "/api/chat", body).await;

    assert_eq!(status, StatusCode::OK);
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["role"], "assistant");
    assert!(messages[1]["content"].as_str().unwrap().ends_with("</details>\nforty-two"));
    assert_eq!(oracle.models.lock().unwrap().as_slice(), ["codellama"]);
}

#[tokio::test]
async fn test_chat_passthrough() {
    let (app, oracle) = server("print(1)");
    let body = json!({
        "model": "llama2",
        "messages": [{"role": "user", "content": "hello there"}]
    });

    let (status, json) = post_json(app, "/api/chat", body.clone()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, body);
    assert!(oracle.models.lock().unwrap().is_empty());
}
