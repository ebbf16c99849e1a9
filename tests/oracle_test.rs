//! Ollama client tests against an in-process fake backend

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use logiq::sandbox::Executor;
use logiq::{CapabilityCatalog, CodeOracle, GenerationRequest, LoopState, OllamaClient, OracleError, Solver};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct FakeOllama {
    status: StatusCode,
    body: String,
    seen: Arc<Mutex<Vec<Value>>>,
}

async fn generate(State(fake): State<FakeOllama>, Json(request): Json<Value>) -> (StatusCode, String) {
    fake.seen.lock().unwrap().push(request);
    (fake.status, fake.body.clone())
}

/// Serve a fake `/api/generate` on an ephemeral port.
async fn spawn_fake(status: StatusCode, body: &str) -> (String, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fake = FakeOllama {
        status,
        body: body.to_string(),
        seen: seen.clone(),
    };
    let app = Router::new().route("/api/generate", post(generate)).with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), seen)
}

fn client(base_url: &str) -> OllamaClient {
    OllamaClient::new(base_url, Duration::from_secs(5), 0.1).unwrap()
}

fn request(catalog: &CapabilityCatalog) -> GenerationRequest<'_> {
    GenerationRequest {
        problem: "compute 2+2",
        model: "llama2",
        catalog,
    }
}

#[tokio::test]
async fn test_generate_sends_expected_body() {
    let (url, seen) = spawn_fake(StatusCode::OK, r#"{"response": "```python\nprint(4)\n```", "done": true}"#).await;
    let catalog = CapabilityCatalog::standard();

    let reply = client(&url).generate(&request(&catalog)).await.unwrap();
    assert_eq!(reply, "```python\nprint(4)\n```");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let body = &seen[0];
    assert_eq!(body["model"], "llama2");
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["temperature"], 0.1);
    assert!(body["system"].as_str().unwrap().starts_with("Generate compact Python program"));
    let prompt = body["prompt"].as_str().unwrap();
    assert!(prompt.contains("<problem>compute 2+2</problem>"));
    assert!(prompt.contains("<allowed-modules>math, random, re, time</allowed-modules>"));
}

#[tokio::test]
async fn test_non_success_status() {
    let (url, _) = spawn_fake(StatusCode::NOT_FOUND, r#"{"error": "model 'llama2' not found"}"#).await;
    let catalog = CapabilityCatalog::standard();

    let err = client(&url).generate(&request(&catalog)).await.unwrap_err();
    match err {
        OracleError::Status { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("not found"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response() {
    let (url, _) = spawn_fake(StatusCode::OK, r#"{"text": "no response field"}"#).await;
    let catalog = CapabilityCatalog::standard();

    let err = client(&url).generate(&request(&catalog)).await.unwrap_err();
    assert!(matches!(err, OracleError::Malformed(_)), "{:?}", err);
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Reserve a port, then close it so nothing is listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let catalog = CapabilityCatalog::standard();
    let err = client(&format!("http://{}", addr)).generate(&request(&catalog)).await.unwrap_err();
    assert!(matches!(err, OracleError::Transport(_)), "{:?}", err);
}

#[tokio::test]
async fn test_solver_survives_backend_errors() {
    let (url, seen) = spawn_fake(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let solver = Solver::new(Arc::new(client(&url)), Executor::standard(), 3).unwrap();

    let solution = solver.solve("compute 2+2", "llama2").await;

    assert_eq!(solution.state, LoopState::ExhaustedFailed);
    assert_eq!(solution.attempts.len(), 3);
    assert_eq!(seen.lock().unwrap().len(), 3);
    assert!(solution.attempts[0]
        .program
        .starts_with("Error: Failed to generate response. Error: backend returned 500"));
}

#[tokio::test]
async fn test_solver_end_to_end() {
    let (url, _) = spawn_fake(
        StatusCode::OK,
        r#"{"response": "Here you go:\n```python\ntotal = sum(range(1, 101))\nprint(f\"The sum is {total}\")\n```"}"#,
    )
    .await;
    let solver = Solver::new(Arc::new(client(&url)), Executor::standard(), 2).unwrap();

    let solution = solver.solve("sum 1..100", "llama2").await;

    assert!(solution.succeeded());
    assert_eq!(solution.attempts.len(), 1);
    assert!(solution.rendered().ends_with("</details>\nThe sum is 5050"));
}
