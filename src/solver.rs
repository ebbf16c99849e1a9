//! Retry Controller
//!
//! Drives Generate → Extract → Validate → Execute for one problem until a
//! candidate runs cleanly or the attempt budget is spent.
//!
//! ```text
//! Attempting(0) ──Success──► Succeeded
//!      │
//!   Failure, i < N-1 ──► Attempting(i+1)
//!   Failure, i = N-1 ──► ExhaustedFailed
//! ```
//!
//! Every attempt asks the oracle the same question; nothing about earlier
//! failures is fed back. Oracle errors become unparsable candidate text so
//! they fail like any other bad program.

use crate::artifact::Artifact;
use crate::config::Config;
use crate::oracle::{extract_code, CodeOracle, GenerationRequest};
use crate::sandbox::{ExecutionResult, Executor, Verbosity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Solver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum LoopState {
    /// Running the attempt with this zero-based index
    Attempting(u32),
    Succeeded,
    ExhaustedFailed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Attempting(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempting(_) => "attempting",
            Self::Succeeded => "succeeded",
            Self::ExhaustedFailed => "exhausted_failed",
        }
    }
}

/// One generated candidate and how it ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub index: u32,
    pub program: String,
    pub result: ExecutionResult,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Outcome of one solve call
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub request_id: Uuid,
    pub state: LoopState,
    pub attempts: Vec<Attempt>,
    pub artifact: Artifact,
}

impl Solution {
    pub fn succeeded(&self) -> bool {
        self.state == LoopState::Succeeded
    }

    pub fn rendered(&self) -> String {
        self.artifact.render()
    }
}

/// Solver construction errors
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("max_retries must be at least 1")]
    NoAttempts,
}

/// Bounded generate-and-verify loop
pub struct Solver {
    oracle: Arc<dyn CodeOracle>,
    executor: Executor,
    max_retries: u32,
}

impl Solver {
    pub fn new(oracle: Arc<dyn CodeOracle>, executor: Executor, max_retries: u32) -> Result<Self, SolverError> {
        if max_retries == 0 {
            return Err(SolverError::NoAttempts);
        }
        Ok(Self {
            oracle,
            executor,
            max_retries,
        })
    }

    /// Solver over the standard catalog using the configured retry budget
    /// and error verbosity.
    pub fn from_config(config: &Config, oracle: Arc<dyn CodeOracle>) -> Result<Self, SolverError> {
        let executor = Executor::new(
            crate::catalog::CapabilityCatalog::standard(),
            Verbosity::from_show_errors(config.show_code_run_errors),
        );
        Self::new(oracle, executor, config.max_retries)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Solve `problem` with `model`. Always ends in a terminal state with
    /// exactly one artifact.
    pub async fn solve(&self, problem: &str, model: &str) -> Solution {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        info!(%request_id, model, "Solving problem ({} attempts max)", self.max_retries);

        let mut attempts = Vec::new();
        let mut state = LoopState::Attempting(0);

        while let LoopState::Attempting(index) = state {
            let attempt = self.attempt(request_id, index, problem, model).await;
            state = self.next_state(index, &attempt.result);
            attempts.push(attempt);
        }

        let artifact = Artifact::from_outcome(state, attempts.last());
        info!(
            %request_id,
            attempts = attempts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Solve finished: {}",
            state.as_str()
        );

        Solution {
            request_id,
            state,
            attempts,
            artifact,
        }
    }

    fn next_state(&self, index: u32, result: &ExecutionResult) -> LoopState {
        if result.is_success() {
            LoopState::Succeeded
        } else if index + 1 >= self.max_retries {
            LoopState::ExhaustedFailed
        } else {
            LoopState::Attempting(index + 1)
        }
    }

    async fn attempt(&self, request_id: Uuid, index: u32, problem: &str, model: &str) -> Attempt {
        let started_at = Utc::now();
        let start = Instant::now();

        let request = GenerationRequest {
            problem,
            model,
            catalog: self.executor.catalog(),
        };
        let raw = match self.oracle.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%request_id, attempt = index, "Generation failed: {}", e);
                format!("Error: Failed to generate response. Error: {}", e)
            }
        };

        let program = extract_code(&raw);
        let result = self.run(program.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(
            %request_id,
            attempt = index,
            success = result.is_success(),
            elapsed_ms,
            "Attempt finished"
        );

        Attempt {
            index,
            program,
            result,
            started_at,
            elapsed_ms,
        }
    }

    /// Execute on the blocking pool so the runtime keeps serving other work.
    async fn run(&self, program: String) -> ExecutionResult {
        let executor = self.executor.clone();
        match tokio::task::spawn_blocking(move || executor.execute(&program)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Execution task failed: {}", e);
                ExecutionResult::Failure(match self.executor.verbosity() {
                    Verbosity::Generic => "Error".to_string(),
                    Verbosity::Detailed => format!("Error: {}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleError;
    use std::sync::Mutex;

    /// Replays canned replies, repeating the last one when it runs out
    struct Scripted {
        replies: Mutex<Vec<Result<String, OracleError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl CodeOracle for Scripted {
        async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, OracleError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop().unwrap()
            } else {
                match replies.last().unwrap() {
                    Ok(text) => Ok(text.clone()),
                    Err(_) => Err(OracleError::Malformed("scripted".to_string())),
                }
            }
        }
    }

    fn solver(oracle: Arc<Scripted>, max_retries: u32) -> Solver {
        Solver::new(oracle, Executor::standard(), max_retries).unwrap()
    }

    #[test]
    fn test_zero_retries_rejected() {
        let oracle = Scripted::new(vec![Ok("print(1)".to_string())]);
        assert!(Solver::new(oracle, Executor::standard(), 0).is_err());
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let oracle = Scripted::new(vec![Ok("```python\nprint(2+2)\n```".to_string())]);
        let solution = solver(oracle.clone(), 6).solve("compute 2+2", "llama2").await;

        assert_eq!(solution.state, LoopState::Succeeded);
        assert_eq!(solution.attempts.len(), 1);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(
            solution.artifact,
            Artifact::Disclosure {
                code: "print(2+2)".to_string(),
                output: "4".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exhaustion_runs_exactly_n_attempts() {
        let oracle = Scripted::new(vec![Ok("print(".to_string())]);
        let solution = solver(oracle.clone(), 3).solve("anything", "llama2").await;

        assert_eq!(solution.state, LoopState::ExhaustedFailed);
        assert_eq!(solution.attempts.len(), 3);
        assert_eq!(oracle.calls(), 3);
        assert_eq!(solution.artifact, Artifact::Apology);
        let indices: Vec<u32> = solution.attempts.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_oracle_errors_are_retried() {
        let oracle = Scripted::new(vec![
            Err(OracleError::Malformed("missing field `response`".to_string())),
            Ok("print('ok')".to_string()),
        ]);
        let solution = solver(oracle.clone(), 4).solve("say ok", "llama2").await;

        assert!(solution.succeeded());
        assert_eq!(solution.attempts.len(), 2);
        assert!(solution.attempts[0]
            .program
            .starts_with("Error: Failed to generate response. Error: malformed response"));
        assert_eq!(solution.attempts[0].result, ExecutionResult::Failure("Error".to_string()));
    }

    #[tokio::test]
    async fn test_single_attempt_budget() {
        let oracle = Scripted::new(vec![Ok("open('x')".to_string()), Ok("print(1)".to_string())]);
        let solution = solver(oracle.clone(), 1).solve("read a file", "llama2").await;

        assert_eq!(solution.state, LoopState::ExhaustedFailed);
        assert_eq!(oracle.calls(), 1);
    }
}
