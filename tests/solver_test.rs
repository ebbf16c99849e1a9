//! Retry controller tests with a scripted oracle

use async_trait::async_trait;
use logiq::sandbox::{ExecutionResult, Executor, Verbosity};
use logiq::{Artifact, CapabilityCatalog, CodeOracle, GenerationRequest, LoopState, OracleError, Solver, APOLOGY};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replies in order; the final reply repeats once the queue is drained.
struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeOracle for ScriptedOracle {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(request.prompt());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.ok_or_else(|| OracleError::Malformed("no scripted reply".to_string()))
    }
}

fn fenced(code: &str) -> String {
    format!("Sure! Here is the program:\n\n```python\n{}\n```\n", code)
}

#[tokio::test]
async fn test_scenario_compute_two_plus_two() {
    let oracle = ScriptedOracle::new(&[fenced("print(2+2)").as_str()]);
    let solver = Solver::new(oracle.clone(), Executor::standard(), 6).unwrap();

    let solution = solver.solve("compute 2+2", "llama2").await;

    assert_eq!(solution.state, LoopState::Succeeded);
    assert_eq!(solution.attempts.len(), 1);
    assert_eq!(solution.attempts[0].result, ExecutionResult::Success("4\n".to_string()));
    assert_eq!(
        solution.artifact,
        Artifact::Disclosure {
            code: "print(2+2)".to_string(),
            output: "4".to_string(),
        }
    );
    assert_eq!(
        solution.rendered(),
        "<details>\n<summary>LogiQ</summary>\n```python\nprint(2+2)\n```\n</details>\n4"
    );
}

#[tokio::test]
async fn test_three_invalid_candidates_exhaust() {
    let oracle = ScriptedOracle::new(&["def (", "print(", "for x in"]);
    let solver = Solver::new(oracle.clone(), Executor::standard(), 3).unwrap();

    let solution = solver.solve("anything", "llama2").await;

    assert_eq!(solution.state, LoopState::ExhaustedFailed);
    assert_eq!(solution.attempts.len(), 3);
    assert_eq!(solution.artifact, Artifact::Apology);
    assert_eq!(solution.rendered(), APOLOGY);
    assert!(!solution.rendered().contains("<details>"));
    let programs: Vec<&str> = solution.attempts.iter().map(|a| a.program.as_str()).collect();
    assert_eq!(programs, vec!["def (", "print(", "for x in"]);
}

#[tokio::test]
async fn test_disallowed_name_is_retried_at_any_verbosity() {
    for verbosity in [Verbosity::Generic, Verbosity::Detailed] {
        let oracle = ScriptedOracle::new(&[
            fenced("print(open('/etc/passwd').read())").as_str(),
            fenced("print('fallback answer')").as_str(),
        ]);
        let executor = Executor::new(CapabilityCatalog::standard(), verbosity);
        let solver = Solver::new(oracle, executor, 4).unwrap();

        let solution = solver.solve("read a file", "llama2").await;

        assert_eq!(solution.state, LoopState::Succeeded);
        assert_eq!(solution.attempts.len(), 2);
        assert!(!solution.attempts[0].result.is_success());
        assert_eq!(solution.attempts[1].result.text(), "fallback answer\n");
    }
}

#[tokio::test]
async fn test_no_attempts_after_success() {
    let oracle = ScriptedOracle::new(&["raise", "x = [1, 2\n", fenced("print(sum(range(1, 11)))").as_str(), "print(0)"]);
    let solver = Solver::new(oracle.clone(), Executor::standard(), 6).unwrap();

    let solution = solver.solve("sum one to ten", "llama2").await;

    assert_eq!(solution.state, LoopState::Succeeded);
    assert_eq!(solution.attempts.len(), 3);
    assert_eq!(oracle.prompts().len(), 3);
    assert_eq!(solution.attempts.last().unwrap().result.text(), "55\n");
}

#[tokio::test]
async fn test_retries_reuse_the_same_prompt() {
    let oracle = ScriptedOracle::new(&["nope"]);
    let solver = Solver::new(oracle.clone(), Executor::standard(), 4).unwrap();

    let solution = solver.solve("what is the answer?", "llama2").await;

    assert_eq!(solution.state, LoopState::ExhaustedFailed);
    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts.iter().all(|p| p == &prompts[0]));
    assert!(prompts[0].contains("<problem>what is the answer?</problem>"));
}

#[tokio::test]
async fn test_concurrent_solves_do_not_share_output() {
    let left = Solver::new(ScriptedOracle::new(&[fenced("print('left')").as_str()]), Executor::standard(), 2).unwrap();
    let right = Solver::new(ScriptedOracle::new(&[fenced("print('right')").as_str()]), Executor::standard(), 2).unwrap();

    let (a, b) = tokio::join!(left.solve("l", "m"), right.solve("r", "m"));

    assert_eq!(a.attempts[0].result.text(), "left\n");
    assert_eq!(b.attempts[0].result.text(), "right\n");
    assert_ne!(a.request_id, b.request_id);
}

#[tokio::test]
async fn test_solution_serializes() {
    let oracle = ScriptedOracle::new(&[fenced("print('hi')").as_str()]);
    let solver = Solver::new(oracle, Executor::standard(), 1).unwrap();

    let solution = solver.solve("greet", "llama2").await;
    let json = serde_json::to_value(&solution).unwrap();

    assert_eq!(json["state"]["state"], "succeeded");
    assert_eq!(json["artifact"]["kind"], "disclosure");
    assert_eq!(json["attempts"][0]["result"]["status"], "success");
    assert_eq!(json["attempts"][0]["result"]["text"], "hi\n");
}

#[tokio::test]
async fn test_huge_budget_allocates_per_attempt() {
    let oracle = ScriptedOracle::new(&[fenced("print(1)").as_str()]);
    let solver = Solver::new(oracle, Executor::standard(), u32::MAX).unwrap();

    let solution = solver.solve("print one", "llama2").await;

    assert_eq!(solution.state, LoopState::Succeeded);
    assert_eq!(solution.attempts.len(), 1);
}
