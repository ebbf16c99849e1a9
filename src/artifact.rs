//! Result Formatter
//!
//! Maps the solver's terminal state to what the user sees: the accepted
//! program and its output inside a collapsible block, or a fixed apology.

use crate::solver::{Attempt, LoopState};
use serde::Serialize;

/// Reply used when every attempt failed
pub const APOLOGY: &str = "I apologize, but I couldn't generate a valid response after multiple attempts. \
Could you please rephrase your question or provide more details?";

/// Final user-visible result of one solve
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artifact {
    /// Accepted program and what it printed
    Disclosure { code: String, output: String },
    /// Retry budget exhausted
    Apology,
}

impl Artifact {
    /// Build the artifact for a terminal `state`. Anything other than a
    /// succeeded loop whose last attempt succeeded is an apology.
    pub fn from_outcome(state: LoopState, last_attempt: Option<&Attempt>) -> Self {
        match (state, last_attempt) {
            (LoopState::Succeeded, Some(attempt)) if attempt.result.is_success() => Self::Disclosure {
                code: attempt.program.clone(),
                output: attempt.result.text().trim_end().to_string(),
            },
            _ => Self::Apology,
        }
    }

    pub fn is_disclosure(&self) -> bool {
        matches!(self, Self::Disclosure { .. })
    }

    /// Markdown shown to the user
    pub fn render(&self) -> String {
        match self {
            Self::Disclosure { code, output } => format!(
                "<details>\n<summary>LogiQ</summary>\n```python\n{}\n```\n</details>\n{}",
                code, output
            ),
            Self::Apology => APOLOGY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionResult;

    fn attempt(program: &str, result: ExecutionResult) -> Attempt {
        Attempt {
            index: 0,
            program: program.to_string(),
            result,
            started_at: chrono::Utc::now(),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_disclosure_render() {
        let last = attempt("print(2+2)", ExecutionResult::Success("4\n".to_string()));
        let artifact = Artifact::from_outcome(LoopState::Succeeded, Some(&last));
        assert_eq!(
            artifact,
            Artifact::Disclosure {
                code: "print(2+2)".to_string(),
                output: "4".to_string()
            }
        );
        assert_eq!(
            artifact.render(),
            "<details>\n<summary>LogiQ</summary>\n```python\nprint(2+2)\n```\n</details>\n4"
        );
    }

    #[test]
    fn test_exhausted_is_apology() {
        let last = attempt("open('x')", ExecutionResult::Failure("Error".to_string()));
        let artifact = Artifact::from_outcome(LoopState::ExhaustedFailed, Some(&last));
        assert_eq!(artifact, Artifact::Apology);
        assert_eq!(artifact.render(), APOLOGY);
        assert!(!artifact.render().contains("<details>"));
    }

    #[test]
    fn test_succeeded_without_successful_attempt_is_apology() {
        assert_eq!(Artifact::from_outcome(LoopState::Succeeded, None), Artifact::Apology);
        let failed = attempt("x", ExecutionResult::Failure("Error".to_string()));
        assert_eq!(Artifact::from_outcome(LoopState::Succeeded, Some(&failed)), Artifact::Apology);
    }
}
