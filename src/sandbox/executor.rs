//! Restricted Executor
//!
//! Runs candidate program text against the capability catalog:
//! - Text that does not parse fails before any environment is built
//! - The environment binds only catalog primitives and modules
//! - `print` writes into a per-call [`OutputSink`], never to the process stdout
//! - The interpreter runs on its own named thread with a large stack; a panic
//!   there becomes a failure instead of unwinding into the caller
//!
//! Runs are not time-limited.

use super::error::{Exception, SyntaxError};
use super::interp::Interpreter;
use super::parser::parse;
use crate::catalog::CapabilityCatalog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Stack reserved for the interpreter thread. Deep user recursion is
/// bounded separately; this only has to cover it.
const SANDBOX_STACK_BYTES: usize = 256 * 1024 * 1024;

const SANDBOX_THREAD_NAME: &str = "logiq-sandbox";

/// How much of a failure is reported back in the result text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Every failure reads `"Error"`
    #[default]
    Generic,
    /// Failures carry the syntax error or the exception kind and message
    Detailed,
}

impl Verbosity {
    pub fn from_show_errors(show: bool) -> Self {
        if show {
            Self::Detailed
        } else {
            Self::Generic
        }
    }
}

/// Outcome of one executed candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "lowercase")]
pub enum ExecutionResult {
    /// Everything the program printed
    Success(String),
    /// `"Error"` or a detailed error line, depending on verbosity
    Failure(String),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The output or failure text
    pub fn text(&self) -> &str {
        match self {
            Self::Success(text) | Self::Failure(text) => text,
        }
    }
}

/// Captured program output for a single execution
#[derive(Debug, Default)]
pub struct OutputSink {
    buffer: String,
}

impl OutputSink {
    /// Empty sink for one run
    pub fn new() -> Self {
        Self::default()
    }

    /// Append program output
    pub fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Everything written so far
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Whether the program has printed anything
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the captured text, consuming the sink
    pub fn into_string(self) -> String {
        self.buffer
    }
}

/// Why a run failed. Only used for logging and message rendering.
#[derive(Debug)]
enum RunFailure {
    Syntax(SyntaxError),
    Raised(Exception),
    Internal(String),
}

/// Sandboxed program executor
#[derive(Debug, Clone)]
pub struct Executor {
    catalog: Arc<CapabilityCatalog>,
    verbosity: Verbosity,
}

impl Executor {
    pub fn new(catalog: Arc<CapabilityCatalog>, verbosity: Verbosity) -> Self {
        Self { catalog, verbosity }
    }

    /// Executor over the standard catalog with generic failure messages
    pub fn standard() -> Self {
        Self::new(CapabilityCatalog::standard(), Verbosity::Generic)
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Execute `text` with a fresh output sink.
    pub fn execute(&self, text: &str) -> ExecutionResult {
        let mut sink = OutputSink::new();
        self.execute_into(text, &mut sink)
    }

    /// Execute `text`, printing into `sink`. On success the result carries a
    /// copy of everything the program printed.
    pub fn execute_into(&self, text: &str, sink: &mut OutputSink) -> ExecutionResult {
        let start = Instant::now();
        let outcome = self.run_isolated(text, sink);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                debug!(elapsed_ms, output_bytes = sink.as_str().len(), "Program completed");
                ExecutionResult::Success(sink.as_str().to_string())
            }
            Err(failure) => {
                match &failure {
                    RunFailure::Syntax(e) => {
                        debug!(line = e.line, elapsed_ms, "Program rejected: invalid syntax: {}", e.message)
                    }
                    RunFailure::Raised(e) => {
                        debug!(kind = %e.kind, line = ?e.line, elapsed_ms, "Program raised: {}", e.message)
                    }
                    RunFailure::Internal(reason) => {
                        warn!(elapsed_ms, "Sandbox failure: {}", reason)
                    }
                }
                ExecutionResult::Failure(self.render_failure(&failure))
            }
        }
    }

    fn render_failure(&self, failure: &RunFailure) -> String {
        if self.verbosity == Verbosity::Generic {
            return "Error".to_string();
        }
        match failure {
            RunFailure::Syntax(e) => format!("Error: Invalid syntax ({})", e),
            RunFailure::Raised(e) if e.message.is_empty() => format!("Error: {}", e.kind),
            RunFailure::Raised(e) => format!("Error: {}: {}", e.kind, e.message),
            RunFailure::Internal(reason) => format!("Error: {}", reason),
        }
    }

    /// Parse and run on a dedicated thread, joined before returning.
    fn run_isolated(&self, text: &str, sink: &mut OutputSink) -> Result<(), RunFailure> {
        let catalog: &CapabilityCatalog = &self.catalog;
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name(SANDBOX_THREAD_NAME.to_string())
                .stack_size(SANDBOX_STACK_BYTES)
                .spawn_scoped(scope, move || {
                    // Parsing happens here too: the syntax tree is not `Send`.
                    let program = parse(text).map_err(RunFailure::Syntax)?;
                    let mut interpreter = Interpreter::new(catalog, sink);
                    interpreter.run(&program).map_err(RunFailure::Raised)
                })
                .map_err(|e| RunFailure::Internal(format!("failed to start sandbox thread: {}", e)))?;

            handle.join().unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RunFailure::Internal(format!("interpreter panicked: {}", reason)))
            })
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detailed() -> Executor {
        Executor::new(CapabilityCatalog::standard(), Verbosity::Detailed)
    }

    #[test]
    fn test_print_is_captured() {
        let result = Executor::standard().execute("print(2+2)");
        assert_eq!(result, ExecutionResult::Success("4\n".to_string()));
    }

    #[test]
    fn test_invalid_syntax_leaves_sink_untouched() {
        let mut sink = OutputSink::new();
        let result = Executor::standard().execute_into("def f(:\n  pass", &mut sink);
        assert_eq!(result, ExecutionResult::Failure("Error".to_string()));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_detailed_messages() {
        let result = detailed().execute("x = (1,\n");
        assert!(result.text().starts_with("Error: Invalid syntax (line "));

        let result = detailed().execute("open('x')");
        assert_eq!(result.text(), "Error: NameError: name 'open' is not defined");

        let result = detailed().execute("print(1/0)");
        assert_eq!(result.text(), "Error: ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_generic_failure_hides_details() {
        let result = Executor::standard().execute("import os");
        assert_eq!(result, ExecutionResult::Failure("Error".to_string()));
    }

    #[test]
    fn test_output_before_exception_is_discarded() {
        let result = Executor::standard().execute("print('partial')\nraise");
        assert!(!result.is_success());
        assert_eq!(result.text(), "Error");
    }

    #[test]
    fn test_verbosity_from_flag() {
        assert_eq!(Verbosity::from_show_errors(true), Verbosity::Detailed);
        assert_eq!(Verbosity::from_show_errors(false), Verbosity::Generic);
    }
}
