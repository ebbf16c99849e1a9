//! Program Sandbox
//!
//! Parses and runs generated programs written in a small Python-flavoured
//! language. Only the names in the [`CapabilityCatalog`](crate::catalog::CapabilityCatalog)
//! are reachable; there is no binding for files, sockets, processes,
//! environment variables or the real stdout.
//!
//! - [`validate`] checks that text parses, without running it
//! - [`parse`] is the detailed form, returning the syntax tree or a [`SyntaxError`]
//! - [`Executor`] runs text and classifies it as [`ExecutionResult::Success`] or
//!   [`ExecutionResult::Failure`]

mod ast;
mod bignum;
mod builtins;
mod error;
mod executor;
mod format;
mod interp;
mod lexer;
mod methods;
mod modules;
mod parser;
mod value;

pub use ast::Program;
pub use error::{Exception, ExceptionKind, SyntaxError};
pub use executor::{ExecutionResult, Executor, OutputSink, Verbosity};
pub use parser::parse;

/// True iff `text` parses. Names are not resolved and nothing runs.
pub fn validate(text: &str) -> bool {
    parse(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_programs() {
        assert!(validate("print(2+2)"));
        assert!(validate("def f(n):\n    return n * 2\nprint(f(21))\n"));
        // unknown names are a run-time concern
        assert!(validate("open('/etc/passwd')"));
    }

    #[test]
    fn test_validate_rejects_malformed_text() {
        assert!(!validate(""));
        assert!(!validate("   \n\t\n"));
        assert!(!validate("def f(:\n  pass"));
        assert!(!validate("Error: Failed to generate response. Error: connection refused"));
        assert!(!validate("class A:\n    pass"));
    }

    #[test]
    fn test_validate_bounds_nesting() {
        let deep = format!("x = {}1{}", "(".repeat(150), ")".repeat(150));
        assert!(!validate(&deep));
        let shallow = format!("x = {}1{}", "(".repeat(20), ")".repeat(20));
        assert!(validate(&shallow));
    }
}
