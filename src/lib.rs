//! LogiQ
//!
//! Answers natural-language problems by having a language model write a
//! small program, running it in a capability-restricted sandbox and
//! retrying until a candidate runs cleanly.
//!
//! # Features
//!
//! - **Sandbox**: Python-flavoured subset interpreter with a closed allowlist
//! - **Oracle**: Ollama `/api/generate` client behind the `CodeOracle` trait
//! - **Solver**: Bounded retry loop with per-attempt records
//! - **Chat filter**: `/logiq` activation for Open-WebUI style chat bodies
//! - **HTTP API**: `/api/solve`, `/api/chat`, `/api/health`
//!
//! # Architecture
//!
//! ```text
//! problem ──► Solver ──► CodeOracle (Ollama)
//!               │            │ raw reply
//!               │            ▼
//!               │       extract_code
//!               │            │ candidate
//!               │            ▼
//!               ├──── sandbox::Executor ──► Success / Failure
//!               ▼
//!            Artifact (disclosure or apology)
//! ```

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod filter;
pub mod oracle;
pub mod sandbox;
pub mod server;
pub mod solver;

pub use artifact::{Artifact, APOLOGY};
pub use catalog::{CapabilityCatalog, CatalogError};
pub use config::Config;
pub use filter::{strip_activation_prefix, ChatFilter};
pub use oracle::{build_prompt, extract_code, CodeOracle, GenerationRequest, OllamaClient, OracleError};
pub use sandbox::{validate, ExecutionResult, Executor, OutputSink, Verbosity};
pub use server::LogiqServer;
pub use solver::{Attempt, LoopState, Solution, Solver, SolverError};
