//! LogiQ - Entry Point
//!
//! Modes:
//! - Default: solve the problem given on the command line and print the answer
//! - --serve / -s: HTTP API server

use anyhow::Context;
use logiq::{Config, LogiqServer, OllamaClient, Solver};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("LogiQ v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: logiq [OPTIONS] [PROBLEM...]");
    println!();
    println!("Options:");
    println!("  --serve, -s          Run the HTTP API server");
    println!("  --model, -m <NAME>   Model to generate with");
    println!("  --help, -h           Show this help");
    println!();
    println!("Environment variables:");
    println!("  LOGIQ_OLLAMA_URL            Ollama base URL (default: http://localhost:11434)");
    println!("  LOGIQ_MODEL                 Default model (default: llama2)");
    println!("  LOGIQ_MAX_RETRIES           Attempts per problem (default: 6)");
    println!("  LOGIQ_TEMPERATURE           Sampling temperature (default: 0.1)");
    println!("  LOGIQ_SHOW_CODE_RUN_ERRORS  Detailed failure messages (default: false)");
    println!("  LOGIQ_REQUEST_TIMEOUT_SECS  Oracle request timeout (default: 120)");
    println!("  LOGIQ_PREFIX                Chat activation prefix (default: /logiq)");
    println!("  LOGIQ_BIND                  Server address (default: 127.0.0.1:8090)");
    println!("  LOGIQ_LOG_JSON              Log as JSON (default: false)");
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder
            .with_ansi(false)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let serve_mode = args.iter().any(|a| a == "--serve" || a == "-s");
    let mut model = None;
    let mut words = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--serve" | "-s" => {}
            "--model" | "-m" => {
                model = Some(iter.next().context("--model needs a value")?.clone());
            }
            _ => words.push(arg.as_str()),
        }
    }

    let config = Config::from_env().context("Invalid configuration")?;
    init_logging(config.log_json)?;

    let oracle = OllamaClient::from_config(&config).context("Failed to create Ollama client")?;
    let solver = Arc::new(Solver::from_config(&config, Arc::new(oracle))?);

    if serve_mode {
        info!("LogiQ server v{}", env!("CARGO_PKG_VERSION"));
        return LogiqServer::new(&config, solver).run().await;
    }

    let problem = words.join(" ");
    let problem = logiq::strip_activation_prefix(&problem, &config.prefix).unwrap_or(problem);
    if problem.trim().is_empty() {
        print_help();
        anyhow::bail!("no problem given");
    }

    let model = model.unwrap_or_else(|| config.default_model.clone());
    let solution = solver.solve(problem.trim(), &model).await;
    println!("{}", solution.rendered());

    if !solution.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}
