mod cli;
mod envelope;
mod model;
mod orchestrator;
mod presenter;
mod progress;
mod query;
mod render;
mod runtime;
mod text_summary;

use anyhow::Result;
use clap::Parser;

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // stdout is reserved for query results.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);
    let is_json = args.json;

    tokio::select! {
        outcome = cli::run(args) => match outcome {
            Ok(()) => Ok(()),
            Err(e) if is_json => {
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
                std::process::exit(1);
            }
            Err(e) => Err(e),
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            std::process::exit(130);
        }
    }
}
