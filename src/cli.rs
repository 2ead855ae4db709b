use crate::envelope::{self, Envelope};
use crate::model::{BootConfig, BootEvent, BootStep};
use crate::orchestrator::{BootstrapOrchestrator, BootstrapState};
use crate::presenter::ResultPresenter;
use crate::progress::{ProgressReporter, StepStatus};
use crate::query::QueryExecutionService;
use crate::render::text::TextLayout;
use crate::render::{Disposition, Renderer};
use crate::runtime::PythonLoader;
use crate::text_summary::{build_text_summary, View};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

const MAX_CELL_WIDTH: usize = 40;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "eqlize-console",
    version,
    about = "Run EdgeQL-style queries against a demo SQLite database through an embedded Python runtime"
)]
pub struct Cli {
    /// Queries to run; read from stdin (separated by blank lines) when omitted
    pub queries: Vec<String>,

    /// Python interpreter used as the runtime
    #[arg(long, env = "EQLIZE_PYTHON", default_value = "python3")]
    pub python: String,

    /// Runtime storage directory (defaults to the user cache dir)
    #[arg(long, env = "EQLIZE_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Package index used to install the query compiler
    #[arg(long, env = "EQLIZE_INDEX_URL", default_value = "https://pypi.org/simple")]
    pub index_url: String,

    /// Demo database source (local path or http(s) URL)
    #[arg(long, env = "EQLIZE_ASSET", default_value = "./assets/demo.sqlite")]
    pub asset: String,

    /// Where the demo database lives inside runtime storage
    #[arg(long, env = "EQLIZE_DB_PATH", default_value = "/data/demo.sqlite")]
    pub db_path: String,

    /// Package file (or requirement) providing the query compiler
    #[arg(
        long,
        env = "EQLIZE_PACKAGE",
        default_value = "./wheels/eqlize-0.1.0-py3-none-any.whl"
    )]
    pub package: String,

    /// Runtime module to load before installing the package (repeatable)
    #[arg(
        long = "capability",
        env = "EQLIZE_CAPABILITIES",
        value_delimiter = ',',
        default_values_t = ["pip".to_string(), "sqlite3".to_string()]
    )]
    pub capabilities: Vec<String>,

    /// Delay before the bootstrap starts
    #[arg(long, env = "EQLIZE_INIT_DELAY", default_value = "50ms")]
    pub init_delay: humantime::Duration,

    /// How long the Ready state stays on screen before the progress display hides
    #[arg(long, env = "EQLIZE_SUCCESS_DWELL", default_value = "500ms")]
    pub success_dwell: humantime::Duration,

    /// Print the raw result envelope of each query instead of the rendered view
    #[arg(long)]
    pub json: bool,

    /// Suppress bootstrap progress output
    #[arg(long)]
    pub quiet: bool,

    /// Print the introspected database schema once the runtime is ready
    #[arg(long)]
    pub schema: bool,

    /// Which rendered views to print
    #[arg(long, value_enum, default_value_t = View::Table)]
    pub view: View,

    /// Nesting levels shown expanded in rendered output
    #[arg(long, env = "EQLIZE_EXPAND_DEPTH", default_value_t = 1)]
    pub expand_depth: usize,

    /// Start every nested value expanded regardless of depth
    #[arg(long)]
    pub expand_all: bool,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Build a `BootConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> BootConfig {
    let storage_root = args.storage_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("eqlize-console")
    });
    BootConfig {
        python: args.python.clone(),
        storage_root,
        index_url: args.index_url.clone(),
        asset_source: args.asset.clone(),
        db_path: args.db_path.clone(),
        package_locator: args.package.clone(),
        capabilities: args.capabilities.clone(),
        init_delay: Duration::from(args.init_delay),
        success_dwell: Duration::from(args.success_dwell),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    std::fs::create_dir_all(&cfg.storage_root).with_context(|| {
        format!(
            "failed to create storage dir {}",
            cfg.storage_root.display()
        )
    })?;
    tracing::debug!(config = ?cfg, "starting console");

    let (out_tx, out_handle) = spawn_output_writer();
    let loader = Arc::new(PythonLoader::new(
        cfg.python.clone(),
        cfg.storage_root.clone(),
    ));
    let init_delay = cfg.init_delay;
    let orchestrator = BootstrapOrchestrator::new(loader, cfg);

    tokio::spawn(log_state_changes(orchestrator.subscribe()));
    tokio::time::sleep(init_delay).await;

    let (reporter, printer) = if args.quiet {
        (Arc::new(ProgressReporter::disabled()), None)
    } else {
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<BootEvent>();
        let printer = tokio::spawn(print_boot_events(
            orchestrator.steps().to_vec(),
            evt_rx,
            out_tx.clone(),
        ));
        (Arc::new(ProgressReporter::new(evt_tx)), Some(printer))
    };

    let outcome = orchestrator.bootstrap(reporter.clone()).await;
    let progress = reporter.snapshot();
    tracing::debug!(
        status = %progress.status,
        steps_done = progress
            .steps
            .iter()
            .filter(|(_, s)| *s == StepStatus::Done)
            .count(),
        log_lines = progress.log.len(),
        "bootstrap progress settled"
    );
    // The printer stops once the progress display hides or the reporter is gone.
    drop(reporter);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let session = match outcome {
        Ok(session) => session,
        Err(failure) => {
            drop(out_tx);
            let _ = out_handle.await;
            return Err(failure).context("runtime bootstrap failed");
        }
    };

    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Database: {}",
        session.db_path()
    )));
    if args.schema {
        match session.schema() {
            Some(schema) => {
                let _ = out_tx.send(OutputLine::Stdout(pretty_schema(schema)));
            }
            None => {
                let _ = out_tx.send(OutputLine::Stderr("No schema available".to_string()));
            }
        }
    }

    let queries = if args.queries.is_empty() {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("failed to read queries from stdin")?;
        split_queries(&input)
    } else {
        args.queries.clone()
    };

    let failed = run_queries(&args, &orchestrator, &queries, &out_tx).await?;

    drop(out_tx);
    let _ = out_handle.await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} queries failed", queries.len());
    }
    Ok(())
}

/// Run each query in order and print its result. Returns how many failed.
async fn run_queries(
    args: &Cli,
    orchestrator: &BootstrapOrchestrator,
    queries: &[String],
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<usize> {
    let service = QueryExecutionService::new();
    let disposition = if args.expand_all {
        Disposition::Expanded
    } else {
        Disposition::Collapsed
    };
    let presenter = ResultPresenter::new(Renderer::new(disposition));
    let layout = TextLayout::new(args.expand_depth, MAX_CELL_WIDTH);

    let mut failed = 0;
    for (i, query) in queries.iter().enumerate() {
        if i > 0 && !args.json {
            let _ = out_tx.send(OutputLine::Stdout(String::new()));
        }
        let raw = match service.execute(orchestrator.session().as_deref(), query).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "query execution failed");
                let _ = out_tx.send(OutputLine::Stderr(format!("Query failed: {e}")));
                failed += 1;
                continue;
            }
        };

        if args.json {
            // The envelope is passed through as-is but still decides the exit status.
            match envelope::parse(&raw) {
                Ok(Envelope::Results(_)) => {}
                Ok(Envelope::QueryFailed(failure)) => {
                    tracing::debug!(error = %failure.message, "query reported an error");
                    failed += 1;
                }
                Err(failure) => {
                    tracing::debug!(error = %failure, "undecodable envelope");
                    failed += 1;
                }
            }
            let _ = out_tx.send(OutputLine::Stdout(raw));
            continue;
        }

        let presentation = presenter.present(&raw);
        let summary = build_text_summary(&presentation, &layout, args.view);
        if summary.failed {
            failed += 1;
        }
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    Ok(failed)
}

/// Print bootstrap progress to stderr until the reporter goes away.
async fn print_boot_events(
    steps: Vec<BootStep>,
    mut evt_rx: mpsc::UnboundedReceiver<BootEvent>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
) {
    let total = steps.len();
    while let Some(ev) = evt_rx.recv().await {
        let line = match ev {
            BootEvent::Began { steps } => format!("== Initializing runtime ({} steps) ==", steps.len()),
            BootEvent::StepStarted { index } => {
                let label = steps.get(index).map_or("?", |s| s.label.as_str());
                format!("[{}/{}] {}", index + 1, total, label)
            }
            BootEvent::StepCompleted { index, elapsed_ms } => {
                format!("[{}/{}] done in {} ms", index + 1, total, elapsed_ms)
            }
            BootEvent::Info(info) => info.to_message(),
            BootEvent::Hidden => break,
        };
        let _ = out_tx.send(OutputLine::Stderr(line));
    }
}

async fn log_state_changes(mut state_rx: tokio::sync::watch::Receiver<BootstrapState>) {
    while state_rx.changed().await.is_ok() {
        match &*state_rx.borrow_and_update() {
            BootstrapState::Pending => {}
            BootstrapState::Initializing { step } => tracing::debug!(step, "bootstrap step running"),
            BootstrapState::Ready(session) => {
                tracing::info!(db_path = session.db_path(), "runtime ready")
            }
            BootstrapState::Failed(failure) => tracing::debug!(%failure, "bootstrap failed"),
        }
    }
}

/// Split stdin into queries: blocks of text separated by blank lines.
fn split_queries(input: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                queries.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        queries.push(current.join("\n"));
    }
    queries
}

fn pretty_schema(schema: &str) -> String {
    serde_json::from_str::<serde_json::Value>(schema)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| schema.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_config;
    use crate::runtime::mock::MockRuntime;

    const FAILED_ENVELOPE: &str =
        r#"{"sql":"","cols":[],"rows":[],"output":{"error":"syntax error"}}"#;

    async fn run_against(mock: &MockRuntime, flags: &[&str], queries: &[&str]) -> (usize, Vec<String>) {
        let args = Cli::parse_from(std::iter::once("eqlize-console").chain(flags.iter().copied()));
        let orch = BootstrapOrchestrator::new(Arc::new(mock.clone()), test_config());
        orch.bootstrap(Arc::new(ProgressReporter::disabled()))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let queries: Vec<String> = queries.iter().map(|q| q.to_string()).collect();
        let failed = run_queries(&args, &orch, &queries, &tx).await.unwrap();
        drop(tx);

        let mut stdout = Vec::new();
        while let Some(line) = rx.recv().await {
            if let OutputLine::Stdout(line) = line {
                stdout.push(line);
            }
        }
        (failed, stdout)
    }

    #[tokio::test]
    async fn json_mode_counts_query_errors_and_prints_raw_envelope() {
        let mock = MockRuntime::new().with_response("run_edgeql", FAILED_ENVELOPE);
        let (failed, stdout) = run_against(&mock, &["--json"], &["select Nope"]).await;
        assert_eq!(failed, 1);
        assert_eq!(stdout, vec![FAILED_ENVELOPE]);
    }

    #[tokio::test]
    async fn json_mode_counts_undecodable_envelopes() {
        let mock = MockRuntime::new().with_response("run_edgeql", "{not json");
        let (failed, stdout) = run_against(&mock, &["--json"], &["select User"]).await;
        assert_eq!(failed, 1);
        assert_eq!(stdout, vec!["{not json"]);
    }

    #[tokio::test]
    async fn successful_queries_do_not_count_as_failures() {
        let mock = MockRuntime::new();
        let (failed, _) = run_against(&mock, &["--json"], &["select User", "select Post"]).await;
        assert_eq!(failed, 0);
        let (failed, _) = run_against(&mock, &[], &["select User"]).await;
        assert_eq!(failed, 0);
    }

    #[tokio::test]
    async fn text_mode_counts_query_errors() {
        let mock = MockRuntime::new().with_response("run_edgeql", FAILED_ENVELOPE);
        let (failed, stdout) = run_against(&mock, &[], &["select Nope"]).await;
        assert_eq!(failed, 1);
        assert_eq!(stdout[0], "Query failed: syntax error");
    }

    #[test]
    fn stdin_queries_are_split_on_blank_lines() {
        let input = "select User {\n  name\n}\n\n\n  \nselect Post\n";
        assert_eq!(
            split_queries(input),
            vec!["select User {\n  name\n}", "select Post"]
        );
        assert!(split_queries("\n \n").is_empty());
    }

    #[test]
    fn config_defaults_come_from_flags() {
        let args = Cli::parse_from(["eqlize-console", "--storage-dir", "/tmp/eq", "select User"]);
        let cfg = build_config(&args);
        assert_eq!(cfg.storage_root, PathBuf::from("/tmp/eq"));
        assert_eq!(cfg.python, "python3");
        assert_eq!(cfg.db_path, "/data/demo.sqlite");
        assert_eq!(cfg.capabilities, vec!["pip", "sqlite3"]);
        assert_eq!(cfg.init_delay, Duration::from_millis(50));
        assert_eq!(cfg.success_dwell, Duration::from_millis(500));
        assert_eq!(args.queries, vec!["select User"]);
    }

    #[test]
    fn capabilities_can_be_repeated() {
        let args = Cli::parse_from([
            "eqlize-console",
            "--capability",
            "sqlite3",
            "--capability",
            "json",
        ]);
        assert_eq!(build_config(&args).capabilities, vec!["sqlite3", "json"]);
        assert!(args.queries.is_empty());
    }

    #[test]
    fn schema_is_pretty_printed_when_json() {
        assert_eq!(pretty_schema(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(pretty_schema("not json"), "not json");
    }
}
