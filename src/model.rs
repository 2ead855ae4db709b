use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// Interpreter executable used as the embedded runtime.
    pub python: String,
    /// Host directory backing the runtime's storage.
    pub storage_root: PathBuf,
    /// Package index the runtime installs from.
    pub index_url: String,
    /// Where the demo database is fetched from (URL or local path).
    pub asset_source: String,
    /// Destination of the demo database inside the runtime's storage.
    pub db_path: String,
    /// Installable query-compiler package.
    pub package_locator: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub init_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub success_dwell: Duration,
}

/// What a bootstrap step does against the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    AcquireRuntime,
    LoadCapabilities,
    InstallPackage,
    MaterializeDataset,
    PrimeEntrypoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootStep {
    pub index: usize,
    pub label: String,
    pub kind: StepKind,
}

impl BootStep {
    /// The fixed bootstrap sequence. Labels are derived from the config once,
    /// indices are contiguous from 0.
    pub fn sequence(cfg: &BootConfig) -> Vec<BootStep> {
        let package_name = cfg
            .package_locator
            .rsplit('/')
            .next()
            .unwrap_or(cfg.package_locator.as_str());
        [
            (StepKind::AcquireRuntime, "Load runtime".to_string()),
            (
                StepKind::LoadCapabilities,
                format!("Load packages ({})", cfg.capabilities.join(", ")),
            ),
            (StepKind::InstallPackage, format!("Install {package_name}")),
            (StepKind::MaterializeDataset, "Load demo DB".to_string()),
            (StepKind::PrimeEntrypoint, "Prepare runner".to_string()),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (kind, label))| BootStep { index, label, kind })
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BootEvent {
    /// The step list was (re)frozen and every step is pending.
    Began {
        steps: Vec<BootStep>,
    },
    StepStarted {
        index: usize,
    },
    StepCompleted {
        index: usize,
        elapsed_ms: u64,
    },
    Info(InfoEvent),
    /// The progress display was hidden (after the success dwell or on failure).
    Hidden,
}

/// Structured info events emitted during bootstrap and consumed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Status(String),
    AssetLoaded { path: String, bytes: u64 },
    Failure { message: String, trace: Option<String> },
}

impl InfoEvent {
    /// Render a human-readable message for the CLI.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Status(status) => format!("[{status}]"),
            InfoEvent::AssetLoaded { path, bytes } => {
                format!("Wrote {} bytes to {}", bytes, path)
            }
            InfoEvent::Failure { message, trace } => match trace {
                Some(trace) => format!("{message}\n{trace}"),
                None => message.clone(),
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> BootConfig {
    BootConfig {
        python: "python3".into(),
        storage_root: PathBuf::from("/tmp/eqlize-test"),
        index_url: "https://pypi.org/simple".into(),
        asset_source: "./assets/demo.sqlite".into(),
        db_path: "/data/demo.sqlite".into(),
        package_locator: "./wheels/eqlize-0.1.0-py3-none-any.whl".into(),
        capabilities: vec!["pip".into(), "sqlite3".into()],
        init_delay: Duration::ZERO,
        success_dwell: Duration::ZERO,
    }
}
