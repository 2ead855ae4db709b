//! Bootstrap lifecycle controller.
//!
//! Runs the fixed step sequence against a [`RuntimeLoader`], publishes the lifecycle
//! state and keeps at most one sequence in flight.

use super::runner::{LOAD_DB, RUNNER_CODE};
use super::session::RuntimeSession;
use crate::model::{BootConfig, BootStep, StepKind};
use crate::progress::ProgressReporter;
use crate::runtime::{self, EntrypointArgs, RuntimeConfig, RuntimeError, RuntimeHandle, RuntimeLoader};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub(crate) enum BootstrapState {
    Pending,
    Initializing { step: usize },
    Ready(Arc<RuntimeSession>),
    Failed(BootstrapFailure),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("step {index} ({label}) failed: {message}")]
pub(crate) struct BootstrapFailure {
    pub index: usize,
    pub label: String,
    pub message: String,
    pub trace: Option<String>,
}

impl BootstrapFailure {
    fn new(step: &BootStep, err: &RuntimeError) -> Self {
        Self {
            index: step.index,
            label: step.label.clone(),
            message: err.to_string(),
            trace: err.trace().map(str::to_string),
        }
    }
}

pub(crate) type BootstrapOutcome = Result<Arc<RuntimeSession>, BootstrapFailure>;

type InFlight = Shared<BoxFuture<'static, BootstrapOutcome>>;

pub(crate) struct BootstrapOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    loader: Arc<dyn RuntimeLoader>,
    config: BootConfig,
    steps: Vec<BootStep>,
    state_tx: watch::Sender<BootstrapState>,
    in_flight: Mutex<Option<InFlight>>,
}

/// What earlier steps left behind for later ones.
#[derive(Default)]
struct BootContext {
    handle: Option<Box<dyn RuntimeHandle>>,
    db_path: Option<String>,
    schema: Option<String>,
}

impl BootstrapOrchestrator {
    pub fn new(loader: Arc<dyn RuntimeLoader>, config: BootConfig) -> Self {
        let steps = BootStep::sequence(&config);
        let (state_tx, _) = watch::channel(BootstrapState::Pending);
        Self {
            inner: Arc::new(Inner {
                loader,
                config,
                steps,
                state_tx,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn steps(&self) -> &[BootStep] {
        &self.inner.steps
    }

    #[cfg(test)]
    pub fn state(&self) -> BootstrapState {
        self.inner.state_tx.borrow().clone()
    }

    /// Observe lifecycle transitions without being able to cause them.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.inner.state_tx.subscribe()
    }

    pub fn session(&self) -> Option<Arc<RuntimeSession>> {
        match &*self.inner.state_tx.borrow() {
            BootstrapState::Ready(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Bring the runtime to Ready.
    ///
    /// A call made while a sequence is in flight joins that sequence and gets its
    /// outcome; `reporter` is only used by the call that starts a sequence. Once Ready,
    /// the existing session is returned. After a failure the next call starts over
    /// from the first step.
    pub async fn bootstrap(&self, reporter: Arc<ProgressReporter>) -> BootstrapOutcome {
        let in_flight = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(session) = self.session() {
                return Ok(session);
            }
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("bootstrap already in flight; joining it");
                    running.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let sequence = async move { inner.run(reporter).await }
                        .boxed()
                        .shared();
                    *slot = Some(sequence.clone());
                    // Keeps the sequence running even if every caller stops waiting.
                    tokio::spawn(sequence.clone());
                    sequence
                }
            }
        };
        in_flight.await
    }
}

impl Inner {
    async fn run(&self, reporter: Arc<ProgressReporter>) -> BootstrapOutcome {
        reporter.begin(&self.steps);
        reporter.set_status("Initializing runtime...");
        tracing::info!(steps = self.steps.len(), "bootstrap started");

        match self.run_steps(&reporter).await {
            Ok(session) => {
                let session = Arc::new(session);
                reporter.log("Ready. You can run queries now.");
                self.settle(BootstrapState::Ready(session.clone()));
                reporter.set_status("Ready");
                tracing::info!(db_path = %session.db_path(), "runtime ready");

                if reporter.is_enabled() {
                    tokio::time::sleep(self.config.success_dwell).await;
                    reporter.hide();
                }
                Ok(session)
            }
            Err(failure) => {
                tracing::error!(
                    step = failure.index,
                    label = %failure.label,
                    error = %failure.message,
                    "bootstrap failed"
                );
                reporter.log_failure(&failure.to_string(), failure.trace.as_deref());
                reporter.set_status("Error");
                reporter.hide();
                self.settle(BootstrapState::Failed(failure.clone()));
                Err(failure)
            }
        }
    }

    /// Publish a final state and release the in-flight slot in one step, so a caller
    /// never joins a sequence that has already settled.
    fn settle(&self, state: BootstrapState) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        slot.take();
        self.state_tx.send_replace(state);
    }

    async fn run_steps(&self, reporter: &ProgressReporter) -> Result<RuntimeSession, BootstrapFailure> {
        let mut ctx = BootContext::default();

        for step in &self.steps {
            self.state_tx
                .send_replace(BootstrapState::Initializing { step: step.index });
            reporter.step_started(step.index);
            reporter.log(self.start_message(step));

            let started = Instant::now();
            self.run_step(step, &mut ctx, reporter)
                .await
                .map_err(|err| BootstrapFailure::new(step, &err))?;

            reporter
                .mark_complete(step.index)
                .unwrap_or_else(|err| tracing::warn!(%err, "progress display out of sync"));
            tracing::debug!(
                step = step.index,
                label = %step.label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "bootstrap step complete"
            );
        }

        let handle = ctx.handle.ok_or_else(|| BootstrapFailure {
            index: 0,
            label: self.steps.first().map(|s| s.label.clone()).unwrap_or_default(),
            message: "runtime was never acquired".to_string(),
            trace: None,
        })?;
        let db_path = ctx
            .db_path
            .unwrap_or_else(|| handle.storage_path(&self.config.db_path));
        Ok(RuntimeSession::new(handle, db_path, ctx.schema))
    }

    async fn run_step(
        &self,
        step: &BootStep,
        ctx: &mut BootContext,
        reporter: &ProgressReporter,
    ) -> runtime::Result<()> {
        let cfg = &self.config;
        match step.kind {
            StepKind::AcquireRuntime => {
                let handle = self
                    .loader
                    .acquire(&RuntimeConfig {
                        index_url: cfg.index_url.clone(),
                    })
                    .await?;
                ctx.handle = Some(handle);
            }
            StepKind::LoadCapabilities => {
                acquired(&ctx.handle)?
                    .load_capabilities(&cfg.capabilities)
                    .await?;
            }
            StepKind::InstallPackage => {
                acquired(&ctx.handle)?
                    .install_package(&cfg.package_locator)
                    .await?;
            }
            StepKind::MaterializeDataset => {
                let handle = acquired(&ctx.handle)?;
                let bytes = handle
                    .materialize_asset(&cfg.asset_source, &cfg.db_path)
                    .await?;
                let path = handle.storage_path(&cfg.db_path);
                reporter.log_asset(&path, bytes);
                ctx.db_path = Some(path);
            }
            StepKind::PrimeEntrypoint => {
                let handle = acquired(&ctx.handle)?;
                handle.prime_query_entrypoint(RUNNER_CODE).await?;
                let db_path = ctx
                    .db_path
                    .clone()
                    .unwrap_or_else(|| handle.storage_path(&cfg.db_path));
                let schema = handle
                    .run_query(&EntrypointArgs::call(LOAD_DB, db_path))
                    .await?;
                reporter.log("Schema loaded.");
                ctx.schema = Some(schema);
            }
        }
        Ok(())
    }

    fn start_message(&self, step: &BootStep) -> String {
        let cfg = &self.config;
        match step.kind {
            StepKind::AcquireRuntime => "Loading runtime...".to_string(),
            StepKind::LoadCapabilities => {
                format!("Loading packages ({})...", cfg.capabilities.join(", "))
            }
            StepKind::InstallPackage => format!("Installing {}...", cfg.package_locator),
            StepKind::MaterializeDataset => {
                format!("Fetching {} into runtime storage...", cfg.asset_source)
            }
            StepKind::PrimeEntrypoint => "Preparing query runner...".to_string(),
        }
    }
}

fn acquired(handle: &Option<Box<dyn RuntimeHandle>>) -> runtime::Result<&dyn RuntimeHandle> {
    handle
        .as_deref()
        .ok_or_else(|| RuntimeError::Protocol("runtime not acquired".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{test_config, BootEvent};
    use crate::progress::StepStatus;
    use crate::runtime::mock::MockRuntime;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn orchestrator(mock: &MockRuntime) -> BootstrapOrchestrator {
        BootstrapOrchestrator::new(Arc::new(mock.clone()), test_config())
    }

    fn completed_indices(rx: &mut mpsc::UnboundedReceiver<BootEvent>) -> Vec<usize> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BootEvent::StepCompleted { index, .. } = ev {
                out.push(index);
            }
        }
        out
    }

    #[tokio::test]
    async fn successful_bootstrap_completes_steps_in_order() {
        let mock = MockRuntime::new().with_response("load_db", r#"{"tables": {"User": {}}}"#);
        let orch = orchestrator(&mock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(ProgressReporter::new(tx));

        let session = orch.bootstrap(reporter.clone()).await.unwrap();

        assert_eq!(completed_indices(&mut rx), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            mock.calls(),
            vec![
                "acquire",
                "load_capabilities",
                "install_package",
                "materialize_asset",
                "prime_query_entrypoint",
                "run_query:load_db",
            ]
        );
        assert_eq!(session.db_path(), "/data/demo.sqlite");
        assert_eq!(session.schema(), Some(r#"{"tables": {"User": {}}}"#));
        assert!(matches!(orch.state(), BootstrapState::Ready(_)));

        let snap = reporter.snapshot();
        assert_eq!(snap.status, "Ready");
        assert!(!snap.visible);
        assert!(snap.steps.iter().all(|(_, s)| *s == StepStatus::Done));
        assert_eq!(
            snap.log.last().map(String::as_str),
            Some("Ready. You can run queries now.")
        );
    }

    #[tokio::test]
    async fn failing_step_aborts_and_marks_nothing_after_it() {
        let mock = MockRuntime::new().failing_at("install_package");
        let orch = orchestrator(&mock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(ProgressReporter::new(tx));

        let failure = orch.bootstrap(reporter.clone()).await.unwrap_err();

        assert_eq!(failure.index, 2);
        assert_eq!(failure.message, "install_package failed");
        assert_eq!(failure.trace.as_deref(), Some("Traceback: install_package"));
        assert_eq!(completed_indices(&mut rx), vec![0, 1]);
        assert!(!mock.calls().iter().any(|c| c == "materialize_asset"));
        assert!(matches!(orch.state(), BootstrapState::Failed(ref f) if f.index == 2));
        assert!(orch.session().is_none());

        let snap = reporter.snapshot();
        assert_eq!(snap.status, "Error");
        assert!(snap.log.iter().any(|l| l.contains("install_package failed")));
        assert_ne!(snap.steps[2].1, StepStatus::Done);
    }

    #[tokio::test]
    async fn failure_while_loading_schema_fails_last_step() {
        let mock = MockRuntime::new().failing_at("run_query:load_db");
        let orch = orchestrator(&mock);

        let failure = orch
            .bootstrap(Arc::new(ProgressReporter::disabled()))
            .await
            .unwrap_err();
        assert_eq!(failure.index, 4);
        assert_eq!(failure.label, "Prepare runner");
    }

    #[tokio::test]
    async fn retry_after_failure_starts_from_first_step() {
        let mock = MockRuntime::new().failing_at("materialize_asset");
        let orch = orchestrator(&mock);
        let reporter = Arc::new(ProgressReporter::disabled());

        assert!(orch.bootstrap(reporter.clone()).await.is_err());
        mock.clear_failure();
        assert!(orch.bootstrap(reporter).await.is_ok());

        assert_eq!(mock.acquisitions(), 2);
        let acquires = mock.calls().iter().filter(|c| *c == "acquire").count();
        assert_eq!(acquires, 2);
    }

    #[tokio::test]
    async fn ready_orchestrator_returns_existing_session() {
        let mock = MockRuntime::new();
        let orch = orchestrator(&mock);
        let reporter = Arc::new(ProgressReporter::disabled());

        let first = orch.bootstrap(reporter.clone()).await.unwrap();
        let second = orch.bootstrap(reporter).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.acquisitions(), 1);
    }

    #[tokio::test]
    async fn concurrent_bootstrap_joins_the_running_sequence() {
        let mock = MockRuntime::new().holding_acquire();
        let orch = orchestrator(&mock);
        let reporter = Arc::new(ProgressReporter::detached());

        let (a, b, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                orch.bootstrap(reporter.clone()),
                orch.bootstrap(Arc::new(ProgressReporter::disabled())),
                async {
                    tokio::task::yield_now().await;
                    assert!(matches!(orch.state(), BootstrapState::Initializing { step: 0 }));
                    mock.release_acquire();
                }
            )
        })
        .await
        .expect("bootstrap did not finish");

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mock.acquisitions(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_state_is_never_published_with_a_joinable_sequence() {
        let mock = MockRuntime::new().failing_at("load_capabilities");
        let orch = Arc::new(orchestrator(&mock));
        let mut rx = orch.subscribe();

        let observer = {
            let orch = orch.clone();
            tokio::spawn(async move {
                loop {
                    rx.changed().await.unwrap();
                    let failed = matches!(*rx.borrow_and_update(), BootstrapState::Failed(_));
                    if failed {
                        return orch.inner.in_flight.lock().unwrap().is_none();
                    }
                }
            })
        };

        assert!(orch
            .bootstrap(Arc::new(ProgressReporter::disabled()))
            .await
            .is_err());
        assert!(observer.await.unwrap(), "slot still held after Failed was published");

        mock.clear_failure();
        assert!(orch
            .bootstrap(Arc::new(ProgressReporter::disabled()))
            .await
            .is_ok());
        assert_eq!(mock.acquisitions(), 2);
    }

    #[tokio::test]
    async fn observers_see_the_final_state() {
        let mock = MockRuntime::new();
        let orch = orchestrator(&mock);
        let mut rx = orch.subscribe();
        assert!(matches!(*rx.borrow(), BootstrapState::Pending));

        orch.bootstrap(Arc::new(ProgressReporter::disabled()))
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert!(matches!(*rx.borrow_and_update(), BootstrapState::Ready(_)));
    }
}
