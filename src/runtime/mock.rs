//! Scripted runtime for tests.
//!
//! Records every call, can fail a chosen operation and can hold acquisition or
//! queries until the test releases them.

use super::{EntrypointArgs, Result, RuntimeConfig, RuntimeError, RuntimeHandle, RuntimeLoader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub(crate) struct MockRuntime {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<String>>,
    acquisitions: AtomicUsize,
    fail_on: Mutex<Option<String>>,
    responses: Mutex<HashMap<String, String>>,
    hold_acquire: AtomicBool,
    acquire_gate: Notify,
    hold_queries: AtomicBool,
    query_gate: Notify,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the named operation (`acquire`, `install_package`, `run_query:load_db`, ...).
    pub fn failing_at(self, op: &str) -> Self {
        self.fail_on(op);
        self
    }

    pub fn fail_on(&self, op: &str) {
        *self.state.fail_on.lock().unwrap() = Some(op.to_string());
    }

    pub fn clear_failure(&self) {
        *self.state.fail_on.lock().unwrap() = None;
    }

    pub fn with_response(self, function: &str, value: &str) -> Self {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(function.to_string(), value.to_string());
        self
    }

    pub fn holding_acquire(self) -> Self {
        self.state.hold_acquire.store(true, Ordering::SeqCst);
        self
    }

    pub fn release_acquire(&self) {
        self.state.acquire_gate.notify_one();
    }

    pub fn holding_queries(self) -> Self {
        self.state.hold_queries.store(true, Ordering::SeqCst);
        self
    }

    pub fn release_query(&self) {
        self.state.query_gate.notify_one();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str) -> Result<()> {
        self.state.calls.lock().unwrap().push(op.to_string());
        match self.state.fail_on.lock().unwrap().as_deref() {
            Some(failing) if failing == op => Err(RuntimeError::Script {
                message: format!("{op} failed"),
                trace: Some(format!("Traceback: {op}")),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RuntimeLoader for MockRuntime {
    async fn acquire(&self, _config: &RuntimeConfig) -> Result<Box<dyn RuntimeHandle>> {
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.state.hold_acquire.load(Ordering::SeqCst) {
            self.state.acquire_gate.notified().await;
        }
        self.record("acquire")?;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RuntimeHandle for MockRuntime {
    async fn load_capabilities(&self, _names: &[String]) -> Result<()> {
        self.record("load_capabilities")
    }

    async fn install_package(&self, _locator: &str) -> Result<()> {
        self.record("install_package")
    }

    async fn materialize_asset(&self, _source: &str, _dest: &str) -> Result<u64> {
        self.record("materialize_asset")?;
        Ok(4096)
    }

    async fn prime_query_entrypoint(&self, _code: &str) -> Result<()> {
        self.record("prime_query_entrypoint")
    }

    async fn run_query(&self, args: &EntrypointArgs) -> Result<String> {
        if args.function != "load_db" && self.state.hold_queries.load(Ordering::SeqCst) {
            self.state.query_gate.notified().await;
        }
        self.record(&format!("run_query:{}", args.function))?;
        let response = self
            .state
            .responses
            .lock()
            .unwrap()
            .get(&args.function)
            .cloned();
        Ok(response.unwrap_or_else(|| match args.function.as_str() {
            "load_db" => r#"{"tables": {}}"#.to_string(),
            _ => r#"{"sql": "", "cols": [], "rows": [], "output": []}"#.to_string(),
        }))
    }
}
