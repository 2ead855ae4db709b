//! Progress reporting for the bootstrap sequence.
//!
//! The reporter keeps a snapshot of what a progress display would show (step list,
//! status line, log) and forwards every change as a [`BootEvent`] to presentation layers.
//! A disabled reporter accepts the same calls and does nothing.

use crate::model::{BootEvent, BootStep, InfoEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("step {index} is not part of the current sequence ({len} steps)")]
    UnknownStep { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Done,
}

/// What the progress display currently shows.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub visible: bool,
    pub status: String,
    pub steps: Vec<(BootStep, StepStatus)>,
    pub log: Vec<String>,
}

pub struct ProgressReporter {
    inner: Option<Inner>,
    /// Length of the frozen sequence, tracked even when disabled.
    step_count: AtomicUsize,
}

struct Inner {
    display: Mutex<Display>,
    event_tx: Option<UnboundedSender<BootEvent>>,
}

#[derive(Default)]
struct Display {
    snapshot: ProgressSnapshot,
    started: Vec<Option<Instant>>,
}

impl ProgressReporter {
    /// Enabled reporter forwarding changes to `event_tx`.
    pub fn new(event_tx: UnboundedSender<BootEvent>) -> Self {
        Self::enabled(Some(event_tx))
    }

    /// Enabled reporter that only keeps its snapshot.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self::enabled(None)
    }

    /// No-op reporter for silent bootstraps. Nothing is displayed or emitted, but
    /// `mark_complete` still rejects steps outside the sequence given to `begin`.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            step_count: AtomicUsize::new(0),
        }
    }

    fn enabled(event_tx: Option<UnboundedSender<BootEvent>>) -> Self {
        Self {
            inner: Some(Inner {
                display: Mutex::new(Display::default()),
                event_tx,
            }),
            step_count: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Reset the display and freeze `steps` as the known sequence, all pending.
    pub fn begin(&self, steps: &[BootStep]) {
        self.step_count.store(steps.len(), Ordering::Release);
        let Some(inner) = &self.inner else { return };
        let mut display = inner.lock();
        display.snapshot = ProgressSnapshot {
            visible: true,
            status: String::new(),
            steps: steps.iter().cloned().map(|s| (s, StepStatus::Pending)).collect(),
            log: Vec::new(),
        };
        display.started = vec![None; steps.len()];
        inner.emit(BootEvent::Began {
            steps: steps.to_vec(),
        });
    }

    /// Append a message to the log. Messages keep call order.
    pub fn log(&self, message: impl Into<String>) {
        let Some(inner) = &self.inner else { return };
        let message = message.into();
        let mut display = inner.lock();
        display.snapshot.log.push(message.clone());
        inner.emit(BootEvent::Info(InfoEvent::Message(message)));
    }

    /// Report a failure: the message goes to the log like any other entry.
    pub fn log_failure(&self, message: &str, trace: Option<&str>) {
        let Some(inner) = &self.inner else { return };
        let mut display = inner.lock();
        display.snapshot.log.push(match trace {
            Some(trace) => format!("{message}\n{trace}"),
            None => message.to_string(),
        });
        inner.emit(BootEvent::Info(InfoEvent::Failure {
            message: message.to_string(),
            trace: trace.map(str::to_string),
        }));
    }

    pub fn log_asset(&self, path: &str, bytes: u64) {
        let Some(inner) = &self.inner else { return };
        let info = InfoEvent::AssetLoaded {
            path: path.to_string(),
            bytes,
        };
        let mut display = inner.lock();
        display.snapshot.log.push(info.to_message());
        inner.emit(BootEvent::Info(info));
    }

    pub fn set_status(&self, status: &str) {
        let Some(inner) = &self.inner else { return };
        let mut display = inner.lock();
        display.snapshot.status = status.to_string();
        inner.emit(BootEvent::Info(InfoEvent::Status(status.to_string())));
    }

    /// Mark a step as running. Unknown or finished steps are left alone.
    pub fn step_started(&self, index: usize) {
        let Some(inner) = &self.inner else { return };
        let mut display = inner.lock();
        let Some((_, status)) = display.snapshot.steps.get_mut(index) else {
            return;
        };
        if *status != StepStatus::Pending {
            return;
        }
        *status = StepStatus::Running;
        display.started[index] = Some(Instant::now());
        inner.emit(BootEvent::StepStarted { index });
    }

    /// Mark a step as done. Marking a finished step again has no effect.
    pub fn mark_complete(&self, index: usize) -> Result<(), ProgressError> {
        let len = self.step_count.load(Ordering::Acquire);
        let unknown = || {
            tracing::warn!(index, len, "mark_complete called for an unknown step");
            ProgressError::UnknownStep { index, len }
        };
        let Some(inner) = &self.inner else {
            return if index < len { Ok(()) } else { Err(unknown()) };
        };
        let mut display = inner.lock();
        let Some((_, status)) = display.snapshot.steps.get_mut(index) else {
            return Err(unknown());
        };
        if *status == StepStatus::Done {
            return Ok(());
        }
        *status = StepStatus::Done;
        let elapsed_ms = display.started[index]
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        inner.emit(BootEvent::StepCompleted { index, elapsed_ms });
        Ok(())
    }

    pub fn hide(&self) {
        let Some(inner) = &self.inner else { return };
        let mut display = inner.lock();
        if !display.snapshot.visible {
            return;
        }
        display.snapshot.visible = false;
        inner.emit(BootEvent::Hidden);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        match &self.inner {
            Some(inner) => inner.lock().snapshot.clone(),
            None => ProgressSnapshot::default(),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Display> {
        self.display.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Called with the display lock held so events keep snapshot order.
    fn emit(&self, event: BootEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{test_config, BootStep};
    use tokio::sync::mpsc;

    fn steps() -> Vec<BootStep> {
        BootStep::sequence(&test_config())
    }

    #[test]
    fn begin_freezes_all_steps_as_pending() {
        let reporter = ProgressReporter::detached();
        reporter.log("stale");
        reporter.begin(&steps());

        let snap = reporter.snapshot();
        assert!(snap.visible);
        assert!(snap.log.is_empty());
        assert_eq!(snap.steps.len(), 5);
        assert!(snap.steps.iter().all(|(_, s)| *s == StepStatus::Pending));
    }

    #[test]
    fn mark_complete_twice_emits_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx);
        reporter.begin(&steps());
        reporter.step_started(0);
        reporter.mark_complete(0).unwrap();
        reporter.mark_complete(0).unwrap();

        let mut completed = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, BootEvent::StepCompleted { index: 0, .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(reporter.snapshot().steps[0].1, StepStatus::Done);
    }

    #[test]
    fn mark_complete_outside_sequence_is_reported() {
        let reporter = ProgressReporter::detached();
        reporter.begin(&steps());
        assert_eq!(
            reporter.mark_complete(7),
            Err(ProgressError::UnknownStep { index: 7, len: 5 })
        );
    }

    #[test]
    fn log_keeps_call_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx);
        reporter.begin(&steps());
        for i in 0..20 {
            reporter.log(format!("line {i}"));
        }

        let snap = reporter.snapshot();
        let expected: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
        assert_eq!(snap.log, expected);

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BootEvent::Info(InfoEvent::Message(m)) = ev {
                seen.push(m);
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn disabled_reporter_accepts_every_call() {
        let reporter = ProgressReporter::disabled();
        reporter.begin(&steps());
        reporter.log("ignored");
        reporter.step_started(0);
        assert!(reporter.mark_complete(0).is_ok());
        assert!(reporter.mark_complete(0).is_ok());
        reporter.set_status("Ready");
        reporter.hide();

        let snap = reporter.snapshot();
        assert!(!snap.visible);
        assert!(snap.steps.is_empty());
        assert!(snap.log.is_empty());
    }

    #[test]
    fn disabled_reporter_rejects_unknown_steps_like_enabled_one() {
        let disabled = ProgressReporter::disabled();
        let enabled = ProgressReporter::detached();
        for reporter in [&disabled, &enabled] {
            reporter.begin(&steps());
            assert_eq!(
                reporter.mark_complete(42),
                Err(ProgressError::UnknownStep { index: 42, len: 5 })
            );
            assert_eq!(reporter.mark_complete(4), Ok(()));
        }
    }
}
