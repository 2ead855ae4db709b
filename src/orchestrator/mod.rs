//! Runtime bootstrap orchestration.
//!
//! This module owns the bootstrap lifecycle (pending, initializing, ready or failed)
//! and the session it produces. Query and presentation layers only borrow the session.

mod controller;
mod runner;
mod session;

pub(crate) use controller::{BootstrapOrchestrator, BootstrapState};
pub(crate) use runner::RUN_QUERY;
pub(crate) use session::RuntimeSession;
