// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the commands of the
//! dispatched tasks, using `tokio::process::Command`, and reporting back to
//! the scheduling runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the main executor loop which manages task
//!   processes and their cancellation.
//! - [`task_runner`] handles individual task process execution.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorRequest};
