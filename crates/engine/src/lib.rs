#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The job-tree manager's coordination engine: job lifecycle and process
//! supervision, grouped admission with CPU gating, the control-pipe
//! protocol, the interval/cron scheduler, and the idle-detection
//! termination condition.
//!
//! `unsafe` is confined to [`supervisor`]'s `pre_exec` hook, the one place
//! the fd-remap contract requires it; everything above that layer is safe
//! Rust.

/// Public API for embedding the engine (`EngineConfig`/`EngineHandle`).
pub mod api;

mod command_task;
mod group;
mod job;
mod logging_task;
mod manager;
mod message;
mod pipe;
mod protocol;
mod scheduler;
#[allow(unsafe_code)]
mod supervisor;
mod stats;

pub use api::{start_engine, EngineConfig, EngineError, EngineHandle};
pub use job::JobExit;
pub use manager::ManagerEvent;
