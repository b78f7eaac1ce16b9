//! Batch fan-out launcher and polling completion monitor.
//!
//! This crate owns the launch protocol, the status model, the completion
//! aggregation and the orchestration state machine. It intentionally
//! excludes AWS SDK and Lambda runtime concerns; those live in
//! `fanout_lambda` behind the [`store::StatusStore`] and
//! [`launcher::TaskSubmitter`] traits.

pub mod checkpoint;
pub mod config;
pub mod contract;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod records;
pub mod reporter;
pub mod store;

pub use error::FanoutError;
