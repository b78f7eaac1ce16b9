//! AWS adapters and Lambda entry points for the fan-out launcher.
//!
//! This crate owns runtime integration details (Lambda handlers, the DynamoDB
//! status store, the ECS task submitter and task metadata lookup). All launch,
//! polling and orchestration rules live in `fanout_core`.

pub mod adapters;
pub mod handlers;
