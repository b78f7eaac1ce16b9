//! Event handlers shared by the Lambda runtime binary.

pub mod launcher;
pub mod monitor;
