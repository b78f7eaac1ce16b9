//! AWS implementations of the core adapter traits.

pub mod dynamodb;
pub mod ecs;
pub mod metadata;
