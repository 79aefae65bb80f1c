//! Data Transfer Objects for inter-service communication
//!
//! Request bodies of the reporter calls the runner makes against the
//! coordinator's RPC listener, and the read models the coordinator serves.

pub mod pipeline;
pub mod report;
