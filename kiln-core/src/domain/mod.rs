//! Core domain types
//!
//! These types are shared between the coordinator (which persists them) and
//! the runner (which receives them inside a Work message).

pub mod log;
pub mod pipeline;
pub mod work;
