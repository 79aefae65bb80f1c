//! Repository layer
//!
//! Repositories are stateless clients that abstract communication with the
//! coordinator. They provide simple, focused interfaces without any
//! business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod reporter;

// Re-export traits
pub use reporter::StateReporter;

// Re-export implementations
pub use reporter::HttpStateReporter;
