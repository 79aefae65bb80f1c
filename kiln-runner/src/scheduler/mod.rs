//! Scheduler layer for the runner
//!
//! This layer pulls work items off the queue and hands them to the
//! execution service, bounded by the worker pool size. A delivery is
//! acknowledged only after its run has finished and been reported.

pub mod consumer;

pub use consumer::WorkConsumer;
