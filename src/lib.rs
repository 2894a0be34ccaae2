//! Execution dispatch engine for a browser-hosted multi-language IDE.
//!
//! Resolves a run request to a runtime, stages its files into a virtual
//! filesystem, drives the strategy-appropriate execution context (offloaded
//! worker, sandboxed document, or inline validation), streams output back,
//! enforces timeouts and cooperative cancellation, and always finalizes a
//! single uniform [`domain::RunResult`].

pub mod backend;
pub mod cache;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod registry;
pub mod store;
pub mod stubs;
pub mod vfs;

#[cfg(test)]
mod integration_test;

pub use dispatch::engine::DispatchEngine;
pub use dispatch::handle::RunHandle;
pub use domain::{FileContent, RunRequest, RunResult};
pub use registry::RuntimeRegistry;
