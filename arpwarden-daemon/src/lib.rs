//! arpwarden daemon library.
//!
//! Exposes the daemon's building blocks for integration testing.
//! In production, `arpwarden-daemon` is used as a binary (main.rs).

pub mod app;
pub mod cli;
pub mod context;
pub mod logging;
pub mod replay;
pub mod rules;

pub use app::{Daemon, RunReport};
