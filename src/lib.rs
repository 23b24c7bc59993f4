//! tgdispatch - Telegram notification dispatch
//!
//! Routes text, event, photo and document notifications to named Telegram
//! groups and forum topics through a shared rate limiter, and forwards
//! selected `tracing` events to an error group without blocking the caller.
pub mod cli;
pub mod config;
pub mod core;
pub mod formatting;
pub mod notification;
pub mod rate_limit;
pub mod registry;
pub mod services;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
