//! Outbound delivery to Telegram.
//!
//! [`telegram`] talks to the Bot API, [`dispatcher`] routes requests to named
//! destinations through the shared rate limiter, and [`sink`] forwards
//! selected `tracing` events to the error group.
pub mod dispatcher;
pub mod sink;
pub mod telegram;
