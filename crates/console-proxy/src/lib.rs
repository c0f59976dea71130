//! Interactive container exec gateway.
//!
//! Bridges a client WebSocket onto the stdio of an exec instance running in
//! a container, enforcing at most one session per container when configured
//! and keeping idle sessions alive with ping frames.

pub mod api;
pub mod config;
pub mod engine;
pub mod exec;
pub mod session;
pub mod transport;
