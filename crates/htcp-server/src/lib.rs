//! HTCP Server Library
//!
//! Accepts long-lived client connections, optionally negotiates a
//! session key by Diffie-Hellman, optionally validates a shared passkey,
//! and dispatches length-framed packages to registered transaction
//! handlers under two-level admission control.

pub mod config;
mod connection;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;
