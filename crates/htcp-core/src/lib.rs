//! HTCP Core Library
//!
//! Wire protocol for the HTCP request/response protocol:
//! - Frame codec (5-byte header + JSON payload)
//! - Package structures and serialization
//! - Session crypto (Diffie-Hellman agreement, AES-CBC records)
//! - Transaction handler registry and dispatch

pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod handler;
pub mod package;
pub mod utils;

pub use dispatcher::Dispatcher;
pub use error::Error;
pub use handler::{ClientInfo, HandlerRegistry, Request, TransactionHandler};
pub use package::{Package, create_error_package};

/// Common result type for HTCP wire operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
