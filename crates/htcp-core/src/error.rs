//! Wire-level error contract
//!
//! Each variant maps to a connection outcome: `Closed` releases the
//! connection without noise, `UnknownTransaction` is reported back to the
//! client as an error package, everything else tears the connection down.

use thiserror::Error;

/// Errors raised by the HTCP wire layers
#[derive(Debug, Error)]
pub enum Error {
    /// Peer closed the stream cleanly between frames. Not a failure.
    #[error("connection closed by peer")]
    Closed,

    /// Malformed frame, impossible length word, bad package JSON or an
    /// unknown handshake message type.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// DH math failure, bad padding or a too-short ciphertext.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// A crypto operation was invoked before the state machine reached
    /// the step that permits it.
    #[error("crypto state error: {0}")]
    CryptoState(&'static str),

    /// No handler registered for the requested transaction.
    ///
    /// The display text is part of the protocol surface: it becomes the
    /// error package content seen by clients.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a protocol violation with a formatted message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for a crypto failure with a formatted message
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }
}
