//! Error types for srop.

use thiserror::Error;

/// Main error type for all srop operations.
#[derive(Debug, Error)]
pub enum SropError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame declared a body longer than the configured maximum.
    ///
    /// The stream is desynchronised after this; the connection must close.
    #[error("frame body of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: u64, max: u64 },

    /// The stream ended in the middle of a frame.
    #[error("truncated frame")]
    Truncated,

    /// A constructor for this type code is already registered and produces
    /// a different concrete message type.
    #[error("conflicting registration for message type {type_code:#018x}")]
    RegistryConflict { type_code: u64 },

    /// A constructor produced a message whose self-reported type code does
    /// not match the code it was registered under.
    #[error("constructor registered for {registered:#018x} reports type {reported:#018x}")]
    TypeCodeMismatch { registered: u64, reported: u64 },

    /// A registered message failed to unmarshal.
    #[error("could not unmarshal message of type {type_code:#018x}")]
    Unmarshal { type_code: u64 },

    /// Peer violated the protocol (e.g. a response with no matching request).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is closed; pending and future operations fail.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using SropError.
pub type Result<T> = std::result::Result<T, SropError>;
