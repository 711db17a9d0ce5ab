// src/error.rs
use crate::proxy::session::SessionState;
use std::io;
use thiserror::Error;
use tourmaline_binary::BinaryError;

/// Errors that can occur while proxying a session.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// An I/O error occurred, likely related to an underlying UDP socket.
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error occurred during binary serialization or deserialization.
    #[error("Binary handling error: {0}")]
    Binary(#[from] BinaryError),

    /// A reliable encapsulated packet arrived without a message index.
    #[error("Reliable packet is missing its message index")]
    NoIndex,

    /// A reliable message index was delivered twice.
    #[error("Duplicate reliable index: {0}")]
    DuplicateIndex(u32),

    /// A fifth concurrent split reassembly was started.
    #[error("Exceeded maximum concurrent split reassemblies")]
    TooManySplits,

    /// An event subscriber produced an unusable replacement.
    #[error("Event subscriber error: {0}")]
    Event(String),

    /// Batch decryption/encryption or key agreement failed.
    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    /// A handshake packet arrived in a state that cannot accept it.
    #[error("Packet {packet:#04x} not valid in state {state:?}")]
    StateMismatch { packet: u32, state: SessionState },
}

impl ProxyError {
    /// Whether this error tears the session down.
    ///
    /// Non-fatal conditions drop the offending datagram (or packet) and are
    /// logged; the endpoints' own RakNet stacks recover via retransmission.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProxyError::Io(_) => true,
            ProxyError::Binary(_) => false,
            ProxyError::NoIndex => true,
            ProxyError::DuplicateIndex(_) => true,
            ProxyError::TooManySplits => true,
            ProxyError::Event(_) => true,
            ProxyError::Crypto(_) => true,
            ProxyError::StateMismatch { .. } => false,
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
