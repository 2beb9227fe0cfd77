//! Main Crate Error

use crate::common::{MessageKind, Rpc};

#[derive(thiserror::Error, Debug)]
/// Kadtrie crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Id was not [ID_SIZE](crate::common::ID_SIZE) bytes long.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Id string was not 40 hexadecimal characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    /// The payload of a message does not match its rpc and kind.
    #[error("Malformed {kind:?} message for {rpc:?}")]
    MalformedMessage { rpc: Rpc, kind: MessageKind },

    /// Bytes are not a valid [SignedValue](crate::SignedValue) envelope.
    #[error("Invalid signed value: {0}")]
    InvalidSignedValue(&'static str),

    #[error(transparent)]
    /// Transparent [DhtWasShutdown](crate::DhtWasShutdown)
    DhtWasShutdown(#[from] crate::dht::DhtWasShutdown),
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = core::result::Result<T, E>;
