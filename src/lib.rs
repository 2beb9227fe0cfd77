#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod common;
mod error;

// Public modules
pub mod actor;
#[cfg(feature = "async")]
pub mod async_dht;
pub mod core;
mod dht;
pub mod transport;
pub mod validator;

pub use crate::common::{
    AddOutcome, BucketEntry, Data, DistanceKey, EntryState, Id, KBucket, Message, MessageKind,
    Node, Prefix, RequestSpecific, ResponseSpecific, RoutingTable, Rpc, ID_SIZE,
    MAX_BUCKET_SIZE_K,
};
pub use crate::core::iterative_query::ALPHA;
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, DhtWasShutdown, Testnet};
pub use error::{Error, Result};
pub use validator::{AcceptAll, SignedValue, SignedValueValidator, StorableValidator};

pub use ed25519_dalek::SigningKey;
