//! Core DHT logic - pure computation with no direct I/O.
//!
//! Contains query drivers (`iterative_query`, `put_query`), the `server` request
//! handler with its `store`, and `routing_maintenance` timers.
//! All I/O orchestration lives in `actor/`, which calls into this module.

pub(crate) mod iterative_query;
pub(crate) mod put_query;
pub(crate) mod routing_maintenance;
pub mod server;
pub mod store;
