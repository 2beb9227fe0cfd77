//! Transports carry [Message]s between nodes.
//!
//! The node never touches bytes or sockets itself, it hands typed messages to
//! a [Transport] and polls it for incoming ones.

use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::common::Message;

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

pub trait Transport: Debug + Send {
    /// Fire and forget a message to `to`.
    fn send(&mut self, message: Message, to: SocketAddr) -> io::Result<()>;

    /// Wait up to `timeout` for the next message and the address it came from.
    fn recv(&mut self, timeout: Duration) -> Option<(Message, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;
}
