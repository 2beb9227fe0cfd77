//! In-memory network for tests and simulations.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::trace;

use super::Transport;
use crate::common::Message;

type Envelope = (Message, SocketAddr);

/// A shared switchboard of in-memory transports, addressed by [SocketAddr].
///
/// Messages sent to an address nobody is bound to are dropped, like UDP
/// packets sent to the void.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<SocketAddr, Sender<Envelope>>>>,
    next_port: Arc<AtomicU16>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork {
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(1)),
        }
    }

    /// Bind a transport to the next free loopback port.
    pub fn bind(&self) -> MemoryTransport {
        loop {
            let port = self.next_port.fetch_add(1, Ordering::Relaxed);
            let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

            if let Some(transport) = self.bind_at(address) {
                return transport;
            }
        }
    }

    /// Bind a transport to `address`, unless it is already taken.
    pub fn bind_at(&self, address: SocketAddr) -> Option<MemoryTransport> {
        let mut peers = self.peers();
        if peers.contains_key(&address) {
            return None;
        }

        let (sender, receiver) = flume::unbounded();
        peers.insert(address, sender.clone());

        Some(MemoryTransport {
            address,
            network: self.clone(),
            sender,
            receiver,
        })
    }

    /// Unplug `address`, messages sent to it are dropped from now on.
    pub fn disconnect(&self, address: &SocketAddr) {
        self.peers().remove(address);
    }

    /// Unplug `address` only while it still leads to `sender`.
    fn release(&self, address: &SocketAddr, sender: &Sender<Envelope>) {
        let mut peers = self.peers();

        if peers
            .get(address)
            .map(|bound| bound.same_channel(sender))
            .unwrap_or(false)
        {
            peers.remove(address);
        }
    }

    pub fn is_connected(&self, address: &SocketAddr) -> bool {
        self.peers().contains_key(address)
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<SocketAddr, Sender<Envelope>>> {
        match self.peers.lock() {
            Ok(peers) => peers,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a [MemoryNetwork].
#[derive(Debug)]
pub struct MemoryTransport {
    address: SocketAddr,
    network: MemoryNetwork,
    /// The sending end registered for `address`, to recognize it on drop.
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.release(&self.address, &self.sender);
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: Message, to: SocketAddr) -> io::Result<()> {
        let peers = self.network.peers();

        match peers.get(&to) {
            Some(sender) => {
                // The transport holds its own sender, so the channel stays open.
                let _ = sender.send((message, self.address));
            }
            None => {
                trace!(context = "memory_transport", ?to, "Message sent to the void");
            }
        }

        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Option<(Message, SocketAddr)> {
        self.receiver.recv_timeout(timeout).ok()
    }

    fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Node, RequestSpecific};

    fn ping(from: &MemoryTransport) -> Message {
        Message::request(
            1,
            Node::new(crate::Id::random(), from.local_addr()),
            RequestSpecific::Ping,
        )
    }

    #[test]
    fn delivers_with_sender_address() {
        let network = MemoryNetwork::new();
        let mut a = network.bind();
        let mut b = network.bind();

        let message = ping(&a);
        a.send(message.clone(), b.local_addr()).unwrap();

        let (received, from) = b.recv(Duration::from_millis(100)).unwrap();
        assert_eq!(received, message);
        assert_eq!(from, a.local_addr());
    }

    #[test]
    fn disconnected_address_drops_messages() {
        let network = MemoryNetwork::new();
        let mut a = network.bind();
        let mut b = network.bind();

        network.disconnect(&b.local_addr());
        assert!(!network.is_connected(&b.local_addr()));

        a.send(ping(&a), b.local_addr()).unwrap();
        assert!(b.recv(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn dropping_transport_frees_address() {
        let network = MemoryNetwork::new();
        let address = SocketAddr::from(([127, 0, 0, 1], 9999));

        let transport = network.bind_at(address).unwrap();
        assert!(network.bind_at(address).is_none());

        drop(transport);
        assert!(network.bind_at(address).is_some());
    }

    #[test]
    fn dropping_disconnected_transport_keeps_rebound_address() {
        let network = MemoryNetwork::new();
        let address = SocketAddr::from(([127, 0, 0, 1], 9998));

        let old = network.bind_at(address).unwrap();
        network.disconnect(&address);

        let mut new = network.bind_at(address).unwrap();
        drop(old);

        assert!(network.is_connected(&address));

        let mut sender = network.bind();
        sender.send(ping(&sender), address).unwrap();
        assert!(new.recv(Duration::from_millis(100)).is_some());
    }
}
