//! Dht node.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ed25519_dalek::SigningKey;
use flume::{Receiver, Sender, TryRecvError};
use tracing::debug;

use crate::actor::{Actor, Config, Info};
use crate::common::{Id, Node};
use crate::transport::{MemoryNetwork, Transport, UdpTransport};
use crate::validator::StorableValidator;

#[derive(Debug, Clone)]
/// Kademlia node, running its [Actor] in a dedicated thread.
///
/// Cloning is cheap, every clone talks to the same node.
pub struct Dht(pub(crate) Sender<ActorMessage>);

#[derive(thiserror::Error, Debug)]
/// The actor thread of a [Dht] node stopped, by [Dht::shutdown] or after all
/// handles were dropped.
#[error("Dht was shutdown")]
pub struct DhtWasShutdown;

#[derive(Debug, Default)]
/// A builder for [Dht] nodes.
pub struct DhtBuilder {
    config: Config,
    bootstrap: Vec<Node>,
    transport: TransportConfig,
}

enum TransportConfig {
    Udp(SocketAddr),
    Memory(MemoryNetwork),
    Custom(Box<dyn Transport>),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Udp(SocketAddr::from(([0, 0, 0, 0], 0)))
    }
}

impl Debug for TransportConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Udp(address) => write!(f, "Udp({address})"),
            TransportConfig::Memory(_) => write!(f, "Memory"),
            TransportConfig::Custom(transport) => write!(f, "Custom({transport:?})"),
        }
    }
}

impl DhtBuilder {
    /// Bind a [UdpTransport] to this address.
    ///
    /// Defaults to `0.0.0.0:0`, any interface on a random port.
    pub fn bind(mut self, address: SocketAddr) -> Self {
        self.transport = TransportConfig::Udp(address);
        self
    }

    /// Join an in-memory network instead of binding a UDP socket.
    pub fn memory(mut self, network: &MemoryNetwork) -> Self {
        self.transport = TransportConfig::Memory(network.clone());
        self
    }

    /// Run over an already bound [Transport].
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = TransportConfig::Custom(transport);
        self
    }

    /// Set the node's [Id], instead of deriving it from the signing key, or
    /// generating a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.config.id = Some(id);
        self
    }

    /// Set this node's identity, see [Config::signing_key].
    pub fn signing_key(mut self, signing_key: SigningKey) -> Self {
        self.config.signing_key = Some(signing_key);
        self
    }

    /// Nodes to bootstrap through as soon as the node starts.
    ///
    /// Use [Dht::bootstrap] instead to wait for the outcome.
    pub fn bootstrap(mut self, bootstrap: &[Node]) -> Self {
        self.bootstrap = bootstrap.to_vec();
        self
    }

    /// Set [Config::request_timeout]
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    /// Set [Config::store_timeout]
    pub fn store_timeout(mut self, store_timeout: Duration) -> Self {
        self.config.store_timeout = store_timeout;
        self
    }

    /// Set [Config::refresh_interval]
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.config.refresh_interval = refresh_interval;
        self
    }

    /// Set [Config::replicate_interval]
    pub fn replicate_interval(mut self, replicate_interval: Duration) -> Self {
        self.config.replicate_interval = replicate_interval;
        self
    }

    /// Base lifetime of stored values.
    pub fn data_ttl(mut self, data_ttl: Duration) -> Self {
        self.config.server_settings.data_ttl = data_ttl;
        self
    }

    /// Maximum number of values in the local store.
    pub fn max_values(mut self, max_values: usize) -> Self {
        self.config.server_settings.max_values = max_values;
        self
    }

    /// Validate values before storing them, or accepting them from a lookup.
    pub fn validator(mut self, validator: impl StorableValidator + 'static) -> Self {
        self.config.server_settings.validator = Box::new(validator);
        self
    }

    /// Bind the transport and spawn the actor thread.
    pub fn build(self) -> io::Result<Dht> {
        let transport: Box<dyn Transport> = match self.transport {
            TransportConfig::Udp(address) => Box::new(UdpTransport::bind(address)?),
            TransportConfig::Memory(network) => Box::new(network.bind()),
            TransportConfig::Custom(transport) => transport,
        };

        Dht::new(self.config, transport, self.bootstrap)
    }
}

impl Dht {
    /// Returns a builder to edit settings before creating a node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    fn new(config: Config, transport: Box<dyn Transport>, bootstrap: Vec<Node>) -> io::Result<Dht> {
        let (sender, receiver) = flume::unbounded();

        let actor = Actor::new(config, transport);

        thread::Builder::new()
            .name("kadtrie".to_string())
            .spawn(move || run(actor, receiver, bootstrap))?;

        Ok(Dht(sender))
    }

    // === Getters ===

    /// Information and statistics about this node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        self.request(ActorMessage::Info)
    }

    /// This node's peer record, to bootstrap other nodes through it.
    pub fn local_node(&self) -> Result<Node, DhtWasShutdown> {
        self.request(ActorMessage::LocalNode)
    }

    /// Turn this node's routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Result<Vec<Node>, DhtWasShutdown> {
        self.request(ActorMessage::ToBootstrap)
    }

    /// Values published by this node, to be republished by the application.
    pub fn published(&self) -> Result<HashMap<Id, Bytes>, DhtWasShutdown> {
        self.request(ActorMessage::Published)
    }

    // === Public Methods ===

    /// Join the network through `node`, blocking until the bootstrap is done.
    ///
    /// Returns `false` if the node did not respond.
    pub fn bootstrap(&self, node: &Node) -> Result<bool, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Bootstrap(node.clone(), sender))
    }

    /// Store `value` under `key` at the closest nodes to `key`.
    ///
    /// Returns the number of remote nodes that acknowledged the STORE.
    pub fn put(&self, key: Id, value: Bytes) -> Result<usize, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Put(key, value, sender))
    }

    /// Same as [Dht::put], and adds the pair to [Dht::published].
    pub fn publish(&self, key: Id, value: Bytes) -> Result<usize, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Publish(key, value, sender))
    }

    /// Get the value stored under `key`, from the local store or the network.
    pub fn get(&self, key: Id) -> Result<Option<Bytes>, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Get(key, sender))
    }

    /// Find the closest responding nodes to `target`.
    pub fn find_node(&self, target: Id) -> Result<Vec<Node>, DhtWasShutdown> {
        self.request(|sender| ActorMessage::FindNode(target, sender))
    }

    /// Shutdown the actor thread loop, abandoning pending operations.
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    // === Private Methods ===

    fn request<T>(
        &self,
        message: impl FnOnce(Sender<T>) -> ActorMessage,
    ) -> Result<T, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<T>(1);

        self.0
            .send(message(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }
}

fn run(mut actor: Actor, receiver: Receiver<ActorMessage>, bootstrap: Vec<Node>) {
    for node in &bootstrap {
        actor.bootstrap(node, None);
    }

    loop {
        match receiver.try_recv() {
            Ok(actor_message) => match actor_message {
                ActorMessage::Shutdown(sender) => {
                    actor.shutdown();
                    let _ = sender.send(());
                    break;
                }
                ActorMessage::Info(sender) => {
                    let _ = sender.send(actor.info());
                }
                ActorMessage::LocalNode(sender) => {
                    let _ = sender.send(actor.local_node().clone());
                }
                ActorMessage::ToBootstrap(sender) => {
                    let _ = sender.send(actor.routing_table().to_bootstrap());
                }
                ActorMessage::Published(sender) => {
                    let _ = sender.send(actor.published().clone());
                }
                ActorMessage::Bootstrap(node, sender) => actor.bootstrap(&node, Some(sender)),
                ActorMessage::Put(key, value, sender) => actor.put(key, value, Some(sender)),
                ActorMessage::Publish(key, value, sender) => {
                    actor.publish(key, value, Some(sender))
                }
                ActorMessage::Get(key, sender) => actor.get(key, Some(sender)),
                ActorMessage::FindNode(target, sender) => actor.find_node(target, Some(sender)),
            },
            Err(TryRecvError::Disconnected) => {
                // Every handle was dropped, kill this thread.
                debug!("kadtrie::Dht's actor thread was shutdown after Drop.");
                actor.shutdown();
                break;
            }
            Err(TryRecvError::Empty) => {
                // No op
            }
        }

        actor.tick();
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    LocalNode(Sender<Node>),
    ToBootstrap(Sender<Vec<Node>>),
    Published(Sender<HashMap<Id, Bytes>>),
    Bootstrap(Node, Sender<bool>),
    Put(Id, Bytes, Sender<usize>),
    Publish(Id, Bytes, Sender<usize>),
    Get(Id, Sender<Option<Bytes>>),
    FindNode(Id, Sender<Vec<Node>>),
    Shutdown(Sender<()>),
}

/// Create a testnet of Dht nodes over an in-memory network, to run tests
/// against without touching the real network.
#[derive(Debug)]
pub struct Testnet {
    pub network: MemoryNetwork,
    pub bootstrap: Vec<Node>,
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// Start `count` nodes, each bootstrapping through the first one.
    pub fn new(count: usize) -> crate::Result<Testnet> {
        let network = MemoryNetwork::new();

        let mut nodes: Vec<Dht> = Vec::with_capacity(count);
        let mut bootstrap = Vec::new();

        for _ in 0..count {
            let node = Dht::builder().memory(&network).build()?;

            match bootstrap.first().cloned() {
                Some(first) => {
                    node.bootstrap(&first)?;
                }
                None => bootstrap.push(node.local_node()?),
            }

            nodes.push(node);
        }

        Ok(Testnet {
            network,
            bootstrap,
            nodes,
        })
    }

    /// A builder for a new node on this testnet's network.
    pub fn builder(&self) -> DhtBuilder {
        Dht::builder().memory(&self.network)
    }
}
