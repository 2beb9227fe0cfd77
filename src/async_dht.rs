//! AsyncDht node.

use std::collections::HashMap;

use bytes::Bytes;
use flume::Sender;

use crate::actor::Info;
use crate::common::{Id, Node};
use crate::dht::{ActorMessage, Dht, DhtWasShutdown};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        self.request(ActorMessage::Info).await
    }

    /// This node's peer record.
    pub async fn local_node(&self) -> Result<Node, DhtWasShutdown> {
        self.request(ActorMessage::LocalNode).await
    }

    /// Turn this node's routing table to a list of bootstrapping nodes.
    pub async fn to_bootstrap(&self) -> Result<Vec<Node>, DhtWasShutdown> {
        self.request(ActorMessage::ToBootstrap).await
    }

    /// Values published by this node.
    pub async fn published(&self) -> Result<HashMap<Id, Bytes>, DhtWasShutdown> {
        self.request(ActorMessage::Published).await
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Join the network through `node`.
    ///
    /// Returns `false` if the node did not respond.
    pub async fn bootstrap(&self, node: &Node) -> Result<bool, DhtWasShutdown> {
        let node = node.clone();

        self.request(|sender| ActorMessage::Bootstrap(node, sender))
            .await
    }

    /// See [Dht::put].
    pub async fn put(&self, key: Id, value: Bytes) -> Result<usize, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Put(key, value, sender))
            .await
    }

    /// See [Dht::publish].
    pub async fn publish(&self, key: Id, value: Bytes) -> Result<usize, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Publish(key, value, sender))
            .await
    }

    /// See [Dht::get].
    pub async fn get(&self, key: Id) -> Result<Option<Bytes>, DhtWasShutdown> {
        self.request(|sender| ActorMessage::Get(key, sender)).await
    }

    /// See [Dht::find_node].
    pub async fn find_node(&self, target: Id) -> Result<Vec<Node>, DhtWasShutdown> {
        self.request(|sender| ActorMessage::FindNode(target, sender))
            .await
    }

    // === Private Methods ===

    async fn request<T>(
        &self,
        message: impl FnOnce(Sender<T>) -> ActorMessage,
    ) -> Result<T, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<T>(1);

        self.0
             .0
            .send(message(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }
}
