use std::net::SocketAddr;

use crate::common::Id;

use super::Actor;

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddr,
    routing_table_size: usize,
    stored_values: usize,
    published_values: usize,
    bootstrapped: bool,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }
    /// Address the transport of this node is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    /// Number of nodes in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }
    /// Number of values in the local store, expired ones included until read.
    pub fn stored_values(&self) -> usize {
        self.stored_values
    }
    /// Number of values published by this node.
    pub fn published_values(&self) -> usize {
        self.published_values
    }
    /// Returns `true` once a bootstrap succeeded and maintenance is running.
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}

impl From<&Actor> for Info {
    fn from(actor: &Actor) -> Self {
        Self {
            id: *actor.id(),
            local_addr: actor.local_addr(),
            routing_table_size: actor.routing_table().size(),
            stored_values: actor.server().store().len(),
            published_values: actor.published().len(),
            bootstrapped: actor.is_bootstrapped(),
        }
    }
}
