use tracing::debug;

use crate::common::{Message, ResponseSpecific, Rpc};

use super::socket::InflightRequest;
use super::{Actor, QueryPurpose};

impl Actor {
    /// Handle a response to one of our requests: route it to the bootstrap,
    /// lookup, or put operation waiting for it.
    pub(super) fn handle_response(&mut self, message: Message, request: InflightRequest) {
        self.routing_table.unlock(request.to.id());

        let tid = message.transaction_id;

        let response = match message.as_response() {
            Ok(response) => response,
            Err(error) => {
                debug!(?error, from = ?request.to.address(), "Malformed response");
                self.request_failed(tid);
                return;
            }
        };

        self.add_node(message.from.clone());

        if let Some(sender) = self.bootstrap_pings.remove(&tid) {
            debug!(bootstrap = ?request.to.address(), "Bootstrap node responded");

            let id = *self.id();
            self.start_query(id, Rpc::FindNode, QueryPurpose::Bootstrap(sender));
            return;
        }

        if let Some(pending) = self
            .iterative_queries
            .iter_mut()
            .find(|pending| pending.query.inflight(tid))
        {
            match response {
                ResponseSpecific::Nodes(nodes) => pending.query.on_nodes(tid, nodes),
                ResponseSpecific::Value(value) => {
                    if self.server.is_valid_storable(&value) {
                        pending.query.on_value(tid, value);
                    } else {
                        debug!(from = ?request.to.address(), "Ignoring invalid value");
                        pending.query.on_failure(tid);
                    }
                }
                _ => pending.query.on_failure(tid),
            }
            return;
        }

        if let Some(pending) = self
            .put_queries
            .iter_mut()
            .find(|pending| pending.query.inflight(tid))
        {
            match response {
                ResponseSpecific::Stored => pending.query.success(tid),
                _ => pending.query.failure(tid),
            }
        }
    }
}
