use std::net::SocketAddr;

use tracing::debug;

use crate::common::Message;

use super::Actor;

impl Actor {
    /// Handle an inbound request: learn its sender, answer it from the server.
    pub(super) fn handle_request(&mut self, from: SocketAddr, message: Message) {
        let request = match message.as_request() {
            Ok(request) => request,
            Err(error) => {
                debug!(?error, ?from, "Dropping malformed request");
                return;
            }
        };

        // The sender advertises its own address, but answers go back to
        // where the request came from.
        self.add_node(message.from.clone());

        let response = self
            .server
            .handle_request(&self.routing_table, &message.from, request);

        self.socket
            .response(from, message.transaction_id, message.rpc, response);
    }
}
