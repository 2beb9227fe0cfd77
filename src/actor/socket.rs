//! Socket layer managing incoming/outgoing requests and responses over a [Transport].

mod inflight_requests;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{Message, MessageKind, Node, RequestSpecific, ResponseSpecific, Rpc};
use crate::transport::Transport;

pub use inflight_requests::InflightRequest;
use inflight_requests::InflightRequests;

/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// Default timeout of STORE requests.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(10000); // 10 seconds

/// How long a single receive blocks when nothing arrives.
const RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// An incoming message that passed correlation.
#[derive(Debug)]
pub enum Incoming {
    Request { message: Message, from: SocketAddr },
    /// A response, with the request it answers.
    Response {
        message: Message,
        request: InflightRequest,
    },
}

/// A [Transport] wrapper that formats and correlates requests and responses.
#[derive(Debug)]
pub struct RpcSocket {
    next_tid: u32,
    transport: Box<dyn Transport>,
    /// Our own peer record, sent as `from` in every message.
    local: Node,
    inflight_requests: InflightRequests,
}

impl RpcSocket {
    pub fn new(transport: Box<dyn Transport>, local: Node) -> Self {
        Self {
            next_tid: 0,
            transport,
            local,
            inflight_requests: InflightRequests::new(),
        }
    }

    // === Getters ===

    /// Returns the address the transport is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    // === Public Methods ===

    /// Returns true if this message's transaction_id is still inflight
    pub fn inflight(&self, transaction_id: u32) -> bool {
        self.inflight_requests.contains(transaction_id)
    }

    /// Send a request to the given node and return the transaction_id
    pub fn request(&mut self, to: &Node, request: RequestSpecific, timeout: Duration) -> u32 {
        let tid = self.tid();
        let message = Message::request(tid, self.local.clone(), request);

        self.inflight_requests
            .add(tid, to.clone(), message.rpc, timeout);

        self.send(to.address(), message);

        tid
    }

    /// Send a response to the given address.
    pub fn response(
        &mut self,
        address: SocketAddr,
        transaction_id: u32,
        rpc: Rpc,
        response: ResponseSpecific,
    ) {
        let message = Message::response(transaction_id, self.local.clone(), rpc, response);

        self.send(address, message);
    }

    /// Receives a single message from the transport.
    ///
    /// Requests are returned as they are, responses only if they answer an
    /// inflight request from the same address.
    pub fn recv_from(&mut self) -> Option<Incoming> {
        let (message, from) = self.transport.recv(RECV_TIMEOUT)?;

        match message.kind {
            MessageKind::Request => {
                trace!(context = "socket_message_receiving", ?message, ?from, "Received request message");

                Some(Incoming::Request { message, from })
            }
            MessageKind::Response => {
                trace!(context = "socket_message_receiving", ?message, ?from, "Received response message");

                match self
                    .inflight_requests
                    .remove(message.transaction_id, &from, message.rpc)
                {
                    Some(request) => Some(Incoming::Response { message, request }),
                    None => {
                        trace!(
                            context = "socket_validation",
                            message = "Unexpected response id or wrong address"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Requests that timed out since the last call.
    pub fn expired(&mut self) -> Vec<InflightRequest> {
        self.inflight_requests.expired_at(Instant::now())
    }

    // === Private Methods ===

    /// Increments self.next_tid and returns the previous value.
    fn tid(&mut self) -> u32 {
        // Timeouts are short enough that wrapping around
        // 4294967295 ids never collides with a live request.
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    fn send(&mut self, address: SocketAddr, message: Message) {
        trace!(context = "socket_message_sending", ?message, ?address);

        if let Err(error) = self.transport.send(message, address) {
            debug!(?error, ?address, "Error sending message");
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;
    use crate::common::Id;
    use crate::transport::MemoryNetwork;

    fn socket(network: &MemoryNetwork) -> RpcSocket {
        let transport = network.bind();
        let local = Node::new(Id::random(), transport.local_addr());

        RpcSocket::new(Box::new(transport), local)
    }

    #[test]
    fn tid() {
        let network = MemoryNetwork::new();
        let mut socket = socket(&network);

        assert_eq!(socket.tid(), 0);
        assert_eq!(socket.tid(), 1);
        assert_eq!(socket.tid(), 2);

        socket.next_tid = u32::MAX;

        assert_eq!(socket.tid(), 4294967295);
        assert_eq!(socket.tid(), 0);
    }

    #[test]
    fn request_and_response() {
        let network = MemoryNetwork::new();
        let mut client = socket(&network);
        let mut server = socket(&network);

        let server_node = server.local().clone();
        let tid = client.request(&server_node, RequestSpecific::Ping, DEFAULT_REQUEST_TIMEOUT);
        assert!(client.inflight(tid));

        let (message, from) = match server.recv_from() {
            Some(Incoming::Request { message, from }) => (message, from),
            incoming => panic!("expected a request, got {:?}", incoming),
        };
        assert_eq!(message.from, *client.local());
        assert_eq!(from, client.local_addr());

        server.response(from, message.transaction_id, message.rpc, ResponseSpecific::Pong);

        match client.recv_from() {
            Some(Incoming::Response { message, request }) => {
                assert_eq!(message.transaction_id, tid);
                assert_eq!(request.to, server_node);
                assert_eq!(message.as_response().unwrap(), ResponseSpecific::Pong);
            }
            incoming => panic!("expected a response, got {:?}", incoming),
        }
        assert!(!client.inflight(tid));
    }

    #[test]
    fn unexpected_response_is_dropped() {
        let network = MemoryNetwork::new();
        let mut client = socket(&network);
        let mut server = socket(&network);

        server.response(client.local_addr(), 99, Rpc::Ping, ResponseSpecific::Pong);

        assert!(client.recv_from().is_none());
    }

    #[test]
    fn silent_node_times_out() {
        let network = MemoryNetwork::new();
        let mut client = socket(&network);
        let silent = Node::new(Id::random(), SocketAddr::from(([127, 0, 0, 1], 65000)));

        let tid = client.request(&silent, RequestSpecific::Ping, Duration::from_millis(20));
        assert!(client.expired().is_empty());

        thread::sleep(Duration::from_millis(30));

        let expired = client.expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].transaction_id, tid);
        assert!(!client.inflight(tid));
    }
}
