//! UDP transport, with messages encoded in bencode.

use std::fmt::{self, Debug, Formatter};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use super::Transport;
use crate::common::Message;

/// Largest payload of a single UDP datagram over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
/// Room for any datagram the socket can hand us.
const RECV_BUFFER_SIZE: usize = 65_535;

/// A [Transport] over a std [UdpSocket].
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    read_timeout: Option<Duration>,
    buf: Box<[u8]>,
}

impl UdpTransport {
    pub fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        let local_addr = socket.local_addr()?;

        Ok(UdpTransport {
            socket,
            local_addr,
            read_timeout: None,
            buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
        })
    }
}

impl Debug for UdpTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, message: Message, to: SocketAddr) -> io::Result<()> {
        let bytes = message
            .to_bytes()
            .map_err(|error| io::Error::new(ErrorKind::InvalidData, error))?;

        if bytes.len() > MAX_DATAGRAM_SIZE {
            debug!(context = "socket_message_sending", size = bytes.len(), ?to, "Message too large for a datagram");

            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("encoded message is {} bytes, over {MAX_DATAGRAM_SIZE}", bytes.len()),
            ));
        }

        trace!(context = "socket_message_sending", ?message, ?to, "Sending message");
        self.socket.send_to(&bytes, to)?;

        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Option<(Message, SocketAddr)> {
        // A zero read timeout is an error for std sockets.
        let timeout = timeout.max(Duration::from_millis(1));

        if self.read_timeout != Some(timeout) {
            if let Err(error) = self.socket.set_read_timeout(Some(timeout)) {
                debug!(context = "socket_error", ?error, "Failed to set read timeout");
                return None;
            }
            self.read_timeout = Some(timeout);
        }

        let (amt, from) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(error) => {
                if !matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                    trace!(context = "socket_error", ?error, "recv_from failed");
                }
                return None;
            }
        };

        let bytes = &self.buf[..amt];

        match Message::from_bytes(bytes) {
            Ok(message) => {
                trace!(context = "socket_message_receiving", ?message, ?from, "Received message");

                Some((message, from))
            }
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );

                None
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::common::{Id, Node, RequestSpecific, ResponseSpecific, Rpc};

    fn pair() -> (UdpTransport, UdpTransport) {
        (
            UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap(),
            UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap(),
        )
    }

    #[test]
    fn send_and_receive_over_loopback() {
        let mut a = UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let mut b = UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();

        let message = Message::request(
            42,
            Node::new(Id::random(), a.local_addr()),
            RequestSpecific::Store {
                key: Id::random(),
                value: Some(Bytes::from_static(b"hello")),
            },
        );

        a.send(message.clone(), b.local_addr()).unwrap();

        let (received, from) = b.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(received, message);
        assert_eq!(from, a.local_addr());
    }

    #[test]
    fn garbage_is_dropped() {
        let raw = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let mut transport = UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();

        raw.send_to(b"definitely not bencode", transport.local_addr())
            .unwrap();

        assert!(transport.recv(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn full_node_list_of_keyed_peers() {
        let (mut a, mut b) = pair();

        let nodes: Vec<Node> = (0..20u8)
            .map(|i| {
                Node::from_public_key(&[i; 32], SocketAddr::from(([192, 168, 1, i], 6881)))
            })
            .collect();
        let message = Message::response(
            1,
            Node::from_public_key(&[99; 32], a.local_addr()),
            Rpc::FindNode,
            ResponseSpecific::Nodes(nodes),
        );
        assert!(message.to_bytes().unwrap().len() > 2048);

        a.send(message.clone(), b.local_addr()).unwrap();

        let (received, _) = b.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(received, message);
    }

    #[test]
    fn value_larger_than_two_kilobytes() {
        let (mut a, mut b) = pair();

        let message = Message::response(
            2,
            Node::new(Id::random(), a.local_addr()),
            Rpc::FindValue,
            ResponseSpecific::Value(Bytes::from(vec![7u8; 2000])),
        );

        a.send(message.clone(), b.local_addr()).unwrap();

        let (received, _) = b.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(received, message);
    }

    #[test]
    fn oversized_message_is_refused() {
        let (mut a, b) = pair();

        let message = Message::response(
            3,
            Node::new(Id::random(), a.local_addr()),
            Rpc::FindValue,
            ResponseSpecific::Value(Bytes::from(vec![0u8; MAX_DATAGRAM_SIZE])),
        );

        let error = a.send(message, b.local_addr()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }
}
