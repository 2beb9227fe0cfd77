//! Messages exchanged between nodes, and their typed views.
//!
//! A [Message] is what travels through a [Transport](crate::transport::Transport).
//! The payload that is valid for a message depends on its [Rpc] and [MessageKind]:
//!
//! | rpc          | request       | response                |
//! |--------------|---------------|-------------------------|
//! | `Ping`       | none          | `String("PONG")`        |
//! | `Store`      | `Pair`        | `String("OK")`          |
//! | `FindNode`   | `Key`         | `NodeList`              |
//! | `FindValue`  | `Key`         | `Val` or `NodeList`     |
//!
//! Anything else is malformed, and is dropped by the receiver.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::{Id, Node};
use crate::{Error, Result};

/// Payload of a response to [Rpc::Ping].
pub const PONG: &str = "PONG";
/// Payload of a response to [Rpc::Store].
pub const OK: &str = "OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rpc {
    Ping,
    Store,
    FindNode,
    FindValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Data {
    String(String),
    NodeList(Vec<Node>),
    Pair {
        key: Id,
        /// `None` asks the receiver to delete the key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Bytes>,
    },
    Key(Id),
    Val(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub transaction_id: u32,
    pub rpc: Rpc,
    pub kind: MessageKind,
    /// The sender's own peer record.
    pub from: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSpecific {
    Ping,
    Store { key: Id, value: Option<Bytes> },
    FindNode { target: Id },
    FindValue { target: Id },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSpecific {
    Pong,
    Stored,
    Nodes(Vec<Node>),
    Value(Bytes),
}

impl RequestSpecific {
    pub fn rpc(&self) -> Rpc {
        match self {
            RequestSpecific::Ping => Rpc::Ping,
            RequestSpecific::Store { .. } => Rpc::Store,
            RequestSpecific::FindNode { .. } => Rpc::FindNode,
            RequestSpecific::FindValue { .. } => Rpc::FindValue,
        }
    }

    fn into_data(self) -> Option<Data> {
        match self {
            RequestSpecific::Ping => None,
            RequestSpecific::Store { key, value } => Some(Data::Pair { key, value }),
            RequestSpecific::FindNode { target } | RequestSpecific::FindValue { target } => {
                Some(Data::Key(target))
            }
        }
    }
}

impl ResponseSpecific {
    fn into_data(self) -> Data {
        match self {
            ResponseSpecific::Pong => Data::String(PONG.to_string()),
            ResponseSpecific::Stored => Data::String(OK.to_string()),
            ResponseSpecific::Nodes(nodes) => Data::NodeList(nodes),
            ResponseSpecific::Value(value) => Data::Val(value),
        }
    }
}

impl Message {
    pub fn request(transaction_id: u32, from: Node, request: RequestSpecific) -> Message {
        Message {
            transaction_id,
            rpc: request.rpc(),
            kind: MessageKind::Request,
            from,
            data: request.into_data(),
        }
    }

    pub fn response(
        transaction_id: u32,
        from: Node,
        rpc: Rpc,
        response: ResponseSpecific,
    ) -> Message {
        Message {
            transaction_id,
            rpc,
            kind: MessageKind::Response,
            from,
            data: Some(response.into_data()),
        }
    }

    // === Public Methods ===

    /// Check that the payload matches the rpc and kind of this message.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            MessageKind::Request => self.as_request().map(|_| ()),
            MessageKind::Response => self.as_response().map(|_| ()),
        }
    }

    /// Typed view of a request, or [Error::MalformedMessage].
    pub fn as_request(&self) -> Result<RequestSpecific> {
        if self.kind != MessageKind::Request {
            return Err(self.malformed());
        }

        match (self.rpc, &self.data) {
            (Rpc::Ping, None) => Ok(RequestSpecific::Ping),
            (Rpc::Store, Some(Data::Pair { key, value })) => Ok(RequestSpecific::Store {
                key: *key,
                value: value.clone(),
            }),
            (Rpc::FindNode, Some(Data::Key(target))) => {
                Ok(RequestSpecific::FindNode { target: *target })
            }
            (Rpc::FindValue, Some(Data::Key(target))) => {
                Ok(RequestSpecific::FindValue { target: *target })
            }
            _ => Err(self.malformed()),
        }
    }

    /// Typed view of a response, or [Error::MalformedMessage].
    pub fn as_response(&self) -> Result<ResponseSpecific> {
        if self.kind != MessageKind::Response {
            return Err(self.malformed());
        }

        match (self.rpc, &self.data) {
            (Rpc::Ping, Some(Data::String(_))) => Ok(ResponseSpecific::Pong),
            (Rpc::Store, Some(Data::String(_))) => Ok(ResponseSpecific::Stored),
            (Rpc::FindNode, Some(Data::NodeList(nodes)))
            | (Rpc::FindValue, Some(Data::NodeList(nodes))) => {
                Ok(ResponseSpecific::Nodes(nodes.clone()))
            }
            (Rpc::FindValue, Some(Data::Val(value))) => Ok(ResponseSpecific::Value(value.clone())),
            _ => Err(self.malformed()),
        }
    }

    /// Encode this message with bencode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_bencode::to_bytes(self).map_err(Error::BencodeError)
    }

    /// Decode a bencoded message. The payload is not validated.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        serde_bencode::from_bytes(bytes.as_ref()).map_err(Error::BencodeError)
    }

    // === Private Methods ===

    fn malformed(&self) -> Error {
        Error::MalformedMessage {
            rpc: self.rpc,
            kind: self.kind,
        }
    }
}
