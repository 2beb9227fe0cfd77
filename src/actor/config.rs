use std::time::Duration;

use ed25519_dalek::SigningKey;

use crate::common::Id;
use crate::core::routing_maintenance::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REPLICATE_INTERVAL};
use crate::core::server::ServerSettings;

use super::socket::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_STORE_TIMEOUT};

#[derive(Debug)]
/// Dht Configurations
pub struct Config {
    /// Explicit Id for this node.
    ///
    /// Defaults to None, where the Id is derived from [Config::signing_key],
    /// or generated randomly.
    pub id: Option<Id>,
    /// Identity of this node. Its public key is advertised in every message,
    /// and derives the node Id unless [Config::id] is set.
    ///
    /// Defaults to None
    pub signing_key: Option<SigningKey>,
    /// Request timeout duration for PING, FIND_NODE and FIND_VALUE.
    ///
    /// The longer this duration is, the longer lookups take to give up on
    /// silent nodes. The shorter it is, the more responses from busy nodes we
    /// miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Request timeout duration for STORE.
    ///
    /// Defaults to [DEFAULT_STORE_TIMEOUT]
    pub store_timeout: Duration,
    /// How often to look for buckets that were not touched for as long.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// How often to re-put stored values older than this interval.
    ///
    /// Defaults to [DEFAULT_REPLICATE_INTERVAL]
    pub replicate_interval: Duration,
    /// Settings of the request handling server and its store.
    pub server_settings: ServerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            signing_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            replicate_interval: DEFAULT_REPLICATE_INTERVAL,
            server_settings: ServerSettings::default(),
        }
    }
}
