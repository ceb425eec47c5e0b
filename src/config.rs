//! OVN connection configuration
//!
//! Settings are supplied by the embedding management layer. Anything left
//! empty falls back to the well-known local defaults, so a zero-value config
//! talks to the databases over their local Unix sockets without SSL.

use serde::{Deserialize, Serialize};

/// Connection settings for the OVN northbound database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OvnConfig {
    /// Northbound database connection string (e.g. "ssl:192.0.2.1:6641").
    /// Empty means the local northbound Unix socket.
    #[serde(default)]
    pub northbound_connection: String,

    /// SSL credential material for SSL-secured connections.
    #[serde(default)]
    pub ssl: SslSettings,
}

/// PEM material for SSL connections to the OVN databases.
///
/// Items left unset are read from the well-known files under `/etc/ovn`
/// when the northbound connection uses an SSL scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslSettings {
    /// CA certificate (PEM)
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// Client certificate (PEM)
    #[serde(default)]
    pub client_cert: Option<String>,

    /// Client private key (PEM)
    #[serde(default)]
    pub client_key: Option<String>,
}
