//! SSL credential resolution for the OVN databases
//!
//! Material comes from the caller's configuration when supplied, otherwise
//! from the well-known files dropped by the OVN packaging. Resolution
//! happens once per connection wrapper, not per command.

use std::path::Path;

use crate::config::SslSettings;
use crate::error::{Error, Result};

/// Directory holding the well-known fallback credential files.
pub const OVN_CONFIG_DIR: &str = "/etc/ovn";

const CA_CERT_FILE: &str = "ovn-central.crt";
const CLIENT_CERT_FILE: &str = "cert_host";
const CLIENT_KEY_FILE: &str = "key_host";

/// CA certificate, client certificate and client key as PEM text.
#[derive(Debug, Clone)]
pub struct CredentialBundle {
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
}

impl CredentialBundle {
    /// Resolves the bundle from the supplied settings, filling anything
    /// missing from the well-known files under [`OVN_CONFIG_DIR`].
    ///
    /// A missing item with no fallback file is a fatal configuration error
    /// naming the item; an unreadable fallback file surfaces the underlying
    /// I/O error unchanged.
    pub fn resolve(settings: &SslSettings) -> Result<CredentialBundle> {
        Self::resolve_in(settings, Path::new(OVN_CONFIG_DIR))
    }

    pub(crate) fn resolve_in(settings: &SslSettings, dir: &Path) -> Result<CredentialBundle> {
        Ok(CredentialBundle {
            ca_cert: resolve_item(
                settings.ca_cert.as_deref(),
                &dir.join(CA_CERT_FILE),
                "CA certificate",
            )?,
            client_cert: resolve_item(
                settings.client_cert.as_deref(),
                &dir.join(CLIENT_CERT_FILE),
                "client certificate",
            )?,
            client_key: resolve_item(
                settings.client_key.as_deref(),
                &dir.join(CLIENT_KEY_FILE),
                "client key",
            )?,
        })
    }
}

fn resolve_item(supplied: Option<&str>, path: &Path, what: &'static str) -> Result<String> {
    match supplied {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => match std::fs::read_to_string(path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::MissingCredential(what))
            }
            Err(err) => Err(err.into()),
        },
    }
}
