//! OVN database connection wrapper
//!
//! Composes credential resolution and the command execution adapter into
//! northbound/southbound invocations. The southbound address is resolved
//! through the local switch on every construction rather than cached: it
//! can change underneath a long-lived process, and a stale cached address
//! would be a correctness bug, not just a performance one.

use std::sync::Arc;

use crate::cmd::{CommandRunner, Database, Invocation, SSL_SCHEME};
use crate::config::OvnConfig;
use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};
use crate::vswitch::VSwitch;

/// Connection wrapper for the OVN northbound and southbound databases.
pub struct Ovn {
    nb_addr: String,
    sb_addr: String,
    credentials: Option<CredentialBundle>,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Ovn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ovn")
            .field("nb_addr", &self.nb_addr)
            .field("sb_addr", &self.sb_addr)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Ovn {
    /// Builds a wrapper from the supplied configuration, resolving the
    /// southbound address through the local switch.
    ///
    /// When the northbound connection uses SSL, credential material is
    /// resolved here, once, and a missing item fails the construction
    /// before any OVN command is attempted.
    pub async fn connect(config: &OvnConfig, vswitch: &VSwitch) -> Result<Ovn> {
        Self::connect_with_runner(config, vswitch, vswitch.runner()).await
    }

    pub(crate) async fn connect_with_runner(
        config: &OvnConfig,
        vswitch: &VSwitch,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Ovn> {
        let credentials = if config.northbound_connection.contains(SSL_SCHEME) {
            Some(CredentialBundle::resolve(&config.ssl)?)
        } else {
            None
        };

        let sb_addr = vswitch.ovn_southbound_remote().await?;

        Ok(Ovn {
            nb_addr: config.northbound_connection.clone(),
            sb_addr,
            credentials,
            runner,
        })
    }

    /// Connection string used for the northbound database.
    pub fn northbound_address(&self) -> &str {
        if self.nb_addr.is_empty() {
            Database::Northbound.default_address()
        } else {
            &self.nb_addr
        }
    }

    /// Connection string used for the southbound database.
    pub fn southbound_address(&self) -> &str {
        if self.sb_addr.is_empty() {
            Database::Southbound.default_address()
        } else {
            &self.sb_addr
        }
    }

    /// Runs an ovn-nbctl command. Northbound changes wait for southbound
    /// convergence before returning, so callers observe a state already
    /// propagated to the physical binding layer.
    pub async fn nbctl(&self, args: &[&str]) -> Result<String> {
        let mut full_args = vec!["--wait=sb"];
        full_args.extend_from_slice(args);
        self.xbctl(Database::Northbound, &full_args).await
    }

    /// Runs an ovn-sbctl command against the southbound database.
    pub async fn sbctl(&self, args: &[&str]) -> Result<String> {
        self.xbctl(Database::Southbound, args).await
    }

    async fn xbctl(&self, database: Database, args: &[&str]) -> Result<String> {
        let db_addr = match database {
            Database::Northbound => self.northbound_address(),
            Database::Southbound => self.southbound_address(),
            Database::Switch => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported database type {database:?}"
                )))
            }
        };

        let mut invocation = Invocation::new(database, db_addr);

        if db_addr.contains(SSL_SCHEME) {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "Database {db_addr} uses SSL but no credentials were resolved"
                ))
            })?;

            invocation.ssl_credentials(credentials)?;
        }

        invocation.args(args.iter().copied());
        self.runner.run(invocation).await
    }
}
