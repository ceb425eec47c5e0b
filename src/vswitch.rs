//! Local Open vSwitch operations
//!
//! Bridge and port lifecycle plus switch-level introspection, all performed
//! by re-querying the switch database on every call. Nothing is cached, so
//! there is no local staleness to reason about; concurrent writers fall
//! back on the store's own last-writer-wins semantics.
//!
//! ovs-vsctl's `get` command quotes string scalars and prints `[]` for
//! absent optional values, and it does not distinguish "key not set" from
//! harder failures in its exit code. The helpers at the bottom of this
//! module deal with both quirks in one place.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::warn;

use crate::cmd::{CommandRunner, Database, Invocation, SystemRunner};
use crate::error::{Error, Result};

/// Default STP priority reported when the bridge has none configured.
pub const DEFAULT_STP_PRIORITY: u16 = 32768;

/// Default STP forward delay in milliseconds.
pub const DEFAULT_STP_FORWARD_DELAY_MS: u64 = 15000;

/// ovs-vsctl prints this token for an absent optional value.
const ABSENT: &str = "[]";

/// Handle on the local Open vSwitch database.
#[derive(Clone)]
pub struct VSwitch {
    runner: Arc<dyn CommandRunner>,
    db_addr: String,
}

impl Default for VSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl VSwitch {
    /// Connects to the local switch over its well-known Unix socket.
    pub fn new() -> VSwitch {
        Self::with_database(Database::Switch.default_address())
    }

    /// Connects to the switch database at `db_addr`.
    pub fn with_database(db_addr: &str) -> VSwitch {
        Self::with_runner(db_addr, Arc::new(SystemRunner::new()))
    }

    pub(crate) fn with_runner(db_addr: &str, runner: Arc<dyn CommandRunner>) -> VSwitch {
        VSwitch {
            runner,
            db_addr: db_addr.to_string(),
        }
    }

    pub fn database_address(&self) -> &str {
        &self.db_addr
    }

    pub(crate) fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    async fn vsctl<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut invocation = Invocation::new(Database::Switch, &self.db_addr);
        invocation.args(args);
        self.runner.run(invocation).await
    }

    async fn get(&self, table: &str, record: &str, column: &str) -> Result<String> {
        self.vsctl(["get", table, record, column]).await
    }

    /// Returns true if the bridge exists. Not-found is a normal false
    /// result, not an error.
    pub async fn bridge_exists(&self, bridge_name: &str) -> Result<bool> {
        let filter = format!("name={bridge_name}");
        let output = self
            .vsctl([
                "--format=csv",
                "--no-headings",
                "--data=bare",
                "--columns=name",
                "find",
                "bridge",
                filter.as_str(),
            ])
            .await?;

        Ok(!output.trim().is_empty())
    }

    /// Adds a new bridge. With `may_exist`, adding an existing bridge is a
    /// no-op success. Optional hardware address and MTU are applied as
    /// follow-up settings batched into the same invocation.
    pub async fn bridge_add(
        &self,
        bridge_name: &str,
        may_exist: bool,
        hwaddr: Option<&str>,
        mtu: Option<u32>,
    ) -> Result<()> {
        let mut args: Vec<String> = Vec::new();

        if may_exist {
            args.push("--may-exist".to_string());
        }

        args.push("add-br".to_string());
        args.push(bridge_name.to_string());

        if let Some(hwaddr) = hwaddr {
            args.extend([
                "--".to_string(),
                "set".to_string(),
                "bridge".to_string(),
                bridge_name.to_string(),
                format!(r#"other-config:hwaddr="{hwaddr}""#),
            ]);
        }

        if let Some(mtu) = mtu {
            args.extend([
                "--".to_string(),
                "set".to_string(),
                "int".to_string(),
                bridge_name.to_string(),
                format!("mtu_request={mtu}"),
            ]);
        }

        self.vsctl(args).await?;
        Ok(())
    }

    /// Deletes a bridge. Deleting a non-existent bridge fails.
    pub async fn bridge_delete(&self, bridge_name: &str) -> Result<()> {
        self.vsctl(["del-br", bridge_name]).await?;
        Ok(())
    }

    /// Adds a port to the bridge (with `may_exist`, re-adding is a no-op).
    pub async fn bridge_port_add(
        &self,
        bridge_name: &str,
        port_name: &str,
        may_exist: bool,
    ) -> Result<()> {
        let mut args: Vec<&str> = Vec::new();

        if may_exist {
            args.push("--may-exist");
        }

        args.extend(["add-port", bridge_name, port_name]);
        self.vsctl(args).await?;
        Ok(())
    }

    /// Deletes a port from the bridge. Always guarded with `--if-exists` so
    /// repeated deletes are safe.
    pub async fn bridge_port_delete(&self, bridge_name: &str, port_name: &str) -> Result<()> {
        self.vsctl(["--if-exists", "del-port", bridge_name, port_name])
            .await?;
        Ok(())
    }

    /// Sets options on a port (VLAN tag, trunks, vlan_mode).
    pub async fn bridge_port_set(&self, port_name: &str, options: &[&str]) -> Result<()> {
        let mut args = vec!["set", "port", port_name];
        args.extend_from_slice(options);
        self.vsctl(args).await?;
        Ok(())
    }

    /// Returns the ports connected to the bridge.
    pub async fn bridge_port_list(&self, bridge_name: &str) -> Result<Vec<String>> {
        let output = self.vsctl(["list-ports", bridge_name]).await?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Removes any local ports currently associated with the OVN switch
    /// port and then associates `interface_name` with it. An OVN switch
    /// port has at most one local owner at a time; this handles an
    /// instance being recreated on a different local interface while
    /// keeping its logical identity.
    pub async fn interface_associate_ovn_port(
        &self,
        interface_name: &str,
        ovn_switch_port: &str,
    ) -> Result<()> {
        let filter = format!("external-ids:iface-id={ovn_switch_port}");
        let existing = self
            .vsctl([
                "--format=csv",
                "--no-headings",
                "--data=bare",
                "--columns=name",
                "find",
                "interface",
                filter.as_str(),
            ])
            .await?;

        for port in existing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            // Best effort: the new association matters more than removing
            // the stale port, and a later retry attempts the cleanup again.
            if let Err(err) = self.vsctl(["del-port", port]).await {
                warn!(port, error = %err, "Failed to remove stale port for OVN switch port");
            }
        }

        let assignment = format!("external_ids:iface-id={ovn_switch_port}");
        self.vsctl(["set", "interface", interface_name, assignment.as_str()])
            .await?;
        Ok(())
    }

    /// Returns the local chassis ID, or an empty string if unset.
    pub async fn chassis_id(&self) -> Result<String> {
        match self.get("open_vswitch", ".", "external_ids:system-id").await {
            Ok(output) => unquote(output.trim()),
            Err(err) if is_missing_key(&err, "system-id", "Open_vSwitch", ".", "external_ids") => {
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns the encapsulation IP used for OVN underlay tunnels, or None
    /// when not configured.
    pub async fn ovn_encap_ip(&self) -> Result<Option<IpAddr>> {
        let output = match self
            .get("open_vswitch", ".", "external_ids:ovn-encap-ip")
            .await
        {
            Ok(output) => output,
            Err(err)
                if is_missing_key(&err, "ovn-encap-ip", "Open_vSwitch", ".", "external_ids") =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };

        let value = unquote(output.trim())?;
        if value.is_empty() || value == ABSENT {
            return Ok(None);
        }

        value
            .parse::<IpAddr>()
            .map(Some)
            .map_err(|_| Error::Parse(format!("Invalid ovn-encap-ip address: {value}")))
    }

    /// Returns the current OVN bridge mappings, empty when none are set.
    pub async fn ovn_bridge_mappings(&self) -> Result<Vec<String>> {
        let output = match self
            .get("open_vswitch", ".", "external_ids:ovn-bridge-mappings")
            .await
        {
            Ok(output) => output,
            Err(err)
                if is_missing_key(
                    &err,
                    "ovn-bridge-mappings",
                    "Open_vSwitch",
                    ".",
                    "external_ids",
                ) =>
            {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err),
        };

        let value = unquote(output.trim())?;
        if value.is_empty() {
            return Ok(Vec::new());
        }

        Ok(value.split(',').map(String::from).collect())
    }

    pub(crate) async fn set_external_id(&self, key: &str, value: &str) -> Result<()> {
        let assignment = format!("external-ids:{key}={value}");
        self.vsctl(["set", "open_vswitch", ".", assignment.as_str()])
            .await?;
        Ok(())
    }

    pub(crate) async fn remove_external_id(&self, key: &str) -> Result<()> {
        self.vsctl(["remove", "open_vswitch", ".", "external-ids", key])
            .await?;
        Ok(())
    }

    /// Returns true if hardware offloading is enabled on the switch.
    pub async fn hardware_offloading_enabled(&self) -> Result<bool> {
        let output = match self
            .get("open_vswitch", ".", "other_config:hw-offload")
            .await
        {
            Ok(output) => output,
            Err(err) if is_missing_key(&err, "hw-offload", "Open_vSwitch", ".", "other_config") => {
                return Ok(false)
            }
            Err(err) => return Err(err),
        };

        Ok(unquote(output.trim())? == "true")
    }

    /// Returns the configured address of the OVN southbound database, or an
    /// empty string when unset (callers fall back to the local socket).
    pub async fn ovn_southbound_remote(&self) -> Result<String> {
        match self.get("open_vswitch", ".", "external_ids:ovn-remote").await {
            Ok(output) => unquote(output.trim()),
            Err(err) if is_missing_key(&err, "ovn-remote", "Open_vSwitch", ".", "external_ids") => {
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns the value of the bridge's `stp_enable` column.
    pub async fn stp_enabled(&self, bridge_name: &str) -> Result<bool> {
        let output = self.get("bridge", bridge_name, "stp_enable").await?;

        match output.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::Parse(format!(
                "Invalid stp_enable value {other:?} for bridge {bridge_name}"
            ))),
        }
    }

    /// Returns the bridge's STP priority, defaulting to
    /// [`DEFAULT_STP_PRIORITY`] when none is configured.
    pub async fn stp_priority(&self, bridge_name: &str) -> Result<u16> {
        let output = match self
            .get("bridge", bridge_name, "other_config:stp-priority")
            .await
        {
            Ok(output) => output,
            Err(err)
                if is_missing_key(&err, "stp-priority", "Bridge", bridge_name, "other_config") =>
            {
                return Ok(DEFAULT_STP_PRIORITY)
            }
            Err(err) => return Err(err),
        };

        let value = unquote(output.trim())?;
        value.parse::<u16>().map_err(|_| {
            Error::Parse(format!(
                "Invalid stp-priority value {value:?} for bridge {bridge_name}"
            ))
        })
    }

    /// Returns the bridge's STP forward delay in milliseconds, defaulting
    /// to [`DEFAULT_STP_FORWARD_DELAY_MS`]. The store keeps the value in
    /// seconds.
    pub async fn stp_forward_delay(&self, bridge_name: &str) -> Result<u64> {
        let output = match self
            .get("bridge", bridge_name, "other_config:stp-forward-delay")
            .await
        {
            Ok(output) => output,
            Err(err)
                if is_missing_key(
                    &err,
                    "stp-forward-delay",
                    "Bridge",
                    bridge_name,
                    "other_config",
                ) =>
            {
                return Ok(DEFAULT_STP_FORWARD_DELAY_MS)
            }
            Err(err) => return Err(err),
        };

        let value = unquote(output.trim())?;
        let delay_secs = value.parse::<u64>().map_err(|_| {
            Error::Parse(format!(
                "Invalid stp-forward-delay value {value:?} for bridge {bridge_name}"
            ))
        })?;

        Ok(delay_secs * 1000)
    }

    /// Returns true if any VLAN-related setting (tag, trunks, vlan_mode) is
    /// configured on the bridge's own port.
    pub async fn vlan_filtering_enabled(&self, bridge_name: &str) -> Result<bool> {
        let output = self
            .vsctl(["get", "port", bridge_name, "tag", "trunks", "vlan_mode"])
            .await?;

        Ok(output.trim().lines().any(|line| line.trim() != ABSENT))
    }

    /// Returns the PVID of the bridge's own port; 0 means no VLAN
    /// association.
    pub async fn vlan_pvid(&self, bridge_name: &str) -> Result<u64> {
        let output = self.get("port", bridge_name, "tag").await?;

        let value = output.trim();
        if value == ABSENT {
            return Ok(0);
        }

        value.parse::<u64>().map_err(|_| {
            Error::Parse(format!(
                "Invalid VLAN tag {value:?} for bridge {bridge_name}"
            ))
        })
    }

    /// Returns the bridge ID as `<STP priority hex>.<MAC address>`, the
    /// format used by the kernel bridge documentation.
    pub async fn generate_bridge_id(&self, bridge_name: &str) -> Result<String> {
        let address =
            tokio::fs::read_to_string(format!("/sys/class/net/{bridge_name}/address")).await?;
        let hw_id = address.trim().to_lowercase().replace(':', "");

        let stp_priority = self.stp_priority(bridge_name).await?;

        Ok(format!("{stp_priority:4X}.{hw_id}"))
    }
}

/// Strips one layer of quoting from an ovs-vsctl scalar. This is a minimal
/// unquote, not general escape processing; an opening quote without a
/// closing one is a store contract violation.
pub(crate) fn unquote(raw: &str) -> Result<String> {
    match raw.strip_prefix('"') {
        Some(inner) => match inner.strip_suffix('"') {
            Some(value) => Ok(value.replace("\\\"", "\"").replace("\\\\", "\\")),
            None => Err(Error::Parse(format!("Unterminated quote in {raw:?}"))),
        },
        None => Ok(raw.to_string()),
    }
}

/// Matches ovs-vsctl's "no key defined" stderr text so optional attributes
/// can fall back to their documented defaults. The phrase is coupled to the
/// tool's exact wording; it should be re-verified against the supported
/// Open vSwitch version whenever that changes rather than assumed stable.
fn is_missing_key(err: &Error, key: &str, table: &str, record: &str, column: &str) -> bool {
    match err {
        Error::Command { stderr, .. } => stderr
            .contains(&format!(r#"no key "{key}" in {table} record "{record}" column {column}"#)),
        _ => false,
    }
}
