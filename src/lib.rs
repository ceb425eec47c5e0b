//! Patronus - OVS/OVN control-plane adapter
//!
//! Node-local adapter reconciling a virtualization host's virtual
//! networking against two SDN control planes:
//! - The local Open vSwitch database (bridge/port lifecycle, VLANs, STP,
//!   hardware offload) via ovs-vsctl
//! - The distributed OVN northbound/southbound database pair (logical
//!   overlay topology and its physical bindings) via ovn-nbctl/ovn-sbctl
//!
//! The management layer above decides what topology should exist; this
//! crate makes the external databases match it safely, idempotently and
//! under concurrent access. SSL credential material for remote databases
//! is staged through anonymous in-memory files and never written to disk.

pub mod config;
pub mod credentials;
pub mod error;
pub mod mappings;
pub mod memfile;
pub mod ovn;
pub mod vswitch;

mod cmd;

#[cfg(test)]
mod testing;

pub use config::{OvnConfig, SslSettings};
pub use credentials::CredentialBundle;
pub use error::{Error, Result};
pub use mappings::BridgeMappings;
pub use memfile::MemFile;
pub use ovn::Ovn;
pub use vswitch::VSwitch;
