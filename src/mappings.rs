//! OVN bridge-mapping set management
//!
//! The mappings live as one comma-joined "provider:bridge" string under a
//! single external-IDs key on the root switch record, and the store offers
//! no atomic set-add/remove on that composite value. Every mutation is a
//! read-modify-write of the whole set, so correctness under concurrent
//! callers (two network attachments configuring mappings at once) depends
//! entirely on serializing those cycles through the manager's mutex. The
//! lock spans the external round trip; mapping changes are rare
//! administrative events, so correctness wins over hold time.

use tokio::sync::Mutex;

use crate::error::Result;
use crate::vswitch::VSwitch;

/// External-IDs key holding the serialized mapping set.
pub const BRIDGE_MAPPINGS_KEY: &str = "ovn-bridge-mappings";

/// Manager for the shared bridge-mapping set.
///
/// Construct one per process and hand it to everything that needs to touch
/// mappings; two managers over the same switch would each serialize only
/// their own callers.
pub struct BridgeMappings {
    vswitch: VSwitch,
    lock: Mutex<()>,
}

impl BridgeMappings {
    pub fn new(vswitch: VSwitch) -> BridgeMappings {
        BridgeMappings {
            vswitch,
            lock: Mutex::new(()),
        }
    }

    /// Returns the current mapping set.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.vswitch.ovn_bridge_mappings().await
    }

    /// Adds a mapping between a bridge and the logical provider name.
    /// Adding a mapping that is already present is a no-op success with no
    /// write.
    pub async fn add(&self, bridge_name: &str, provider_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut mappings = self.vswitch.ovn_bridge_mappings().await?;

        let new_mapping = format!("{provider_name}:{bridge_name}");
        if mappings.contains(&new_mapping) {
            return Ok(());
        }

        mappings.push(new_mapping);
        self.vswitch
            .set_external_id(BRIDGE_MAPPINGS_KEY, &mappings.join(","))
            .await
    }

    /// Deletes a mapping between a bridge and the logical provider name.
    /// Deleting an absent mapping is a no-op success; deleting the last
    /// mapping removes the key outright rather than leaving an empty value
    /// behind.
    pub async fn delete(&self, bridge_name: &str, provider_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mappings = self.vswitch.ovn_bridge_mappings().await?;

        let match_mapping = format!("{provider_name}:{bridge_name}");
        let kept: Vec<String> = mappings
            .iter()
            .filter(|mapping| **mapping != match_mapping)
            .cloned()
            .collect();

        if kept.len() == mappings.len() {
            return Ok(());
        }

        if kept.is_empty() {
            return self.vswitch.remove_external_id(BRIDGE_MAPPINGS_KEY).await;
        }

        self.vswitch
            .set_external_id(BRIDGE_MAPPINGS_KEY, &kept.join(","))
            .await
    }
}
