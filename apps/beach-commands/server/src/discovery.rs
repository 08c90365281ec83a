//! Discovery side-channel: which commands this entity offers.

use std::collections::BTreeMap;

use beach_commands_core::{DiscoveredCommand, NodeInfo};
use parking_lot::RwLock;
use tracing::debug;

use crate::registry::CommandDescriptor;

/// Receives registry changes so they can be published to requesters.
pub trait Advertiser: Send + Sync {
    fn advertise(&self, descriptor: &CommandDescriptor);
    fn withdraw(&self, node: &str);
}

/// In-memory item list answering discovery queries for one owner.
#[derive(Debug)]
pub struct DiscoveryItems {
    owner: String,
    items: RwLock<BTreeMap<String, String>>,
}

impl DiscoveryItems {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            items: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn items(&self) -> Vec<DiscoveredCommand> {
        self.items
            .read()
            .iter()
            .map(|(node, name)| DiscoveredCommand {
                owner: self.owner.clone(),
                node: node.clone(),
                name: name.clone(),
            })
            .collect()
    }

    pub fn node_info(&self, node: &str) -> Option<NodeInfo> {
        self.items
            .read()
            .get(node)
            .map(|name| NodeInfo::for_command(node, name.clone()))
    }
}

impl Advertiser for DiscoveryItems {
    fn advertise(&self, descriptor: &CommandDescriptor) {
        debug!(node = %descriptor.node, owner = %self.owner, "advertising command");
        self.items
            .write()
            .insert(descriptor.node.clone(), descriptor.name.clone());
    }

    fn withdraw(&self, node: &str) {
        debug!(node, owner = %self.owner, "withdrawing command");
        self.items.write().remove(node);
    }
}
