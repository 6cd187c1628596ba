//! Authoritative node registry
//!
//! The registry is the only shared mutable picture of the fleet. Reads go
//! through [`NodeRegistry::snapshot`], which hands out an `Arc` to an
//! immutable map: a selection pass sees one consistent picture no matter
//! what discovery and the monitor do concurrently. Writes are serialized
//! and copy-on-write, so readers never observe torn node state.

use herd_core::{LoadedModel, Node, NodeClass, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Partial live-state update applied atomically to one node
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub healthy: Option<bool>,
    pub class: Option<NodeClass>,
    pub loaded_models: Option<Vec<LoadedModel>>,
    pub vram_total_bytes: Option<u64>,
    pub vram_free_bytes: Option<u64>,
    pub ram_total_bytes: Option<u64>,
    pub ram_free_bytes: Option<u64>,
}

impl NodePatch {
    pub fn healthy(healthy: bool) -> Self {
        Self {
            healthy: Some(healthy),
            ..Default::default()
        }
    }
}

/// Copy-on-write registry of known nodes
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Arc<HashMap<NodeId, Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Immutable view of the current fleet
    pub fn snapshot(&self) -> Arc<HashMap<NodeId, Node>> {
        Arc::clone(&self.nodes.read())
    }

    /// Current fleet as a list, ordered by node id for stable iteration
    pub fn nodes(&self) -> Vec<Node> {
        let snapshot = self.snapshot();
        let mut nodes: Vec<Node> = snapshot.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.snapshot().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Insert a discovered node, or merge discovery-derived fields into an
    /// existing entry. Live state (health, loaded models, free memory,
    /// probe timestamps) is preserved on merge; declarations only upgrade
    /// unknown fields. Returns true when the node was newly inserted.
    pub fn upsert(&self, node: Node) -> bool {
        let mut guard = self.nodes.write();
        let mut map = (**guard).clone();

        let inserted = match map.get_mut(&node.id) {
            Some(existing) => {
                existing.address = node.address;
                if existing.class == NodeClass::Unknown {
                    existing.class = node.class;
                }
                if node.vram_total_bytes > 0 {
                    existing.vram_total_bytes = node.vram_total_bytes;
                }
                if node.ram_total_bytes > 0 {
                    existing.ram_total_bytes = node.ram_total_bytes;
                }
                if node.parallelism.is_some() {
                    existing.parallelism = node.parallelism;
                }
                false
            }
            None => {
                info!(node_id = %node.id, class = %node.class, "registered node");
                map.insert(node.id.clone(), node);
                true
            }
        };

        *guard = Arc::new(map);
        inserted
    }

    /// Apply a partial state update to one node. Returns false when the
    /// node is not registered.
    pub fn update(&self, id: &NodeId, patch: NodePatch) -> bool {
        let mut guard = self.nodes.write();
        let mut map = (**guard).clone();

        let Some(node) = map.get_mut(id) else {
            return false;
        };

        if let Some(healthy) = patch.healthy {
            if healthy {
                node.mark_healthy();
            } else {
                node.mark_unhealthy();
            }
        }
        if let Some(class) = patch.class {
            node.class = class;
        }
        if let Some(models) = patch.loaded_models {
            node.loaded_models = models;
        }
        if let Some(v) = patch.vram_total_bytes {
            node.vram_total_bytes = v;
        }
        if let Some(v) = patch.vram_free_bytes {
            node.vram_free_bytes = v;
        }
        if let Some(v) = patch.ram_total_bytes {
            node.ram_total_bytes = v;
        }
        if let Some(v) = patch.ram_free_bytes {
            node.ram_free_bytes = v;
        }

        *guard = Arc::new(map);
        true
    }

    /// Flip a node's health flag, keeping probe/uptime bookkeeping
    pub fn set_healthy(&self, id: &NodeId, healthy: bool) -> bool {
        self.update(id, NodePatch::healthy(healthy))
    }

    /// Remove a node. Callers enforce the grace window and never remove a
    /// node with requests in flight.
    pub fn remove(&self, id: &NodeId) -> Option<Node> {
        let mut guard = self.nodes.write();
        let mut map = (**guard).clone();
        let removed = map.remove(id);
        if removed.is_some() {
            debug!(node_id = %id, "removed node");
            *guard = Arc::new(map);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::NodeAddress;

    fn node(host: &str, class: NodeClass) -> Node {
        Node::new(NodeAddress::new(host, 11434), class)
    }

    #[test]
    fn test_upsert_and_snapshot() {
        let registry = NodeRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.upsert(node("a", NodeClass::Gpu)));
        assert!(registry.upsert(node("b", NodeClass::Cpu)));
        assert_eq!(registry.len(), 2);

        // Re-upserting is a merge, not an insert
        assert!(!registry.upsert(node("a", NodeClass::Gpu)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_upsert_preserves_live_state() {
        let registry = NodeRegistry::new();
        registry.upsert(node("a", NodeClass::Unknown));

        let id: NodeId = "a:11434".into();
        registry.set_healthy(&id, true);
        registry.update(
            &id,
            NodePatch {
                vram_free_bytes: Some(4 << 30),
                ..Default::default()
            },
        );

        // Discovery sees the node again, now with a declared class
        let mut rediscovered = node("a", NodeClass::Gpu);
        rediscovered.vram_total_bytes = 16 << 30;
        registry.upsert(rediscovered);

        let merged = registry.get(&id).unwrap();
        assert!(merged.healthy, "live health survives upsert");
        assert_eq!(merged.vram_free_bytes, 4 << 30, "live state survives upsert");
        assert_eq!(merged.class, NodeClass::Gpu, "unknown class upgraded");
        assert_eq!(merged.vram_total_bytes, 16 << 30);
    }

    #[test]
    fn test_snapshot_isolated_from_writes() {
        let registry = NodeRegistry::new();
        registry.upsert(node("a", NodeClass::Gpu));

        let before = registry.snapshot();
        registry.upsert(node("b", NodeClass::Cpu));
        registry.remove(&"a:11434".into());

        // The old snapshot still shows the old world
        assert_eq!(before.len(), 1);
        assert!(before.contains_key(&NodeId::from("a:11434")));

        let after = registry.snapshot();
        assert_eq!(after.len(), 1);
        assert!(after.contains_key(&NodeId::from("b:11434")));
    }

    #[test]
    fn test_update_missing_node() {
        let registry = NodeRegistry::new();
        assert!(!registry.update(&"ghost:1".into(), NodePatch::healthy(true)));
        assert!(registry.remove(&"ghost:1".into()).is_none());
    }

    #[test]
    fn test_nodes_ordered_by_id() {
        let registry = NodeRegistry::new();
        registry.upsert(node("c", NodeClass::Cpu));
        registry.upsert(node("a", NodeClass::Gpu));
        registry.upsert(node("b", NodeClass::Cpu));

        let ids: Vec<String> = registry
            .nodes()
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a:11434", "b:11434", "c:11434"]);
    }
}
