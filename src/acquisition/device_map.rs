//! Device → stage mapping
//!
//! Sources carry their line/position in the path. A static `[[devices]]`
//! table can pin a device to a different place (a counter moved between
//! positions) and links numeric datastore ids to canonical device tokens.
//! The map is built once per cycle and consulted for every source.

use std::collections::HashMap;

use crate::config::DeviceMapping;
use crate::types::SourceKey;

#[derive(Debug, Clone, Default)]
pub struct DeviceMap {
    by_id: HashMap<String, DeviceMapping>,
    by_store_id: HashMap<u32, String>,
}

impl DeviceMap {
    pub fn new(mappings: &[DeviceMapping]) -> Self {
        let mut map = Self::default();
        for m in mappings {
            let id = canonical_device_id(&m.id);
            if let Some(store_id) = m.store_id {
                map.by_store_id.insert(store_id, id.clone());
            }
            map.by_id.insert(id, m.clone());
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Apply static overrides to a path-derived key.
    ///
    /// A mapping's `brick_type` only replaces the path's when set.
    pub fn resolve(&self, derived: SourceKey) -> SourceKey {
        match self.by_id.get(&derived.device_id) {
            Some(m) => SourceKey {
                line: m.line.clone(),
                position: m.position.clone(),
                brick_type: m.brick_type.clone().or(derived.brick_type),
                device_id: derived.device_id,
            },
            None => derived,
        }
    }

    /// Canonical key for a numeric datastore device id.
    pub fn for_store_id(&self, store_id: u32) -> Option<SourceKey> {
        let id = self.by_store_id.get(&store_id)?;
        let m = self.by_id.get(id)?;
        Some(SourceKey::new(
            m.line.clone(),
            m.position.clone(),
            m.brick_type.clone(),
            id.clone(),
        ))
    }

    /// Every mapping with a datastore id, in ascending id order.
    pub fn store_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.by_store_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Normalise a device token: trimmed, uppercase.
pub fn canonical_device_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}
