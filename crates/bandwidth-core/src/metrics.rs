//! Metrics registry owned by the composition root.
//!
//! Holds a non-global `prometheus::Registry` carrying the namespace prefix,
//! with the snapshot store and the health metrics registered into it. Each
//! scheduler gets its own registry, so independent instances never share
//! state.

use prometheus::{Encoder, Registry, TextEncoder};

use crate::health::CollectionHealth;
use crate::snapshot::SnapshotStore;

pub const DEFAULT_NAMESPACE: &str = "bandwidth";

pub struct MetricsRegistry {
    registry: Registry,
    store: SnapshotStore,
    health: CollectionHealth,
}

impl MetricsRegistry {
    /// Creates a registry whose metric names are prefixed with `namespace_`.
    pub fn new(namespace: &str) -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;

        let store = SnapshotStore::new();
        registry.register(Box::new(store.clone()))?;

        let health = CollectionHealth::new()?;
        health.register(&registry)?;

        Ok(Self {
            registry,
            store,
            health,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn health(&self) -> &CollectionHealth {
        &self.health
    }

    /// Content type of [`encode`](Self::encode) output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Renders the snapshot and health metrics in the text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let families = self.registry.gather();
        let mut out = String::new();
        TextEncoder::new().encode_utf8(&families, &mut out)?;
        Ok(out)
    }
}
