//! Backend pool management.
//!
//! # Responsibilities
//! - Manage collections of backends grouped by name
//! - Apply load balancing algorithms to select backends
//! - Provide connection guards for tracking

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::load_balancer::{
    backend::{Backend, BackendConnectionGuard},
    round_robin::RoundRobin,
    LoadBalancer,
};

struct Group {
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
}

/// Manages backend pools and load balancing.
pub struct BackendManager {
    groups: HashMap<String, Group>,
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendManager {
    /// Build groups from configuration. Unparseable addresses are skipped;
    /// validation rejects them before this runs.
    pub fn new(configs: &[BackendConfig]) -> Self {
        let mut groups: HashMap<String, Group> = HashMap::new();

        for config in configs {
            let Ok(addr) = config.address.parse() else {
                tracing::warn!(backend = %config.name, address = %config.address, "Invalid backend address");
                continue;
            };
            let backend = Arc::new(Backend::new(config.name.clone(), addr, config.max_connections));
            groups
                .entry(config.group.clone())
                .or_insert_with(|| Group {
                    backends: Vec::new(),
                    balancer: Box::new(RoundRobin::new()),
                })
                .backends
                .push(backend);
        }

        Self { groups }
    }

    /// Select a backend for the given group.
    /// Returns a guard that decrements the connection count on drop.
    pub fn get(&self, group_name: &str) -> Option<BackendConnectionGuard> {
        let Some(group) = self.groups.get(group_name) else {
            tracing::debug!(group = %group_name, "Group not found in BackendManager");
            return None;
        };

        match group.balancer.next_server(&group.backends) {
            Some(backend) => backend.try_create_guard(),
            None => {
                tracing::debug!(
                    group = %group_name,
                    backend_count = group.backends.len(),
                    "No backend with spare capacity"
                );
                None
            }
        }
    }

    pub fn group_size(&self, group_name: &str) -> usize {
        self.groups.get(group_name).map_or(0, |g| g.backends.len())
    }
}
