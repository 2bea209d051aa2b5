use crate::PluginError;
use dagcore::{DagError, Registry};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;

/// Interface version plugins are built against.
pub const ABI_VERSION: u32 = 1;

/// A bundle of node types and data types.
pub trait Plugin: Send + Sync {
    /// Unique identifier other plugins refer to in their dependencies
    fn id(&self) -> &str;

    fn abi_version(&self) -> u32 {
        ABI_VERSION
    }

    /// Ids of plugins that must be initialized first
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Register node types and data types
    fn init(&self, registry: &mut Registry) -> Result<(), DagError>;

    fn shutdown(&self) {}
}

/// Initializes plugins in dependency order and shuts them down in reverse.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    pub fn load(
        plugins: Vec<Arc<dyn Plugin>>,
        registry: &mut Registry,
    ) -> Result<Self, PluginError> {
        let order = Self::resolve(&plugins)?;

        let mut manager = Self::default();
        for index in order {
            let plugin = plugins[index].clone();
            tracing::info!("Initializing plugin: {}", plugin.id());

            if let Err(source) = plugin.init(registry) {
                // Already initialized plugins are shut down by Drop.
                return Err(PluginError::Init {
                    plugin: plugin.id().to_string(),
                    source,
                });
            }
            manager.plugins.push(plugin);
        }

        Ok(manager)
    }

    /// Check versions and dependencies and compute the init order.
    fn resolve(plugins: &[Arc<dyn Plugin>]) -> Result<Vec<usize>, PluginError> {
        let mut graph = DiGraph::<usize, ()>::new();
        let mut ids = HashMap::new();

        for (i, plugin) in plugins.iter().enumerate() {
            let id = plugin.id();
            if id.is_empty() {
                return Err(PluginError::EmptyId);
            }
            if plugin.abi_version() != ABI_VERSION {
                return Err(PluginError::IncompatiblePlugin {
                    plugin: id.to_string(),
                    found: plugin.abi_version(),
                    expected: ABI_VERSION,
                });
            }
            if ids.insert(id.to_string(), graph.add_node(i)).is_some() {
                return Err(PluginError::Duplicate(id.to_string()));
            }
        }

        for plugin in plugins {
            let to = ids[plugin.id()];
            for dependency in plugin.dependencies() {
                let from = ids
                    .get(&dependency)
                    .copied()
                    .ok_or_else(|| PluginError::MissingDependency {
                        plugin: plugin.id().to_string(),
                        dependency: dependency.clone(),
                    })?;
                graph.add_edge(from, to, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let index = graph[cycle.node_id()];
            PluginError::DependencyCycle(plugins[index].id().to_string())
        })?;

        Ok(order.into_iter().map(|node| graph[node]).collect())
    }

    /// Plugin ids in initialization order
    pub fn ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn shutdown(&mut self) {
        while let Some(plugin) = self.plugins.pop() {
            tracing::info!("Shutting down plugin: {}", plugin.id());
            plugin.shutdown();
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
