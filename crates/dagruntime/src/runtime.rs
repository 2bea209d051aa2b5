use crate::{Executor, Plugin, PluginManager, RuntimeError};
use dagcore::{EventBus, Environment, ExecutionEvent, Graph, Registry, Task};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Owns the registry, the worker pool and the plugins of one embedding
pub struct Runtime {
    env: Arc<Environment>,
    executor: Executor,
    plugins: PluginManager,
}

impl Runtime {
    /// Create a runtime with default settings
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self, RuntimeError> {
        Self::with_config(plugins, RuntimeConfig::default())
    }

    /// Create a runtime with custom configuration
    pub fn with_config(
        plugins: Vec<Arc<dyn Plugin>>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        Self::with_executor(plugins, config, Executor::new()?)
    }

    /// Create a runtime around an existing worker pool
    pub fn with_executor(
        plugins: Vec<Arc<dyn Plugin>>,
        config: RuntimeConfig,
        executor: Executor,
    ) -> Result<Self, RuntimeError> {
        let mut registry = Registry::new();
        let plugins = PluginManager::load(plugins, &mut registry)?;
        let env = Environment::new(registry, EventBus::new(config.event_buffer_size));

        tracing::info!(
            "Runtime ready with {} workers and plugins {:?}",
            executor.worker_count(),
            plugins.ids()
        );

        Ok(Self {
            env,
            executor,
            plugins,
        })
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Get access to the registry filled by the plugins
    pub fn registry(&self) -> &Registry {
        self.env.registry()
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.ids()
    }

    pub fn list_node_types(&self) -> Vec<String> {
        self.env.registry().list_node_types()
    }

    pub fn list_data_types(&self) -> Vec<String> {
        self.env.registry().list_data_types()
    }

    pub fn create_graph(&self) -> Graph {
        Graph::new(self.env.clone())
    }

    pub fn deserialize_graph(&self, bytes: &[u8]) -> Result<Graph, RuntimeError> {
        Ok(Graph::deserialize(&self.env, bytes)?)
    }

    /// Queue a task without waiting for it
    pub fn submit(&self, task: Task) {
        self.executor.submit(task);
    }

    /// Run a task and block until it and its subgraph completed
    pub fn execute_task(&self, task: &Task) {
        self.executor.execute(task);
    }

    /// Compile and run a graph, blocking until it is unlocked again
    pub fn execute(&self, graph: &Graph) -> Result<(), RuntimeError> {
        let root = graph.taskify()?;
        self.executor.execute(&root);
        Ok(())
    }

    /// Compile and run a graph without blocking the async caller
    pub async fn execute_async(&self, graph: &Graph) -> Result<(), RuntimeError> {
        let root = graph.taskify()?;
        self.executor.submit(root.clone());
        root.wait_async().await;
        Ok(())
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.env.events().subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &EventBus {
        self.env.events()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Workers first, so no plugin code runs after its shutdown.
        self.executor.shutdown();
        self.plugins.shutdown();
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
        }
    }
}
