use crate::data::{fnv1a_32, DataType, TypeInfo};
use crate::events::EventBus;
use crate::node::Declaration;
use crate::{DagError, Data, RegistryError};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback that declares a node's ports, task and context.
pub type DeclareFn = Arc<dyn Fn(&mut Declaration<'_>) -> Result<(), DagError> + Send + Sync>;

struct NodeTypeEntry {
    name: String,
    hash: u32,
    declare: DeclareFn,
}

/// A registered node type.
#[derive(Clone)]
pub struct NodeType(Arc<NodeTypeEntry>);

impl NodeType {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn hash(&self) -> u32 {
        self.0.hash
    }

    pub(crate) fn declare_fn(&self) -> DeclareFn {
        self.0.declare.clone()
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeType").field(&self.name()).finish()
    }
}

/// Registry of node types and data types known to a runtime
#[derive(Default)]
pub struct Registry {
    nodes: HashMap<String, NodeType>,
    types: HashMap<String, TypeInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type under `name`
    pub fn register_node<F>(&mut self, name: impl Into<String>, declare: F) -> Result<(), DagError>
    where
        F: Fn(&mut Declaration<'_>) -> Result<(), DagError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName.into());
        }

        tracing::info!("Registering node type: {}", name);
        let entry = NodeTypeEntry {
            hash: fnv1a_32(&name),
            name: name.clone(),
            declare: Arc::new(declare),
        };
        self.nodes.insert(name, NodeType(Arc::new(entry)));
        Ok(())
    }

    /// Register a data type
    pub fn register_type(&mut self, ops: impl DataType + 'static) -> Result<(), DagError> {
        if ops.name().is_empty() {
            return Err(RegistryError::EmptyName.into());
        }

        let info = TypeInfo::new(ops);
        tracing::info!("Registering data type: {}", info.name());
        self.types.insert(info.name().to_string(), info);
        Ok(())
    }

    pub fn node_type(&self, name: &str) -> Result<NodeType, RegistryError> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownNodeType(name.to_string()))
    }

    pub fn data_type(&self, name: &str) -> Result<TypeInfo, RegistryError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDataType(name.to_string()))
    }

    /// Build a value of the named type. Used for port defaults and writes.
    pub fn make<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> Result<Data, RegistryError> {
        Data::new(self.data_type(type_name)?, value)
    }

    /// Get all registered node types, sorted by name
    pub fn list_node_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get all registered data types, sorted by name
    pub fn list_data_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Everything graphs share with the runtime that created them.
pub struct Environment {
    registry: Registry,
    events: EventBus,
}

impl Environment {
    pub fn new(registry: Registry, events: EventBus) -> Arc<Self> {
        Arc::new(Self { registry, events })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
