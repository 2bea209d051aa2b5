use crate::events::ExecutionId;
use crate::node::{Node, NodeId, NodeInner};
use crate::registry::Environment;
use crate::{DagError, GraphError, RegistryError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub(crate) struct GraphInner {
    id: Uuid,
    env: Arc<Environment>,
    nodes: RwLock<Vec<Node>>,
    locked: AtomicBool,
    owner: Mutex<Weak<NodeInner>>,
    execution_id: Mutex<ExecutionId>,
}

/// Ordered collection of nodes. Structural changes are rejected while the
/// graph is locked for execution.
#[derive(Clone)]
pub struct Graph(pub(crate) Arc<GraphInner>);

impl Graph {
    pub fn new(env: Arc<Environment>) -> Self {
        Self(Arc::new(GraphInner {
            id: Uuid::new_v4(),
            env,
            nodes: RwLock::new(Vec::new()),
            locked: AtomicBool::new(false),
            owner: Mutex::new(Weak::new()),
            execution_id: Mutex::new(Uuid::nil()),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.0.env
    }

    /// Instantiate a registered node type and run its first declaration pass
    pub fn add_node(&self, type_name: &str) -> Result<Node, DagError> {
        if type_name.is_empty() {
            return Err(RegistryError::EmptyName.into());
        }
        if self.is_locked() {
            return Err(GraphError::Locked.into());
        }

        let node_type = self.0.env.registry().node_type(type_name)?;
        let node = Node::new(Uuid::new_v4(), node_type, self.0.env.clone(), Arc::downgrade(&self.0));
        self.0.nodes.write().push(node.clone());

        if let Err(e) = node.declare() {
            self.detach(&node);
            return Err(e);
        }

        tracing::debug!(graph = %self.0.id, node = %node.id(), "Added node {}", type_name);
        Ok(node)
    }

    /// Insert a node rebuilt from its serialized form.
    pub(crate) fn push_undeclared(&self, id: NodeId, type_name: &str) -> Result<Node, DagError> {
        let node_type = self.0.env.registry().node_type(type_name)?;
        let node = Node::new(id, node_type, self.0.env.clone(), Arc::downgrade(&self.0));
        self.0.nodes.write().push(node.clone());
        Ok(node)
    }

    pub fn remove_node(&self, node: &Node) -> Result<(), DagError> {
        if self.is_locked() {
            return Err(GraphError::Locked.into());
        }
        if !self.detach(node) {
            return Err(GraphError::NodeNotFound(node.id().to_string()).into());
        }

        tracing::debug!(graph = %self.0.id, node = %node.id(), "Removed node {}", node.type_name());
        Ok(())
    }

    fn detach(&self, node: &Node) -> bool {
        let removed = {
            let mut nodes = self.0.nodes.write();
            match nodes.iter().position(|n| n.ptr_eq(node)) {
                Some(index) => Some(nodes.remove(index)),
                None => None,
            }
        };

        match removed {
            Some(node) => {
                for port in node.ports() {
                    port.detach_links();
                }
                node.detach_from_graph();
                true
            }
            None => false,
        }
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.0.nodes.read().clone()
    }

    pub fn node(&self, index: usize) -> Option<Node> {
        self.0.nodes.read().get(index).cloned()
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<Node> {
        self.0.nodes.read().iter().find(|n| n.id() == id).cloned()
    }

    /// Nodes of the given type, in graph order
    pub fn nodes_of_type(&self, type_name: &str) -> Vec<Node> {
        self.0
            .nodes
            .read()
            .iter()
            .filter(|n| n.type_name() == type_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_locked(&self) -> bool {
        self.0.locked.load(Ordering::Acquire)
    }

    /// Returns false if the graph was already locked.
    pub(crate) fn try_lock(&self) -> bool {
        self.0
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unlock(&self) {
        self.0.locked.store(false, Ordering::Release);
    }

    /// Node embedding this graph, if any.
    pub fn owner(&self) -> Option<Node> {
        self.0.owner.lock().upgrade().map(Node)
    }

    pub fn set_owner(&self, node: &Node) {
        *self.0.owner.lock() = node.downgrade();
    }

    /// Id of the most recent compilation of this graph.
    pub fn execution_id(&self) -> ExecutionId {
        *self.0.execution_id.lock()
    }

    pub(crate) fn set_execution_id(&self, id: ExecutionId) {
        *self.0.execution_id.lock() = id;
    }

    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.0.id)
            .field("nodes", &self.len())
            .field("locked", &self.is_locked())
            .finish()
    }
}
