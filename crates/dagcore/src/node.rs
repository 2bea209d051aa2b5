use crate::data::fnv1a_32;
use crate::events::EventEmitter;
use crate::graph::{Graph, GraphInner};
use crate::port::{InputBehavior, Port, PortVariant};
use crate::registry::{Environment, NodeType, Registry};
use crate::task::Task;
use crate::{DagError, Data, NodeError, PortError};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub type NodeId = Uuid;

/// Function a node runs when its task executes.
pub type NodeTask = Arc<dyn Fn(&Task, &Node) -> Result<(), NodeError> + Send + Sync>;

/// Custom per-node state set during declaration.
pub type NodeContext = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationState {
    Undeclared,
    Declaring,
    Declared,
}

pub(crate) struct NodeInner {
    id: NodeId,
    node_type: NodeType,
    env: Arc<Environment>,
    graph: Mutex<Weak<GraphInner>>,
    ports: RwLock<Vec<Port>>,
    task: Mutex<Option<NodeTask>>,
    context: Mutex<Option<NodeContext>>,
    state: Mutex<DeclarationState>,
}

/// Handle to a node instance inside a graph.
#[derive(Clone)]
pub struct Node(pub(crate) Arc<NodeInner>);

impl Node {
    /// Create an undeclared node. Callers run [`Node::declare`] once the
    /// node is reachable from its graph.
    pub(crate) fn new(
        id: NodeId,
        node_type: NodeType,
        env: Arc<Environment>,
        graph: Weak<GraphInner>,
    ) -> Self {
        Self(Arc::new(NodeInner {
            id,
            node_type,
            env,
            graph: Mutex::new(graph),
            ports: RwLock::new(Vec::new()),
            task: Mutex::new(None),
            context: Mutex::new(None),
            state: Mutex::new(DeclarationState::Undeclared),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn type_name(&self) -> &str {
        self.0.node_type.name()
    }

    pub fn node_type(&self) -> &NodeType {
        &self.0.node_type
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.0.env
    }

    pub fn registry(&self) -> &Registry {
        self.0.env.registry()
    }

    /// Graph this node belongs to, `None` after removal.
    pub fn graph(&self) -> Option<Graph> {
        self.0.graph.lock().upgrade().map(Graph)
    }

    pub(crate) fn detach_from_graph(&self) {
        *self.0.graph.lock() = Weak::new();
    }

    pub(crate) fn is_graph_locked(&self) -> bool {
        self.graph().is_some_and(|graph| graph.is_locked())
    }

    pub fn state(&self) -> DeclarationState {
        *self.0.state.lock()
    }

    pub(crate) fn is_declaring(&self) -> bool {
        self.state() == DeclarationState::Declaring
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Arc::downgrade(&self.0)
    }

    /// Ports in declaration order
    pub fn ports(&self) -> Vec<Port> {
        self.0.ports.read().clone()
    }

    pub fn port(&self, name: &str) -> Option<Port> {
        let hash = fnv1a_32(name);
        self.0
            .ports
            .read()
            .iter()
            .find(|port| port.matches(hash, name))
            .cloned()
    }

    pub fn port_at(&self, index: usize) -> Option<Port> {
        self.0.ports.read().get(index).cloned()
    }

    /// Like [`Node::port`] but failing with `NotFound`.
    pub fn port_required(&self, name: &str) -> Result<Port, PortError> {
        self.port(name)
            .ok_or_else(|| PortError::NotFound(format!("{}.{}", self.type_name(), name)))
    }

    pub(crate) fn push_port(&self, port: Port) {
        self.0.ports.write().push(port);
    }

    /// Read port `name` (see [`Port::get`]).
    pub fn get(&self, name: &str) -> Result<Option<Data>, DagError> {
        self.port_required(name)?.get()
    }

    pub fn get_as<T: Any + Clone + Send + Sync>(&self, name: &str) -> Result<Option<T>, DagError> {
        self.port_required(name)?.get_as::<T>()
    }

    /// Write port `name` (see [`Port::set`]).
    pub fn set<T: Any + Send + Sync>(&self, name: &str, type_name: &str, value: T) -> Result<(), DagError> {
        self.port_required(name)?.set(type_name, value)
    }

    pub fn value_type(&self, name: &str) -> Result<Option<String>, PortError> {
        Ok(self.port_required(name)?.value_type())
    }

    pub fn task_fn(&self) -> Option<NodeTask> {
        self.0.task.lock().clone()
    }

    /// Custom context, `None` when the node is its own context.
    pub fn context(&self) -> Option<NodeContext> {
        self.0.context.lock().clone()
    }

    pub fn context_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context()?.downcast::<T>().ok()
    }

    /// Emitter bound to this node and the current execution of its graph.
    pub fn events(&self) -> EventEmitter {
        let execution_id = self
            .graph()
            .map(|graph| graph.execution_id())
            .unwrap_or_else(Uuid::nil);
        self.0.env.events().create_emitter(execution_id, self.0.id)
    }

    /// Run a declaration pass: drop the context and task, let the node type
    /// declare its ports again, then remove every port it did not declare.
    pub(crate) fn declare(&self) -> Result<(), DagError> {
        {
            let mut state = self.0.state.lock();
            if *state == DeclarationState::Declaring {
                return Err(PortError::Declaring(self.type_name().to_string()).into());
            }
            *state = DeclarationState::Declaring;
        }

        tracing::debug!(node = %self.0.id, "Declaring {}", self.type_name());

        *self.0.task.lock() = None;
        let previous_context = self.0.context.lock().take();
        drop(previous_context);

        for port in self.0.ports.read().iter() {
            port.clear_declared();
        }

        let declare = self.0.node_type.declare_fn();
        let result = declare(&mut Declaration { node: self });

        let removed: Vec<Port> = {
            let mut ports = self.0.ports.write();
            let (keep, removed) = std::mem::take(&mut *ports)
                .into_iter()
                .partition(|port| port.is_declared());
            *ports = keep;
            removed
        };
        for port in removed {
            tracing::debug!(node = %self.0.id, "Removing undeclared port {}", port.name());
            port.detach_links();
        }

        *self.0.state.lock() = DeclarationState::Declared;
        result
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.0.id)
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

/// Handed to a node type's declare callback.
pub struct Declaration<'a> {
    node: &'a Node,
}

impl<'a> Declaration<'a> {
    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn registry(&self) -> &'a Registry {
        self.node.registry()
    }

    /// Build a default value of a registered type.
    pub fn value<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> Result<Data, DagError> {
        Ok(self.registry().make(type_name, value)?)
    }

    pub fn input(
        &mut self,
        name: &str,
        behavior: InputBehavior,
        default: Option<Data>,
    ) -> Result<Port, DagError> {
        self.declare_port(name, PortVariant::Input, behavior, default)
    }

    pub fn output(&mut self, name: &str) -> Result<Port, DagError> {
        self.declare_port(name, PortVariant::Output, InputBehavior::default(), None)
    }

    pub fn parameter(&mut self, name: &str, default: Option<Data>) -> Result<Port, DagError> {
        self.declare_port(name, PortVariant::Parameter, InputBehavior::default(), default)
    }

    pub fn task<F>(&mut self, task: F)
    where
        F: Fn(&Task, &Node) -> Result<(), NodeError> + Send + Sync + 'static,
    {
        *self.node.0.task.lock() = Some(Arc::new(task));
    }

    pub fn context<T: Any + Send + Sync>(&mut self, context: T) {
        let previous = self.node.0.context.lock().replace(Arc::new(context));
        drop(previous);
    }

    // Existing ports keep their value and links; defaults only apply to
    // ports created here.
    fn declare_port(
        &mut self,
        name: &str,
        variant: PortVariant,
        behavior: InputBehavior,
        default: Option<Data>,
    ) -> Result<Port, DagError> {
        if name.is_empty() {
            return Err(PortError::EmptyName.into());
        }

        let hash = fnv1a_32(name);
        let (port, replaced) = {
            let mut ports = self.node.0.ports.write();
            match ports.iter().position(|port| port.matches(hash, name)) {
                Some(index) if ports[index].variant() == variant => {
                    let port = ports[index].clone();
                    port.mark_declared();
                    port.set_behavior(behavior);
                    return Ok(port);
                }
                Some(index) => {
                    let port = Port::new(self.node.downgrade(), name, variant, behavior, default);
                    let replaced = std::mem::replace(&mut ports[index], port.clone());
                    (port, Some(replaced))
                }
                None => {
                    let port = Port::new(self.node.downgrade(), name, variant, behavior, default);
                    ports.push(port.clone());
                    (port, None)
                }
            }
        };

        if let Some(replaced) = replaced {
            replaced.detach_links();
        }
        Ok(port)
    }
}
