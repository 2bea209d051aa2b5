use crate::data::fnv1a_32;
use crate::node::{Node, NodeInner};
use crate::{DagError, Data, PortError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortVariant {
    Input,
    Output,
    Parameter,
}

/// How an input observes the value of the output it is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputBehavior {
    /// Share the producer's value.
    #[default]
    Reference,
    /// Independent copy made through the type's clone operation.
    Clone,
    /// Take the value out of the producer. Only honoured when the producer
    /// has a single consumer, otherwise behaves like `Clone`.
    Acquire,
}

enum PortKind {
    Input {
        behavior: Mutex<InputBehavior>,
        link: Mutex<Weak<PortInner>>,
        // Set by the first reference read of a pass.
        spent: AtomicBool,
    },
    Output {
        links: Mutex<Vec<Weak<PortInner>>>,
        pending_accesses: AtomicU64,
    },
    Parameter,
}

pub(crate) struct PortInner {
    name: String,
    hash: u32,
    node: Weak<NodeInner>,
    value: Mutex<Option<Data>>,
    declared: AtomicBool,
    kind: PortKind,
}

/// Handle to a port of a node.
#[derive(Clone)]
pub struct Port(Arc<PortInner>);

impl Port {
    pub(crate) fn new(
        node: Weak<NodeInner>,
        name: &str,
        variant: PortVariant,
        behavior: InputBehavior,
        value: Option<Data>,
    ) -> Self {
        let kind = match variant {
            PortVariant::Input => PortKind::Input {
                behavior: Mutex::new(behavior),
                link: Mutex::new(Weak::new()),
                spent: AtomicBool::new(false),
            },
            PortVariant::Output => PortKind::Output {
                links: Mutex::new(Vec::new()),
                pending_accesses: AtomicU64::new(0),
            },
            PortVariant::Parameter => PortKind::Parameter,
        };

        Self(Arc::new(PortInner {
            name: name.to_string(),
            hash: fnv1a_32(name),
            node,
            value: Mutex::new(value),
            declared: AtomicBool::new(true),
            kind,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn hash(&self) -> u32 {
        self.0.hash
    }

    pub(crate) fn matches(&self, hash: u32, name: &str) -> bool {
        self.0.hash == hash && self.0.name == name
    }

    pub fn variant(&self) -> PortVariant {
        match self.0.kind {
            PortKind::Input { .. } => PortVariant::Input,
            PortKind::Output { .. } => PortVariant::Output,
            PortKind::Parameter => PortVariant::Parameter,
        }
    }

    /// Input behavior, `None` for outputs and parameters.
    pub fn behavior(&self) -> Option<InputBehavior> {
        match &self.0.kind {
            PortKind::Input { behavior, .. } => Some(*behavior.lock()),
            _ => None,
        }
    }

    pub(crate) fn set_behavior(&self, value: InputBehavior) {
        if let PortKind::Input { behavior, .. } = &self.0.kind {
            *behavior.lock() = value;
        }
    }

    /// Owning node, `None` once the node is gone.
    pub fn node(&self) -> Option<Node> {
        self.0.node.upgrade().map(Node)
    }

    fn owner(&self) -> Result<Node, PortError> {
        self.node()
            .ok_or_else(|| PortError::Detached(self.0.name.clone()))
    }

    pub fn ptr_eq(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity usable as a map key.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn is_declared(&self) -> bool {
        self.0.declared.load(Ordering::Acquire)
    }

    pub(crate) fn mark_declared(&self) {
        self.0.declared.store(true, Ordering::Release);
    }

    pub(crate) fn clear_declared(&self) {
        self.0.declared.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.node().is_some_and(|node| node.is_graph_locked())
    }

    fn ensure_unlocked(&self) -> Result<(), PortError> {
        if self.owner()?.is_graph_locked() {
            return Err(PortError::Locked(self.0.name.clone()));
        }
        Ok(())
    }

    /// Reference to the value stored in this port's own container.
    pub fn peek(&self) -> Option<Data> {
        self.0.value.lock().clone()
    }

    /// Read the port. Inputs resolve through their link according to their
    /// behavior; outputs and parameters return their own value.
    pub fn get(&self) -> Result<Option<Data>, DagError> {
        let PortKind::Input {
            behavior,
            link,
            spent,
        } = &self.0.kind
        else {
            return Ok(self.peek());
        };

        let behavior = *behavior.lock();
        let upstream = link.lock().upgrade().map(Port);

        let Some(upstream) = upstream else {
            return match behavior {
                InputBehavior::Reference => Ok(self.peek()),
                InputBehavior::Clone | InputBehavior::Acquire => duplicate(self.peek()),
            };
        };

        match behavior {
            InputBehavior::Reference => {
                let value = upstream.peek();
                if self.is_locked() && !spent.swap(true, Ordering::AcqRel) {
                    upstream.consume_access();
                }
                Ok(value)
            }
            InputBehavior::Clone => duplicate(upstream.peek()),
            InputBehavior::Acquire => {
                if upstream.fan_out() == 1 {
                    Ok(upstream.0.value.lock().take())
                } else {
                    duplicate(upstream.peek())
                }
            }
        }
    }

    /// Typed read, cloning the value out of the resolved data.
    pub fn get_as<T: Any + Clone + Send + Sync>(&self) -> Result<Option<T>, DagError> {
        Ok(self.get()?.and_then(|data| data.into_inner::<T>()))
    }

    /// Type name of the value this port currently resolves to.
    pub fn value_type(&self) -> Option<String> {
        let source = self.link().unwrap_or_else(|| self.clone());
        let type_name = source
            .0
            .value
            .lock()
            .as_ref()
            .map(|data| data.type_name().to_string());
        type_name
    }

    /// Store `value` as the registered type `type_name`.
    pub fn set<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> Result<(), DagError> {
        let node = self.owner()?;
        let data = node.environment().registry().make(type_name, value)?;
        self.store(Some(data))
    }

    pub fn set_value(&self, data: Data) -> Result<(), DagError> {
        self.store(Some(data))
    }

    /// Drop the stored value, leaving the container empty.
    pub fn clear(&self) -> Result<(), DagError> {
        self.store(None)
    }

    fn store(&self, value: Option<Data>) -> Result<(), DagError> {
        let node = self.owner()?;
        let locked = node.is_graph_locked();

        match &self.0.kind {
            PortKind::Output { .. } => {
                if !locked {
                    return Err(PortError::OutputOutsideExecution(self.0.name.clone()).into());
                }
            }
            PortKind::Parameter => {
                if locked {
                    return Err(PortError::Locked(self.0.name.clone()).into());
                }
                if node.is_declaring() {
                    return Err(PortError::Declaring(self.0.name.clone()).into());
                }
            }
            PortKind::Input { link, .. } => {
                if !locked && link.lock().upgrade().is_some() {
                    let message = format!(
                        "Setting linked input '{}' outside execution, the value stays shadowed by its link",
                        self.0.name
                    );
                    tracing::warn!(node = %node.id(), "{}", message);
                    node.events().warn(message);
                }
            }
        }

        drop(self.replace_value(value));

        if self.variant() == PortVariant::Parameter {
            node.declare()?;
        }
        Ok(())
    }

    /// Swap the stored value without any variant rules.
    pub(crate) fn replace_value(&self, value: Option<Data>) -> Option<Data> {
        std::mem::replace(&mut *self.0.value.lock(), value)
    }

    /// Connect an output to an input, in either order.
    pub fn connect(&self, other: &Port) -> Result<(), DagError> {
        let (output, input) = match (self.variant(), other.variant()) {
            (PortVariant::Output, PortVariant::Input) => (self, other),
            (PortVariant::Input, PortVariant::Output) => (other, self),
            (a, b) => {
                return Err(PortError::IncorrectVariant(format!(
                    "cannot connect {} ({:?}) with {} ({:?})",
                    self.0.name, a, other.0.name, b
                ))
                .into())
            }
        };

        output.ensure_unlocked()?;
        input.ensure_unlocked()?;
        output.link_input(input);

        tracing::debug!("Connected {} -> {}", output.0.name, input.0.name);
        Ok(())
    }

    pub(crate) fn link_input(&self, input: &Port) {
        input.unlink_input();

        if let PortKind::Output { links, .. } = &self.0.kind {
            links.lock().push(Arc::downgrade(&input.0));
        }
        if let PortKind::Input { link, .. } = &input.0.kind {
            *link.lock() = Arc::downgrade(&self.0);
        }
    }

    /// Inputs drop their link, outputs drop every link.
    pub fn disconnect(&self) -> Result<(), DagError> {
        if self.variant() == PortVariant::Parameter {
            return Err(PortError::IncorrectVariant(format!(
                "parameter {} has no links",
                self.0.name
            ))
            .into());
        }

        self.ensure_unlocked()?;
        self.detach_links();
        tracing::debug!("Disconnected {}", self.0.name);
        Ok(())
    }

    /// Drop the `index`-th link of this port.
    pub fn disconnect_at(&self, index: usize) -> Result<(), DagError> {
        match &self.0.kind {
            PortKind::Parameter => Err(PortError::IncorrectVariant(format!(
                "parameter {} has no links",
                self.0.name
            ))
            .into()),
            PortKind::Input { .. } => {
                if index != 0 || self.link().is_none() {
                    return Err(PortError::NotFound(format!("{}[{}]", self.0.name, index)).into());
                }
                self.disconnect()
            }
            PortKind::Output { links, .. } => {
                self.ensure_unlocked()?;
                let removed = {
                    let mut links = links.lock();
                    links.retain(|weak| weak.strong_count() > 0);
                    if index >= links.len() {
                        return Err(
                            PortError::NotFound(format!("{}[{}]", self.0.name, index)).into()
                        );
                    }
                    links.remove(index)
                };
                if let Some(input) = removed.upgrade().map(Port) {
                    input.clear_link_to(self);
                }
                Ok(())
            }
        }
    }

    /// Remove every link without checking the graph lock.
    pub(crate) fn detach_links(&self) {
        match &self.0.kind {
            PortKind::Input { .. } => self.unlink_input(),
            PortKind::Output { links, .. } => {
                let links = std::mem::take(&mut *links.lock());
                for input in links.iter().filter_map(Weak::upgrade).map(Port) {
                    input.clear_link_to(self);
                }
            }
            PortKind::Parameter => {}
        }
    }

    fn unlink_input(&self) {
        let PortKind::Input { link, .. } = &self.0.kind else {
            return;
        };

        let previous = std::mem::take(&mut *link.lock());
        let Some(output) = previous.upgrade() else {
            return;
        };
        if let PortKind::Output { links, .. } = &output.kind {
            let me = Arc::as_ptr(&self.0);
            links
                .lock()
                .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), me));
        }
    }

    fn clear_link_to(&self, output: &Port) {
        if let PortKind::Input { link, .. } = &self.0.kind {
            let mut link = link.lock();
            if std::ptr::eq(link.as_ptr(), Arc::as_ptr(&output.0)) {
                *link = Weak::new();
            }
        }
    }

    /// Output an input is linked to.
    pub fn link(&self) -> Option<Port> {
        match &self.0.kind {
            PortKind::Input { link, .. } => link.lock().upgrade().map(Port),
            _ => None,
        }
    }

    /// All live connections of this port.
    pub fn links(&self) -> Vec<Port> {
        match &self.0.kind {
            PortKind::Input { .. } => self.link().into_iter().collect(),
            PortKind::Output { links, .. } => {
                links.lock().iter().filter_map(Weak::upgrade).map(Port).collect()
            }
            PortKind::Parameter => Vec::new(),
        }
    }

    pub fn connected_port(&self, index: usize) -> Option<Port> {
        self.links().into_iter().nth(index)
    }

    /// Number of inputs an output feeds.
    pub fn fan_out(&self) -> usize {
        match &self.0.kind {
            PortKind::Output { links, .. } => {
                links.lock().iter().filter(|weak| weak.strong_count() > 0).count()
            }
            _ => 0,
        }
    }

    /// Reference reads still expected from downstream inputs this pass.
    pub fn pending_accesses(&self) -> u64 {
        match &self.0.kind {
            PortKind::Output {
                pending_accesses, ..
            } => pending_accesses.load(Ordering::Acquire),
            _ => 0,
        }
    }

    fn consume_access(&self) {
        if let PortKind::Output {
            pending_accesses, ..
        } = &self.0.kind
        {
            let _ = pending_accesses.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_sub(1)
            });
        }
    }

    /// Prepare the per-pass bookkeeping before a graph executes.
    pub(crate) fn reset_pass(&self) {
        match &self.0.kind {
            PortKind::Input { spent, .. } => spent.store(false, Ordering::Release),
            PortKind::Output {
                pending_accesses, ..
            } => {
                let readers = self
                    .links()
                    .iter()
                    .filter(|input| input.behavior() == Some(InputBehavior::Reference))
                    .count() as u64;
                pending_accesses.store(readers, Ordering::Release);
            }
            PortKind::Parameter => {}
        }
    }
}

fn duplicate(value: Option<Data>) -> Result<Option<Data>, DagError> {
    match value {
        Some(data) => Ok(Some(data.duplicate()?)),
        None => Ok(None),
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.0.name)
            .field("variant", &self.variant())
            .finish_non_exhaustive()
    }
}
