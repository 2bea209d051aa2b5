//! Core abstractions for the dag runtime
//!
//! Data containers, ports, nodes and graphs, the task model and the compiler
//! turning a graph into tasks. Scheduling tasks on threads lives in
//! `dagruntime`.

mod codec;
mod compiler;
mod data;
mod error;
pub mod events;
mod graph;
mod node;
mod port;
mod registry;
mod task;

pub use codec::{RawGraph, RawNode, RawPort, RawValue, FORMAT_VERSION};
pub use data::{Data, DataType, Datum, SerdeType, TypeInfo};
pub use error::{
    CodecError, DagError, ErrorKind, GraphError, NodeError, PortError, RegistryError,
};
pub use events::*;
pub use graph::Graph;
pub use node::{Declaration, DeclarationState, Node, NodeContext, NodeId, NodeTask};
pub use port::{InputBehavior, Port, PortVariant};
pub use registry::{DeclareFn, Environment, NodeType, Registry};
pub use task::Task;

/// Result type for dag operations
pub type Result<T> = std::result::Result<T, DagError>;
