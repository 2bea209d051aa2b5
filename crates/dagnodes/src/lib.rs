//! Standard node library
//!
//! Scalar data types, the input/math/output nodes and the bridge nodes
//! that let a graph run inside another graph.

mod builtin;
mod demo;
mod graph;

pub use crate::builtin::{
    CorePlugin, Operation, BOOL_TYPE, BYTES_TYPE, DOUBLE_TYPE, FLOAT_TYPE, INT_TYPE, JSON_TYPE,
    STRING_TYPE,
};
pub use demo::build_demo_graph;
pub use graph::{
    passthrough_graph, GraphPlugin, GRAPH_INVOKER, GRAPH_OBJECT_TYPE, INPUT_BRIDGE, OUTPUT_BRIDGE,
};

use dagruntime::Plugin;
use std::sync::Arc;

/// All standard plugins, ready for `Runtime::new`
pub fn plugins() -> Vec<Arc<dyn Plugin>> {
    vec![Arc::new(CorePlugin), Arc::new(GraphPlugin)]
}
