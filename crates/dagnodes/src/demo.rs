use crate::builtin::{Operation, INT_TYPE, STRING_TYPE};
use dagcore::{DagError, Environment, Graph};
use std::sync::Arc;

/// Two inputs multiplied and printed: `input(2)`, `input(3)` feed a math
/// node whose result goes to an output node labelled "Custom Output: ".
pub fn build_demo_graph(env: &Arc<Environment>) -> Result<Graph, DagError> {
    let graph = Graph::new(env.clone());

    let a = graph.add_node("input")?;
    let b = graph.add_node("input")?;
    let math = graph.add_node("math")?;
    let output = graph.add_node("output")?;

    a.set("value", INT_TYPE, 2i32)?;
    b.set("value", INT_TYPE, 3i32)?;

    // Overwritten by the link below; only the connected value counts.
    math.set("second", INT_TYPE, 5i32)?;
    math.set("operation", INT_TYPE, Operation::Multiply.code())?;
    output.set("message", STRING_TYPE, "Custom Output: ".to_string())?;

    a.port_required("result")?.connect(&math.port_required("first")?)?;
    b.port_required("result")?.connect(&math.port_required("second")?)?;
    math.port_required("result")?
        .connect(&output.port_required("value")?)?;

    tracing::debug!(graph = %graph.id(), "Built demo graph with {} nodes", graph.len());
    Ok(graph)
}
