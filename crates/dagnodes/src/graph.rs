use crate::builtin::STRING_TYPE;
use dagcore::{
    CodecError, DagError, DataType, Datum, Environment, Graph, InputBehavior, Node, NodeError,
    Registry, Task,
};
use dagruntime::Plugin;
use std::any::{Any, TypeId};
use std::sync::Arc;

pub const GRAPH_OBJECT_TYPE: &str = "graph_object";
pub const INPUT_BRIDGE: &str = "input_bridge";
pub const OUTPUT_BRIDGE: &str = "output_bridge";
pub const GRAPH_INVOKER: &str = "graph_invoker";

/// Bridge nodes and a node that runs an embedded graph
pub struct GraphPlugin;

impl Plugin for GraphPlugin {
    fn id(&self) -> &str {
        "graph"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["core".to_string()]
    }

    fn init(&self, registry: &mut Registry) -> Result<(), DagError> {
        registry.register_type(GraphObjectType)?;

        registry.register_node(INPUT_BRIDGE, |decl| {
            let name = decl.value(STRING_TYPE, String::new())?;
            decl.parameter("name", Some(name))?;
            decl.output("value")?;
            decl.input("_bridge", InputBehavior::Clone, None)?;
            decl.task(|_, node| forward(node, "_bridge", "value"));
            Ok(())
        })?;

        registry.register_node(OUTPUT_BRIDGE, |decl| {
            let name = decl.value(STRING_TYPE, String::new())?;
            decl.parameter("name", Some(name))?;
            decl.input("value", InputBehavior::Clone, None)?;
            decl.output("_bridge")?;
            decl.task(|_, node| forward(node, "value", "_bridge"));
            Ok(())
        })?;

        registry.register_node(GRAPH_INVOKER, |decl| {
            decl.parameter("graph", None)?;

            let node = decl.node().clone();
            let Some(graph) = node.get_as::<Graph>("graph")? else {
                return Ok(());
            };

            for inner in graph.nodes() {
                let is_input = inner.type_name() == INPUT_BRIDGE;
                if !is_input && inner.type_name() != OUTPUT_BRIDGE {
                    continue;
                }

                let name = bridge_name(&inner)?;
                if name.is_empty() {
                    tracing::warn!(node = %inner.id(), "Bridge without a name is ignored");
                    continue;
                }

                if is_input {
                    decl.input(&name, InputBehavior::Clone, None)?;
                } else {
                    decl.output(&name)?;
                }
            }

            graph.set_owner(&node);
            decl.task(invoke);
            decl.context(InvokerContext { graph });
            Ok(())
        })?;

        Ok(())
    }
}

fn bridge_name(node: &Node) -> Result<String, DagError> {
    Ok(node.get_as::<String>("name")?.unwrap_or_default())
}

/// Copy one port of a bridge node to another.
fn forward(node: &Node, from: &str, to: &str) -> Result<(), NodeError> {
    let target = node.port_required(to)?;
    match node.get(from)? {
        Some(value) => {
            let type_name = value.type_name().to_string();
            target.set_value(value)?;
            node.events().data(to, &type_name);
        }
        None => target.clear()?,
    }
    Ok(())
}

struct InvokerContext {
    graph: Graph,
}

/// Runs the embedded graph between a read and a write step:
/// invoker inputs are copied into the input bridges, the graph executes,
/// then the output bridges are copied to the invoker outputs.
fn invoke(task: &Task, node: &Node) -> Result<(), NodeError> {
    let context = node
        .context_as::<InvokerContext>()
        .ok_or_else(|| NodeError::ExecutionFailed("graph invoker has no graph".to_string()))?;
    let graph = context.graph.clone();

    let graph_task = graph.taskify()?;

    let read = {
        let (node, graph) = (node.clone(), graph.clone());
        Task::new("invoker_read", move |_| {
            bridge_inputs(&node, &graph)?;
            node.events()
                .progress(0.0, Some("Inputs passed to embedded graph".to_string()));
            Ok(())
        })
    };
    let write = {
        let node = node.clone();
        Task::new("invoker_write", move |_| {
            bridge_outputs(&node, &graph)?;
            node.events()
                .progress(100.0, Some("Outputs read from embedded graph".to_string()));
            Ok(())
        })
    };

    graph_task.depend_on(&read);
    write.depend_on(&graph_task);
    task.add_subgraph(&[read, graph_task, write]);
    Ok(())
}

fn bridge_inputs(invoker: &Node, graph: &Graph) -> Result<(), NodeError> {
    for bridge in graph.nodes_of_type(INPUT_BRIDGE) {
        let name = bridge_name(&bridge)?;
        let Some(source) = invoker.port(&name) else {
            continue;
        };

        let target = bridge.port_required("_bridge")?;
        match source.get()? {
            Some(value) => target.set_value(value)?,
            None => target.clear()?,
        }
    }
    Ok(())
}

fn bridge_outputs(invoker: &Node, graph: &Graph) -> Result<(), NodeError> {
    for bridge in graph.nodes_of_type(OUTPUT_BRIDGE) {
        let name = bridge_name(&bridge)?;
        let Some(target) = invoker.port(&name) else {
            continue;
        };

        match bridge.port_required("_bridge")?.peek() {
            Some(value) => target.set_value(value)?,
            None => target.clear()?,
        }
    }
    Ok(())
}

/// Build the graph `input_bridge "input" -> output_bridge "output"`.
pub fn passthrough_graph(env: &Arc<Environment>, input: &str, output: &str) -> Result<Graph, DagError> {
    let graph = Graph::new(env.clone());
    let source = graph.add_node(INPUT_BRIDGE)?;
    let sink = graph.add_node(OUTPUT_BRIDGE)?;

    source.port_required("value")?.connect(&sink.port_required("value")?)?;
    source.set("name", STRING_TYPE, input.to_string())?;
    sink.set("name", STRING_TYPE, output.to_string())?;
    Ok(graph)
}

/// Embedded graphs, copied by serializing and rebuilding them
struct GraphObjectType;

impl GraphObjectType {
    fn graph<'a>(&self, value: &'a (dyn Any + Send + Sync)) -> Result<&'a Graph, CodecError> {
        value.downcast_ref::<Graph>().ok_or_else(|| CodecError::Value {
            type_name: GRAPH_OBJECT_TYPE.to_string(),
            message: "value is not a graph".to_string(),
        })
    }

    fn failed(e: DagError) -> CodecError {
        CodecError::Rebuild(e.to_string())
    }
}

impl DataType for GraphObjectType {
    fn name(&self) -> &str {
        GRAPH_OBJECT_TYPE
    }

    fn value_type_id(&self) -> TypeId {
        TypeId::of::<Graph>()
    }

    fn clone_value(&self, value: &(dyn Any + Send + Sync)) -> Result<Datum, CodecError> {
        let graph = self.graph(value)?;
        let bytes = graph.serialize().map_err(Self::failed)?;
        let copy = Graph::deserialize(graph.environment(), &bytes).map_err(Self::failed)?;
        Ok(Arc::new(copy))
    }

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError> {
        self.graph(value)?.serialize().map_err(Self::failed)
    }

    fn deserialize(&self, env: &Arc<Environment>, bytes: &[u8]) -> Result<Datum, CodecError> {
        let graph = Graph::deserialize(env, bytes).map_err(Self::failed)?;
        Ok(Arc::new(graph))
    }

    fn equals(&self, a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
        match (a.downcast_ref::<Graph>(), b.downcast_ref::<Graph>()) {
            (Some(a), Some(b)) => a.same_structure(b),
            _ => false,
        }
    }
}

