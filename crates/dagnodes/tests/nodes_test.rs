use dagcore::{ExecutionEvent, Graph, NodeEvent, PortVariant};
use dagnodes::{
    build_demo_graph, passthrough_graph, plugins, Operation, GRAPH_INVOKER, GRAPH_OBJECT_TYPE,
    INT_TYPE,
};
use dagruntime::Runtime;
use tokio::sync::broadcast;

fn runtime() -> Runtime {
    Runtime::new(plugins()).unwrap()
}

fn node_events(events: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<NodeEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeEvent { event, .. } = event {
            collected.push(event);
        }
    }
    collected
}

fn info_messages(events: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<String> {
    node_events(events)
        .into_iter()
        .filter_map(|event| match event {
            NodeEvent::Info { message } => Some(message),
            _ => None,
        })
        .collect()
}

fn only_node(graph: &Graph, type_name: &str) -> dagcore::Node {
    let nodes = graph.nodes_of_type(type_name);
    assert_eq!(nodes.len(), 1, "expected one {} node", type_name);
    nodes[0].clone()
}

#[test]
fn test_plugins_register_builtin_types() {
    let runtime = runtime();
    assert_eq!(runtime.plugin_ids(), vec!["core", "graph"]);
    assert_eq!(
        runtime.list_node_types(),
        vec!["graph_invoker", "input", "input_bridge", "math", "output", "output_bridge"]
    );
    for name in ["int", "float", "double", "bool", "string", "bytes", "json", "graph_object"] {
        assert!(runtime.registry().data_type(name).is_ok(), "{} missing", name);
    }
}

#[test]
fn test_demo_graph_prints_product() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let graph = build_demo_graph(runtime.environment()).unwrap();

    runtime.execute(&graph).unwrap();

    assert_eq!(info_messages(&mut events), vec!["Custom Output: 6"]);
    let math = only_node(&graph, "math");
    assert_eq!(math.get_as::<i32>("result").unwrap(), Some(6));
}

#[test]
fn test_reference_consumers_use_every_access() {
    let runtime = runtime();
    let graph = build_demo_graph(runtime.environment()).unwrap();

    runtime.execute(&graph).unwrap();

    for node in graph.nodes() {
        for port in node.ports() {
            if port.variant() == PortVariant::Output {
                assert_eq!(port.pending_accesses(), 0, "{}.{}", node.type_name(), port.name());
            }
        }
    }
}

#[test]
fn test_write_to_linked_input_is_shadowed() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let graph = build_demo_graph(runtime.environment()).unwrap();

    let math = only_node(&graph, "math");
    math.set("first", INT_TYPE, 100i32).unwrap();

    runtime.execute(&graph).unwrap();
    assert_eq!(info_messages(&mut events), vec!["Custom Output: 6"]);
}

#[test]
fn test_restored_graph_behaves_the_same() {
    let runtime = runtime();
    let graph = build_demo_graph(runtime.environment()).unwrap();

    let bytes = graph.serialize().unwrap();
    let restored = runtime.deserialize_graph(&bytes).unwrap();
    assert!(graph.same_structure(&restored));
    assert_eq!(restored.len(), 4);

    let mut events = runtime.subscribe_events();
    runtime.execute(&restored).unwrap();
    assert_eq!(info_messages(&mut events), vec!["Custom Output: 6"]);

    // Serializing the restored graph yields the same structure again.
    let again = runtime
        .deserialize_graph(&restored.serialize().unwrap())
        .unwrap();
    assert!(restored.same_structure(&again));
}

#[test]
fn test_division_by_zero_fails_the_node_only() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let graph = runtime.create_graph();

    let math = graph.add_node("math").unwrap();
    math.set("second", INT_TYPE, 0i32).unwrap();
    math.set("operation", INT_TYPE, 3i32).unwrap();

    runtime.execute(&graph).unwrap();
    assert!(!graph.is_locked());
    // Failure happens inside a subtask, so the node itself still completes.
    assert_eq!(math.get_as::<i32>("result").unwrap(), None);

    let completed = std::iter::from_fn(|| events.try_recv().ok())
        .any(|event| matches!(event, ExecutionEvent::GraphCompleted { .. }));
    assert!(completed);
}

#[test]
fn test_failed_math_leaves_downstream_empty() {
    let runtime = runtime();
    let graph = runtime.create_graph();

    let upstream = graph.add_node("math").unwrap();
    upstream.set("first", INT_TYPE, 6i32).unwrap();
    upstream.set("second", INT_TYPE, 2i32).unwrap();
    upstream
        .set("operation", INT_TYPE, Operation::Multiply.code())
        .unwrap();

    let downstream = graph.add_node("math").unwrap();
    upstream
        .port_required("result")
        .unwrap()
        .connect(&downstream.port_required("first").unwrap())
        .unwrap();

    runtime.execute(&graph).unwrap();
    assert_eq!(upstream.get_as::<i32>("result").unwrap(), Some(12));
    assert_eq!(downstream.get_as::<i32>("result").unwrap(), Some(14));

    // 6 / 0 fails upstream, downstream then has nothing to read.
    upstream.set("second", INT_TYPE, 0i32).unwrap();
    upstream
        .set("operation", INT_TYPE, Operation::Divide.code())
        .unwrap();

    runtime.execute(&graph).unwrap();
    assert_eq!(upstream.get_as::<i32>("result").unwrap(), None);
    assert_eq!(downstream.get_as::<i32>("result").unwrap(), None);
}

#[test]
fn test_shadowed_write_survives_round_trip() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let graph = build_demo_graph(runtime.environment()).unwrap();

    runtime.execute(&graph).unwrap();
    assert_eq!(info_messages(&mut events), vec!["Custom Output: 6"]);

    let math = only_node(&graph, "math");
    math.set("first", INT_TYPE, 100i32).unwrap();
    let warnings: Vec<String> = node_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            NodeEvent::Warning { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("'first'"), "{}", warnings[0]);

    let restored = runtime.deserialize_graph(&graph.serialize().unwrap()).unwrap();
    assert!(graph.same_structure(&restored));

    runtime.execute(&restored).unwrap();
    assert_eq!(info_messages(&mut events), vec!["Custom Output: 6"]);
    let restored_math = only_node(&restored, "math");
    assert_eq!(restored_math.get_as::<i32>("result").unwrap(), Some(6));
}

#[test]
fn test_node_events_report_data_and_progress() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();

    let demo = build_demo_graph(runtime.environment()).unwrap();
    runtime.execute(&demo).unwrap();
    let demo_events = node_events(&mut events);
    assert!(demo_events.iter().any(|event| matches!(
        event,
        NodeEvent::Data { port, type_name } if port == "result" && type_name == INT_TYPE
    )));

    let (outer, _) = invoker_graph(&runtime);
    runtime.execute(&outer).unwrap();
    let invoker_events = node_events(&mut events);

    let data_ports: Vec<&str> = invoker_events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::Data { port, .. } => Some(port.as_str()),
            _ => None,
        })
        .collect();
    assert!(data_ports.contains(&"value"), "{:?}", data_ports);
    assert!(data_ports.contains(&"_bridge"), "{:?}", data_ports);

    let progress: Vec<f64> = invoker_events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.0, 100.0]);
}

fn invoker_graph(runtime: &Runtime) -> (Graph, Graph) {
    let env = runtime.environment();
    let inner = passthrough_graph(env, "bridged_input", "bridged_output").unwrap();

    let outer = runtime.create_graph();
    let source = outer.add_node("input").unwrap();
    source.set("value", INT_TYPE, 42i32).unwrap();

    let invoker = outer.add_node(GRAPH_INVOKER).unwrap();
    invoker
        .set("graph", GRAPH_OBJECT_TYPE, inner.clone())
        .unwrap();

    source
        .port_required("result")
        .unwrap()
        .connect(&invoker.port_required("bridged_input").unwrap())
        .unwrap();

    (outer, inner)
}

#[test]
fn test_invoker_declares_bridge_ports() {
    let runtime = runtime();
    let (outer, inner) = invoker_graph(&runtime);
    let invoker = only_node(&outer, GRAPH_INVOKER);

    let input = invoker.port("bridged_input").unwrap();
    let output = invoker.port("bridged_output").unwrap();
    assert_eq!(input.variant(), PortVariant::Input);
    assert_eq!(output.variant(), PortVariant::Output);
    assert!(inner.owner().unwrap().ptr_eq(&invoker));

    // Without a graph the invoker only has its parameter.
    let bare = outer.add_node(GRAPH_INVOKER).unwrap();
    assert_eq!(bare.ports().len(), 1);
    assert!(bare.task_fn().is_none());
}

#[test]
fn test_invoker_runs_embedded_graph() {
    let runtime = runtime();
    let (outer, inner) = invoker_graph(&runtime);
    let invoker = only_node(&outer, GRAPH_INVOKER);

    for _ in 0..3 {
        runtime.execute(&outer).unwrap();
        assert_eq!(invoker.get_as::<i32>("bridged_output").unwrap(), Some(42));
        assert!(!outer.is_locked());
        assert!(!inner.is_locked());
    }
}

#[test]
fn test_nested_graph_round_trip() {
    let runtime = runtime();
    let (outer, _) = invoker_graph(&runtime);

    let restored = runtime.deserialize_graph(&outer.serialize().unwrap()).unwrap();
    assert!(outer.same_structure(&restored));

    let invoker = only_node(&restored, GRAPH_INVOKER);
    assert!(invoker.port("bridged_input").unwrap().link().is_some());

    runtime.execute(&restored).unwrap();
    assert_eq!(invoker.get_as::<i32>("bridged_output").unwrap(), Some(42));
}
