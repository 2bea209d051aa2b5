use dagcore::{
    DagError, ErrorKind, ExecutionEvent, InputBehavior, NodeError, Registry, SerdeType, Task,
};
use dagruntime::{Executor, Plugin, Runtime, RuntimeConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// Registers "step": appends its label to a shared log, forwarding the
/// label downstream.
struct StepPlugin {
    log: Log,
}

impl Plugin for StepPlugin {
    fn id(&self) -> &str {
        "steps"
    }

    fn init(&self, registry: &mut Registry) -> Result<(), DagError> {
        registry.register_type(SerdeType::<String>::new("string"))?;

        let log = self.log.clone();
        registry.register_node("step", move |decl| {
            let label = decl.value("string", String::new())?;
            decl.parameter("label", Some(label))?;
            decl.input("prev", InputBehavior::Reference, None)?;
            decl.output("next")?;

            let log = log.clone();
            decl.task(move |_, node| {
                let label = node.get_as::<String>("label")?.unwrap_or_default();
                let prev = node.get_as::<String>("prev")?;
                if let Some(prev) = prev {
                    // Upstream must already have produced its label.
                    if !log.lock().contains(&prev) {
                        return Err(NodeError::ExecutionFailed(format!(
                            "{} ran before {}",
                            label, prev
                        )));
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
                log.lock().push(label.clone());
                node.set("next", "string", label)?;
                Ok(())
            });
            Ok(())
        })?;
        Ok(())
    }
}

fn runtime_with_workers(workers: usize) -> (Runtime, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(StepPlugin { log: log.clone() })];
    let runtime = Runtime::with_executor(
        plugins,
        RuntimeConfig::default(),
        Executor::with_workers(workers).unwrap(),
    )
    .unwrap();
    (runtime, log)
}

#[test]
fn test_chain_runs_in_order_for_any_pool_size() {
    for workers in [1, 2, 4, 8] {
        let (runtime, log) = runtime_with_workers(workers);
        let graph = runtime.create_graph();

        let labels = ["a", "b", "c"];
        let nodes: Vec<_> = labels
            .iter()
            .map(|label| {
                let node = graph.add_node("step").unwrap();
                node.set("label", "string", label.to_string()).unwrap();
                node
            })
            .collect();

        nodes[2]
            .port("prev")
            .unwrap()
            .connect(&nodes[1].port("next").unwrap())
            .unwrap();
        nodes[1]
            .port("prev")
            .unwrap()
            .connect(&nodes[0].port("next").unwrap())
            .unwrap();

        for _ in 0..5 {
            log.lock().clear();
            runtime.execute(&graph).unwrap();
            assert_eq!(*log.lock(), labels, "pool of {} workers", workers);
            assert!(!graph.is_locked());
        }
    }
}

#[test]
fn test_independent_nodes_all_run() {
    let (runtime, log) = runtime_with_workers(4);
    let graph = runtime.create_graph();
    for i in 0..16 {
        let node = graph.add_node("step").unwrap();
        node.set("label", "string", format!("n{}", i)).unwrap();
    }

    runtime.execute(&graph).unwrap();

    let mut seen = log.lock().clone();
    seen.sort();
    let mut expected: Vec<String> = (0..16).map(|i| format!("n{}", i)).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

fn recorder(log: &Log, name: &str) -> Task {
    let log = log.clone();
    let label = name.to_string();
    Task::new(name, move |_| {
        std::thread::sleep(Duration::from_millis(2));
        log.lock().push(label);
        Ok(())
    })
}

#[test]
fn test_nested_subgraph_completes_after_last_child() {
    let (runtime, _) = runtime_with_workers(2);
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let inner = log.clone();
    let parent = Task::new("parent", move |task| {
        let r1 = recorder(&inner, "r1");
        let r2 = recorder(&inner, "r2");
        let r3 = recorder(&inner, "r3");
        r2.depend_on(&r1);
        r3.depend_on(&r2);
        task.add_subgraph(&[r1, r2, r3]);
        Ok(())
    });

    // Wrap the parent so its completion is counted by an outer task.
    let outer = Task::new("outer", |_| Ok(()));
    outer.add_subgraph(&[parent.clone()]);

    runtime.execute_task(&outer);

    assert_eq!(*log.lock(), vec!["r1", "r2", "r3"]);
    assert!(parent.is_complete());
    assert_eq!(parent.pending_subtasks(), 0);
    // self + parent + sink, each counted exactly once
    assert_eq!(outer.num_subtasks(), 2);
    assert_eq!(outer.pending_subtasks(), 0);
}

#[test]
fn test_failing_node_does_not_stop_execution() {
    let (runtime, log) = runtime_with_workers(2);
    let mut events = runtime.subscribe_events();
    let graph = runtime.create_graph();

    let first = graph.add_node("step").unwrap();
    let second = graph.add_node("step").unwrap();
    first.set("label", "string", "first".to_string()).unwrap();
    second.set("label", "string", "second".to_string()).unwrap();

    // "second" reads a label nobody logged, so its check fails.
    second.port("prev").unwrap().set("string", "ghost".to_string()).unwrap();

    runtime.execute(&graph).unwrap();
    assert_eq!(*log.lock(), vec!["first"]);

    let mut failed = 0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeFailed { node_id, .. } => {
                assert_eq!(node_id, second.id());
                failed += 1;
            }
            ExecutionEvent::GraphCompleted { graph_id, .. } => {
                assert_eq!(graph_id, graph.id());
                completed = true;
            }
            _ => {}
        }
    }
    assert_eq!(failed, 1);
    assert!(completed);
}

#[test]
fn test_events_share_execution_id() {
    let (runtime, _) = runtime_with_workers(2);
    let mut events = runtime.subscribe_events();
    let graph = runtime.create_graph();
    graph.add_node("step").unwrap();

    runtime.execute(&graph).unwrap();

    let execution_id = graph.execution_id();
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        let id = match &event {
            ExecutionEvent::GraphStarted { execution_id, .. }
            | ExecutionEvent::GraphCompleted { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeCompleted { execution_id, .. }
            | ExecutionEvent::NodeFailed { execution_id, .. }
            | ExecutionEvent::NodeEvent { execution_id, .. } => *execution_id,
        };
        assert_eq!(id, execution_id);
        kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
    }
    assert_eq!(
        kinds,
        vec!["GraphStarted", "NodeStarted", "NodeCompleted", "GraphCompleted"]
    );
}

#[test]
fn test_execute_rejects_locked_and_empty_graphs() {
    let (runtime, _) = runtime_with_workers(1);
    let graph = runtime.create_graph();
    assert_eq!(runtime.execute(&graph).unwrap_err().kind(), ErrorKind::Unknown);

    graph.add_node("step").unwrap();
    let root = graph.taskify().unwrap();
    assert_eq!(
        runtime.execute(&graph).unwrap_err().kind(),
        ErrorKind::ObjectLocked
    );

    runtime.execute_task(&root);
    assert!(!graph.is_locked());
    runtime.execute(&graph).unwrap();
}

#[tokio::test]
async fn test_execute_async() {
    let (runtime, log) = runtime_with_workers(2);
    let graph = runtime.create_graph();
    let node = graph.add_node("step").unwrap();
    node.set("label", "string", "async".to_string()).unwrap();

    runtime.execute_async(&graph).await.unwrap();

    assert_eq!(*log.lock(), vec!["async"]);
    assert!(!graph.is_locked());
}

#[test]
fn test_registry_listing() {
    let (runtime, _) = runtime_with_workers(1);
    assert_eq!(runtime.list_node_types(), vec!["step"]);
    assert_eq!(runtime.list_data_types(), vec!["string"]);
    assert_eq!(runtime.plugin_ids(), vec!["steps"]);
}
