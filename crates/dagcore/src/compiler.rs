use crate::events::{ExecutionEvent, ExecutionId};
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::task::Task;
use crate::{DagError, GraphError};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

impl Graph {
    /// Compile the graph into a task DAG.
    ///
    /// The graph stays locked until the returned root task and all node
    /// tasks below it have run.
    pub fn taskify(&self) -> Result<Task, DagError> {
        if self.is_locked() {
            return Err(GraphError::Locked.into());
        }

        let nodes = self.nodes();
        if nodes.is_empty() {
            return Err(GraphError::Empty.into());
        }
        if !self.try_lock() {
            return Err(GraphError::Locked.into());
        }

        let execution_id = Uuid::new_v4();
        self.set_execution_id(execution_id);

        for port in nodes.iter().flat_map(Node::ports) {
            port.reset_pass();
        }

        let tasks: Vec<Task> = nodes
            .iter()
            .map(|node| node_call(node.clone(), execution_id))
            .collect();

        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();

        for (consumer, node) in nodes.iter().enumerate() {
            for port in node.ports() {
                let Some(upstream) = port.link() else {
                    continue;
                };
                let producer = upstream
                    .node()
                    .and_then(|producer| index.get(&producer.id()).copied());

                match producer {
                    Some(producer) => tasks[consumer].depend_on(&tasks[producer]),
                    None => tracing::warn!(
                        node = %node.id(),
                        "Input '{}' is linked outside of the graph, skipping dependency",
                        port.name()
                    ),
                }
            }
        }

        let root = root_task(self.clone(), execution_id, nodes.len());
        root.add_subgraph(&tasks);

        tracing::debug!(graph = %self.id(), execution_id = %execution_id, "Compiled {} node tasks", tasks.len());
        Ok(root)
    }
}

fn root_task(graph: Graph, execution_id: ExecutionId, node_count: usize) -> Task {
    let started = Instant::now();
    let events = graph.environment().events().clone();
    let graph_id = graph.id();

    let start_events = events.clone();
    Task::with_dispose(
        format!("graph:{}", graph_id),
        move |_| {
            tracing::info!(graph = %graph_id, "Starting execution {}", execution_id);
            start_events.emit(ExecutionEvent::GraphStarted {
                execution_id,
                graph_id,
                node_count,
                timestamp: Utc::now(),
            });
            Ok(())
        },
        move || {
            graph.unlock();
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(graph = %graph_id, "Execution {} finished in {}ms", execution_id, duration_ms);
            events.emit(ExecutionEvent::GraphCompleted {
                execution_id,
                graph_id,
                duration_ms,
                timestamp: Utc::now(),
            });
        },
    )
}

/// Wrap a node's task function, reporting its outcome as events.
fn node_call(node: Node, execution_id: ExecutionId) -> Task {
    let name = format!("{}:{}", node.type_name(), node.id());
    Task::new(name, move |task| {
        let Some(function) = node.task_fn() else {
            tracing::debug!(node = %node.id(), "{} has no task", node.type_name());
            return Ok(());
        };

        let events = node.environment().events();
        events.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id: node.id(),
            node_type: node.type_name().to_string(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        match function(task, &node) {
            Ok(()) => {
                events.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id: node.id(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                events.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: node.id(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    })
}
