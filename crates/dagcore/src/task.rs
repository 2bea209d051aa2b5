use crate::NodeError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Notify;

type Work = Box<dyn FnOnce(&Task) -> Result<(), NodeError> + Send>;
type Dispose = Box<dyn FnOnce() + Send>;

/// Signalled once a task and its whole subgraph have finished.
struct Completion {
    done: Mutex<bool>,
    condvar: Condvar,
    notify: Notify,
}

impl Completion {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    fn complete(&self) {
        *self.done.lock() = true;
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.condvar.wait(&mut done);
        }
    }

    async fn wait_async(&self) {
        loop {
            // Register before checking so a completion in between is not lost.
            let notified = self.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

struct TaskInner {
    name: String,
    work: Mutex<Option<Work>>,
    dispose: Mutex<Option<Dispose>>,
    head: OnceLock<Task>,
    tail: Mutex<Weak<TaskInner>>,
    is_sink: bool,
    has_subgraph: AtomicBool,
    num_subtasks: AtomicU64,
    pending_subtasks: AtomicU64,
    dependants: Mutex<Vec<Task>>,
    // Set once `run` handed the dependants over.
    released: AtomicBool,
    pending_dependencies: AtomicU64,
    completion: Completion,
}

/// Unit of scheduled work.
///
/// A task becomes ready once every task it depends on has run. While
/// running it may expand into a subgraph of child tasks; it then counts as
/// complete only after all of its descendants and its synthesized sink have
/// finished.
#[derive(Clone)]
pub struct Task(Arc<TaskInner>);

impl Task {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&Task) -> Result<(), NodeError> + Send + 'static,
    {
        Self::build(name.into(), Some(Box::new(work)), None, false)
    }

    /// Task with a hook that runs once the task (and its subgraph) is done.
    pub fn with_dispose<F, D>(name: impl Into<String>, work: F, dispose: D) -> Self
    where
        F: FnOnce(&Task) -> Result<(), NodeError> + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        Self::build(name.into(), Some(Box::new(work)), Some(Box::new(dispose)), false)
    }

    fn build(name: String, work: Option<Work>, dispose: Option<Dispose>, is_sink: bool) -> Self {
        Self(Arc::new(TaskInner {
            name,
            work: Mutex::new(work),
            dispose: Mutex::new(dispose),
            head: OnceLock::new(),
            tail: Mutex::new(Weak::new()),
            is_sink,
            has_subgraph: AtomicBool::new(false),
            num_subtasks: AtomicU64::new(0),
            pending_subtasks: AtomicU64::new(1),
            dependants: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            pending_dependencies: AtomicU64::new(0),
            completion: Completion::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Task whose subgraph this task belongs to.
    pub fn head(&self) -> Option<Task> {
        self.0.head.get().cloned()
    }

    /// Sink of this task's subgraph while it is alive.
    pub fn tail(&self) -> Option<Task> {
        if !self.0.has_subgraph.load(Ordering::Acquire) {
            return None;
        }
        self.0.tail.lock().upgrade().map(Task)
    }

    pub fn has_subgraph(&self) -> bool {
        self.0.has_subgraph.load(Ordering::Acquire)
    }

    pub fn is_sink(&self) -> bool {
        self.0.is_sink
    }

    /// Number of tasks registered below this one, sink included.
    pub fn num_subtasks(&self) -> u64 {
        self.0.num_subtasks.load(Ordering::Acquire)
    }

    pub fn pending_subtasks(&self) -> u64 {
        self.0.pending_subtasks.load(Ordering::Acquire)
    }

    pub fn pending_dependencies(&self) -> u64 {
        self.0.pending_dependencies.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.0.completion.is_done()
    }

    /// Block until the task and its subgraph have completed.
    pub fn wait(&self) {
        self.0.completion.wait();
    }

    pub async fn wait_async(&self) {
        self.0.completion.wait_async().await;
    }

    /// Make this task wait for `dependency`, or for its whole subgraph if
    /// it already expanded into one.
    ///
    /// Dependencies must be added before `dependency` runs. A dependency that
    /// already released its dependants is ignored with a warning, so the
    /// task is not blocked on it.
    pub fn depend_on(&self, dependency: &Task) {
        match dependency.tail() {
            Some(sink) => self.depend_flat(&sink),
            None => self.depend_flat(dependency),
        }
    }

    fn depend_flat(&self, dependency: &Task) {
        let mut dependants = dependency.0.dependants.lock();
        if dependency.0.released.load(Ordering::Acquire) {
            tracing::warn!(
                task = %self.0.name,
                "Dependency {} already ran, not waiting for it",
                dependency.0.name
            );
            return;
        }
        self.0.pending_dependencies.fetch_add(1, Ordering::AcqRel);
        dependants.push(self.clone());
    }

    /// Register `children` as subgraph of this task.
    ///
    /// Dependencies among the children must already be set. Children
    /// without dependencies start after this task, children without
    /// dependants are awaited by the sink, and the sink inherits the
    /// original dependants of this task.
    pub fn add_subgraph(&self, children: &[Task]) {
        if children.is_empty() {
            return;
        }

        let sink = match self.tail() {
            Some(sink) => sink,
            None => {
                let sink = Self::build(format!("{}.sink", self.0.name), None, None, true);
                let _ = sink.0.head.set(self.clone());

                let inherited = std::mem::take(&mut *self.0.dependants.lock());
                *sink.0.dependants.lock() = inherited;
                *self.0.tail.lock() = Arc::downgrade(&sink.0);

                self.0.num_subtasks.fetch_add(1, Ordering::AcqRel);
                self.0.pending_subtasks.fetch_add(1, Ordering::AcqRel);
                self.0.has_subgraph.store(true, Ordering::Release);
                sink
            }
        };

        let count = children.len() as u64;
        self.0.num_subtasks.fetch_add(count, Ordering::AcqRel);
        self.0.pending_subtasks.fetch_add(count, Ordering::AcqRel);

        for child in children {
            if child.0.dependants.lock().is_empty() {
                sink.depend_flat(child);
            }
            if child.pending_dependencies() == 0 {
                child.depend_flat(self);
            }
            if child.0.head.set(self.clone()).is_err() {
                tracing::warn!("Task {} already belongs to a subgraph", child.0.name);
            }
        }
    }

    /// Execute the task on the current thread. Dependants that become
    /// ready are handed to `schedule`.
    pub fn run(&self, mut schedule: impl FnMut(Task)) {
        let work = self.0.work.lock().take();
        if let Some(work) = work {
            if let Err(e) = work(self) {
                tracing::error!(task = %self.0.name, "Task failed: {}", e);
            }
        }

        let dependants = {
            let mut dependants = self.0.dependants.lock();
            self.0.released.store(true, Ordering::Release);
            std::mem::take(&mut *dependants)
        };
        for dependant in dependants {
            if dependant.0.pending_dependencies.fetch_sub(1, Ordering::AcqRel) == 1 {
                schedule(dependant);
            }
        }

        // Tasks that expanded are disposed by their sink.
        if self.0.is_sink {
            if let Some(head) = self.0.head.get() {
                head.dispose();
            }
        } else if !self.has_subgraph() {
            self.dispose();
        }

        self.propagate();
    }

    fn dispose(&self) {
        let dispose = self.0.dispose.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    fn propagate(&self) {
        if self.0.pending_subtasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.completion.complete();
            if let Some(head) = self.0.head.get() {
                head.propagate();
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.0.name)
            .field("pending_dependencies", &self.pending_dependencies())
            .field("pending_subtasks", &self.pending_subtasks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // Run everything reachable from `root` on the current thread.
    fn drain(root: Task) {
        let mut queue = VecDeque::from([root]);
        while let Some(task) = queue.pop_front() {
            task.run(|ready| queue.push_back(ready));
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Task {
        let log = log.clone();
        let label = name.to_string();
        Task::new(name, move |_| {
            log.lock().push(label);
            Ok(())
        })
    }

    #[test]
    fn test_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        b.depend_on(&a);

        assert_eq!(b.pending_dependencies(), 1);
        drain(a.clone());

        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert!(a.is_complete());
        assert!(b.is_complete());
    }

    #[test]
    fn test_subgraph_counts_and_dispose() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let disposed = Arc::new(AtomicBool::new(false));

        let children = vec![recorder(&log, "c1"), recorder(&log, "c2")];
        children[1].depend_on(&children[0]);

        let flag = disposed.clone();
        let parent = Task::with_dispose("parent", |_| Ok(()), move || {
            flag.store(true, Ordering::SeqCst)
        });
        parent.add_subgraph(&children);

        // self + two children + sink
        assert_eq!(parent.pending_subtasks(), 4);
        assert_eq!(parent.num_subtasks(), 3);
        assert!(parent.tail().is_some_and(|sink| sink.is_sink()));

        drain(parent.clone());

        assert_eq!(*log.lock(), vec!["c1", "c2"]);
        assert!(disposed.load(Ordering::SeqCst));
        assert!(parent.is_complete());
        assert_eq!(parent.pending_subtasks(), 0);
    }

    #[test]
    fn test_depend_on_expanded_task_waits_for_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = recorder(&log, "parent");
        parent.add_subgraph(&[recorder(&log, "child")]);

        let after = recorder(&log, "after");
        after.depend_on(&parent);

        drain(parent.clone());
        assert_eq!(*log.lock(), vec!["parent", "child", "after"]);
    }

    #[test]
    fn test_depend_on_finished_task_does_not_block() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let done = recorder(&log, "done");
        drain(done.clone());
        assert!(done.is_complete());

        let late = recorder(&log, "late");
        late.depend_on(&done);
        assert_eq!(late.pending_dependencies(), 0);

        drain(late.clone());
        assert_eq!(*log.lock(), vec!["done", "late"]);
        assert!(late.is_complete());
    }

    #[test]
    fn test_failed_work_still_completes() {
        let task = Task::new("failing", |_| {
            Err(NodeError::ExecutionFailed("boom".to_string()))
        });
        drain(task.clone());
        assert!(task.is_complete());
    }

    #[test]
    fn test_expand_while_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = log.clone();
        let parent = Task::new("parent", move |task| {
            let read = recorder(&inner, "read");
            let compute = recorder(&inner, "compute");
            let write = recorder(&inner, "write");
            compute.depend_on(&read);
            write.depend_on(&compute);
            task.add_subgraph(&[read, compute, write]);
            Ok(())
        });
        let next = recorder(&log, "next");
        next.depend_on(&parent);

        drain(parent.clone());

        assert_eq!(*log.lock(), vec!["read", "compute", "write", "next"]);
        assert!(parent.is_complete());
    }
}
