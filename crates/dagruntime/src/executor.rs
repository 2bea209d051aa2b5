use crate::RuntimeError;
use crossbeam_channel::{Receiver, Sender};
use dagcore::Task;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Number of worker threads a runtime starts.
pub const WORKER_THREADS: usize = 2;

struct Shared {
    // Taken on shutdown so the workers see the channel disconnect.
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    halt: AtomicBool,
}

impl Shared {
    fn enqueue(&self, task: Task) {
        match self.sender.read().as_ref() {
            Some(sender) => {
                if sender.send(task).is_err() {
                    tracing::warn!("Task queue disconnected, dropping task");
                }
            }
            None => tracing::warn!("Executor is shut down, dropping task '{}'", task.name()),
        }
    }
}

/// Fixed pool of worker threads draining one FIFO channel of ready tasks
pub struct Executor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Executor {
    pub fn new() -> Result<Self, RuntimeError> {
        Self::with_workers(WORKER_THREADS)
    }

    pub fn with_workers(count: usize) -> Result<Self, RuntimeError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            sender: RwLock::new(Some(sender)),
            receiver,
            halt: AtomicBool::new(false),
        });

        let mut executor = Self {
            shared,
            workers: Vec::new(),
        };

        for id in 0..count.max(1) {
            let shared = executor.shared.clone();
            // On failure the already started workers are joined by Drop.
            let handle = thread::Builder::new()
                .name(format!("dag-worker-{}", id))
                .spawn(move || worker_loop(id, shared))?;
            executor.workers.push(handle);
        }

        Ok(executor)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task whose dependencies are satisfied
    pub fn submit(&self, task: Task) {
        self.shared.enqueue(task);
    }

    /// Submit `task` and block until it and its subgraph completed
    pub fn execute(&self, task: &Task) {
        self.submit(task.clone());
        task.wait();
    }

    /// Stop the workers after their current task and join them.
    pub fn shutdown(&mut self) {
        self.shared.halt.store(true, Ordering::Release);
        drop(self.shared.sender.write().take());

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    tracing::debug!("Worker {} started", id);
    while let Ok(task) = shared.receiver.recv() {
        if shared.halt.load(Ordering::Acquire) {
            break;
        }
        task.run(|ready| shared.enqueue(ready));
    }
    tracing::debug!("Worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_submitted_tasks() {
        let executor = Executor::with_workers(3).unwrap();
        assert_eq!(executor.worker_count(), 3);

        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..10)
            .map(|i| {
                let counter = counter.clone();
                Task::new(format!("t{}", i), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for task in &tasks {
            executor.execute(task);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_zero_workers_still_runs() {
        let executor = Executor::with_workers(0).unwrap();
        assert_eq!(executor.worker_count(), 1);

        let task = Task::new("only", |_| Ok(()));
        executor.execute(&task);
        assert!(task.is_complete());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut executor = Executor::new().unwrap();
        executor.shutdown();
        executor.shutdown();
        assert_eq!(executor.worker_count(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_dropped() {
        let mut executor = Executor::with_workers(2).unwrap();
        executor.shutdown();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = Task::new("late", move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        executor.submit(task.clone());

        assert!(!ran.load(Ordering::SeqCst));
        assert!(!task.is_complete());
    }

    #[test]
    fn test_dependants_run_on_the_pool() {
        let executor = Executor::with_workers(2).unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let record = |name: &'static str| {
            let order = order.clone();
            Task::new(name, move |_| {
                order.lock().push(name);
                Ok(())
            })
        };
        let first = record("first");
        let second = record("second");
        second.depend_on(&first);

        executor.submit(first.clone());
        second.wait();
        assert!(first.is_complete());
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }
}
