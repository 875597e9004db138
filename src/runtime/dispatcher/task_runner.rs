use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{IndexerError, IndexerResult};

type Task = Box<dyn FnOnce() -> IndexerResult<()> + Send + 'static>;

#[derive(Debug)]
enum TaskStatus {
    Pending,
    Running,
    Cancelled,
    Completed(Result<(), Arc<IndexerError>>),
}

/// Completion handle returned to a task's submitter.
///
/// Failures are delivered here, not to the runner owner: the worker keeps
/// executing subsequent tasks unless aborted.
#[derive(Debug)]
pub struct TaskHandle {
    status: Mutex<TaskStatus>,
    status_cv: Condvar,
}

impl TaskHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(TaskStatus::Pending),
            status_cv: Condvar::new(),
        })
    }

    fn transition(&self, next: TaskStatus) {
        let mut status = self.status.lock();
        *status = next;
        self.status_cv.notify_all();
    }

    /// Blocks until the task finishes. Cancelled tasks resolve to `Ok` —
    /// cancellation is a silent drop, not a failure.
    pub fn wait(&self) -> IndexerResult<()> {
        let mut status = self.status.lock();
        loop {
            match &*status {
                TaskStatus::Completed(Ok(())) | TaskStatus::Cancelled => return Ok(()),
                TaskStatus::Completed(Err(err)) => return Err(err.duplicate()),
                TaskStatus::Pending | TaskStatus::Running => {
                    self.status_cv.wait(&mut status);
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            &*self.status.lock(),
            TaskStatus::Completed(_) | TaskStatus::Cancelled
        )
    }
}

struct Submission {
    task: Task,
    handle: Arc<TaskHandle>,
}

/// Executes submitted tasks strictly in submission order, one at a time.
///
/// The backlog is bounded; `free_space` is the scheduler's backpressure
/// signal and overrunning it is a programmer error. `abort` lets the current
/// task finish, cancels everything queued, and rejects later submissions.
/// `flush` only discards queued-not-started tasks.
pub struct OrderedTaskRunner {
    queue: Mutex<VecDeque<Submission>>,
    not_empty: Condvar,
    capacity: usize,
    aborted: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OrderedTaskRunner {
    pub fn new(capacity: usize) -> Arc<Self> {
        let runner = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            aborted: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let worker_runner = Arc::clone(&runner);
        let handle = std::thread::Builder::new()
            .name("chainsift-index".to_string())
            .spawn(move || worker_runner.run_worker())
            .expect("failed to spawn index worker");
        *runner.worker.lock() = Some(handle);

        runner
    }

    pub fn put(&self, task: Task) -> IndexerResult<Arc<TaskHandle>> {
        let mut handles = self.put_many(vec![task])?;
        Ok(handles.remove(0))
    }

    pub fn put_many(&self, tasks: Vec<Task>) -> IndexerResult<Vec<Arc<TaskHandle>>> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(IndexerError::RunnerAborted);
        }

        let mut queue = self.queue.lock();
        let free = self.capacity - queue.len();
        if tasks.len() > free {
            return Err(IndexerError::RunnerBacklogFull {
                requested: tasks.len(),
                free,
            });
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let handle = TaskHandle::new();
            queue.push_back(Submission {
                task,
                handle: Arc::clone(&handle),
            });
            handles.push(handle);
        }
        self.not_empty.notify_one();
        Ok(handles)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.queue.lock().len()
    }

    /// Discards every queued-not-started task. The running task completes.
    pub fn flush(&self) {
        let drained: Vec<Submission> = self.queue.lock().drain(..).collect();
        for submission in drained {
            submission.handle.transition(TaskStatus::Cancelled);
        }
    }

    /// Stops the runner: the current task proceeds to completion, queued
    /// tasks are cancelled, and later submissions are rejected.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.flush();
        self.not_empty.notify_all();
    }

    /// Aborts and joins the worker thread.
    pub fn join(&self) {
        self.abort();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn next_submission(&self) -> Option<Submission> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(submission) = queue.pop_front() {
                return Some(submission);
            }
            if self.aborted.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.wait(&mut queue);
        }
    }

    fn run_worker(&self) {
        while let Some(submission) = self.next_submission() {
            submission.handle.transition(TaskStatus::Running);
            let result = (submission.task)();
            match result {
                Ok(()) => submission.handle.transition(TaskStatus::Completed(Ok(()))),
                Err(err) => {
                    tracing::error!(%err, "Indexing task failed");
                    submission
                        .handle
                        .transition(TaskStatus::Completed(Err(Arc::new(err))));
                }
            }
        }
    }
}

impl Drop for OrderedTaskRunner {
    fn drop(&mut self) {
        self.abort();
    }
}
