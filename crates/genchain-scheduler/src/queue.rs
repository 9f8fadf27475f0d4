//! Single-flight task queue with backpressure.
//!
//! One queue runs at most one task at a time. A task tells the queue how its
//! attempt went through [`TaskOutcome`]:
//! - `Done`: the task is removed and the next one starts;
//! - `Retry`: the task stays at the head and is invoked again right away
//!   (the task is expected to have paused before asking for this);
//! - `Full`: the task stays at the head and the queue pauses until the next
//!   [`TaskQueue::enqueue`] call.
//!
//! A task that fails or panics is logged and treated as `Done`.

use futures::FutureExt;
use futures::future::BoxFuture;
use genchain_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Future returned by a queued task.
pub type TaskFuture = BoxFuture<'static, Result<TaskOutcome>>;

/// How a task attempt went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Retry,
    Full,
}

/// A deferred, re-invokable unit of work. Immutable once queued.
#[derive(Clone)]
pub struct QueuedTask {
    label: Arc<str>,
    call: Arc<dyn Fn() -> TaskFuture + Send + Sync>,
}

impl QueuedTask {
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
    {
        Self {
            label: label.into().into(),
            call: Arc::new(move || f().boxed()),
        }
    }

    /// A task that only logs `message`.
    pub fn notice(message: impl Into<String>) -> Self {
        let message: Arc<str> = message.into().into();
        Self::new(message.to_string(), move || {
            let message = message.clone();
            async move {
                info!("👉 {}", message);
                Ok(TaskOutcome::Done)
            }
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn invoke(&self) -> TaskFuture {
        (self.call)()
    }
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("label", &self.label)
            .finish()
    }
}

struct QueueState {
    tasks: VecDeque<QueuedTask>,
    running: bool,
    full: bool,
}

/// Serializes task attempts for one pipeline family.
pub struct TaskQueue {
    name: String,
    state: Mutex<QueueState>,
    idle: watch::Sender<bool>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                running: false,
                full: false,
            }),
            idle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a task and start draining. Clears a `Full` pause.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, task: QueuedTask) {
        debug!(queue = %self.name, task = %task.label(), "Enqueued task");

        let start = {
            let mut state = self.state.lock();
            state.tasks.push_back(task);
            state.full = false;
            if state.running {
                false
            } else {
                state.running = true;
                self.idle.send_replace(false);
                true
            }
        };

        if start {
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock();
                match state.tasks.front() {
                    Some(task) => task.clone(),
                    None => {
                        state.running = false;
                        self.idle.send_replace(true);
                        return;
                    }
                }
            };

            // Run on its own task so a panic cannot wedge the queue.
            let outcome = match tokio::spawn(task.invoke()).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Internal(format!("task panicked: {}", e))),
            };

            let mut state = self.state.lock();
            match outcome {
                Ok(TaskOutcome::Full) => {
                    info!(queue = %self.name, task = %task.label(), "Queue is full, pausing");
                    state.full = true;
                    state.running = false;
                    self.idle.send_replace(true);
                    return;
                }
                Ok(TaskOutcome::Retry) => {
                    debug!(queue = %self.name, task = %task.label(), "Retrying task");
                }
                Ok(TaskOutcome::Done) => {
                    state.tasks.pop_front();
                    state.full = false;
                }
                Err(e) => {
                    error!(queue = %self.name, task = %task.label(), error = %e, "Task failed");
                    state.tasks.pop_front();
                    state.full = false;
                }
            }
        }
    }

    /// Wait until no attempt is running: the queue is empty or paused.
    pub async fn settled(&self) {
        let mut idle = self.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().full
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}
