//! Task supervision.
//!
//! [`supervise`] waits for a fixed set of tasks. [`TaskGroup`] handles sets
//! that grow while they are being waited on: every unit spawned through the
//! group (including units spawned by other units holding a clone of it) is
//! registered, and [`TaskGroup::wait_all`] keeps draining the registry until
//! it stays empty.
//!
//! Failures never propagate to the waiter. They end up in the [`Report`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::diag::{record, Level};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named, independently scheduled unit of work.
pub struct Task<T> {
    id: TaskId,
    name: String,
    handle: JoinHandle<Result<T, BoxError>>,
}

impl<T: Send + 'static> Task<T> {
    /// Schedules `future` on the runtime. It starts running right away.
    pub fn spawn<F, E>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        let handle = tokio::spawn(async move { future.await.map_err(Into::into) });
        Self {
            id,
            name: name.into(),
            handle,
        }
    }
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the unit; it will be reported as [`TaskFailure::Cancelled`].
    pub fn abort(&self) {
        self.handle.abort();
    }

    async fn join(self) -> TaskReport<T> {
        let outcome = match self.handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskFailure::Error(err)),
            Err(err) if err.is_panic() => Err(TaskFailure::Panicked(panic_message(err.into_panic()))),
            Err(_) => Err(TaskFailure::Cancelled),
        };
        TaskReport {
            id: self.id,
            name: self.name,
            outcome,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Why a unit did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    #[error("{0}")]
    Error(BoxError),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("cancelled")]
    Cancelled,
}

/// Outcome of one unit.
#[derive(Debug)]
pub struct TaskReport<T> {
    pub id: TaskId,
    pub name: String,
    pub outcome: Result<T, TaskFailure>,
}

impl<T> TaskReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcomes in collection order. Each unit appears once.
#[derive(Debug)]
pub struct Report<T> {
    entries: Vec<TaskReport<T>>,
}

impl<T> Default for Report<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Report<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TaskReport<T>] {
        &self.entries
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskReport<T>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn successes(&self) -> impl Iterator<Item = &TaskReport<T>> {
        self.entries.iter().filter(|entry| entry.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport<T>> {
        self.entries.iter().filter(|entry| !entry.is_success())
    }
}

impl<T> IntoIterator for Report<T> {
    type Item = TaskReport<T>;
    type IntoIter = std::vec::IntoIter<TaskReport<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Waits for every task in `tasks`; one failing does not affect the others.
pub async fn supervise<T>(tasks: Vec<Task<T>>, config: &SupervisorConfig) -> Report<T>
where
    T: fmt::Debug + Send + 'static,
{
    let mut report = Report::default();
    collect(tasks, config, &mut report).await;
    report
}

async fn collect<T: fmt::Debug>(tasks: Vec<Task<T>>, config: &SupervisorConfig, report: &mut Report<T>) {
    for entry in join_all(tasks.into_iter().map(Task::join)).await {
        if config.log_results {
            match &entry.outcome {
                Ok(value) => record!(
                    config.recorder,
                    Level::Info,
                    "task {} {} returns: {:?}",
                    entry.id,
                    entry.name,
                    value
                ),
                Err(failure) => record!(
                    config.recorder,
                    Level::Warn,
                    "task {} {} failed: {}",
                    entry.id,
                    entry.name,
                    failure
                ),
            }
        }
        report.entries.push(entry);
    }
}

/// Registry of units that may spawn further units.
///
/// Clones share the registry. The waiter is not a member, only what is
/// spawned or adopted through the group is.
pub struct TaskGroup<T> {
    pending: Arc<Mutex<Vec<Task<T>>>>,
}

impl<T> Clone for TaskGroup<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<T> Default for TaskGroup<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns and registers a unit.
    pub fn spawn<F, E>(&self, name: impl Into<String>, future: F) -> TaskId
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let task = Task::spawn(name, future);
        let id = task.id();
        self.adopt(task);
        id
    }

    /// Registers a unit spawned elsewhere.
    pub fn adopt(&self, task: Task<T>) {
        self.lock().push(task);
    }

    /// Units registered but not collected yet.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Waits for every registered unit and everything they register in turn.
    ///
    /// Returns after more than `config.idle_rounds` consecutive scans found
    /// nothing new, yielding to the scheduler between scans.
    pub async fn wait_all(&self, config: &SupervisorConfig) -> Report<T>
    where
        T: fmt::Debug,
    {
        let mut report = Report::default();
        let mut idle = 0;
        loop {
            let batch = mem::take(&mut *self.lock());
            if batch.is_empty() {
                idle += 1;
                if idle > config.idle_rounds {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }
            idle = 0;
            collect(batch, config, &mut report).await;
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup").finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
