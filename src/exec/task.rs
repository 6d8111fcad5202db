use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// How a task's body is driven: blocking closures go through the bounded
/// worker pool, futures run directly on the dispatcher's runtime.
///
/// The kind is fixed at construction; the dispatcher never inspects the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Sync,
    Async,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Sync => write!(f, "sync"),
            TaskKind::Async => write!(f, "async"),
        }
    }
}

/// Error captured from a task's execution. Stored in the [`Output`] instead
/// of being propagated, so one failing task never takes the dispatcher down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task rejected: {0}")]
    Rejected(String),
}

impl TaskError {
    pub fn failed(err: impl fmt::Display) -> Self {
        TaskError::Failed(err.to_string())
    }
}

pub(crate) type SyncFn<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send + 'static>;
pub(crate) type AsyncFn<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send + 'static>>;

pub(crate) enum TaskBody<T> {
    Sync(SyncFn<T>),
    Async(AsyncFn<T>),
}

/// Cloneable identity of a task; survives into its [`Output`] after the
/// single-use body has been consumed.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub id: Uuid,
    pub desc: Option<String>,
    pub kind: TaskKind,
}

impl fmt::Display for TaskMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.desc {
            Some(desc) => write!(f, "<task: {desc}>"),
            None => {
                let id = self.id.simple().to_string();
                write!(f, "<task {}>", &id[..8])
            }
        }
    }
}

/// A unit of work for a [`Dispatcher`](crate::exec::Dispatcher). Immutable
/// once built and consumed exactly once.
pub struct Task<T> {
    meta: TaskMeta,
    body: TaskBody<T>,
}

impl<T: Send + 'static> Task<T> {
    /// A blocking task, executed on the dispatcher's bounded worker pool.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                id: Uuid::new_v4(),
                desc: None,
                kind: TaskKind::Sync,
            },
            body: TaskBody::Sync(Box::new(f)),
        }
    }

    /// An asynchronous task, awaited on the dispatcher's runtime directly.
    pub fn future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                id: Uuid::new_v4(),
                desc: None,
                kind: TaskKind::Async,
            },
            body: TaskBody::Async(Box::pin(fut)),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.meta.desc = Some(desc.into());
        self
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    pub fn kind(&self) -> TaskKind {
        self.meta.kind
    }

    pub(crate) fn into_parts(self) -> (TaskMeta, TaskBody<T>) {
        (self.meta, self.body)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.meta.id)
            .field("desc", &self.meta.desc)
            .field("kind", &self.meta.kind)
            .finish()
    }
}

/// Result of one executed task. Appended to the dispatcher history in
/// completion order; errors are carried in `returned`, never re-raised.
#[derive(Debug, Clone)]
pub struct Output<T> {
    pub task: TaskMeta,
    pub returned: Result<T, TaskError>,
    pub completed_at: DateTime<Utc>,
}

/// Item carried on a dispatcher's queue. `Shutdown` is the terminator: the
/// control loop exits without draining whatever is still queued behind it.
pub enum Submission<T> {
    Work(Task<T>),
    Batch(Vec<Task<T>>),
    Shutdown,
}

impl<T> From<Task<T>> for Submission<T> {
    fn from(task: Task<T>) -> Self {
        Submission::Work(task)
    }
}

impl<T> From<Vec<Task<T>>> for Submission<T> {
    fn from(tasks: Vec<Task<T>>) -> Self {
        Submission::Batch(tasks)
    }
}
