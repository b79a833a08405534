use std::io;
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context a listener runs on. Scheduling must not block the
/// caller on the job itself.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs the job on the dispatching thread before `execute` returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Hands jobs to a tokio runtime's blocking pool.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        drop(self.handle.spawn_blocking(job));
    }
}

/// A dedicated worker thread running jobs one at a time in submission order.
/// The worker exits once the queue is dropped and drained.
#[derive(Debug)]
pub struct SerialQueue {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                job();
            }
        })?;
        Ok(Self { name, tx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            log::warn!("serial queue {} stopped; dropping job", self.name);
        }
    }
}
