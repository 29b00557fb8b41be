//! Background jobs with generation-tagged results.
//!
//! Submitting a job to a [`TaskQueue`] cancels the job it replaces and bumps
//! the queue's generation. Results travel over a bounded channel and only
//! the newest generation's result is handed out; anything older is dropped.

use kicadhub::CancelToken;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A job's result and the generation that produced it.
#[derive(Debug)]
pub struct Tagged<T> {
    pub generation: u64,
    pub result: kicadhub::Result<T>,
}

pub struct TaskHandle {
    pub generation: u64,
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to finish, whether or not its result is kept.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            debug!("Job {} ended abnormally: {}", self.generation, e);
        }
    }
}

pub struct TaskQueue<T> {
    name: &'static str,
    generation: u64,
    cancel: Option<CancelToken>,
    tx: mpsc::Sender<Tagged<T>>,
    rx: mpsc::Receiver<Tagged<T>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    pub const CAPACITY: usize = 8;

    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::channel(Self::CAPACITY);
        Self {
            name,
            generation: 0,
            cancel: None,
            tx,
            rx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run `job` on the blocking pool, superseding the previous job.
    pub fn submit<F>(&mut self, job: F) -> TaskHandle
    where
        F: FnOnce(&CancelToken) -> kicadhub::Result<T> + Send + 'static,
    {
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());

        let tx = self.tx.clone();
        let token = cancel.clone();
        let name = self.name;
        let join = tokio::task::spawn_blocking(move || {
            let result = job(&token);
            if tx.blocking_send(Tagged { generation, result }).is_err() {
                debug!("{} queue closed before generation {} finished", name, generation);
            }
        });
        debug!("Submitted {} job, generation {}", self.name, generation);

        TaskHandle {
            generation,
            cancel,
            join,
        }
    }

    /// Cancel the running job, if any. Its result will be dropped.
    pub fn cancel(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
            self.generation += 1;
        }
    }

    /// The next result of the current generation.
    pub async fn next(&mut self) -> Option<Tagged<T>> {
        while let Some(tagged) = self.rx.recv().await {
            if tagged.generation == self.generation {
                self.cancel = None;
                return Some(tagged);
            }
            debug!(
                "Dropping superseded {} result (generation {}, current {})",
                self.name, tagged.generation, self.generation
            );
        }
        None
    }
}
