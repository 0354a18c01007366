use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::error::WorkerError;

type Handler<T> = dyn Fn(usize, T) + Send + Sync + 'static;

/// Fixed set of named threads draining a FIFO queue.
///
/// Each worker runs one item at a time to completion. A panicking handler is
/// logged and the worker moves on to the next item.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    sender: Sender<T>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: &str, worker_count: usize, handler: F) -> Result<Self, WorkerError>
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(format!(
                "{} pool needs at least one worker",
                name
            )));
        }

        let (sender, receiver) = unbounded::<T>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handler: Arc<Handler<T>> = Arc::new(handler);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);
            let pool_name = name.to_string();

            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, worker_id))
                .spawn(move || run_worker(&pool_name, worker_id, rx, shutdown_flag, worker_handler))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} {} workers", worker_count, name);

        Ok(Self {
            name: name.to_string(),
            sender,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, item: T) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(WorkerError::ChannelClosed);
        }

        self.sender.send(item).map_err(|_| WorkerError::ChannelClosed)
    }

    /// Stops accepting work. Workers exit once their current item is done;
    /// anything still queued is left unprocessed.
    pub fn shutdown(&self) {
        info!("Shutting down {} worker pool...", self.name);
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn wait(self) {
        drop(self.sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("{} worker {} panicked: {:?}", self.name, i, e);
            } else {
                debug!("{} worker {} finished", self.name, i);
            }
        }

        info!("All {} workers have stopped", self.name);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn run_worker<T>(
    name: &str,
    worker_id: usize,
    receiver: Receiver<T>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<Handler<T>>,
) {
    debug!("{} worker {} started", name, worker_id);

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("{} worker {} received shutdown signal", name, worker_id);
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(worker_id, item)));
                if let Err(payload) = outcome {
                    let message = payload
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| payload.downcast_ref::<&str>().copied())
                        .unwrap_or("unknown panic");
                    error!("{} worker {} handler panicked: {}", name, worker_id, message);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("{} worker {} channel disconnected", name, worker_id);
                break;
            }
        }
    }

    debug!("{} worker {} stopped", name, worker_id);
}
