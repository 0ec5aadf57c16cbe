//! Fixed-size worker pool draining the bounded intake queue.
//!
//! Parallel across jobs, sequential within a job: each worker owns exactly
//! one job at a time and runs its full stage sequence before taking the
//! next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};

use crate::pipeline::Pipeline;
use crate::registry::JobId;

#[derive(Debug)]
pub struct QueuedUpload {
    pub job_id: JobId,
    pub payload: Vec<u8>,
}

/// Error distinguishing back-pressure from shutdown.
#[derive(Debug)]
pub enum SubmitError {
    QueueFull(QueuedUpload),
    Closed,
}

pub struct WorkerPool {
    job_sender: Sender<QueuedUpload>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize, queue_depth: usize) -> Self {
        let (job_sender, job_receiver) = bounded::<QueuedUpload>(queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let pipeline = Arc::clone(&pipeline);

            let handle = thread::spawn(move || {
                run_worker(worker_id, job_rx, shutdown_flag, pipeline);
            });
            workers.push(handle);
        }

        info!("Started {worker_count} pipeline workers (queue depth {queue_depth})");

        Self {
            job_sender,
            workers,
            shutdown,
        }
    }

    /// Non-blocking enqueue. A full queue is the admission back-pressure
    /// signal; the upload is handed back so the caller can undo bookkeeping.
    pub fn submit(&self, upload: QueuedUpload) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(SubmitError::Closed);
        }
        match self.job_sender.try_send(upload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(upload)) => Err(SubmitError::QueueFull(upload)),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Dropping the sender lets idle workers observe disconnection.
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {i} panicked: {e:?}");
            } else {
                debug!("Worker {i} finished");
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueuedUpload>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {worker_id} started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {worker_id} received shutdown signal");
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(upload) => {
                debug!("Worker {worker_id} picked up job {}", upload.job_id);
                pipeline.run(upload.job_id, upload.payload);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {worker_id} job channel disconnected");
                break;
            }
        }
    }

    debug!("Worker {worker_id} stopped");
}
