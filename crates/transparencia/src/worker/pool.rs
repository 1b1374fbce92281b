use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::db::{import_repo, Database};
use crate::error::{TransparenciaError, WorkerError};
use crate::ingest::IngestionOrchestrator;
use crate::model::ImportStatus;
use crate::worker::job::{ImportTask, ImportTaskResult};

/// Fixed set of threads processing queued import jobs. Each task is owned by
/// the one worker that receives it.
pub struct ImportWorkerPool {
    task_sender: Sender<ImportTask>,
    result_receiver: Receiver<ImportTaskResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ImportWorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(orchestrator: IngestionOrchestrator, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (task_sender, task_receiver) = bounded::<ImportTask>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<ImportTaskResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_orchestrator = orchestrator.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    task_rx,
                    result_tx,
                    shutdown_flag,
                    worker_orchestrator,
                );
            });

            workers.push(handle);
        }

        info!("Started {} import workers", worker_count);

        Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, task: ImportTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.task_sender
            .send(task)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<ImportTaskResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<ImportTaskResult> {
        self.result_receiver.recv().ok()
    }

    /// Submits every task and collects one result per task.
    ///
    /// Submission and collection are interleaved so the bounded channels
    /// never fill up with unread results.
    pub fn run_all(&self, tasks: Vec<ImportTask>) -> Result<Vec<ImportTaskResult>, WorkerError> {
        let expected = tasks.len();
        let mut results = Vec::with_capacity(expected);

        for task in tasks {
            while let Some(result) = self.try_recv_result() {
                results.push(result);
            }
            let mut pending = task;
            loop {
                match self.task_sender.try_send(pending) {
                    Ok(()) => break,
                    Err(crossbeam_channel::TrySendError::Full(task)) => {
                        pending = task;
                        let result = self.recv_result().ok_or(WorkerError::ChannelClosed)?;
                        results.push(result);
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        return Err(WorkerError::ChannelClosed);
                    }
                }
            }
        }

        while results.len() < expected {
            let result = self.recv_result().ok_or(WorkerError::ChannelClosed)?;
            results.push(result);
        }
        Ok(results)
    }

    pub fn shutdown(&self) {
        info!("Shutting down import worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All import workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Fails every listed import that never reached a terminal state, for when
/// the pool stops before reporting on them. Returns how many were marked.
pub fn fail_unfinished(
    db: &Database,
    import_ids: &[String],
    reason: &str,
) -> Result<usize, TransparenciaError> {
    let mut marked = 0;
    for id in import_ids {
        let Some(mut job) = import_repo::find_by_id(db, id)? else {
            continue;
        };
        if job.status == ImportStatus::Pending {
            job.mark_started()?;
        }
        if job.status != ImportStatus::Processing {
            continue;
        }
        job.mark_failed(reason)?;
        import_repo::update(db, &job)?;
        marked += 1;
    }
    if marked > 0 {
        info!("Marked {} unfinished imports as failed", marked);
    }
    Ok(marked)
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<ImportTask>,
    result_sender: Sender<ImportTaskResult>,
    shutdown: Arc<AtomicBool>,
    orchestrator: IngestionOrchestrator,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(task) => {
                debug!("Worker {} processing import {}", worker_id, task.import_id);
                let result = process_task(&orchestrator, &task);

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn process_task(orchestrator: &IngestionOrchestrator, task: &ImportTask) -> ImportTaskResult {
    let mut job = match import_repo::find_by_id(orchestrator.db(), &task.import_id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return ImportTaskResult::failure(task, format!("Import '{}' not found", task.import_id))
        }
        Err(e) => return ImportTaskResult::failure(task, e.to_string()),
    };

    let error = orchestrator
        .process_file(&mut job, task.fallback_directorate.as_deref())
        .err()
        .map(|e| e.to_string());
    ImportTaskResult::from_job(&job, error)
}
