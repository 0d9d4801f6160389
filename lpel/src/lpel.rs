// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! The top-level lifecycle API: [`Lpel::init`], [`Lpel::spawn`], task creation,
//! [`Lpel::stop`], [`Lpel::cleanup`], and [`thread_assign`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::LpelConfig;
use crate::error::{LpelError, Result};
use crate::mailbox::{Mailbox, MailboxMessage, MailboxSender};
use crate::monitor::MonitorConfig;
use crate::task::{TaskBody, TaskHandle, TaskId, WorkerId};
use crate::worker::{self, WorkerHandle};

pub use crate::affinity::{can_set_exclusive, num_cores};

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// The runtime: a validated configuration, a worker pool, and the mailbox senders used to
/// assign tasks and request termination.
pub struct Lpel {
    config: Arc<LpelConfig>,
    monitor_config: Arc<MonitorConfig>,
    senders: Vec<MailboxSender>,
    pending: Option<Vec<Mailbox>>,
    workers: Vec<WorkerHandle>,
    origin: Instant,
}

impl std::fmt::Debug for Lpel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lpel")
            .field("config", &self.config)
            .field("num_workers", &self.senders.len())
            .field("spawned", &self.pending.is_none())
            .finish()
    }
}

impl Lpel {
    /// Validates `config` against the machine's available cores and builds (but does not
    /// yet start) the worker pool's mailboxes.
    ///
    /// # Errors
    ///
    /// Returns [`LpelError::InvalidConfig`] if `config` fails validation, or
    /// [`LpelError::ExclusiveDenied`] if `EXCLUSIVE` is requested without the OS capability
    /// to raise real-time scheduling — no threads are spawned in that case.
    pub fn init(config: LpelConfig) -> Result<Self> {
        Self::init_with_monitor(config, MonitorConfig::default())
    }

    /// As [`Lpel::init`], with an explicit monitor configuration (defaults to disabled).
    ///
    /// # Errors
    ///
    /// See [`Lpel::init`].
    pub fn init_with_monitor(config: LpelConfig, monitor_config: MonitorConfig) -> Result<Self> {
        config.validate(num_cores())?;
        let (senders, pending) = worker::build_mailboxes(config.num_workers);
        tracing::info!(num_workers = config.num_workers, "lpel initialized");
        Ok(Lpel {
            config: Arc::new(config),
            monitor_config: Arc::new(monitor_config),
            senders,
            pending: Some(pending),
            workers: Vec::new(),
            origin: Instant::now(),
        })
    }

    /// Starts one OS thread per worker.
    ///
    /// # Errors
    ///
    /// Returns [`LpelError::Fail`] if the pool was already spawned.
    pub fn spawn(&mut self) -> Result<()> {
        let mailboxes = self
            .pending
            .take()
            .ok_or_else(|| LpelError::Fail("lpel already spawned".into()))?;
        self.workers = worker::spawn_all(
            mailboxes,
            self.senders.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.monitor_config),
            self.origin,
        );
        tracing::info!(num_workers = self.workers.len(), "worker threads started");
        Ok(())
    }

    /// Creates a task bound to `worker` and places it on that worker's ready queue.
    /// `stack_size` of `0` uses [`crate::coroutine::DEFAULT_STACK_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`LpelError::InvalidConfig`] if `worker` does not name a worker in this pool.
    pub fn spawn_task<F>(&self, worker: WorkerId, stack_size: usize, body: F) -> Result<TaskId>
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
    {
        let sender = self.senders.get(worker.0).ok_or_else(|| LpelError::InvalidConfig {
            reason: format!("no such worker: {}", worker.0),
        })?;
        let id = next_task_id();
        let stack_size = if stack_size == 0 {
            crate::coroutine::DEFAULT_STACK_SIZE
        } else {
            stack_size
        };
        let body: TaskBody = Box::new(body);
        sender.send(MailboxMessage::Assign { id, stack_size, body });
        tracing::trace!(task_id = id.0, worker_id = worker.0, "task spawn requested");
        Ok(id)
    }

    /// Asks every worker to terminate once its ready queue and owned tasks drain. Does not
    /// block — call [`Lpel::cleanup`] to join.
    pub fn stop(&self) {
        tracing::info!("stop requested");
        for sender in &self.senders {
            sender.send(MailboxMessage::Terminate);
        }
    }

    /// Joins every worker thread, consuming the runtime.
    ///
    /// # Errors
    ///
    /// This implementation never fails once threads have been joined; the `Result` return
    /// leaves room for failure modes a given platform might surface from thread teardown.
    pub fn cleanup(mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.join();
        }
        tracing::info!("cleanup complete");
        Ok(())
    }

    /// Pins the *calling* thread (not a worker thread) to `core`, or to this pool's "others"
    /// CPU set if `core` is `None`. When the pool is configured `EXCLUSIVE`, also raises the
    /// calling thread to real-time FIFO scheduling.
    ///
    /// # Errors
    ///
    /// Returns [`LpelError::Assign`] if pinning fails, or [`LpelError::ExclusiveDenied`] if
    /// raising scheduling class fails while `EXCLUSIVE` is set.
    pub fn thread_assign(&self, core: Option<usize>) -> Result<()> {
        let core = match core {
            Some(core) => core,
            None => self.config.other_cpu_set().start,
        };
        crate::affinity::pin_thread(core)?;
        if self.config.is_exclusive() {
            crate::affinity::raise_to_realtime_fifo()?;
        }
        Ok(())
    }

    /// The validated configuration this runtime was initialized with.
    #[must_use]
    pub fn config(&self) -> &LpelConfig {
        &self.config
    }

    /// The ids of the workers in this pool, in creation order. Empty until [`Lpel::spawn`]
    /// has run.
    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.workers.iter().map(WorkerHandle::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn test_config() -> LpelConfig {
        LpelConfig::builder(2).proc_workers(1).build()
    }

    #[test]
    fn spawn_before_init_workers_runs_a_task_to_completion() {
        let mut lpel = Lpel::init(test_config()).unwrap();
        lpel.spawn().unwrap();

        let (tx, rx) = mpsc::channel();
        lpel.spawn_task(WorkerId(0), 0, move |_handle| {
            tx.send(()).unwrap();
        })
        .unwrap();

        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("task did not run");

        lpel.stop();
        lpel.cleanup().unwrap();
    }

    #[test]
    fn spawn_task_rejects_unknown_worker() {
        let mut lpel = Lpel::init(test_config()).unwrap();
        lpel.spawn().unwrap();
        let err = lpel.spawn_task(WorkerId(99), 0, |_| {}).unwrap_err();
        assert!(matches!(err, LpelError::InvalidConfig { .. }));
        lpel.stop();
        lpel.cleanup().unwrap();
    }

    #[test]
    fn double_spawn_fails() {
        let mut lpel = Lpel::init(test_config()).unwrap();
        lpel.spawn().unwrap();
        let err = lpel.spawn().unwrap_err();
        assert!(matches!(err, LpelError::Fail(_)));
        lpel.stop();
        lpel.cleanup().unwrap();
    }
}
