// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! One worker per OS thread, each owning a disjoint set of tasks and a local ready queue,
//! communicating with its peers only through mailboxes.
//!
//! # Safety model
//!
//! [`WorkerShared::tasks`] and [`WorkerShared::ready`] are `UnsafeCell`s accessed only from
//! the worker's own thread: directly, in the dispatch loop below, and indirectly, through
//! the `CURRENT_WORKER` thread-local, from [`deliver_wakeup`] when it is called by a task
//! body running on this same thread (waking one of this worker's own tasks) or by the
//! mailbox handler processing a `WakeReady` message sent from a peer. Both access paths are
//! confined to this single thread and never nested around a live borrow — each access opens
//! a raw pointer, uses it, and drops it before the next potentially-reentrant call (notably,
//! before `coroutine.resume()`), so no two accesses to the same cell are ever alive at once.

use std::cell::{Cell, UnsafeCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::LpelConfig;
use crate::mailbox::{Mailbox, MailboxMessage, MailboxSender};
use crate::monitor::{Monitor, MonitorConfig};
use crate::stream::StreamId;
use crate::task::{Task, TaskHandle, TaskId, TaskRef, TaskState, WorkerId};
use crate::taskqueue::TaskQueue;

thread_local! {
    /// The worker whose dispatch loop is running on this thread, set for the loop's entire
    /// lifetime. Lets [`deliver_wakeup`] reach this worker's own state when called from deep
    /// inside a task body, without threading a reference through every call in
    /// [`crate::stream`].
    static CURRENT_WORKER: Cell<Option<NonNull<WorkerShared>>> = const { Cell::new(None) };
}

/// State owned by one worker thread for its entire life. Never moved once the dispatch loop
/// starts: `CURRENT_WORKER` holds a pointer to it for exactly that long.
struct WorkerShared {
    id: WorkerId,
    tasks: UnsafeCell<HashMap<TaskId, Box<Task>>>,
    ready: UnsafeCell<TaskQueue>,
    /// One sender per worker, indexed by `WorkerId`, including this worker's own — used to
    /// deliver a wakeup to a task this worker does not own.
    mailboxes: Vec<MailboxSender>,
}

/// A started worker: its thread and the handle needed to stop/join it. Held by
/// [`crate::lpel::Lpel`].
pub(crate) struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Builds one mailbox per worker `0..num_workers`, returning the senders (kept by the
/// caller to assign tasks and deliver cross-worker wakeups) and the receivers (moved one
/// each into a worker thread).
pub(crate) fn build_mailboxes(num_workers: usize) -> (Vec<MailboxSender>, Vec<Mailbox>) {
    (0..num_workers).map(|i| Mailbox::channel(WorkerId(i))).unzip()
}

/// Starts one OS thread per entry in `mailboxes`, each running [`dispatch_loop`].
pub(crate) fn spawn_all(
    mailboxes: Vec<Mailbox>,
    senders: Vec<MailboxSender>,
    config: Arc<LpelConfig>,
    monitor_config: Arc<MonitorConfig>,
    origin: Instant,
) -> Vec<WorkerHandle> {
    mailboxes
        .into_iter()
        .map(|mailbox| {
            let id = mailbox.owner();
            let senders = senders.clone();
            let config = Arc::clone(&config);
            let monitor_config = Arc::clone(&monitor_config);
            let thread = thread::Builder::new()
                .name(format!("lpel-worker-{}", id.0))
                .spawn(move || dispatch_loop(id, mailbox, senders, &config, &monitor_config, origin))
                .expect("failed to spawn worker thread");
            WorkerHandle {
                id,
                thread: Some(thread),
            }
        })
        .collect()
}

fn dispatch_loop(
    id: WorkerId,
    mailbox: Mailbox,
    mailboxes: Vec<MailboxSender>,
    config: &LpelConfig,
    monitor_config: &MonitorConfig,
    origin: Instant,
) {
    let span = tracing::info_span!("worker_loop", worker_id = id.0);
    let _enter = span.enter();

    if config.is_pinned() {
        if let Err(err) = crate::affinity::pin_thread(id.0) {
            tracing::warn!(worker_id = id.0, %err, "failed to pin worker thread to its core");
        }
        if config.is_exclusive() {
            if let Err(err) = crate::affinity::raise_to_realtime_fifo() {
                tracing::warn!(worker_id = id.0, %err, "failed to raise worker thread to real-time scheduling");
            }
        }
    }

    let shared = WorkerShared {
        id,
        tasks: UnsafeCell::new(HashMap::new()),
        ready: UnsafeCell::new(TaskQueue::new()),
        mailboxes,
    };
    CURRENT_WORKER.with(|cell| cell.set(Some(NonNull::from(&shared))));

    let monitor_name = format!("w{}", id.0);
    let mut monitor = Monitor::open(monitor_config, &monitor_name, origin);
    let mut terminating = false;

    loop {
        for message in mailbox.try_drain() {
            apply_message(&shared, message, &mut terminating);
        }

        // SAFETY: not nested inside any other live borrow of `ready`/`tasks`.
        let (ready_is_empty, tasks_is_empty) =
            unsafe { ((*shared.ready.get()).is_empty(), (*shared.tasks.get()).is_empty()) };

        if ready_is_empty && terminating && tasks_is_empty {
            tracing::debug!(worker_id = id.0, "worker terminating");
            break;
        }

        if ready_is_empty {
            for message in mailbox.block_until_drain() {
                apply_message(&shared, message, &mut terminating);
            }
            continue;
        }

        // SAFETY: not nested inside any other live borrow of `ready`.
        let task_ptr = unsafe { (*shared.ready.get()).remove() }
            .expect("ready queue observed non-empty just above");
        dispatch_once(&shared, task_ptr, &mut monitor);
    }

    CURRENT_WORKER.with(|cell| cell.set(None));
}

fn apply_message(shared: &WorkerShared, message: MailboxMessage, terminating: &mut bool) {
    match message {
        MailboxMessage::Assign { id, stack_size, body } => {
            let handle = TaskHandle::new(TaskRef { id, owner: shared.id });
            let coroutine = crate::coroutine::TaskCoroutine::new(stack_size, handle, body);
            let mut task = Box::new(Task::new(id, shared.id, coroutine));
            task.state = TaskState::Ready;
            let ptr = NonNull::from(task.as_mut());
            // SAFETY: not nested inside any other live borrow of `tasks`/`ready`.
            unsafe {
                (*shared.tasks.get()).insert(id, task);
                (*shared.ready.get()).append(ptr);
            }
            tracing::trace!(worker_id = shared.id.0, task_id = id.0, "task assigned");
        }
        MailboxMessage::WakeReady { target, baseline, firing_sd } => {
            debug_assert_eq!(target.owner, shared.id, "wake-ready message delivered to wrong worker");
            wake_local(shared, target, baseline, firing_sd);
        }
        MailboxMessage::Terminate => {
            *terminating = true;
            tracing::debug!(worker_id = shared.id.0, "termination requested");
        }
    }
}

/// Wakes `target`, which this worker owns, if `baseline` still matches its poll-token.
///
/// # Safety
///
/// Must not be called while another live borrow of `shared.tasks` or `shared.ready` is on
/// the stack (see the module-level safety note).
fn wake_local(shared: &WorkerShared, target: TaskRef, baseline: u32, firing_sd: StreamId) {
    // SAFETY: see above.
    let tasks = unsafe { &mut *shared.tasks.get() };
    let Some(task) = tasks.get_mut(&target.id) else {
        return;
    };
    if !task.try_win_wakeup(baseline) {
        return;
    }
    task.wakeup_sd = Some(firing_sd);
    task.state = TaskState::Ready;
    let ptr = NonNull::from(task.as_mut());
    // SAFETY: see above.
    unsafe { (*shared.ready.get()).append(ptr) };
    tracing::trace!(worker_id = shared.id.0, task_id = target.id.0, "task woken");
}

/// Delivers a wakeup to `target`, directly if this thread is `target`'s owning worker,
/// otherwise by posting to its mailbox. Called from [`crate::stream`] on the thread of
/// whichever task is producing/consuming the event — see that module's doc comment.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a worker's dispatch loop.
pub(crate) fn deliver_wakeup(target: TaskRef, baseline: u32, firing_sd: StreamId) {
    CURRENT_WORKER.with(|cell| {
        let shared = cell
            .get()
            .expect("deliver_wakeup called outside a worker dispatch loop");
        // SAFETY: `shared` was set by this thread's own `dispatch_loop` and remains valid
        // until that loop clears it, which cannot happen while this call is on the stack.
        let shared = unsafe { shared.as_ref() };
        if target.owner == shared.id {
            wake_local(shared, target, baseline, firing_sd);
        } else {
            shared.mailboxes[target.owner.0].send(MailboxMessage::WakeReady {
                target,
                baseline,
                firing_sd,
            });
        }
    });
}

fn dispatch_once(shared: &WorkerShared, mut task_ptr: NonNull<Task>, monitor: &mut Monitor) {
    // SAFETY: `task_ptr` was just popped from `shared.ready`; it is not linked into any
    // queue and no other reference to it exists while this function runs.
    unsafe {
        task_ptr.as_mut().state = TaskState::Running;
        monitor.task_start(task_ptr.as_mut());
    }
    let task_id = unsafe { task_ptr.as_ref().id() };
    tracing::trace!(worker_id = shared.id.0, task_id = task_id.0, "dispatch start");

    // SAFETY: `task_ptr` remains valid and is touched by no one else while its body runs;
    // `Task::set_current`/`clear_current` bracket exactly the window in which the task body
    // (via `current_task()`) may dereference it.
    unsafe { Task::set_current(task_ptr) };
    let finished = unsafe { task_ptr.as_mut().coroutine.resume() };
    Task::clear_current();

    // SAFETY: same as above — single-threaded, not nested inside `resume`.
    unsafe {
        if finished {
            task_ptr.as_mut().state = TaskState::Zombie;
        } else if task_ptr.as_ref().state() == TaskState::Running {
            // The task yielded explicitly (TaskYield) without blocking on a stream: still
            // runnable.
            task_ptr.as_mut().state = TaskState::Ready;
        }
        monitor.task_stop(task_ptr.as_mut());
    }

    let state = unsafe { task_ptr.as_ref().state() };
    tracing::trace!(worker_id = shared.id.0, task_id = task_id.0, ?state, "dispatch stop");

    match state {
        TaskState::Zombie => {
            // SAFETY: not nested inside another borrow of `tasks`; dropping the `Box<Task>`
            // is the last use of `task_ptr`.
            unsafe {
                (*shared.tasks.get()).remove(&task_id);
            }
        }
        TaskState::Ready => unsafe { (*shared.ready.get()).append(task_ptr) },
        TaskState::Blocked(_) => {}
        TaskState::Created | TaskState::Running => {
            unreachable!("task left dispatch in an impossible state: {state:?}")
        }
    }
}
