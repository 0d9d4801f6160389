// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! The task control block: state, intrusive ready-queue links, the coroutine stack, and
//! the bookkeeping the stream blocking protocol needs (poll-token, wakeup descriptor).

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::coroutine::TaskCoroutine;
use crate::monitor::MonitorTaskRecord;
use crate::stream::StreamId;

/// Unique, process-wide task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

/// Identifies a worker by its index in `[0, num_workers)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

/// Why a task is [`TaskState::Blocked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Blocked reading an empty stream.
    Input,
    /// Blocked writing a full stream.
    Output,
    /// Blocked in a poll/any-in wait across multiple read endpoints.
    Any,
}

impl BlockReason {
    /// The single-character subreason letter used in monitor trace lines.
    #[must_use]
    pub fn trace_letter(self) -> char {
        match self {
            BlockReason::Input => 'I',
            BlockReason::Output => 'O',
            BlockReason::Any => 'A',
        }
    }
}

/// Lifecycle state of a task.
///
/// State transitions are driven only by the owning worker, with one exception: the
/// `Blocked -> Ready` edge, which is driven by whichever peer delivers the wakeup (see
/// [`crate::stream`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but never placed on a ready queue.
    Created,
    /// Runnable, sitting on a worker's ready queue.
    Ready,
    /// Currently executing on its owning worker's thread.
    Running,
    /// Suspended in a stream endpoint's wait slot.
    Blocked(BlockReason),
    /// Body has returned; awaiting reaping by its owning worker.
    Zombie,
}

impl TaskState {
    /// The single-character state letter used in monitor trace lines: R/B/Z/U/C for
    /// Running/Blocked/Zombie/"Unknown" (Created)/"reserved for descriptor Closed, unused
    /// here".
    #[must_use]
    pub fn trace_letter(self) -> char {
        match self {
            TaskState::Created => 'U',
            TaskState::Ready | TaskState::Running => 'R',
            TaskState::Blocked(_) => 'B',
            TaskState::Zombie => 'Z',
        }
    }
}

/// Intrusive doubly-linked-list pointers used exclusively by [`crate::taskqueue::TaskQueue`].
///
/// These are only ever read or written by a task's owning worker thread while the task
/// sits in that worker's local ready queue, so no synchronization is needed around them.
#[derive(Debug, Default)]
pub(crate) struct ReadyLinks {
    pub prev: Option<std::ptr::NonNull<Task>>,
    pub next: Option<std::ptr::NonNull<Task>>,
}

/// A task's body: a boxed closure invoked once with a [`TaskHandle`] giving it access to
/// yield/exit and (indirectly, via stream descriptors created from the handle) to block on
/// streams.
pub type TaskBody = Box<dyn FnOnce(&TaskHandle) + Send>;

/// The control block for one cooperatively scheduled task.
///
/// Owned exclusively by its [`owner`](Task::owner) worker for its entire lifetime — the
/// worker holds it in a `Box` inside a `HashMap<TaskId, Box<Task>>`
/// ([`crate::worker::Worker::tasks`]), and only ever hands out non-owning references
/// ([`crate::taskqueue::TaskQueue`] links, or `(WorkerId, TaskId)` handles used in stream
/// wait slots and mailbox messages) to the rest of the runtime.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) owner: WorkerId,
    pub(crate) state: TaskState,
    pub(crate) links: ReadyLinks,
    pub(crate) coroutine: TaskCoroutine,
    /// Monotonic per-task poll-token, bumped exactly once per delivered wakeup. Used to
    /// linearize concurrent any-in wakeup attempts: see [`crate::stream::wakeup`].
    pub(crate) poll_token: AtomicU32,
    /// The stream that most recently woke this task, set by the waking peer and read (then
    /// cleared) by the task itself on resume. Meaningful only between a wakeup delivery and
    /// the task's next yield from `Ready`.
    pub(crate) wakeup_sd: Option<StreamId>,
    pub(crate) monitor: Option<MonitorTaskRecord>,
}

impl Task {
    pub(crate) fn new(id: TaskId, owner: WorkerId, coroutine: TaskCoroutine) -> Self {
        Task {
            id,
            owner,
            state: TaskState::Created,
            links: ReadyLinks::default(),
            coroutine,
            poll_token: AtomicU32::new(0),
            wakeup_sd: None,
            monitor: None,
        }
    }

    /// This task's id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The worker that owns this task.
    #[must_use]
    pub fn owner(&self) -> WorkerId {
        self.owner
    }

    /// This task's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Reads the current poll-token value without mutating it.
    #[must_use]
    pub(crate) fn poll_token(&self) -> u32 {
        self.poll_token.load(Ordering::Acquire)
    }

    /// Attempts to be the task that "wins" delivering a wakeup for an any-in wait: bumps
    /// the token from `expected` to `expected + 1` with `compare_exchange`. Returns `true`
    /// if this call performed the bump (i.e. this caller is the first to fire), `false` if
    /// another peer already won the race.
    pub(crate) fn try_win_wakeup(&self, expected: u32) -> bool {
        self.poll_token
            .compare_exchange(expected, expected + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Invalidates a wait registration that is being cancelled without suspending. Bumps
    /// the poll token so a wakeup already in flight for that registration's baseline finds
    /// a stale value and is silently dropped by [`Task::try_win_wakeup`], instead of firing
    /// against whatever this task is doing next.
    pub(crate) fn cancel_wait(&self) {
        self.poll_token.fetch_add(1, Ordering::AcqRel);
    }

    /// A `Copy` reference to this task, for use in wait slots and mailbox messages.
    pub(crate) fn self_ref(&self) -> TaskRef {
        TaskRef {
            id: self.id,
            owner: self.owner,
        }
    }
}

thread_local! {
    /// The task currently `Running` on this thread, if any — set by
    /// [`crate::worker::Worker`] for the duration of each `coroutine.resume()` call.
    ///
    /// Mirrors the `CURRENT_YIELDER` thread-local in [`crate::coroutine`]: it lets
    /// [`crate::stream`]'s blocking read/write code reach the task's own state (to record a
    /// block, a wakeup source, or a dirty stream event) without a `&mut Task` being threaded
    /// through every call in the task body.
    ///
    /// # Safety invariant
    ///
    /// Valid exactly while the setting thread is inside the `resume()` call that set it.
    /// Only the task's own body (running on its owning worker's thread) ever dereferences
    /// it, and the worker itself never touches the task's non-`coroutine` fields during that
    /// same window — see [`current_task`].
    static CURRENT_TASK: Cell<Option<NonNull<Task>>> = const { Cell::new(None) };
}

impl Task {
    /// Marks `task` as the one currently running on this thread, for the duration of one
    /// `coroutine.resume()` call.
    ///
    /// # Safety
    ///
    /// `task` must stay live and must not be moved until [`Task::clear_current`] is called.
    pub(crate) unsafe fn set_current(task: NonNull<Task>) {
        CURRENT_TASK.with(|cell| cell.set(Some(task)));
    }

    /// Clears the thread's current-task pointer. Must be called after every `resume()`.
    pub(crate) fn clear_current() {
        CURRENT_TASK.with(|cell| cell.set(None));
    }
}

/// Returns a pointer to the task currently running on this thread.
///
/// Used by [`crate::stream`] to record blocking/wakeup/dirty-list state against the calling
/// task without a `TaskHandle` needing to carry the pointer itself.
///
/// # Panics
///
/// Panics if called from a thread that is not currently inside a task's `resume()` call —
/// i.e. from worker code itself rather than from a task body.
///
/// # Safety
///
/// The returned pointer may only be dereferenced on the calling thread, and only for the
/// duration of the current `resume()` call: the worker guarantees it touches no field of
/// `task` other than `coroutine` while that call is on the stack, so the task body (via this
/// pointer) and the worker never alias the same field concurrently.
pub(crate) fn current_task() -> NonNull<Task> {
    CURRENT_TASK.with(|cell| {
        cell.get()
            .expect("current_task() called outside a running task")
    })
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("wakeup_sd", &self.wakeup_sd)
            .finish_non_exhaustive()
    }
}

/// A cross-thread-safe, non-aliasing reference to a task: just its id and owning worker.
///
/// A stream's producer and consumer sides may live on different worker threads, and Rust's
/// aliasing rules forbid reaching into a foreign thread's task directly. So everywhere one
/// side needs to touch the other's task, this crate carries a `TaskRef` and goes through the
/// owning worker's mailbox (see [`crate::mailbox`]) to apply the mutation on the thread that
/// actually owns the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub id: TaskId,
    pub owner: WorkerId,
}

/// Handle given to a task's body, used to yield control back to the worker and to enable
/// per-task monitoring.
///
/// Captured once, by [`crate::worker`], when the task is created, and moved into the
/// coroutine closure for the life of the task. It carries no pointer of its own — every
/// operation it exposes goes through [`current_task`], which resolves the calling thread's
/// currently-running task, so a `TaskHandle` stays valid across every resume without needing
/// to be reconstructed.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandle {
    pub(crate) task_ref: TaskRef,
}

impl TaskHandle {
    pub(crate) fn new(task_ref: TaskRef) -> Self {
        TaskHandle { task_ref }
    }

    /// This task's id.
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.task_ref.id.0
    }

    pub(crate) fn task_ref(&self) -> TaskRef {
        self.task_ref
    }

    /// Cooperatively yields back to the worker, re-queuing this task as `Ready`.
    pub fn yield_now(&self) {
        crate::coroutine::suspend();
    }

    /// Enables monitoring for this task: subsequent dispatches record a trace line via the
    /// owning worker's monitor. `name` is truncated to 31 characters.
    pub fn enable_monitor(&self, name: impl Into<String>, flags: crate::monitor::MonitorFlags) {
        let mut task = current_task();
        // SAFETY: called from within this task's own body, on its owning thread; not nested
        // inside any other live borrow of `task`'s fields.
        unsafe {
            task.as_mut().monitor = Some(MonitorTaskRecord::new(name, flags, std::time::Instant::now()));
        }
    }
}
