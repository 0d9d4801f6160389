// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Adapts the [`corosensei`] stackful-coroutine crate to the capability a task dispatch
//! loop needs: *save the caller's context, resume the callee's context, atomically from the
//! caller's point of view*. This is the only place in the crate that knows about
//! `corosensei` directly — everything else calls [`TaskCoroutine::resume`] and [`suspend`].
//!
//! `corosensei` is the standard, widely used crate for exactly this capability — the same
//! kind of stackful fiber Wasmtime uses for its async-to-sync bridge.

use std::cell::Cell;
use std::ptr::NonNull;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::task::TaskHandle;

/// Default stack size when a task is created with `stacksize <= 0`.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024;

thread_local! {
    /// The `Yielder` for whichever task coroutine is currently executing on this thread,
    /// if any. Set by [`TaskCoroutine::resume`] for the duration of the nested `resume`
    /// call and cleared on return. [`suspend`] reads this to find its way back to the
    /// worker without the task body needing to carry a `Yielder` reference through every
    /// call in [`crate::stream`].
    ///
    /// # Safety invariant
    ///
    /// The pointer is valid exactly while the thread is inside the `resume()` call that
    /// set it — i.e. while a task coroutine is running or itself calling `suspend`. It must
    /// never be read outside that window.
    static CURRENT_YIELDER: Cell<Option<NonNull<Yielder<(), ()>>>> = const { Cell::new(None) };
}

/// A task's coroutine: its stack plus the boxed body closure, wrapped so the rest of the
/// crate only ever calls [`TaskCoroutine::resume`].
pub(crate) struct TaskCoroutine {
    inner: Coroutine<(), (), ()>,
    finished: bool,
}

impl TaskCoroutine {
    /// Allocates a stack of `stack_size` bytes and prepares `body` to run on it, with
    /// `handle` as the argument passed to `body` once it starts.
    pub(crate) fn new(
        stack_size: usize,
        handle: TaskHandle,
        body: Box<dyn FnOnce(&TaskHandle) + Send>,
    ) -> Self {
        let stack = DefaultStack::new(stack_size.max(1))
            .expect("failed to allocate coroutine stack (out of memory or over mmap limits)");
        let inner = Coroutine::with_stack(stack, move |yielder, ()| {
            CURRENT_YIELDER.with(|cell| cell.set(Some(NonNull::from(yielder))));
            body(&handle);
            CURRENT_YIELDER.with(|cell| cell.set(None));
        });
        TaskCoroutine {
            inner,
            finished: false,
        }
    }

    /// A coroutine whose body does nothing and returns immediately. Used by unit tests that
    /// only need a task shape, not behavior.
    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        let stack = DefaultStack::new(DEFAULT_STACK_SIZE).expect("failed to allocate stack");
        let inner = Coroutine::with_stack(stack, |_yielder: &Yielder<(), ()>, ()| {});
        TaskCoroutine {
            inner,
            finished: false,
        }
    }

    /// Switches from the calling (worker) context into this task's context, running until
    /// the task either suspends (via [`suspend`]) or its body returns.
    ///
    /// Returns `true` if the body returned (the task reached `Zombie`), `false` if it
    /// suspended and can be resumed again later.
    ///
    /// # Panics
    ///
    /// Panics if called again after already returning `true` once — a zombie task is never
    /// redispatched.
    pub(crate) fn resume(&mut self) -> bool {
        assert!(!self.finished, "resumed a task coroutine past completion");
        match self.inner.resume(()) {
            CoroutineResult::Yield(()) => false,
            CoroutineResult::Return(()) => {
                self.finished = true;
                true
            }
        }
    }
}

/// Called from within a running task body (directly, or transitively through
/// [`crate::stream`]'s blocking protocol) to yield control back to the worker.
///
/// # Panics
///
/// Panics if called from a thread that is not currently inside a task coroutine's `resume`
/// call — i.e. called from worker code itself, or after the enclosing task has already
/// returned.
pub fn suspend() {
    CURRENT_YIELDER.with(|cell| {
        let yielder = cell
            .get()
            .expect("suspend() called outside a running task coroutine");
        // SAFETY: the thread-local invariant documented on `CURRENT_YIELDER` guarantees
        // this pointer is valid for the duration of this call: we are necessarily still
        // inside the `resume()` stack frame that set it, since only that frame's closure
        // (directly or transitively) can observe a `Some` value here.
        unsafe { yielder.as_ref() }.suspend(());
    });
}
