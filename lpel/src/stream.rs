// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Bounded SPSC streams and the blocking read/write/any-in protocol.
//!
//! A [`Stream<T>`] is created with both endpoints unassigned; a task opens one endpoint as
//! a [`StreamDescriptor<T>`] in either [`DescriptorMode::Read`] or [`DescriptorMode::Write`].
//! The fast path never blocks. The slow path registers the calling task in the endpoint's
//! single-slot "blocked peer" reference and yields; the peer, on its own next operation,
//! notices the registration and delivers a wakeup through [`crate::worker::deliver_wakeup`].

use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::monitor::EventFlags;
use crate::task::{current_task, BlockReason, TaskRef};

/// Identifies a stream, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(1);

fn next_stream_id() -> StreamId {
    StreamId(u32::try_from(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)).unwrap_or(u32::MAX))
}

/// Which end of a stream a descriptor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorMode {
    Read,
    Write,
}

/// State of a descriptor as reported in monitor trace lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Opened this dispatch, not yet used.
    Opened,
    /// Used at least once since being opened or replaced.
    InUse,
    /// Closed.
    Closed,
    /// Rebound to a different stream this dispatch, not yet used since.
    Replaced,
}

impl DescriptorState {
    #[must_use]
    pub fn trace_letter(self) -> char {
        match self {
            DescriptorState::InUse => 'I',
            DescriptorState::Opened => 'O',
            DescriptorState::Closed => 'C',
            DescriptorState::Replaced => 'R',
        }
    }
}

/// A lock-free single-producer/single-consumer bounded ring buffer.
///
/// Exactly one thread ever calls [`Ring::try_push`] and exactly one (possibly different)
/// thread ever calls [`Ring::try_pop`], per the stream's single-writer/single-reader
/// contract — enforced at a higher level by [`StreamInner`] only ever handing out one read
/// descriptor and one write descriptor. `tail` is only ever written by the producer and
/// read (Acquire) by the consumer; `head` is the mirror image. That asymmetry is what makes
/// the slot accesses race-free without a lock.
struct Ring<T> {
    capacity: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: `Ring<T>` hands each slot to exactly one producer and one consumer thread, never
// both at once (guarded by the head/tail protocol below), so `T: Send` is sufficient.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Ring {
            capacity,
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.tail.load(Ordering::Acquire) - self.head.load(Ordering::Acquire)
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Attempts to push `item`. Only the producer thread may call this.
    ///
    /// # Errors
    ///
    /// Returns `item` back if the ring is full.
    fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail - head >= self.capacity {
            return Err(item);
        }
        let idx = tail % self.capacity;
        // SAFETY: only the producer thread ever writes slot `idx`, and it does so only
        // after observing (via `head`, Acquire) that the consumer has already vacated it.
        unsafe { (*self.slots[idx].get()).write(item) };
        self.tail.store(tail + 1, Ordering::Release);
        Ok(())
    }

    /// Attempts to pop the oldest item. Only the consumer thread may call this.
    fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = head % self.capacity;
        // SAFETY: `tail` (Acquire) confirms the producer has published a value at `idx`;
        // only the consumer thread ever reads or clears this slot.
        let item = unsafe { (*self.slots[idx].get()).assume_init_read() };
        self.head.store(head + 1, Ordering::Release);
        Some(item)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            let idx = head % self.capacity;
            // SAFETY: every slot in [head, tail) holds an initialized value; nothing else
            // touches the ring once it's being dropped.
            unsafe { (*self.slots[idx].get()).assume_init_drop() };
            head += 1;
        }
    }
}

/// Single-slot registration of a blocked peer on one endpoint: who is blocked, and the
/// poll-token value observed at the moment they blocked, used to linearize concurrent
/// wakeup attempts.
type WaitSlot = Mutex<Option<(TaskRef, u32)>>;

/// The shared state of one stream, reachable from both its read and write descriptor.
struct StreamInner<T> {
    id: StreamId,
    ring: Ring<T>,
    producer_waiting: WaitSlot,
    consumer_waiting: WaitSlot,
}

/// A bounded SPSC stream of `T`. Opened into a [`StreamDescriptor`] per endpoint.
pub struct Stream<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Stream<T> {
    /// Creates a new stream with the given bounded capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0` — zero-capacity streams are rejected at creation.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "stream capacity must be nonzero");
        Stream {
            inner: Arc::new(StreamInner {
                id: next_stream_id(),
                ring: Ring::new(capacity),
                producer_waiting: Mutex::new(None),
                consumer_waiting: Mutex::new(None),
            }),
        }
    }

    /// This stream's id, stable for its lifetime.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// Opens an endpoint, producing a descriptor owned by the calling task.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a running task body.
    #[must_use]
    pub fn open(&self, mode: DescriptorMode) -> StreamDescriptor<T> {
        StreamDescriptor::new(self.inner.clone(), mode)
    }
}

/// A task's handle to one endpoint of a [`Stream`].
pub struct StreamDescriptor<T> {
    owner: TaskRef,
    mode: DescriptorMode,
    stream: Arc<StreamInner<T>>,
    state: Cell<DescriptorState>,
    moved: Cell<u32>,
    closed: Cell<bool>,
}

impl<T> StreamDescriptor<T> {
    fn new(stream: Arc<StreamInner<T>>, mode: DescriptorMode) -> Self {
        // SAFETY: `current_task()` is valid for the extent of this call, which happens
        // entirely within the owning task's own body.
        let owner = unsafe { current_task().as_ref().self_ref() };
        let descriptor = StreamDescriptor {
            owner,
            mode,
            stream,
            state: Cell::new(DescriptorState::Opened),
            moved: Cell::new(0),
            closed: Cell::new(false),
        };
        descriptor.record(EventFlags::empty());
        descriptor
    }

    /// This descriptor's stream id.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream.id
    }

    /// Rebinds this descriptor to a different underlying stream, keeping the same mode.
    /// Observable as `R` (Replaced) in the next monitor trace line.
    pub fn replace(&mut self, new_stream: &Stream<T>) {
        self.stream = Arc::clone(&new_stream.inner);
        self.moved.set(0);
        self.state.set(DescriptorState::Replaced);
        self.record(EventFlags::empty());
    }

    /// Writes `item`, blocking cooperatively if the stream is full.
    ///
    /// # Panics
    ///
    /// Panics (debug) if this descriptor is not in write mode, or (always) if called after
    /// [`StreamDescriptor::close`].
    pub fn write(&self, mut item: T) {
        debug_assert_eq!(self.mode, DescriptorMode::Write, "write on a read descriptor");
        assert!(!self.closed.get(), "write on closed stream descriptor");
        loop {
            match self.stream.ring.try_push(item) {
                Ok(()) => {
                    self.moved.set(self.moved.get() + 1);
                    self.record(EventFlags::MOVED);
                    self.wake_peer(&self.stream.consumer_waiting);
                    return;
                }
                Err(returned) => {
                    item = returned;
                    self.block(BlockReason::Output, &self.stream.producer_waiting, || {
                        !self.stream.ring.is_full()
                    });
                }
            }
        }
    }

    /// Reads the next item, blocking cooperatively if the stream is empty.
    ///
    /// # Panics
    ///
    /// Panics (debug) if this descriptor is not in read mode, or (always) if called after
    /// [`StreamDescriptor::close`].
    pub fn read(&self) -> T {
        debug_assert_eq!(self.mode, DescriptorMode::Read, "read on a write descriptor");
        assert!(!self.closed.get(), "read on closed stream descriptor");
        loop {
            if let Some(item) = self.stream.ring.try_pop() {
                self.moved.set(self.moved.get() + 1);
                self.record(EventFlags::MOVED);
                self.wake_peer(&self.stream.producer_waiting);
                return item;
            }
            self.block(BlockReason::Input, &self.stream.consumer_waiting, || {
                self.stream.ring.len() > 0
            });
        }
    }

    /// Non-blocking read: `Some(item)` if one was available, `None` otherwise. Used by
    /// [`poll_any`]'s fast path.
    fn try_read(&self) -> Option<T> {
        debug_assert_eq!(self.mode, DescriptorMode::Read, "try_read on a write descriptor");
        let item = self.stream.ring.try_pop()?;
        self.moved.set(self.moved.get() + 1);
        self.record(EventFlags::MOVED);
        self.wake_peer(&self.stream.producer_waiting);
        Some(item)
    }

    /// Registers this descriptor's owning task as the any-in waiter on this endpoint,
    /// without yielding. Used by [`poll_any`] once the fast path has failed on every
    /// candidate.
    fn register_any(&self, baseline: u32) {
        let mut slot = self.stream.consumer_waiting.lock().unwrap();
        assert!(slot.is_none(), "endpoint already has a blocked peer");
        *slot = Some((self.owner, baseline));
        self.record(EventFlags::BLOCKED);
    }

    /// Removes this descriptor's registration from the any-in wait slot, if it is still the
    /// one registered (it may already have been cleared by a firing peer).
    fn unregister_any(&self) {
        let mut slot = self.stream.consumer_waiting.lock().unwrap();
        if matches!(*slot, Some((owner, _)) if owner == self.owner) {
            *slot = None;
        }
    }

    /// Closes this descriptor. The stream is torn down once both endpoints have closed and
    /// the buffer is drained (the closer that observes both conditions frees it).
    pub fn close(self) {
        self.closed.set(true);
        self.state.set(DescriptorState::Closed);
        self.record(EventFlags::empty());
    }

    /// Registers as the blocked peer on `slot`, then re-checks `ready` before actually
    /// suspending: a peer may have acted between the caller's own fast-path check and this
    /// registration, in which case the wakeup would otherwise be delivered into an empty
    /// slot and lost. If `ready` now holds, unregisters and returns without suspending so
    /// the caller's loop retries the ring immediately.
    fn block(&self, reason: BlockReason, slot: &WaitSlot, ready: impl Fn() -> bool) {
        let mut task = current_task();
        // SAFETY: `task` names the task currently running on this thread; only this thread
        // ever touches its non-`coroutine` fields while it is on the stack inside `resume`.
        let baseline = unsafe { task.as_ref().poll_token() };
        {
            let mut guard = slot.lock().unwrap();
            assert!(guard.is_none(), "endpoint already has a blocked peer");
            *guard = Some((self.owner, baseline));
        }
        if ready() {
            let mut guard = slot.lock().unwrap();
            if matches!(*guard, Some((owner, _)) if owner == self.owner) {
                *guard = None;
            }
            drop(guard);
            unsafe {
                task.as_ref().cancel_wait();
            }
            return;
        }
        unsafe {
            task.as_mut().state = crate::task::TaskState::Blocked(reason);
        }
        self.record(EventFlags::BLOCKED);
        crate::coroutine::suspend();

        // Resumed: a peer delivered the wakeup through this very endpoint.
        if unsafe { task.as_ref().wakeup_sd } == Some(self.stream.id) {
            unsafe {
                task.as_mut().wakeup_sd = None;
            }
            self.record(EventFlags::WOKEN);
        }
    }

    fn wake_peer(&self, slot: &WaitSlot) {
        let waiting = slot.lock().unwrap().take();
        if let Some((target, baseline)) = waiting {
            crate::worker::deliver_wakeup(target, baseline, self.stream.id);
        }
    }

    fn record(&self, flag: EventFlags) {
        let reported = self.state.get();
        let counter = self.moved.get();
        let mut task = current_task();
        // SAFETY: as above — confined to the calling task's own thread.
        unsafe {
            if let Some(monitor) = task.as_mut().monitor.as_mut() {
                monitor.mark_stream_event(self.stream.id, self.mode, reported, counter, flag);
            }
        }
        if matches!(reported, DescriptorState::Opened | DescriptorState::Replaced) {
            self.state.set(DescriptorState::InUse);
        }
    }
}

/// Waits for the first available item across several read descriptors of the same item
/// type, returning its index in `descriptors` and the item.
///
/// Only homogeneous-`T` fan-in is supported: every candidate descriptor must read the same
/// item type. A task that needs to fan in streams of different types must wrap them in a
/// common enum before calling this.
///
/// # Panics
///
/// Panics if `descriptors` is empty, or if any descriptor is not in read mode.
pub fn poll_any<T>(descriptors: &[&StreamDescriptor<T>]) -> (usize, T) {
    assert!(!descriptors.is_empty(), "poll_any requires at least one descriptor");

    // Fast path: a stream may already have data buffered, in which case no registration or
    // yield is needed at all.
    for (idx, descriptor) in descriptors.iter().enumerate() {
        if let Some(item) = descriptor.try_read() {
            return (idx, item);
        }
    }

    let mut task = current_task();
    // SAFETY: confined to the calling task's own thread, as elsewhere in this module.
    let baseline = unsafe { task.as_ref().poll_token() };
    for descriptor in descriptors {
        descriptor.register_any(baseline);
    }

    // A producer may have fired on any of these streams between the fast-path check above
    // and finishing registration on all of them; re-check before committing to suspend so
    // that wakeup isn't delivered into an already-abandoned slot and lost.
    for (idx, descriptor) in descriptors.iter().enumerate() {
        if let Some(item) = descriptor.try_read() {
            for d in descriptors {
                d.unregister_any();
            }
            unsafe {
                task.as_ref().cancel_wait();
            }
            return (idx, item);
        }
    }

    unsafe {
        task.as_mut().state = crate::task::TaskState::Blocked(BlockReason::Any);
    }
    crate::coroutine::suspend();

    // Resumed: exactly one peer won the wakeup race (poll-token CAS); `wakeup_sd` names
    // which stream fired. Unregister from the rest.
    let firing_sd = unsafe { task.as_mut().wakeup_sd.take() };
    for descriptor in descriptors {
        descriptor.unregister_any();
    }
    let (idx, descriptor) = descriptors
        .iter()
        .enumerate()
        .find(|(_, d)| Some(d.stream.id) == firing_sd)
        .expect("any-in wakeup fired but no matching descriptor was found");
    descriptor.record(EventFlags::WOKEN);
    let item = descriptor
        .try_read()
        .expect("any-in wakeup fired but the firing stream had no item");
    (idx, item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_is_fifo_and_respects_capacity() {
        let ring: Ring<u32> = Ring::new(2);
        assert!(ring.try_push(1).is_ok());
        assert!(ring.try_push(2).is_ok());
        assert_eq!(ring.try_push(3), Err(3));
        assert_eq!(ring.try_pop(), Some(1));
        assert!(ring.try_push(3).is_ok());
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), Some(3));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn ring_buffer_drops_remaining_items() {
        use std::rc::Rc;
        let ring: Ring<Rc<()>> = Ring::new(4);
        let marker = Rc::new(());
        ring.try_push(Rc::clone(&marker)).unwrap();
        ring.try_push(Rc::clone(&marker)).unwrap();
        assert_eq!(Rc::strong_count(&marker), 3);
        drop(ring);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn descriptor_state_trace_letters() {
        assert_eq!(DescriptorState::InUse.trace_letter(), 'I');
        assert_eq!(DescriptorState::Opened.trace_letter(), 'O');
        assert_eq!(DescriptorState::Closed.trace_letter(), 'C');
        assert_eq!(DescriptorState::Replaced.trace_letter(), 'R');
    }
}
