// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Per-worker mailbox: the only channel through which one worker thread ever touches
//! another worker's tasks. Built on [`crossbeam_channel`], matching the channel crate
//! already in the dependency stack for cross-thread signaling.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::task::{TaskBody, TaskId, TaskRef, WorkerId};
use crate::stream::StreamId;

/// A message posted to a worker's mailbox by another worker (or, for `Assign`, by the
/// `Lpel` top level).
pub(crate) enum MailboxMessage {
    /// Place a newly created task, owned by the receiving worker, on its ready queue.
    Assign {
        id: TaskId,
        stack_size: usize,
        body: TaskBody,
    },
    /// Deliver a wakeup to a task this worker owns: `baseline` is the poll-token value
    /// observed when the task blocked, used to linearize concurrent wakeup attempts.
    WakeReady {
        target: TaskRef,
        baseline: u32,
        firing_sd: StreamId,
    },
    /// Ask the worker to terminate once its ready queue and owned tasks drain.
    Terminate,
}

/// The sending half of a worker's mailbox, held by every worker (including its owner) and
/// by the `Lpel` top level for `assign`.
#[derive(Clone)]
pub(crate) struct MailboxSender {
    owner: WorkerId,
    tx: Sender<MailboxMessage>,
}

impl MailboxSender {
    pub(crate) fn owner(&self) -> WorkerId {
        self.owner
    }

    pub(crate) fn send(&self, message: MailboxMessage) {
        // The receiving worker outlives every sender that could reach it during a
        // well-formed `Lpel` lifetime (senders are dropped at `cleanup`, after the worker
        // threads have already joined) — a send error here would mean a logic bug
        // elsewhere, not a recoverable runtime condition.
        let _ = self.tx.send(message);
    }
}

/// The receiving half, owned exclusively by the worker thread it belongs to.
pub(crate) struct Mailbox {
    owner: WorkerId,
    rx: Receiver<MailboxMessage>,
}

impl Mailbox {
    /// Creates a mailbox for `owner` along with the sender every peer worker (and the
    /// `Lpel` top level) will hold a clone of.
    pub(crate) fn channel(owner: WorkerId) -> (MailboxSender, Mailbox) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (MailboxSender { owner, tx }, Mailbox { owner, rx })
    }

    pub(crate) fn owner(&self) -> WorkerId {
        self.owner
    }

    /// Drains every message currently queued, without blocking. Used at the top of the
    /// dispatch loop.
    pub(crate) fn try_drain(&self) -> Vec<MailboxMessage> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        messages
    }

    /// Blocks until at least one message arrives, then drains all currently queued
    /// messages. This is the dispatch loop's only kernel-blocking wait point.
    pub(crate) fn block_until_drain(&self) -> Vec<MailboxMessage> {
        match self.rx.recv() {
            Ok(first) => {
                let mut messages = vec![first];
                messages.extend(self.try_drain());
                messages
            }
            Err(_) => Vec::new(),
        }
    }
}
