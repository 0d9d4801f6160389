// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! The monitoring sidecar: a per-worker append-only trace file, and the per-task dirty
//! list that batches stream events between dispatches so each descriptor is printed at
//! most once per trace line.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::stream::{DescriptorMode, DescriptorState, StreamId};
use crate::task::{Task, TaskState};

bitflags! {
    /// Which per-task facts [`crate::TaskHandle::enable_monitor`] asks the runtime to record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MonitorFlags: u32 {
        /// Record creation/start/stop/total timings.
        const RECORD_TIMES = 1 << 0;
        /// Record stream descriptor events (the dirty list) in trace lines.
        const RECORD_STREAMS = 1 << 1;
    }
}

bitflags! {
    /// Which kind of event happened to a descriptor during the current dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct EventFlags: u8 {
        /// `?` — the task blocked on this descriptor.
        const BLOCKED = 1 << 0;
        /// `!` — the task was woken via this descriptor.
        const WOKEN = 1 << 1;
        /// `*` — an item moved through this descriptor.
        const MOVED = 1 << 2;
    }
}

impl EventFlags {
    fn write_letters(self, out: &mut String) {
        if self.contains(EventFlags::BLOCKED) {
            out.push('?');
        }
        if self.contains(EventFlags::WOKEN) {
            out.push('!');
        }
        if self.contains(EventFlags::MOVED) {
            out.push('*');
        }
    }
}

/// One dirty-list entry: the state of a single descriptor's events accumulated since the
/// task's last dispatch stop.
#[derive(Debug, Clone, Copy)]
struct DirtyEntry {
    sid: StreamId,
    mode: DescriptorMode,
    state: DescriptorState,
    counter: u32,
    flags: EventFlags,
}

/// Per-task dirty list of stream descriptor events.
///
/// A descriptor must never be double-enqueued within one dispatch. This is a plain `Vec`
/// plus a linear "already present" check — the dirty list is bounded by how many stream
/// endpoints a single task holds open, which is small, so the O(n) scan costs nothing in
/// practice.
#[derive(Debug, Default)]
pub(crate) struct DirtyList {
    entries: Vec<DirtyEntry>,
}

impl DirtyList {
    fn mark(
        &mut self,
        sid: StreamId,
        mode: DescriptorMode,
        state: DescriptorState,
        counter: u32,
        flag: EventFlags,
    ) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sid == sid) {
            entry.flags |= flag;
            entry.state = state;
            entry.counter = counter;
        } else {
            self.entries.push(DirtyEntry {
                sid,
                mode,
                state,
                counter,
                flags: flag,
            });
        }
    }

    /// Drains the list, returning its entries in the order they were first marked dirty
    /// this dispatch.
    fn drain(&mut self) -> Vec<DirtyEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Per-task monitoring state: name, dispatch counter, timings, and the dirty list.
#[derive(Debug)]
pub struct MonitorTaskRecord {
    pub(crate) name: String,
    pub(crate) flags: MonitorFlags,
    pub(crate) dispatch_count: u32,
    pub(crate) created_at: Instant,
    pub(crate) started_at: Option<Instant>,
    pub(crate) total: Duration,
    pub(crate) dirty: DirtyList,
}

impl MonitorTaskRecord {
    pub(crate) fn new(name: impl Into<String>, flags: MonitorFlags, now: Instant) -> Self {
        let mut name = name.into();
        name.truncate(31);
        MonitorTaskRecord {
            name,
            flags,
            dispatch_count: 0,
            created_at: now,
            started_at: None,
            total: Duration::ZERO,
            dirty: DirtyList::default(),
        }
    }

    /// Marks a stream descriptor dirty with `flag` for the current dispatch.
    pub(crate) fn mark_stream_event(
        &mut self,
        sid: StreamId,
        mode: DescriptorMode,
        state: DescriptorState,
        counter: u32,
        flag: EventFlags,
    ) {
        if self.flags.contains(MonitorFlags::RECORD_STREAMS) {
            self.dirty.mark(sid, mode, state, counter, flag);
        }
    }
}

/// Per-worker monitor: owns the trace file and formats dispatch records.
///
/// Monitor I/O failures are non-fatal: a failed write drops that one record. A
/// `tracing::warn!` is emitted the first time a given worker's file write fails, not on
/// every subsequent failure, so a persistently broken disk doesn't flood `tracing` output
/// on top of losing the trace file itself.
pub struct Monitor {
    worker_name: String,
    origin: Instant,
    writer: Option<BufWriter<File>>,
    warned_once: bool,
}

/// Where and how monitor trace files are named and whether monitoring is active at all.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Whether monitoring is enabled. When `false`, [`Monitor::open`] never touches the
    /// filesystem and every record write is a no-op.
    pub enabled: bool,
    /// Directory trace files are written into.
    pub directory: PathBuf,
    /// Filename prefix, before the worker name.
    pub prefix: String,
    /// Filename suffix, after the worker name.
    pub postfix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            enabled: false,
            directory: PathBuf::from("."),
            prefix: "mon_".into(),
            postfix: ".log".into(),
        }
    }
}

impl Monitor {
    pub(crate) fn open(config: &MonitorConfig, worker_name: &str, origin: Instant) -> Self {
        let writer = if config.enabled {
            let path = config
                .directory
                .join(format!("{}{worker_name}{}", config.prefix, config.postfix));
            match File::create(&path) {
                Ok(file) => Some(BufWriter::new(file)),
                Err(err) => {
                    tracing::warn!(?path, %err, "failed to open monitor trace file");
                    None
                }
            }
        } else {
            None
        };
        Monitor {
            worker_name: worker_name.to_owned(),
            origin,
            writer,
            warned_once: false,
        }
    }

    fn ts_norm(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Records the start of a dispatch: bumps the dispatch counter and, if timing is
    /// enabled for this task, records the start instant.
    pub(crate) fn task_start(&self, task: &mut Task) {
        if let Some(monitor) = task.monitor.as_mut() {
            monitor.dispatch_count += 1;
            if monitor.flags.contains(MonitorFlags::RECORD_TIMES) {
                monitor.started_at = Some(Instant::now());
            }
        }
    }

    /// Records the end of a dispatch: formats and writes one trace line, draining the
    /// task's dirty list.
    pub(crate) fn task_stop(&mut self, task: &mut Task) {
        let Some(monitor) = task.monitor.as_mut() else {
            return;
        };

        let mut line = String::new();
        let _ = write!(line, "{} {}", self.ts_norm(), task.id.0);
        if !monitor.name.is_empty() {
            let _ = write!(line, " [{}]", monitor.name);
        }
        let _ = write!(line, " disp {}", monitor.dispatch_count);
        let _ = write!(line, " st {}", task.state.trace_letter());
        if let TaskState::Blocked(reason) = task.state {
            line.push(reason.trace_letter());
        }

        if monitor.flags.contains(MonitorFlags::RECORD_TIMES) {
            if let Some(started) = monitor.started_at.take() {
                let dt = started.elapsed();
                monitor.total += dt;
                let _ = write!(line, " et {}", dt.as_micros());
                if task.state == TaskState::Zombie {
                    let _ = write!(line, " creat {}", monitor.created_at.elapsed().as_micros());
                }
            }
        }

        let entries = monitor.dirty.drain();
        if !entries.is_empty() {
            line.push(' ');
            for entry in entries {
                let mode = match entry.mode {
                    DescriptorMode::Read => 'r',
                    DescriptorMode::Write => 'w',
                };
                let state = entry.state.trace_letter();
                let _ = write!(line, "{},{},{},{},", entry.sid.0, mode, state, entry.counter);
                entry.flags.write_letters(&mut line);
                line.push(';');
            }
        }

        self.write_line(&line);
    }

    fn write_line(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if writeln!(writer, "{line}").is_err() || writer.flush().is_err() {
            if !self.warned_once {
                tracing::warn!(worker = %self.worker_name, "dropping monitor trace record after write failure");
                self.warned_once = true;
            }
            self.writer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::TaskCoroutine;
    use crate::task::{TaskId, WorkerId};

    #[test]
    fn dirty_list_marks_each_stream_once_per_dispatch() {
        let mut list = DirtyList::default();
        list.mark(
            StreamId(1),
            DescriptorMode::Read,
            DescriptorState::InUse,
            0,
            EventFlags::BLOCKED,
        );
        list.mark(
            StreamId(1),
            DescriptorMode::Read,
            DescriptorState::InUse,
            1,
            EventFlags::WOKEN,
        );
        let drained = list.drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].flags.contains(EventFlags::BLOCKED));
        assert!(drained[0].flags.contains(EventFlags::WOKEN));
    }

    #[test]
    fn task_stop_without_monitor_is_a_no_op() {
        let mut task = Task::new(TaskId(0), WorkerId(0), TaskCoroutine::noop());
        let mut monitor = Monitor::open(&MonitorConfig::default(), "w0", Instant::now());
        // Should not panic even though task.monitor is None and the file is disabled.
        monitor.task_start(&mut task);
        monitor.task_stop(&mut task);
    }
}
