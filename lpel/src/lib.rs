// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! `lpel` — a light-weight parallel execution layer: a cooperative task runtime running
//! thousands of coroutine-style tasks across a small, pinned pool of OS worker threads,
//! communicating through bounded single-producer/single-consumer streams.
//!
//! # Shape of the crate
//!
//! - [`Lpel`] is the lifecycle entry point: [`Lpel::init`], [`Lpel::spawn`],
//!   [`Lpel::spawn_task`], [`Lpel::stop`], [`Lpel::cleanup`].
//! - [`LpelConfig`]/[`LpelConfigBuilder`] describe the worker/core layout.
//! - [`Stream`]/[`StreamDescriptor`]/[`poll_any`] are the dataflow primitives a task body
//!   uses to communicate with other tasks.
//! - [`TaskHandle`] is what a task body receives: yield control, enable monitoring.
//!
//! Everything else (`task`, `taskqueue`, `worker`, `mailbox`, `monitor`, `coroutine`,
//! `affinity`) is internal scheduling machinery, `pub(crate)` except for the small set of
//! types a task body or caller needs to name.

mod affinity;
mod config;
mod coroutine;
mod error;
mod lpel;
mod mailbox;
mod monitor;
mod stream;
mod task;
mod taskqueue;
mod worker;

pub use config::{LpelConfig, LpelConfigBuilder, LpelFlags};
pub use coroutine::DEFAULT_STACK_SIZE;
pub use error::{LpelError, Result};
pub use lpel::{can_set_exclusive, num_cores, Lpel};
pub use monitor::{MonitorConfig, MonitorFlags};
pub use stream::{poll_any, DescriptorMode, DescriptorState, Stream, StreamDescriptor, StreamId};
pub use task::{BlockReason, TaskHandle, TaskId, TaskState, WorkerId};
