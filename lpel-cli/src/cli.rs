// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

use clap::{Parser, Subcommand};

/// Run and trace demo scenarios against the lpel runtime.
#[derive(Debug, Parser)]
#[command(name = "lpel-cli", version, about)]
pub struct CliArgs {
    /// Number of worker threads.
    #[arg(long, global = true, default_value_t = 2)]
    pub workers: usize,

    /// Number of cores reserved exclusively for workers. Defaults to `workers`.
    #[arg(long, global = true)]
    pub proc_workers: Option<usize>,

    /// Number of additional cores available to non-worker threads.
    #[arg(long, global = true, default_value_t = 0)]
    pub proc_others: usize,

    /// Pin each worker to a distinct core.
    #[arg(long, global = true)]
    pub pinned: bool,

    /// Raise each worker to real-time FIFO scheduling. Requires `--pinned`.
    #[arg(long, global = true)]
    pub exclusive: bool,

    /// Opaque NUMA node value passed through to workers.
    #[arg(long, global = true, default_value_t = 0)]
    pub node: i32,

    #[command(subcommand)]
    pub scenario: Scenario,
}

/// Which end-to-end demo scenario to run.
#[derive(Debug, Subcommand)]
pub enum Scenario {
    /// Two tasks on one worker bounce a fixed number of items back and forth.
    PingPong,
    /// A producer and a consumer on separate workers move items through one stream.
    CrossWorker,
    /// One task fans in on several streams with `poll_any`.
    AnyIn,
    /// Many short-lived, self-monitoring tasks run to completion and are traced to disk.
    GracefulStop {
        /// Directory monitor trace files are written into.
        #[arg(long, default_value = "./mon")]
        trace_dir: std::path::PathBuf,
    },
}
