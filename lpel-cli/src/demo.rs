// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Runners for the end-to-end scenarios described alongside the engine's test suite.
//! Each builds a small [`Lpel`] instance, wires up tasks and streams, waits for completion
//! on an [`mpsc::channel`], and tears the runtime down before returning.

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use lpel::{DescriptorMode, Lpel, LpelConfig, LpelFlags, MonitorConfig, MonitorFlags, Stream, WorkerId};
use miette::{IntoDiagnostic, Result};

use crate::cli::CliArgs;

fn config(args: &CliArgs) -> Result<LpelConfig> {
    let mut flags = LpelFlags::empty();
    if args.pinned {
        flags |= LpelFlags::PINNED;
    }
    if args.exclusive {
        flags |= LpelFlags::EXCLUSIVE;
    }
    let config = LpelConfig::builder(args.workers)
        .proc_workers(args.proc_workers.unwrap_or(args.workers))
        .proc_others(args.proc_others)
        .flags(flags)
        .node(args.node)
        .build();
    Ok(config)
}

pub fn ping_pong(args: &CliArgs) -> Result<()> {
    let mut lpel = Lpel::init(config(args)?).into_diagnostic()?;
    lpel.spawn().into_diagnostic()?;

    let a_to_b = Stream::<i32>::new(8);
    let b_to_a = Stream::<i32>::new(8);
    let (done_tx, done_rx) = mpsc::channel::<usize>();

    {
        let a_to_b = a_to_b.clone();
        let b_to_a = b_to_a.clone();
        lpel.spawn_task(WorkerId(0), 0, move |_handle| {
            let writer = a_to_b.open(DescriptorMode::Write);
            let reader = b_to_a.open(DescriptorMode::Read);
            let mut count = 0;
            for i in 0..1000 {
                writer.write(i);
                reader.read();
                count += 1;
            }
            writer.close();
            reader.close();
            done_tx.send(count).unwrap();
        })
        .into_diagnostic()?;
    }

    lpel.spawn_task(WorkerId(0), 0, move |_handle| {
        let reader = a_to_b.open(DescriptorMode::Read);
        let writer = b_to_a.open(DescriptorMode::Write);
        for _ in 0..1000 {
            let item = reader.read();
            writer.write(item);
        }
        reader.close();
        writer.close();
    })
    .into_diagnostic()?;

    let rounds = done_rx
        .recv_timeout(Duration::from_secs(10))
        .into_diagnostic()?;
    println!("ping-pong: completed {rounds} round trips");

    lpel.stop();
    lpel.cleanup().into_diagnostic()
}

pub fn cross_worker(args: &CliArgs) -> Result<()> {
    let mut lpel = Lpel::init(config(args)?).into_diagnostic()?;
    lpel.spawn().into_diagnostic()?;

    let stream = Stream::<u32>::new(4);
    let (tx, rx) = mpsc::channel();

    {
        let stream = stream.clone();
        lpel.spawn_task(WorkerId(0), 0, move |_handle| {
            let writer = stream.open(DescriptorMode::Write);
            for i in 0..10_000u32 {
                writer.write(i);
            }
            writer.close();
        })
        .into_diagnostic()?;
    }

    let target = WorkerId(if args.workers > 1 { 1 } else { 0 });
    lpel.spawn_task(target, 0, move |_handle| {
        let reader = stream.open(DescriptorMode::Read);
        let mut in_order = true;
        for expected in 0..10_000u32 {
            if reader.read() != expected {
                in_order = false;
            }
        }
        reader.close();
        tx.send(in_order).unwrap();
    })
    .into_diagnostic()?;

    let in_order = rx.recv_timeout(Duration::from_secs(20)).into_diagnostic()?;
    println!("cross-worker: transferred 10000 items, in order: {in_order}");

    lpel.stop();
    lpel.cleanup().into_diagnostic()
}

pub fn any_in(args: &CliArgs) -> Result<()> {
    let mut lpel = Lpel::init(config(args)?).into_diagnostic()?;
    lpel.spawn().into_diagnostic()?;

    let s0 = Stream::<u32>::new(1);
    let s1 = Stream::<u32>::new(1);
    let s2 = Stream::<u32>::new(1);
    let (tx, rx) = mpsc::channel();

    {
        let (s0, s1, s2) = (s0.clone(), s1.clone(), s2.clone());
        lpel.spawn_task(WorkerId(0), 0, move |_handle| {
            let r0 = s0.open(DescriptorMode::Read);
            let r1 = s1.open(DescriptorMode::Read);
            let r2 = s2.open(DescriptorMode::Read);
            let mut results = Vec::with_capacity(3);
            for _ in 0..3 {
                results.push(lpel::poll_any(&[&r0, &r1, &r2]));
            }
            r0.close();
            r1.close();
            r2.close();
            tx.send(results).unwrap();
        })
        .into_diagnostic()?;
    }

    let target = WorkerId(if args.workers > 1 { 1 } else { 0 });
    for (i, stream) in [s0, s1, s2].into_iter().enumerate() {
        lpel.spawn_task(target, 0, move |_handle| {
            let writer = stream.open(DescriptorMode::Write);
            writer.write(100 + u32::try_from(i).unwrap());
            writer.close();
        })
        .into_diagnostic()?;
    }

    let mut results = rx.recv_timeout(Duration::from_secs(10)).into_diagnostic()?;
    results.sort_by_key(|(idx, _)| *idx);
    println!("any-in: received {results:?}");

    lpel.stop();
    lpel.cleanup().into_diagnostic()
}

pub fn graceful_stop(args: &CliArgs, trace_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(trace_dir).into_diagnostic()?;
    let monitor_config = MonitorConfig {
        enabled: true,
        directory: trace_dir.to_path_buf(),
        ..MonitorConfig::default()
    };

    let mut lpel = Lpel::init_with_monitor(config(args)?, monitor_config).into_diagnostic()?;
    lpel.spawn().into_diagnostic()?;

    let (tx, rx) = mpsc::channel();
    for i in 0..100 {
        let tx = tx.clone();
        let worker = WorkerId(i % args.workers);
        lpel.spawn_task(worker, 0, move |handle| {
            handle.enable_monitor(format!("task-{i}"), MonitorFlags::RECORD_TIMES);
            let mut acc = 0u64;
            for n in 0..1000u64 {
                acc = acc.wrapping_add(n);
                if n % 100 == 0 {
                    handle.yield_now();
                }
            }
            tx.send(acc).unwrap();
        })
        .into_diagnostic()?;
    }
    drop(tx);

    for _ in 0..100 {
        rx.recv_timeout(Duration::from_secs(10)).into_diagnostic()?;
    }
    println!("graceful-stop: 100 tasks completed, trace written to {}", trace_dir.display());

    lpel.stop();
    lpel.cleanup().into_diagnostic()
}
