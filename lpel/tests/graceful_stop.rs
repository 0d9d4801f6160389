// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! 100 short-lived, self-monitoring tasks across 2 workers.
//! After `stop`/`cleanup`, every worker's trace file should record at least one task
//! reaching the zombie state with a recorded total lifetime (`st Z ... creat ...`).

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lpel::{Lpel, LpelConfig, MonitorConfig, MonitorFlags, WorkerId};

#[test]
fn tasks_run_to_completion_and_are_traced() {
    let dir = tempfile::tempdir().unwrap();
    let monitor_config = MonitorConfig {
        enabled: true,
        directory: dir.path().to_path_buf(),
        ..MonitorConfig::default()
    };

    let mut lpel =
        Lpel::init_with_monitor(LpelConfig::builder(2).build(), monitor_config).unwrap();
    lpel.spawn().unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..100 {
        let completed = Arc::clone(&completed);
        let worker = WorkerId(i % 2);
        lpel.spawn_task(worker, 0, move |handle| {
            handle.enable_monitor(format!("task-{i}"), MonitorFlags::RECORD_TIMES);
            let mut acc = 0u64;
            for n in 0..1000u64 {
                acc = acc.wrapping_add(n);
                if n % 100 == 0 {
                    handle.yield_now();
                }
            }
            std::hint::black_box(acc);
            completed.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }

    std::thread::sleep(std::time::Duration::from_millis(500));
    lpel.stop();
    lpel.cleanup().unwrap();

    assert_eq!(completed.load(Ordering::Relaxed), 100);

    let mut found_zombie_with_total = false;
    for entry in fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        let contents = fs::read_to_string(&path).unwrap();
        for line in contents.lines() {
            if line.contains("st Z") && line.contains("creat") {
                found_zombie_with_total = true;
            }
        }
    }
    assert!(
        found_zombie_with_total,
        "expected at least one trace line recording a completed task's total lifetime"
    );
}
