// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Replacing a read descriptor's underlying stream is visible in the monitor trace as a
//! `Replaced` event on one dispatch, then `InUse` on the next once the replacement stream
//! is actually read from.

use std::fs;

use lpel::{DescriptorMode, Lpel, LpelConfig, MonitorConfig, MonitorFlags, Stream, WorkerId};

#[test]
fn replace_is_visible_as_replaced_then_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let monitor_config = MonitorConfig {
        enabled: true,
        directory: dir.path().to_path_buf(),
        ..MonitorConfig::default()
    };

    let mut lpel =
        Lpel::init_with_monitor(LpelConfig::builder(2).build(), monitor_config).unwrap();
    lpel.spawn().unwrap();

    let first = Stream::<u32>::new(2);
    let second = Stream::<u32>::new(2);

    {
        let second = second.clone();
        lpel.spawn_task(WorkerId(1), 0, move |_handle| {
            let writer = second.open(DescriptorMode::Write);
            writer.write(42);
            writer.close();
        })
        .unwrap();
    }

    lpel.spawn_task(WorkerId(0), 0, move |handle| {
        handle.enable_monitor("replacer", MonitorFlags::RECORD_STREAMS);
        let mut reader = first.open(DescriptorMode::Read);
        handle.yield_now();

        reader.replace(&second);
        handle.yield_now();

        let item = reader.read();
        assert_eq!(item, 42);
        handle.yield_now();
        reader.close();
    })
    .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(300));
    lpel.stop();
    lpel.cleanup().unwrap();

    let mut saw_replaced = false;
    let mut saw_in_use_after = false;
    for entry in fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        let contents = fs::read_to_string(&path).unwrap();
        for line in contents.lines() {
            if !line.contains("[replacer]") {
                continue;
            }
            if line.contains(",r,R,") {
                saw_replaced = true;
            } else if saw_replaced && line.contains(",r,I,") {
                saw_in_use_after = true;
            }
        }
    }
    assert!(saw_replaced, "expected a trace line showing the replaced descriptor");
    assert!(
        saw_in_use_after,
        "expected a later trace line showing the descriptor back in use after replace"
    );
}
