// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Producer and consumer on different workers, 10,000 items through a capacity-4 stream.

use std::sync::mpsc;
use std::time::Duration;

use lpel::{DescriptorMode, Lpel, LpelConfig, Stream, WorkerId};
use pretty_assertions::assert_eq;

#[test]
fn cross_worker_delivers_items_in_order() {
    let mut lpel = Lpel::init(LpelConfig::builder(2).build()).unwrap();
    lpel.spawn().unwrap();

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
        .unwrap();
    }

    lpel.spawn_task(WorkerId(1), 0, move |_handle| {
        let reader = stream.open(DescriptorMode::Read);
        let mut items = Vec::with_capacity(10_000);
        for _ in 0..10_000 {
            items.push(reader.read());
        }
        reader.close();
        tx.send(items).unwrap();
    })
    .unwrap();

    let items = rx
        .recv_timeout(Duration::from_secs(20))
        .expect("cross-worker transfer did not complete in time");
    assert_eq!(items, (0..10_000u32).collect::<Vec<_>>());

    lpel.stop();
    lpel.cleanup().unwrap();
}
