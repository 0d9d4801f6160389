// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Two tasks on one worker, two streams, 1000 round trips.

use std::sync::mpsc;
use std::time::Duration;

use lpel::{DescriptorMode, Lpel, LpelConfig, Stream, WorkerId};
use pretty_assertions::assert_eq;

#[test]
fn ping_pong_completes_and_preserves_order() {
    let mut lpel = Lpel::init(LpelConfig::builder(1).build()).unwrap();
    lpel.spawn().unwrap();

    let a_to_b = Stream::<i32>::new(8);
    let b_to_a = Stream::<i32>::new(8);

    let (done_tx, done_rx) = mpsc::channel::<Vec<i32>>();

    {
        let a_to_b = a_to_b.clone();
        let b_to_a = b_to_a.clone();
        lpel.spawn_task(WorkerId(0), 0, move |_handle| {
            let writer = a_to_b.open(DescriptorMode::Write);
            let reader = b_to_a.open(DescriptorMode::Read);
            let mut received = Vec::with_capacity(1000);
            for i in 0..1000 {
                writer.write(i);
                received.push(reader.read());
            }
            writer.close();
            reader.close();
            done_tx.send(received).unwrap();
        })
        .unwrap();
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
    .unwrap();

    let received = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("ping-pong did not complete in time");
    assert_eq!(received, (0..1000).collect::<Vec<_>>());

    lpel.stop();
    lpel.cleanup().unwrap();
}
