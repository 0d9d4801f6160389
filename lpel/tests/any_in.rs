// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! One consumer fans in on 3 streams; 3 producers each send one item. Each item should
//! wake the consumer exactly once.

use std::sync::mpsc;
use std::time::Duration;

use lpel::{poll_any, DescriptorMode, Lpel, LpelConfig, Stream, WorkerId};
use pretty_assertions::assert_eq;

#[test]
fn any_in_wakes_once_per_item() {
    let mut lpel = Lpel::init(LpelConfig::builder(2).build()).unwrap();
    lpel.spawn().unwrap();

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
                results.push(poll_any(&[&r0, &r1, &r2]));
            }
            r0.close();
            r1.close();
            r2.close();
            tx.send(results).unwrap();
        })
        .unwrap();
    }

    for (i, stream) in [s0, s1, s2].into_iter().enumerate() {
        lpel.spawn_task(WorkerId(1), 0, move |_handle| {
            let writer = stream.open(DescriptorMode::Write);
            writer.write(100 + u32::try_from(i).unwrap());
            writer.close();
        })
        .unwrap();
    }

    let mut results = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("any-in fan-in did not complete in time");
    results.sort_by_key(|(idx, _)| *idx);
    assert_eq!(results, vec![(0, 100), (1, 101), (2, 102)]);

    lpel.stop();
    lpel.cleanup().unwrap();
}
