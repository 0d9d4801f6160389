// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Requesting `EXCLUSIVE` without the elevation capability is rejected at `init`, before
//! any thread is spawned.

use lpel::{Lpel, LpelConfig, LpelError, LpelFlags};

#[test]
fn exclusive_without_capability_is_denied_at_init() {
    if lpel::can_set_exclusive() {
        eprintln!("skipping: this process holds the scheduling-elevation capability");
        return;
    }

    let config = LpelConfig::builder(1)
        .flags(LpelFlags::PINNED | LpelFlags::EXCLUSIVE)
        .build();

    let err = Lpel::init(config).expect_err("EXCLUSIVE without capability should be rejected");
    assert!(matches!(err, LpelError::ExclusiveDenied));
}
