// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Runtime configuration: worker/core layout and the `PINNED`/`EXCLUSIVE` flag bitset.
//!
//! An `Arc<LpelConfig>` is threaded through every lifecycle call rather than kept in a
//! global; the config is immutable once [`LpelConfig::validate`] has accepted it at
//! [`crate::Lpel::init`].

use bitflags::bitflags;

use crate::error::{LpelError, Result};

bitflags! {
    /// Recognized configuration flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LpelFlags: u32 {
        /// Pin each worker to a distinct core.
        const PINNED = 1 << 0;
        /// Raise each worker's scheduling class to real-time FIFO, lowest priority.
        /// Requires [`LpelFlags::PINNED`] and the scheduling-elevation capability.
        const EXCLUSIVE = 1 << 1;
    }
}

impl Default for LpelFlags {
    fn default() -> Self {
        LpelFlags::empty()
    }
}

/// Validated configuration for a runtime instance.
///
/// Build one with [`LpelConfig::builder`] (or construct it directly — all fields are
/// public) and pass it to [`crate::Lpel::init`], which calls [`LpelConfig::validate`]
/// before touching any OS resource.
#[derive(Debug, Clone)]
pub struct LpelConfig {
    /// Number of worker threads to create. Must be `> 0`.
    pub num_workers: usize,
    /// Number of cores reserved exclusively for workers. Must be `> 0`.
    pub proc_workers: usize,
    /// Number of additional cores available to non-worker ("other") threads via
    /// [`crate::lpel::thread_assign`] with `core = None`. May be `0`.
    pub proc_others: usize,
    /// `PINNED` / `EXCLUSIVE` flags.
    pub flags: LpelFlags,
    /// Opaque value passed through to workers; not interpreted by the runtime.
    pub node: i32,
}

impl LpelConfig {
    /// Starts building a config with the given worker count and all other fields at
    /// their defaults (`proc_workers = num_workers`, `proc_others = 0`, no flags, `node =
    /// 0`).
    #[must_use]
    pub fn builder(num_workers: usize) -> LpelConfigBuilder {
        LpelConfigBuilder {
            config: LpelConfig {
                num_workers,
                proc_workers: num_workers,
                proc_others: 0,
                flags: LpelFlags::empty(),
                node: 0,
            },
        }
    }

    /// Validates the configuration against the checks specified for `Init`:
    ///
    /// - `num_workers > 0`
    /// - `proc_workers > 0`
    /// - `proc_others >= 0` (always true for a `usize`, kept here for documentation)
    /// - `proc_workers + proc_others <= available_cores`
    /// - `EXCLUSIVE` implies `PINNED`
    /// - `EXCLUSIVE` implies the process holds the scheduling-elevation capability
    ///
    /// # Errors
    ///
    /// Returns [`LpelError::InvalidConfig`] for the first four checks and
    /// [`LpelError::ExclusiveDenied`] for the capability check.
    pub fn validate(&self, available_cores: usize) -> Result<()> {
        if self.num_workers == 0 {
            return Err(LpelError::InvalidConfig {
                reason: "num_workers must be greater than 0".into(),
            });
        }
        if self.proc_workers == 0 {
            return Err(LpelError::InvalidConfig {
                reason: "proc_workers must be greater than 0".into(),
            });
        }
        if self.proc_workers + self.proc_others > available_cores {
            return Err(LpelError::InvalidConfig {
                reason: format!(
                    "proc_workers ({}) + proc_others ({}) exceeds available cores ({available_cores})",
                    self.proc_workers, self.proc_others
                ),
            });
        }
        if self.flags.contains(LpelFlags::EXCLUSIVE) && !self.flags.contains(LpelFlags::PINNED) {
            return Err(LpelError::InvalidConfig {
                reason: "EXCLUSIVE requires PINNED".into(),
            });
        }
        if self.flags.contains(LpelFlags::EXCLUSIVE) && !crate::affinity::can_set_exclusive() {
            return Err(LpelError::ExclusiveDenied);
        }
        Ok(())
    }

    /// Returns `true` if this configuration has the `EXCLUSIVE` flag set.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.flags.contains(LpelFlags::EXCLUSIVE)
    }

    /// Returns `true` if this configuration has the `PINNED` flag set.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.flags.contains(LpelFlags::PINNED)
    }

    /// The CPU indices reserved for workers: `[0, proc_workers)`.
    #[must_use]
    pub fn worker_cpu_set(&self) -> std::ops::Range<usize> {
        0..self.proc_workers
    }

    /// The CPU indices available to non-worker threads.
    ///
    /// When `proc_others == 0` this folds back onto the worker set, sharing cores with
    /// workers rather than leaving "other" threads unassignable.
    #[must_use]
    pub fn other_cpu_set(&self) -> std::ops::Range<usize> {
        if self.proc_others == 0 {
            self.worker_cpu_set()
        } else {
            self.proc_workers..(self.proc_workers + self.proc_others)
        }
    }
}

/// Builder for [`LpelConfig`], following the same fluent style as the rest of the crate's
/// configuration surface.
#[derive(Debug, Clone)]
pub struct LpelConfigBuilder {
    config: LpelConfig,
}

impl LpelConfigBuilder {
    /// Sets the number of cores reserved exclusively for workers.
    #[must_use]
    pub fn proc_workers(mut self, proc_workers: usize) -> Self {
        self.config.proc_workers = proc_workers;
        self
    }

    /// Sets the number of additional cores available to non-worker threads.
    #[must_use]
    pub fn proc_others(mut self, proc_others: usize) -> Self {
        self.config.proc_others = proc_others;
        self
    }

    /// Sets the flag bitset directly, replacing any previously set flags.
    #[must_use]
    pub fn flags(mut self, flags: LpelFlags) -> Self {
        self.config.flags = flags;
        self
    }

    /// Sets the opaque `node` value passed through to workers.
    #[must_use]
    pub fn node(mut self, node: i32) -> Self {
        self.config.node = node;
        self
    }

    /// Finishes the builder. Does not validate — call [`LpelConfig::validate`] (or
    /// [`crate::Lpel::init`], which validates internally) before using the result.
    #[must_use]
    pub fn build(self) -> LpelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_for_one_core() {
        let cfg = LpelConfig::builder(1).build();
        assert!(cfg.validate(1).is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg = LpelConfig::builder(0).build();
        assert!(matches!(
            cfg.validate(4),
            Err(LpelError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_oversubscribed_cores() {
        let cfg = LpelConfig::builder(4).proc_others(4).build();
        assert!(matches!(
            cfg.validate(4),
            Err(LpelError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_exclusive_without_pinned() {
        let cfg = LpelConfig::builder(1).flags(LpelFlags::EXCLUSIVE).build();
        assert!(matches!(
            cfg.validate(4),
            Err(LpelError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn other_cpu_set_folds_back_onto_workers_when_empty() {
        let cfg = LpelConfig::builder(2).build();
        assert_eq!(cfg.other_cpu_set(), cfg.worker_cpu_set());
    }

    #[test]
    fn other_cpu_set_is_disjoint_when_configured() {
        let cfg = LpelConfig::builder(2).proc_others(2).build();
        assert_eq!(cfg.worker_cpu_set(), 0..2);
        assert_eq!(cfg.other_cpu_set(), 2..4);
    }
}
