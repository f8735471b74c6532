//! Small init-once marker used to guard global setup in [`crate::init`].

use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, `'static`-friendly boolean flag with acquire/release semantics.
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn test(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release)
    }

    pub fn unset(&self) {
        self.0.store(false, Ordering::Release)
    }
}
