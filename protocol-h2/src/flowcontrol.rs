//! Flow-control window accounting (RFC 9113 Section 5.2).

use crate::error::H2Error;
use crate::settings::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// A send or receive window. Signed because a SETTINGS change may push a
/// send window below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    available: i64,
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Self {
            available: i64::from(initial),
        }
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    /// Account for `len` flow-controlled bytes.
    pub fn consume(&mut self, len: u32) -> Result<(), H2Error> {
        let next = self.available - i64::from(len);
        if next < 0 {
            return Err(H2Error::FlowControl);
        }
        self.available = next;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn release(&mut self, increment: u32) -> Result<(), H2Error> {
        self.shift(i64::from(increment))
    }

    /// Apply the difference between an old and a new INITIAL_WINDOW_SIZE.
    pub fn shift(&mut self, delta: i64) -> Result<(), H2Error> {
        let next = self.available + delta;
        if next > i64::from(MAX_WINDOW_SIZE) {
            return Err(H2Error::FlowControl);
        }
        self.available = next;
        Ok(())
    }

    /// Increment that restores the window to `target` once at least half of
    /// it has been consumed; `None` while the window is still healthy.
    pub fn refill(&self, target: u32) -> Option<u32> {
        let target = i64::from(target);
        if self.available > target / 2 {
            return None;
        }
        u32::try_from(target - self.available).ok().filter(|n| *n > 0)
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}
