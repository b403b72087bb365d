//! Millisecond tick source backed by a counter the application increments
//! from a 1 kHz timer interrupt.

use core::sync::atomic::{AtomicU32, Ordering};

use stepmill_core::hal::Clock;

pub struct MilliClock {
    ticks: &'static AtomicU32,
}

impl MilliClock {
    pub const fn new(ticks: &'static AtomicU32) -> Self {
        Self { ticks }
    }
}

impl Clock for MilliClock {
    fn millis(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}
