//! Hardware seams consumed by the motion pipeline.
//!
//! The core never touches registers; boards implement these traits once and
//! the pipeline stays MCU-agnostic. Host tests implement them with mocks.

use crate::config::{F_STEP_MAX, F_STEP_MIN};

/// One hardware timer period: reload value plus prescaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerPeriod {
    pub counter: u16,
    pub prescaler: u16,
}

/// Converts step rates into timer reload values for a given timer input clock.
#[derive(Debug, Clone, Copy)]
pub struct TimerConv {
    clock_hz: u32,
}

impl TimerConv {
    pub const fn new(clock_hz: u32) -> Self {
        Self { clock_hz }
    }

    /// Quantizes a step rate into a counter/prescaler pair, clamped to the
    /// usable step rate window. The prescaler is raised just enough for the
    /// reload value to fit 16 bits.
    pub fn freq_to_clocks(&self, freq: f32) -> TimerPeriod {
        let freq = freq.clamp(F_STEP_MIN, F_STEP_MAX);
        let total = (self.clock_hz as f32 / freq) as u32;
        let prescaler = (total >> 16) as u16;
        let counter = total / (prescaler as u32 + 1);
        TimerPeriod {
            counter: counter.max(1) as u16,
            prescaler,
        }
    }

    /// Actual step rate realized by a quantized period.
    pub fn clocks_to_freq(&self, period: TimerPeriod) -> f32 {
        let total = (period.prescaler as u32 + 1) * period.counter.max(1) as u32;
        self.clock_hz as f32 / total as f32
    }
}

/// Step generation timer. The implementation fires one interrupt per period
/// plus the paired pulse-reset event.
pub trait ItpTimer {
    fn start(&mut self, period: TimerPeriod);
    fn change(&mut self, period: TimerPeriod);
    fn stop(&mut self);
}

/// Logical step/dir/limit/control pin bank.
///
/// All masks are logical stepper/axis bit positions; the implementation maps
/// them onto physical pins and applies the configured polarity inversions.
pub trait MachineIo {
    /// Drives the masked step lines to their active edge.
    fn toggle_steps(&mut self, stepbits: u8);
    /// Returns every step line to its idle level.
    fn end_step_pulse(&mut self);
    fn set_dirs(&mut self, dirbits: u8);
    fn enable_steppers(&mut self, mask: u8);
    /// Active limit switches as an axis mask.
    fn limits(&mut self) -> u8;
    /// Active control inputs (`machine::control` bits).
    fn controls(&mut self) -> u8;
    fn probe(&mut self) -> bool;
}

/// Spindle/laser tool contract. Called at block and segment boundaries to keep
/// tool output synchronized with motion.
pub trait Tool {
    fn startup(&mut self);
    fn shutdown(&mut self);
    fn set_speed(&mut self, speed: i16);
    fn set_coolant(&mut self, mask: u8);
    fn speed(&self) -> i16;
    fn pid_update(&mut self, _error: i16) {}
    fn pid_error(&self) -> i16 {
        0
    }
}

/// Millisecond tick source for debouncing and dwell timing.
pub trait Clock {
    fn millis(&self) -> u32;
}
