//! Board-level drivers implementing the `stepmill_core` hardware traits for
//! STM32G4 targets.

#![no_std]

pub mod clock;
pub mod machine_io;
pub mod pinout;
pub mod spindle;
pub mod step_timer;
