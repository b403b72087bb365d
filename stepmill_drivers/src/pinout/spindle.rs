//! Spindle and coolant pin assignments.
use super::PinDef;
use super::{PinMode, Port};

/// Spindle PWM output, TIM3 channel 1.
pub const SPINDLE_PWM: PinDef = PinDef {
    port: Port::B,
    pin: 7,
    mode: PinMode::Alt(10),
};

/// Spindle rotation direction output.
pub const SPINDLE_DIR: PinDef = PinDef {
    port: Port::B,
    pin: 8,
    mode: PinMode::Output,
};

/// Flood coolant relay output.
pub const COOLANT_FLOOD: PinDef = PinDef {
    port: Port::B,
    pin: 9,
    mode: PinMode::Output,
};

/// Mist coolant relay output.
pub const COOLANT_MIST: PinDef = PinDef {
    port: Port::B,
    pin: 10,
    mode: PinMode::Output,
};
