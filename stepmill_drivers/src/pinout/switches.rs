//! Limit switch, control input and probe pin assignments.
use super::PinDef;
use super::{PinMode, Port};

/// Limit switch inputs for the X, Y and Z axes.
pub const LIMITS: [PinDef; 3] = [
    PinDef {
        port: Port::C,
        pin: 0,
        mode: PinMode::Input,
    },
    PinDef {
        port: Port::C,
        pin: 1,
        mode: PinMode::Input,
    },
    PinDef {
        port: Port::C,
        pin: 2,
        mode: PinMode::Input,
    },
];

/// Emergency stop input.
pub const ESTOP: PinDef = PinDef {
    port: Port::C,
    pin: 4,
    mode: PinMode::Input,
};

/// Safety door input.
pub const SAFETY_DOOR: PinDef = PinDef {
    port: Port::C,
    pin: 5,
    mode: PinMode::Input,
};

/// Feed hold input.
pub const FEED_HOLD: PinDef = PinDef {
    port: Port::C,
    pin: 6,
    mode: PinMode::Input,
};

/// Cycle start / resume input.
pub const CYCLE_START: PinDef = PinDef {
    port: Port::C,
    pin: 7,
    mode: PinMode::Input,
};

/// Tool probe input.
pub const PROBE: PinDef = PinDef {
    port: Port::C,
    pin: 8,
    mode: PinMode::Input,
};
