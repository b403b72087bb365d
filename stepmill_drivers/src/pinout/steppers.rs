//! Step, direction and enable pin assignments for the stepper channels.
use super::PinDef;
use super::{PinMode, Port};

/// Step pulse pins, one per stepper channel.
pub const STEP: [PinDef; 6] = [
    PinDef {
        port: Port::A,
        pin: 0,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::A,
        pin: 1,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::A,
        pin: 2,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::A,
        pin: 3,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::A,
        pin: 4,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::A,
        pin: 5,
        mode: PinMode::Output,
    },
];

/// Direction pins, one per stepper channel.
pub const DIR: [PinDef; 6] = [
    PinDef {
        port: Port::B,
        pin: 0,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::B,
        pin: 1,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::B,
        pin: 2,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::B,
        pin: 3,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::B,
        pin: 4,
        mode: PinMode::Output,
    },
    PinDef {
        port: Port::B,
        pin: 5,
        mode: PinMode::Output,
    },
];

/// Shared enable line for all stepper drivers.
pub const ENABLE: PinDef = PinDef {
    port: Port::B,
    pin: 6,
    mode: PinMode::Output,
};
