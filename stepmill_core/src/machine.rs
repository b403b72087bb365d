//! Execution state encoding, alarm codes and the realtime command channel.

/// Execution state bitmask. Several bits can be active at once; the machine is
/// idle only when the whole mask is zero.
pub mod exec {
    pub const IDLE: u8 = 0;
    /// Steps are being generated.
    pub const RUN: u8 = 1;
    /// Controlled deceleration to a stop is in progress or complete.
    pub const HOLD: u8 = 2;
    pub const JOG: u8 = 4;
    pub const HOMING: u8 = 8;
    /// Machine halted in an unknown position. Cleared by unlock or homing.
    pub const HALT: u8 = 16;
    pub const DOOR: u8 = 32;
    /// Emergency stop. Cleared only by a full reset.
    pub const KILL: u8 = 64;
    /// Ramp-back-up window right after a hold is released.
    pub const RESUMING: u8 = 128;

    pub const ALARM: u8 = HALT | DOOR | KILL;
    pub const GCODE_LOCKED: u8 = ALARM | HOMING | JOG;
    pub const ALL: u8 = 0xFF;
}

/// Control input mask bits reported by [`crate::hal::MachineIo::controls`].
pub mod control {
    pub const ESTOP: u8 = 1;
    pub const SAFETY_DOOR: u8 = 2;
    pub const FEED_HOLD: u8 = 4;
    pub const CYCLE_START: u8 = 8;
}

/// Pending realtime state commands, accumulated atomically and drained once
/// per task-loop iteration.
pub mod rt_cmd {
    pub const RESET: u8 = 1;
    pub const SAFETY_DOOR: u8 = 2;
    pub const FEED_HOLD: u8 = 4;
    pub const JOG_CANCEL: u8 = 8;
    pub const CYCLE_START: u8 = 16;
    /// A limit switch fired outside of homing.
    pub const LIMITS_HIT: u8 = 32;
}

/// Pending feed/rapid override commands.
pub mod feed_cmd {
    pub const FEED_100: u8 = 1;
    pub const FEED_INC_COARSE: u8 = 2;
    pub const FEED_DEC_COARSE: u8 = 4;
    pub const FEED_INC_FINE: u8 = 8;
    pub const FEED_DEC_FINE: u8 = 16;
    pub const RAPID_100: u8 = 32;
    pub const RAPID_50: u8 = 64;
    pub const RAPID_25: u8 = 128;
}

/// Pending spindle/coolant override commands.
pub mod tool_cmd {
    pub const SPINDLE_100: u8 = 1;
    pub const SPINDLE_INC_COARSE: u8 = 2;
    pub const SPINDLE_DEC_COARSE: u8 = 4;
    pub const SPINDLE_INC_FINE: u8 = 8;
    pub const SPINDLE_DEC_FINE: u8 = 16;
    pub const COOLANT_FLOOD_TOGGLE: u8 = 32;
    pub const COOLANT_MIST_TOGGLE: u8 = 64;
}

/// Single-byte immediate commands accepted from the outside (serial layer).
pub mod cmd_code {
    pub const RESET: u8 = 0x18;
    pub const CYCLE_START: u8 = b'~';
    pub const FEED_HOLD: u8 = b'!';
    pub const SAFETY_DOOR: u8 = 0x84;
    pub const JOG_CANCEL: u8 = 0x85;
    pub const FEED_100: u8 = 0x90;
    pub const FEED_INC_COARSE: u8 = 0x91;
    pub const FEED_DEC_COARSE: u8 = 0x92;
    pub const FEED_INC_FINE: u8 = 0x93;
    pub const FEED_DEC_FINE: u8 = 0x94;
    pub const RAPID_100: u8 = 0x95;
    pub const RAPID_50: u8 = 0x96;
    pub const RAPID_25: u8 = 0x97;
    pub const SPINDLE_100: u8 = 0x99;
    pub const SPINDLE_INC_COARSE: u8 = 0x9A;
    pub const SPINDLE_DEC_COARSE: u8 = 0x9B;
    pub const SPINDLE_INC_FINE: u8 = 0x9C;
    pub const SPINDLE_DEC_FINE: u8 = 0x9D;
    pub const COOLANT_FLOOD_TOGGLE: u8 = 0xA0;
    pub const COOLANT_MIST_TOGGLE: u8 = 0xA1;
}

/// Alarm codes latched when the machine trips into an alarm state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Alarm {
    None = 0,
    HardLimit = 1,
    SoftLimit = 2,
    AbortCycle = 3,
    ProbeFailInitial = 4,
    ProbeFailContact = 5,
    HomingFailReset = 6,
    HomingFailDoor = 7,
    HomingFailLimitActive = 8,
    HomingFailApproach = 9,
    EmergencyStop = 10,
}

impl Alarm {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Alarm::HardLimit,
            2 => Alarm::SoftLimit,
            3 => Alarm::AbortCycle,
            4 => Alarm::ProbeFailInitial,
            5 => Alarm::ProbeFailContact,
            6 => Alarm::HomingFailReset,
            7 => Alarm::HomingFailDoor,
            8 => Alarm::HomingFailLimitActive,
            9 => Alarm::HomingFailApproach,
            10 => Alarm::EmergencyStop,
            _ => Alarm::None,
        }
    }
}

/// Errors surfaced by fallible motion operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Target lies outside the soft-limit envelope.
    TravelExceeded,
    /// Target is unreachable for the active kinematics.
    OutOfReach,
    /// Motion is locked out by an alarm, homing cycle or jog.
    Locked,
    /// The machine was killed while the operation was in flight.
    Killed,
    /// Homing attempted on an axis without a mapped limit switch.
    NoLimitSwitch,
}
