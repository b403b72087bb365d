//! Compile-time configuration of the motion pipeline.
//!
//! Values here are build-time tunables; everything runtime-adjustable lives in
//! [`crate::settings::Settings`]. Invalid combinations fail the build through
//! the const assertions at the bottom of this file.

/// Number of physical step/dir channels driven by the step interrupt.
pub const STEPPER_COUNT: usize = 6;

/// Number of machine axes exposed to the motion layer.
pub const AXIS_COUNT: usize = 6;

/// Queued look-ahead motion blocks.
pub const PLANNER_BUFFER_SIZE: usize = 20;

/// Capacity of the segment queue between the generator and the step interrupt.
pub const ITP_QUEUE_SIZE: usize = 8;

/// Rate at which the velocity profile is integrated into segments (Hz).
pub const INTERPOLATOR_FREQ: f32 = 100.0;

/// Duration of one integration slice (s).
pub const INTERPOLATOR_DELTA_T: f32 = 1.0 / INTERPOLATOR_FREQ;

/// Highest step rate the hardware timer is programmed for (Hz).
pub const F_STEP_MAX: f32 = 200_000.0;

/// Lowest step rate the hardware timer is programmed for (Hz).
pub const F_STEP_MIN: f32 = 4.0;

/// Dynamic step spread: logical step resolution doubles while the step rate
/// sits below [`DSS_CUTOFF_FREQ`], up to this many doublings.
pub const DSS_MAX_OVERSAMPLING: u8 = 3;

/// Step rate (Hz) under which dynamic step spread kicks in.
pub const DSS_CUTOFF_FREQ: f32 = 500.0;

/// Hard bound on steps per queued line. The motion layer splits longer moves
/// before they reach the planner so the doubled-and-oversampled step counters
/// never overflow 32 bits.
pub const MAX_STEPS_PER_LINE_BITS: u32 = 30 - DSS_MAX_OVERSAMPLING as u32;
pub const MAX_STEPS_PER_LINE: u32 = 1 << MAX_STEPS_PER_LINE_BITS;

/// Chord length (mm) used to re-segment lines on kinematics whose
/// actuator-space path of a straight line is curved.
pub const DELTA_MOTION_SEGMENT_SIZE: f32 = 1.0;

const _: () = assert!(STEPPER_COUNT >= 1 && STEPPER_COUNT <= 8);
const _: () = assert!(AXIS_COUNT >= 1 && AXIS_COUNT <= STEPPER_COUNT);
const _: () = assert!(PLANNER_BUFFER_SIZE >= 2);
const _: () = assert!(ITP_QUEUE_SIZE >= 4);
const _: () = assert!(DSS_MAX_OVERSAMPLING <= 5);
const _: () = assert!(MAX_STEPS_PER_LINE_BITS >= 16);
