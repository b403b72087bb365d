//! Runtime machine profile.
//!
//! One instance owned by the machine. Values mirror the classic Grbl-style
//! settings set; persistence is the host application's concern.

use crate::config::{AXIS_COUNT, STEPPER_COUNT};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Steps per millimeter, per stepper channel.
    pub step_per_mm: [f32; STEPPER_COUNT],
    /// Maximum feed rate per stepper channel (mm/min).
    pub max_feed_rate: [f32; STEPPER_COUNT],
    /// Acceleration limit per stepper channel (mm/s^2).
    pub acceleration: [f32; STEPPER_COUNT],
    /// Travel envelope per axis (mm), measured away from the home position.
    pub max_distance: [f32; AXIS_COUNT],
    /// Cornering aggressiveness factor applied to the junction half-angle
    /// speed limit. Zero allows full stops only at sharp corners.
    pub junction_factor: f32,

    pub step_invert_mask: u8,
    pub dir_invert_mask: u8,
    pub step_enable_invert: u8,
    pub limits_invert_mask: u8,
    pub probe_invert: bool,

    pub hard_limits_enabled: bool,
    pub soft_limits_enabled: bool,

    pub homing_enabled: bool,
    pub homing_dir_invert_mask: u8,
    /// Seek feed for the first homing approach (mm/min).
    pub homing_fast_feed: f32,
    /// Release feed for the slow back-off phase (mm/min).
    pub homing_slow_feed: f32,
    /// Pull-off distance from the switch after homing (mm).
    pub homing_offset: f32,
    pub debounce_ms: u32,

    pub spindle_max_rpm: f32,
    pub spindle_min_rpm: f32,

    /// Backlash taken up on direction reversal, per axis (mm). Zero disables.
    pub backlash_mm: [f32; AXIS_COUNT],
    /// Skew compensation factors. Zero disables.
    pub skew_xy_factor: f32,
    pub skew_xz_factor: f32,
    pub skew_yz_factor: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_per_mm: [250.0; STEPPER_COUNT],
            max_feed_rate: [500.0; STEPPER_COUNT],
            acceleration: [10.0; STEPPER_COUNT],
            max_distance: [200.0; AXIS_COUNT],
            junction_factor: 0.2,
            step_invert_mask: 0,
            dir_invert_mask: 0,
            step_enable_invert: 0,
            limits_invert_mask: 0,
            probe_invert: false,
            hard_limits_enabled: false,
            soft_limits_enabled: false,
            homing_enabled: false,
            homing_dir_invert_mask: 0,
            homing_fast_feed: 50.0,
            homing_slow_feed: 10.0,
            homing_offset: 2.0,
            debounce_ms: 250,
            spindle_max_rpm: 1000.0,
            spindle_min_rpm: 0.0,
            backlash_mm: [0.0; AXIS_COUNT],
            skew_xy_factor: 0.0,
            skew_xz_factor: 0.0,
            skew_yz_factor: 0.0,
        }
    }
}
