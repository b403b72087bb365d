//! Motion-control position bookkeeping.
//!
//! Every motion passes through here before reaching the planner. This layer
//! owns the last queued stepper position (which runs ahead of the realtime
//! position by however much is buffered), turns absolute targets into
//! relative step requests and inserts backlash take-up moves on direction
//! reversals.

use crate::config::{AXIS_COUNT, STEPPER_COUNT};
use crate::settings::Settings;
use crate::sync::RtSignals;

/// Caller-supplied parameters of one motion.
#[derive(Debug, Clone, Copy)]
pub struct MotionData {
    /// Programmed feed rate (mm/min).
    pub feed: f32,
    /// Spindle target, signed RPM.
    pub spindle: i16,
    pub coolant: u8,
    /// Dwell before the motion (ms).
    pub dwell_ms: u32,
    pub exact_stop: bool,
    pub synched: bool,
    pub allow_overrides: bool,
}

impl Default for MotionData {
    fn default() -> Self {
        Self {
            feed: 0.0,
            spindle: 0,
            coolant: 0,
            dwell_ms: 0,
            exact_stop: false,
            synched: false,
            allow_overrides: true,
        }
    }
}

/// Fully resolved planner input, in stepper space.
#[derive(Debug, Clone, Copy)]
pub struct MotionRequest {
    pub steps: [u32; STEPPER_COUNT],
    pub dirbits: u8,
    pub main_stepper: u8,
    pub total_steps: u32,
    /// Feed along the dominant stepper (st/min).
    pub feed: f32,
    /// Converts st/s back into mm/min for reporting.
    pub feed_conversion: f32,
    /// Unit direction vector in axis space, for junction angles.
    pub dir_vect: [f32; AXIS_COUNT],
    pub spindle: i16,
    pub coolant: u8,
    pub exact_stop: bool,
    pub backlash: bool,
    pub allow_overrides: bool,
    pub synched: bool,
}

impl Default for MotionRequest {
    fn default() -> Self {
        Self {
            steps: [0; STEPPER_COUNT],
            dirbits: 0,
            main_stepper: 0,
            total_steps: 0,
            feed: 0.0,
            feed_conversion: 0.0,
            dir_vect: [0.0; AXIS_COUNT],
            spindle: 0,
            coolant: 0,
            exact_stop: false,
            backlash: false,
            allow_overrides: true,
            synched: false,
        }
    }
}

pub struct MotionControl {
    last_step_pos: [i32; STEPPER_COUNT],
    last_dirbits: u8,
    check_mode: bool,
    probe_position: [i32; STEPPER_COUNT],
}

impl MotionControl {
    pub const fn new() -> Self {
        Self {
            last_step_pos: [0; STEPPER_COUNT],
            last_dirbits: 0,
            check_mode: false,
            probe_position: [0; STEPPER_COUNT],
        }
    }

    /// Re-anchors the queued position on the realtime one. Called whenever
    /// buffered motion was flushed instead of executed.
    pub fn sync_position(&mut self, signals: &RtSignals) {
        self.last_step_pos = signals.pos.snapshot();
    }

    pub fn last_step_pos(&self) -> &[i32; STEPPER_COUNT] {
        &self.last_step_pos
    }

    pub fn set_last_step_pos(&mut self, steps: &[i32; STEPPER_COUNT]) {
        self.last_step_pos = *steps;
    }

    /// Check mode runs the full validation path but queues nothing.
    pub fn check_mode(&self) -> bool {
        self.check_mode
    }

    pub fn toggle_check_mode(&mut self) -> bool {
        self.check_mode = !self.check_mode;
        self.check_mode
    }

    pub fn capture_probe(&mut self, signals: &RtSignals) {
        self.probe_position = signals.pos.snapshot();
    }

    pub fn probe_position(&self) -> &[i32; STEPPER_COUNT] {
        &self.probe_position
    }

    /// Builds the planner request for one line segment ending at
    /// `step_new_pos` and advances the queued position. When a stepper
    /// reverses against configured backlash, a take-up request that must be
    /// queued first is returned alongside.
    #[allow(clippy::too_many_arguments)]
    pub fn segment_requests(
        &mut self,
        settings: &Settings,
        step_new_pos: &[i32; STEPPER_COUNT],
        dirbits: u8,
        feed: f32,
        feed_conversion: f32,
        dir_vect: [f32; AXIS_COUNT],
        data: &MotionData,
    ) -> (Option<MotionRequest>, MotionRequest) {
        let mut req = MotionRequest {
            dirbits,
            feed,
            feed_conversion,
            dir_vect,
            spindle: data.spindle,
            coolant: data.coolant,
            exact_stop: data.exact_stop,
            allow_overrides: data.allow_overrides,
            synched: data.synched,
            ..MotionRequest::default()
        };
        for i in 0..STEPPER_COUNT {
            let steps = (step_new_pos[i] - self.last_step_pos[i]).unsigned_abs();
            req.steps[i] = steps;
            if req.total_steps < steps {
                req.total_steps = steps;
                req.main_stepper = i as u8;
            }
        }
        self.last_step_pos = *step_new_pos;

        let reversed = self.last_dirbits ^ dirbits;
        let mut backlash = None;
        if reversed != 0 {
            let mut take_up = MotionRequest {
                dirbits,
                spindle: data.spindle,
                coolant: data.coolant,
                feed: f32::MAX,
                feed_conversion,
                backlash: true,
                allow_overrides: data.allow_overrides,
                ..MotionRequest::default()
            };
            for i in 0..STEPPER_COUNT {
                if reversed & (1 << i) != 0 {
                    let steps =
                        libm::roundf(settings.backlash_mm[i] * settings.step_per_mm[i]) as u32;
                    take_up.steps[i] = steps;
                    if take_up.total_steps < steps {
                        take_up.total_steps = steps;
                        take_up.main_stepper = i as u8;
                    }
                }
            }
            if take_up.total_steps != 0 {
                backlash = Some(take_up);
            }
            self.last_dirbits = dirbits;
        }

        (backlash, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_request_measures_from_last_position() {
        let settings = Settings::default();
        let mut mc = MotionControl::new();
        mc.set_last_step_pos(&[100, 0, 0, 0, 0, 0]);

        let target = [400, -50, 0, 0, 0, 0];
        // stepper 1 moves negative
        let dirbits = 0b10;
        let (backlash, req) = mc.segment_requests(
            &settings,
            &target,
            dirbits,
            1000.0,
            1.0,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &MotionData::default(),
        );
        assert!(backlash.is_none());
        assert_eq!(req.steps[0], 300);
        assert_eq!(req.steps[1], 50);
        assert_eq!(req.total_steps, 300);
        assert_eq!(req.main_stepper, 0);
        assert_eq!(mc.last_step_pos(), &target);
    }

    #[test]
    fn direction_reversal_inserts_backlash_take_up() {
        let mut settings = Settings::default();
        settings.backlash_mm[0] = 0.1;
        let mut mc = MotionControl::new();

        // first move sets the direction baseline without take-up steps
        let (first, _) = mc.segment_requests(
            &settings,
            &[100, 0, 0, 0, 0, 0],
            0,
            1000.0,
            1.0,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &MotionData::default(),
        );
        assert!(first.is_none());

        // reversal on stepper 0
        let (backlash, req) = mc.segment_requests(
            &settings,
            &[50, 0, 0, 0, 0, 0],
            0b1,
            1000.0,
            1.0,
            [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &MotionData::default(),
        );
        let take_up = backlash.unwrap();
        assert!(take_up.backlash);
        // 0.1 mm at 250 st/mm
        assert_eq!(take_up.steps[0], 25);
        assert_eq!(take_up.main_stepper, 0);
        assert_eq!(req.steps[0], 50);
    }

    #[test]
    fn repeated_direction_adds_no_take_up() {
        let mut settings = Settings::default();
        settings.backlash_mm[0] = 0.1;
        let mut mc = MotionControl::new();
        mc.segment_requests(
            &settings,
            &[100, 0, 0, 0, 0, 0],
            0,
            1000.0,
            1.0,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &MotionData::default(),
        );
        let (backlash, _) = mc.segment_requests(
            &settings,
            &[200, 0, 0, 0, 0, 0],
            0,
            1000.0,
            1.0,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &MotionData::default(),
        );
        assert!(backlash.is_none());
    }

    #[test]
    fn check_mode_toggles() {
        let mut mc = MotionControl::new();
        assert!(!mc.check_mode());
        assert!(mc.toggle_check_mode());
        assert!(!mc.toggle_check_mode());
    }
}
