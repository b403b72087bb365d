//! Motion pipeline for stepper CNC machines.
//!
//! The pipeline has four stages. Motions enter through [`Machine::line`],
//! which resolves kinematics and soft limits and feeds the look-ahead
//! [`planner`]. The [`interpolator`] slices planner blocks into fixed-rate
//! segments in main context; the step-interrupt side
//! ([`interpolator::step_driver`]) turns segments into step pulses and keeps
//! the realtime position. [`Machine::dotasks`] is the main task loop gluing
//! the stages together and reacting to limit switches, control inputs and
//! realtime commands.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod hal;
pub mod interpolator;
pub mod kinematics;
pub mod machine;
pub mod motion;
pub mod planner;
pub mod settings;
pub mod sync;

use crate::config::{AXIS_COUNT, MAX_STEPS_PER_LINE, MAX_STEPS_PER_LINE_BITS, STEPPER_COUNT};
use crate::hal::{Clock, ItpTimer, MachineIo, TimerConv, Tool};
use crate::interpolator::{Interpolator, SegmentProducer, StepMode};
use crate::kinematics::{Kinematics, AXIS_Z};
use crate::machine::{cmd_code, control, exec, feed_cmd, rt_cmd, tool_cmd, Alarm, Status};
use crate::motion::{MotionControl, MotionData};
use crate::planner::Planner;
use crate::settings::Settings;
use crate::sync::RtSignals;

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::info!($($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);
    }};
}

/// Maps a single-byte realtime command onto the pending-command channels.
/// Safe to call from any context, including a serial receive interrupt.
/// Returns false for bytes that are not realtime commands.
pub fn enqueue_realtime_command(signals: &RtSignals, code: u8) -> bool {
    match code {
        cmd_code::RESET => signals.push_rt_cmd(rt_cmd::RESET),
        cmd_code::CYCLE_START => signals.push_rt_cmd(rt_cmd::CYCLE_START),
        cmd_code::FEED_HOLD => signals.push_rt_cmd(rt_cmd::FEED_HOLD),
        cmd_code::SAFETY_DOOR => signals.push_rt_cmd(rt_cmd::SAFETY_DOOR),
        cmd_code::JOG_CANCEL => signals.push_rt_cmd(rt_cmd::JOG_CANCEL),
        cmd_code::FEED_100 => signals.push_feed_cmd(feed_cmd::FEED_100),
        cmd_code::FEED_INC_COARSE => signals.push_feed_cmd(feed_cmd::FEED_INC_COARSE),
        cmd_code::FEED_DEC_COARSE => signals.push_feed_cmd(feed_cmd::FEED_DEC_COARSE),
        cmd_code::FEED_INC_FINE => signals.push_feed_cmd(feed_cmd::FEED_INC_FINE),
        cmd_code::FEED_DEC_FINE => signals.push_feed_cmd(feed_cmd::FEED_DEC_FINE),
        cmd_code::RAPID_100 => signals.push_feed_cmd(feed_cmd::RAPID_100),
        cmd_code::RAPID_50 => signals.push_feed_cmd(feed_cmd::RAPID_50),
        cmd_code::RAPID_25 => signals.push_feed_cmd(feed_cmd::RAPID_25),
        cmd_code::SPINDLE_100 => signals.push_tool_cmd(tool_cmd::SPINDLE_100),
        cmd_code::SPINDLE_INC_COARSE => signals.push_tool_cmd(tool_cmd::SPINDLE_INC_COARSE),
        cmd_code::SPINDLE_DEC_COARSE => signals.push_tool_cmd(tool_cmd::SPINDLE_DEC_COARSE),
        cmd_code::SPINDLE_INC_FINE => signals.push_tool_cmd(tool_cmd::SPINDLE_INC_FINE),
        cmd_code::SPINDLE_DEC_FINE => signals.push_tool_cmd(tool_cmd::SPINDLE_DEC_FINE),
        cmd_code::COOLANT_FLOOD_TOGGLE => signals.push_tool_cmd(tool_cmd::COOLANT_FLOOD_TOGGLE),
        cmd_code::COOLANT_MIST_TOGGLE => signals.push_tool_cmd(tool_cmd::COOLANT_MIST_TOGGLE),
        _ => return false,
    }
    true
}

/// The machine controller. Owns every main-context stage of the pipeline plus
/// the board peripherals; shares [`RtSignals`] with the step interrupt.
pub struct Machine<IO, TIM, TL, CLK> {
    pub settings: Settings,
    kinematics: Kinematics,
    planner: Planner,
    itp: Interpolator,
    mc: MotionControl,
    signals: &'static RtSignals,
    io: IO,
    timer: TIM,
    tool: TL,
    clock: CLK,
    last_limits: u8,
    last_controls: u8,
    homing_limit_filter: u8,
    probe_enabled: bool,
}

impl<IO, TIM, TL, CLK> Machine<IO, TIM, TL, CLK>
where
    IO: MachineIo,
    TIM: ItpTimer,
    TL: Tool,
    CLK: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        kinematics: Kinematics,
        signals: &'static RtSignals,
        sgm_out: SegmentProducer,
        conv: TimerConv,
        io: IO,
        timer: TIM,
        tool: TL,
        clock: CLK,
    ) -> Self {
        Self {
            settings,
            kinematics,
            planner: Planner::new(),
            itp: Interpolator::new(sgm_out, signals, conv),
            mc: MotionControl::new(),
            signals,
            io,
            timer,
            tool,
            clock,
            last_limits: 0,
            last_controls: 0,
            homing_limit_filter: 0,
            probe_enabled: false,
        }
    }

    /// Brings the board into its powered idle state. A machine that requires
    /// homing starts halted until a homing cycle runs.
    pub fn init(&mut self) {
        self.tool.startup();
        self.io.enable_steppers(0xFF);
        self.mc.sync_position(self.signals);
        if self.settings.homing_enabled {
            self.signals.exec.set(exec::HALT);
        }
        self.itp.set_step_mode(StepMode::Default);
        log_info!("machine ready");
    }

    pub fn signals(&self) -> &'static RtSignals {
        self.signals
    }

    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.itp.set_step_mode(mode);
    }

    pub fn has_alarm(&self) -> bool {
        self.signals.alarm() != Alarm::None || self.signals.exec.get(exec::KILL) != 0
    }

    pub fn alarm_code(&self) -> Alarm {
        self.signals.alarm()
    }

    /// Feed rate currently executing (mm/min).
    pub fn rt_feed(&self) -> f32 {
        self.itp.rt_feed()
    }

    /// Feed/rapid/spindle override percentages.
    pub fn override_values(&self) -> (u8, u8, u8) {
        self.planner.ovr_values()
    }

    /// One iteration of the main task loop. Polls inputs, executes pending
    /// realtime commands, checks interlocking and feeds the interpolator.
    /// Returns false once the machine is killed.
    pub fn dotasks(&mut self) -> bool {
        self.poll_io();
        self.exec_rt_commands();
        if self.check_interlocking() {
            self.itp.run(
                &mut self.planner,
                &self.settings,
                &mut self.timer,
                &mut self.tool,
            );
        }
        self.signals.exec.get(exec::KILL) == 0
    }

    /// Samples limit, control and probe inputs and converts edges and levels
    /// into realtime commands and stops.
    fn poll_io(&mut self) {
        let limits = self.io.limits();
        let rising = limits & !self.last_limits;
        self.last_limits = limits;
        if rising != 0 {
            if self.signals.exec.get(exec::HOMING) != 0 {
                if rising & self.homing_limit_filter != 0 {
                    // end of a homing seek
                    self.itp.stop(&mut self.io, &mut self.timer);
                }
            } else if self.settings.hard_limits_enabled {
                self.signals.push_rt_cmd(rt_cmd::LIMITS_HIT);
                self.itp.stop(&mut self.io, &mut self.timer);
            }
        }

        let controls = self.io.controls();
        let pressed = controls & !self.last_controls;
        self.last_controls = controls;
        if controls & control::ESTOP != 0 {
            self.signals.push_rt_cmd(rt_cmd::RESET);
        }
        if controls & control::SAFETY_DOOR != 0 {
            self.signals.push_rt_cmd(rt_cmd::SAFETY_DOOR);
        }
        if controls & control::FEED_HOLD != 0 {
            self.signals.push_rt_cmd(rt_cmd::FEED_HOLD);
        }
        if pressed & control::CYCLE_START != 0 {
            self.signals.push_rt_cmd(rt_cmd::CYCLE_START);
        }

        if self.probe_enabled && (self.io.probe() != self.settings.probe_invert) {
            self.probe_enabled = false;
            self.mc.capture_probe(self.signals);
            // probe contact stops motion but the position stays trusted
            self.timer.stop();
            self.signals.exec.clear(exec::RUN);
        }
    }

    /// Drains and applies the pending realtime command channels.
    fn exec_rt_commands(&mut self) {
        let cmds = self.signals.take_rt_cmd();
        if cmds & rt_cmd::RESET != 0 {
            self.signals.exec.set(exec::KILL);
            self.stop_motion();
        }
        if cmds & rt_cmd::LIMITS_HIT != 0 && self.settings.hard_limits_enabled {
            self.alarm(Alarm::HardLimit);
        }
        if cmds & rt_cmd::SAFETY_DOOR != 0 {
            self.signals.exec.set(exec::HOLD | exec::DOOR);
        }
        if cmds & rt_cmd::FEED_HOLD != 0 {
            self.signals.exec.set(exec::HOLD);
        }
        if cmds & rt_cmd::JOG_CANCEL != 0 && self.signals.exec.get(exec::JOG) != 0 {
            self.signals.exec.set(exec::HOLD);
        }
        if cmds & rt_cmd::CYCLE_START != 0 {
            self.clear_exec_state(exec::HOLD);
        }

        let feed = self.signals.take_feed_cmd();
        if feed != 0 {
            let mut changed = false;
            if feed & feed_cmd::FEED_100 != 0 {
                changed |= self.planner.feed_ovr_reset();
            }
            if feed & feed_cmd::FEED_INC_COARSE != 0 {
                changed |= self.planner.feed_ovr_inc(10);
            }
            if feed & feed_cmd::FEED_DEC_COARSE != 0 {
                changed |= self.planner.feed_ovr_inc(-10);
            }
            if feed & feed_cmd::FEED_INC_FINE != 0 {
                changed |= self.planner.feed_ovr_inc(1);
            }
            if feed & feed_cmd::FEED_DEC_FINE != 0 {
                changed |= self.planner.feed_ovr_inc(-1);
            }
            if feed & feed_cmd::RAPID_100 != 0 {
                changed |= self.planner.rapid_ovr(100);
            }
            if feed & feed_cmd::RAPID_50 != 0 {
                changed |= self.planner.rapid_ovr(50);
            }
            if feed & feed_cmd::RAPID_25 != 0 {
                changed |= self.planner.rapid_ovr(25);
            }
            if changed {
                self.itp.update();
            }
        }

        let tools = self.signals.take_tool_cmd();
        if tools != 0 {
            if tools & tool_cmd::SPINDLE_100 != 0 {
                self.planner.spindle_ovr_reset();
            }
            if tools & tool_cmd::SPINDLE_INC_COARSE != 0 {
                self.planner.spindle_ovr_inc(10);
            }
            if tools & tool_cmd::SPINDLE_DEC_COARSE != 0 {
                self.planner.spindle_ovr_inc(-10);
            }
            if tools & tool_cmd::SPINDLE_INC_FINE != 0 {
                self.planner.spindle_ovr_inc(1);
            }
            if tools & tool_cmd::SPINDLE_DEC_FINE != 0 {
                self.planner.spindle_ovr_inc(-1);
            }
            if tools & tool_cmd::COOLANT_FLOOD_TOGGLE != 0 {
                self.planner.coolant_ovr_toggle(1);
            }
            if tools & tool_cmd::COOLANT_MIST_TOGGLE != 0 {
                self.planner.coolant_ovr_toggle(2);
            }
            if self.planner.is_empty() {
                // no motion queued; retarget the tool directly
                self.tool.set_speed(self.planner.spindle_output(&self.settings));
                self.tool.set_coolant(self.planner.coolant());
            } else {
                self.itp.update();
            }
        }
    }

    /// Security interlocking. Returns false when motion generation must stay
    /// suspended this iteration.
    fn check_interlocking(&mut self) -> bool {
        let exec_bits = self.signals.exec.get(exec::ALL);

        if exec_bits & exec::KILL != 0 {
            if exec_bits & exec::HOMING != 0 && self.signals.alarm() == Alarm::None {
                self.signals.set_alarm(Alarm::HomingFailReset);
            }
            if self.last_controls & control::ESTOP != 0 {
                self.signals.set_alarm(Alarm::EmergencyStop);
            } else if exec_bits & exec::RUN != 0 && self.signals.alarm() == Alarm::None {
                // kill while moving loses position
                self.signals.set_alarm(Alarm::AbortCycle);
            }
            return false;
        }

        if exec_bits & exec::DOOR != 0 && exec_bits & exec::HOMING != 0 {
            self.alarm(Alarm::HomingFailDoor);
            return false;
        }

        if exec_bits & exec::HALT != 0 && exec_bits & exec::RUN != 0 {
            if exec_bits & exec::HOMING == 0
                && self.settings.hard_limits_enabled
                && self.last_limits != 0
            {
                self.alarm(Alarm::HardLimit);
            } else {
                self.signals.exec.clear(exec::RUN);
            }
            return false;
        }

        if exec_bits & (exec::DOOR | exec::HOLD) != 0 && exec_bits & exec::RUN == 0 {
            // hold fully decelerated; make sure the stream is parked
            self.timer.stop();
            self.io.end_step_pulse();
            if exec_bits & (exec::HOMING | exec::JOG) != 0 {
                // jog and homing motions cannot resume, only abort
                self.itp.clear();
                self.planner.clear();
                self.mc.sync_position(self.signals);
                self.signals
                    .exec
                    .clear(exec::HOMING | exec::JOG | exec::HOLD);
            }
        }

        true
    }

    /// Trips the machine into an alarm state: motion dies, buffers flush and
    /// the alarm code latches until reset.
    pub fn alarm(&mut self, code: Alarm) {
        self.signals.exec.set(exec::KILL);
        self.stop_motion();
        self.signals.set_alarm(code);
        log_warn!("alarm {}", code as u8);
    }

    fn stop_motion(&mut self) {
        self.itp.stop(&mut self.io, &mut self.timer);
        self.itp.clear();
        self.planner.clear();
        self.mc.sync_position(self.signals);
        self.tool.set_speed(0);
        self.tool.set_coolant(0);
    }

    /// Condition-guarded exec flag clear: flags whose cause is still present
    /// stay set.
    fn clear_exec_state(&mut self, mask: u8) {
        let mut mask = mask;
        if self.last_controls & control::ESTOP != 0 {
            mask &= !exec::KILL;
        }
        if self.last_controls & control::SAFETY_DOOR != 0 {
            mask &= !(exec::DOOR | exec::HOLD);
        }
        if self.last_controls & control::FEED_HOLD != 0 {
            mask &= !exec::HOLD;
        }
        if self.signals.alarm() != Alarm::None
            || (self.settings.hard_limits_enabled
                && self.last_limits != 0
                && self.signals.exec.get(exec::HOMING) == 0)
        {
            mask &= !exec::HALT;
        }

        if mask & exec::HOLD != 0
            && self.signals.exec.get(exec::HOLD) != 0
            && self.signals.exec.get(exec::ALARM) == 0
        {
            // releasing an active hold: tools resync before steps resume
            self.signals.exec.set(exec::RESUMING);
            self.signals.exec.clear(exec::HOLD);
            self.tool.set_speed(self.planner.spindle_output(&self.settings));
            self.tool.set_coolant(self.planner.coolant());
            self.itp.update();
            self.signals.exec.clear(exec::RESUMING);
            mask &= !exec::HOLD;
        }

        self.signals.exec.clear(mask);
    }

    /// Clears recoverable alarm and hold states. `force` also wipes the
    /// latched alarm code. Returns true when the machine ends up unlocked.
    pub fn unlock(&mut self, force: bool) -> bool {
        if force {
            self.signals.set_alarm(Alarm::None);
        }
        self.clear_exec_state(exec::ALARM | exec::KILL | exec::HOLD);
        if self.signals.exec.get(exec::ALARM | exec::HOLD) != 0 {
            return false;
        }
        self.io.enable_steppers(0xFF);
        log_info!("machine unlocked");
        true
    }

    /// Machine position in axis space at the end of all queued motion.
    pub fn position(&self) -> Result<[f32; AXIS_COUNT], Status> {
        let mut axis = self
            .kinematics
            .apply_forward(&self.settings, self.mc.last_step_pos())?;
        self.kinematics.apply_reverse_transform(&self.settings, &mut axis);
        Ok(axis)
    }

    /// Realtime machine position reconstructed from the step counters.
    pub fn rt_position(&self) -> Result<[f32; AXIS_COUNT], Status> {
        let steps = self.signals.pos.snapshot();
        let mut axis = self.kinematics.apply_forward(&self.settings, &steps)?;
        self.kinematics.apply_reverse_transform(&self.settings, &mut axis);
        Ok(axis)
    }

    /// Overwrites the realtime position and re-anchors motion control on it.
    pub fn reset_rt_position(&mut self, axis: &[f32; AXIS_COUNT]) -> Result<(), Status> {
        let steps = self.kinematics.apply_inverse(&self.settings, axis)?;
        self.signals.pos.store(&steps);
        self.mc.sync_position(self.signals);
        Ok(())
    }

    /// Stepper-space probe trigger position captured by the last probe cycle.
    pub fn probe_position(&self) -> &[i32; STEPPER_COUNT] {
        self.mc.probe_position()
    }

    pub fn toggle_check_mode(&mut self) -> bool {
        self.mc.toggle_check_mode()
    }

    fn wait_planner_slot(&mut self) -> Result<(), Status> {
        while self.planner.is_full() {
            if !self.dotasks() {
                return Err(Status::Killed);
            }
        }
        Ok(())
    }

    /// Runs the task loop until every queued motion finished executing. A
    /// limit hit ends a homing seek early without failing.
    pub fn sync_motion(&mut self) -> Result<(), Status> {
        while !self.itp.is_empty() || !self.planner.is_empty() {
            if !self.dotasks() {
                return Err(Status::Killed);
            }
            let exec_bits = self.signals.exec.get(exec::HOMING | exec::HALT);
            if exec_bits == exec::HOMING | exec::HALT {
                break;
            }
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) -> Result<(), Status> {
        let start = self.clock.millis();
        while self.clock.millis().wrapping_sub(start) < ms {
            if !self.dotasks() {
                return Err(Status::Killed);
            }
        }
        Ok(())
    }

    /// Queues a straight-line motion to `target`. The target is adjusted in
    /// place by active kinematic transforms. Long lines and delta moves are
    /// split into smaller planner segments; backlash take-up moves are
    /// inserted on direction reversals.
    pub fn line(&mut self, target: &mut [f32; AXIS_COUNT], data: &MotionData) -> Result<(), Status> {
        let homing_or_jog = self.signals.exec.get(exec::JOG | exec::HOMING) != 0;
        if !homing_or_jog {
            self.kinematics.apply_transform(&self.settings, target);
        }
        let homing = self.signals.exec.get(exec::HOMING) != 0;
        if !self.kinematics.check_boundaries(&self.settings, target, homing) {
            if self.signals.exec.get(exec::JOG) != 0 {
                return Err(Status::TravelExceeded);
            }
            self.alarm(Alarm::SoftLimit);
            return Ok(());
        }

        if self.mc.check_mode() {
            return Ok(());
        }

        self.wait_planner_slot()?;

        let step_new_pos = self.kinematics.apply_inverse(&self.settings, target)?;
        let mut dirbits = 0u8;
        let mut max_steps = 0u32;
        for i in 0..STEPPER_COUNT {
            let delta = step_new_pos[i] - self.mc.last_step_pos()[i];
            if delta < 0 {
                dirbits |= 1 << i;
            }
            max_steps = max_steps.max(delta.unsigned_abs());
        }
        if max_steps == 0 {
            return Ok(());
        }

        let prev_target = self
            .kinematics
            .apply_forward(&self.settings, self.mc.last_step_pos())?;
        let mut motion_delta = [0.0f32; AXIS_COUNT];
        let mut dir_vect = [0.0f32; AXIS_COUNT];
        let mut dist_sqr = 0.0f32;
        for i in 0..AXIS_COUNT {
            motion_delta[i] = target[i] - prev_target[i];
            dir_vect[i] = motion_delta[i];
            dist_sqr += motion_delta[i] * motion_delta[i];
        }
        let dist = libm::sqrtf(dist_sqr);
        if dist <= 0.0 {
            return Ok(());
        }
        let inv_dist = 1.0 / dist;
        for value in dir_vect.iter_mut() {
            *value *= inv_dist;
        }

        // feed along the dominant stepper (st/min) and its inverse map back
        // to mm/min for realtime reporting
        let feed = max_steps as f32 * data.feed * inv_dist;
        let feed_conversion = 60.0 * dist / max_steps as f32;

        let mut line_segments: u32 = 1;
        if let Some(seg_len) = self.kinematics.motion_segment_len() {
            if dist > seg_len {
                line_segments = libm::ceilf(dist / seg_len) as u32;
            }
        }
        if max_steps > MAX_STEPS_PER_LINE {
            line_segments = line_segments.max(1 + (max_steps >> MAX_STEPS_PER_LINE_BITS));
        }
        if line_segments > 1 {
            let seg_inv = 1.0 / line_segments as f32;
            for value in motion_delta.iter_mut() {
                *value *= seg_inv;
            }
        }

        let mut seg_target = prev_target;
        for remaining in (0..line_segments).rev() {
            self.wait_planner_slot()?;
            let seg = if remaining != 0 {
                for i in 0..AXIS_COUNT {
                    seg_target[i] += motion_delta[i];
                }
                seg_target
            } else {
                *target
            };
            self.queue_segment(&seg, dirbits, feed, feed_conversion, dir_vect, data)?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_segment(
        &mut self,
        target: &[f32; AXIS_COUNT],
        dirbits: u8,
        feed: f32,
        feed_conversion: f32,
        dir_vect: [f32; AXIS_COUNT],
        data: &MotionData,
    ) -> Result<(), Status> {
        let step_new_pos = self.kinematics.apply_inverse(&self.settings, target)?;
        let (backlash, req) = self.mc.segment_requests(
            &self.settings,
            &step_new_pos,
            dirbits,
            feed,
            feed_conversion,
            dir_vect,
            data,
        );
        if let Some(take_up) = backlash {
            if self.planner.add_line(&self.settings, &take_up) {
                self.itp.update();
            }
            self.wait_planner_slot()?;
        }
        if self.planner.add_line(&self.settings, &req) {
            self.itp.update();
        }
        Ok(())
    }

    /// Queues a jog motion. Rejected while the machine is locked or running a
    /// non-jog program; targets outside the envelope are refused rather than
    /// alarmed.
    pub fn jog(&mut self, target: &mut [f32; AXIS_COUNT], data: &MotionData) -> Result<(), Status> {
        if self.signals.exec.get(exec::GCODE_LOCKED & !exec::JOG) != 0 {
            return Err(Status::Locked);
        }
        self.signals.exec.set(exec::JOG);
        let result = self.line(target, data);
        if result.is_err() {
            if self.planner.is_empty() && self.itp.is_empty() {
                self.signals.exec.clear(exec::JOG);
            }
        }
        result
    }

    /// Spindle/coolant change without motion: waits for the pipeline to drain
    /// and retargets the tool.
    pub fn update_tools(&mut self, data: &MotionData) -> Result<(), Status> {
        if self.mc.check_mode() {
            return Ok(());
        }
        self.sync_motion()?;
        self.planner.sync_tools(data.spindle, data.coolant);
        self.tool.set_speed(self.planner.spindle_output(&self.settings));
        self.tool.set_coolant(self.planner.coolant());
        Ok(())
    }

    /// Timed pause. Tools are synchronized before the wait starts.
    pub fn dwell(&mut self, data: &MotionData) -> Result<(), Status> {
        if self.mc.check_mode() {
            return Ok(());
        }
        self.update_tools(data)?;
        self.delay_ms(data.dwell_ms)
    }

    /// Runs the full homing cycle in the geometry's axis order, then anchors
    /// the machine origin at the pull-off position.
    pub fn home(&mut self) -> Result<(), Status> {
        if !self.settings.homing_enabled {
            return Err(Status::NoLimitSwitch);
        }

        self.signals.exec.set(exec::HOMING);
        if let Some(start) = self.kinematics.pre_home_position(&self.settings) {
            // geometry cannot know its pose; assume the far end of travel
            self.reset_rt_position(&start)?;
        }

        for &(axis, limit_mask) in self.kinematics.homing_order() {
            if axis >= 3 && self.settings.max_distance[axis] == 0.0 {
                continue;
            }
            self.home_axis(axis, limit_mask)?;
        }

        if let Some(rest) = self.kinematics.post_home_position() {
            self.finish_home_at(rest)?;
        } else {
            self.signals.pos.store(&[0; STEPPER_COUNT]);
            self.mc.sync_position(self.signals);
        }

        self.signals.exec.clear(exec::HOMING | exec::HALT);
        self.unlock(false);
        log_info!("homing cycle complete");
        Ok(())
    }

    /// Homes one axis (or, for a delta, all towers at once): seek into the
    /// switch fast, verify the right switch fired, back off slow and verify
    /// release.
    pub fn home_axis(&mut self, axis: usize, limit_mask: u8) -> Result<(), Status> {
        self.unlock(true);
        self.poll_io();
        if self.signals.exec.get(exec::HOLD | exec::ALARM) != 0 {
            self.alarm(Alarm::HomingFailLimitActive);
            return Err(Status::Locked);
        }

        self.homing_limit_filter = limit_mask;

        // overshoot the envelope to guarantee switch contact
        let mut seek = -self.settings.max_distance[axis] * 1.5;
        if self.settings.homing_dir_invert_mask & (1 << axis) != 0 {
            seek = -seek;
        }

        self.mc.sync_position(self.signals);
        let mut target = self.position()?;
        target[axis] += seek;
        let data = MotionData {
            feed: self.settings.homing_fast_feed,
            allow_overrides: false,
            ..MotionData::default()
        };

        self.unlock(true);
        self.signals.exec.set(exec::HOMING);
        self.line(&mut target, &data)?;
        self.sync_motion()?;

        self.itp.stop(&mut self.io, &mut self.timer);
        self.itp.clear();
        self.planner.clear();
        self.mc.sync_position(self.signals);

        self.delay_ms(self.settings.debounce_ms)?;
        self.last_limits = self.io.limits();
        if self.last_limits & limit_mask != limit_mask {
            self.signals.exec.set(exec::HALT);
            self.alarm(Alarm::HomingFailApproach);
            return Err(Status::NoLimitSwitch);
        }

        // back off from the switch at the slow feed
        let mut back_off = self.settings.homing_offset * 5.0;
        if self.settings.homing_dir_invert_mask & (1 << axis) != 0 {
            back_off = -back_off;
        }
        self.mc.sync_position(self.signals);
        let mut target = self.position()?;
        target[axis] += back_off;
        let data = MotionData {
            feed: self.settings.homing_slow_feed,
            allow_overrides: false,
            ..MotionData::default()
        };

        self.unlock(true);
        self.signals.exec.set(exec::HOMING);
        self.line(&mut target, &data)?;
        self.sync_motion()?;

        self.timer.stop();
        self.itp.clear();
        self.planner.clear();
        self.mc.sync_position(self.signals);

        self.delay_ms(self.settings.debounce_ms)?;
        self.last_limits = self.io.limits();
        if self.last_limits & limit_mask != 0 {
            // switch never released
            self.signals.exec.set(exec::HALT);
            self.alarm(Alarm::HomingFailApproach);
            return Err(Status::NoLimitSwitch);
        }

        Ok(())
    }

    /// Delta epilogue: the towers rest at a known pose once every switch has
    /// triggered, so motion resumes from there and the origin is re-anchored.
    fn finish_home_at(&mut self, rest: [f32; AXIS_COUNT]) -> Result<(), Status> {
        self.unlock(true);
        self.reset_rt_position(&rest)?;

        let mut target = rest;
        let pull_off = if self.settings.homing_dir_invert_mask & (1 << AXIS_Z) != 0 {
            -self.settings.homing_offset
        } else {
            self.settings.homing_offset
        };
        target[AXIS_Z] += pull_off;
        let data = MotionData {
            feed: self.settings.homing_fast_feed,
            allow_overrides: false,
            ..MotionData::default()
        };
        self.signals.exec.set(exec::HOMING);
        self.line(&mut target, &data)?;
        self.sync_motion()?;

        self.kinematics.finish_home();
        let origin = [0.0f32; AXIS_COUNT];
        self.reset_rt_position(&origin)
    }

    /// Probe cycle: move toward `target` until the probe makes contact, then
    /// flush the remaining motion. Returns the captured trigger position in
    /// stepper space.
    pub fn probe(
        &mut self,
        mut target: [f32; AXIS_COUNT],
        invert_probe: bool,
        data: &MotionData,
    ) -> Result<[i32; STEPPER_COUNT], Status> {
        let prev_hold = self.signals.exec.get(exec::HOLD);
        if self.io.probe() != self.settings.probe_invert {
            self.alarm(Alarm::ProbeFailInitial);
            return Err(Status::Locked);
        }

        self.probe_enabled = true;
        let mut data = *data;
        data.feed = self.settings.homing_fast_feed;
        if let Err(status) = self.line(&mut target, &data) {
            self.probe_enabled = false;
            return Err(status);
        }

        loop {
            if !self.dotasks() {
                self.probe_enabled = false;
                return Err(Status::Killed);
            }
            if self.signals.exec.get(exec::RUN) == 0 {
                break;
            }
        }

        let triggered = !self.probe_enabled;
        self.probe_enabled = false;
        self.timer.stop();
        self.itp.clear();
        self.planner.clear();
        self.mc.sync_position(self.signals);
        self.clear_exec_state(!prev_hold & exec::HOLD);

        self.delay_ms(self.settings.debounce_ms)?;
        let mut probe_ok = triggered && (self.io.probe() != self.settings.probe_invert);
        if invert_probe {
            probe_ok = !probe_ok;
        }
        if !probe_ok {
            self.alarm(Alarm::ProbeFailContact);
            return Err(Status::Locked);
        }

        Ok(*self.mc.probe_position())
    }
}
