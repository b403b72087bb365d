//! Step interpolator.
//!
//! Consumes planner blocks one at a time and integrates their trapezoidal
//! velocity profile into short fixed-duration segments. Each segment carries a
//! step count, a hardware timer period and the oversampling factor for the
//! step interrupt. Generation runs in main context and uses floating point;
//! consumption (the step interrupt in [`step_driver`]) is integer only.

pub mod step_driver;

use crate::config::{
    DSS_CUTOFF_FREQ, DSS_MAX_OVERSAMPLING, F_STEP_MAX, INTERPOLATOR_DELTA_T, INTERPOLATOR_FREQ,
    ITP_QUEUE_SIZE, STEPPER_COUNT,
};
use crate::hal::{ItpTimer, MachineIo, TimerConv, TimerPeriod, Tool};
use crate::machine::exec;
use crate::planner::Planner;
use crate::settings::Settings;
use crate::sync::{RingConsumer, RingProducer, RtSignals, SpscRing};

// segment flags
pub(crate) const ITP_UPDATE_ISR: u8 = 1;
pub(crate) const ITP_UPDATE_TOOL: u8 = 2;
pub(crate) const ITP_UPDATE: u8 = ITP_UPDATE_ISR | ITP_UPDATE_TOOL;
pub(crate) const ITP_ACCEL: u8 = 4;
pub(crate) const ITP_CONST: u8 = 8;
pub(crate) const ITP_DEACCEL: u8 = 16;
pub(crate) const ITP_SYNC: u8 = 32;
pub(crate) const ITP_BACKLASH: u8 = 64;

pub type SegmentRing = SpscRing<ItpSegment, ITP_QUEUE_SIZE>;
pub type SegmentProducer = RingProducer<ItpSegment, ITP_QUEUE_SIZE>;
pub type SegmentConsumer = RingConsumer<ItpSegment, ITP_QUEUE_SIZE>;

/// Bresenham line state for one block. Step counts and the exhaustion
/// threshold are doubled so the error accumulators start centered.
#[derive(Debug, Clone, Copy)]
pub struct ItpBlock {
    pub(crate) dirbits: u8,
    pub(crate) main_stepper: u8,
    pub(crate) idle_axes: u8,
    pub(crate) steps: [u32; STEPPER_COUNT],
    pub(crate) errors: [u32; STEPPER_COUNT],
    pub(crate) total_steps: u32,
}

impl ItpBlock {
    pub(crate) const EMPTY: Self = Self {
        dirbits: 0,
        main_stepper: 0,
        idle_axes: 0,
        steps: [0; STEPPER_COUNT],
        errors: [0; STEPPER_COUNT],
        total_steps: 0,
    };
}

/// One fixed-rate slice of a block's step stream. The first segment of every
/// block carries the fresh Bresenham state; the step interrupt owns a working
/// copy from then on.
#[derive(Debug, Clone, Copy)]
pub struct ItpSegment {
    pub(crate) new_block: Option<ItpBlock>,
    pub(crate) remaining_steps: u32,
    pub(crate) timer: TimerPeriod,
    pub(crate) next_dss: i8,
    pub(crate) feed: f32,
    pub(crate) spindle: i16,
    pub(crate) flags: u8,
}

impl ItpSegment {
    /// Ring seed value.
    pub const EMPTY: Self = Self {
        new_block: None,
        remaining_steps: 0,
        timer: TimerPeriod {
            counter: 0,
            prescaler: 0,
        },
        next_dss: 0,
        feed: 0.0,
        spindle: 0,
        flags: 0,
    };
}

/// Pacing mode of the step stream. `Sync` suppresses hardware timer pacing so
/// ticks can be replayed deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Startup,
    Default,
    Realtime,
    Sync,
}

pub struct Interpolator {
    sgm_out: SegmentProducer,
    signals: &'static RtSignals,
    conv: TimerConv,
    step_mode: StepMode,

    // profile state of the block being sliced
    staged_block: Option<ItpBlock>,
    block_active: bool,
    needs_update: bool,
    accel_until: u32,
    deaccel_from: u32,
    junction_speed: f32,
    feed_convert: f32,
    partial_distance: f32,
    t_acc_integrator: f32,
    t_deac_integrator: f32,
    prev_dss: u8,
    prev_spindle: i16,
}

impl Interpolator {
    pub fn new(sgm_out: SegmentProducer, signals: &'static RtSignals, conv: TimerConv) -> Self {
        Self {
            sgm_out,
            signals,
            conv,
            step_mode: StepMode::Startup,
            staged_block: None,
            block_active: false,
            needs_update: false,
            accel_until: 0,
            deaccel_from: 0,
            junction_speed: 0.0,
            feed_convert: 0.0,
            partial_distance: 0.0,
            t_acc_integrator: 0.0,
            t_deac_integrator: 0.0,
            prev_dss: 0,
            prev_spindle: 0,
        }
    }

    /// Flags the executing block for a speed-profile recompute (override or
    /// look-ahead change).
    pub fn update(&mut self) {
        self.needs_update = true;
    }

    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    /// Whether every generated segment has been consumed.
    pub fn is_empty(&self) -> bool {
        self.sgm_out.is_empty() && !self.signals.itp_active()
    }

    /// Feed rate currently being executed (mm/min).
    pub fn rt_feed(&self) -> f32 {
        if self.signals.exec.get(exec::RUN) == 0 {
            return 0.0;
        }
        self.signals.rt_feed()
    }

    /// Halts step output. Stopping while steps were still flowing means the
    /// position can no longer be trusted.
    pub fn stop(&mut self, io: &mut impl MachineIo, timer: &mut impl ItpTimer) {
        if self.signals.exec.get(exec::RUN) != 0 {
            self.signals.exec.set(exec::HALT);
        }
        io.end_step_pulse();
        timer.stop();
        self.signals.exec.clear(exec::RUN);
    }

    /// Drops all generated segments and the partially sliced block. Only
    /// called with the step interrupt stopped.
    pub fn clear(&mut self) {
        self.staged_block = None;
        self.block_active = false;
        self.needs_update = false;
        self.partial_distance = 0.0;
        self.prev_dss = 0;
        self.prev_spindle = 0;
        self.sgm_out.clear();
        self.signals.set_itp_active(false);
        self.signals.set_rt_feed(0.0);
    }

    /// Main-context segment generation. Fills the segment ring while there is
    /// margin, integrating the active block's velocity profile in
    /// `INTERPOLATOR_FREQ` slices, then kicks the step timer if it is idle.
    pub fn run(
        &mut self,
        planner: &mut Planner,
        settings: &Settings,
        timer: &mut impl ItpTimer,
        tool: &mut impl Tool,
    ) {
        let signals = self.signals;
        let mut start_is_synched = false;

        while self.sgm_out.ready() {
            if signals.exec.get(exec::ALARM) != 0 {
                return;
            }

            if !self.block_active {
                if planner.is_empty() {
                    break;
                }
                let Some(plan) = planner.current() else {
                    break;
                };
                let main = plan.main_stepper as usize;
                let total_steps = plan.steps[main];
                let mut blk = ItpBlock::EMPTY;
                blk.dirbits = plan.dirbits;
                blk.main_stepper = plan.main_stepper;
                blk.total_steps = total_steps << 1;
                for i in 0..STEPPER_COUNT {
                    blk.errors[i] = total_steps;
                    blk.steps[i] = plan.steps[i] << 1;
                    if plan.steps[i] == 0 {
                        blk.idle_axes |= 1 << i;
                    }
                }
                self.feed_convert = plan.feed_conversion;
                if plan.flags.synched {
                    start_is_synched = true;
                }
                self.staged_block = Some(blk);
                self.block_active = true;
                self.needs_update = true;
            }

            let Some(plan) = planner.current() else {
                break;
            };
            let main = plan.main_stepper as usize;
            let mut remaining_steps = plan.steps[main];
            let acceleration = plan.acceleration;
            let mut entry_feed_sqr = plan.entry_feed_sqr;
            let block_flags = plan.flags;

            let mut current_speed = libm::sqrtf(entry_feed_sqr);

            if signals.exec.get(exec::HOLD) != 0 {
                // hold: override the profile junctions so only deceleration
                // segments come out
                self.accel_until = remaining_steps;
                self.deaccel_from = remaining_steps;
                self.needs_update = true;
            } else if self.needs_update {
                self.needs_update = false;
                let exit_speed_sqr = planner.exit_speed_sqr();
                let junction_speed_sqr = planner.top_speed_sqr(exit_speed_sqr);
                self.junction_speed = libm::sqrtf(junction_speed_sqr);
                let accel_inv = 1.0 / acceleration;

                self.accel_until = remaining_steps;
                self.deaccel_from = 0;
                if junction_speed_sqr != entry_feed_sqr {
                    let accel_dist =
                        0.5 * fabsf(junction_speed_sqr - entry_feed_sqr) * accel_inv;
                    self.accel_until =
                        self.accel_until.saturating_sub(libm::floorf(accel_dist) as u32);
                    let t = fabsf(self.junction_speed - current_speed) * accel_inv;

                    if t > INTERPOLATOR_DELTA_T {
                        // slice the ramp into an integral number of periods
                        let slices_inv = 1.0 / libm::floorf(INTERPOLATOR_FREQ * t);
                        self.t_acc_integrator = t * slices_inv;
                        if junction_speed_sqr < entry_feed_sqr {
                            self.t_acc_integrator = -self.t_acc_integrator;
                        }
                    } else {
                        self.accel_until = remaining_steps;
                    }
                }

                // entry already at the junction speed
                if self.accel_until == remaining_steps {
                    entry_feed_sqr = junction_speed_sqr;
                    current_speed = self.junction_speed;
                }

                if junction_speed_sqr > exit_speed_sqr {
                    let deaccel_dist = 0.5 * (junction_speed_sqr - exit_speed_sqr) * accel_inv;
                    self.deaccel_from = libm::floorf(deaccel_dist) as u32;
                    let t =
                        fabsf(self.junction_speed - libm::sqrtf(exit_speed_sqr)) * accel_inv;

                    if t > INTERPOLATOR_DELTA_T {
                        let slices_inv = 1.0 / libm::floorf(INTERPOLATOR_FREQ * t);
                        self.t_deac_integrator = t * slices_inv;
                        if self.t_deac_integrator < 0.00001 {
                            self.t_deac_integrator = 0.0001;
                        }
                    } else {
                        self.deaccel_from = 0;
                    }
                }
            }

            let speed_change;
            let profile_steps_limit;
            let integrator;
            let mut sgm_flags;
            if remaining_steps > self.accel_until {
                // over one slice a constant acceleration covers the same
                // distance as the average of the two edge speeds
                integrator = self.t_acc_integrator;
                speed_change = integrator * acceleration;
                profile_steps_limit = self.accel_until;
                sgm_flags = ITP_UPDATE_ISR | ITP_ACCEL;
            } else if remaining_steps > self.deaccel_from {
                speed_change = 0.0;
                profile_steps_limit = self.deaccel_from;
                integrator = INTERPOLATOR_DELTA_T;
                sgm_flags = if remaining_steps == self.accel_until {
                    ITP_UPDATE_ISR | ITP_CONST
                } else {
                    ITP_CONST
                };
            } else {
                integrator = self.t_deac_integrator;
                speed_change = -(integrator * acceleration);
                profile_steps_limit = 0;
                sgm_flags = ITP_UPDATE_ISR | ITP_DEACCEL;
            }

            if speed_change != 0.0 {
                let exit = current_speed + speed_change;
                entry_feed_sqr = exit * exit;
            }

            let half_change = 0.5 * speed_change;
            current_speed += half_change;

            let mut segm_steps: u32;
            if current_speed > 0.0 {
                self.partial_distance += current_speed * integrator;
                segm_steps = libm::floorf(self.partial_distance) as u32;
                // every segment advances at least one step; the fractional
                // remainder keeps the block total exact
                if segm_steps == 0 {
                    segm_steps = 1;
                }
            } else {
                entry_feed_sqr = 0.0;
                if signals.exec.get(exec::HOLD) != 0 {
                    // fully decelerated; wait for resume
                    if let Some(plan) = planner.current_mut() {
                        plan.entry_feed_sqr = 0.0;
                    }
                    return;
                }
                // flush whatever is left in one slice
                segm_steps = remaining_steps;
                current_speed = -half_change;
            }
            self.partial_distance -= segm_steps as f32;

            if segm_steps > remaining_steps - profile_steps_limit {
                segm_steps = remaining_steps - profile_steps_limit;
            }

            // dynamic step spread: double the logical resolution while the
            // step rate is low, so pulses spread evenly instead of bunching
            let mut dss_speed = current_speed.max(INTERPOLATOR_FREQ);
            let mut dss: u8 = 0;
            while dss_speed < DSS_CUTOFF_FREQ && dss < DSS_MAX_OVERSAMPLING && segm_steps != 0 {
                dss_speed *= 2.0;
                dss += 1;
            }
            if dss != self.prev_dss {
                sgm_flags |= ITP_UPDATE_ISR;
            }
            let next_dss = dss as i8 - self.prev_dss as i8;
            self.prev_dss = dss;

            dss_speed = dss_speed.min(F_STEP_MAX);
            let timer_period = self.conv.freq_to_clocks(dss_speed);
            let feed = current_speed * self.feed_convert;

            let spindle = planner.spindle_output(settings);
            if spindle != self.prev_spindle {
                self.prev_spindle = spindle;
                sgm_flags |= ITP_UPDATE_TOOL;
            }

            remaining_steps -= segm_steps;

            // resets accumulated float error at the top of the ramp
            if remaining_steps == self.accel_until && signals.exec.get(exec::HOLD) == 0 {
                entry_feed_sqr = self.junction_speed * self.junction_speed;
            }

            if block_flags.synched {
                sgm_flags |= ITP_SYNC;
            }
            if block_flags.backlash {
                sgm_flags |= ITP_BACKLASH;
            }

            if let Some(plan) = planner.current_mut() {
                plan.entry_feed_sqr = entry_feed_sqr;
                plan.steps[main] = remaining_steps;
            }

            let sgm = ItpSegment {
                new_block: self.staged_block.take(),
                remaining_steps: segm_steps << dss,
                timer: timer_period,
                next_dss,
                feed,
                spindle,
                flags: sgm_flags,
            };

            if remaining_steps == 0 {
                self.block_active = false;
                self.prev_dss = 0;
                planner.discard();
            }

            if self.sgm_out.enqueue(sgm).is_err() {
                break;
            }
        }

        tool.set_coolant(planner.coolant());
        self.start(start_is_synched, timer);
    }

    /// Kicks the step timer when it is idle and segments are waiting.
    fn start(&mut self, is_synched: bool, timer: &mut impl ItpTimer) {
        let signals = self.signals;
        if is_synched
            || signals.exec.get(exec::RUN | exec::HOLD | exec::ALARM) != 0
            || self.sgm_out.is_empty()
        {
            return;
        }
        if let Some(head) = self.sgm_out.peek_head() {
            critical_section::with(|_| {
                signals.exec.set(exec::RUN);
                if self.step_mode != StepMode::Sync {
                    timer.start(head.timer);
                }
            });
        }
    }
}

fn fabsf(value: f32) -> f32 {
    libm::fabsf(value)
}
