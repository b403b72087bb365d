//! Look-ahead motion planner.
//!
//! Keeps a ring of queued linear motions and recomputes feasible entry/exit
//! speeds whenever a block is added, so that no block demands more than the
//! configured acceleration and no junction is taken faster than the corner
//! angle allows. Runs entirely in main context; the interpolator consumes
//! blocks from the same context via the task loop.

use crate::config::{AXIS_COUNT, PLANNER_BUFFER_SIZE, STEPPER_COUNT};
use crate::motion::MotionRequest;
use crate::settings::Settings;

const FEED_OVR_MIN: u8 = 10;
const FEED_OVR_MAX: u8 = 200;
const SPINDLE_OVR_MIN: u8 = 10;
const SPINDLE_OVR_MAX: u8 = 200;

/// Converts mm/min feeds into mm/s.
const MIN_SEC_MULT: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockFlags {
    /// Entry/exit speeds can no longer improve; recompute passes stop here.
    pub optimal: bool,
    /// Corner must be taken at a full stop.
    pub exact_stop: bool,
    /// Backlash take-up insert; invisible to the coordinate system.
    pub backlash: bool,
    /// Feed/rapid/spindle overrides apply to this block.
    pub allow_overrides: bool,
    /// Motion start is gated on an external sync signal.
    pub synched: bool,
}

/// One queued linear motion, in step space.
#[derive(Debug, Clone, Copy)]
pub struct PlannerBlock {
    pub dirbits: u8,
    pub main_stepper: u8,
    pub steps: [u32; STEPPER_COUNT],
    pub total_steps: u32,
    /// Converts step rate (st/s) into feed (mm/min) for reporting.
    pub feed_conversion: f32,
    /// All speeds are stored squared, in (st/s)^2.
    pub entry_feed_sqr: f32,
    pub entry_max_feed_sqr: f32,
    pub feed_sqr: f32,
    pub rapid_feed_sqr: f32,
    /// Acceleration along the line (st/s^2).
    pub acceleration: f32,
    pub spindle: i16,
    pub coolant: u8,
    pub flags: BlockFlags,
}

impl PlannerBlock {
    const fn zeroed() -> Self {
        Self {
            dirbits: 0,
            main_stepper: 0,
            steps: [0; STEPPER_COUNT],
            total_steps: 0,
            feed_conversion: 0.0,
            entry_feed_sqr: 0.0,
            entry_max_feed_sqr: 0.0,
            feed_sqr: 0.0,
            rapid_feed_sqr: 0.0,
            acceleration: 0.0,
            spindle: 0,
            coolant: 0,
            flags: BlockFlags {
                optimal: false,
                exact_stop: false,
                backlash: false,
                allow_overrides: false,
                synched: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Overrides {
    feed: u8,
    rapid: u8,
    spindle: u8,
    coolant: u8,
}

pub struct Planner {
    data: [PlannerBlock; PLANNER_BUFFER_SIZE],
    write: usize,
    read: usize,
    blocks: usize,
    last_dir_vect: [f32; AXIS_COUNT],
    /// Spindle/coolant programmed by the most recent block, kept for when the
    /// buffer drains.
    spindle: i16,
    coolant: u8,
    overrides: Overrides,
}

impl Planner {
    pub const fn new() -> Self {
        Self {
            data: [PlannerBlock::zeroed(); PLANNER_BUFFER_SIZE],
            write: 0,
            read: 0,
            blocks: 0,
            last_dir_vect: [0.0; AXIS_COUNT],
            spindle: 0,
            coolant: 0,
            overrides: Overrides {
                feed: 100,
                rapid: 100,
                spindle: 100,
                coolant: 0,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    pub fn is_full(&self) -> bool {
        self.blocks == PLANNER_BUFFER_SIZE
    }

    /// Drops every queued motion. Spindle/coolant state resets with it.
    pub fn clear(&mut self) {
        self.write = 0;
        self.read = 0;
        self.blocks = 0;
        self.spindle = 0;
        self.coolant = 0;
        self.last_dir_vect = [0.0; AXIS_COUNT];
    }

    fn next_index(index: usize) -> usize {
        let index = index + 1;
        if index == PLANNER_BUFFER_SIZE {
            0
        } else {
            index
        }
    }

    fn prev_index(index: usize) -> usize {
        if index == 0 {
            PLANNER_BUFFER_SIZE - 1
        } else {
            index - 1
        }
    }

    /// Oldest not-yet-retired block.
    pub fn current(&self) -> Option<&PlannerBlock> {
        if self.blocks == 0 {
            return None;
        }
        Some(&self.data[self.read])
    }

    pub fn current_mut(&mut self) -> Option<&mut PlannerBlock> {
        if self.blocks == 0 {
            return None;
        }
        Some(&mut self.data[self.read])
    }

    /// Frees the slot of a fully interpolated block.
    pub fn discard(&mut self) {
        if self.blocks == 0 {
            return;
        }
        self.read = Self::next_index(self.read);
        self.blocks -= 1;
    }

    /// Queues a new motion. The caller guarantees the buffer is not full.
    /// Returns true when the executing block's speed profile changed and the
    /// interpolator must refresh its limits.
    pub fn add_line(&mut self, settings: &Settings, req: &MotionRequest) -> bool {
        let write = self.write;
        let mut block = PlannerBlock::zeroed();
        block.dirbits = req.dirbits;
        block.main_stepper = req.main_stepper;
        block.steps = req.steps;
        block.total_steps = req.total_steps;
        block.feed_conversion = req.feed_conversion;
        block.spindle = req.spindle;
        block.coolant = req.coolant;
        block.flags.exact_stop = req.exact_stop;
        block.flags.backlash = req.backlash;
        block.flags.allow_overrides = req.allow_overrides;
        block.flags.synched = req.synched;

        self.spindle = req.spindle;
        self.coolant = req.coolant;

        // pure spindle/dwell update, sequenced but never stepped
        if req.total_steps == 0 {
            self.data[write] = block;
            self.write = Self::next_index(write);
            self.blocks += 1;
            return false;
        }

        // direction change against the previous queued motion
        let mut cos_theta = 0.0f32;
        for i in 0..AXIS_COUNT {
            cos_theta += req.dir_vect[i] * self.last_dir_vect[i];
            self.last_dir_vect[i] = req.dir_vect[i];
        }

        // per-actuator feed and acceleration limits projected onto this line
        let mut rapid_feed = f32::MAX;
        let mut acceleration = f32::MAX;
        for i in 0..STEPPER_COUNT {
            if block.steps[i] != 0 {
                let step_ratio = settings.step_per_mm[i] / block.steps[i] as f32;
                rapid_feed = rapid_feed.min(settings.max_feed_rate[i] * step_ratio);
                acceleration = acceleration.min(settings.acceleration[i] * step_ratio);
            }
        }

        // convert to steps per second along the line
        let mut feed = req.feed * MIN_SEC_MULT;
        rapid_feed *= MIN_SEC_MULT * block.total_steps as f32;
        acceleration *= block.total_steps as f32;
        if feed > rapid_feed {
            feed = rapid_feed;
        }
        block.feed_sqr = feed * feed;
        block.rapid_feed_sqr = rapid_feed * rapid_feed;
        block.acceleration = acceleration;

        if self.blocks == 0 {
            cos_theta = 0.0;
        }
        cos_theta = cos_theta.clamp(0.0, 1.0);

        let mut refresh = false;
        if cos_theta != 0.0 && !block.flags.exact_stop && !block.flags.backlash {
            // half angle identity: tan(t/2) = sqrt((1 - cos(t))/(1 + cos(t))),
            // multiplied through by sqrt((1 + cos(t))/(1 + cos(t))) so the
            // whole thing stays a single sqrt of (1 - cos^2)
            let mut angle_factor = 1.0f32;
            if cos_theta > 0.0 {
                angle_factor = libm::sqrtf(1.0 - cos_theta * cos_theta) / (1.0 + cos_theta);
            }
            angle_factor = (angle_factor - settings.junction_factor).clamp(0.0, 1.0);

            if angle_factor < 1.0 {
                let prev = Self::prev_index(write);
                let junc = 1.0 - angle_factor;
                let junc_feed_sqr = junc * junc * self.data[prev].feed_sqr;
                block.entry_max_feed_sqr = block.feed_sqr.min(junc_feed_sqr);
            }

            self.data[write] = block;
            refresh = self.recalculate();
        } else {
            self.data[write] = block;
        }

        self.write = Self::next_index(write);
        self.blocks += 1;
        refresh
    }

    /// Backward pass raises entry speeds toward each block's junction limit;
    /// forward pass lowers exit speeds that acceleration cannot reach. Stops
    /// early at the first block already flagged optimal. Returns true when the
    /// executing block was touched.
    fn recalculate(&mut self) -> bool {
        let last = self.write;
        let first = self.read;
        let mut block = last;

        if self.blocks < 2 {
            self.data[block].entry_feed_sqr = 0.0;
            return false;
        }

        let mut refresh = false;
        let mut next = Self::next_index(block);
        while !self.data[block].flags.optimal && block != first {
            if self.data[block].entry_feed_sqr == self.data[block].entry_max_feed_sqr {
                break;
            }
            let mut speedchange =
                ((self.data[block].total_steps << 1) as f32) * self.data[block].acceleration;
            // the newest block stops at the queue end; everything upstream
            // decelerates into the entry recomputed for the block behind it
            if block != last {
                speedchange += self.data[next].entry_feed_sqr;
            }
            self.data[block].entry_feed_sqr =
                self.data[block].entry_max_feed_sqr.min(speedchange);

            next = block;
            block = Self::prev_index(block);
        }

        next = Self::next_index(block);
        while block != last {
            if self.data[block].entry_feed_sqr < self.data[next].entry_feed_sqr {
                let mut speedchange =
                    ((self.data[block].total_steps << 1) as f32) * self.data[block].acceleration;
                speedchange += self.data[block].entry_feed_sqr;
                if speedchange < self.data[next].entry_feed_sqr {
                    self.data[next].entry_feed_sqr =
                        self.data[next].entry_max_feed_sqr.min(speedchange);
                    self.data[next].flags.optimal = true;
                }
            }

            if block == first {
                refresh = true;
            }

            block = next;
            next = Self::next_index(block);
        }
        refresh
    }

    /// Exit speed of the executing block: the entry speed of the block behind
    /// it, with overrides applied at read time.
    pub fn exit_speed_sqr(&self) -> f32 {
        if self.blocks < 2 {
            return 0.0;
        }

        let next = Self::next_index(self.read);
        let mut exit_speed_sqr = self.data[next].entry_feed_sqr;
        let mut rapid_feed_sqr = self.data[next].rapid_feed_sqr;

        if self.data[next].flags.allow_overrides {
            if self.overrides.feed != 100 {
                let ovr = self.overrides.feed as f32;
                exit_speed_sqr *= ovr * ovr * 0.0001;
            }
            if self.overrides.rapid != 100 {
                let ovr = self.overrides.rapid as f32;
                rapid_feed_sqr *= ovr * ovr * 0.0001;
            }
        }

        exit_speed_sqr.min(rapid_feed_sqr)
    }

    /// Top speed the executing block can reach given its exit speed: the
    /// crossover of full acceleration from entry and full deceleration into
    /// the exit, `v^2 = (v_exit^2 + 2 a d + v_entry^2) / 2`, capped at the
    /// override-scaled target feed.
    pub fn top_speed_sqr(&self, exit_speed_sqr: f32) -> f32 {
        let block = &self.data[self.read];
        let speed_delta = exit_speed_sqr - block.entry_feed_sqr;
        let mut junction_speed_sqr = 2.0 * block.acceleration * block.total_steps as f32;
        if junction_speed_sqr >= speed_delta {
            junction_speed_sqr += exit_speed_sqr + block.entry_feed_sqr;
            junction_speed_sqr *= 0.5;
        } else if exit_speed_sqr > block.entry_feed_sqr {
            // cannot reach the exit speed even accelerating the whole block
            junction_speed_sqr += block.entry_feed_sqr;
        } else {
            // overshoots the exit speed even decelerating the whole block
            junction_speed_sqr = block.entry_feed_sqr;
        }

        let mut target_speed_sqr = block.feed_sqr;
        let mut rapid_feed_sqr = block.rapid_feed_sqr;
        if block.flags.allow_overrides {
            if self.overrides.feed != 100 {
                let ovr = self.overrides.feed as f32;
                target_speed_sqr *= ovr * ovr * 0.0001;
            }
            if self.overrides.rapid != 100 {
                let ovr = self.overrides.rapid as f32;
                rapid_feed_sqr *= ovr * ovr * 0.0001;
            }
        }

        junction_speed_sqr.min(target_speed_sqr.min(rapid_feed_sqr))
    }

    /// Spindle output for the executing block as a signed PWM value, with the
    /// spindle override and RPM window applied.
    pub fn spindle_output(&self, settings: &Settings) -> i16 {
        let spindle = if self.blocks == 0 {
            self.spindle
        } else {
            self.data[self.read].spindle
        };

        if spindle == 0 {
            return 0;
        }

        let neg = spindle < 0;
        let mut rpm = libm::fabsf(spindle as f32);
        if self.blocks != 0
            && self.data[self.read].flags.allow_overrides
            && self.overrides.spindle != 100
        {
            rpm *= 0.01 * self.overrides.spindle as f32;
        }
        rpm = rpm.clamp(settings.spindle_min_rpm, settings.spindle_max_rpm);
        let pwm = (255.0 * (rpm / settings.spindle_max_rpm)) as i16;
        let pwm = pwm.max(1);
        if neg {
            -pwm
        } else {
            pwm
        }
    }

    pub fn coolant(&self) -> u8 {
        let coolant = if self.blocks == 0 {
            self.coolant
        } else {
            self.data[self.read].coolant
        };
        coolant ^ self.overrides.coolant
    }

    /// Restores spindle/coolant bookkeeping after motions bypass the queue.
    pub fn sync_tools(&mut self, spindle: i16, coolant: u8) {
        self.spindle = spindle;
        self.coolant = coolant;
    }

    // overrides; every accepted change returns true so the interpolator can
    // regenerate the remaining profile
    pub fn feed_ovr_inc(&mut self, delta: i8) -> bool {
        let value = (self.overrides.feed as i16 + delta as i16)
            .clamp(FEED_OVR_MIN as i16, FEED_OVR_MAX as i16) as u8;
        if value != self.overrides.feed {
            self.overrides.feed = value;
            return true;
        }
        false
    }

    pub fn feed_ovr_reset(&mut self) -> bool {
        if self.overrides.feed != 100 {
            self.overrides.feed = 100;
            return true;
        }
        false
    }

    pub fn rapid_ovr(&mut self, value: u8) -> bool {
        if self.overrides.rapid != value {
            self.overrides.rapid = value;
            return true;
        }
        false
    }

    pub fn spindle_ovr_inc(&mut self, delta: i8) -> bool {
        let value = (self.overrides.spindle as i16 + delta as i16)
            .clamp(SPINDLE_OVR_MIN as i16, SPINDLE_OVR_MAX as i16) as u8;
        if value != self.overrides.spindle {
            self.overrides.spindle = value;
            return true;
        }
        false
    }

    pub fn spindle_ovr_reset(&mut self) {
        self.overrides.spindle = 100;
    }

    pub fn coolant_ovr_toggle(&mut self, mask: u8) -> u8 {
        self.overrides.coolant ^= mask;
        self.overrides.coolant
    }

    pub fn ovr_values(&self) -> (u8, u8, u8) {
        (
            self.overrides.feed,
            self.overrides.rapid,
            self.overrides.spindle,
        )
    }
}
