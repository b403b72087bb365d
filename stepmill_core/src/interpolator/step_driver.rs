//! Step-interrupt side of the interpolator.
//!
//! Runs entirely in integer arithmetic. Each timer tick first emits the step
//! bits computed on the previous tick, then prepares the next set, so the
//! output pulse train stays phase aligned with the timer no matter how long
//! the Bresenham pass takes. A second, phase-shifted callback resets the step
//! pins to generate the pulse width.

use super::{
    ItpBlock, ItpSegment, SegmentConsumer, ITP_BACKLASH, ITP_UPDATE, ITP_UPDATE_ISR,
    ITP_UPDATE_TOOL,
};
use crate::config::STEPPER_COUNT;
use crate::hal::{ItpTimer, MachineIo, Tool};
use crate::machine::exec;
use crate::sync::RtSignals;

pub struct StepDriver {
    sgm_in: SegmentConsumer,
    signals: &'static RtSignals,
    current: Option<ItpSegment>,
    block: ItpBlock,
    has_block: bool,
    stepbits: u8,
}

impl StepDriver {
    pub fn new(sgm_in: SegmentConsumer, signals: &'static RtSignals) -> Self {
        Self {
            sgm_in,
            signals,
            current: None,
            block: ItpBlock::EMPTY,
            has_block: false,
            stepbits: 0,
        }
    }

    /// Whether a segment is currently executing.
    pub fn busy(&self) -> bool {
        self.current.is_some()
    }

    /// Main timer tick. Emits the pending step edges, retires finished
    /// segments, loads the next one and runs the Bresenham pass for the
    /// following tick.
    pub fn tick_step(
        &mut self,
        io: &mut impl MachineIo,
        timer: &mut impl ItpTimer,
        tool: &mut impl Tool,
    ) {
        if self.signals.exec.get(exec::ALARM) != 0 {
            // no step may leave the machine once an alarm condition is up
            self.current = None;
            self.has_block = false;
            self.stepbits = 0;
            self.signals.set_itp_active(false);
            return;
        }

        if self.current.is_some() && !self.signals.itp_active() {
            // main context flushed the queue while the timer was stopped
            self.current = None;
            self.has_block = false;
            self.stepbits = 0;
        }

        let emitted = self.stepbits;

        if let Some(sgm) = &mut self.current {
            io.toggle_steps(emitted);

            // track the realtime position from the edges just emitted;
            // backlash take-up moves the motor but not the axis
            if sgm.flags & ITP_BACKLASH == 0 {
                let dirs = self.block.dirbits;
                for i in 0..STEPPER_COUNT {
                    let mask = 1u8 << i;
                    if emitted & mask != 0 {
                        let delta = if dirs & mask != 0 { -1 } else { 1 };
                        self.signals.pos.offset(i, delta);
                    }
                }
            }

            if sgm.flags & ITP_UPDATE != 0 {
                if sgm.flags & ITP_UPDATE_ISR != 0 {
                    timer.change(sgm.timer);
                }
                if sgm.flags & ITP_UPDATE_TOOL != 0 {
                    tool.set_speed(sgm.spindle);
                }
                sgm.flags &= !ITP_UPDATE;
            }

            if sgm.remaining_steps == 0 {
                self.current = None;
            }
        }

        if self.current.is_none() {
            match self.sgm_in.dequeue() {
                Some(mut sgm) => {
                    self.signals.exec.set(exec::RUN);
                    if let Some(block) = sgm.new_block.take() {
                        self.block = block;
                        self.has_block = true;
                    }
                    if self.has_block {
                        if sgm.next_dss != 0 {
                            // oversampling changed; rescale the error
                            // accumulators and step the former main axis
                            // through them like any other
                            self.block.main_stepper = 0xFF;
                            if sgm.next_dss > 0 {
                                let shift = sgm.next_dss as u32;
                                self.block.total_steps <<= shift;
                                for err in self.block.errors.iter_mut() {
                                    *err <<= shift;
                                }
                            } else {
                                let shift = (-sgm.next_dss) as u32;
                                self.block.total_steps >>= shift;
                                for err in self.block.errors.iter_mut() {
                                    *err >>= shift;
                                }
                            }
                        }
                        io.set_dirs(self.block.dirbits);
                    }
                    self.signals.set_rt_feed(sgm.feed);
                    self.signals.set_itp_active(true);
                    self.current = Some(sgm);
                }
                None => {
                    // ran dry; stop cleanly without raising a halt
                    self.signals.exec.clear(exec::RUN);
                    self.signals.set_itp_active(false);
                    self.signals.set_rt_feed(0.0);
                    self.stepbits = 0;
                    io.end_step_pulse();
                    timer.stop();
                    return;
                }
            }
        }

        let mut next_bits = 0u8;
        if let Some(sgm) = &mut self.current {
            if sgm.remaining_steps != 0 {
                if self.has_block {
                    for i in 0..STEPPER_COUNT {
                        let mask = 1u8 << i;
                        if self.block.main_stepper == i as u8 {
                            // the dominant axis steps on every tick
                            next_bits |= mask;
                        } else if self.block.idle_axes & mask == 0 {
                            self.block.errors[i] += self.block.steps[i];
                            if self.block.errors[i] > self.block.total_steps {
                                self.block.errors[i] -= self.block.total_steps;
                                next_bits |= mask;
                            }
                        }
                    }
                }
                sgm.remaining_steps -= 1;
            }
        }
        self.stepbits = next_bits;
    }

    /// Phase-shifted tick that ends the active step pulses.
    pub fn tick_reset(&mut self, io: &mut impl MachineIo) {
        io.end_step_pulse();
    }
}
