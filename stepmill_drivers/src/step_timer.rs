//! Step generation timer on TIM2.
//!
//! The update event paces the step interrupt; compare channel 1 sits at half
//! the reload value and ends the step pulse, giving a 50% duty pulse at any
//! rate. Period changes come from both the main task loop (start/stop) and
//! the step interrupt itself (segment rate changes), so the driver hands out
//! two register-level handles to the same configured peripheral.

use hal::clocks::Clocks;
use hal::pac;

use stepmill_core::hal::{ItpTimer, TimerPeriod};

pub struct StepTimer {
    _private: (),
}

impl StepTimer {
    /// Configures TIM2 for step generation and returns one handle for the
    /// main context and one for the interrupt.
    pub fn take(tim: pac::TIM2, clocks: &Clocks) -> (Self, Self, u32) {
        let clock_hz = clocks.apb1_timer();
        // enable the peripheral clock, leave the counter stopped
        unsafe {
            let rcc = &(*pac::RCC::ptr());
            rcc.apb1enr1.modify(|_, w| w.tim2en().set_bit());
        }
        tim.cr1.modify(|_, w| w.arpe().set_bit());
        tim.dier
            .modify(|_, w| w.uie().set_bit().cc1ie().set_bit());
        (StepTimer { _private: () }, StepTimer { _private: () }, clock_hz)
    }

    fn regs() -> &'static pac::tim2::RegisterBlock {
        unsafe { &(*pac::TIM2::ptr()) }
    }

    fn apply(period: TimerPeriod) {
        let regs = Self::regs();
        unsafe {
            regs.psc.write(|w| w.bits(period.prescaler as u32));
            regs.arr.write(|w| w.bits(period.counter as u32));
            // pulse reset event at half period
            regs.ccr1().write(|w| w.bits((period.counter >> 1) as u32));
        }
    }

    /// Clears and returns the pending interrupt flags: `(update, pulse_end)`.
    pub fn take_irq_flags(&mut self) -> (bool, bool) {
        let regs = Self::regs();
        let sr = regs.sr.read();
        let update = sr.uif().bit_is_set();
        let pulse_end = sr.cc1if().bit_is_set();
        regs.sr
            .modify(|_, w| w.uif().clear_bit().cc1if().clear_bit());
        (update, pulse_end)
    }
}

impl ItpTimer for StepTimer {
    fn start(&mut self, period: TimerPeriod) {
        let regs = Self::regs();
        Self::apply(period);
        unsafe {
            regs.cnt.write(|w| w.bits(0));
            // force the prescaler load
            regs.egr.write(|w| w.ug().set_bit());
        }
        regs.sr.modify(|_, w| w.uif().clear_bit());
        regs.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn change(&mut self, period: TimerPeriod) {
        // preloaded registers latch at the next update event
        Self::apply(period);
    }

    fn stop(&mut self) {
        let regs = Self::regs();
        regs.cr1.modify(|_, w| w.cen().clear_bit());
        regs.sr
            .modify(|_, w| w.uif().clear_bit().cc1if().clear_bit());
    }
}
