//! PWM spindle with a direction line and coolant relays, on TIM3.

use hal::{
    clocks::Clocks,
    pac,
    pac::TIM3,
    timer::{OutputCompare, TimChannel, Timer, TimerConfig},
};

use hal::gpio::Pin;
use stepmill_core::hal::Tool;

use crate::pinout;

/// PWM carrier frequency (Hz).
const SPINDLE_PWM_FREQ: f32 = 5_000.0;

pub struct SpindlePwm {
    tim: Timer<TIM3>,
    dir: Pin,
    flood: Pin,
    mist: Pin,
    speed: i16,
}

impl SpindlePwm {
    pub fn new(tim3: TIM3, clock_cfg: &Clocks) -> Self {
        let timer = Timer::new_tim3(tim3, SPINDLE_PWM_FREQ, TimerConfig::default(), clock_cfg);
        Self {
            tim: timer,
            dir: pinout::spindle::SPINDLE_DIR.init(),
            flood: pinout::spindle::COOLANT_FLOOD.init(),
            mist: pinout::spindle::COOLANT_MIST.init(),
            speed: 0,
        }
    }
}

impl Tool for SpindlePwm {
    fn startup(&mut self) {
        pinout::spindle::SPINDLE_PWM.init();
        self.tim
            .enable_pwm_output(TimChannel::C1, OutputCompare::Pwm1, 0.0);
        self.tim.enable();
    }

    fn shutdown(&mut self) {
        self.set_speed(0);
        self.set_coolant(0);
        self.tim.disable();
    }

    /// Signed PWM target in the -255..255 range; the sign drives the
    /// direction line.
    fn set_speed(&mut self, speed: i16) {
        self.speed = speed;
        if speed < 0 {
            self.dir.set_high();
        } else {
            self.dir.set_low();
        }
        let duty = speed.unsigned_abs().min(255) as u32;
        let period = self.tim.get_max_duty();
        self.tim.set_duty(TimChannel::C1, duty * period / 255);
    }

    fn set_coolant(&mut self, mask: u8) {
        if mask & 1 != 0 {
            self.flood.set_high();
        } else {
            self.flood.set_low();
        }
        if mask & 2 != 0 {
            self.mist.set_high();
        } else {
            self.mist.set_low();
        }
    }

    fn speed(&self) -> i16 {
        self.speed
    }
}

/// Spindle handle for the step interrupt. Block-boundary speed changes land
/// here; configuration, coolant and shutdown stay with the main context
/// handle, so this one only retunes the compare register.
pub struct IsrSpindle {
    dir: Pin,
    speed: i16,
}

impl IsrSpindle {
    pub fn new() -> Self {
        Self {
            dir: pinout::spindle::SPINDLE_DIR.init(),
            speed: 0,
        }
    }
}

impl Default for IsrSpindle {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for IsrSpindle {
    fn startup(&mut self) {}

    fn shutdown(&mut self) {}

    fn set_speed(&mut self, speed: i16) {
        self.speed = speed;
        if speed < 0 {
            self.dir.set_high();
        } else {
            self.dir.set_low();
        }
        let duty = speed.unsigned_abs().min(255) as u32;
        unsafe {
            let regs = &(*pac::TIM3::ptr());
            let period = regs.arr.read().bits();
            regs.ccr1().write(|w| w.bits(duty * period / 255));
        }
    }

    fn set_coolant(&mut self, _mask: u8) {}

    fn speed(&self) -> i16 {
        self.speed
    }
}
