//! GPIO bank implementing the logical step/dir/limit/control pin interface.

use hal::gpio::Pin;

use stepmill_core::hal::MachineIo;
use stepmill_core::machine::control;

use crate::pinout;

pub struct IoConfig {
    pub step_invert_mask: u8,
    pub dir_invert_mask: u8,
    pub limits_invert_mask: u8,
    pub enable_invert: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            step_invert_mask: 0,
            dir_invert_mask: 0,
            limits_invert_mask: 0,
            enable_invert: false,
        }
    }
}

pub struct StepperIo {
    step: [Pin; 6],
    dir: [Pin; 6],
    enable: Pin,
    limits: [Pin; 3],
    estop: Pin,
    door: Pin,
    feed_hold: Pin,
    cycle_start: Pin,
    probe: Pin,
    config: IoConfig,
}

impl StepperIo {
    pub fn new(config: IoConfig) -> Self {
        let mut io = Self {
            step: pinout::steppers::STEP.map(|def| def.init()),
            dir: pinout::steppers::DIR.map(|def| def.init()),
            enable: pinout::steppers::ENABLE.init(),
            limits: pinout::switches::LIMITS.map(|def| def.init()),
            estop: pinout::switches::ESTOP.init(),
            door: pinout::switches::SAFETY_DOOR.init(),
            feed_hold: pinout::switches::FEED_HOLD.init(),
            cycle_start: pinout::switches::CYCLE_START.init(),
            probe: pinout::switches::PROBE.init(),
            config,
        };
        io.end_step_pulse();
        io
    }

    fn drive(pin: &mut Pin, active: bool, inverted: bool) {
        if active != inverted {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

impl MachineIo for StepperIo {
    fn toggle_steps(&mut self, stepbits: u8) {
        for (i, pin) in self.step.iter_mut().enumerate() {
            let mask = 1u8 << i;
            if stepbits & mask != 0 {
                Self::drive(pin, true, self.config.step_invert_mask & mask != 0);
            }
        }
    }

    fn end_step_pulse(&mut self) {
        for (i, pin) in self.step.iter_mut().enumerate() {
            let mask = 1u8 << i;
            Self::drive(pin, false, self.config.step_invert_mask & mask != 0);
        }
    }

    fn set_dirs(&mut self, dirbits: u8) {
        for (i, pin) in self.dir.iter_mut().enumerate() {
            let mask = 1u8 << i;
            Self::drive(
                pin,
                dirbits & mask != 0,
                self.config.dir_invert_mask & mask != 0,
            );
        }
    }

    fn enable_steppers(&mut self, mask: u8) {
        Self::drive(&mut self.enable, mask != 0, self.config.enable_invert);
    }

    fn limits(&mut self) -> u8 {
        let mut active = 0u8;
        for (i, pin) in self.limits.iter_mut().enumerate() {
            if pin.is_high() {
                active |= 1 << i;
            }
        }
        active ^ self.config.limits_invert_mask
    }

    fn controls(&mut self) -> u8 {
        let mut active = 0u8;
        if self.estop.is_high() {
            active |= control::ESTOP;
        }
        if self.door.is_high() {
            active |= control::SAFETY_DOOR;
        }
        if self.feed_hold.is_high() {
            active |= control::FEED_HOLD;
        }
        if self.cycle_start.is_high() {
            active |= control::CYCLE_START;
        }
        active
    }

    fn probe(&mut self) -> bool {
        self.probe.is_high()
    }
}
