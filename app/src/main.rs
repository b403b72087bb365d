#![no_main]
#![no_std]

use defmt_rtt as _;
use panic_probe as _;

use core::sync::atomic::{AtomicU32, Ordering};

use hal::{
    self,
    clocks::Clocks,
    pac,
    timer::{Timer, TimerConfig, TimerInterrupt},
};

use stepmill_core::{
    hal::TimerConv,
    interpolator::{step_driver::StepDriver, ItpSegment, SegmentRing},
    kinematics::Kinematics,
    settings::Settings,
    sync::RtSignals,
    Machine,
};

use cortex_m;

static SIGNALS: RtSignals = RtSignals::new();
static MS_TICKS: AtomicU32 = AtomicU32::new(0);
static mut SEGMENTS: SegmentRing = SegmentRing::new(ItpSegment::EMPTY);

#[rtic::app(device = pac, peripherals = true, dispatchers = [TIM7])]
mod app {
    use super::*;

    use stepmill_drivers::{
        clock::MilliClock,
        machine_io::{IoConfig, StepperIo},
        spindle::{IsrSpindle, SpindlePwm},
        step_timer::StepTimer,
    };

    type BoardMachine = Machine<StepperIo, StepTimer, SpindlePwm, MilliClock>;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        machine: BoardMachine,
        driver: StepDriver,
        step_timer: StepTimer,
        step_io: StepperIo,
        step_tool: IsrSpindle,
        ms_timer: Timer<pac::TIM4>,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local) {
        let dp = ctx.device;
        let clock_cfg = Clocks::default();
        clock_cfg.setup().unwrap();
        defmt::debug!(
            "SYSTEM: Clock frequency is {} MHz",
            clock_cfg.sysclk() / 1_000_000
        );

        let settings = Settings::default();
        let io_config = || IoConfig {
            step_invert_mask: settings.step_invert_mask,
            dir_invert_mask: settings.dir_invert_mask,
            limits_invert_mask: settings.limits_invert_mask,
            enable_invert: settings.step_enable_invert != 0,
        };

        // Both the machine and the step interrupt retune the step timer, so
        // the driver hands out two handles to the one peripheral. Same story
        // for the GPIO bank.
        let (timer, step_timer, clock_hz) = StepTimer::take(dp.TIM2, &clock_cfg);
        let conv = TimerConv::new(clock_hz);
        let io = StepperIo::new(io_config());
        let step_io = StepperIo::new(io_config());
        let tool = SpindlePwm::new(dp.TIM3, &clock_cfg);
        let clock = MilliClock::new(&MS_TICKS);

        let segments = unsafe { &mut *core::ptr::addr_of_mut!(SEGMENTS) };
        let (sgm_tx, sgm_rx) = segments.split();

        let mut machine = Machine::new(
            settings,
            Kinematics::Cartesian,
            &SIGNALS,
            sgm_tx,
            conv,
            io,
            timer,
            tool,
            clock,
        );
        machine.init();

        let driver = StepDriver::new(sgm_rx, &SIGNALS);

        let mut ms_timer = Timer::new_tim4(dp.TIM4, 1_000.0, TimerConfig::default(), &clock_cfg);
        ms_timer.enable_interrupt(TimerInterrupt::Update);
        ms_timer.enable();

        (
            Shared {},
            Local {
                machine,
                driver,
                step_timer,
                step_io,
                step_tool: IsrSpindle::new(),
                ms_timer,
            },
        )
    }

    #[idle(local = [machine])]
    fn idle(cx: idle::Context) -> ! {
        let machine = cx.local.machine;
        if machine.settings.homing_enabled {
            match machine.home() {
                Ok(()) => defmt::info!("homing cycle complete"),
                Err(_) => defmt::warn!("homing cycle failed"),
            }
        }
        loop {
            machine.dotasks();
        }
    }

    /// Step generation interrupt. The update event paces step emission, the
    /// compare event ends the pulse half a period later.
    #[task(binds = TIM2, local = [driver, step_timer, step_io, step_tool], priority = 3)]
    fn step_isr(cx: step_isr::Context) {
        let (update, pulse_end) = cx.local.step_timer.take_irq_flags();
        if update {
            cx.local
                .driver
                .tick_step(cx.local.step_io, cx.local.step_timer, cx.local.step_tool);
        }
        if pulse_end {
            cx.local.driver.tick_reset(cx.local.step_io);
        }
    }

    /// 1 kHz wall clock for dwells and switch debounce delays.
    #[task(binds = TIM4, local = [ms_timer], priority = 1)]
    fn ms_tick(cx: ms_tick::Context) {
        cx.local.ms_timer.clear_interrupt(TimerInterrupt::Update);
        MS_TICKS.fetch_add(1, Ordering::Relaxed);
    }
}

#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}
