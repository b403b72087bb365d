//! Full-pipeline tests on mock hardware.
//!
//! A mock pin bank, step timer, tool and clock stand in for the board crate.
//! Single-phase tests interleave the task loop and the step tick by hand;
//! homing and probing run the step tick on a second thread gated by the mock
//! timer, the way the interrupt is gated by the real one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use stepmill_core::config::{AXIS_COUNT, STEPPER_COUNT};
use stepmill_core::hal::{Clock, ItpTimer, MachineIo, TimerConv, TimerPeriod, Tool};
use stepmill_core::interpolator::step_driver::StepDriver;
use stepmill_core::interpolator::{ItpSegment, SegmentRing};
use stepmill_core::kinematics::Kinematics;
use stepmill_core::machine::{cmd_code, control, exec, Alarm, Status};
use stepmill_core::motion::MotionData;
use stepmill_core::settings::Settings;
use stepmill_core::sync::RtSignals;
use stepmill_core::{enqueue_realtime_command, Machine};

#[derive(Default)]
struct IoShared {
    controls: u8,
    probe_level: bool,
    forced_limits: u8,
    /// Limit switches trip when an axis position falls to this step count.
    limit_switch_steps: Option<i32>,
    /// Probe contact closes when the X position reaches this step count.
    probe_switch_steps: Option<i32>,
    step_edges: [u64; STEPPER_COUNT],
    dirbits: u8,
}

#[derive(Clone)]
struct MockIo {
    shared: Arc<Mutex<IoShared>>,
    signals: &'static RtSignals,
}

impl MachineIo for MockIo {
    fn toggle_steps(&mut self, stepbits: u8) {
        let mut shared = self.shared.lock().unwrap();
        for (i, edges) in shared.step_edges.iter_mut().enumerate() {
            if stepbits & (1 << i) != 0 {
                *edges += 1;
            }
        }
    }

    fn end_step_pulse(&mut self) {}

    fn set_dirs(&mut self, dirbits: u8) {
        self.shared.lock().unwrap().dirbits = dirbits;
    }

    fn enable_steppers(&mut self, _mask: u8) {}

    fn limits(&mut self) -> u8 {
        let shared = self.shared.lock().unwrap();
        let mut active = shared.forced_limits;
        if let Some(at) = shared.limit_switch_steps {
            let pos = self.signals.pos.snapshot();
            for (i, pos) in pos.iter().enumerate().take(3) {
                if *pos <= at {
                    active |= 1 << i;
                }
            }
        }
        active
    }

    fn controls(&mut self) -> u8 {
        self.shared.lock().unwrap().controls
    }

    fn probe(&mut self) -> bool {
        let shared = self.shared.lock().unwrap();
        if shared.probe_level {
            return true;
        }
        if let Some(at) = shared.probe_switch_steps {
            return self.signals.pos.snapshot()[0] >= at;
        }
        false
    }
}

struct TimerState {
    running: AtomicBool,
    starts: AtomicU32,
}

/// Main-context timer handle. Start/stop synchronize with the tick thread
/// through the gate, so a returned `stop` guarantees no tick is in flight.
struct MockTimer {
    state: Arc<TimerState>,
    gate: Arc<Mutex<()>>,
}

impl ItpTimer for MockTimer {
    fn start(&mut self, _period: TimerPeriod) {
        let _gate = self.gate.lock().unwrap();
        self.state.running.store(true, Ordering::Release);
        self.state.starts.fetch_add(1, Ordering::Relaxed);
    }

    fn change(&mut self, _period: TimerPeriod) {}

    fn stop(&mut self) {
        let _gate = self.gate.lock().unwrap();
        self.state.running.store(false, Ordering::Release);
    }
}

/// Tick-side timer handle. Never takes the gate; the tick loop already holds
/// it.
struct IsrTimer {
    state: Arc<TimerState>,
}

impl ItpTimer for IsrTimer {
    fn start(&mut self, _period: TimerPeriod) {
        self.state.running.store(true, Ordering::Release);
    }

    fn change(&mut self, _period: TimerPeriod) {}

    fn stop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct ToolState {
    speed: i16,
    coolant: u8,
}

#[derive(Clone)]
struct MockTool {
    state: Arc<Mutex<ToolState>>,
}

impl Tool for MockTool {
    fn startup(&mut self) {}

    fn shutdown(&mut self) {}

    fn set_speed(&mut self, speed: i16) {
        self.state.lock().unwrap().speed = speed;
    }

    fn set_coolant(&mut self, mask: u8) {
        self.state.lock().unwrap().coolant = mask;
    }

    fn speed(&self) -> i16 {
        self.state.lock().unwrap().speed
    }
}

/// Self-advancing millisecond clock; every sample moves time forward so
/// delay loops terminate deterministically.
struct MockClock {
    ticks: Arc<AtomicU32>,
}

impl Clock for MockClock {
    fn millis(&self) -> u32 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }
}

struct DriverSide {
    driver: StepDriver,
    io: MockIo,
    timer: IsrTimer,
    tool: MockTool,
}

impl DriverSide {
    fn tick(&mut self) {
        self.driver
            .tick_step(&mut self.io, &mut self.timer, &mut self.tool);
        self.driver.tick_reset(&mut self.io);
    }
}

struct Bench {
    machine: Machine<MockIo, MockTimer, MockTool, MockClock>,
    driver: DriverSide,
    io: Arc<Mutex<IoShared>>,
    timer: Arc<TimerState>,
    gate: Arc<Mutex<()>>,
    tool: Arc<Mutex<ToolState>>,
    signals: &'static RtSignals,
}

fn bench(settings: Settings) -> Bench {
    bench_with(settings, Kinematics::Cartesian)
}

fn bench_with(settings: Settings, kinematics: Kinematics) -> Bench {
    let signals: &'static RtSignals = Box::leak(Box::new(RtSignals::new()));
    let ring: &'static mut SegmentRing = Box::leak(Box::new(SegmentRing::new(ItpSegment::EMPTY)));
    let (sgm_tx, sgm_rx) = ring.split();

    let io = Arc::new(Mutex::new(IoShared::default()));
    let timer = Arc::new(TimerState {
        running: AtomicBool::new(false),
        starts: AtomicU32::new(0),
    });
    let gate = Arc::new(Mutex::new(()));
    let tool = Arc::new(Mutex::new(ToolState::default()));

    let machine_io = MockIo {
        shared: Arc::clone(&io),
        signals,
    };
    let machine_tool = MockTool {
        state: Arc::clone(&tool),
    };
    let mut machine = Machine::new(
        settings,
        kinematics,
        signals,
        sgm_tx,
        TimerConv::new(1_000_000),
        machine_io.clone(),
        MockTimer {
            state: Arc::clone(&timer),
            gate: Arc::clone(&gate),
        },
        machine_tool.clone(),
        MockClock {
            ticks: Arc::new(AtomicU32::new(0)),
        },
    );
    machine.init();

    let driver = DriverSide {
        driver: StepDriver::new(sgm_rx, signals),
        io: machine_io,
        timer: IsrTimer {
            state: Arc::clone(&timer),
        },
        tool: machine_tool,
    };

    Bench {
        machine,
        driver,
        io,
        timer,
        gate,
        tool,
        signals,
    }
}

const TICK_LIMIT: u64 = 2_000_000;

/// Alternates the task loop with step ticks until step output stops.
fn cycle(machine: &mut Machine<MockIo, MockTimer, MockTool, MockClock>, drv: &mut DriverSide) -> u64 {
    let mut ticks = 0u64;
    loop {
        machine.dotasks();
        if machine.signals().exec.get(exec::RUN) == 0 {
            return ticks;
        }
        drv.tick();
        ticks += 1;
        assert!(ticks < TICK_LIMIT, "pipeline never drained");
    }
}

fn run_ticks(
    machine: &mut Machine<MockIo, MockTimer, MockTool, MockClock>,
    drv: &mut DriverSide,
    count: u64,
) {
    for _ in 0..count {
        machine.dotasks();
        drv.tick();
    }
}

/// Runs the step tick on its own thread, gated by the mock timer like the
/// interrupt is by the real one. Returns a stop flag and the join handle.
fn spawn_ticker(mut drv: DriverSide, timer: Arc<TimerState>, gate: Arc<Mutex<()>>) -> (Arc<AtomicBool>, std::thread::JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&done);
    let handle = std::thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            {
                let _gate = gate.lock().unwrap();
                if timer.running.load(Ordering::Acquire) {
                    drv.tick();
                }
            }
            std::thread::yield_now();
        }
    });
    (done, handle)
}

#[test]
fn straight_line_emits_exact_step_counts() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 2.0;
    target[1] = 1.0;
    let data = MotionData {
        feed: 300.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    let pos = bench.signals.pos.snapshot();
    assert_eq!(pos[0], 500);
    assert_eq!(pos[1], 250);
    assert!(pos[2..].iter().all(|&steps| steps == 0));

    // every counted step left the pin bank as an edge
    let shared = bench.io.lock().unwrap();
    assert_eq!(shared.step_edges[0], 500);
    assert_eq!(shared.step_edges[1], 250);
    assert_eq!(shared.dirbits, 0);
    drop(shared);

    let end = bench.machine.position().unwrap();
    assert!((end[0] - 2.0).abs() < 1.0 / 250.0);
    assert!((end[1] - 1.0).abs() < 1.0 / 250.0);
    assert_eq!(bench.signals.exec.get(exec::ALL), 0);
}

#[test]
fn reversed_axis_sets_direction_bit() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = -1.0;
    let data = MotionData {
        feed: 200.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    assert_eq!(bench.signals.pos.snapshot()[0], -250);
    assert_eq!(bench.io.lock().unwrap().dirbits & 1, 1);
}

#[test]
fn minor_axis_tracks_the_bresenham_line_mid_block() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 2.0;
    target[1] = 1.0;
    let data = MotionData {
        feed: 300.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    run_ticks(&mut bench.machine, &mut bench.driver, 200);

    let shared = bench.io.lock().unwrap();
    let x = shared.step_edges[0];
    let y = shared.step_edges[1];
    drop(shared);
    assert!(x > 10 && x < 490, "sampled outside the block: {}", x);
    // the slave axis never drifts more than one step off the ideal line
    assert!(
        (2 * y as i64 - x as i64).abs() <= 2,
        "x {} y {} off the line",
        x,
        y
    );
    // counters reconstruct the emitted edges exactly, mid-block included
    let pos = bench.signals.pos.snapshot();
    assert_eq!(pos[0] as u64, x);
    assert_eq!(pos[1] as u64, y);
}

#[test]
fn three_axis_trapezoid_ramps_at_the_computed_distance() {
    // (4, 2, 1) mm at 300 mm/min: 1000 main steps, nominal 1091 st/s,
    // 2500 st/s^2 along the line, so the ramp covers v^2/2a = 238 steps
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 4.0;
    target[1] = 2.0;
    target[2] = 1.0;
    let data = MotionData {
        feed: 300.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();

    let mut max_feed = 0.0f32;
    let mut edges_at_ramp_end = None;
    let mut last_feed = 0.0f32;
    let mut ticks = 0u64;
    loop {
        bench.machine.dotasks();
        if bench.signals.exec.get(exec::RUN) == 0 {
            break;
        }
        bench.driver.tick();
        ticks += 1;
        assert!(ticks < TICK_LIMIT, "pipeline never drained");

        let feed = bench.signals.rt_feed();
        max_feed = max_feed.max(feed);
        if feed > 0.0 {
            last_feed = feed;
        }
        if edges_at_ramp_end.is_none() && feed > 299.0 {
            edges_at_ramp_end = Some(bench.io.lock().unwrap().step_edges[0]);
        }
    }

    let pos = bench.signals.pos.snapshot();
    assert_eq!(pos[0], 1000);
    assert_eq!(pos[1], 500);
    assert_eq!(pos[2], 250);
    assert!(max_feed > 299.0 && max_feed < 301.0, "peak {}", max_feed);
    let ramp = edges_at_ramp_end.unwrap();
    assert!((236..=242).contains(&ramp), "ramp ended at {} steps", ramp);
    // the tail decelerates back toward rest before the queue drains
    assert!(last_feed < 50.0, "still at {} when the queue dried", last_feed);
}

#[test]
fn slow_feed_oversampling_keeps_exact_step_counts() {
    // 125 st/s sits below the oversampling cutoff for the whole cruise
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 0.4;
    let data = MotionData {
        feed: 30.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    assert_eq!(bench.signals.pos.snapshot()[0], 100);
    assert_eq!(bench.io.lock().unwrap().step_edges[0], 100);
    assert_eq!(bench.signals.exec.get(exec::ALL), 0);
}

#[test]
fn feed_hold_pauses_then_resumes_to_completion() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 4.0;
    let data = MotionData {
        feed: 400.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    run_ticks(&mut bench.machine, &mut bench.driver, 400);

    assert!(enqueue_realtime_command(bench.signals, cmd_code::FEED_HOLD));
    cycle(&mut bench.machine, &mut bench.driver);

    assert_ne!(bench.signals.exec.get(exec::HOLD), 0);
    let held = bench.signals.pos.snapshot()[0];
    assert!(held > 0 && held < 1000, "held at {}", held);

    assert!(enqueue_realtime_command(bench.signals, cmd_code::CYCLE_START));
    cycle(&mut bench.machine, &mut bench.driver);

    assert_eq!(bench.signals.exec.get(exec::ALL), 0);
    assert_eq!(bench.signals.pos.snapshot()[0], 1000);
    assert_eq!(bench.io.lock().unwrap().step_edges[0], 1000);
}

#[test]
fn estop_kills_motion_and_freezes_position() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 4.0;
    let data = MotionData {
        feed: 400.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    run_ticks(&mut bench.machine, &mut bench.driver, 300);

    bench.io.lock().unwrap().controls = control::ESTOP;
    assert!(!bench.machine.dotasks());
    assert_ne!(bench.signals.exec.get(exec::KILL), 0);
    assert_eq!(bench.machine.alarm_code(), Alarm::EmergencyStop);

    // no further edge may come out of the step tick
    let frozen = bench.signals.pos.snapshot();
    let edges = bench.io.lock().unwrap().step_edges;
    for _ in 0..10 {
        bench.driver.tick();
    }
    assert_eq!(bench.signals.pos.snapshot(), frozen);
    assert_eq!(bench.io.lock().unwrap().step_edges, edges);

    // releasing the switch allows a forced unlock
    bench.io.lock().unwrap().controls = 0;
    bench.machine.dotasks();
    assert!(bench.machine.unlock(true));
    assert!(!bench.machine.has_alarm());
}

#[test]
fn soft_limit_violation_trips_alarm() {
    let mut settings = Settings::default();
    settings.soft_limits_enabled = true;
    let mut bench = bench(settings);
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 250.0;
    bench
        .machine
        .line(&mut target, &MotionData::default())
        .unwrap();
    assert_eq!(bench.machine.alarm_code(), Alarm::SoftLimit);
    assert!(bench.machine.has_alarm());
}

#[test]
fn jog_outside_envelope_is_refused_without_alarm() {
    let mut settings = Settings::default();
    settings.soft_limits_enabled = true;
    let mut bench = bench(settings);
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 250.0;
    let result = bench.machine.jog(&mut target, &MotionData::default());
    assert_eq!(result, Err(Status::TravelExceeded));
    assert!(!bench.machine.has_alarm());
    assert_eq!(bench.signals.exec.get(exec::JOG), 0);
}

#[test]
fn backlash_take_up_moves_motor_but_not_axis() {
    let mut settings = Settings::default();
    settings.backlash_mm = [0.1; AXIS_COUNT];
    let mut bench = bench(settings);
    let data = MotionData {
        feed: 300.0,
        ..MotionData::default()
    };

    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 1.0;
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);
    assert_eq!(bench.signals.pos.snapshot()[0], 250);

    target[0] = 0.0;
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    // 25 take-up steps on the reversal, invisible to the axis position
    assert_eq!(bench.signals.pos.snapshot()[0], 0);
    assert_eq!(bench.io.lock().unwrap().step_edges[0], 250 + 25 + 250);
}

#[test]
fn spindle_and_coolant_follow_the_block() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 1.0;
    let data = MotionData {
        feed: 300.0,
        spindle: 500,
        coolant: 1,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    let tool = bench.tool.lock().unwrap();
    // 500 of 1000 rpm onto the 8 bit output range
    assert_eq!(tool.speed, 127);
    assert_eq!(tool.coolant, 1);
}

#[test]
fn feed_override_applies_mid_motion() {
    let mut bench = bench(Settings::default());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 6.0;
    let data = MotionData {
        feed: 400.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    run_ticks(&mut bench.machine, &mut bench.driver, 300);

    assert!(enqueue_realtime_command(
        bench.signals,
        cmd_code::FEED_DEC_COARSE
    ));
    cycle(&mut bench.machine, &mut bench.driver);

    assert_eq!(bench.machine.override_values().0, 90);
    assert_eq!(bench.signals.pos.snapshot()[0], 1500);
}

#[test]
fn check_mode_validates_without_stepping() {
    let mut bench = bench(Settings::default());
    assert!(bench.machine.toggle_check_mode());
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 3.0;
    bench
        .machine
        .line(&mut target, &MotionData::default())
        .unwrap();
    cycle(&mut bench.machine, &mut bench.driver);
    assert_eq!(bench.signals.pos.snapshot(), [0; STEPPER_COUNT]);
    assert!(!bench.machine.toggle_check_mode());
}

#[test]
fn dwell_returns_after_the_requested_time() {
    let mut bench = bench(Settings::default());
    let data = MotionData {
        dwell_ms: 5,
        ..MotionData::default()
    };
    assert_eq!(bench.machine.dwell(&data), Ok(()));
}

#[test]
fn unknown_realtime_bytes_are_rejected() {
    let signals: &'static RtSignals = Box::leak(Box::new(RtSignals::new()));
    assert!(!enqueue_realtime_command(signals, b'G'));
    assert!(!enqueue_realtime_command(signals, 0x00));
    assert!(enqueue_realtime_command(signals, cmd_code::RESET));
}

#[test]
fn homing_cycle_seeks_and_releases_each_axis() {
    let mut settings = Settings::default();
    settings.homing_enabled = true;
    settings.homing_fast_feed = 300.0;
    settings.homing_slow_feed = 120.0;
    settings.debounce_ms = 5;
    settings.max_distance = [200.0, 200.0, 200.0, 0.0, 0.0, 0.0];
    let mut bench = bench(settings);
    // switches sit 5 mm into negative travel
    bench.io.lock().unwrap().limit_switch_steps = Some(-1250);

    assert_ne!(bench.signals.exec.get(exec::HALT), 0);

    let (done, handle) = spawn_ticker(
        bench.driver,
        Arc::clone(&bench.timer),
        Arc::clone(&bench.gate),
    );
    let result = bench.machine.home();
    done.store(true, Ordering::Release);
    handle.join().unwrap();

    assert_eq!(result, Ok(()));
    assert!(!bench.machine.has_alarm());
    assert_eq!(bench.signals.exec.get(exec::ALL), 0);
    // the pull-off position is the machine origin
    assert_eq!(bench.signals.pos.snapshot(), [0; STEPPER_COUNT]);
    assert!(bench.timer.starts.load(Ordering::Relaxed) >= 6);
}

#[test]
fn homing_without_switch_contact_alarms() {
    let mut settings = Settings::default();
    settings.homing_enabled = true;
    settings.debounce_ms = 2;
    settings.max_distance = [10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
    let mut bench = bench(settings);
    // no limit switch ever closes

    let (done, handle) = spawn_ticker(
        bench.driver,
        Arc::clone(&bench.timer),
        Arc::clone(&bench.gate),
    );
    let result = bench.machine.home();
    done.store(true, Ordering::Release);
    handle.join().unwrap();

    assert_eq!(result, Err(Status::NoLimitSwitch));
    assert_eq!(bench.machine.alarm_code(), Alarm::HomingFailApproach);
}

#[test]
fn probe_stops_at_contact_and_reports_the_position() {
    let mut bench = bench(Settings::default());
    bench.io.lock().unwrap().probe_switch_steps = Some(500);

    let (done, handle) = spawn_ticker(
        bench.driver,
        Arc::clone(&bench.timer),
        Arc::clone(&bench.gate),
    );
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 5.0;
    let result = bench
        .machine
        .probe(target, false, &MotionData::default());
    done.store(true, Ordering::Release);
    handle.join().unwrap();

    let captured = result.unwrap();
    // contact closes at 500 steps; the free-running mock tick can land a few
    // more before the task loop samples the probe
    assert!(
        captured[0] >= 500 && captured[0] < 1250,
        "captured at {}",
        captured[0]
    );
    assert!(!bench.machine.has_alarm());
    assert_eq!(bench.signals.exec.get(exec::RUN), 0);
}

#[test]
fn probe_already_closed_fails_immediately() {
    let mut bench = bench(Settings::default());
    bench.io.lock().unwrap().probe_level = true;
    let target = [0.0f32; AXIS_COUNT];
    let result = bench.machine.probe(target, false, &MotionData::default());
    assert_eq!(result, Err(Status::Locked));
    assert_eq!(bench.machine.alarm_code(), Alarm::ProbeFailInitial);
}

#[test]
fn corexy_line_lands_on_the_cartesian_target() {
    let mut bench = bench_with(Settings::default(), Kinematics::CoreXy);
    let mut target = [0.0f32; AXIS_COUNT];
    target[0] = 2.0;
    target[1] = 1.0;
    let data = MotionData {
        feed: 300.0,
        ..MotionData::default()
    };
    bench.machine.line(&mut target, &data).unwrap();
    cycle(&mut bench.machine, &mut bench.driver);

    // motors carry the mixed sum/difference, the axis position round-trips
    let pos = bench.signals.pos.snapshot();
    assert_eq!(pos[0], 750);
    assert_eq!(pos[1], 250);
    let end = bench.machine.position().unwrap();
    assert!((end[0] - 2.0).abs() < 1.0 / 250.0);
    assert!((end[1] - 1.0).abs() < 1.0 / 250.0);
}
