//! Shared state crossing the step-interrupt boundary.
//!
//! Everything in here is touched from both the timer interrupt and the main
//! task loop, so every field is an atomic and every multi-word read happens
//! inside one critical section.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::config::STEPPER_COUNT;
use crate::machine::Alarm;

/// Atomic execution-state bitmask. Set and clear are single read-modify-write
/// operations so interrupt and main context can interleave without tearing.
pub struct ExecFlags(AtomicU8);

impl ExecFlags {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Returns the active bits within `mask`.
    #[inline]
    pub fn get(&self, mask: u8) -> u8 {
        self.0.load(Ordering::Acquire) & mask
    }

    #[inline]
    pub fn set(&self, mask: u8) {
        self.0.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear(&self, mask: u8) {
        self.0.fetch_and(!mask, Ordering::AcqRel);
    }
}

/// Realtime step position, one counter per stepper channel.
///
/// The interrupt nudges single axes; readers take a whole-array snapshot in
/// one critical section so the axes are always mutually consistent.
pub struct RtPosition([AtomicI32; STEPPER_COUNT]);

impl RtPosition {
    pub const fn new() -> Self {
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self([ZERO; STEPPER_COUNT])
    }

    #[inline]
    pub fn offset(&self, stepper: usize, delta: i32) {
        self.0[stepper].fetch_add(delta, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> [i32; STEPPER_COUNT] {
        critical_section::with(|_| {
            let mut out = [0i32; STEPPER_COUNT];
            for (out, pos) in out.iter_mut().zip(self.0.iter()) {
                *out = pos.load(Ordering::Relaxed);
            }
            out
        })
    }

    pub fn store(&self, steps: &[i32; STEPPER_COUNT]) {
        critical_section::with(|_| {
            for (pos, steps) in self.0.iter().zip(steps.iter()) {
                pos.store(*steps, Ordering::Relaxed);
            }
        });
    }
}

/// All shared machine state reachable from interrupt context. One static
/// instance per firmware image; the machine and the step driver each hold a
/// reference.
pub struct RtSignals {
    pub exec: ExecFlags,
    pub pos: RtPosition,
    alarm: AtomicU8,
    rt_cmd: AtomicU8,
    feed_cmd: AtomicU8,
    tool_cmd: AtomicU8,
    itp_active: AtomicBool,
    rt_feed_bits: AtomicU32,
}

impl RtSignals {
    pub const fn new() -> Self {
        Self {
            exec: ExecFlags::new(),
            pos: RtPosition::new(),
            alarm: AtomicU8::new(0),
            rt_cmd: AtomicU8::new(0),
            feed_cmd: AtomicU8::new(0),
            tool_cmd: AtomicU8::new(0),
            itp_active: AtomicBool::new(false),
            rt_feed_bits: AtomicU32::new(0),
        }
    }

    pub fn set_alarm(&self, alarm: Alarm) {
        self.alarm.store(alarm as u8, Ordering::Release);
    }

    pub fn alarm(&self) -> Alarm {
        Alarm::from_u8(self.alarm.load(Ordering::Acquire))
    }

    /// Queues realtime state commands (`machine::rt_cmd` bits).
    #[inline]
    pub fn push_rt_cmd(&self, mask: u8) {
        self.rt_cmd.fetch_or(mask, Ordering::AcqRel);
    }

    /// Drains all pending state commands.
    #[inline]
    pub fn take_rt_cmd(&self) -> u8 {
        self.rt_cmd.swap(0, Ordering::AcqRel)
    }

    #[inline]
    pub fn push_feed_cmd(&self, mask: u8) {
        self.feed_cmd.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline]
    pub fn take_feed_cmd(&self) -> u8 {
        self.feed_cmd.swap(0, Ordering::AcqRel)
    }

    #[inline]
    pub fn push_tool_cmd(&self, mask: u8) {
        self.tool_cmd.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline]
    pub fn take_tool_cmd(&self) -> u8 {
        self.tool_cmd.swap(0, Ordering::AcqRel)
    }

    /// Whether the step driver currently holds a segment.
    #[inline]
    pub fn itp_active(&self) -> bool {
        self.itp_active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_itp_active(&self, active: bool) {
        self.itp_active.store(active, Ordering::Release);
    }

    /// Feed rate of the executing segment (mm/min).
    pub fn rt_feed(&self) -> f32 {
        f32::from_bits(self.rt_feed_bits.load(Ordering::Relaxed))
    }

    pub fn set_rt_feed(&self, feed: f32) {
        self.rt_feed_bits.store(feed.to_bits(), Ordering::Relaxed);
    }
}

/// Bounded single-producer single-consumer ring. One index is owned by each
/// side; the opposite index is only ever loaded. Capacity is `N - 1`.
///
/// `T` must be `Copy` so slots can be seeded at const time from a caller
/// value and handed out by value; element reads and writes happen strictly
/// between the index checks, which carry the acquire/release ordering.
pub struct SpscRing<T: Copy, const N: usize> {
    data: UnsafeCell<[T; N]>,
    read: AtomicUsize,
    write: AtomicUsize,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for SpscRing<T, N> {}

impl<T: Copy, const N: usize> SpscRing<T, N> {
    pub const fn new(seed: T) -> Self {
        Self {
            data: UnsafeCell::new([seed; N]),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    /// Splits the ring into its two endpoints. Called once at init.
    pub fn split(&'static mut self) -> (RingProducer<T, N>, RingConsumer<T, N>) {
        let ring: &'static SpscRing<T, N> = self;
        (RingProducer { ring }, RingConsumer { ring })
    }

    const fn next(index: usize) -> usize {
        if index + 1 == N {
            0
        } else {
            index + 1
        }
    }
}

pub struct RingProducer<T: Copy + 'static, const N: usize> {
    ring: &'static SpscRing<T, N>,
}

impl<T: Copy, const N: usize> RingProducer<T, N> {
    /// Whether at least one free slot exists.
    pub fn ready(&self) -> bool {
        let next = SpscRing::<T, N>::next(self.ring.write.load(Ordering::Relaxed));
        next != self.ring.read.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.write.load(Ordering::Relaxed) == self.ring.read.load(Ordering::Acquire)
    }

    pub fn enqueue(&mut self, value: T) -> Result<(), T> {
        let write = self.ring.write.load(Ordering::Relaxed);
        let next = SpscRing::<T, N>::next(write);
        if next == self.ring.read.load(Ordering::Acquire) {
            return Err(value);
        }
        unsafe {
            (*self.ring.data.get())[write] = value;
        }
        self.ring.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Oldest queued element, if any. Only valid while the consumer is
    /// stopped.
    pub fn peek_head(&self) -> Option<T> {
        let read = self.ring.read.load(Ordering::Acquire);
        if read == self.ring.write.load(Ordering::Relaxed) {
            return None;
        }
        Some(unsafe { (*self.ring.data.get())[read] })
    }

    /// Drops every queued element. Only valid while the consumer is stopped.
    pub fn clear(&mut self) {
        let read = self.ring.read.load(Ordering::Acquire);
        self.ring.write.store(read, Ordering::Release);
    }
}

pub struct RingConsumer<T: Copy + 'static, const N: usize> {
    ring: &'static SpscRing<T, N>,
}

impl<T: Copy, const N: usize> RingConsumer<T, N> {
    pub fn dequeue(&mut self) -> Option<T> {
        let read = self.ring.read.load(Ordering::Relaxed);
        if read == self.ring.write.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.ring.data.get())[read] };
        self.ring.read.store(SpscRing::<T, N>::next(read), Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read.load(Ordering::Relaxed) == self.ring.write.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::exec;

    #[test]
    fn exec_bits_set_and_clear_independently() {
        let flags = ExecFlags::new();
        flags.set(exec::RUN | exec::HOLD);
        assert_eq!(flags.get(exec::ALL), exec::RUN | exec::HOLD);
        flags.clear(exec::RUN);
        assert_eq!(flags.get(exec::ALL), exec::HOLD);
        assert_eq!(flags.get(exec::RUN), 0);
    }

    #[test]
    fn position_snapshot_matches_offsets() {
        let pos = RtPosition::new();
        pos.offset(0, 5);
        pos.offset(0, -2);
        pos.offset(2, 7);
        let snap = pos.snapshot();
        assert_eq!(snap[0], 3);
        assert_eq!(snap[1], 0);
        assert_eq!(snap[2], 7);
    }

    #[test]
    fn ring_preserves_fifo_order_and_capacity() {
        let ring: &'static mut SpscRing<u32, 4> = Box::leak(Box::new(SpscRing::new(0)));
        let (mut tx, mut rx) = ring.split();

        assert!(rx.dequeue().is_none());
        assert!(tx.enqueue(1).is_ok());
        assert!(tx.enqueue(2).is_ok());
        assert!(tx.enqueue(3).is_ok());
        // capacity is N - 1
        assert!(!tx.ready());
        assert_eq!(tx.enqueue(4), Err(4));

        assert_eq!(tx.peek_head(), Some(1));
        assert_eq!(rx.dequeue(), Some(1));
        assert!(tx.ready());
        assert!(tx.enqueue(4).is_ok());
        assert_eq!(rx.dequeue(), Some(2));
        assert_eq!(rx.dequeue(), Some(3));
        assert_eq!(rx.dequeue(), Some(4));
        assert!(rx.is_empty());
    }

    #[test]
    fn ring_producer_clear_empties_queue() {
        let ring: &'static mut SpscRing<u32, 4> = Box::leak(Box::new(SpscRing::new(0)));
        let (mut tx, mut rx) = ring.split();
        tx.enqueue(7).unwrap();
        tx.enqueue(8).unwrap();
        tx.clear();
        assert!(tx.is_empty());
        assert!(rx.dequeue().is_none());
        // ring stays usable after a clear
        tx.enqueue(9).unwrap();
        assert_eq!(rx.dequeue(), Some(9));
    }

    #[test]
    fn rt_commands_drain_once() {
        let signals = RtSignals::new();
        signals.push_rt_cmd(crate::machine::rt_cmd::FEED_HOLD);
        signals.push_rt_cmd(crate::machine::rt_cmd::CYCLE_START);
        let pending = signals.take_rt_cmd();
        assert_eq!(
            pending,
            crate::machine::rt_cmd::FEED_HOLD | crate::machine::rt_cmd::CYCLE_START
        );
        assert_eq!(signals.take_rt_cmd(), 0);
    }
}
