//! 64-bit trace clock extended from a narrow hardware down-counter.
//!
//! # Architecture
//!
//! ```text
//!   underflow IRQ ──▶ on_underflow()          now() (normal or IRQ context)
//!                     ─────────────           ──────────────────────────────
//!                     seq += 1 (odd)          s1 = seq (retry while odd)
//!                     reload counter          low = MAX - counter.read()
//!                     start counter           s2 = seq (retry if s1 != s2)
//!                     seq += 1 (even)         (s1 / 2) * PERIOD | low
//! ```
//!
//! The high part is never stored as a 64-bit value: it is derived from a
//! single-writer 32-bit sequence counter (two increments per wraparound), so
//! `Clock` works on cores without 64-bit atomics. `SoftCounter` needs them
//! and is only built where they exist.
//!
//! # Rules (from ARCHITECTURE.md §2)
//!
//! - RULE 2.1.1: Only the underflow handler writes the sequence counter
//! - RULE 2.1.2: `now()` never returns a value smaller than a previous
//!   `now()` without an intervening `reset()`
//! - RULE 2.1.3: The underflow handler must not be preempted by tracing code

use core::sync::atomic::{fence, AtomicU32, Ordering};
#[cfg(target_has_atomic = "64")]
use core::sync::atomic::{AtomicBool, AtomicU64};

/// Reads of an odd sequence counter before `now()` stops waiting for the
/// underflow handler.
const HANDLER_SPIN_LIMIT: u32 = 64;

/// Hardware seam: a down-counter that stops (or keeps firing) at 0.
///
/// Methods take `&self` because they stand for memory-mapped timer
/// registers, which are shared between normal and interrupt context.
pub trait DownCounter {
    /// Value the counter is reloaded to. `MAX + 1` must be a power of 2.
    const MAX: u64;

    /// Current counter value, in `0..=MAX`.
    fn read(&self) -> u64;

    /// Stop counting.
    fn stop(&self);

    /// Reload the counter to [`DownCounter::MAX`].
    fn load_max(&self);

    /// Start (or resume) counting.
    fn start(&self);

    /// Mask or unmask the underflow interrupt.
    fn set_underflow_irq(&self, enabled: bool);
}

/// Anything that can timestamp trace events.
pub trait TraceClock {
    fn now(&self) -> u64;
}

/// Extended monotonic clock.
pub struct Clock<C: DownCounter> {
    counter: C,
    /// Twice the number of wraparounds; odd while the handler runs.
    seq: AtomicU32,
}

impl<C: DownCounter> Clock<C> {
    /// One full counter period, in clock units.
    pub const PERIOD: u64 = {
        assert!(C::MAX < u64::MAX, "counter must be narrower than 64 bits");
        assert!((C::MAX + 1).is_power_of_two(), "counter width must be a power of 2");
        C::MAX + 1
    };

    pub const fn new(counter: C) -> Self {
        Self {
            counter,
            seq: AtomicU32::new(0),
        }
    }

    /// Restart the clock from 0 (trace session start).
    pub fn reset(&self) {
        self.counter.stop();
        self.counter.load_max();
        self.seq.store(0, Ordering::Release);
        self.counter.set_underflow_irq(true);
        self.counter.start();
    }

    /// Stop the clock and mask its interrupt (trace session end).
    pub fn stop(&self) {
        self.counter.stop();
        self.counter.set_underflow_irq(false);
    }

    /// Current 64-bit timestamp.
    ///
    /// Callable from normal and interrupt context. Retries while the
    /// underflow handler is (or was) updating the high part.
    ///
    /// RULE 2.1.3: an interrupt preempting the handler on the same core
    /// would see the sequence counter odd forever. After
    /// `HANDLER_SPIN_LIMIT` odd reads, `now()` returns the last value of
    /// the period being closed, which keeps time monotonic.
    #[inline]
    pub fn now(&self) -> u64 {
        let mut odd_reads = 0;

        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                odd_reads += 1;
                if odd_reads >= HANDLER_SPIN_LIMIT {
                    return (u64::from(s1 / 2) * Self::PERIOD) | C::MAX;
                }
                core::hint::spin_loop();
                continue;
            }

            let low = C::MAX - self.counter.read().min(C::MAX);

            fence(Ordering::Acquire);
            let s2 = self.seq.load(Ordering::Relaxed);
            if s1 == s2 {
                return (u64::from(s1 / 2) * Self::PERIOD) | low;
            }
        }
    }

    /// Underflow interrupt handler body.
    ///
    /// Adds one period to the high part, reloads the counter and restarts it.
    pub fn on_underflow(&self) {
        // RULE 2.1.1: single writer, a load/store pair is enough
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.counter.load_max();
        self.counter.start();

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Number of wraparounds since the last reset.
    #[inline]
    pub fn wraps(&self) -> u32 {
        self.seq.load(Ordering::Acquire) / 2
    }

    /// Underlying hardware counter.
    #[inline]
    pub fn counter(&self) -> &C {
        &self.counter
    }
}

impl<C: DownCounter> TraceClock for Clock<C> {
    #[inline]
    fn now(&self) -> u64 {
        Clock::now(self)
    }
}

/// Manually-ticked down-counter for simulation and tests.
///
/// Behaves like a one-shot hardware timer: it stops at 0 until reloaded.
#[cfg(target_has_atomic = "64")]
pub struct SoftCounter<const BITS: u32 = 32> {
    value: AtomicU64,
    running: AtomicBool,
    irq_enabled: AtomicBool,
}

#[cfg(target_has_atomic = "64")]
impl<const BITS: u32> SoftCounter<BITS> {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new((1u64 << BITS) - 1),
            running: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
        }
    }

    /// Advance time by `ticks`.
    ///
    /// Returns `true` if the counter reached 0 during this call with the
    /// underflow interrupt unmasked: the caller must then run the handler.
    pub fn tick(&self, ticks: u64) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }

        let before = self.value.load(Ordering::Relaxed);
        let after = before.saturating_sub(ticks);
        self.value.store(after, Ordering::Release);

        before > 0 && after == 0 && self.irq_enabled.load(Ordering::Acquire)
    }

    /// Force the counter to a given value (clamped to `MAX`).
    pub fn set(&self, value: u64) {
        self.value.store(value.min(Self::MAX), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Acquire)
    }
}

#[cfg(target_has_atomic = "64")]
impl<const BITS: u32> Default for SoftCounter<BITS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_has_atomic = "64")]
impl<const BITS: u32> DownCounter for SoftCounter<BITS> {
    const MAX: u64 = (1u64 << BITS) - 1;

    fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn load_max(&self) {
        self.value.store(Self::MAX, Ordering::Release);
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn set_underflow_irq(&self, enabled: bool) {
        self.irq_enabled.store(enabled, Ordering::Release);
    }
}

#[cfg(feature = "std")]
pub use host::{spawn_underflow_watcher, InstantCounter};

#[cfg(feature = "std")]
mod host {
    use super::{Clock, DownCounter};

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    /// Down-counter driven by the host monotonic clock (1 tick = 1 ns).
    ///
    /// Saturates at 0 until reloaded, so a late watcher only stalls time,
    /// never makes it jump backwards.
    pub struct InstantCounter<const BITS: u32 = 32> {
        epoch: Instant,
        /// Elapsed ns (since `epoch`) at which the counter held `MAX`.
        reload_ns: AtomicU64,
        /// Value held while stopped.
        held: AtomicU64,
        running: AtomicBool,
        irq_enabled: AtomicBool,
    }

    impl<const BITS: u32> InstantCounter<BITS> {
        pub fn new() -> Self {
            Self {
                epoch: Instant::now(),
                reload_ns: AtomicU64::new(0),
                held: AtomicU64::new(Self::MAX),
                running: AtomicBool::new(false),
                irq_enabled: AtomicBool::new(false),
            }
        }

        fn elapsed_ns(&self) -> u64 {
            self.epoch.elapsed().as_nanos() as u64
        }

        pub fn irq_enabled(&self) -> bool {
            self.irq_enabled.load(Ordering::Acquire)
        }

        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::Acquire)
        }
    }

    impl<const BITS: u32> Default for InstantCounter<BITS> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<const BITS: u32> DownCounter for InstantCounter<BITS> {
        const MAX: u64 = (1u64 << BITS) - 1;

        fn read(&self) -> u64 {
            if !self.running.load(Ordering::Acquire) {
                return self.held.load(Ordering::Acquire);
            }
            let elapsed = self
                .elapsed_ns()
                .saturating_sub(self.reload_ns.load(Ordering::Acquire));
            Self::MAX.saturating_sub(elapsed)
        }

        fn stop(&self) {
            let value = self.read();
            self.held.store(value, Ordering::Release);
            self.running.store(false, Ordering::Release);
        }

        fn load_max(&self) {
            self.held.store(Self::MAX, Ordering::Release);
            self.reload_ns.store(self.elapsed_ns(), Ordering::Release);
        }

        fn start(&self) {
            if self.running.load(Ordering::Acquire) {
                return;
            }
            let consumed = Self::MAX - self.held.load(Ordering::Acquire);
            self.reload_ns
                .store(self.elapsed_ns().saturating_sub(consumed), Ordering::Release);
            self.running.store(true, Ordering::Release);
        }

        fn set_underflow_irq(&self, enabled: bool) {
            self.irq_enabled.store(enabled, Ordering::Release);
        }
    }

    /// Spawn the thread standing in for the underflow interrupt.
    ///
    /// Polls the counter a few times per period and runs
    /// [`Clock::on_underflow`] once it has reached 0. Exits when `stop` is set.
    pub fn spawn_underflow_watcher<const BITS: u32>(
        clock: Arc<Clock<InstantCounter<BITS>>>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let period_ns = Clock::<InstantCounter<BITS>>::PERIOD;
        let poll = Duration::from_nanos((period_ns / 8).clamp(10_000, 1_000_000));

        thread::Builder::new()
            .name("clock-underflow".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let counter = clock.counter();
                    if counter.is_running() && counter.irq_enabled() && counter.read() == 0 {
                        clock.on_underflow();
                    }
                    thread::sleep(poll);
                }
            })
    }
}
