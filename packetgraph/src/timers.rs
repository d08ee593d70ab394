//! Timers: periodic user callbacks dispatched on the scheduler's own tick (§4.9).
//!
//! A timer is not a worker and does not get its own thread; [`crate::lifecycle::System`] ticks
//! every registered timer from its own control loop at `tick_period` granularity.

use std::time::{Duration, Instant};

/// One user callback attached to a timer, with its own arm flag.
struct Variant {
    handler: Box<dyn FnMut() + Send>,
    armed: bool,
}

/// A periodic callback dispatcher. Variants are added after construction; firing only invokes
/// variants whose arm flag is currently set, then clears it — callers re-arm a variant by setting
/// the flag again via [`Timer::arm`] before the next tick they want it to fire on.
pub struct Timer {
    period: Duration,
    last_fire: Instant,
    variants: Vec<Variant>,
}

impl Timer {
    /// Creates a timer with no variants yet, firing every `period`.
    pub fn new(period: Duration) -> Self {
        Timer { period, last_fire: Instant::now(), variants: Vec::new() }
    }

    /// Adds a variant, initially unarmed, returning its index for later [`Timer::arm`] calls.
    pub fn add_variant(&mut self, handler: Box<dyn FnMut() + Send>) -> usize {
        self.variants.push(Variant { handler, armed: false });
        self.variants.len() - 1
    }

    /// Arms a variant so it fires on the timer's next tick.
    pub fn arm(&mut self, variant: usize) {
        self.variants[variant].armed = true;
    }

    /// Whether `period` has elapsed since the last fire. The scheduler's control loop polls this
    /// each pass rather than owning a dedicated thread per timer.
    pub fn due(&self) -> bool {
        self.last_fire.elapsed() >= self.period
    }

    /// Fires every currently-armed variant, clearing its flag, and resets the fire clock.
    /// No-op if [`Timer::due`] would return `false`; callers are expected to check first, but
    /// calling `fire` unconditionally is harmless.
    pub fn fire(&mut self) {
        self.last_fire = Instant::now();
        for variant in &mut self.variants {
            if variant.armed {
                (variant.handler)();
                variant.armed = false;
            }
        }
    }
}

/// The scheduler's set of registered timers. `stop` removes a timer by index, matching §4.9's
/// "`Stop` removes the timer from the scheduler's timer list".
#[derive(Default)]
pub struct TimerSet {
    timers: Vec<Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        TimerSet::default()
    }

    /// Registers a timer, returning its index.
    pub fn register(&mut self, timer: Timer) -> usize {
        self.timers.push(timer);
        self.timers.len() - 1
    }

    /// Removes a timer, if still present at that index.
    pub fn stop(&mut self, index: usize) {
        if index < self.timers.len() {
            self.timers.remove(index);
        }
    }

    /// Adds a handler variant to the timer registered at `timer`, returning its index for later
    /// [`TimerSet::arm`] calls.
    pub fn add_variant(&mut self, timer: usize, handler: Box<dyn FnMut() + Send>) -> usize {
        self.timers[timer].add_variant(handler)
    }

    /// Arms a variant on the timer at `timer` so it fires on that timer's next due tick.
    pub fn arm(&mut self, timer: usize, variant: usize) {
        self.timers[timer].arm(variant);
    }

    /// Fires every due timer. Called from the lifecycle's own control loop.
    pub fn tick(&mut self) {
        for timer in &mut self.timers {
            if timer.due() {
                timer.fire();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unarmed_variant_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let mut timer = Timer::new(Duration::from_secs(0));
        timer.add_variant(Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        timer.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn armed_variant_fires_once_then_disarms() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let mut timer = Timer::new(Duration::from_secs(0));
        let variant = timer.add_variant(Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        timer.arm(variant);
        timer.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        timer.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_removes_a_timer_from_the_set() {
        let mut set = TimerSet::new();
        let idx = set.register(Timer::new(Duration::from_secs(1)));
        assert_eq!(set.len(), 1);
        set.stop(idx);
        assert_eq!(set.len(), 0);
    }
}
