//! Minimal event-timer substrate shared by the PHY and LNK state
//! machines.
//!
//! Every state machine in this crate (PHY, LNK) is a plain Rust enum of
//! states plus explicit `enter_*` transition functions called directly
//! by the machine's `tick`/`on_dio`/`on_rx` entry points, the same
//! shape as a QP/`farc`-style HSM but without a singleton event loop, a
//! string-keyed signal registry, or dynamic dispatch. What's left to
//! share across machines is [`TimeEvent`]: a one-shot or periodic timer
//! driven by a caller-supplied monotonic microsecond clock, the
//! `no_std` equivalent of `farc.Framework`'s time events without the
//! process-wide singleton event loop.

/// A one-shot or periodic timer that fires by yielding `true` from
/// [`TimeEvent::poll`] once its deadline has passed.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct TimeEvent {
    deadline_us: Option<u64>,
    period_us: Option<u64>,
}

impl TimeEvent {
    pub const fn new() -> Self {
        Self { deadline_us: None, period_us: None }
    }

    /// Arms a one-shot timer `delay_us` microseconds from `now`.
    pub fn post_in(&mut self, now: u64, delay_us: u64) {
        self.deadline_us = Some(now + delay_us);
        self.period_us = None;
    }

    /// Arms a periodic timer, first firing `period_us` from `now` and
    /// then every `period_us` thereafter.
    pub fn post_every(&mut self, now: u64, period_us: u64) {
        self.deadline_us = Some(now + period_us);
        self.period_us = Some(period_us);
    }

    /// Disarms the timer. Already-queued firings the caller observed
    /// before calling this must still be tolerated by the handler.
    pub fn disarm(&mut self) {
        self.deadline_us = None;
        self.period_us = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_us.is_some()
    }

    /// Returns `true` exactly once per elapsed deadline; periodic
    /// timers rearm themselves for the next period.
    pub fn poll(&mut self, now: u64) -> bool {
        match self.deadline_us {
            Some(d) if now >= d => {
                match self.period_us {
                    Some(p) => self.deadline_us = Some(d + p),
                    None => self.deadline_us = None,
                }
                true
            }
            _ => false,
        }
    }
}

impl Default for TimeEvent {
    fn default() -> Self {
        Self::new()
    }
}
