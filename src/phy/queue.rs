//! The PHY's dual action queue: an immediate LIFO stack for
//! as-soon-as-possible actions, and a time-keyed queue for actions
//! scheduled at a specific instant.
//!
//! Grounded verbatim on `Sx127xHsm._enqueue_action`/`_dequeue_action` in
//! the Python reference driver, including its IOTA collision-breaking
//! rule: two actions posted for the same instant are nudged apart by
//! one microsecond (the finest granularity this clock resolves) rather
//! than one replacing the other, and a pathological run of collisions
//! (the nudge wrapping back to the original instant) backs off by
//! multiplying the nudge by ten so it eventually escapes.

use crate::frame::FrameBuf;
use crate::radio::settings::SettingsOverlay;

/// Time an action is soon enough to act on now rather than wait for a
/// later poll. Matches the Python driver's `_TM_SOON` (40 ms).
pub const TM_SOON_US: u64 = 40_000;

pub const MAX_ACTIONS: usize = 8;

#[derive(Clone)]
pub enum Action {
    Rx { stngs: SettingsOverlay, duration_us: u64 },
    Tx { stngs: SettingsOverlay, bytes: FrameBuf },
}

/// Which kind of action is at the head of the queue, without removing
/// it. Scheduling only needs to know Rx-vs-Tx to decide which state to
/// enter next.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum HeadKind {
    Rx,
    Tx,
}

fn kind_of(action: &Action) -> HeadKind {
    match action {
        Action::Rx { .. } => HeadKind::Rx,
        Action::Tx { .. } => HeadKind::Tx,
    }
}

pub struct ActionQueue {
    immediate: heapless::Vec<Action, MAX_ACTIONS>,
    timed: heapless::Vec<(u64, Action), MAX_ACTIONS>,
}

impl ActionQueue {
    pub const fn new() -> Self {
        Self { immediate: heapless::Vec::new(), timed: heapless::Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.timed.is_empty()
    }

    /// Pushes onto the immediate LIFO stack. Returns `false` if the
    /// queue is full.
    pub fn enqueue_immediate(&mut self, action: Action) -> bool {
        self.immediate.push(action).is_ok()
    }

    /// Enqueues `action` at `tm`, nudging by increasing steps on
    /// collision so same-instant posts stay distinguishable and FIFO.
    pub fn enqueue_at(&mut self, tm: u64, action: Action) -> bool {
        let mut slot = tm;
        let mut iota = 1u64;
        while self.timed.iter().any(|(t, _)| *t == slot) {
            slot += iota;
            if slot == tm {
                iota *= 10;
            }
        }
        self.timed.push((slot, action)).is_ok()
    }

    fn min_timed_idx(&self) -> Option<usize> {
        self.timed.iter().enumerate().min_by_key(|(_, (t, _))| *t).map(|(i, _)| i)
    }

    /// The kind of action at the head of the queue if it's due "soon"
    /// (immediate, or within [`TM_SOON_US`] of `now`), without removing
    /// it.
    pub fn head_kind_soon(&self, now: u64) -> Option<HeadKind> {
        if let Some(a) = self.immediate.last() {
            return Some(kind_of(a));
        }
        let idx = self.min_timed_idx()?;
        let (t, ref a) = self.timed[idx];
        if t < now + TM_SOON_US {
            Some(kind_of(a))
        } else {
            None
        }
    }

    /// Removes and returns the head action if it's due soon, along with
    /// its scheduled fire time (`now` for an immediate action).
    pub fn pop_soon(&mut self, now: u64) -> Option<(u64, Action)> {
        if !self.immediate.is_empty() {
            return self.immediate.pop().map(|a| (now, a));
        }
        let idx = self.min_timed_idx()?;
        let (t, _) = self.timed[idx];
        if t < now + TM_SOON_US {
            Some(self.timed.swap_remove(idx))
        } else {
            None
        }
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::settings::Field;

    fn rx(duration_us: u64) -> Action {
        Action::Rx { stngs: heapless::Vec::new(), duration_us }
    }

    fn tx() -> Action {
        let mut bytes = FrameBuf::new();
        bytes.extend_from_slice(&[0xAA]).unwrap();
        Action::Tx { stngs: heapless::Vec::new(), bytes }
    }

    #[test]
    fn immediate_actions_are_lifo() {
        let mut q = ActionQueue::new();
        q.enqueue_immediate(tx());
        q.enqueue_immediate(tx());
        assert_eq!(q.head_kind_soon(0), Some(HeadKind::Tx));
        let (_, a) = q.pop_soon(0).unwrap();
        assert!(matches!(a, Action::Tx { .. }));
        assert!(!q.is_empty());
    }

    #[test]
    fn timed_action_not_soon_is_withheld() {
        let mut q = ActionQueue::new();
        q.enqueue_at(1_000_000, rx(0));
        assert_eq!(q.head_kind_soon(0), None);
        assert!(q.pop_soon(0).is_none());
        assert_eq!(q.head_kind_soon(1_000_000 - TM_SOON_US), Some(HeadKind::Rx));
    }

    #[test]
    fn colliding_timestamps_are_nudged_apart() {
        let mut q = ActionQueue::new();
        assert!(q.enqueue_at(100, tx()));
        assert!(q.enqueue_at(100, tx()));
        let (t1, _) = q.pop_soon(100).unwrap();
        let (t2, _) = q.pop_soon(100).unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn overlay_field_survives_round_trip() {
        let mut stngs: SettingsOverlay = heapless::Vec::new();
        stngs.push((Field::LoraSf, 9)).unwrap();
        let mut q = ActionQueue::new();
        q.enqueue_immediate(Action::Rx { stngs, duration_us: 0 });
        match q.pop_soon(0) {
            Some((_, Action::Rx { stngs, .. })) => {
                assert_eq!(stngs[0], (Field::LoraSf, 9));
            }
            _ => panic!("expected rx action"),
        }
    }
}
