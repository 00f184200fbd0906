//! Deadline based single-shot timers.
//!
//! The state machines never sleep. They arm named timers on a [`TimerQueue`]
//! and the owner fires them by calling [`TimerQueue::pop_expired`] with the
//! current time. Arming a timer that is already pending replaces its deadline,
//! which is what gives [`Debouncer`] its coalescing behaviour.

use heapless::Vec;

use crate::constants::MAX_TIMERS;

/// Identifies a timer owned by one of the state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Re-evaluate connected audio and voice inputs
    Rescan,
    /// Restart the audio graph after a USB reconfiguration
    GraphRestart,
    /// Evaluate an LE Audio context change in broadcast-only operation
    LeaContextChange,
    /// Send the throttled absolute volume to an AVRCP sink
    AvrcpVolumeUpdate,
    /// Send the throttled absolute volume to an LE Audio sink
    LeAudioVolumeUpdate,
    /// Send the next USB HID volume step to the host
    UsbVolumeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Armed {
    id: TimerId,
    deadline_ms: u64,
}

/// A small set of armed timers, at most one per [`TimerId`]
#[derive(Debug, Default)]
pub struct TimerQueue {
    armed: Vec<Armed, MAX_TIMERS>,
}

impl TimerQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self { armed: Vec::new() }
    }

    /// Arm `id` to expire `delay_ms` after `now_ms`, replacing any pending deadline.
    pub fn start(&mut self, id: TimerId, now_ms: u64, delay_ms: u64) {
        let deadline_ms = now_ms.saturating_add(delay_ms);
        if let Some(armed) = self.armed.iter_mut().find(|a| a.id == id) {
            armed.deadline_ms = deadline_ms;
            return;
        }
        // One slot per TimerId variant.
        debug_assert!(!self.armed.is_full());
        self.armed.push(Armed { id, deadline_ms }).ok();
    }

    /// Disarm `id`. Returns `true` if it was pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.armed.iter().position(|a| a.id == id) {
            Some(index) => {
                self.armed.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether `id` is armed
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.armed.iter().any(|a| a.id == id)
    }

    /// Earliest deadline among armed timers
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.armed.iter().map(|a| a.deadline_ms).min()
    }

    /// Remove and return the earliest timer whose deadline is not after `now_ms`.
    pub fn pop_expired(&mut self, now_ms: u64) -> Option<TimerId> {
        let index = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, a)| a.deadline_ms <= now_ms)
            .min_by_key(|(_, a)| a.deadline_ms)
            .map(|(i, _)| i)?;
        Some(self.armed.swap_remove(index).id)
    }

    /// Disarm everything
    pub fn clear(&mut self) {
        self.armed.clear();
    }
}

/// Single-shot timer with reset-on-repeated-trigger semantics
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    id: TimerId,
    delay_ms: u64,
}

impl Debouncer {
    /// Debounce `id` by `delay_ms`
    #[must_use]
    pub const fn new(id: TimerId, delay_ms: u64) -> Self {
        Self { id, delay_ms }
    }

    /// Timer driven by this debouncer
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Restart the quiet period. Repeated triggers collapse into one expiry.
    pub fn trigger(&self, timers: &mut TimerQueue, now_ms: u64) {
        timers.start(self.id, now_ms, self.delay_ms);
    }

    /// Drop a pending expiry
    pub fn cancel(&self, timers: &mut TimerQueue) -> bool {
        timers.cancel(self.id)
    }

    /// Whether an expiry is pending
    #[must_use]
    pub fn is_pending(&self, timers: &TimerQueue) -> bool {
        timers.is_pending(self.id)
    }
}
