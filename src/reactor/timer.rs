use crate::utils::Key;

use std::cmp::Ordering;
use std::time::Instant;

/// An entry in the loop's timer queue.
///
/// `TimerEntry` represents a scheduled wake-up at a specific deadline,
/// stored in a binary heap ordered by deadline.
///
/// Rearming or stopping a timer does not search the heap; it bumps the
/// timer's generation instead, and entries whose generation no longer
/// matches are skipped when they surface. Exactly one callback fires
/// per logical schedule, at the most recently requested deadline.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Slot key of the owning timer handle.
    pub(crate) key: Key,

    /// The timer's rearm generation when this entry was pushed.
    pub(crate) generation: u64,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    /// Two timer entries are equal if their deadlines are equal.
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    /// Partial ordering consistent with [`Ord`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
