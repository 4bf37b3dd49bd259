use std::collections::BTreeMap;

use crate::Millis;

/// Handle to a scheduled timer, valid until it fires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    due: Millis,
    seq: u64,
}

impl TimerKey {
    pub fn due(&self) -> Millis {
        self.due
    }
}

/// Time-ordered timer queue.
///
/// Timers due at the same instant fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<TimerKey, T>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, due: Millis, payload: T) -> TimerKey {
        let key = TimerKey {
            due,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, payload);
        key
    }

    /// Cancel a timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, key: TimerKey) -> Option<T> {
        self.entries.remove(&key)
    }

    /// Keep only the timers whose payload satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|_, payload| keep(payload));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.entries.keys().next().map(TimerKey::due)
    }

    /// Remove and return the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Millis) -> Option<(Millis, T)> {
        let entry = self.entries.first_entry()?;
        if entry.key().due > now {
            return None;
        }
        let (key, payload) = entry.remove_entry();
        Some((key.due, payload))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
