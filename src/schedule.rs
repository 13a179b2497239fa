use std::time::Duration;

use crate::clock::Clock;
use crate::peer::PeerKey;
use crate::{INITIAL_RETRY_DELAY, RETRY_QUEUE_SIZE};

/// Fixed-capacity table of outstanding resolve attempts.
///
/// Tracks which peers still owe us a resolution response and when each of
/// them should be queried again. Storage is an array sized at compile time
/// and nothing is allocated after construction: marking a peer pending when
/// the table is full evicts the attempt that went longest without being
/// re-marked, so memory stays bounded no matter how many peers the caller
/// throws at it.
///
/// The table never drives itself. The owner asks [`until_next_due`] how long
/// to sleep, then drains [`pop_due`] in a loop once the timer fires. A popped
/// entry is not removed; it is re-armed in place with twice its previous
/// delay, so an unanswered peer is queried at 0 ms, 1 s, 2 s, 4 s, ... after
/// it was marked. Only [`complete`] (or eviction) removes an entry.
///
/// [`until_next_due`]: RetrySchedule::until_next_due
/// [`pop_due`]: RetrySchedule::pop_due
/// [`complete`]: RetrySchedule::complete
#[derive(Debug)]
pub struct RetrySchedule<C, const N: usize = RETRY_QUEUE_SIZE> {
    clock: C,
    entries: [Option<Attempt>; N],
    initial_delay: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    peer: PeerKey,
    /// Monotonic µs at which the peer should next be queried.
    next_due: u64,
    /// Applied when the entry is next consumed by `pop_due`, then doubled.
    delay: Duration,
    /// When the entry was last marked pending. Eviction rank only.
    marked_at: u64,
}

impl<C: Clock> RetrySchedule<C> {
    /// Creates an empty table of [`RETRY_QUEUE_SIZE`] slots using
    /// [`INITIAL_RETRY_DELAY`] for fresh entries.
    pub fn new(clock: C) -> Self {
        Self::with_initial_delay(clock, INITIAL_RETRY_DELAY)
    }

    /// Creates an empty table whose freshly marked entries back off starting
    /// from `initial_delay`.
    pub fn with_initial_delay(clock: C, initial_delay: Duration) -> Self {
        Self {
            clock,
            entries: [None; RETRY_QUEUE_SIZE],
            initial_delay,
        }
    }
}

impl<C: Clock, const N: usize> RetrySchedule<C, N> {
    /// Creates an empty table with `N` slots instead of
    /// [`RETRY_QUEUE_SIZE`].
    pub fn with_slots(clock: C) -> Self {
        Self {
            clock,
            entries: [None; N],
            initial_delay: INITIAL_RETRY_DELAY,
        }
    }

    /// Starts (or restarts) tracking `peer`. Cannot fail.
    ///
    /// The entry is immediately due and its backoff starts over from the
    /// initial delay, whether or not the peer was already tracked. When the
    /// table is full, the live attempt with the oldest mark is overwritten
    /// and its peer is returned so that callers can drop any bookkeeping of
    /// their own for it.
    pub fn mark_pending(&mut self, peer: PeerKey) -> Option<PeerKey> {
        let now = self.clock.monotonic_micros();
        let slot = self.slot_for(peer);

        let evicted = self.entries[slot]
            .filter(|a| a.peer != peer)
            .map(|a| a.peer);
        if let Some(evicted) = evicted {
            tracing::debug!(%peer, %evicted, "retry table full, dropping stalest attempt");
        }

        self.entries[slot] = Some(Attempt {
            peer,
            next_due: now,
            delay: self.initial_delay,
            marked_at: now,
        });
        evicted
    }

    /// Stops tracking `peer`. A no-op if the peer is not tracked.
    pub fn complete(&mut self, peer: PeerKey) {
        for entry in &mut self.entries {
            if entry.map_or(false, |a| a.peer == peer) {
                *entry = None;
                return;
            }
        }
    }

    /// Time until the earliest entry is due, clamped to zero when overdue.
    /// `None` when nothing is tracked. Does not modify the table.
    pub fn until_next_due(&self) -> Option<Duration> {
        let now = self.clock.monotonic_micros();
        self.entries
            .iter()
            .flatten()
            .map(|a| a.next_due.saturating_sub(now))
            .min()
            .map(Duration::from_micros)
    }

    /// Pops one currently due peer, re-arming its entry with twice the
    /// delay. `None` once no entry is due right now.
    ///
    /// Call in a loop to drain everything due at this instant; a single call
    /// returns at most one peer. Simultaneously due entries come out from
    /// the highest slot to the lowest, which is deterministic but not the
    /// order they were marked in.
    pub fn pop_due(&mut self) -> Option<PeerKey> {
        let now = self.clock.monotonic_micros();
        for entry in self.entries.iter_mut().rev().flatten() {
            if entry.next_due > now {
                continue;
            }
            entry.next_due =
                now.saturating_add(u64::try_from(entry.delay.as_micros()).unwrap_or(u64::MAX));
            entry.delay = entry.delay.saturating_mul(2);
            return Some(entry.peer);
        }
        None
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Slot to write `peer` into: its existing entry, else a free slot, else
    /// the live entry with the oldest mark. Scans highest slot first to
    /// match the drain order of [`pop_due`](RetrySchedule::pop_due).
    fn slot_for(&self, peer: PeerKey) -> usize {
        let mut free = None;
        let mut oldest = 0;
        let mut oldest_marked = u64::MAX;
        for i in (0..N).rev() {
            match &self.entries[i] {
                Some(attempt) if attempt.peer == peer => return i,
                Some(attempt) => {
                    if attempt.marked_at < oldest_marked {
                        oldest_marked = attempt.marked_at;
                        oldest = i;
                    }
                }
                None => free = free.or(Some(i)),
            }
        }
        free.unwrap_or(oldest)
    }
}
