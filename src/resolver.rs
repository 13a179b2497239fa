use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use futures::{Stream, StreamExt};
use smallvec::SmallVec;

use crate::clock::{Clock, SystemClock};
use crate::peer::PeerKey;
use crate::schedule::RetrySchedule;
use crate::timer::Sleep;
use crate::{ResolverConfig, RETRY_QUEUE_SIZE};

/// Event produced by [`Resolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverEvent {
    /// A resolution query for this peer should go out on the wire now.
    QueryDue(PeerKey),
    /// The peer exhausted its query budget without answering and is no
    /// longer tracked. Only emitted when
    /// [`max_queries`](crate::ResolverConfig::max_queries) is set.
    Unreachable(PeerKey),
}

/// Drives a [`RetrySchedule`] from an async task.
///
/// The resolver owns the retry table and a single timer armed for the next
/// due attempt. Polled as a [`Stream`], it yields
/// [`ResolverEvent::QueryDue`] whenever a peer should be queried; building
/// and multicasting the DNS-SD packet is the caller's job, as is reporting
/// answers back via [`Resolver::complete`].
///
/// All table mutations happen on the task polling the stream. Timer expiry
/// is only ever observed from `poll_next`, never from a timer callback.
pub struct Resolver<S, C = SystemClock> {
    schedule: RetrySchedule<C>,
    /// Query budget per peer. `None` retries forever.
    max_queries: Option<NonZeroU32>,
    /// Queries sent per tracked peer since it was last marked. Only
    /// maintained when a budget is configured.
    sent: HashMap<PeerKey, u32>,
    events: VecDeque<ResolverEvent>,
    timer: Option<S>,
    waker: Option<Waker>,
}

impl<S> Resolver<S> {
    /// Builds a resolver backed by the operating-system monotonic clock.
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_clock(config, SystemClock::default())
    }
}

impl<S, C: Clock> Resolver<S, C> {
    /// Builds a resolver reading time from `clock`.
    pub fn with_clock(config: ResolverConfig, clock: C) -> Self {
        Self {
            schedule: RetrySchedule::with_initial_delay(clock, config.initial_query_delay),
            max_queries: config.max_queries,
            sent: HashMap::new(),
            events: VecDeque::new(),
            timer: None,
            waker: None,
        }
    }

    /// Starts (or restarts) tracking `peer`.
    ///
    /// The first query is due immediately. Re-resolving a peer discards its
    /// backoff progress and its query count.
    pub fn resolve(&mut self, peer: PeerKey) {
        tracing::trace!(%peer, "resolution requested");
        if let Some(evicted) = self.schedule.mark_pending(peer) {
            // The table dropped that peer, so its query count goes too;
            // otherwise the map would grow without bound under peer churn.
            self.sent.remove(&evicted);
        }
        if self.max_queries.is_some() {
            self.sent.insert(peer, 0);
        }
        self.wake();
    }

    /// Reports that `peer` resolved, or that the caller no longer cares.
    /// Stops any further queries for it. A no-op for untracked peers.
    pub fn complete(&mut self, peer: PeerKey) {
        tracing::trace!(%peer, "resolution complete");
        self.schedule.complete(peer);
        self.sent.remove(&peer);
        self.wake();
    }

    /// Number of peers currently being resolved.
    pub fn pending(&self) -> usize {
        self.schedule.len()
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// Moves every currently due peer into the event queue.
    fn drain_due(&mut self) {
        let mut due: SmallVec<[PeerKey; RETRY_QUEUE_SIZE]> = SmallVec::new();
        while let Some(peer) = self.schedule.pop_due() {
            due.push(peer);
        }

        for peer in due {
            if let Some(max) = self.max_queries {
                let sent = self.sent.entry(peer).or_insert(0);
                if *sent >= max.get() {
                    tracing::debug!(%peer, queries = *sent, "giving up on unanswered peer");
                    self.schedule.complete(peer);
                    self.sent.remove(&peer);
                    self.events.push_back(ResolverEvent::Unreachable(peer));
                    continue;
                }
                *sent += 1;
            }
            tracing::trace!(%peer, "resolution query due");
            self.events.push_back(ResolverEvent::QueryDue(peer));
        }
    }
}

impl<S: Sleep, C: Clock + Unpin> Stream for Resolver<S, C> {
    type Item = ResolverEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.events.pop_front() {
                return Poll::Ready(Some(event));
            }

            this.drain_due();
            if !this.events.is_empty() {
                continue;
            }

            // Nothing due right now. Arm a single timer for the earliest
            // deadline and park until it fires or the table changes.
            match this.schedule.until_next_due() {
                Some(wait) => {
                    // The timer must stay stored: dropping it would drop the
                    // waker registration along with it.
                    let timer = this.timer.insert(S::until(Instant::now() + wait));
                    if timer.poll_next_unpin(cx).is_ready() {
                        continue;
                    }
                }
                None => this.timer = None,
            }
            this.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::task::Poll;
    use std::time::Duration;

    use futures::task::noop_waker_ref;

    use super::*;
    use crate::clock::ManualClock;

    /// Timer that never fires; due-ness is driven by the manual clock and
    /// explicit polls.
    struct NeverSleep;

    impl Sleep for NeverSleep {
        fn until(_deadline: Instant) -> Self {
            NeverSleep
        }
    }

    impl Stream for NeverSleep {
        type Item = ();

        fn poll_next(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    fn config(delay_ms: u64, max_queries: Option<u32>) -> ResolverConfig {
        ResolverConfig {
            initial_query_delay: Duration::from_millis(delay_ms),
            max_queries: max_queries.map(|n| NonZeroU32::new(n).unwrap()),
        }
    }

    fn poll_once(
        resolver: &mut Resolver<NeverSleep, &ManualClock>,
    ) -> Poll<Option<ResolverEvent>> {
        resolver.poll_next_unpin(&mut Context::from_waker(noop_waker_ref()))
    }

    #[test]
    fn fresh_peer_yields_one_query_then_parks() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, None), &clock);
        let peer = PeerKey::new(1, 123);

        assert!(poll_once(&mut resolver).is_pending());

        resolver.resolve(peer);
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );
        assert!(poll_once(&mut resolver).is_pending());

        clock.advance(Duration::from_millis(1000));
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );
        assert!(poll_once(&mut resolver).is_pending());
    }

    #[test]
    fn completed_peer_stops_being_queried() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, None), &clock);
        let peer = PeerKey::new(2, 123);

        resolver.resolve(peer);
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );

        resolver.complete(peer);
        assert_eq!(resolver.pending(), 0);

        clock.advance(Duration::from_secs(10));
        assert!(poll_once(&mut resolver).is_pending());
    }

    #[test]
    fn query_budget_ends_in_unreachable() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, Some(2)), &clock);
        let peer = PeerKey::new(3, 123);

        resolver.resolve(peer);
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );

        clock.advance(Duration::from_millis(1000));
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );

        clock.advance(Duration::from_millis(2000));
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::Unreachable(peer)))
        );
        assert_eq!(resolver.pending(), 0);

        clock.advance(Duration::from_secs(60));
        assert!(poll_once(&mut resolver).is_pending());
    }

    #[test]
    fn re_resolving_restores_the_query_budget() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, Some(1)), &clock);
        let peer = PeerKey::new(4, 123);

        resolver.resolve(peer);
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );
        clock.advance(Duration::from_millis(1000));
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::Unreachable(peer)))
        );

        resolver.resolve(peer);
        assert_eq!(
            poll_once(&mut resolver),
            Poll::Ready(Some(ResolverEvent::QueryDue(peer)))
        );
    }

    #[test]
    fn simultaneously_due_peers_are_all_yielded() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, None), &clock);
        let peers = [PeerKey::new(1, 123), PeerKey::new(2, 123)];

        for peer in peers {
            resolver.resolve(peer);
        }

        let mut seen = Vec::new();
        while let Poll::Ready(Some(ResolverEvent::QueryDue(p))) = poll_once(&mut resolver) {
            seen.push(p);
        }
        seen.sort_unstable_by_key(PeerKey::node_id);
        assert_eq!(seen, peers);
    }

    #[tokio::test]
    async fn wake_on_resolve_unparks_the_stream() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, None), &clock);
        let peer = PeerKey::new(5, 123);

        let mut parked = false;
        let event = poll_fn(|cx| {
            if !parked {
                // First poll parks the resolver, then a mutation arrives.
                assert!(resolver.poll_next_unpin(cx).is_pending());
                parked = true;
                resolver.resolve(peer);
                return Poll::Pending;
            }
            resolver.poll_next_unpin(cx)
        })
        .await;

        assert_eq!(event, Some(ResolverEvent::QueryDue(peer)));
    }

    #[test]
    fn query_counters_stay_bounded_under_peer_churn() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, Some(2)), &clock);

        // Far more distinct peers than the table holds; evicted peers must
        // not leave a query counter behind.
        for node in 0..1000 {
            resolver.resolve(PeerKey::new(node, 123));
            while poll_once(&mut resolver).is_ready() {}
            clock.advance(Duration::from_millis(1));
        }

        assert!(resolver.pending() <= RETRY_QUEUE_SIZE);
        assert!(
            resolver.sent.len() <= RETRY_QUEUE_SIZE,
            "query counters leaked: {} entries for a {} slot table",
            resolver.sent.len(),
            RETRY_QUEUE_SIZE
        );
    }

    #[test]
    fn empty_table_parks_instead_of_ending_the_stream() {
        let clock = ManualClock::new();
        let mut resolver = Resolver::<NeverSleep, _>::with_clock(config(1000, None), &clock);

        assert!(poll_once(&mut resolver).is_pending());
        assert!(poll_once(&mut resolver).is_pending());
    }
}
