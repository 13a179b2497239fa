//! Active host-name resolution scheduling for local-network peer discovery.
//!
//! Commissioned devices on a local fabric are reached by resolving their
//! DNS-SD host names over multicast DNS. Queries on a lossy link go
//! unanswered, so a resolver has to remember which resolutions are still
//! outstanding and re-send queries without flooding the network, on
//! hardware where the table of outstanding attempts must fit in a few
//! hundred bytes of fixed storage.
//!
//! This crate provides that bookkeeping. [`RetrySchedule`] is the core: a
//! fixed-capacity table of pending resolve attempts keyed by [`PeerKey`],
//! with per-peer exponential backoff and eviction of the attempt that went
//! longest without fresh interest. [`Resolver`] drives the table from an
//! async task, yielding [`ResolverEvent::QueryDue`] whenever a query should
//! go out on the wire.
//!
//! Building and multicasting the DNS-SD packets is not part of this crate;
//! the caller sends the query for each [`ResolverEvent::QueryDue`] and
//! reports answers back with [`Resolver::complete`].

use std::num::NonZeroU32;
use std::time::Duration;

mod clock;
mod peer;
mod resolver;
mod schedule;
pub mod timer;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::peer::PeerKey;
pub use crate::resolver::{Resolver, ResolverEvent};
pub use crate::schedule::RetrySchedule;

/// Number of resolve attempts tracked concurrently.
///
/// Marking one more peer pending when the table is full evicts the attempt
/// that went longest without being re-marked.
pub const RETRY_QUEUE_SIZE: usize = 4;

/// Backoff applied after the initial immediate query of a freshly marked
/// peer. Doubles on every consumption of the entry.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Delay before the first re-query of an unanswered peer. Later
    /// re-queries double the delay each time.
    pub initial_query_delay: Duration,
    /// Queries to send for a peer before giving up and reporting it as
    /// [`ResolverEvent::Unreachable`]. `None` retries indefinitely.
    pub max_queries: Option<NonZeroU32>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            initial_query_delay: INITIAL_RETRY_DELAY,
            max_queries: None,
        }
    }
}

#[cfg(feature = "async-io")]
pub mod async_io {
    /// [`Resolver`](crate::Resolver) driven by `async-io` timers.
    pub type Resolver<C = crate::SystemClock> =
        crate::Resolver<crate::timer::asio::AsioSleep, C>;
}

#[cfg(feature = "tokio")]
pub mod tokio {
    /// [`Resolver`](crate::Resolver) driven by `tokio` timers.
    pub type Resolver<C = crate::SystemClock> =
        crate::Resolver<crate::timer::tokio::TokioSleep, C>;
}
