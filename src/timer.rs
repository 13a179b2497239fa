//! One-shot deadline timers, generic over the async runtime driving them.

use std::time::Instant;

use futures::Stream;

/// A timer that fires once at a fixed deadline.
///
/// [`Resolver`](crate::Resolver) arms at most one deadline at a time and
/// re-arms it whenever the schedule changes, so a single constructor is all
/// that is needed. Users should not depend on this trait; it exists to let
/// the resolver run on either runtime.
pub trait Sleep: Stream + Send + Unpin + 'static {
    /// Creates a timer that fires once at `deadline`.
    fn until(deadline: Instant) -> Self;
}

#[cfg(feature = "async-io")]
pub mod asio {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Instant;

    use async_io::Timer;
    use futures::Stream;

    use super::Sleep;

    /// `async-io` backed timer.
    #[derive(Debug)]
    pub struct AsioSleep {
        inner: Timer,
    }

    impl Sleep for AsioSleep {
        fn until(deadline: Instant) -> Self {
            Self {
                inner: Timer::at(deadline),
            }
        }
    }

    impl Stream for AsioSleep {
        type Item = Instant;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inner).poll_next(cx)
        }
    }
}

#[cfg(feature = "tokio")]
pub mod tokio {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};

    use ::tokio::time::{self, Instant as TokioInstant, Interval, MissedTickBehavior};
    use futures::Stream;

    use super::Sleep;

    /// `tokio` backed timer.
    ///
    /// `tokio::time::Sleep` is not `Unpin`, so the deadline is modelled as
    /// an interval whose first tick is the deadline and whose period is
    /// effectively infinite.
    /// Taken from: https://docs.rs/async-io/1.7.0/src/async_io/lib.rs.html#91
    #[derive(Debug)]
    pub struct TokioSleep {
        inner: Interval,
    }

    impl Sleep for TokioSleep {
        fn until(deadline: Instant) -> Self {
            let mut inner = time::interval_at(
                TokioInstant::from_std(deadline),
                Duration::new(u64::MAX, 999_999_999),
            );
            inner.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Self { inner }
        }
    }

    impl Stream for TokioSleep {
        type Item = TokioInstant;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_tick(cx).map(Some)
        }
    }
}
