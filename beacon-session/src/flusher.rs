use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use beacon_common::UnixTimestamp;
use beacon_protocol::{Envelope, SessionAttributes, SessionStatus};
use beacon_transport::Transport;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregation::SessionBuckets;

/// The default interval between two periodic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Parameters used by the [`SessionFlusher`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlusherConfig {
    /// The time between two periodic flushes.
    ///
    /// Defaults to 60 seconds.
    pub flush_interval: Duration,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// State shared between the flusher handle and its interval task.
struct Inner {
    transport: Arc<dyn Transport>,
    attributes: SessionAttributes,
    buckets: Mutex<SessionBuckets>,
    /// Serializes transport hand-offs so that payloads leave in the order they were drained.
    flush_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Inner {
    fn increment(
        &self,
        status: SessionStatus,
        timestamp: UnixTimestamp,
        distinct_id: Option<&str>,
    ) {
        let mut buckets = self.buckets.lock();

        // Checked under the bucket lock, so a concurrent close either drains this count or
        // rejects it.
        if self.closed.load(Ordering::Acquire) {
            drop(buckets);
            beacon_log::warn!(
                %status,
                "session flusher is closed, dropping request session"
            );
            return;
        }

        let counted = buckets.increment(&self.attributes, status, timestamp, distinct_id);
        drop(buckets);

        if !counted {
            beacon_log::warn!(
                %status,
                %timestamp,
                "dropping request session with invalid timestamp"
            );
        }
    }

    /// Marks the flusher as closed. Returns `false` if it was closed already.
    fn mark_closed(&self) -> bool {
        let _buckets = self.buckets.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn flush(&self) {
        let _guard = self.flush_lock.lock();
        let buckets = mem::take(&mut *self.buckets.lock());

        if buckets.is_empty() {
            return;
        }

        beacon_log::trace!(buckets = buckets.len(), "flushing session aggregates");

        for aggregates in buckets.into_payloads() {
            self.transport.send_envelope(Envelope::Sessions(aggregates));
        }
    }
}

/// Aggregates request session outcomes and sends them to a transport in intervals.
///
/// If a tokio runtime is available when the flusher is created, it spawns a task that calls
/// [`flush`](Self::flush) every [`flush_interval`](FlusherConfig::flush_interval). Otherwise
/// buckets are only sent on explicit flushes and when the flusher is closed.
///
/// Closing the flusher stops the interval task and sends everything that is still buffered.
/// Dropping the flusher closes it.
pub struct SessionFlusher {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for SessionFlusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFlusher")
            .field("attributes", &self.inner.attributes)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionFlusher {
    /// Creates a new flusher sending aggregates with the given attributes to `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        attributes: SessionAttributes,
        config: FlusherConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            attributes,
            buckets: Mutex::new(SessionBuckets::new()),
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_interval(
                    Arc::clone(&inner),
                    config.flush_interval,
                    shutdown_rx,
                ));
            }
            Err(_) => beacon_log::warn!(
                "no async runtime available, session aggregates are only sent on flush and close"
            ),
        }

        Self { inner, shutdown }
    }

    /// Returns the attributes shared by all aggregates of this flusher.
    pub fn attributes(&self) -> &SessionAttributes {
        &self.inner.attributes
    }

    /// Counts a request session with the given final status.
    ///
    /// `timestamp` is the time the request started. It is truncated to the minute to select the
    /// bucket. After [`close`](Self::close), this logs a warning and ignores the session.
    pub fn increment_session_status_count(&self, status: SessionStatus, timestamp: UnixTimestamp) {
        self.inner.increment(status, timestamp, None);
    }

    /// Counts a request session in a separate aggregate for the given distinct id.
    pub fn increment_with_distinct_id(
        &self,
        status: SessionStatus,
        timestamp: UnixTimestamp,
        distinct_id: &str,
    ) {
        self.inner.increment(status, timestamp, Some(distinct_id));
    }

    /// Sends all buffered aggregates to the transport.
    ///
    /// The bucket table is swapped out atomically, so sessions counted during the flush end up in
    /// the next one. Does nothing if no sessions were counted.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops the flusher and sends all buffered aggregates.
    ///
    /// Further increments are ignored. Calling this more than once has no effect.
    pub fn close(&self) {
        if !self.inner.mark_closed() {
            return;
        }

        // The receiver is gone if there is no interval task.
        self.shutdown.send(true).ok();
        self.inner.flush();

        beacon_log::debug!("session flusher closed");
    }
}

impl Drop for SessionFlusher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_interval(inner: Arc<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    if period.is_zero() {
        beacon_log::warn!("session flush interval is zero, disabling periodic flushes");
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = ticker.tick() => inner.flush(),
        }
    }

    beacon_log::trace!("session flusher interval stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use beacon_test::RecordingTransport;
    use similar_asserts::assert_eq;

    use super::*;

    const STARTED: u64 = 1581084960;

    fn attributes() -> SessionAttributes {
        SessionAttributes {
            release: "app@1.0.0".to_owned(),
            environment: Some("production".to_owned()),
        }
    }

    fn flusher(transport: &Arc<RecordingTransport>) -> SessionFlusher {
        SessionFlusher::new(transport.clone(), attributes(), FlusherConfig::default())
    }

    #[test]
    fn test_close_sends_final_payload() {
        beacon_test::setup();

        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        let ts = UnixTimestamp::from_secs(STARTED);

        for _ in 0..3 {
            flusher.increment_session_status_count(SessionStatus::Errored, ts);
        }
        flusher.increment_session_status_count(SessionStatus::Ok, ts);

        assert!(transport.envelopes().is_empty());

        flusher.close();
        flusher.close();

        let payloads = transport.session_aggregates();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].attributes, attributes());

        let item = &payloads[0].aggregates[0];
        assert_eq!(item.errored, 3);
        assert_eq!(item.exited, 1);
        assert_eq!(item.total_count(), 4);
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);

        flusher.flush();
        flusher.close();

        assert!(transport.envelopes().is_empty());
    }

    #[test]
    fn test_flush_drains() {
        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        let ts = UnixTimestamp::from_secs(STARTED);

        flusher.increment_session_status_count(SessionStatus::Crashed, ts);
        flusher.flush();
        flusher.flush();
        assert_eq!(transport.session_aggregates().len(), 1);

        flusher.increment_session_status_count(SessionStatus::Abnormal, ts);
        flusher.close();

        let payloads = transport.session_aggregates();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].aggregates[0].crashed, 1);
        assert_eq!(payloads[1].aggregates[0].abnormal, 1);
        assert_eq!(payloads[1].aggregates[0].crashed, 0);
    }

    #[test]
    fn test_increment_after_close_is_ignored() {
        beacon_test::setup();

        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        flusher.close();
        assert!(flusher.is_closed());

        flusher.increment_session_status_count(
            SessionStatus::Errored,
            UnixTimestamp::from_secs(STARTED),
        );
        flusher.flush();

        assert!(transport.envelopes().is_empty());
    }

    #[test]
    fn test_drop_closes() {
        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        flusher.increment_with_distinct_id(
            SessionStatus::Ok,
            UnixTimestamp::from_secs(STARTED),
            "user-1",
        );
        drop(flusher);

        let payloads = transport.session_aggregates();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0].aggregates[0].distinct_id.as_deref(),
            Some("user-1")
        );
    }

    #[test]
    fn test_close_races_increments() {
        let ts = UnixTimestamp::from_secs(STARTED);

        for _ in 0..200 {
            let transport = RecordingTransport::new();
            let flusher = flusher(&transport);
            let barrier = Barrier::new(5);

            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        barrier.wait();
                        for _ in 0..50 {
                            flusher.increment_session_status_count(SessionStatus::Ok, ts);
                        }
                    });
                }

                barrier.wait();
                flusher.close();
            });

            // Every accepted count left with the final flush.
            assert!(flusher.inner.buckets.lock().is_empty());
            flusher.flush();

            let sent: u32 = transport
                .session_aggregates()
                .iter()
                .flat_map(|payload| &payload.aggregates)
                .map(|item| item.total_count())
                .sum();
            assert!(sent <= 200);
            assert!(transport.session_aggregates().len() <= 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        beacon_test::setup();

        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        let ts = UnixTimestamp::from_secs(STARTED);

        flusher.increment_session_status_count(SessionStatus::Errored, ts);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(transport.envelopes().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.session_aggregates().len(), 1);

        // Nothing was counted since the last tick, so neither the next tick nor close send.
        tokio::time::sleep(Duration::from_secs(60)).await;
        flusher.close();
        assert_eq!(transport.session_aggregates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_right_after_tick() {
        let transport = RecordingTransport::new();
        let flusher = flusher(&transport);
        let ts = UnixTimestamp::from_secs(STARTED);

        flusher.increment_session_status_count(SessionStatus::Errored, ts);
        tokio::time::sleep(Duration::from_secs(61)).await;

        flusher.increment_session_status_count(SessionStatus::Ok, ts);
        flusher.close();

        // The interval task observes the shutdown and stops without flushing again.
        tokio::time::sleep(Duration::from_secs(120)).await;

        let payloads = transport.session_aggregates();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].aggregates[0].errored, 1);
        assert_eq!(payloads[0].aggregates[0].exited, 0);
        assert_eq!(payloads[1].aggregates[0].exited, 1);
        assert_eq!(payloads[1].aggregates[0].errored, 0);
    }
}
