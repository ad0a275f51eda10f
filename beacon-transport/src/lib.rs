//! The boundary between the telemetry core and delivery of its payloads.
//!
//! The core never serializes or sends anything itself. It hands [`Envelope`]s to a [`Transport`]
//! and only waits on the transport when a client is flushed or closed.
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use beacon_protocol::Envelope;

/// Delivers envelopes to an upstream.
///
/// Implementations must not block in [`send_envelope`](Self::send_envelope). Return values of
/// [`flush`](Self::flush) and [`shutdown`](Self::shutdown) indicate whether all pending envelopes
/// were delivered within the timeout.
pub trait Transport: Send + Sync + 'static {
    /// Queues an envelope for delivery.
    fn send_envelope(&self, envelope: Envelope);

    /// Waits until all queued envelopes are delivered or the timeout elapses.
    fn flush(&self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }

    /// Flushes and stops the transport. Envelopes sent afterwards may be dropped.
    fn shutdown(&self, timeout: Duration) -> bool {
        self.flush(timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_envelope(&self, envelope: Envelope) {
        (**self).send_envelope(envelope)
    }

    fn flush(&self, timeout: Duration) -> bool {
        (**self).flush(timeout)
    }

    fn shutdown(&self, timeout: Duration) -> bool {
        (**self).shutdown(timeout)
    }
}
