//! Helpers for testing the telemetry core.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`beacon_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Use a [`RecordingTransport`] to observe what a client or flusher sends.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     beacon_test::setup();
//!
//!     beacon_log::debug!("hello, world!");
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use beacon_protocol::{Envelope, Event, SessionAggregates};
use beacon_transport::Transport;
use parking_lot::Mutex;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    beacon_log::init_test!();
}

/// A transport that keeps every envelope in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    envelopes: Mutex<Vec<Envelope>>,
    flushes: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl RecordingTransport {
    /// Creates an empty transport behind an `Arc`, ready to be handed to a client.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of all envelopes sent so far.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    /// Removes and returns all envelopes sent so far.
    pub fn take_envelopes(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.envelopes.lock())
    }

    /// Returns all error and message events sent so far.
    pub fn events(&self) -> Vec<Event> {
        self.envelopes
            .lock()
            .iter()
            .filter_map(|envelope| match envelope {
                Envelope::Event(event) => Some(Event::clone(event)),
                _ => None,
            })
            .collect()
    }

    /// Returns all transactions sent so far.
    pub fn transactions(&self) -> Vec<Event> {
        self.envelopes
            .lock()
            .iter()
            .filter_map(|envelope| match envelope {
                Envelope::Transaction(event) => Some(Event::clone(event)),
                _ => None,
            })
            .collect()
    }

    /// Returns all session aggregate payloads sent so far.
    pub fn session_aggregates(&self) -> Vec<SessionAggregates> {
        self.envelopes
            .lock()
            .iter()
            .filter_map(Envelope::session_aggregates)
            .cloned()
            .collect()
    }

    /// Returns how often [`Transport::flush`] was called.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Returns how often [`Transport::shutdown`] was called.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::Relaxed)
    }
}

impl Transport for RecordingTransport {
    fn send_envelope(&self, envelope: Envelope) {
        self.envelopes.lock().push(envelope);
    }

    fn flush(&self, _timeout: Duration) -> bool {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn shutdown(&self, _timeout: Duration) -> bool {
        self.shutdowns.fetch_add(1, Ordering::Relaxed);
        true
    }
}
