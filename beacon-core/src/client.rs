use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use beacon_common::UnixTimestamp;
use beacon_protocol::{Envelope, Event, EventId, Mechanism, SessionAttributes, TransactionContext};
use beacon_sampling::{CustomSamplingContext, SamplingConfig};
use beacon_session::{FlusherConfig, SessionFlusher};
use beacon_transport::Transport;
use parking_lot::RwLock;

use crate::options::ClientOptions;
use crate::performance::Transaction;
use crate::scope::Scope;

/// Additional information for capturing an event.
#[derive(Clone, Debug, Default)]
pub struct EventHint {
    /// Use this id instead of generating a new one.
    pub event_id: Option<EventId>,
    /// How the captured error was caught, applied to the outermost exception.
    pub mechanism: Option<Mechanism>,
}

/// Captures events and transactions and tracks request sessions.
///
/// A client is usually bound to a [`Hub`](crate::Hub), which supplies the current [`Scope`] to
/// every capture. A client without transport, or one that has been closed, is disabled: it still
/// runs the capture pipeline but drops the result.
pub struct Client {
    options: ClientOptions,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    session_flusher: RwLock<Option<SessionFlusher>>,
}

impl Client {
    /// Creates a new client from options.
    pub fn new(options: ClientOptions) -> Self {
        let transport = options.transport.clone();

        Self {
            options,
            transport: RwLock::new(transport),
            session_flusher: RwLock::new(None),
        }
    }

    /// Returns the options of this client.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns `true` if the client sends data.
    pub fn is_enabled(&self) -> bool {
        self.transport.read().is_some()
    }

    /// Returns `true` if request sessions are counted.
    pub fn is_session_tracking_active(&self) -> bool {
        self.session_flusher.read().is_some()
    }

    /// Starts aggregating request sessions.
    ///
    /// Session aggregates are attributed to the configured release and environment. Without a
    /// release, session tracking cannot start and a warning is logged. Calling this again while
    /// the flusher runs has no effect.
    pub fn init_session_flusher(&self) {
        let Some(release) = self.options.release.clone() else {
            beacon_log::warn!(
                "cannot initialize the session flusher without a release, session tracking is disabled"
            );
            return;
        };

        let Some(transport) = self.transport.read().clone() else {
            beacon_log::debug!("client is disabled, not tracking sessions");
            return;
        };

        let mut session_flusher = self.session_flusher.write();
        if session_flusher.is_some() {
            return;
        }

        let attributes = SessionAttributes {
            release,
            environment: self.options.environment.clone(),
        };
        let config = FlusherConfig {
            flush_interval: self.options.session_flush_interval,
        };

        *session_flusher = Some(SessionFlusher::new(transport, attributes, config));
    }

    /// Captures an error and its chain of sources.
    ///
    /// If the scope carries a request session that is still `Ok`, it becomes `Errored`.
    pub fn capture_exception(
        &self,
        error: &(dyn Error + 'static),
        hint: Option<EventHint>,
        scope: Option<&mut Scope>,
    ) -> EventId {
        let event = event_from_error(error, hint.as_ref());
        self.capture_event(event, hint, scope)
    }

    /// Captures an event.
    ///
    /// If the event carries at least one exception and the scope carries a request session that is
    /// still `Ok`, the session becomes `Errored`.
    ///
    /// Returns the id of the event, or the nil id if the client is disabled.
    pub fn capture_event(
        &self,
        event: Event,
        hint: Option<EventHint>,
        scope: Option<&mut Scope>,
    ) -> EventId {
        let event = self.prepare_event(event, hint, scope);
        self.send_event(event)
    }

    /// Updates the request session of the scope and applies the scope to the event.
    pub(crate) fn prepare_event(
        &self,
        mut event: Event,
        hint: Option<EventHint>,
        scope: Option<&mut Scope>,
    ) -> Event {
        if let Some(event_id) = hint.and_then(|hint| hint.event_id) {
            event.event_id = event_id;
        }

        if let Some(scope) = scope {
            if self.is_session_tracking_active()
                && let Some(session) = scope.request_session_mut()
            {
                self.options.session_policy.on_capture(&event, session);
            }

            event = scope.apply_to_event(event);
        }

        if event.release.is_none() {
            event.release.clone_from(&self.options.release);
        }
        if event.environment.is_none() {
            event.environment.clone_from(&self.options.environment);
        }

        event
    }

    pub(crate) fn send_event(&self, event: Event) -> EventId {
        let event_id = event.event_id;
        if self.send_envelope(Envelope::from_event(event)) {
            event_id
        } else {
            EventId::nil()
        }
    }

    pub(crate) fn send_transaction(&self, mut event: Event) {
        if event.release.is_none() {
            event.release.clone_from(&self.options.release);
        }
        if event.environment.is_none() {
            event.environment.clone_from(&self.options.environment);
        }

        self.send_envelope(Envelope::Transaction(Box::new(event)));
    }

    fn send_envelope(&self, envelope: Envelope) -> bool {
        let transport = self.transport.read().clone();
        match transport {
            Some(transport) => {
                transport.send_envelope(envelope);
                true
            }
            None => {
                beacon_log::debug!(
                    item_type = envelope.item_type(),
                    "client is disabled, dropping envelope"
                );
                false
            }
        }
    }

    /// Starts a transaction and makes its sampling decision.
    ///
    /// Invalid sample rates never fail, they produce an unsampled transaction and log a warning.
    pub fn start_transaction(
        self: &Arc<Self>,
        context: TransactionContext,
        custom: &CustomSamplingContext,
    ) -> Transaction {
        let config = SamplingConfig {
            sample_rate: self.options.traces_sample_rate.as_ref(),
            sampler: self.options.traces_sampler.as_deref(),
        };

        let decision =
            beacon_sampling::decide_sampling(&context, &config, custom, beacon_sampling::random_value);

        Transaction::new(Some(Arc::clone(self)), context, decision)
    }

    /// Counts the final status of the request session on `scope`.
    ///
    /// Called by whoever owns request boundaries when a request ends. The session is removed from
    /// the scope, so a second call counts nothing. If session tracking is not active, the session
    /// is discarded with a warning.
    pub fn capture_request_session(&self, scope: &mut Scope) {
        let Some(session) = scope.take_request_session() else {
            return;
        };

        match self.session_flusher.read().as_ref() {
            Some(flusher) => {
                flusher.increment_session_status_count(session.status, UnixTimestamp::now())
            }
            None => beacon_log::warn!(
                status = %session.status,
                "discarding request session because session tracking is not active"
            ),
        }
    }

    /// Sends pending session aggregates and waits for the transport to deliver pending envelopes.
    pub fn flush(&self, timeout: Option<Duration>) -> bool {
        if let Some(flusher) = self.session_flusher.read().as_ref() {
            flusher.flush();
        }

        let timeout = timeout.unwrap_or(self.options.shutdown_timeout);
        let transport = self.transport.read().clone();
        match transport {
            Some(transport) => transport.flush(timeout),
            None => true,
        }
    }

    /// Closes the client.
    ///
    /// Sends all buffered session aggregates first and then shuts down the transport, waiting at
    /// most `timeout` (or the configured shutdown timeout). Afterwards, the client is disabled.
    /// Returns `false` if the transport could not deliver everything in time. Closing a client
    /// twice has no effect.
    pub fn close(&self, timeout: Option<Duration>) -> bool {
        let session_flusher = self.session_flusher.write().take();
        if let Some(flusher) = session_flusher {
            flusher.close();
        }

        let Some(transport) = self.transport.write().take() else {
            return true;
        };

        let timeout = timeout.unwrap_or(self.options.shutdown_timeout);
        let delivered = transport.shutdown(timeout);
        if !delivered {
            beacon_log::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "transport did not shut down in time, pending envelopes may be lost"
            );
        }

        delivered
    }
}

/// Creates an error event and applies the mechanism of the hint to the outermost exception.
pub(crate) fn event_from_error(error: &(dyn Error + 'static), hint: Option<&EventHint>) -> Event {
    let mut event = Event::from_error(error);

    if let Some(mechanism) = hint.and_then(|hint| hint.mechanism.clone())
        && let Some(exception) = event.exception.values.last_mut()
    {
        exception.mechanism = Some(mechanism);
    }

    event
}

impl From<ClientOptions> for Client {
    fn from(options: ClientOptions) -> Self {
        Self::new(options)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("enabled", &self.is_enabled())
            .field("session_tracking", &self.is_session_tracking_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use beacon_protocol::{EventType, Exception, Level, RequestSession, SessionStatus};
    use beacon_sampling::{SampleRate, SamplingMethod};
    use beacon_test::RecordingTransport;
    use similar_asserts::assert_eq;

    use super::*;

    fn options(transport: &Arc<RecordingTransport>) -> ClientOptions {
        ClientOptions {
            release: Some("app@1.0.0".to_owned()),
            environment: Some("production".to_owned()),
            ..Default::default()
        }
        .with_transport(transport.clone())
    }

    fn client(transport: &Arc<RecordingTransport>) -> Arc<Client> {
        let client = Arc::new(Client::new(options(transport)));
        client.init_session_flusher();
        client
    }

    fn request_scope(status: SessionStatus) -> Scope {
        let mut scope = Scope::new();
        scope.set_request_session(Some(RequestSession { status }));
        scope
    }

    fn status(scope: &Scope) -> Option<SessionStatus> {
        scope.request_session().map(|session| session.status)
    }

    #[test]
    fn test_capture_exception_marks_errored() {
        beacon_test::setup();

        let transport = RecordingTransport::new();
        let client = client(&transport);
        let mut scope = request_scope(SessionStatus::Ok);

        let error = io::Error::other("connection reset");
        let event_id = client.capture_exception(&error, None, Some(&mut scope));

        assert!(!event_id.is_nil());
        assert_eq!(status(&scope), Some(SessionStatus::Errored));

        let events = transport.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event_id);
        assert_eq!(events[0].release.as_deref(), Some("app@1.0.0"));
        assert_eq!(events[0].environment.as_deref(), Some("production"));
    }

    #[test]
    fn test_terminal_status_kept() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        for terminal in [
            SessionStatus::Crashed,
            SessionStatus::Abnormal,
            SessionStatus::Exited,
        ] {
            let mut scope = request_scope(terminal);
            client.capture_exception(&io::Error::other("boom"), None, Some(&mut scope));
            assert_eq!(status(&scope), Some(terminal));
        }

        // Everything is still captured.
        assert_eq!(transport.events().len(), 3);
    }

    #[test]
    fn test_capture_event_requires_exception() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_event(
            Event::from_message("hello", Level::Error),
            None,
            Some(&mut scope),
        );
        assert_eq!(status(&scope), Some(SessionStatus::Ok));

        let empty_exception = Event {
            ty: EventType::Error,
            ..Default::default()
        };
        client.capture_event(empty_exception, None, Some(&mut scope));
        assert_eq!(status(&scope), Some(SessionStatus::Ok));

        let transaction = Event {
            ty: EventType::Transaction,
            exception: vec![Exception::default()].into(),
            ..Default::default()
        };
        client.capture_event(transaction, None, Some(&mut scope));
        assert_eq!(status(&scope), Some(SessionStatus::Ok));

        let exception = Event {
            ty: EventType::Error,
            exception: vec![Exception::default()].into(),
            ..Default::default()
        };
        client.capture_event(exception, None, Some(&mut scope));
        assert_eq!(status(&scope), Some(SessionStatus::Errored));
    }

    #[test]
    fn test_no_transition_without_session_tracking() {
        let transport = RecordingTransport::new();
        let client = Arc::new(Client::new(options(&transport)));
        assert!(!client.is_session_tracking_active());

        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_exception(&io::Error::other("boom"), None, Some(&mut scope));

        assert_eq!(status(&scope), Some(SessionStatus::Ok));
        assert_eq!(transport.events().len(), 1);
    }

    #[test]
    fn test_no_transition_without_scope_or_session() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        client.capture_exception(&io::Error::other("boom"), None, None);

        let mut scope = Scope::new();
        client.capture_exception(&io::Error::other("boom"), None, Some(&mut scope));
        assert!(scope.request_session().is_none());

        assert_eq!(transport.events().len(), 2);
    }

    #[test]
    fn test_hint() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        let event_id = EventId::new();
        let hint = EventHint {
            event_id: Some(event_id),
            mechanism: Some(Mechanism {
                ty: "middleware".to_owned(),
                handled: Some(false),
            }),
        };

        assert_eq!(
            client.capture_exception(&io::Error::other("boom"), Some(hint), None),
            event_id
        );

        let event = &transport.events()[0];
        let mechanism = event.exception.values[0].mechanism.as_ref().unwrap();
        assert_eq!(mechanism.ty, "middleware");
        assert_eq!(mechanism.handled, Some(false));
    }

    #[test]
    fn test_init_session_flusher_requires_release() {
        beacon_test::setup();

        let transport = RecordingTransport::new();
        let options = ClientOptions {
            release: None,
            ..options(&transport)
        };
        let client = Client::new(options);
        client.init_session_flusher();

        assert!(!client.is_session_tracking_active());

        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_request_session(&mut scope);
        client.close(None);

        assert!(transport.session_aggregates().is_empty());
    }

    #[test]
    fn test_request_session_counted_once() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_exception(&io::Error::other("boom"), None, Some(&mut scope));
        client.capture_request_session(&mut scope);
        client.capture_request_session(&mut scope);
        assert!(scope.request_session().is_none());

        client.close(None);

        let aggregates = transport.session_aggregates();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].aggregates[0].errored, 1);
        assert_eq!(aggregates[0].aggregates[0].total_count(), 1);
        assert_eq!(aggregates[0].attributes.release, "app@1.0.0");
    }

    #[test]
    fn test_close_flushes_sessions_then_shuts_down() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        for _ in 0..3 {
            let mut scope = request_scope(SessionStatus::Errored);
            client.capture_request_session(&mut scope);
        }
        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_request_session(&mut scope);

        assert!(client.close(Some(Duration::from_secs(1))));
        assert!(client.close(None));

        assert!(!client.is_enabled());
        assert!(!client.is_session_tracking_active());
        assert_eq!(transport.shutdown_count(), 1);

        let aggregates = transport.session_aggregates();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].aggregates[0].errored, 3);
        assert_eq!(aggregates[0].aggregates[0].exited, 1);

        // Disabled clients drop everything.
        let event_id = client.capture_event(Event::from_message("late", Level::Info), None, None);
        assert!(event_id.is_nil());
        assert_eq!(transport.envelopes().len(), 1);
    }

    #[test]
    fn test_flush() {
        let transport = RecordingTransport::new();
        let client = client(&transport);

        let mut scope = request_scope(SessionStatus::Ok);
        client.capture_request_session(&mut scope);

        assert!(client.flush(None));
        assert_eq!(transport.flush_count(), 1);
        assert_eq!(transport.session_aggregates().len(), 1);
    }

    #[test]
    fn test_start_transaction() {
        let transport = RecordingTransport::new();
        let options = ClientOptions {
            traces_sample_rate: Some(SampleRate::Number(1.0)),
            ..options(&transport)
        };
        let client = Arc::new(Client::new(options));

        let transaction = client.start_transaction(
            TransactionContext::new("GET /users", "http.server"),
            &CustomSamplingContext::new(),
        );
        assert!(transaction.is_sampled());
        assert_eq!(
            transaction.sampling_metadata().map(|m| m.method),
            Some(SamplingMethod::Rate)
        );

        let child = transaction.start_child("db", "SELECT 1");
        child.finish();
        transaction.finish();

        let transactions = transport.transactions();
        assert_eq!(transactions.len(), 1);

        let event = &transactions[0];
        assert_eq!(event.transaction.as_deref(), Some("GET /users"));
        assert_eq!(event.release.as_deref(), Some("app@1.0.0"));
        assert_eq!(event.spans.len(), 1);
        assert_eq!(event.spans[0].op, "db");

        let trace = event.contexts.trace.as_ref().unwrap();
        assert_eq!(trace.client_sample_rate, Some(1.0));
        assert_eq!(
            trace.data.get("sampling"),
            Some(&serde_json::json!({"method": "client_rate", "rate": 1.0}))
        );
    }

    #[test]
    fn test_unsampled_transaction_not_sent() {
        let transport = RecordingTransport::new();
        let options = ClientOptions {
            traces_sample_rate: Some(SampleRate::Number(0.0)),
            ..options(&transport)
        };
        let client = Arc::new(Client::new(options));

        let transaction = client.start_transaction(
            TransactionContext::new("GET /health", "http.server"),
            &CustomSamplingContext::new(),
        );
        transaction.start_child("db", "SELECT 1").finish();
        transaction.finish();

        assert!(transport.envelopes().is_empty());
    }

    #[test]
    fn test_disabled_client() {
        let client = Client::new(ClientOptions::default());
        assert!(!client.is_enabled());

        client.init_session_flusher();
        assert!(!client.is_session_tracking_active());

        let event_id = client.capture_event(Event::from_message("hi", Level::Info), None, None);
        assert!(event_id.is_nil());
        assert!(client.close(None));
    }
}
