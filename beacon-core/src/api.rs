use std::error::Error;

use beacon_protocol::{Breadcrumb, Event, EventId, Level, TransactionContext};
use beacon_sampling::CustomSamplingContext;

use crate::client::EventHint;
use crate::hub::Hub;
use crate::performance::Transaction;
use crate::scope::Scope;

/// Captures an error with the current hub.
///
/// See [`Hub::capture_exception`].
pub fn capture_exception(error: &(dyn Error + 'static)) -> EventId {
    Hub::current().capture_exception(error, None)
}

/// Captures an event with the current hub.
///
/// See [`Hub::capture_event`].
pub fn capture_event(event: Event, hint: Option<EventHint>) -> EventId {
    Hub::current().capture_event(event, hint)
}

/// Captures a plain message with the current hub.
pub fn capture_message(message: &str, level: Level) -> EventId {
    Hub::current().capture_message(message, level)
}

/// Adds a breadcrumb to the scope of the current hub.
pub fn add_breadcrumb(breadcrumb: Breadcrumb) {
    Hub::current().add_breadcrumb(breadcrumb)
}

/// Starts a transaction with the current hub.
///
/// See [`Hub::start_transaction`].
pub fn start_transaction(context: TransactionContext) -> Transaction {
    Hub::current().start_transaction(context, &CustomSamplingContext::new())
}

/// Starts a transaction with the current hub, passing custom attributes to the traces sampler.
pub fn start_transaction_with(
    context: TransactionContext,
    custom: &CustomSamplingContext,
) -> Transaction {
    Hub::current().start_transaction(context, custom)
}

/// Runs `callback` with a temporary scope on the current hub.
///
/// See [`Hub::with_scope`].
pub fn with_scope<C, F, R>(configure: C, callback: F) -> R
where
    C: FnOnce(&mut Scope),
    F: FnOnce() -> R,
{
    Hub::current().with_scope(configure, callback)
}

/// Modifies the scope of the current hub.
pub fn configure_scope<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scope) -> R,
{
    Hub::current().configure_scope(f)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use beacon_protocol::{RequestSession, SessionStatus};
    use beacon_sampling::{SampleRate, SamplingContext, SamplingMethod};
    use beacon_test::RecordingTransport;
    use serde_json::Value;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::client::Client;
    use crate::options::ClientOptions;

    fn with_hub<R>(options: ClientOptions, f: impl FnOnce(&Arc<RecordingTransport>) -> R) -> R {
        let transport = RecordingTransport::new();
        let client = Arc::new(Client::new(options.with_transport(transport.clone())));
        client.init_session_flusher();

        let hub = Arc::new(Hub::new(Some(client), Arc::new(Scope::new())));
        Hub::run(hub, || f(&transport))
    }

    #[test]
    fn test_request_flow() {
        beacon_test::setup();

        let options = ClientOptions {
            release: Some("app@1.0.0".to_owned()),
            ..Default::default()
        };

        with_hub(options, |transport| {
            for failing in [true, false, true] {
                with_scope(
                    |scope| scope.set_request_session(Some(RequestSession::new())),
                    || {
                        if failing {
                            capture_exception(&io::Error::other("request failed"));
                        }
                        Hub::current().capture_request_session();
                    },
                );
            }

            configure_scope(|scope| assert!(scope.request_session().is_none()));
            Hub::current().client().unwrap().close(None);

            // Requests may straddle a minute boundary and land in two buckets.
            let aggregates = transport.session_aggregates();
            assert_eq!(aggregates.len(), 1);
            let items = &aggregates[0].aggregates;
            assert_eq!(items.iter().map(|i| i.errored).sum::<u32>(), 2);
            assert_eq!(items.iter().map(|i| i.exited).sum::<u32>(), 1);
            assert_eq!(transport.events().len(), 2);
        });
    }

    #[test]
    fn test_sampler_sees_custom_context() {
        let options = ClientOptions {
            traces_sample_rate: Some(SampleRate::Bool(true)),
            ..Default::default()
        }
        .with_traces_sampler(|ctx: &SamplingContext<'_>| match ctx.get("priority") {
            Some(Value::String(priority)) if priority == "high" => SampleRate::Bool(true),
            _ => SampleRate::Bool(false),
        });

        with_hub(options, |_| {
            let mut custom = CustomSamplingContext::new();
            custom.insert("priority".to_owned(), Value::String("high".to_owned()));

            let high = start_transaction_with(TransactionContext::new("job", "queue"), &custom);
            assert!(high.is_sampled());

            // The sampler takes precedence over the static rate.
            let low = start_transaction(TransactionContext::new("job", "queue"));
            assert!(!low.is_sampled());
            assert_eq!(
                low.sampling_metadata().map(|m| m.method),
                Some(SamplingMethod::Sampler)
            );
        });
    }

    #[test]
    fn test_continue_trace() {
        let options = ClientOptions {
            traces_sample_rate: Some(SampleRate::Number(0.0)),
            ..Default::default()
        };

        with_hub(options, |transport| {
            let headers = [
                ("Accept", "application/json"),
                (
                    "Sentry-Trace",
                    "771a43a4192642f0b136d5159a501700-b5d7a2a8d6e1c2f3-1",
                ),
            ];
            let context = TransactionContext::continue_from_headers("GET /", "http.server", headers);
            let transaction = start_transaction(context);

            assert!(transaction.is_sampled());
            assert_eq!(
                transaction.trace_id().to_string(),
                "771a43a4192642f0b136d5159a501700"
            );
            assert_eq!(
                transaction.parent_span_id().map(|id| id.to_string()).as_deref(),
                Some("b5d7a2a8d6e1c2f3")
            );
            assert_eq!(
                transaction.sampling_metadata().map(|m| m.method),
                Some(SamplingMethod::Inheritance)
            );

            transaction.finish();
            assert_eq!(transport.transactions().len(), 1);
        });
    }

    #[test]
    fn test_invalid_rate_drops_transaction() {
        beacon_test::setup();

        let options = ClientOptions {
            traces_sample_rate: Some(SampleRate::Number(2.0)),
            ..Default::default()
        };

        with_hub(options, |transport| {
            let transaction = start_transaction(TransactionContext::new("GET /", "http.server"));
            assert!(!transaction.is_sampled());
            assert_eq!(transaction.sampling_metadata(), None);

            transaction.finish();
            assert!(transport.envelopes().is_empty());
        });
    }

    #[test]
    fn test_breadcrumbs_and_status() {
        with_hub(ClientOptions::default(), |transport| {
            add_breadcrumb(Breadcrumb::new("clicked"));
            configure_scope(|scope| {
                scope.set_request_session(Some(RequestSession {
                    status: SessionStatus::Abnormal,
                }))
            });

            capture_exception(&io::Error::other("boom"));

            let events = transport.events();
            assert_eq!(events[0].breadcrumbs.values.len(), 1);
            configure_scope(|scope| {
                assert_eq!(
                    scope.request_session().map(|s| s.status),
                    Some(SessionStatus::Abnormal)
                )
            });
        });
    }
}
