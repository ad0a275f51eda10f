use std::sync::Arc;

use beacon_config::Config;
use beacon_transport::Transport;

use crate::client::Client;
use crate::hub::Hub;
use crate::options::ClientOptions;

/// Closes the client created by [`init`] when dropped.
///
/// Keep the guard alive for the lifetime of the application. Dropping it sends all buffered
/// session aggregates and shuts the transport down within the configured shutdown timeout.
#[must_use = "the client is closed when the guard is dropped"]
#[derive(Debug)]
pub struct ClientInitGuard(Arc<Client>);

impl ClientInitGuard {
    /// Returns the client created by [`init`].
    pub fn client(&self) -> &Arc<Client> {
        &self.0
    }

    /// Returns `true` if the client sends data.
    pub fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }
}

impl Drop for ClientInitGuard {
    fn drop(&mut self) {
        beacon_log::debug!("closing client");
        self.0.close(None);
    }
}

/// Creates a client and binds it to the main hub.
///
/// If the calling thread already has a hub other than the main hub, the client is bound there
/// too. Session tracking starts if enabled in the options and a release is configured.
pub fn init(options: impl Into<ClientOptions>) -> ClientInitGuard {
    let client = create_client(options.into());

    let main = Hub::main();
    main.bind_client(Some(Arc::clone(&client)));

    let current = Hub::current();
    if !Arc::ptr_eq(&current, &main) {
        current.bind_client(Some(Arc::clone(&client)));
    }

    if !client.is_enabled() {
        beacon_log::debug!("client initialized without transport, captures are dropped");
    }

    ClientInitGuard(client)
}

/// Sets up logging from the configuration, then creates a client and binds it like [`init`].
///
/// # Example
///
/// ```
/// use beacon_config::Config;
/// use beacon_protocol::Level;
///
/// let config = Config::from_json_value(serde_json::json!({
///     "release": "app@1.0.0",
///     "logging": {"level": "debug", "format": "simplified"},
/// }))
/// .unwrap();
///
/// let transport = beacon_test::RecordingTransport::new();
/// let guard = beacon_core::init_from_config(&config, transport.clone());
/// assert!(guard.client().is_session_tracking_active());
///
/// beacon_core::capture_message("started", Level::Info);
/// drop(guard);
///
/// assert_eq!(transport.events().len(), 1);
/// assert_eq!(transport.shutdown_count(), 1);
/// ```
pub fn init_from_config(config: &Config, transport: Arc<dyn Transport>) -> ClientInitGuard {
    beacon_log::init(&config.logging);
    beacon_log::debug!(
        release = config.release.as_deref(),
        environment = config.environment.as_deref(),
        "initializing client from config"
    );

    init(ClientOptions::from(config).with_transport(transport))
}

fn create_client(options: ClientOptions) -> Arc<Client> {
    let client = Arc::new(Client::new(options));

    if client.options().auto_session_tracking {
        client.init_session_flusher();
    }

    client
}

#[cfg(test)]
mod tests {
    use std::io;

    use beacon_protocol::RequestSession;
    use beacon_test::RecordingTransport;

    use super::*;
    use crate::scope::Scope;

    fn options(transport: &Arc<RecordingTransport>) -> ClientOptions {
        ClientOptions {
            release: Some("app@1.0.0".to_owned()),
            ..Default::default()
        }
        .with_transport(transport.clone())
    }

    #[test]
    fn test_guard_closes_client() {
        let transport = RecordingTransport::new();
        let guard = ClientInitGuard(create_client(options(&transport)));
        assert!(guard.is_enabled());
        assert!(guard.client().is_session_tracking_active());

        // Bound to an isolated hub so that other tests do not see this client.
        let hub = Arc::new(Hub::new(
            Some(Arc::clone(guard.client())),
            Arc::new(Scope::new()),
        ));
        Hub::run(hub.clone(), || {
            crate::configure_scope(|scope| {
                scope.set_request_session(Some(RequestSession::new()))
            });
            crate::capture_exception(&io::Error::other("boom"));
            hub.capture_request_session();
        });

        drop(guard);

        assert_eq!(transport.events().len(), 1);
        assert_eq!(transport.session_aggregates().len(), 1);
        assert_eq!(transport.shutdown_count(), 1);
        assert!(!hub.client().unwrap().is_enabled());
    }

    #[test]
    fn test_session_tracking_opt_out() {
        let transport = RecordingTransport::new();
        let client = create_client(ClientOptions {
            auto_session_tracking: false,
            ..options(&transport)
        });

        assert!(client.is_enabled());
        assert!(!client.is_session_tracking_active());
    }
}
