use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::hub::Hub;

pin_project_lite::pin_project! {
    /// A future that runs every poll with a bound [`Hub`] as the current hub.
    pub struct BoundHub<F> {
        hub: Arc<Hub>,
        #[pin]
        future: F,
    }
}

impl<F> BoundHub<F> {
    /// Wraps a future so that it is polled with the given hub.
    pub fn new(future: F, hub: Arc<Hub>) -> Self {
        Self { hub, future }
    }

    /// Returns the bound hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

impl<F> Future for BoundHub<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let hub = Arc::clone(this.hub);
        let future = this.future;
        Hub::run(hub, || future.poll(cx))
    }
}

/// Extension methods to carry a [`Hub`] across async tasks.
pub trait HubFutureExt: Sized {
    /// Binds a hub to this future.
    ///
    /// Code within the future sees `hub` as [`Hub::current`], regardless of the thread it is
    /// polled on.
    fn bind_hub(self, hub: Arc<Hub>) -> BoundHub<Self> {
        BoundHub::new(self, hub)
    }
}

impl<F: Future> HubFutureExt for F {}

#[cfg(test)]
mod tests {
    use beacon_protocol::Level;
    use beacon_test::RecordingTransport;

    use super::*;
    use crate::client::Client;
    use crate::options::ClientOptions;
    use crate::scope::Scope;

    fn request_hub(transport: &Arc<RecordingTransport>, request: &str) -> Arc<Hub> {
        let client = Arc::new(Client::new(
            ClientOptions::default().with_transport(transport.clone()),
        ));
        let hub = Arc::new(Hub::new(Some(client), Arc::new(Scope::new())));
        hub.configure_scope(|scope| scope.set_tag("request", request));
        hub
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_are_isolated() {
        let transport = RecordingTransport::new();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let hub = request_hub(&transport, &i.to_string());
                tokio::spawn(
                    async move {
                        tokio::task::yield_now().await;
                        Hub::current().capture_message(&i.to_string(), Level::Info);
                    }
                    .bind_hub(hub),
                )
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let events = transport.events();
        assert_eq!(events.len(), 8);
        for event in events {
            assert_eq!(event.tags.get("request"), event.message.as_ref());
        }
    }

    #[tokio::test]
    async fn test_hub_restored_after_poll() {
        let before = Hub::current();
        let hub = Arc::new(Hub::new(None, Arc::new(Scope::new())));

        let inner = async { Hub::current() }.bind_hub(hub.clone()).await;

        assert!(Arc::ptr_eq(&inner, &hub));
        assert!(Arc::ptr_eq(&Hub::current(), &before));
    }
}
