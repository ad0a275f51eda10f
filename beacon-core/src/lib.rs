//! Hub, scope and client of the beacon telemetry core.
//!
//! The [`Hub`] is the entry point for instrumentation. It holds a stack of [`Scope`]s, each paired
//! with the [`Client`] that captures events on its behalf:
//!
//! ```text
//!    capture_exception / start_transaction
//!                     |
//!                     v
//!  +-------------------------------------+
//!  | Hub                                 |
//!  |   (client, scope)  <- top           |      +---------------+      +-----------+
//!  |   (client, scope)                   | ---> | Client        | ---> | Transport |
//!  |   (client, scope)  <- root          |      |  SessionFlusher ---> |           |
//!  +-------------------------------------+      +---------------+      +-----------+
//! ```
//!
//! Every thread has its own current hub, see [`Hub::current`]. Concurrent units of work, such as
//! requests handled on an async runtime, get an isolated hub from [`Hub::new_from_top`] and carry
//! it across await points with [`HubFutureExt::bind_hub`].
//!
//! # Request sessions
//!
//! Request-boundary instrumentation puts a [`RequestSession`](beacon_protocol::RequestSession)
//! on the scope of each request. Captured exceptions mark it as errored through the client's
//! [`SessionPolicy`], and [`Hub::capture_request_session`] counts the final status in the
//! client's [`SessionFlusher`](beacon_session::SessionFlusher) at the end of the request.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use beacon_core::{ClientOptions, Hub, HubFutureExt};
//! use beacon_protocol::{RequestSession, TransactionContext};
//!
//! let _guard = beacon_core::init(ClientOptions {
//!     release: Some("app@1.0.0".to_owned()),
//!     ..Default::default()
//! });
//!
//! let hub = Arc::new(Hub::new_from_top(&Hub::current()));
//! let request = async {
//!     beacon_core::configure_scope(|scope| {
//!         scope.set_request_session(Some(RequestSession::new()));
//!     });
//!
//!     let transaction =
//!         beacon_core::start_transaction(TransactionContext::new("GET /", "http.server"));
//!     transaction.finish();
//!
//!     Hub::current().capture_request_session();
//! }
//! .bind_hub(hub);
//! # drop(request);
//! ```
#![warn(missing_docs)]

mod api;
mod client;
mod futures;
mod hub;
mod init;
mod options;
mod performance;
mod policy;
mod scope;

pub use self::api::*;
pub use self::client::{Client, EventHint};
pub use self::futures::{BoundHub, HubFutureExt};
pub use self::hub::{Hub, ScopeGuard};
pub use self::init::{ClientInitGuard, init, init_from_config};
pub use self::options::{ClientOptions, DEFAULT_MAX_BREADCRUMBS};
pub use self::performance::{Span, Transaction, TransactionOrSpan};
pub use self::policy::{RequestSessionPolicy, SessionPolicy};
pub use self::scope::Scope;
