//! Data model of the beacon telemetry core.
//!
//! This crate contains the types exchanged between the hub, the client and the transport:
//!
//!  - [`Event`] with its [`Exception`] values and [`Breadcrumb`]s,
//!  - request sessions and their [`SessionAggregates`] payload,
//!  - trace and span identifiers, the [`TraceHeader`] propagation token and the
//!    [`TransactionContext`] used to start transactions,
//!  - the [`Envelope`] handed to a transport.
#![warn(missing_docs)]

mod envelope;
mod event;
mod session;
mod trace;

pub use self::envelope::*;
pub use self::event::*;
pub use self::session::*;
pub use self::trace::*;
