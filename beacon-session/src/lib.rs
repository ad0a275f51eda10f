//! Request session aggregation.
//!
//! Request sessions are not sent one by one. The [`SessionFlusher`] counts their final statuses in
//! buckets keyed by the minute the request started and periodically sends the counts to the
//! transport as [`SessionAggregates`](beacon_protocol::SessionAggregates).
//!
//! ```text
//!  increment_session_status_count ──▶ SessionBuckets ──flush──▶ Transport
//!                                        ▲
//!                          interval task ┘ (every flush_interval, and once on close)
//! ```
#![warn(missing_docs)]

mod aggregation;
mod flusher;

pub use self::aggregation::*;
pub use self::flusher::*;
