//! Sampling decisions for transactions.
//!
//! Every transaction is sampled exactly once, when it is started. Child spans inherit the
//! decision of their transaction, and the decision travels to downstream services as part of the
//! [`TraceHeader`](beacon_protocol::TraceHeader).
//!
//! # Precedence
//!
//! [`decide_sampling`] applies the following sources, from highest to lowest priority:
//!
//!  1. An explicit `sampled` decision on the [`TransactionContext`](beacon_protocol::TransactionContext).
//!  2. If neither a sample rate nor a sampler is configured, tracing is disabled and the
//!     transaction is not sampled.
//!  3. The rate returned by a configured [`TracesSampler`].
//!  4. The `parent_sampled` decision propagated from an upstream service.
//!  5. The configured static [`SampleRate`].
//!
//! Invalid rates never fail: they log a warning and produce an unsampled transaction.
#![warn(missing_docs)]

mod evaluation;
mod rate;

pub use self::evaluation::*;
pub use self::rate::*;
