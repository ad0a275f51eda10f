//! Common functionality for the beacon telemetry crates.
#![warn(missing_docs)]

mod macros;

pub mod time;

pub use crate::time::UnixTimestamp;
