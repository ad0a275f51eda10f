//! Configuration for the telemetry client.
//!
//! The configuration can be loaded from a YAML or JSON file with [`Config::from_path`]. All fields
//! are optional, missing fields fall back to their defaults:
//!
//! ```yaml
//! release: my-app@1.0.0
//! environment: production
//! traces_sample_rate: 0.25
//! auto_session_tracking: true
//! sessions:
//!   flush_interval: 60
//! shutdown_timeout: 2
//! max_breadcrumbs: 100
//! logging:
//!   level: info
//!   format: auto
//! ```
#![warn(missing_docs)]

mod config;

pub use self::config::*;
