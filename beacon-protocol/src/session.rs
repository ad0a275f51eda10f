use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The status of a session.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The session is healthy.
    ///
    /// This does not necessarily indicate that the session is still active.
    #[default]
    Ok,
    /// The session had an unhandled error, but did not crash.
    Errored,
    /// The session had an unhandled error and crashed.
    Crashed,
    /// The session had an unexpected abrupt termination (not crashing).
    Abnormal,
    /// The session exited cleanly.
    Exited,
}

impl SessionStatus {
    /// Returns `true` if this status is final and must never be changed by error captures.
    ///
    /// `Crashed`, `Abnormal` and `Exited` are set by whoever owns the session boundaries. Only
    /// `Ok` and `Errored` are open.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Crashed | SessionStatus::Abnormal | SessionStatus::Exited
        )
    }
}

/// An error used when parsing [`SessionStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid session status")]
pub struct ParseSessionStatusError;

impl FromStr for SessionStatus {
    type Err = ParseSessionStatusError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(match string {
            "ok" => SessionStatus::Ok,
            "errored" => SessionStatus::Errored,
            "crashed" => SessionStatus::Crashed,
            "abnormal" => SessionStatus::Abnormal,
            "exited" => SessionStatus::Exited,
            _ => return Err(ParseSessionStatusError),
        })
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SessionStatus::Ok => write!(f, "ok"),
            SessionStatus::Errored => write!(f, "errored"),
            SessionStatus::Crashed => write!(f, "crashed"),
            SessionStatus::Abnormal => write!(f, "abnormal"),
            SessionStatus::Exited => write!(f, "exited"),
        }
    }
}

/// The outcome record of a single inbound request.
///
/// Request sessions are created by whoever defines request boundaries and live on the scope of
/// that request. Only their status changes during the request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RequestSession {
    /// The current status of the request.
    pub status: SessionStatus,
}

impl RequestSession {
    /// Creates a new request session with status `Ok`.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Attributes shared by all aggregates in a [`SessionAggregates`] payload.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct SessionAttributes {
    /// The release version string.
    pub release: String,

    /// The environment identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Counts of request outcomes for sessions started within the same minute.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SessionAggregateItem {
    /// The timestamp of when the session itself started, truncated to the minute.
    pub started: DateTime<Utc>,

    /// The distinct identifier.
    ///
    /// Aggregates with a distinct identifier are reported as separate entries.
    #[serde(rename = "did", default, skip_serializing_if = "Option::is_none")]
    pub distinct_id: Option<String>,

    /// The number of exited sessions that occurred.
    #[serde(default)]
    pub exited: u32,

    /// The number of errored sessions that occurred, not including the abnormal and crashed ones.
    #[serde(default)]
    pub errored: u32,

    /// The number of crashed sessions that occurred.
    #[serde(default)]
    pub crashed: u32,

    /// The number of abnormal sessions that occurred.
    #[serde(default)]
    pub abnormal: u32,
}

impl SessionAggregateItem {
    /// Creates an empty aggregate for sessions started at `started`.
    pub fn new(started: DateTime<Utc>, distinct_id: Option<String>) -> Self {
        Self {
            started,
            distinct_id,
            exited: 0,
            errored: 0,
            crashed: 0,
            abnormal: 0,
        }
    }

    /// Counts one more session with the given final status.
    ///
    /// Requests that ended `Ok` are counted as exited.
    pub fn increment(&mut self, status: SessionStatus) {
        let counter = match status {
            SessionStatus::Ok | SessionStatus::Exited => &mut self.exited,
            SessionStatus::Errored => &mut self.errored,
            SessionStatus::Crashed => &mut self.crashed,
            SessionStatus::Abnormal => &mut self.abnormal,
        };

        *counter = counter.saturating_add(1);
    }

    /// Returns the total number of sessions in this aggregate.
    pub fn total_count(&self) -> u32 {
        self.exited
            .saturating_add(self.errored)
            .saturating_add(self.crashed)
            .saturating_add(self.abnormal)
    }
}

/// The session aggregate payload sent upstream by the session flusher.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SessionAggregates {
    /// A batch of sessions that were started.
    #[serde(default)]
    pub aggregates: Vec<SessionAggregateItem>,

    /// The shared session event attributes.
    #[serde(rename = "attrs")]
    pub attributes: SessionAttributes,
}

impl SessionAggregates {
    /// Parses a session aggregate payload from JSON.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serializes the session aggregates into a JSON payload.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns `true` if there is nothing to report.
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}
