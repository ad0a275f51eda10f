use std::collections::{BTreeMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::trace::{SpanId, TraceId};

/// Wrapper around a UUID with slightly different formatting.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new event id using a UUID v4.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the nil event id, used for events that were not sent.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Tests if the UUID is nil.
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(uuid_str: &str) -> Result<Self, Self::Err> {
        uuid_str.parse().map(EventId)
    }
}

beacon_common::impl_str_serde!(EventId, "an event identifier");

/// The type of an event.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Events that carry an exception payload.
    Error,
    /// A performance monitoring transaction event.
    Transaction,
    /// All events that do not qualify as any other type.
    #[default]
    Default,
}

/// Severity level of an event or breadcrumb.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Indicates very spammy debug information.
    Debug,
    /// Informational messages.
    Info,
    /// A warning.
    Warning,
    /// An error.
    #[default]
    Error,
    /// Similar to error but indicates a critical event that usually causes a shutdown.
    Fatal,
}

/// A list of values, serialized as `{"values": [...]}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Values<T> {
    /// The values of the collection.
    pub values: Vec<T>,
}

impl<T> Values<T> {
    /// Creates an empty values struct.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Checks whether this struct is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> Default for Values<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for Values<T> {
    fn from(values: Vec<T>) -> Self {
        Self { values }
    }
}

/// The mechanism by which an exception was generated and handled.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Mechanism {
    /// Mechanism type (required), for example `generic` or `panic`.
    #[serde(rename = "type")]
    pub ty: String,

    /// Flag indicating whether the exception has been handled by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
}

/// A single exception.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Exception {
    /// Exception type, for example `ValueError`.
    #[serde(rename = "type")]
    pub ty: String,

    /// Human readable display value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Mechanism by which this exception was generated and handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<Mechanism>,
}

/// A breadcrumb, a trail of events leading up to an issue.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Breadcrumb {
    /// The time of the breadcrumb.
    pub timestamp: DateTime<Utc>,

    /// The type of breadcrumb, `default` unless specified.
    #[serde(rename = "type")]
    pub ty: String,

    /// The dotted category of the breadcrumb, for example `http.request`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// The severity of the breadcrumb.
    #[serde(default)]
    pub level: Level,

    /// A human readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Arbitrary data attached to the breadcrumb.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Breadcrumb {
    /// Creates an info breadcrumb with the given message, timestamped now.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            ty: "default".to_owned(),
            category: None,
            level: Level::Info,
            message: Some(message.into()),
            data: BTreeMap::new(),
        }
    }
}

/// The trace context attached to events and transactions.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TraceContext {
    /// The trace ID.
    pub trace_id: TraceId,

    /// The ID of the span.
    pub span_id: SpanId,

    /// The ID of the span enclosing this span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,

    /// The operation of the span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,

    /// The client-side sample rate with which the transaction was kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_sample_rate: Option<f64>,

    /// Additional data, including how the sampling decision was made.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

/// The contexts of an event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Contexts {
    /// The trace context linking the event to a span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
}

impl Contexts {
    /// Returns `true` if no context is set.
    pub fn is_empty(&self) -> bool {
        self.trace.is_none()
    }
}

/// A finished child span of a transaction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SpanRecord {
    /// The trace this span belongs to.
    pub trace_id: TraceId,

    /// The ID of the span.
    pub span_id: SpanId,

    /// The ID of the span enclosing this span.
    pub parent_span_id: SpanId,

    /// The operation of the span.
    pub op: String,

    /// A description of what the span did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Timestamp when the span started.
    pub start_timestamp: DateTime<Utc>,

    /// Timestamp when the span ended.
    pub timestamp: DateTime<Utc>,
}

/// An error or transaction event.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Event {
    /// Unique identifier of this event.
    pub event_id: EventId,

    /// Type of the event.
    #[serde(rename = "type", default)]
    pub ty: EventType,

    /// Severity level of the event.
    #[serde(default)]
    pub level: Level,

    /// Custom message for this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Transaction name of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// The release version of the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// The environment name, such as `production` or `staging`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Timestamp when the event was created, or when a transaction ended.
    pub timestamp: DateTime<Utc>,

    /// Timestamp when a transaction started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    /// One or multiple chained exceptions, innermost cause first.
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub exception: Values<Exception>,

    /// List of breadcrumbs recorded before this event.
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub breadcrumbs: Values<Breadcrumb>,

    /// Custom tags for this event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Arbitrary extra information set by the user.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,

    /// Contexts describing the environment, such as the trace.
    #[serde(default, skip_serializing_if = "Contexts::is_empty")]
    pub contexts: Contexts,

    /// Finished child spans of a transaction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<SpanRecord>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            event_id: EventId::new(),
            ty: EventType::Default,
            level: Level::Error,
            message: None,
            transaction: None,
            release: None,
            environment: None,
            timestamp: Utc::now(),
            start_timestamp: None,
            exception: Values::new(),
            breadcrumbs: Values::new(),
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
            contexts: Contexts::default(),
            spans: Vec::new(),
        }
    }
}

impl Event {
    /// Creates an error event from an error and its chain of sources.
    ///
    /// Each error in the chain becomes one [`Exception`]. The root cause comes first and the
    /// given error last.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut exceptions = vec![exception_from_error(error)];

        let mut source = error.source();
        while let Some(error) = source {
            exceptions.push(exception_from_error(error));
            source = error.source();
        }

        exceptions.reverse();

        Self {
            ty: EventType::Error,
            exception: exceptions.into(),
            ..Default::default()
        }
    }

    /// Creates an event with a plain message.
    pub fn from_message(message: impl Into<String>, level: Level) -> Self {
        Self {
            message: Some(message.into()),
            level,
            ..Default::default()
        }
    }

    /// Returns `true` if this is an error event carrying at least one exception.
    ///
    /// Transactions never qualify, even if they carry exception data.
    pub fn is_exception(&self) -> bool {
        self.ty != EventType::Transaction && !self.exception.is_empty()
    }
}

/// Breadcrumbs stored on a scope, bounded by a maximum count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Breadcrumbs {
    items: VecDeque<Breadcrumb>,
}

impl Breadcrumbs {
    /// Adds a breadcrumb, dropping the oldest ones to stay within `max`.
    pub fn push(&mut self, breadcrumb: Breadcrumb, max: usize) {
        self.items.push_back(breadcrumb);
        while self.items.len() > max {
            self.items.pop_front();
        }
    }

    /// Returns the number of stored breadcrumbs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if there are no breadcrumbs.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates the breadcrumbs from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.items.iter()
    }

    /// Removes all breadcrumbs.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

fn exception_from_error(error: &dyn Error) -> Exception {
    let debug = format!("{error:?}");

    Exception {
        ty: type_from_debug(&debug).to_owned(),
        value: Some(error.to_string()),
        mechanism: None,
    }
}

/// Derives an exception type name from the `Debug` output of an error.
///
/// `Debug` output of derived implementations starts with the type or variant name, for example
/// `Custom { kind: Other, error: "oh no" }` or `ParseIntError { kind: InvalidDigit }`.
fn type_from_debug(debug: &str) -> &str {
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(debug.len());

    match &debug[..end] {
        "" => "Error",
        name => name.rsplit("::").next().unwrap_or(name),
    }
}
