use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the HTTP header carrying the [`TraceHeader`] token.
pub const TRACE_HEADER_NAME: &str = "sentry-trace";

/// Separator between the fields of a [`TraceHeader`].
const TRACE_HEADER_SEPARATOR: char = '-';

/// Error returned when parsing a [`TraceId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid trace id, expected 32 hex characters")]
pub struct ParseTraceIdError;

/// Error returned when parsing a [`SpanId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid span id, expected 16 hex characters")]
pub struct ParseSpanIdError;

/// A 32-character hex identifier shared by all spans of one trace.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TraceId(u128);

impl TraceId {
    /// Creates a new random trace identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    /// Returns the trace ID as a `u128`.
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = ParseTraceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_hex_string(s, 32) {
            return Err(ParseTraceIdError);
        }

        match u128::from_str_radix(s, 16) {
            Ok(0) | Err(_) => Err(ParseTraceIdError),
            Ok(value) => Ok(Self(value)),
        }
    }
}

beacon_common::impl_str_serde!(TraceId, "a trace identifier");

/// A 16-character hex identifier of a single span.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SpanId(u64);

impl SpanId {
    /// Creates a new random span identifier.
    pub fn random() -> Self {
        // Zero is reserved as invalid.
        Self(rand::random::<u64>().max(1))
    }

    /// Returns the span ID as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = ParseSpanIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_hex_string(s, 16) {
            return Err(ParseSpanIdError);
        }

        match u64::from_str_radix(s, 16) {
            Ok(0) | Err(_) => Err(ParseSpanIdError),
            Ok(value) => Ok(Self(value)),
        }
    }
}

beacon_common::impl_str_serde!(SpanId, "a span identifier");

fn is_hex_string(string: &str, len: usize) -> bool {
    string.len() == len && string.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Error returned when parsing a [`TraceHeader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseTraceHeaderError {
    /// The trace ID segment is malformed.
    #[error(transparent)]
    TraceId(#[from] ParseTraceIdError),
    /// The span ID segment is missing or malformed.
    #[error(transparent)]
    SpanId(#[from] ParseSpanIdError),
    /// The sampled flag is neither `0` nor `1`.
    #[error("invalid sampled flag, expected 0 or 1")]
    Sampled,
    /// The header has more than three segments.
    #[error("too many segments in trace header")]
    TooManySegments,
}

/// The trace propagation token sent with outbound requests.
///
/// The token consists of the trace ID, the ID of the span making the request and the sampling
/// decision, separated by dashes. The sampled flag is only present when a decision was made:
///
/// ```text
/// 771a43a4192642f0b136d5159a501700-b5d7a2a8d6e1c2f3-1
/// ```
///
/// # Example
///
/// ```
/// use beacon_protocol::TraceHeader;
///
/// let header: TraceHeader = "771a43a4192642f0b136d5159a501700-b5d7a2a8d6e1c2f3-1".parse().unwrap();
/// assert_eq!(header.sampled, Some(true));
/// assert_eq!(header.to_string(), "771a43a4192642f0b136d5159a501700-b5d7a2a8d6e1c2f3-1");
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TraceHeader {
    /// The trace the sending span belongs to.
    pub trace_id: TraceId,
    /// The span that made the outbound request.
    pub span_id: SpanId,
    /// The sampling decision of the sending span, if one was made.
    pub sampled: Option<bool>,
}

impl TraceHeader {
    /// Creates a new trace header.
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: Option<bool>) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }
}

impl fmt::Display for TraceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{TRACE_HEADER_SEPARATOR}{}",
            self.trace_id, self.span_id
        )?;

        match self.sampled {
            Some(true) => write!(f, "{TRACE_HEADER_SEPARATOR}1"),
            Some(false) => write!(f, "{TRACE_HEADER_SEPARATOR}0"),
            None => Ok(()),
        }
    }
}

impl FromStr for TraceHeader {
    type Err = ParseTraceHeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = s.trim_matches([' ', '\t']).split(TRACE_HEADER_SEPARATOR);

        let trace_id = segments.next().unwrap_or_default();
        let trace_id = trace_id.to_ascii_lowercase().parse()?;

        let span_id = segments.next().ok_or(ParseSpanIdError)?;
        let span_id = span_id.to_ascii_lowercase().parse()?;

        let sampled = match segments.next() {
            None => None,
            Some("1") => Some(true),
            Some("0") => Some(false),
            Some(_) => return Err(ParseTraceHeaderError::Sampled),
        };

        if segments.next().is_some() {
            return Err(ParseTraceHeaderError::TooManySegments);
        }

        Ok(Self {
            trace_id,
            span_id,
            sampled,
        })
    }
}

beacon_common::impl_str_serde!(TraceHeader, "a trace propagation header");

/// Describes a transaction before it is started.
///
/// The context is handed to the sampler, which reads the explicit `sampled` decision and the
/// `parent_sampled` decision of an upstream service.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TransactionContext {
    /// The name of the transaction, for example the route of a request.
    pub name: String,
    /// The operation of the transaction, for example `http.server`.
    pub op: String,
    /// The trace this transaction belongs to.
    pub trace_id: TraceId,
    /// The span ID of the transaction itself.
    pub span_id: SpanId,
    /// The span that caused this transaction, usually in another service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// The sampling decision of the parent span, if it was propagated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_sampled: Option<bool>,
    /// An explicit sampling decision that overrides all sampling configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
}

impl TransactionContext {
    /// Creates a context for a new transaction starting a new trace.
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            parent_sampled: None,
            sampled: None,
        }
    }

    /// Creates a context that continues the trace described by an incoming [`TraceHeader`].
    pub fn continue_from_header(
        name: impl Into<String>,
        op: impl Into<String>,
        header: &TraceHeader,
    ) -> Self {
        Self {
            trace_id: header.trace_id,
            parent_span_id: Some(header.span_id),
            parent_sampled: header.sampled,
            ..Self::new(name, op)
        }
    }

    /// Creates a context from incoming HTTP headers.
    ///
    /// Looks for the [`TRACE_HEADER_NAME`] header case-insensitively. If it is missing or
    /// malformed, a new trace is started.
    pub fn continue_from_headers<'a, I>(
        name: impl Into<String>,
        op: impl Into<String>,
        headers: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let header = headers
            .into_iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(TRACE_HEADER_NAME))
            .find_map(|(_, value)| value.parse::<TraceHeader>().ok());

        match header {
            Some(header) => Self::continue_from_header(name, op, &header),
            None => Self::new(name, op),
        }
    }

    /// Sets an explicit sampling decision.
    pub fn with_sampled(mut self, sampled: Option<bool>) -> Self {
        self.sampled = sampled;
        self
    }
}
