use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use beacon_protocol::{
    Event, EventType, Level, SpanId, SpanRecord, TraceContext, TraceHeader, TraceId,
    TransactionContext,
};
use beacon_sampling::{SamplingDecision, SamplingMetadata};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::client::Client;

/// Key of the sampling metadata in the trace context data.
const SAMPLING_DATA_KEY: &str = "sampling";

pub(crate) struct TransactionInner {
    client: Option<Arc<Client>>,
    name: String,
    op: String,
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
    metadata: Option<SamplingMetadata>,
    start_timestamp: DateTime<Utc>,
    spans: Vec<SpanRecord>,
    finished: bool,
}

impl TransactionInner {
    fn trace_context(&self) -> TraceContext {
        let mut data = BTreeMap::new();
        if let Some(value) = self
            .metadata
            .and_then(|metadata| serde_json::to_value(metadata).ok())
        {
            data.insert(SAMPLING_DATA_KEY.to_owned(), value);
        }

        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            op: Some(self.op.clone()),
            client_sample_rate: self.metadata.and_then(|metadata| metadata.rate),
            data,
        }
    }
}

/// A named unit of traced work and the root of a span tree.
///
/// The sampling decision is made once, when the transaction is started through a
/// [`Hub`](crate::Hub) or [`Client`]. Child spans inherit it. Finishing a sampled transaction
/// sends it together with all finished child spans. Unsampled transactions are never sent.
///
/// Cloning a transaction yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Mutex<TransactionInner>>,
}

impl Transaction {
    pub(crate) fn new(
        client: Option<Arc<Client>>,
        context: TransactionContext,
        decision: SamplingDecision,
    ) -> Self {
        let TransactionContext {
            name,
            op,
            trace_id,
            span_id,
            parent_span_id,
            ..
        } = context;

        Self {
            inner: Arc::new(Mutex::new(TransactionInner {
                client,
                name,
                op,
                trace_id,
                span_id,
                parent_span_id,
                sampled: decision.sampled,
                metadata: decision.metadata,
                start_timestamp: Utc::now(),
                spans: Vec::new(),
                finished: false,
            })),
        }
    }

    /// Returns the name of the transaction.
    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    /// Renames the transaction.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.lock().name = name.into();
    }

    /// Returns the trace this transaction belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.inner.lock().trace_id
    }

    /// Returns the span ID of the transaction.
    pub fn span_id(&self) -> SpanId {
        self.inner.lock().span_id
    }

    /// Returns the span ID of the upstream parent, if the trace was continued.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.lock().parent_span_id
    }

    /// Returns whether the transaction is sampled.
    pub fn is_sampled(&self) -> bool {
        self.inner.lock().sampled
    }

    /// Returns how the sampling decision was made.
    ///
    /// This is `None` if tracing is disabled or the configured rate was invalid.
    pub fn sampling_metadata(&self) -> Option<SamplingMetadata> {
        self.inner.lock().metadata
    }

    /// Returns the trace context describing this transaction.
    pub fn trace_context(&self) -> TraceContext {
        self.inner.lock().trace_context()
    }

    /// Returns the header propagating this transaction to downstream services.
    pub fn trace_header(&self) -> TraceHeader {
        let inner = self.inner.lock();
        TraceHeader::new(inner.trace_id, inner.span_id, Some(inner.sampled))
    }

    /// Returns `true` once the transaction has been finished.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Starts a child span with the given operation and description.
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> Span {
        let parent_span_id = self.span_id();
        Span::new(Arc::clone(&self.inner), parent_span_id, op, description)
    }

    /// Finishes the transaction and sends it if it is sampled.
    ///
    /// Spans finished after the transaction are discarded. Finishing twice has no effect.
    pub fn finish(&self) {
        let (client, event) = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;

            if !inner.sampled {
                beacon_log::debug!(
                    transaction = %inner.name,
                    "discarding unsampled transaction"
                );
                return;
            }

            let spans = std::mem::take(&mut inner.spans);
            let Some(client) = inner.client.clone() else {
                return;
            };

            let mut event = Event {
                ty: EventType::Transaction,
                level: Level::Info,
                transaction: Some(inner.name.clone()),
                start_timestamp: Some(inner.start_timestamp),
                spans,
                ..Default::default()
            };
            event.contexts.trace = Some(inner.trace_context());

            (client, event)
        };

        client.send_transaction(event);
    }

    fn downgrade(&self) -> Weak<Mutex<TransactionInner>> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("name", &inner.name)
            .field("op", &inner.op)
            .field("trace_id", &inner.trace_id)
            .field("span_id", &inner.span_id)
            .field("sampled", &inner.sampled)
            .field("finished", &inner.finished)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) struct SpanInner {
    record: SpanRecord,
    finished: bool,
}

/// A child span of a [`Transaction`].
///
/// Cloning a span yields another handle to the same span.
#[derive(Clone)]
pub struct Span {
    transaction: Arc<Mutex<TransactionInner>>,
    sampled: bool,
    inner: Arc<Mutex<SpanInner>>,
}

impl Span {
    fn new(
        transaction: Arc<Mutex<TransactionInner>>,
        parent_span_id: SpanId,
        op: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let (trace_id, sampled) = {
            let inner = transaction.lock();
            (inner.trace_id, inner.sampled)
        };

        let now = Utc::now();
        let record = SpanRecord {
            trace_id,
            span_id: SpanId::random(),
            parent_span_id,
            op: op.into(),
            description: Some(description.into()),
            start_timestamp: now,
            timestamp: now,
        };

        Self {
            transaction,
            sampled,
            inner: Arc::new(Mutex::new(SpanInner {
                record,
                finished: false,
            })),
        }
    }

    /// Returns the trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.inner.lock().record.trace_id
    }

    /// Returns the ID of this span.
    pub fn span_id(&self) -> SpanId {
        self.inner.lock().record.span_id
    }

    /// Returns the ID of the enclosing span or transaction.
    pub fn parent_span_id(&self) -> SpanId {
        self.inner.lock().record.parent_span_id
    }

    /// Returns the sampling decision inherited from the transaction.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Returns the trace context describing this span.
    pub fn trace_context(&self) -> TraceContext {
        let record = &self.inner.lock().record;
        TraceContext {
            trace_id: record.trace_id,
            span_id: record.span_id,
            parent_span_id: Some(record.parent_span_id),
            op: Some(record.op.clone()),
            client_sample_rate: None,
            data: BTreeMap::new(),
        }
    }

    /// Returns the header propagating this span to downstream services.
    pub fn trace_header(&self) -> TraceHeader {
        let record = &self.inner.lock().record;
        TraceHeader::new(record.trace_id, record.span_id, Some(self.sampled))
    }

    /// Starts a nested child span.
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> Span {
        Span::new(
            Arc::clone(&self.transaction),
            self.span_id(),
            op,
            description,
        )
    }

    /// Finishes the span and records it on its transaction.
    ///
    /// Finishing twice has no effect.
    pub fn finish(&self) {
        let record = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            inner.record.timestamp = Utc::now();
            inner.record.clone()
        };

        if !self.sampled {
            return;
        }

        let mut transaction = self.transaction.lock();
        if transaction.finished {
            beacon_log::debug!(
                op = %record.op,
                "dropping span finished after its transaction"
            );
            return;
        }

        transaction.spans.push(record);
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("sampled", &self.sampled)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

/// Either a [`Transaction`] or a [`Span`].
#[derive(Clone, Debug)]
pub enum TransactionOrSpan {
    /// A transaction.
    Transaction(Transaction),
    /// A child span.
    Span(Span),
}

impl TransactionOrSpan {
    /// Returns whether the transaction or span is sampled.
    pub fn is_sampled(&self) -> bool {
        match self {
            Self::Transaction(transaction) => transaction.is_sampled(),
            Self::Span(span) => span.is_sampled(),
        }
    }

    /// Returns the trace context.
    pub fn trace_context(&self) -> TraceContext {
        match self {
            Self::Transaction(transaction) => transaction.trace_context(),
            Self::Span(span) => span.trace_context(),
        }
    }

    /// Returns the header propagating this span to downstream services.
    pub fn trace_header(&self) -> TraceHeader {
        match self {
            Self::Transaction(transaction) => transaction.trace_header(),
            Self::Span(span) => span.trace_header(),
        }
    }

    /// Starts a child span.
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> Span {
        match self {
            Self::Transaction(transaction) => transaction.start_child(op, description),
            Self::Span(span) => span.start_child(op, description),
        }
    }

    /// Finishes the transaction or span.
    pub fn finish(&self) {
        match self {
            Self::Transaction(transaction) => transaction.finish(),
            Self::Span(span) => span.finish(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakTransactionOrSpan {
        match self {
            Self::Transaction(transaction) => {
                WeakTransactionOrSpan::Transaction(transaction.downgrade())
            }
            Self::Span(span) => WeakTransactionOrSpan::Span {
                transaction: Arc::downgrade(&span.transaction),
                sampled: span.sampled,
                inner: Arc::downgrade(&span.inner),
            },
        }
    }
}

impl From<Transaction> for TransactionOrSpan {
    fn from(transaction: Transaction) -> Self {
        Self::Transaction(transaction)
    }
}

impl From<Span> for TransactionOrSpan {
    fn from(span: Span) -> Self {
        Self::Span(span)
    }
}

/// A non-owning reference to the active span of a scope.
#[derive(Clone)]
pub(crate) enum WeakTransactionOrSpan {
    Transaction(Weak<Mutex<TransactionInner>>),
    Span {
        transaction: Weak<Mutex<TransactionInner>>,
        sampled: bool,
        inner: Weak<Mutex<SpanInner>>,
    },
}

impl WeakTransactionOrSpan {
    /// Returns the span if it is still referenced elsewhere.
    pub(crate) fn upgrade(&self) -> Option<TransactionOrSpan> {
        match self {
            Self::Transaction(inner) => Some(TransactionOrSpan::Transaction(Transaction {
                inner: inner.upgrade()?,
            })),
            Self::Span {
                transaction,
                sampled,
                inner,
            } => Some(TransactionOrSpan::Span(Span {
                transaction: transaction.upgrade()?,
                sampled: *sampled,
                inner: inner.upgrade()?,
            })),
        }
    }
}

impl fmt::Debug for WeakTransactionOrSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction(_) => f.write_str("WeakTransaction"),
            Self::Span { .. } => f.write_str("WeakSpan"),
        }
    }
}
