use std::collections::BTreeMap;

use beacon_protocol::{Breadcrumb, Breadcrumbs, Event, EventType, Level, RequestSession};
use serde_json::Value;

use crate::options::DEFAULT_MAX_BREADCRUMBS;
use crate::performance::{TransactionOrSpan, WeakTransactionOrSpan};

/// Ambient data applied to every event captured within a unit of work.
///
/// Scopes have value semantics: cloning a scope copies tags, extra data, breadcrumbs and the
/// request session. The active span is the only exception, the scope does not own it and forgets
/// it as soon as the span is dropped everywhere else.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    level: Option<Level>,
    transaction: Option<String>,
    tags: BTreeMap<String, String>,
    extra: BTreeMap<String, Value>,
    breadcrumbs: Breadcrumbs,
    span: Option<WeakTransactionOrSpan>,
    request_session: Option<RequestSession>,
}

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the scope to its default state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Overrides the level of all captured events.
    pub fn set_level(&mut self, level: Option<Level>) {
        self.level = level;
    }

    /// Sets the transaction name reported with events.
    pub fn set_transaction(&mut self, transaction: Option<&str>) {
        self.transaction = transaction.map(str::to_owned);
    }

    /// Sets a tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Removes a tag.
    pub fn remove_tag(&mut self, key: &str) {
        self.tags.remove(key);
    }

    /// Sets an extra value.
    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    /// Removes an extra value.
    pub fn remove_extra(&mut self, key: &str) {
        self.extra.remove(key);
    }

    /// Adds a breadcrumb, keeping at most 100.
    pub fn add_breadcrumb(&mut self, breadcrumb: Breadcrumb) {
        self.push_breadcrumb(breadcrumb, DEFAULT_MAX_BREADCRUMBS);
    }

    pub(crate) fn push_breadcrumb(&mut self, breadcrumb: Breadcrumb, max: usize) {
        self.breadcrumbs.push(breadcrumb, max);
    }

    /// Removes all breadcrumbs.
    pub fn clear_breadcrumbs(&mut self) {
        self.breadcrumbs.clear();
    }

    /// Returns the recorded breadcrumbs.
    pub fn breadcrumbs(&self) -> &Breadcrumbs {
        &self.breadcrumbs
    }

    /// Sets the active span. Events captured with this scope are linked to it.
    pub fn set_span(&mut self, span: Option<TransactionOrSpan>) {
        self.span = span.as_ref().map(TransactionOrSpan::downgrade);
    }

    /// Returns the active span if it is still alive.
    pub fn get_span(&self) -> Option<TransactionOrSpan> {
        self.span.as_ref()?.upgrade()
    }

    /// Sets the request session tracked for this unit of work.
    pub fn set_request_session(&mut self, session: Option<RequestSession>) {
        self.request_session = session;
    }

    /// Returns the request session.
    pub fn request_session(&self) -> Option<&RequestSession> {
        self.request_session.as_ref()
    }

    pub(crate) fn request_session_mut(&mut self) -> Option<&mut RequestSession> {
        self.request_session.as_mut()
    }

    pub(crate) fn take_request_session(&mut self) -> Option<RequestSession> {
        self.request_session.take()
    }

    /// Applies the scope to an event.
    ///
    /// Values already present on the event take precedence over those of the scope. Events are
    /// linked to the active span unless they already carry a trace context.
    pub fn apply_to_event(&self, mut event: Event) -> Event {
        if let Some(level) = self.level {
            event.level = level;
        }

        if event.transaction.is_none() && event.ty != EventType::Transaction {
            event.transaction.clone_from(&self.transaction);
        }

        for (key, value) in &self.tags {
            event
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        for (key, value) in &self.extra {
            event
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        if event.breadcrumbs.is_empty() {
            event.breadcrumbs = self.breadcrumbs.iter().cloned().collect::<Vec<_>>().into();
        }

        if event.contexts.trace.is_none() && event.ty != EventType::Transaction {
            event.contexts.trace = self.get_span().map(|span| span.trace_context());
        }

        event
    }
}
