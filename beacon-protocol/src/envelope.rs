use crate::event::{Event, EventId, EventType};
use crate::session::SessionAggregates;

/// A payload handed to a transport for delivery.
///
/// Serialization into the wire format is up to the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// An error or message event.
    Event(Box<Event>),
    /// A finished, sampled transaction.
    Transaction(Box<Event>),
    /// Aggregated request session outcomes.
    Sessions(SessionAggregates),
}

impl Envelope {
    /// Wraps an event, choosing the envelope kind from the event type.
    pub fn from_event(event: Event) -> Self {
        match event.ty {
            EventType::Transaction => Self::Transaction(Box::new(event)),
            _ => Self::Event(Box::new(event)),
        }
    }

    /// Returns the name of the contained item type.
    pub fn item_type(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Transaction(_) => "transaction",
            Self::Sessions(_) => "sessions",
        }
    }

    /// Returns the ID of the contained event or transaction.
    pub fn event_id(&self) -> Option<EventId> {
        self.event().map(|event| event.event_id)
    }

    /// Returns the contained event or transaction.
    pub fn event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) | Self::Transaction(event) => Some(event),
            Self::Sessions(_) => None,
        }
    }

    /// Returns the contained session aggregates.
    pub fn session_aggregates(&self) -> Option<&SessionAggregates> {
        match self {
            Self::Sessions(aggregates) => Some(aggregates),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_event_kind() {
        let envelope = Envelope::from_event(Event::default());
        assert_eq!(envelope.item_type(), "event");
        assert!(envelope.session_aggregates().is_none());

        let transaction = Event {
            ty: EventType::Transaction,
            ..Default::default()
        };
        let event_id = transaction.event_id;

        let envelope = Envelope::from_event(transaction);
        assert_eq!(envelope.item_type(), "transaction");
        assert_eq!(envelope.event_id(), Some(event_id));
    }
}
