use beacon_protocol::{Event, RequestSession, SessionStatus};

/// Decides how capturing an event affects the request session of its scope.
///
/// The [`Client`](crate::Client) consults its policy for every event captured with a scope that
/// carries a request session, as long as session tracking is active. Policies must never move a
/// session out of a terminal status (see [`SessionStatus::is_terminal`]).
pub trait SessionPolicy: Send + Sync + 'static {
    /// Updates the request session before `event` is sent.
    fn on_capture(&self, event: &Event, session: &mut RequestSession);
}

/// The default policy for server-side request sessions.
///
/// A request becomes `Errored` when an event with at least one exception is captured while the
/// request is still `Ok`. All other statuses are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestSessionPolicy;

impl SessionPolicy for RequestSessionPolicy {
    fn on_capture(&self, event: &Event, session: &mut RequestSession) {
        if event.is_exception() && session.status == SessionStatus::Ok {
            session.status = SessionStatus::Errored;
        }
    }
}
