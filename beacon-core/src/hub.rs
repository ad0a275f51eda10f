use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use beacon_protocol::{Breadcrumb, Event, EventId, Level, TransactionContext};
use beacon_sampling::{CustomSamplingContext, SamplingConfig};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::client::{self, Client, EventHint};
use crate::options::DEFAULT_MAX_BREADCRUMBS;
use crate::performance::Transaction;
use crate::scope::Scope;

/// The process-wide hub and the thread that created it.
static MAIN_HUB: Lazy<(Arc<Hub>, ThreadId)> = Lazy::new(|| {
    let hub = Arc::new(Hub::new(None, Arc::new(Scope::default())));
    (hub, thread::current().id())
});

thread_local! {
    static THREAD_HUB: RefCell<Arc<Hub>> = RefCell::new(thread_hub());
}

/// Returns the initial hub of the calling thread.
///
/// The thread that created the main hub uses it directly. All other threads start with an
/// isolated copy of its top layer.
fn thread_hub() -> Arc<Hub> {
    let (main, main_thread) = &*MAIN_HUB;
    if thread::current().id() == *main_thread {
        Arc::clone(main)
    } else {
        Arc::new(Hub::new_from_top(main))
    }
}

#[derive(Clone, Debug)]
struct StackLayer {
    /// Identifies the layer for the guard that pushed it. The root layer is `0`.
    id: u64,
    client: Option<Arc<Client>>,
    scope: Arc<Scope>,
}

/// A stack of layers with a guaranteed root.
#[derive(Debug)]
struct Stack {
    top: StackLayer,
    below: Vec<StackLayer>,
    last_id: u64,
}

impl Stack {
    fn new(client: Option<Arc<Client>>, scope: Arc<Scope>) -> Self {
        Self {
            top: StackLayer {
                id: 0,
                client,
                scope,
            },
            below: Vec::new(),
            last_id: 0,
        }
    }

    fn depth(&self) -> usize {
        self.below.len()
    }

    /// Pushes a copy of the top layer and returns its id.
    fn push(&mut self) -> u64 {
        self.last_id += 1;
        let layer = StackLayer {
            id: self.last_id,
            ..self.top.clone()
        };

        let previous = mem::replace(&mut self.top, layer);
        self.below.push(previous);
        self.last_id
    }

    fn pop(&mut self) -> bool {
        match self.below.pop() {
            Some(layer) => {
                self.top = layer;
                true
            }
            None => false,
        }
    }

    /// Returns the depth at which the layer with the given id is on the stack.
    fn depth_of(&self, id: u64) -> Option<usize> {
        if self.top.id == id {
            return Some(self.depth());
        }

        self.below.iter().position(|layer| layer.id == id)
    }

    fn scope_mut(&mut self) -> &mut Scope {
        Arc::make_mut(&mut self.top.scope)
    }
}

/// Owns the stack of clients and scopes of one execution context.
///
/// Captures go through the client and scope on top of the stack. Pushing a scope copies the
/// current top, so that changes within a unit of work do not leak into the enclosing one.
///
/// Concurrent units of work must use separate hubs. Every thread has its own
/// [`current`](Self::current) hub, and [`Hub::new_from_top`] creates an isolated hub for a request
/// that can be carried across async tasks with
/// [`bind_hub`](crate::HubFutureExt::bind_hub).
pub struct Hub {
    stack: RwLock<Stack>,
}

impl Hub {
    /// Creates a new hub with the given client and scope at the root.
    pub fn new(client: Option<Arc<Client>>, scope: Arc<Scope>) -> Self {
        Self {
            stack: RwLock::new(Stack::new(client, scope)),
        }
    }

    /// Creates an isolated hub starting with the top layer of `other`.
    pub fn new_from_top(other: &Hub) -> Self {
        let top = other.stack.read().top.clone();
        Self::new(top.client, top.scope)
    }

    /// Returns the process-wide hub.
    ///
    /// This is the fallback for threads that were never assigned a hub explicitly.
    pub fn main() -> Arc<Hub> {
        Arc::clone(&MAIN_HUB.0)
    }

    /// Returns the hub of the calling thread.
    pub fn current() -> Arc<Hub> {
        THREAD_HUB.with(|hub| Arc::clone(&hub.borrow()))
    }

    /// Runs `f` with `hub` as the current hub of this thread.
    ///
    /// The previous hub is restored afterwards, even if `f` panics.
    pub fn run<F, R>(hub: Arc<Hub>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct Restore(Option<Arc<Hub>>);

        impl Drop for Restore {
            fn drop(&mut self) {
                if let Some(hub) = self.0.take() {
                    THREAD_HUB.with(|current| *current.borrow_mut() = hub);
                }
            }
        }

        let previous = THREAD_HUB.with(|current| current.replace(hub));
        let _restore = Restore(Some(previous));
        f()
    }

    /// Returns the client on top of the stack.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.stack.read().top.client.clone()
    }

    /// Binds a new client to the top of the stack.
    pub fn bind_client(&self, client: Option<Arc<Client>>) {
        self.stack.write().top.client = client;
    }

    /// Returns a snapshot of the scope on top of the stack.
    pub fn get_scope(&self) -> Arc<Scope> {
        Arc::clone(&self.stack.read().top.scope)
    }

    /// Pushes a copy of the current scope onto the stack.
    ///
    /// The returned guard pops the scope, and any scope pushed after it, when dropped. If the
    /// scope was popped already, dropping the guard has no effect.
    #[must_use = "the scope is popped when the guard is dropped"]
    pub fn push_scope(&self) -> ScopeGuard<'_> {
        let layer = self.stack.write().push();
        ScopeGuard { hub: self, layer }
    }

    /// Pops the top scope from the stack.
    ///
    /// Returns `false` if only the root scope is left, which is never popped.
    pub fn pop_scope(&self) -> bool {
        self.stack.write().pop()
    }

    /// Runs `callback` with a temporary scope configured by `configure`.
    pub fn with_scope<C, F, R>(&self, configure: C, callback: F) -> R
    where
        C: FnOnce(&mut Scope),
        F: FnOnce() -> R,
    {
        let _guard = self.push_scope();
        self.configure_scope(configure);
        callback()
    }

    /// Modifies the scope on top of the stack.
    pub fn configure_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Scope) -> R,
    {
        f(self.stack.write().scope_mut())
    }

    /// Adds a breadcrumb to the current scope, bounded by the client's `max_breadcrumbs`.
    pub fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
        let mut stack = self.stack.write();
        let max = stack
            .top
            .client
            .as_ref()
            .map_or(DEFAULT_MAX_BREADCRUMBS, |client| client.options().max_breadcrumbs);

        stack.scope_mut().push_breadcrumb(breadcrumb, max);
    }

    /// Captures an error with the current client and scope.
    ///
    /// Returns the nil id if there is no enabled client.
    pub fn capture_exception(
        &self,
        error: &(dyn Error + 'static),
        hint: Option<EventHint>,
    ) -> EventId {
        let event = client::event_from_error(error, hint.as_ref());
        self.capture_event(event, hint)
    }

    /// Captures an event with the current client and scope.
    ///
    /// Returns the nil id if there is no enabled client.
    pub fn capture_event(&self, event: Event, hint: Option<EventHint>) -> EventId {
        let (client, event) = {
            let mut stack = self.stack.write();
            let Some(client) = stack.top.client.clone() else {
                return EventId::nil();
            };

            let event = client.prepare_event(event, hint, Some(stack.scope_mut()));
            (client, event)
        };

        client.send_event(event)
    }

    /// Captures a plain message with the current client and scope.
    pub fn capture_message(&self, message: &str, level: Level) -> EventId {
        self.capture_event(Event::from_message(message, level), None)
    }

    /// Starts a transaction with the current client.
    ///
    /// Without client, the transaction is only sampled if the context says so explicitly, and it
    /// is never sent.
    pub fn start_transaction(
        &self,
        context: TransactionContext,
        custom: &CustomSamplingContext,
    ) -> Transaction {
        match self.client() {
            Some(client) => client.start_transaction(context, custom),
            None => {
                let decision = beacon_sampling::decide_sampling(
                    &context,
                    &SamplingConfig::default(),
                    custom,
                    beacon_sampling::random_value,
                );
                Transaction::new(None, context, decision)
            }
        }
    }

    /// Counts the request session of the current scope and removes it.
    ///
    /// Called by whoever owns request boundaries when a request ends.
    pub fn capture_request_session(&self) {
        let mut stack = self.stack.write();
        match stack.top.client.clone() {
            Some(client) => client.capture_request_session(stack.scope_mut()),
            None => beacon_log::debug!("no client bound, discarding request session"),
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.stack.read();
        f.debug_struct("Hub")
            .field("client", &stack.top.client)
            .field("depth", &stack.depth())
            .finish()
    }
}

/// Pops a pushed scope when dropped.
///
/// Created by [`Hub::push_scope`]. If scopes pushed later are still on the stack, they are popped
/// as well.
pub struct ScopeGuard<'a> {
    hub: &'a Hub,
    layer: u64,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let mut stack = self.hub.stack.write();

        let Some(depth) = stack.depth_of(self.layer) else {
            beacon_log::trace!("scope was popped before its guard");
            return;
        };

        if stack.depth() > depth {
            beacon_log::debug!(
                leaked = stack.depth() - depth,
                "popping scopes that outlived their parent scope"
            );
        }

        while stack.depth() >= depth {
            if !stack.pop() {
                break;
            }
        }
    }
}

impl fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("layer", &self.layer)
            .finish()
    }
}
