//! A process-local mailbox system.
//!
//! A [`Reactor`] owns named connectors. Each connector pairs a FIFO message
//! queue with a table of typed subscriber callbacks; the write side is a
//! [`Channel`], the read side an [`EventStream`] that vends
//! [`Subscription`]s. A single dispatch thread drains all connectors through
//! [`Reactor::run_event_loop`] and exits once every connector is closed.
//!
//! All connector state is guarded by one shared mutex and condition variable.
//! The dispatch loop releases the mutex before invoking callbacks, so a
//! callback is free to send, subscribe, and unsubscribe — including
//! unsubscribing itself — without deadlocking.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use log::debug;

use crate::error::{CResult, Error};

/// Anything sent through a connector: any owned, thread-safe type. Dispatch
/// is keyed by the concrete type, via [`Message::as_any`] downcasts.
pub trait Message: Any + Send {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send> Message for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Callback = Arc<dyn Fn(&dyn Message, &Subscription) + Send + Sync>;

struct ConnectorState {
    /// Pending messages, in send order.
    queue: VecDeque<Box<dyn Message>>,

    /// Subscribers by message type. Within a type, callbacks are invoked in
    /// subscription order.
    subscriptions: HashMap<TypeId, std::collections::BTreeMap<u64, Callback>>,

    next_subscription: u64,
}

impl ConnectorState {
    fn new() -> Self {
        ConnectorState {
            queue: VecDeque::new(),
            subscriptions: HashMap::new(),
            next_subscription: 0,
        }
    }
}

struct ReactorState {
    /// Connectors by name, in registration order. The dispatch scan is
    /// first-fit over this order.
    connectors: IndexMap<String, ConnectorState>,

    /// Counter behind auto-generated `"stream-<n>"` names.
    anonymous: u64,
}

struct ReactorCore {
    name: String,
    state: Mutex<ReactorState>,
    cvar: Condvar,
}

impl ReactorCore {
    fn locked(&self) -> MutexGuard<'_, ReactorState> {
        // The lock is never held while callbacks run, so a poisoned state is
        // still coherent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A named hub of connectors. Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct Reactor {
    core: Arc<ReactorCore>,
}

impl Reactor {
    pub fn new(name: impl Into<String>) -> Self {
        Reactor {
            core: Arc::new(ReactorCore {
                name: name.into(),
                state: Mutex::new(ReactorState { connectors: IndexMap::new(), anonymous: 0 }),
                cvar: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Creates a named connector, returning its read and write ends. Fails
    /// with [`Error::NameInUse`] if the name is taken.
    pub fn open(&self, connector_name: &str) -> CResult<(EventStream, Channel)> {
        let mut state = self.core.locked();
        if state.connectors.contains_key(connector_name) {
            return Err(Error::NameInUse(connector_name.to_string()));
        }
        state.connectors.insert(connector_name.to_string(), ConnectorState::new());
        debug!("Reactor {} opened connector {}", self.core.name, connector_name);
        Ok(self.handles(connector_name))
    }

    /// Creates a connector under a fresh auto-generated `"stream-<n>"` name.
    pub fn open_anonymous(&self) -> (EventStream, Channel) {
        let mut state = self.core.locked();
        loop {
            let connector_name = format!("stream-{}", state.anonymous);
            state.anonymous += 1;
            if !state.connectors.contains_key(&connector_name) {
                state.connectors.insert(connector_name.clone(), ConnectorState::new());
                drop(state);
                debug!("Reactor {} opened connector {}", self.core.name, connector_name);
                return self.handles(&connector_name);
            }
        }
    }

    /// A write end for an existing connector, if one has that name.
    pub fn find_channel(&self, connector_name: &str) -> Option<Channel> {
        let state = self.core.locked();
        if !state.connectors.contains_key(connector_name) {
            return None;
        }
        Some(self.handles(connector_name).1)
    }

    /// Closes a connector, dropping its pending messages and subscriptions.
    pub fn close_connector(&self, connector_name: &str) {
        let mut state = self.core.locked();
        if state.connectors.shift_remove(connector_name).is_some() {
            debug!("Reactor {} closed connector {}", self.core.name, connector_name);
        }
        // Wake the loop: it exits when the last connector is gone.
        self.core.cvar.notify_all();
    }

    pub fn close_all_connectors(&self) {
        let mut state = self.core.locked();
        state.connectors.clear();
        self.core.cvar.notify_all();
    }

    /// Dispatches messages until no connectors remain.
    ///
    /// Each pass scans connectors first-fit in registration order, pops one
    /// message, snapshots the callbacks registered for its type at that
    /// moment, releases the lock and invokes them in subscription order. A
    /// message whose type has no subscribers is dropped. With no pending
    /// message and at least one connector, the loop blocks on the condition
    /// variable.
    pub fn run_event_loop(&self) {
        debug!("Reactor {} entering its event loop", self.core.name);
        'event_loop: loop {
            let (message, callbacks) = {
                let mut state = self.core.locked();
                loop {
                    if state.connectors.is_empty() {
                        break 'event_loop;
                    }
                    if let Some(found) = self.locked_pop_pending(&mut state) {
                        break found;
                    }
                    state = self
                        .core
                        .cvar
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            };

            for (callback, subscription) in &callbacks {
                callback(message.as_ref(), subscription);
            }
        }
        debug!("Reactor {} event loop done", self.core.name);
    }

    /// Pops the first pending message of any connector, together with the
    /// callbacks subscribed to its type at this moment.
    fn locked_pop_pending(
        &self,
        state: &mut ReactorState,
    ) -> Option<(Box<dyn Message>, Vec<(Callback, Subscription)>)> {
        for (connector_name, connector) in state.connectors.iter_mut() {
            let message = match connector.queue.pop_front() {
                Some(message) => message,
                None => continue,
            };
            let type_tag = message.as_any().type_id();

            let mut callbacks = Vec::new();
            if let Some(subscribers) = connector.subscriptions.get(&type_tag) {
                for (id, callback) in subscribers {
                    callbacks.push((
                        callback.clone(),
                        Subscription {
                            core: Arc::downgrade(&self.core),
                            connector: connector_name.clone(),
                            type_tag,
                            id: *id,
                        },
                    ));
                }
            }
            return Some((message, callbacks));
        }
        None
    }

    fn handles(&self, connector_name: &str) -> (EventStream, Channel) {
        (
            EventStream {
                core: Arc::downgrade(&self.core),
                connector: connector_name.to_string(),
            },
            Channel {
                core: Arc::downgrade(&self.core),
                reactor_name: self.core.name.clone(),
                connector: connector_name.to_string(),
            },
        )
    }
}

/// The write end of a connector. Holds no strong reference: sends after the
/// connector (or reactor) is gone are dropped silently.
#[derive(Clone)]
pub struct Channel {
    core: Weak<ReactorCore>,
    reactor_name: String,
    connector: String,
}

impl Channel {
    /// Appends a message to the connector queue and wakes the dispatch loop.
    pub fn send<M: Message>(&self, message: M) {
        if let Some(core) = self.core.upgrade() {
            let mut state = core.locked();
            if let Some(connector) = state.connectors.get_mut(&self.connector) {
                connector.queue.push_back(Box::new(message));
                core.cvar.notify_all();
            }
        }
    }

    /// The name of the reactor this channel belongs to.
    pub fn reactor_name(&self) -> &str {
        &self.reactor_name
    }

    /// The connector name.
    pub fn connector_name(&self) -> &str {
        &self.connector
    }
}

/// The read end of a connector: registers typed callbacks.
pub struct EventStream {
    core: Weak<ReactorCore>,
    connector: String,
}

impl EventStream {
    /// Subscribes `callback` to messages of type `M` on this connector. The
    /// callback takes effect no later than the next message popped after this
    /// returns. Unsubscribing is explicit, through the returned handle or the
    /// one passed into the callback.
    pub fn on<M, F>(&self, callback: F) -> Subscription
    where
        M: Message,
        F: Fn(&M, &Subscription) + Send + Sync + 'static,
    {
        let type_tag = TypeId::of::<M>();
        let wrapped: Callback = Arc::new(move |message, subscription| {
            if let Some(message) = message.as_any().downcast_ref::<M>() {
                callback(message, subscription);
            }
        });

        let mut id = 0;
        if let Some(core) = self.core.upgrade() {
            let mut state = core.locked();
            if let Some(connector) = state.connectors.get_mut(&self.connector) {
                connector.next_subscription += 1;
                id = connector.next_subscription;
                connector.subscriptions.entry(type_tag).or_default().insert(id, wrapped);
            }
        }
        Subscription { core: self.core.clone(), connector: self.connector.clone(), type_tag, id }
    }

    /// The connector name.
    pub fn connector_name(&self) -> &str {
        &self.connector
    }

    /// Closes the underlying connector.
    pub fn close(&self) {
        if let Some(core) = self.core.upgrade() {
            let mut state = core.locked();
            state.connectors.shift_remove(&self.connector);
            core.cvar.notify_all();
        }
    }
}

/// A handle to one registered callback. Outlives its connector safely: once
/// the connector is closed, unsubscribing is a no-op.
pub struct Subscription {
    core: Weak<ReactorCore>,
    connector: String,
    type_tag: TypeId,
    id: u64,
}

impl Subscription {
    /// Removes exactly this callback. May be called from within the callback
    /// itself; the dispatch loop does not hold the reactor lock while
    /// invoking callbacks.
    pub fn unsubscribe(&self) {
        if let Some(core) = self.core.upgrade() {
            let mut state = core.locked();
            if let Some(connector) = state.connectors.get_mut(&self.connector) {
                if let Some(subscribers) = connector.subscriptions.get_mut(&self.type_tag) {
                    subscribers.remove(&self.id);
                    if subscribers.is_empty() {
                        connector.subscriptions.remove(&self.type_tag);
                    }
                }
            }
        }
    }
}
