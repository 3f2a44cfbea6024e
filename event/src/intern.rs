use {
    crate::{
        listener::{Dispatch, Handler, HandlerId},
        EntityKey, EventName, ListenerKey,
    },
    slotmap::{SecondaryMap, SlotMap},
    std::{collections::HashMap, fmt, rc::Rc},
};

/// How many more times a listener may be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unlimited,
    Remaining(usize),
}

impl Budget {
    /// Consumes one invocation; returns true once nothing is left.
    #[inline]
    fn consume(&mut self) -> bool {
        match self {
            Budget::Unlimited => false,
            Budget::Remaining(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
        }
    }
}

/// A stored subscription contract.
pub struct Listener {
    pub(crate) emittor: EntityKey,
    pub(crate) subscriber: Option<EntityKey>,
    pub(crate) event: EventName,
    pub(crate) handler: Rc<dyn Dispatch>,
    pub(crate) handler_id: HandlerId,
    pub(crate) remaining: Budget,
}

impl Listener {
    pub fn new<P>(
        emittor: EntityKey,
        subscriber: Option<EntityKey>,
        event: impl Into<EventName>,
        handler: &Handler<P>,
        remaining: Budget,
    ) -> Self {
        Listener {
            emittor,
            subscriber,
            event: event.into(),
            handler: handler.erased(),
            handler_id: handler.id(),
            remaining,
        }
    }

    #[inline]
    pub fn emittor(&self) -> EntityKey {
        self.emittor
    }

    #[inline]
    pub fn subscriber(&self) -> Option<EntityKey> {
        self.subscriber
    }

    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[inline]
    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    #[inline]
    pub fn remaining(&self) -> Budget {
        self.remaining
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("emittor", &self.emittor)
            .field("subscriber", &self.subscriber)
            .field("event", &self.event)
            .field("handler", &self.handler_id)
            .field("remaining", &self.remaining)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct EntityRecord {
    pub(crate) label: Option<String>,
}

type EventMap = HashMap<EventName, Vec<ListenerKey>>;

/// The registry itself, without any sharing.
///
/// Listeners live in one arena and are indexed twice:
/// * by emittor, then event name (dispatch order);
/// * by subscriber, then emittor, then event name (teardown only).
///
/// Both index entries of a listener are always inserted and removed together.
#[derive(Default)]
pub struct ListenerBank {
    pub(crate) entities: SlotMap<EntityKey, EntityRecord>,
    listeners: SlotMap<ListenerKey, Listener>,
    emissions: SecondaryMap<EntityKey, EventMap>,
    subscriptions: SecondaryMap<EntityKey, HashMap<EntityKey, EventMap>>,
}

impl ListenerBank {
    /// Create an empty registry
    pub fn new() -> Self {
        Default::default()
    }

    /// Allocates an identity for a new entity.
    pub fn register(&mut self, label: Option<String>) -> EntityKey {
        self.entities.insert(EntityRecord { label })
    }

    /// Forgets an entity, handing back anything still attached to it.
    pub fn release(&mut self, entity: EntityKey) -> Vec<Listener> {
        let dropped = self.drop_entity(entity);
        self.entities.remove(entity);
        dropped
    }

    pub fn label(&self, entity: EntityKey) -> Option<&str> {
        self.entities.get(entity).and_then(|record| record.label.as_deref())
    }

    /// Stores a listener under its emittor and, if any, its subscriber.
    ///
    /// No deduplication takes place; storing the same handler twice means it
    /// runs twice per dispatch.
    pub fn store(&mut self, listener: Listener) -> ListenerKey {
        let (emittor, subscriber, event) =
            (listener.emittor, listener.subscriber, listener.event.clone());
        let key = self.listeners.insert(listener);

        Self::entry(&mut self.emissions, emittor).entry(event.clone()).or_default().push(key);

        if let Some(subscriber) = subscriber {
            Self::entry(&mut self.subscriptions, subscriber)
                .entry(emittor)
                .or_default()
                .entry(event)
                .or_default()
                .push(key);
        }

        key
    }

    /// Returns the first listener of `emittor` for `event` bound to `handler`.
    pub fn get(&self, emittor: EntityKey, event: &str, handler: HandlerId) -> Option<ListenerKey> {
        self.emittor_event_listeners(emittor, event)
            .iter()
            .copied()
            .find(|key| self.listeners.get(*key).map_or(false, |l| l.handler_id == handler))
    }

    /// The live, ordered listener list of `emittor` for `event`.
    pub fn emittor_event_listeners(&self, emittor: EntityKey, event: &str) -> &[ListenerKey] {
        self.emissions
            .get(emittor)
            .and_then(|events| events.get(event))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[inline]
    pub fn listener(&self, key: ListenerKey) -> Option<&Listener> {
        self.listeners.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ListenerKey, &Listener)> {
        self.listeners.iter()
    }

    #[inline]
    pub(crate) fn handler(&self, key: ListenerKey) -> Option<Rc<dyn Dispatch>> {
        self.listeners.get(key).map(|l| l.handler.clone())
    }

    /// Consumes one invocation of a listener's budget.
    ///
    /// Returns `Some(true)` once the budget is exhausted and `None` if the
    /// listener is gone.
    pub fn consume(&mut self, key: ListenerKey) -> Option<bool> {
        self.listeners.get_mut(key).map(|l| l.remaining.consume())
    }

    /// Removes a listener from both indices. Dropping an unknown listener is a no-op.
    pub fn drop_listener(&mut self, key: ListenerKey) -> Option<Listener> {
        let listener = self.listeners.remove(key)?;

        if let Some(events) = self.emissions.get_mut(listener.emittor) {
            Self::unlink(events, &listener.event, key);
            if events.is_empty() {
                self.emissions.remove(listener.emittor);
            }
        }

        if let Some(subscriber) = listener.subscriber {
            if let Some(emittors) = self.subscriptions.get_mut(subscriber) {
                if let Some(events) = emittors.get_mut(&listener.emittor) {
                    Self::unlink(events, &listener.event, key);
                    if events.is_empty() {
                        emittors.remove(&listener.emittor);
                    }
                }
                if emittors.is_empty() {
                    self.subscriptions.remove(subscriber);
                }
            }
        }

        Some(listener)
    }

    /// Drops every listener `entity` emits to or subscribed with.
    ///
    /// The removed records are handed back so that the caller decides where
    /// their handlers are released.
    pub fn drop_entity(&mut self, entity: EntityKey) -> Vec<Listener> {
        // snapshot first; dropping mutates the very lists being walked
        let mut affected: Vec<ListenerKey> = self
            .emissions
            .get(entity)
            .into_iter()
            .flat_map(|events| events.values().flatten().copied())
            .collect();
        affected.extend(
            self.subscriptions
                .get(entity)
                .into_iter()
                .flat_map(|emittors| emittors.values().flat_map(|events| events.values().flatten()))
                .copied(),
        );

        let dropped = affected.into_iter().filter_map(|key| self.drop_listener(key)).collect();

        self.emissions.remove(entity);
        self.subscriptions.remove(entity);

        dropped
    }

    /// Number of stored listeners.
    #[inline]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of listeners indexed under `entity` as emittor.
    pub fn emission_count(&self, entity: EntityKey) -> usize {
        self.emissions.get(entity).map_or(0, |events| events.values().map(Vec::len).sum())
    }

    /// Number of listeners indexed under `entity` as subscriber.
    pub fn subscription_count(&self, entity: EntityKey) -> usize {
        self.subscriptions.get(entity).map_or(0, |emittors| {
            emittors.values().flat_map(|events| events.values()).map(Vec::len).sum()
        })
    }

    fn entry<V: Default>(map: &mut SecondaryMap<EntityKey, V>, key: EntityKey) -> &mut V {
        if !map.contains_key(key) {
            map.insert(key, V::default());
        }
        &mut map[key]
    }

    fn unlink(events: &mut EventMap, event: &str, key: ListenerKey) {
        if let Some(keys) = events.get_mut(event) {
            if let Some(idx) = keys.iter().position(|k| *k == key) {
                keys.remove(idx);
            }
            if keys.is_empty() {
                events.remove(event);
            }
        }
    }
}

impl fmt::Debug for ListenerBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBank")
            .field("entities", &self.entities.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
