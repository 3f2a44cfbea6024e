use {
    crate::{
        bank::{ListenerBank, WeakBank},
        checkpoint::{Checkpoints, When},
        error::BindingError,
        external::{Bindings, EventSource, ObservedNode},
        intern::{Budget, Listener},
        listener::Handler,
        timeout::Timeouts,
        traits::Event,
        BindingKey, EntityKey, EventName, TimeoutKey,
    },
    std::{cell::Cell, fmt, marker::PhantomData, rc::Rc, time::Duration},
    tracing::{debug, warn},
};

/// Name of the lifecycle event every entity emits when destroyed.
pub const DESTROY: &str = "destroy";

/// Payload of [`DESTROY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destroyed {
    pub entity: EntityKey,
}

/// An entity which emits events of type `E` and subscribes to others.
///
/// Every subscription is tied to the lifetime of both parties: destroying an
/// entity drops every listener it emits to or subscribed with, detaches its
/// external bindings and cancels its pending timeouts. Dropping the entity
/// destroys it.
///
/// All entities talking to each other must share one [`ListenerBank`].
pub struct EventHandler<E: Event> {
    key: EntityKey,
    bank: ListenerBank,
    checkpoints: Checkpoints,
    timeouts: Timeouts,
    bindings: Bindings,
    logs: Cell<bool>,
    destroyed: Cell<bool>,
    _events: PhantomData<fn(E)>,
}

impl<E: Event> EventHandler<E> {
    pub fn new(bank: &ListenerBank) -> Self {
        Self::register(bank, None)
    }

    /// Creates an entity whose label shows up in dispatch traces.
    pub fn with_label(bank: &ListenerBank, label: impl Into<String>) -> Self {
        Self::register(bank, Some(label.into()))
    }

    fn register(bank: &ListenerBank, label: Option<String>) -> Self {
        let key = bank.register(label);
        let timeouts = Timeouts::new();
        let bindings = Bindings::new(bank, key);

        let teardown = Handler::new({
            let (bank, timeouts, bindings) = (bank.downgrade(), timeouts.clone(), bindings.clone());
            move |destroyed: &Destroyed| {
                if let Some(bank) = bank.upgrade() {
                    let dropped = bank.drop_entity(destroyed.entity);
                    debug!(entity = ?destroyed.entity, listeners = dropped, "entity torn down");
                }
                bindings.detach_all();
                timeouts.clear_all();
            }
        });
        bank.store(Listener::new(key, None, DESTROY, &teardown, Budget::Unlimited));

        EventHandler {
            key,
            bank: bank.clone(),
            checkpoints: Checkpoints::new(),
            timeouts,
            bindings,
            logs: Cell::new(false),
            destroyed: Cell::new(false),
            _events: PhantomData,
        }
    }

    #[inline]
    pub fn key(&self) -> EntityKey {
        self.key
    }

    #[inline]
    pub fn bank(&self) -> &ListenerBank {
        &self.bank
    }

    /// Traces every dispatch of this entity, regardless of the bank configuration.
    pub fn enable_event_logs(&self) {
        self.logs.set(true);
    }

    fn check_vocabulary(&self, event: &str) {
        if !E::has_key(event) {
            warn!(
                entity = ?self.key,
                event,
                vocabulary = ?E::KEYS,
                "subscribing to an event this entity never emits"
            );
        }
    }

    /// Stores a listener on `emittor`, unless the budget permits no invocations.
    fn subscribe<P>(
        &self,
        emittor: EntityKey,
        subscriber: Option<EntityKey>,
        event: EventName,
        handler: &Handler<P>,
        budget: Budget,
    ) -> Subscription<P> {
        if budget == Budget::Remaining(0) {
            debug!(emittor = ?emittor, event = %event, "zero invocation budget, nothing subscribed");
        } else {
            self.bank.store(Listener::new(emittor, subscriber, event.clone(), handler, budget));
        }

        Subscription { bank: self.bank.downgrade(), emittor, event, handler: handler.clone() }
    }

    /// Runs `handler` every time this entity triggers `event`.
    pub fn on(&self, event: impl Into<EventName>, handler: &Handler<E>) -> Subscription<E> {
        let event = event.into();
        self.check_vocabulary(&event);
        self.subscribe(self.key, None, event, handler, Budget::Unlimited)
    }

    /// Runs `handler` for the next `times` triggers of `event`, then unsubscribes it.
    pub fn on_times(
        &self,
        event: impl Into<EventName>,
        handler: &Handler<E>,
        times: usize,
    ) -> Subscription<E> {
        let event = event.into();
        self.check_vocabulary(&event);
        self.subscribe(self.key, None, event, handler, Budget::Remaining(times))
    }

    pub fn once(&self, event: impl Into<EventName>, handler: &Handler<E>) -> Subscription<E> {
        self.on_times(event, handler, 1)
    }

    /// Unsubscribes the first listener of `event` registered with `handler`.
    ///
    /// Returns false if there was none.
    pub fn off<P>(&self, event: &str, handler: &Handler<P>) -> bool {
        self.bank.off(self.key, event, handler.id())
    }

    /// Subscribes to `event` of `emittor` on behalf of this entity.
    ///
    /// Unlike [`on`](EventHandler::on), the subscription is also dropped when
    /// this entity is destroyed.
    pub fn listen<T: Event>(
        &self,
        emittor: &EventHandler<T>,
        event: impl Into<EventName>,
        handler: &Handler<T>,
    ) -> Subscription<T> {
        self.listen_times_budget(emittor, event.into(), handler, Budget::Unlimited)
    }

    pub fn listen_times<T: Event>(
        &self,
        emittor: &EventHandler<T>,
        event: impl Into<EventName>,
        handler: &Handler<T>,
        times: usize,
    ) -> Subscription<T> {
        self.listen_times_budget(emittor, event.into(), handler, Budget::Remaining(times))
    }

    pub fn listen_once<T: Event>(
        &self,
        emittor: &EventHandler<T>,
        event: impl Into<EventName>,
        handler: &Handler<T>,
    ) -> Subscription<T> {
        self.listen_times(emittor, event, handler, 1)
    }

    fn listen_times_budget<T: Event>(
        &self,
        emittor: &EventHandler<T>,
        event: EventName,
        handler: &Handler<T>,
        budget: Budget,
    ) -> Subscription<T> {
        if !self.bank.ptr_eq(&emittor.bank) {
            warn!(
                subscriber = ?self.key,
                emittor = ?emittor.key,
                "listening across listener banks, the subscription won't see the emittor"
            );
        }
        emittor.check_vocabulary(&event);
        self.subscribe(emittor.key, Some(self.key), event, handler, budget)
    }

    /// Runs `handler` when this entity is destroyed.
    pub fn on_destroy(&self, handler: &Handler<Destroyed>) -> Subscription<Destroyed> {
        self.subscribe(self.key, None, DESTROY.into(), handler, Budget::Unlimited)
    }

    /// Runs `handler` when `emittor` is destroyed, unless this entity goes first.
    pub fn listen_destroy<T: Event>(
        &self,
        emittor: &EventHandler<T>,
        handler: &Handler<Destroyed>,
    ) -> Subscription<Destroyed> {
        self.subscribe(emittor.key, Some(self.key), DESTROY.into(), handler, Budget::Unlimited)
    }

    /// Dispatches `event` to every listener of its key.
    ///
    /// An event keyed [`DESTROY`] destroys the entity instead; its listeners
    /// receive [`Destroyed`] rather than `event`.
    ///
    /// Returns the number of handlers invoked.
    pub fn trigger(&self, event: E) -> usize {
        let key = event.get_key();
        if key == DESTROY {
            warn!(entity = ?self.key, "`{}` is reserved, destroying the entity instead", DESTROY);
            return self.dispatch_destroy();
        }
        self.bank.dispatch(self.key, key, &event, self.logs.get())
    }

    /// Emits [`DESTROY`], tearing down everything this entity is part of.
    ///
    /// Destroying twice is harmless; the second time there's nothing left to drop.
    pub fn destroy(&self) {
        self.dispatch_destroy();
    }

    fn dispatch_destroy(&self) -> usize {
        self.destroyed.set(true);
        self.bank.dispatch(self.key, DESTROY, &Destroyed { entity: self.key }, self.logs.get())
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Completes once `checkpoint` happened; immediately if it already did.
    pub fn when(&self, checkpoint: &str) -> When {
        self.checkpoints.when(checkpoint, None)
    }

    /// Like [`when`](EventHandler::when), also running `callback` at that point.
    pub fn when_then<F>(&self, checkpoint: &str, callback: F) -> When
    where
        F: FnOnce() + 'static,
    {
        self.checkpoints.when(checkpoint, Some(Box::new(callback)))
    }

    /// Marks `checkpoint` as happened, releasing everything waiting on it.
    pub fn event_happened(&self, checkpoint: &str) {
        if self.logs.get() {
            debug!(entity = ?self.key, checkpoint, "checkpoint happened");
        }
        self.checkpoints.happened(checkpoint);
    }

    #[inline]
    pub fn did_event_happen(&self, checkpoint: &str) -> bool {
        self.checkpoints.did_happen(checkpoint)
    }

    /// Runs `handler` after `delay`, unless cleared or destroyed first.
    ///
    /// Returns `None` and schedules nothing if called outside of a
    /// [`tokio::task::LocalSet`].
    pub fn set_timeout<F>(&self, handler: F, delay: Duration) -> Option<TimeoutKey>
    where
        F: FnOnce() + 'static,
    {
        self.timeouts.set(handler, delay)
    }

    pub fn clear_timeout(&self, key: TimeoutKey) {
        self.timeouts.clear(key);
    }

    pub fn clear_timeouts(&self) {
        self.timeouts.clear_all();
    }

    #[inline]
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    #[inline]
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// See [`Bindings::bind_external`].
    pub fn bind_external<S: EventSource>(
        &self,
        targets: &[Rc<S>],
        event: impl Into<EventName>,
        handler: &Handler<S::Event>,
        filter: Option<Rc<dyn Fn(&S::Event) -> bool>>,
        options: &S::Options,
    ) -> Vec<BindingKey> {
        self.bindings.bind_external(targets, event, handler, filter, options)
    }

    /// See [`Bindings::unbind_external`].
    pub fn unbind_external<S: EventSource>(
        &self,
        targets: &[Rc<S>],
        event: &str,
        handler: Option<&Handler<S::Event>>,
    ) -> usize {
        self.bindings.unbind_external(targets, event, handler)
    }

    pub fn observe_removal<N: ObservedNode>(
        &self,
        node: &Rc<N>,
        handler: &Handler<N>,
    ) -> Result<BindingKey, BindingError> {
        self.bindings.observe_removal(node, handler)
    }

    pub fn observe_new_children<N: ObservedNode>(
        &self,
        parent: &Rc<N>,
        handler: &Handler<N>,
    ) -> Result<BindingKey, BindingError> {
        self.bindings.observe_new_children(parent, handler)
    }
}

impl<E: Event> Drop for EventHandler<E> {
    fn drop(&mut self) {
        if !self.destroyed.get() {
            self.destroy();
        }
        self.bank.release(self.key);
    }
}

impl<E: Event> fmt::Debug for EventHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("key", &self.key)
            .field("checkpoints", &self.checkpoints)
            .field("timeouts", &self.timeouts)
            .field("bindings", &self.bindings)
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

/// Token returned by every subscription, identifying it for later removal.
pub struct Subscription<P> {
    bank: WeakBank,
    emittor: EntityKey,
    event: EventName,
    handler: Handler<P>,
}

impl<P> Subscription<P> {
    #[inline]
    pub fn emittor(&self) -> EntityKey {
        self.emittor
    }

    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[inline]
    pub fn handler(&self) -> &Handler<P> {
        &self.handler
    }

    /// Unsubscribes; same as calling `off` on the emittor.
    pub fn off(&self) -> bool {
        match self.bank.upgrade() {
            Some(bank) => bank.off(self.emittor, &self.event, self.handler.id()),
            None => false,
        }
    }

    /// Installs a one-shot listener on `target` which unsubscribes this.
    fn off_on(self, target: EntityKey, event: EventName) -> Self {
        let bank = match self.bank.upgrade() {
            Some(bank) => bank,
            None => return self,
        };

        let off = Handler::<()>::notify({
            let (bank, emittor, event, handler) =
                (self.bank.clone(), self.emittor, self.event.clone(), self.handler.id());
            move || {
                if let Some(bank) = bank.upgrade() {
                    bank.off(emittor, &event, handler);
                }
            }
        });
        bank.store(Listener::new(target, Some(self.emittor), event, &off, Budget::Remaining(1)));

        self
    }

    /// Unsubscribes once the emittor triggers `event`.
    pub fn until(self, event: impl Into<EventName>) -> Self {
        let emittor = self.emittor;
        self.off_on(emittor, event.into())
    }

    /// Unsubscribes once `other` triggers `event`.
    pub fn until_event_of<T: Event>(
        self,
        other: &EventHandler<T>,
        event: impl Into<EventName>,
    ) -> Self {
        self.off_on(other.key, event.into())
    }

    /// Unsubscribes once `other` is destroyed.
    pub fn until_destroyed<T: Event>(self, other: &EventHandler<T>) -> Self {
        self.off_on(other.key, DESTROY.into())
    }
}

impl<P> fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("emittor", &self.emittor)
            .field("event", &self.event)
            .field("handler", &self.handler)
            .finish()
    }
}
