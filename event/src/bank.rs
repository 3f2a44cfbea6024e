use {
    crate::{
        config::BankConfig,
        error::{HandlerError, HandlerFault},
        intern::{Listener, ListenerBank as RawListenerBank},
        listener::{Dispatch, HandlerId},
        report::{FaultReporter, TracingReporter},
        EntityKey, ListenerKey,
    },
    std::{
        any::Any,
        cell::{Ref, RefCell},
        fmt,
        panic::{self, AssertUnwindSafe},
        rc::{Rc, Weak},
    },
    tracing::trace,
};

pub(crate) struct Shared {
    raw: RefCell<RawListenerBank>,
    config: BankConfig,
    reporter: Box<dyn FaultReporter>,
}

/// Shared handle to a listener registry.
///
/// Create one per process (or per test) and hand it to every
/// [`EventHandler`](crate::EventHandler) that should see the others.
/// Clones refer to the same registry.
///
/// Records are dropped only after the registry has been released, so a
/// handler owning an entity may safely be torn down by any operation here.
#[derive(Clone)]
pub struct ListenerBank(Rc<Shared>);

/// Non-owning [`ListenerBank`] handle, captured by the closures the registry stores.
#[derive(Clone)]
pub(crate) struct WeakBank(Weak<Shared>);

impl WeakBank {
    #[inline]
    pub(crate) fn upgrade(&self) -> Option<ListenerBank> {
        self.0.upgrade().map(ListenerBank)
    }
}

impl Default for ListenerBank {
    fn default() -> Self {
        ListenerBank::builder().build()
    }
}

impl ListenerBank {
    /// Creates a registry with the default configuration, reporting faults through `tracing`.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn builder() -> ListenerBankBuilder {
        ListenerBankBuilder { config: BankConfig::default(), reporter: None }
    }

    /// Returns true if both handles refer to the same registry.
    #[inline]
    pub fn ptr_eq(&self, other: &ListenerBank) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn config(&self) -> &BankConfig {
        &self.0.config
    }

    /// Read access to the underlying registry.
    ///
    /// Don't hold on to this across a dispatch; handlers may need to mutate it.
    #[inline]
    pub fn borrow(&self) -> Ref<'_, RawListenerBank> {
        self.0.raw.borrow()
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> WeakBank {
        WeakBank(Rc::downgrade(&self.0))
    }

    pub(crate) fn register(&self, label: Option<String>) -> EntityKey {
        self.0.raw.borrow_mut().register(label)
    }

    pub(crate) fn release(&self, entity: EntityKey) {
        let released = self.0.raw.borrow_mut().release(entity);
        drop(released);
    }

    pub fn store(&self, listener: Listener) -> ListenerKey {
        self.0.raw.borrow_mut().store(listener)
    }

    pub fn get(&self, emittor: EntityKey, event: &str, handler: HandlerId) -> Option<ListenerKey> {
        self.0.raw.borrow().get(emittor, event, handler)
    }

    /// Copies the current listener list of `emittor` for `event`.
    pub fn emittor_event_listeners(&self, emittor: EntityKey, event: &str) -> Vec<ListenerKey> {
        self.0.raw.borrow().emittor_event_listeners(emittor, event).to_vec()
    }

    /// Removes a listener from both indices; returns false if it was already gone.
    pub fn drop_listener(&self, key: ListenerKey) -> bool {
        let dropped = self.0.raw.borrow_mut().drop_listener(key);
        dropped.is_some()
    }

    /// Drops every listener `entity` emits to or subscribed with; returns how many.
    pub fn drop_entity(&self, entity: EntityKey) -> usize {
        let dropped = self.0.raw.borrow_mut().drop_entity(entity);
        dropped.len()
    }

    /// Resolves `handler` among the listeners of `emittor` for `event` and drops it.
    ///
    /// Unknown handlers are ignored.
    pub fn off(&self, emittor: EntityKey, event: &str, handler: HandlerId) -> bool {
        let key = self.get(emittor, event, handler);
        key.map_or(false, |key| self.drop_listener(key))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.raw.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.raw.borrow().is_empty()
    }

    #[inline]
    pub fn emission_count(&self, entity: EntityKey) -> usize {
        self.0.raw.borrow().emission_count(entity)
    }

    #[inline]
    pub fn subscription_count(&self, entity: EntityKey) -> usize {
        self.0.raw.borrow().subscription_count(entity)
    }

    pub(crate) fn report(&self, fault: HandlerFault) {
        self.0.reporter.report(&fault);
    }

    /// Invokes every listener of `emittor` for `event`, in registration order.
    ///
    /// Iterates over a snapshot taken up front: listeners stored during the
    /// pass don't run until the next dispatch, listeners dropped during the
    /// pass still run in this one. Budgets are charged on the live records and
    /// exhausted listeners are dropped once the pass completes.
    ///
    /// Returns the number of handlers invoked.
    pub(crate) fn dispatch(
        &self,
        emittor: EntityKey,
        event: &str,
        payload: &dyn Any,
        trace: bool,
    ) -> usize {
        let snapshot: Vec<(ListenerKey, Rc<dyn Dispatch>)> = {
            let raw = self.0.raw.borrow();
            raw.emittor_event_listeners(emittor, event)
                .iter()
                .filter_map(|key| raw.handler(*key).map(|handler| (*key, handler)))
                .collect()
        };

        if trace || self.0.config.trace_dispatch {
            trace!(
                emittor = ?emittor,
                label = self.borrow().label(emittor).unwrap_or_default(),
                event,
                listeners = snapshot.len(),
                "dispatch"
            );
        }

        let invoked = snapshot.len();
        let mut exhausted = Vec::new();
        for (key, handler) in snapshot {
            self.invoke_reporting(emittor, event, &*handler, payload);
            drop(handler);

            if self.0.raw.borrow_mut().consume(key) == Some(true) {
                exhausted.push(key);
            }
        }

        for key in exhausted {
            self.drop_listener(key);
        }

        invoked
    }

    /// Invokes a single handler on behalf of `emittor`, reporting its failure.
    pub(crate) fn invoke_reporting(
        &self,
        emittor: EntityKey,
        event: &str,
        handler: &dyn Dispatch,
        payload: &dyn Any,
    ) {
        if let Err(source) = self.invoke(handler, payload) {
            self.report(HandlerFault { emittor, event: event.to_owned().into(), source });
        }
    }

    fn invoke(&self, handler: &dyn Dispatch, payload: &dyn Any) -> Result<(), HandlerError> {
        if !self.0.config.catch_panics {
            return handler.call(payload);
        }

        panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload)))
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))))
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_owned())
}

impl fmt::Debug for ListenerBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBank")
            .field("registry", &*self.0.raw.borrow())
            .field("config", &self.0.config)
            .finish()
    }
}

/// Configures a [`ListenerBank`].
pub struct ListenerBankBuilder {
    config: BankConfig,
    reporter: Option<Box<dyn FaultReporter>>,
}

impl ListenerBankBuilder {
    pub fn config(mut self, config: BankConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trace_dispatch(mut self, enabled: bool) -> Self {
        self.config.trace_dispatch = enabled;
        self
    }

    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.config.catch_panics = enabled;
        self
    }

    /// Where handler faults go; [`TracingReporter`] if never set.
    pub fn reporter(mut self, reporter: impl FaultReporter + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    pub fn build(self) -> ListenerBank {
        ListenerBank(Rc::new(Shared {
            raw: RefCell::new(RawListenerBank::new()),
            config: self.config,
            reporter: self.reporter.unwrap_or_else(|| Box::new(TracingReporter)),
        }))
    }
}

impl fmt::Debug for ListenerBankBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBankBuilder").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{intern::Budget, listener::Handler},
        std::cell::{Cell, RefCell},
    };

    fn recording_bank() -> (ListenerBank, Rc<RefCell<Vec<String>>>) {
        let faults = Rc::new(RefCell::new(Vec::new()));
        let bank = ListenerBank::builder()
            .reporter({
                let faults = faults.clone();
                move |fault: &HandlerFault| faults.borrow_mut().push(fault.to_string())
            })
            .build();
        (bank, faults)
    }

    fn counter(count: &Rc<Cell<u32>>) -> Handler<u32> {
        let count = count.clone();
        Handler::new(move |_: &u32| count.set(count.get() + 1))
    }

    #[test]
    fn test_dispatch_order() {
        let bank = ListenerBank::new();
        let a = bank.register(None);
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            let handler = Handler::new(move |x: &u32| order.borrow_mut().push(i * 10 + x));
            bank.store(Listener::new(a, None, "tick", &handler, Budget::Unlimited));
        }

        assert_eq!(bank.dispatch(a, "tick", &1u32, false), 3);
        assert_eq!(*order.borrow(), &[1, 11, 21]);
        assert_eq!(bank.dispatch(a, "tock", &1u32, false), 0);
    }

    #[test]
    fn test_budget_exhaustion() {
        let bank = ListenerBank::new();
        let a = bank.register(None);
        let count = Rc::new(Cell::new(0));

        bank.store(Listener::new(a, None, "tick", &counter(&count), Budget::Remaining(2)));

        for _ in 0..4 {
            bank.dispatch(a, "tick", &0u32, false);
        }

        assert_eq!(count.get(), 2);
        assert!(bank.is_empty());
    }

    #[test]
    fn test_faults_are_isolated() {
        let (bank, faults) = recording_bank();
        let a = bank.register(None);
        let count = Rc::new(Cell::new(0));

        let failing = Handler::new(|_: &u32| Err::<(), _>("broken"));
        let panicking = Handler::new(|_: &u32| -> () { panic!("exploded") });
        bank.store(Listener::new(a, None, "tick", &failing, Budget::Unlimited));
        bank.store(Listener::new(a, None, "tick", &panicking, Budget::Unlimited));
        bank.store(Listener::new(a, None, "tick", &counter(&count), Budget::Unlimited));

        bank.dispatch(a, "tick", &0u32, false);

        assert_eq!(count.get(), 1);
        assert_eq!(
            *faults.borrow(),
            &[
                "handler for `tick` failed: broken".to_owned(),
                "handler for `tick` failed: handler panicked: exploded".to_owned(),
            ]
        );
    }

    #[test]
    fn test_payload_mismatch_is_reported() {
        let (bank, faults) = recording_bank();
        let a = bank.register(None);
        let count = Rc::new(Cell::new(0));

        bank.store(Listener::new(a, None, "tick", &counter(&count), Budget::Unlimited));
        bank.dispatch(a, "tick", &"not a number", false);

        assert_eq!(count.get(), 0);
        assert_eq!(faults.borrow().len(), 1);
    }

    #[test]
    fn test_listeners_added_during_dispatch_wait() {
        let bank = ListenerBank::new();
        let a = bank.register(None);
        let count = Rc::new(Cell::new(0));

        let adder = Handler::new({
            let (bank, count) = (bank.clone(), count.clone());
            move |_: &u32| {
                bank.store(Listener::new(a, None, "tick", &counter(&count), Budget::Unlimited));
            }
        });
        bank.store(Listener::new(a, None, "tick", &adder, Budget::Remaining(1)));

        bank.dispatch(a, "tick", &0u32, false);
        assert_eq!(count.get(), 0);

        bank.dispatch(a, "tick", &0u32, false);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_off_unknown_is_noop() {
        let bank = ListenerBank::new();
        let a = bank.register(None);
        let count = Rc::new(Cell::new(0));
        let handler = counter(&count);

        assert!(!bank.off(a, "tick", handler.id()));

        bank.store(Listener::new(a, None, "tick", &handler, Budget::Unlimited));
        assert!(bank.off(a, "tick", handler.id()));
        assert!(!bank.off(a, "tick", handler.id()));
        assert!(bank.is_empty());
    }
}
