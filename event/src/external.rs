//! Bindings to event sources living outside the registry.
//!
//! The registry doesn't know any platform; it talks to native event streams
//! through [`EventSource`] and to node trees through [`ObservedNode`]. Every
//! binding is tracked so its owner can detach all of them on destruction.

use {
    crate::{
        bank::{ListenerBank, WeakBank},
        error::BindingError,
        listener::{Handler, HandlerId},
        BindingKey, EntityKey, EventName,
    },
    slotmap::SlotMap,
    std::{cell::RefCell, fmt, rc::Rc},
    tracing::{debug, error, warn},
};

/// A callback as registered with a native event source.
pub type NativeListener<V> = Rc<dyn Fn(&V)>;

/// A native stream of named events, e.g. a UI element or a socket.
pub trait EventSource: 'static {
    type Event: 'static;
    /// Source-specific registration flags.
    type Options: Default;

    fn add_listener(
        &self,
        event: &str,
        listener: NativeListener<Self::Event>,
        options: &Self::Options,
    );

    /// Removes the listener previously added under `event`, compared by pointer.
    fn remove_listener(&self, event: &str, listener: &NativeListener<Self::Event>);
}

/// Handle to an active structural change observation.
pub trait Observer {
    fn disconnect(&self);
}

/// One batch of structural changes to a node's children.
pub struct ChildList<N> {
    pub added: Vec<Rc<N>>,
    pub removed: Vec<Rc<N>>,
}

/// A node in a tree whose child list can be observed.
pub trait ObservedNode: Sized + 'static {
    fn parent(&self) -> Option<Rc<Self>>;

    /// Starts reporting changes to the children of this node.
    ///
    /// Returns `None` if the platform cannot observe structural change.
    fn observe_children(
        &self,
        callback: Rc<dyn Fn(&ChildList<Self>)>,
    ) -> Option<Box<dyn Observer>>;
}

struct Binding {
    target: usize,
    // `None` for structural observers, which `unbind_external` never matches
    event: Option<EventName>,
    handler: HandlerId,
    detach: Box<dyn FnOnce()>,
}

struct Shared {
    bank: WeakBank,
    owner: EntityKey,
    slots: RefCell<SlotMap<BindingKey, Binding>>,
}

#[inline]
fn address<T>(target: &Rc<T>) -> usize {
    Rc::as_ptr(target) as *const () as usize
}

/// External bindings owned by one entity.
///
/// Failures of bound handlers are reported through the bank's fault reporter,
/// attributed to the owning entity.
#[derive(Clone)]
pub struct Bindings(Rc<Shared>);

impl Bindings {
    pub(crate) fn new(bank: &ListenerBank, owner: EntityKey) -> Self {
        Bindings(Rc::new(Shared {
            bank: bank.downgrade(),
            owner,
            slots: RefCell::new(SlotMap::with_key()),
        }))
    }

    /// Wraps `handler` into a native listener which checks `filter` and
    /// reports failures.
    fn native<V: 'static>(
        &self,
        event: &EventName,
        handler: &Handler<V>,
        filter: Option<Rc<dyn Fn(&V) -> bool>>,
    ) -> NativeListener<V> {
        let (bank, owner, event, handler) =
            (self.0.bank.clone(), self.0.owner, event.clone(), handler.erased());
        Rc::new(move |payload: &V| {
            if !filter.as_ref().map_or(true, |filter| filter(payload)) {
                return;
            }
            if let Some(bank) = bank.upgrade() {
                bank.invoke_reporting(owner, &event, &*handler, payload);
            }
        })
    }

    fn track(&self, binding: Binding) -> BindingKey {
        self.0.slots.borrow_mut().insert(binding)
    }

    /// Attaches `handler` to `event` of every target.
    ///
    /// With a `filter`, the handler only runs for native events it accepts.
    /// Returns one key per target, in order.
    pub fn bind_external<S: EventSource>(
        &self,
        targets: &[Rc<S>],
        event: impl Into<EventName>,
        handler: &Handler<S::Event>,
        filter: Option<Rc<dyn Fn(&S::Event) -> bool>>,
        options: &S::Options,
    ) -> Vec<BindingKey> {
        let event = event.into();
        targets
            .iter()
            .map(|target| {
                let native = self.native(&event, handler, filter.clone());
                target.add_listener(&event, native.clone(), options);

                let detach = {
                    let (target, event) = (target.clone(), event.clone());
                    Box::new(move || target.remove_listener(&event, &native))
                };
                self.track(Binding {
                    target: address(target),
                    event: Some(event.clone()),
                    handler: handler.id(),
                    detach,
                })
            })
            .collect()
    }

    /// Detaches a single binding. Unknown keys are ignored.
    pub fn unbind(&self, key: BindingKey) {
        let binding = self.0.slots.borrow_mut().remove(key);
        if let Some(binding) = binding {
            (binding.detach)();
        }
    }

    /// Detaches the bindings of `event` on the given targets; only those of
    /// `handler` if one is given.
    ///
    /// Returns how many were detached; zero is not an error.
    pub fn unbind_external<S: EventSource>(
        &self,
        targets: &[Rc<S>],
        event: &str,
        handler: Option<&Handler<S::Event>>,
    ) -> usize {
        let addresses: Vec<usize> = targets.iter().map(address).collect();
        let handler = handler.map(Handler::id);

        let detached: Vec<Binding> = {
            let mut slots = self.0.slots.borrow_mut();
            let keys: Vec<BindingKey> = slots
                .iter()
                .filter(|(_, binding)| {
                    addresses.contains(&binding.target)
                        && binding.event.as_deref() == Some(event)
                        && handler.map_or(true, |id| binding.handler == id)
                })
                .map(|(key, _)| key)
                .collect();
            keys.into_iter().filter_map(|key| slots.remove(key)).collect()
        };

        if detached.is_empty() {
            debug!(owner = ?self.0.owner, event, "no external bindings to detach");
        }

        let count = detached.len();
        for binding in detached {
            (binding.detach)();
        }
        count
    }

    fn observe<N: ObservedNode>(
        &self,
        observed: &N,
        target: usize,
        handler: &Handler<N>,
        callback: Rc<dyn Fn(&ChildList<N>)>,
    ) -> Result<BindingKey, BindingError> {
        let observer = match observed.observe_children(callback) {
            Some(observer) => observer,
            None => {
                error!(owner = ?self.0.owner, "structural change observation is unsupported");
                return Err(BindingError::UnsupportedPlatformFeature);
            }
        };

        Ok(self.track(Binding {
            target,
            event: None,
            handler: handler.id(),
            detach: Box::new(move || observer.disconnect()),
        }))
    }

    /// Runs `handler` with `node` once it's removed from its current parent.
    pub fn observe_removal<N: ObservedNode>(
        &self,
        node: &Rc<N>,
        handler: &Handler<N>,
    ) -> Result<BindingKey, BindingError> {
        let parent = match node.parent() {
            Some(parent) => parent,
            None => {
                warn!(owner = ?self.0.owner, "can't observe removal of a parentless node");
                return Err(BindingError::MissingParent);
            }
        };

        let target = address(node);
        let callback: Rc<dyn Fn(&ChildList<N>)> = {
            let (bank, owner, handler) = (self.0.bank.clone(), self.0.owner, handler.erased());
            Rc::new(move |changes: &ChildList<N>| {
                let removed = changes.removed.iter().find(|&removed| address(removed) == target);
                if let (Some(removed), Some(bank)) = (removed, bank.upgrade()) {
                    bank.invoke_reporting(owner, "removed", &*handler, &**removed);
                }
            })
        };

        self.observe(&*parent, target, handler, callback)
    }

    /// Runs `handler` with every node newly attached to `parent`.
    pub fn observe_new_children<N: ObservedNode>(
        &self,
        parent: &Rc<N>,
        handler: &Handler<N>,
    ) -> Result<BindingKey, BindingError> {
        let callback: Rc<dyn Fn(&ChildList<N>)> = {
            let (bank, owner, handler) = (self.0.bank.clone(), self.0.owner, handler.erased());
            Rc::new(move |changes: &ChildList<N>| {
                let bank = match bank.upgrade() {
                    Some(bank) => bank,
                    None => return,
                };
                for added in &changes.added {
                    bank.invoke_reporting(owner, "added", &*handler, &**added);
                }
            })
        };

        self.observe(&**parent, address(parent), handler, callback)
    }

    /// Detaches every binding.
    pub fn detach_all(&self) {
        let detached: Vec<Binding> =
            self.0.slots.borrow_mut().drain().map(|(_, binding)| binding).collect();
        for binding in detached {
            (binding.detach)();
        }
    }

    #[inline]
    pub fn contains(&self, key: BindingKey) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.slots.borrow().is_empty()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("owner", &self.0.owner)
            .field("bindings", &self.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use {
        super::{mock::*, *},
        crate::error::HandlerFault,
        std::cell::Cell,
    };

    fn bindings() -> (ListenerBank, Bindings) {
        let bank = ListenerBank::new();
        let owner = bank.register(None);
        let bindings = Bindings::new(&bank, owner);
        (bank, bindings)
    }

    fn click_counter(count: &Rc<Cell<i32>>) -> Handler<Click> {
        let count = count.clone();
        Handler::new(move |click: &Click| count.set(count.get() + click.x))
    }

    #[test]
    fn test_bind_and_unbind() {
        let (_bank, bindings) = bindings();
        let (a, b) = (Rc::new(Button::default()), Rc::new(Button::default()));
        let count = Rc::new(Cell::new(0));
        let handler = click_counter(&count);

        let keys = bindings.bind_external(&[a.clone(), b.clone()], "click", &handler, None, &());
        assert_eq!(keys.len(), 2);

        emit(&a, "click", Click { x: 1 });
        emit(&b, "click", Click { x: 10 });
        emit(&b, "hover", Click { x: 100 });
        assert_eq!(count.get(), 11);

        bindings.unbind(keys[0]);
        bindings.unbind(keys[0]);
        emit(&a, "click", Click { x: 1 });
        emit(&b, "click", Click { x: 10 });
        assert_eq!(count.get(), 21);
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn test_filter() {
        let (_bank, bindings) = bindings();
        let button = Rc::new(Button::default());
        let count = Rc::new(Cell::new(0));

        bindings.bind_external(
            &[button.clone()],
            "click",
            &click_counter(&count),
            Some(Rc::new(|click: &Click| click.x > 0)),
            &(),
        );

        emit(&button, "click", Click { x: -5 });
        emit(&button, "click", Click { x: 5 });
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn test_unbind_external_by_handler() {
        let (_bank, bindings) = bindings();
        let button = Rc::new(Button::default());
        let count = Rc::new(Cell::new(0));
        let (first, second) = (click_counter(&count), click_counter(&count));

        bindings.bind_external(&[button.clone()], "click", &first, None, &());
        bindings.bind_external(&[button.clone()], "click", &second, None, &());

        assert_eq!(bindings.unbind_external(&[button.clone()], "click", Some(&first)), 1);
        emit(&button, "click", Click { x: 1 });
        assert_eq!(count.get(), 1);

        assert_eq!(bindings.unbind_external(&[button.clone()], "hover", None), 0);
        assert_eq!(bindings.unbind_external(&[button.clone()], "click", None), 1);
        emit(&button, "click", Click { x: 1 });
        assert_eq!(count.get(), 1);
        assert!(button.listeners.borrow().is_empty());
    }

    #[test]
    fn test_native_faults_are_reported() {
        let faults = Rc::new(Cell::new(0));
        let bank = ListenerBank::builder()
            .reporter({
                let faults = faults.clone();
                move |fault: &HandlerFault| {
                    assert_eq!(fault.event, "click");
                    faults.set(faults.get() + 1);
                }
            })
            .build();
        let bindings = Bindings::new(&bank, bank.register(None));
        let button = Rc::new(Button::default());

        let failing = Handler::new(|_: &Click| Err::<(), _>("unclickable"));
        bindings.bind_external(&[button.clone()], "click", &failing, None, &());

        emit(&button, "click", Click { x: 0 });
        assert_eq!(faults.get(), 1);
    }

    #[test]
    fn test_observe_removal() {
        let (_bank, bindings) = bindings();
        let (parent, child, sibling) = (node(true), node(true), node(true));
        append(&parent, &child);
        append(&parent, &sibling);

        let removed = Rc::new(Cell::new(0));
        let handler = Handler::notify({
            let removed = removed.clone();
            move || removed.set(removed.get() + 1)
        });

        assert_eq!(bindings.observe_removal(&parent, &handler), Err(BindingError::MissingParent));
        assert!(bindings.is_empty());

        bindings.observe_removal(&child, &handler).unwrap();
        remove(&parent, &sibling);
        assert_eq!(removed.get(), 0);
        remove(&parent, &child);
        assert_eq!(removed.get(), 1);
    }

    #[test]
    fn test_observe_new_children() {
        let (_bank, bindings) = bindings();
        let parent = node(true);
        let added = Rc::new(Cell::new(0));
        let handler = Handler::notify({
            let added = added.clone();
            move || added.set(added.get() + 1)
        });

        let key = bindings.observe_new_children(&parent, &handler).unwrap();
        append(&parent, &node(true));
        append(&parent, &node(true));
        assert_eq!(added.get(), 2);

        bindings.unbind(key);
        append(&parent, &node(true));
        assert_eq!(added.get(), 2);
        assert!(parent.observers.borrow().is_empty());
    }

    #[test]
    fn test_unsupported_observation() {
        let (_bank, bindings) = bindings();
        let parent = node(false);

        assert_eq!(
            bindings.observe_new_children(&parent, &Handler::notify(|| {})),
            Err(BindingError::UnsupportedPlatformFeature)
        );
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_detach_all() {
        let (_bank, bindings) = bindings();
        let (button, parent) = (Rc::new(Button::default()), node(true));
        let count = Rc::new(Cell::new(0));

        bindings.bind_external(&[button.clone()], "click", &click_counter(&count), None, &());
        bindings.observe_new_children(&parent, &Handler::notify(|| {})).unwrap();
        assert_eq!(bindings.len(), 2);

        bindings.detach_all();
        assert!(bindings.is_empty());
        assert!(button.listeners.borrow().is_empty());
        assert!(parent.observers.borrow().is_empty());
    }
}
