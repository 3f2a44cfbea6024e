use {
    crate::{error::HandlerError, traits::HandlerOutput},
    std::{any::Any, fmt, marker::PhantomData, rc::Rc},
};

/// Type-erased handler as stored in the registry.
pub(crate) trait Dispatch {
    fn call(&self, payload: &dyn Any) -> Result<(), HandlerError>;
}

struct Typed<P, F> {
    f: F,
    _payload: PhantomData<fn(&P)>,
}

impl<P, F, R> Dispatch for Typed<P, F>
where
    P: 'static,
    F: Fn(&P) -> R,
    R: HandlerOutput,
{
    fn call(&self, payload: &dyn Any) -> Result<(), HandlerError> {
        match payload.downcast_ref::<P>() {
            Some(payload) => (self.f)(payload).into_result().map_err(HandlerError::Failed),
            None => Err(HandlerError::PayloadMismatch { expected: std::any::type_name::<P>() }),
        }
    }
}

struct Notify<F>(F);

impl<F: Fn()> Dispatch for Notify<F> {
    #[inline]
    fn call(&self, _payload: &dyn Any) -> Result<(), HandlerError> {
        (self.0)();
        Ok(())
    }
}

/// Identity of a handler allocation.
///
/// Clones of a [`Handler`] share an id; two handlers built from identical
/// closures don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

/// A callback with identity, receiving payloads of type `P`.
///
/// Keep a clone around to [`off`](crate::EventHandler::off) it later.
pub struct Handler<P> {
    inner: Rc<dyn Dispatch>,
    _payload: PhantomData<fn(&P)>,
}

impl<P: 'static> Handler<P> {
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&P) -> R + 'static,
        R: HandlerOutput + 'static,
    {
        Handler { inner: Rc::new(Typed { f, _payload: PhantomData }), _payload: PhantomData }
    }

    /// A handler which ignores the payload, and so accepts any.
    pub fn notify<F: Fn() + 'static>(f: F) -> Self {
        Handler { inner: Rc::new(Notify(f)), _payload: PhantomData }
    }

    /// Invokes the handler directly, outside of any dispatch.
    pub fn call(&self, payload: &P) -> Result<(), HandlerError> {
        self.inner.call(payload)
    }
}

impl<P> Handler<P> {
    #[inline]
    pub fn id(&self) -> HandlerId {
        HandlerId(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    #[inline]
    pub(crate) fn erased(&self) -> Rc<dyn Dispatch> {
        self.inner.clone()
    }
}

impl<P> Clone for Handler<P> {
    fn clone(&self) -> Self {
        Handler { inner: self.inner.clone(), _payload: PhantomData }
    }
}

impl<P> PartialEq for Handler<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<P> Eq for Handler<P> {}

impl<P> fmt::Debug for Handler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id()).finish()
    }
}
