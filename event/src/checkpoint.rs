use {
    crate::{bank::panic_message, error::CheckpointError},
    std::{
        cell::RefCell,
        collections::HashMap,
        fmt,
        future::Future,
        mem,
        panic::{self, AssertUnwindSafe},
        pin::Pin,
        task::{Context, Poll},
    },
    tokio::sync::oneshot,
    tracing::error,
};

enum Resolver {
    Future(oneshot::Sender<()>),
    Callback(Box<dyn FnOnce()>),
}

impl Resolver {
    fn resolve(self, checkpoint: &str) {
        match self {
            // the `When` may have been dropped, nobody to tell then
            Resolver::Future(tx) => {
                let _ = tx.send(());
            }
            Resolver::Callback(callback) => {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    let panic = panic_message(&*panic);
                    error!(checkpoint, %panic, "checkpoint callback panicked");
                }
            }
        }
    }
}

enum Checkpoint {
    Pending(Vec<Resolver>),
    Happened,
}

/// Named one-time gates.
///
/// A checkpoint starts out unset, collects waiters while pending and, once
/// signalled, stays happened forever. Waiters arriving afterwards complete
/// immediately.
#[derive(Default)]
pub struct Checkpoints {
    entries: RefCell<HashMap<String, Checkpoint>>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns a future completing once `name` has happened.
    ///
    /// `callback` runs right before (or, if already happened, right now,
    /// synchronously).
    pub fn when(&self, name: &str, callback: Option<Box<dyn FnOnce()>>) -> When {
        if self.did_happen(name) {
            if let Some(callback) = callback {
                callback();
            }
            return When { checkpoint: name.to_owned(), state: WhenState::Ready };
        }

        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.borrow_mut();
        let entry =
            entries.entry(name.to_owned()).or_insert_with(|| Checkpoint::Pending(Vec::new()));
        if let Checkpoint::Pending(resolvers) = entry {
            resolvers.push(Resolver::Future(tx));
            resolvers.extend(callback.map(Resolver::Callback));
        }

        When { checkpoint: name.to_owned(), state: WhenState::Waiting(rx) }
    }

    /// Marks `name` as happened, first resolving everything waiting on it in
    /// the order it was queued.
    ///
    /// Waiters queued by the resolvers themselves are resolved in the same
    /// call. A panicking callback is logged and doesn't hold back the rest.
    /// Signalling a checkpoint which already happened does nothing.
    pub fn happened(&self, name: &str) {
        loop {
            let drained = match self.entries.borrow_mut().get_mut(name) {
                Some(Checkpoint::Happened) => return,
                Some(Checkpoint::Pending(resolvers)) => mem::take(resolvers),
                None => Vec::new(),
            };
            if drained.is_empty() {
                break;
            }
            for resolver in drained {
                resolver.resolve(name);
            }
        }
        self.entries.borrow_mut().insert(name.to_owned(), Checkpoint::Happened);
    }

    pub fn did_happen(&self, name: &str) -> bool {
        matches!(self.entries.borrow().get(name), Some(Checkpoint::Happened))
    }

    /// Number of resolvers waiting on `name`.
    pub fn waiting(&self, name: &str) -> usize {
        match self.entries.borrow().get(name) {
            Some(Checkpoint::Pending(resolvers)) => resolvers.len(),
            _ => 0,
        }
    }
}

impl fmt::Debug for Checkpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        f.debug_map()
            .entries(entries.iter().map(|(name, checkpoint)| {
                let state = match checkpoint {
                    Checkpoint::Pending(resolvers) => resolvers.len().to_string(),
                    Checkpoint::Happened => "happened".to_owned(),
                };
                (name, state)
            }))
            .finish()
    }
}

#[derive(Debug)]
enum WhenState {
    Ready,
    Waiting(oneshot::Receiver<()>),
}

/// Completes once a checkpoint happened.
///
/// Fails with [`CheckpointError::Abandoned`] if its owner went away first.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct When {
    checkpoint: String,
    state: WhenState,
}

impl When {
    #[inline]
    pub fn checkpoint(&self) -> &str {
        &self.checkpoint
    }
}

impl Future for When {
    type Output = Result<(), CheckpointError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let When { checkpoint, state } = &mut *self;
        match state {
            WhenState::Ready => Poll::Ready(Ok(())),
            WhenState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.map_err(|_| CheckpointError::Abandoned(checkpoint.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        futures_executor::block_on,
        futures_util::FutureExt,
        std::{cell::Cell, rc::Rc},
    };

    #[test]
    fn test_when_before_signal() {
        let checkpoints = Checkpoints::new();
        let mut ready = checkpoints.when("ready", None);

        assert!(!checkpoints.did_happen("ready"));
        assert!((&mut ready).now_or_never().is_none());

        checkpoints.happened("ready");

        assert!(checkpoints.did_happen("ready"));
        assert_eq!(block_on(ready), Ok(()));
    }

    #[test]
    fn test_when_after_signal_is_immediate() {
        let checkpoints = Checkpoints::new();
        checkpoints.happened("ready");

        let called = Rc::new(Cell::new(false));
        let ready = checkpoints.when("ready", {
            let called = called.clone();
            Some(Box::new(move || called.set(true)))
        });

        // synchronous, before the future is even polled
        assert!(called.get());
        assert_eq!(ready.now_or_never(), Some(Ok(())));
    }

    #[test]
    fn test_callbacks_drain_in_order() {
        let checkpoints = Rc::new(Checkpoints::new());
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            let _ = checkpoints.when("loaded", Some(Box::new(move || order.borrow_mut().push(i))));
        }
        assert_eq!(checkpoints.waiting("loaded"), 6);

        checkpoints.happened("loaded");
        assert_eq!(*order.borrow(), &[0, 1, 2]);

        checkpoints.happened("loaded");
        assert_eq!(*order.borrow(), &[0, 1, 2]);
        assert_eq!(checkpoints.waiting("loaded"), 0);
    }

    #[test]
    fn test_waiters_added_while_draining() {
        let checkpoints = Rc::new(Checkpoints::new());
        let late = Rc::new(Cell::new(false));

        let _ = checkpoints.when("loaded", {
            let (checkpoints, late) = (checkpoints.clone(), late.clone());
            Some(Box::new(move || {
                let _ = checkpoints.when("loaded", Some(Box::new(move || late.set(true))));
            }))
        });

        checkpoints.happened("loaded");
        assert!(late.get());
        assert!(checkpoints.did_happen("loaded"));
    }

    #[test]
    fn test_panicking_callback_does_not_stall_drain() {
        let checkpoints = Checkpoints::new();
        let after = Rc::new(Cell::new(false));

        let first = checkpoints.when("loaded", Some(Box::new(|| panic!("bad callback"))));
        let second = checkpoints.when("loaded", {
            let after = after.clone();
            Some(Box::new(move || after.set(true)))
        });

        checkpoints.happened("loaded");
        assert!(after.get());
        assert!(checkpoints.did_happen("loaded"));
        assert_eq!(checkpoints.waiting("loaded"), 0);
        assert_eq!(block_on(first), Ok(()));
        assert_eq!(block_on(second), Ok(()));
    }

    #[test]
    fn test_abandoned() {
        let checkpoints = Checkpoints::new();
        let ready = checkpoints.when("ready", None);
        drop(checkpoints);

        assert_eq!(block_on(ready), Err(CheckpointError::Abandoned("ready".to_owned())));
    }
}
