use {
    crate::TimeoutKey,
    slotmap::SlotMap,
    std::{
        cell::RefCell,
        fmt,
        panic::{self, AssertUnwindSafe},
        rc::Rc,
        time::Duration,
    },
    tokio::{
        runtime::Handle,
        task::{self, JoinHandle},
    },
    tracing::error,
};

// `None` only while the task is being spawned
type Slots = SlotMap<TimeoutKey, Option<JoinHandle<()>>>;

/// Deferred callbacks tracked per owner, so they can all be cancelled at once.
///
/// Timeouts run as local tasks, so they can only be scheduled from within a
/// [`tokio::task::LocalSet`].
#[derive(Clone, Default)]
pub struct Timeouts {
    slots: Rc<RefCell<Slots>>,
}

impl Timeouts {
    pub fn new() -> Self {
        Default::default()
    }

    /// Runs `handler` after `delay`, unless cleared first.
    ///
    /// The timeout stops being tracked right before `handler` runs. Outside of
    /// a `LocalSet` nothing is scheduled, an error is logged and `None` is
    /// returned.
    pub fn set<F>(&self, handler: F, delay: Duration) -> Option<TimeoutKey>
    where
        F: FnOnce() + 'static,
    {
        if Handle::try_current().is_err() {
            error!("timeouts need a tokio runtime, nothing scheduled");
            return None;
        }

        let key = self.slots.borrow_mut().insert(None);
        let slots = Rc::downgrade(&self.slots);
        let task = async move {
            tokio::time::sleep(delay).await;

            let tracked =
                slots.upgrade().map_or(false, |slots| slots.borrow_mut().remove(key).is_some());
            if tracked {
                handler();
            }
        };

        // spawn_local panics outside of a LocalSet, which can't be queried up front
        match panic::catch_unwind(AssertUnwindSafe(|| task::spawn_local(task))) {
            Ok(handle) => {
                if let Some(slot) = self.slots.borrow_mut().get_mut(key) {
                    *slot = Some(handle);
                }
                Some(key)
            }
            Err(_) => {
                self.slots.borrow_mut().remove(key);
                error!("timeouts need a tokio LocalSet, nothing scheduled");
                None
            }
        }
    }

    /// Cancels a timeout. Stale keys are ignored.
    pub fn clear(&self, key: TimeoutKey) {
        let handle = self.slots.borrow_mut().remove(key).flatten();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Cancels every timeout still pending.
    pub fn clear_all(&self) {
        let handles: Vec<_> =
            self.slots.borrow_mut().drain().filter_map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.abort();
        }
    }

    #[inline]
    pub fn contains(&self, key: TimeoutKey) -> bool {
        self.slots.borrow().contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

impl fmt::Debug for Timeouts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeouts").field("pending", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::cell::Cell, tokio::task::LocalSet};

    fn flag() -> (Rc<Cell<bool>>, impl FnOnce() + 'static) {
        let fired = Rc::new(Cell::new(false));
        let setter = {
            let fired = fired.clone();
            move || fired.set(true)
        };
        (fired, setter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_and_untracks() {
        LocalSet::new()
            .run_until(async {
                let timeouts = Timeouts::new();
                let (fired, setter) = flag();

                let key = timeouts.set(setter, Duration::from_millis(50)).unwrap();
                assert!(timeouts.contains(key));

                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(!fired.get());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(fired.get());
                assert!(!timeouts.contains(key));
                assert!(timeouts.is_empty());

                // clearing a fired timeout does nothing
                timeouts.clear(key);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        LocalSet::new()
            .run_until(async {
                let timeouts = Timeouts::new();
                let (fired, setter) = flag();

                let key = timeouts.set(setter, Duration::from_millis(50)).unwrap();
                timeouts.clear(key);
                timeouts.clear(key);
                assert!(timeouts.is_empty());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(!fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        LocalSet::new()
            .run_until(async {
                let timeouts = Timeouts::new();
                let count = Rc::new(Cell::new(0));

                for delay in [10, 20, 30] {
                    let count = count.clone();
                    timeouts.set(move || count.set(count.get() + 1), Duration::from_millis(delay));
                }
                assert_eq!(timeouts.len(), 3);

                tokio::time::sleep(Duration::from_millis(15)).await;
                assert_eq!(count.get(), 1);

                timeouts.clear_all();
                assert!(timeouts.is_empty());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(count.get(), 1);
            })
            .await;
    }

    #[test]
    fn test_without_runtime_schedules_nothing() {
        let timeouts = Timeouts::new();
        let (fired, setter) = flag();

        assert_eq!(timeouts.set(setter, Duration::from_millis(1)), None);
        assert!(timeouts.is_empty());
        assert!(!fired.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_local_set_schedules_nothing() {
        let timeouts = Timeouts::new();
        let (fired, setter) = flag();

        assert_eq!(timeouts.set(setter, Duration::from_millis(1)), None);
        assert!(timeouts.is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!fired.get());
    }
}
