/// Error type handlers may return from a failed invocation.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// The event vocabulary of one kind of emitter.
///
/// Every value knows the name it is dispatched under. Implement this with
/// `derive(Event)` rather than by hand; the derive also generates the
/// `unwrap_as_*` accessors for each variant.
pub trait Event: 'static {
    /// Every key a value of this type can return from [`get_key`](Event::get_key).
    const KEYS: &'static [&'static str];

    /// Returns the name this event is dispatched under.
    fn get_key(&self) -> &'static str;

    /// Returns true if `key` belongs to this vocabulary.
    #[inline]
    fn has_key(key: &str) -> bool {
        Self::KEYS.contains(&key)
    }
}

/// Anything a handler can return.
///
/// * `()` for handlers which cannot fail.
/// * `Result<(), E>` for handlers which can; an `Err` is reported as a fault
///   and doesn't stop the remaining handlers from running.
pub trait HandlerOutput {
    fn into_result(self) -> Result<(), BoxError>;
}

impl HandlerOutput for () {
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E: Into<BoxError>> HandlerOutput for Result<(), E> {
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Door {
        Opened,
        Closed(u8),
    }

    impl Event for Door {
        const KEYS: &'static [&'static str] = &["opened", "closed"];

        fn get_key(&self) -> &'static str {
            match self {
                Door::Opened => "opened",
                Door::Closed(_) => "closed",
            }
        }
    }

    #[test]
    fn test_vocabulary() {
        assert_eq!(Door::Opened.get_key(), "opened");
        assert_eq!(Door::Closed(3).get_key(), "closed");
        assert!(Door::has_key("closed"));
        assert!(!Door::has_key("slammed"));
    }

    #[test]
    fn test_handler_output() {
        assert!(().into_result().is_ok());
        assert!(Ok::<(), String>(()).into_result().is_ok());

        let err = Err::<(), _>("jammed").into_result().unwrap_err();
        assert_eq!(err.to_string(), "jammed");
    }
}
