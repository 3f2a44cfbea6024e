/// Behaviour switches of a [`ListenerBank`](crate::ListenerBank).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankConfig {
    /// Emit a `trace!` record for every dispatch, regardless of per-entity settings.
    pub trace_dispatch: bool,
    /// Catch panicking handlers and report them as faults instead of unwinding
    /// through the dispatcher.
    pub catch_panics: bool,
}

impl Default for BankConfig {
    fn default() -> Self {
        BankConfig { trace_dispatch: false, catch_panics: true }
    }
}
