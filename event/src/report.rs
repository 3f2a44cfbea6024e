use {crate::error::HandlerFault, tracing::error};

/// Receives every handler fault caught during dispatch.
///
/// Implementations must not panic; they run in the middle of a dispatch.
pub trait FaultReporter {
    fn report(&self, fault: &HandlerFault);
}

/// Logs faults through `tracing`. This is the default reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, fault: &HandlerFault) {
        error!(
            emittor = ?fault.emittor,
            event = %fault.event,
            error = %fault.source,
            "listener handler failed"
        );
    }
}

impl<F: Fn(&HandlerFault)> FaultReporter for F {
    #[inline]
    fn report(&self, fault: &HandlerFault) {
        self(fault)
    }
}
