//! Output path from the engine back into the host. The engine writes outbound datagrams to its
//!  [OutputSink], which resolves the owning session's context values and calls the single
//!  registered host output function with `(context table, payload)`.

use std::io::Write;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, trace, warn};

use crate::context::ContextList;
use crate::host::{HostFunction, HostValue};


#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    /// the sink has no (live) context attached
    NoContext,
    /// no host output function is registered - the datagram is dropped
    Unregistered,
    Delivered,
    /// the host function returned an error - logged, the datagram is considered sent
    HostFailed,
}


/// Holds the registration slot for the host output function. One dispatcher is shared by all
///  sessions of a module.
#[derive(Default)]
pub struct OutputDispatcher {
    callback: RwLock<Option<Arc<dyn HostFunction>>>,
}

impl OutputDispatcher {
    pub fn new() -> OutputDispatcher {
        OutputDispatcher::default()
    }

    /// Replaces any previous registration, returning it. Last writer wins.
    pub fn register(&self, callback: Arc<dyn HostFunction>) -> Option<Arc<dyn HostFunction>> {
        let mut slot = self.callback.write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = slot.replace(callback);
        debug!(replaced = previous.is_some(), "registered host output function");
        previous
    }

    pub fn is_registered(&self) -> bool {
        self.callback.read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn registered(&self) -> Option<Arc<dyn HostFunction>> {
        self.callback.read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls the host output function with exactly two arguments: a fresh table holding the
    ///  context values at positions 1..=n, and the payload.
    ///
    /// NB: No lock is held while the host function runs - it may register a different output
    ///  function or drive other sessions.
    pub fn dispatch(&self, context: Option<&ContextList>, payload: &[u8]) -> DispatchOutcome {
        let Some(context) = context else {
            trace!("output without context: dropping {} bytes", payload.len());
            return DispatchOutcome::NoContext;
        };

        let Some(callback) = self.registered() else {
            warn!("no host output function registered: dropping {} bytes of output", payload.len());
            return DispatchOutcome::Unregistered;
        };

        trace!("dispatching {} bytes of output with context {:?}", payload.len(), context);

        let args = vec![
            HostValue::Table(context.to_host_table()),
            HostValue::bytes(payload),
        ];
        match callback.call(args) {
            Ok(_) => DispatchOutcome::Delivered,
            Err(e) => {
                warn!("host output function failed - dropping the datagram: {}", e);
                DispatchOutcome::HostFailed
            }
        }
    }
}


/// The engine's view of the output path: the dispatcher plus the session's context values as
///  the engine's opaque user context. The sink does not keep the context alive - the session
///  owns it, and once the session releases it, output becomes a no-op.
#[derive(Clone)]
pub struct OutputSink {
    dispatcher: Arc<OutputDispatcher>,
    context: Weak<ContextList>,
}

impl OutputSink {
    pub fn new(dispatcher: Arc<OutputDispatcher>, context: &Arc<ContextList>) -> OutputSink {
        OutputSink {
            dispatcher,
            context: Arc::downgrade(context),
        }
    }

    /// a sink without context, e.g. for engines created before a session exists
    pub fn detached(dispatcher: Arc<OutputDispatcher>) -> OutputSink {
        OutputSink {
            dispatcher,
            context: Weak::new(),
        }
    }

    pub fn emit(&self, payload: &[u8]) -> DispatchOutcome {
        let context = self.context.upgrade();
        self.dispatcher.dispatch(context.as_deref(), payload)
    }
}

/// every `write` is exactly one datagram
impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.emit(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
