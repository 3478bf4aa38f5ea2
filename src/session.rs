//! A session pairs one engine instance with the context values that are replayed to the host
//!  with every datagram the engine emits. The host only ever sees a [SessionHandle].
//!
//! Teardown happens exactly once: either explicitly through [Session::destroy], or when the
//!  host's last reference to the handle goes away (its finalizer). After teardown the session
//!  stays around as an empty shell that answers every operation with
//!  [BindingError::InvalidHandle].

use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, trace};

use crate::buffers::staging::{StagedReceive, StagingBuffer};
use crate::config::BindingConfig;
use crate::context::ContextList;
use crate::dispatch::{OutputDispatcher, OutputSink};
use crate::engine::{ArqEngine, EngineFactory};
use crate::error::{BindingError, BindingResult};


struct SessionState {
    /// the only strong reference - the engine's output sink holds a weak one
    context: Arc<ContextList>,
    engine: Box<dyn ArqEngine>,
}

impl SessionState {
    fn release(self, conversation_id: u32) {
        let SessionState { context, engine } = self;
        // context first: output that the engine might still produce while it is dropped goes
        //  nowhere
        drop(context);
        drop(engine);
        debug!("released session for conversation {}", conversation_id);
    }
}


/// The engine and context values of one conversation, exclusively owned. Operations may run
///  the host's output function; that function may drive any other session, but calling back
///  into this session from inside its own output is refused with [BindingError::SessionBusy].
pub struct Session {
    conversation_id: u32,
    state: Mutex<Option<SessionState>>,
    staging: Arc<StagingBuffer>,
}

impl Session {
    /// Takes ownership of the context values, and creates the engine with an output sink
    ///  pointing to them. If the engine refuses, the context values are released before the
    ///  error is returned.
    pub fn create(
        conversation_id: u32,
        context: ContextList,
        factory: &dyn EngineFactory,
        dispatcher: Arc<OutputDispatcher>,
        staging: Arc<StagingBuffer>,
        config: &BindingConfig,
    ) -> BindingResult<SessionHandle> {
        let context = Arc::new(context);
        let output = OutputSink::new(dispatcher, &context);

        let Some(mut engine) = factory.create(conversation_id, output) else {
            debug!("engine refused to create a session for conversation {}", conversation_id);
            return Err(BindingError::Creation(format!("engine refused conversation {}", conversation_id)));
        };

        if config.default_send_window.is_some() || config.default_recv_window.is_some() {
            engine.set_window_size(config.default_send_window.unwrap_or(0), config.default_recv_window.unwrap_or(0));
        }
        if let Some(timing) = &config.default_timing {
            engine.set_timing(timing.nodelay, timing.interval_ms, timing.resend, timing.no_congestion_control);
        }

        debug!("created session for conversation {} with {} context values", conversation_id, context.len());

        Ok(SessionHandle(Arc::new(Session {
            conversation_id,
            state: Mutex::new(Some(SessionState { context, engine })),
            staging,
        })))
    }

    pub fn conversation_id(&self) -> u32 {
        self.conversation_id
    }

    /// NB: `try_lock` rather than `lock` - the lock is held while the engine runs, and the
    ///  engine calls into the host, which may call back into this very session
    fn lock_state(&self) -> BindingResult<MutexGuard<'_, Option<SessionState>>> {
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(BindingError::SessionBusy),
        }
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut dyn ArqEngine) -> R) -> BindingResult<R> {
        let mut state = self.lock_state()?;
        let state = state.as_mut()
            .ok_or(BindingError::InvalidHandle)?;
        Ok(f(state.engine.as_mut()))
    }

    pub fn is_released(&self) -> bool {
        match self.lock_state() {
            Ok(state) => state.is_none(),
            Err(_) => false,
        }
    }

    /// Idempotent: returns `true` if this call released the session, `false` if it was
    ///  released before.
    pub fn destroy(&self) -> BindingResult<bool> {
        let state = self.lock_state()?.take();
        match state {
            Some(state) => {
                state.release(self.conversation_id);
                Ok(true)
            }
            None => {
                trace!("session for conversation {} was already released", self.conversation_id);
                Ok(false)
            }
        }
    }

    pub fn send(&self, payload: &[u8]) -> BindingResult<i32> {
        self.with_engine(|engine| engine.send(payload))
    }

    /// stages the engine's next message through the module's shared staging buffer
    pub fn receive(&self) -> BindingResult<StagedReceive> {
        self.with_engine(|engine| self.staging.stage_receive(engine))
    }

    pub fn input(&self, datagram: &[u8]) -> BindingResult<i32> {
        self.with_engine(|engine| engine.input(datagram))
    }

    pub fn update(&self, current_ms: u32) -> BindingResult<()> {
        self.with_engine(|engine| engine.update(current_ms))
    }

    pub fn check(&self, current_ms: u32) -> BindingResult<u32> {
        self.with_engine(|engine| engine.check(current_ms))
    }

    pub fn flush(&self) -> BindingResult<()> {
        self.with_engine(|engine| engine.flush())
    }

    pub fn configure_window(&self, send_window: i32, recv_window: i32) -> BindingResult<()> {
        self.with_engine(|engine| engine.set_window_size(send_window, recv_window))
    }

    pub fn configure_timing(&self, nodelay: i32, interval_ms: i32, resend: i32, no_congestion_control: i32) -> BindingResult<i32> {
        self.with_engine(|engine| engine.set_timing(nodelay, interval_ms, resend, no_congestion_control))
    }
}

/// the finalizer path: the host dropped its last reference
impl Drop for Session {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(state) = state {
            trace!("finalizing session for conversation {}", self.conversation_id);
            state.release(self.conversation_id);
        }
    }
}


/// The host's opaque reference to a session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle(Arc<Session>);

impl SessionHandle {
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl Debug for SessionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session{{conv:{}}}", self.0.conversation_id)
    }
}
