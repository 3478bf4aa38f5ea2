//! A binding layer that exposes a reliable-datagram ARQ engine to an embedding scripting host.
//!
//! The host creates sessions, feeds them datagrams it received from the network, drives their
//!  clock, and drains reassembled messages. Every datagram a session needs to send goes to a
//!  single host function registered with [module::BindingModule::init_output_callback],
//!  together with the context values the session was created with - that is how the host
//!  knows where to send it.
//!
//! ```ascii
//!  host                     binding                          engine
//!  ----                     -------                          ------
//!  create(conv, {ctx})  --> Session{ context, engine }  -->  create(conv, sink)
//!  input / update       --> Session                     -->  input / update
//!                                                              |
//!  output({ctx}, bytes) <-- OutputDispatcher <-- OutputSink <--+
//!  recv                 --> StagingBuffer               -->  recv
//! ```
//!
//! ## Lifetimes
//!
//! A session owns its engine and its context values, and releases both together - either
//!  explicitly (`release`) or from the host's finalizer, whichever comes first. After that, the
//!  session answers every operation with an error instead of touching the released engine.
//!
//! The output function registration and the staging buffer belong to the module and outlive
//!  all sessions.
//!
//! ## Reentrancy
//!
//! The host's output function runs synchronously inside `send`, `input`, `update` or `flush`.
//!  It may drive any *other* session; calling back into the session that is currently emitting
//!  is refused with [error::BindingError::SessionBusy].
//!
//! ## Open points
//!
//! * Output of sessions driven before an output function is registered is dropped (logged).
//! * Messages bigger than the staging buffer cannot be received: the engine reports
//!   [engine::RECV_BUFFER_TOO_SMALL] and keeps the message queued.

pub mod buffers;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod module;
pub mod safe_converter;
pub mod session;
pub mod test_util;

pub use error::{BindingError, BindingResult};
pub use module::{module_init, BindingModule};
pub use session::SessionHandle;
