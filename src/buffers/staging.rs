//! The staging buffer is the scratch region that the engine writes received messages to before
//!  they are copied out into a host value. There is one per module, shared by all its sessions.
//!
//! NB: The buffer is guarded by a mutex, so staged receives from different threads are
//!  serialized. No host code runs while the lock is held - the engine's receive path never
//!  produces output.

use bytes::Bytes;
use std::sync::{Mutex, PoisonError};
use tracing::{error, trace};

use crate::buffers::fixed_buffer::FixedBuf;
use crate::engine::{ArqEngine, RECV_BUFFER_TOO_SMALL};
use crate::safe_converter::SafeCast;


/// The result of a staged receive: the engine's status, and the payload iff the status is
///  positive
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedReceive {
    pub status: i32,
    pub payload: Option<Bytes>,
}

impl StagedReceive {
    pub fn status_only(status: i32) -> StagedReceive {
        StagedReceive {
            status,
            payload: None,
        }
    }
}


pub struct StagingBuffer {
    buf: Mutex<FixedBuf>,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> StagingBuffer {
        StagingBuffer {
            buf: Mutex::new(FixedBuf::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity()
    }

    /// Asks the engine for its next message, offering exactly the buffer's capacity. Messages
    ///  that do not fit are rejected by the engine (and stay queued there); an engine that
    ///  reports more bytes than it was offered is treated as a contract violation, and nothing
    ///  is copied.
    pub fn stage_receive(&self, engine: &mut dyn ArqEngine) -> StagedReceive {
        let mut buf = self.buf.lock()
            .unwrap_or_else(PoisonError::into_inner);

        buf.maximize_len();
        let status = engine.recv(buf.as_mut());

        let result = if status <= 0 {
            trace!("nothing to receive: status {}", status);
            StagedReceive::status_only(status)
        }
        else {
            let len: usize = (status as u32).safe_cast();
            if len > buf.capacity() {
                error!("engine reported {} received bytes for a staging buffer of {} bytes - discarding", len, buf.capacity());
                StagedReceive::status_only(RECV_BUFFER_TOO_SMALL)
            }
            else {
                buf.truncate(len);
                trace!("received {} bytes", len);
                StagedReceive {
                    status,
                    payload: Some(Bytes::copy_from_slice(buf.as_ref())),
                }
            }
        };

        buf.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use crate::dispatch::{OutputDispatcher, OutputSink};
    use crate::engine::{EngineFactory, RECV_QUEUE_EMPTY};
    use crate::test_util::ScriptedEngineFactory;
    use super::*;

    const CAPACITY: usize = 16;

    fn scripted_engine(factory: &ScriptedEngineFactory) -> Box<dyn ArqEngine> {
        factory.create(1, OutputSink::detached(Arc::new(OutputDispatcher::new())))
            .expect("scripted factory refused")
    }

    #[test]
    fn test_nothing_to_receive() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = scripted_engine(&factory);

        let staging = StagingBuffer::new(CAPACITY);
        assert_eq!(staging.stage_receive(engine.as_mut()), StagedReceive::status_only(RECV_QUEUE_EMPTY));
    }

    #[test]
    fn test_exactly_capacity() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = scripted_engine(&factory);
        let payload: Vec<u8> = (0..CAPACITY as u8).collect();
        factory.engine_state(0).lock().unwrap().pending_recv.push_back(payload.clone());

        let staging = StagingBuffer::new(CAPACITY);
        let received = staging.stage_receive(engine.as_mut());
        assert_eq!(received.status, CAPACITY as i32);
        assert_eq!(received.payload, Some(Bytes::from(payload)));
    }

    #[test]
    fn test_oversized_is_rejected_and_stays_queued() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = scripted_engine(&factory);
        factory.engine_state(0).lock().unwrap().pending_recv.push_back(vec![7; CAPACITY + 1]);

        let staging = StagingBuffer::new(CAPACITY);
        assert_eq!(staging.stage_receive(engine.as_mut()), StagedReceive::status_only(RECV_BUFFER_TOO_SMALL));
        assert_eq!(staging.stage_receive(engine.as_mut()), StagedReceive::status_only(RECV_BUFFER_TOO_SMALL));
        assert_eq!(factory.engine_state(0).lock().unwrap().pending_recv.len(), 1);
    }

    #[test]
    fn test_misreported_size_is_discarded() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = scripted_engine(&factory);
        factory.engine_state(0).lock().unwrap().misreport_recv = Some(CAPACITY as i32 + 100);

        let staging = StagingBuffer::new(CAPACITY);
        assert_eq!(staging.stage_receive(engine.as_mut()), StagedReceive::status_only(RECV_BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_consecutive_receives_do_not_leak_bytes() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = scripted_engine(&factory);
        {
            let state = factory.engine_state(0);
            let mut state = state.lock().unwrap();
            state.pending_recv.push_back(b"long message".to_vec());
            state.pending_recv.push_back(b"ab".to_vec());
        }

        let staging = StagingBuffer::new(CAPACITY);
        assert_eq!(staging.stage_receive(engine.as_mut()).payload, Some(Bytes::from_static(b"long message")));
        assert_eq!(staging.stage_receive(engine.as_mut()).payload, Some(Bytes::from_static(b"ab")));
        assert_eq!(staging.capacity(), CAPACITY);
    }
}
