use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatch::OutputSink;
use crate::engine::{ArqEngine, EngineFactory, RECV_BUFFER_TOO_SMALL, RECV_QUEUE_EMPTY, STATUS_OK};
use crate::host::{HostFunction, HostValue};


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCall {
    Send(Vec<u8>),
    /// the size of the buffer offered
    Recv(usize),
    Input(Vec<u8>),
    Update(u32),
    Check(u32),
    Flush,
    SetWindowSize(i32, i32),
    SetTiming(i32, i32, i32, i32),
}

#[derive(Debug, Default)]
pub struct ScriptedEngineState {
    pub conversation_id: u32,
    pub calls: Vec<EngineCall>,
    /// messages served by `recv`, in order
    pub pending_recv: VecDeque<Vec<u8>>,
    /// if set, `recv` returns this status without writing anything
    pub misreport_recv: Option<i32>,
}


/// A deterministic stand-in for a real engine: `send` queues the payload, `update` and `flush`
///  emit every queued payload as one datagram, and `input` makes a datagram available to `recv`.
///  Two scripted engines wired output-to-input therefore behave like a lossless link.
pub struct ScriptedEngine {
    output: OutputSink,
    outbox: Vec<Vec<u8>>,
    state: Arc<Mutex<ScriptedEngineState>>,
    live_engines: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn emit_outbox(&mut self) {
        for datagram in std::mem::take(&mut self.outbox) {
            self.output.emit(&datagram);
        }
    }
}

impl ArqEngine for ScriptedEngine {
    fn send(&mut self, payload: &[u8]) -> i32 {
        self.record(EngineCall::Send(payload.to_vec()));
        self.outbox.push(payload.to_vec());
        STATUS_OK
    }

    fn recv(&mut self, buf: &mut [u8]) -> i32 {
        self.record(EngineCall::Recv(buf.len()));

        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.misreport_recv {
            return status;
        }
        let next_len = state.pending_recv.front().map(|msg| msg.len());
        match next_len {
            None => RECV_QUEUE_EMPTY,
            Some(len) if len > buf.len() => RECV_BUFFER_TOO_SMALL,
            Some(len) => {
                let msg = state.pending_recv.pop_front().unwrap_or_default();
                buf[..len].copy_from_slice(&msg);
                len as i32
            }
        }
    }

    fn input(&mut self, datagram: &[u8]) -> i32 {
        self.record(EngineCall::Input(datagram.to_vec()));
        self.state.lock().unwrap().pending_recv.push_back(datagram.to_vec());
        STATUS_OK
    }

    fn update(&mut self, current_ms: u32) {
        self.record(EngineCall::Update(current_ms));
        self.emit_outbox();
    }

    fn check(&self, current_ms: u32) -> u32 {
        self.record(EngineCall::Check(current_ms));
        current_ms.wrapping_add(10)
    }

    fn flush(&mut self) {
        self.record(EngineCall::Flush);
        self.emit_outbox();
    }

    fn set_window_size(&mut self, send_window: i32, recv_window: i32) {
        self.record(EngineCall::SetWindowSize(send_window, recv_window));
    }

    fn set_timing(&mut self, nodelay: i32, interval_ms: i32, resend: i32, no_congestion_control: i32) -> i32 {
        self.record(EngineCall::SetTiming(nodelay, interval_ms, resend, no_congestion_control));
        STATUS_OK
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.live_engines.fetch_sub(1, Ordering::SeqCst);
    }
}


/// Creates [ScriptedEngine]s and keeps their state accessible, in creation order
#[derive(Default)]
pub struct ScriptedEngineFactory {
    refuse: bool,
    engines: Mutex<Vec<Arc<Mutex<ScriptedEngineState>>>>,
    live_engines: Arc<AtomicUsize>,
}

impl ScriptedEngineFactory {
    pub fn new() -> ScriptedEngineFactory {
        ScriptedEngineFactory::default()
    }

    /// a factory that refuses every conversation
    pub fn refusing() -> ScriptedEngineFactory {
        ScriptedEngineFactory {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn engine_state(&self, idx: usize) -> Arc<Mutex<ScriptedEngineState>> {
        self.engines.lock().unwrap()[idx].clone()
    }

    pub fn created_engines(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    /// engines that were created and not dropped yet
    pub fn live_engines(&self) -> usize {
        self.live_engines.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn create(&self, conversation_id: u32, output: OutputSink) -> Option<Box<dyn ArqEngine>> {
        if self.refuse {
            return None;
        }

        let state = Arc::new(Mutex::new(ScriptedEngineState {
            conversation_id,
            ..Default::default()
        }));
        self.engines.lock().unwrap().push(state.clone());
        self.live_engines.fetch_add(1, Ordering::SeqCst);

        Some(Box::new(ScriptedEngine {
            output,
            outbox: Vec::new(),
            state,
            live_engines: self.live_engines.clone(),
        }))
    }
}


/// A host function that records its arguments
#[derive(Default)]
pub struct RecordingHostFunction {
    calls: Mutex<Vec<Vec<HostValue>>>,
}

impl RecordingHostFunction {
    pub fn new() -> Arc<RecordingHostFunction> {
        Arc::new(RecordingHostFunction::default())
    }

    /// returns recorded calls, clearing the internal buffer
    pub fn take_calls(&self) -> Vec<Vec<HostValue>> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl HostFunction for RecordingHostFunction {
    fn call(&self, args: Vec<HostValue>) -> anyhow::Result<Vec<HostValue>> {
        self.calls.lock().unwrap().push(args);
        Ok(vec![])
    }
}
