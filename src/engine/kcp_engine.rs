//! Default engine backend: the `kcp` crate driven through the [ArqEngine] contract. Its
//!  `Result`s are mapped onto the classic engine's status codes so that hosts see the same
//!  numbers regardless of the backend.

use kcp::{Error as KcpError, Kcp};
use tracing::{debug, trace};

use crate::dispatch::OutputSink;
use crate::engine::{ArqEngine, EngineFactory, INPUT_INVALID_HEADER, INPUT_INVALID_SEGMENT, INPUT_UNSUPPORTED_COMMAND, RECV_BUFFER_TOO_SMALL, RECV_EXPECTING_FRAGMENT, RECV_QUEUE_EMPTY, SEND_INVALID, SEND_TOO_LARGE, STATUS_OK};
use crate::safe_converter::PrecheckedCast;


pub const DEFAULT_SEND_WINDOW: u16 = 32;
pub const DEFAULT_RECV_WINDOW: u16 = 128;
pub const DEFAULT_INTERVAL_MS: i32 = 100;
pub const MIN_INTERVAL_MS: i32 = 10;
pub const MAX_INTERVAL_MS: i32 = 5000;


#[derive(Default)]
pub struct KcpEngineFactory {}

impl KcpEngineFactory {
    pub fn new() -> KcpEngineFactory {
        KcpEngineFactory {}
    }
}

impl EngineFactory for KcpEngineFactory {
    fn create(&self, conversation_id: u32, output: OutputSink) -> Option<Box<dyn ArqEngine>> {
        debug!("creating kcp engine for conversation {}", conversation_id);
        Some(Box::new(KcpEngine::new(conversation_id, output)))
    }
}


/// The `kcp` crate has no notion of 'leave this parameter unchanged', so the current settings
///  are tracked here.
pub struct KcpEngine {
    kcp: Kcp<OutputSink>,
    send_window: u16,
    recv_window: u16,
    nodelay: bool,
    interval_ms: i32,
    resend: i32,
    no_congestion_control: bool,
}

impl KcpEngine {
    pub fn new(conversation_id: u32, output: OutputSink) -> KcpEngine {
        KcpEngine {
            kcp: Kcp::new(conversation_id, output),
            send_window: DEFAULT_SEND_WINDOW,
            recv_window: DEFAULT_RECV_WINDOW,
            nodelay: false,
            interval_ms: DEFAULT_INTERVAL_MS,
            resend: 0,
            no_congestion_control: false,
        }
    }

    fn window_value(requested: i32, current: u16) -> u16 {
        if requested > 0 {
            u16::try_from(requested).unwrap_or(u16::MAX)
        }
        else {
            current
        }
    }
}

impl ArqEngine for KcpEngine {
    fn send(&mut self, payload: &[u8]) -> i32 {
        match self.kcp.send(payload) {
            Ok(_) => STATUS_OK,
            Err(KcpError::UserBufTooBig) => SEND_TOO_LARGE,
            Err(e) => {
                debug!("kcp send failed: {}", e);
                SEND_INVALID
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> i32 {
        match self.kcp.recv(buf) {
            Ok(n) => n.prechecked_cast(),
            Err(KcpError::RecvQueueEmpty) => RECV_QUEUE_EMPTY,
            Err(KcpError::ExpectingFragment) => RECV_EXPECTING_FRAGMENT,
            Err(KcpError::UserBufTooSmall) => RECV_BUFFER_TOO_SMALL,
            Err(e) => {
                debug!("kcp recv failed: {}", e);
                RECV_QUEUE_EMPTY
            }
        }
    }

    fn input(&mut self, datagram: &[u8]) -> i32 {
        match self.kcp.input(datagram) {
            Ok(_) => STATUS_OK,
            Err(e) => {
                trace!("kcp rejected input datagram: {}", e);
                match e {
                    KcpError::InvalidSegmentSize(..) | KcpError::InvalidSegmentDataSize(..) => INPUT_INVALID_SEGMENT,
                    KcpError::UnsupportedCmd(..) => INPUT_UNSUPPORTED_COMMAND,
                    _ => INPUT_INVALID_HEADER,
                }
            }
        }
    }

    fn update(&mut self, current_ms: u32) {
        if let Err(e) = self.kcp.update(current_ms) {
            debug!("kcp update failed: {}", e);
        }
    }

    fn check(&self, current_ms: u32) -> u32 {
        self.kcp.check(current_ms)
    }

    fn flush(&mut self) {
        // NB: flushing before the first update is a no-op, the same as in the classic engine
        if let Err(e) = self.kcp.flush() {
            trace!("kcp flush skipped: {}", e);
        }
    }

    fn set_window_size(&mut self, send_window: i32, recv_window: i32) {
        self.send_window = Self::window_value(send_window, self.send_window);
        // the receive window never shrinks below the engine's default
        self.recv_window = Self::window_value(recv_window, self.recv_window).max(DEFAULT_RECV_WINDOW);
        self.kcp.set_wndsize(self.send_window, self.recv_window);
    }

    fn set_timing(&mut self, nodelay: i32, interval_ms: i32, resend: i32, no_congestion_control: i32) -> i32 {
        if nodelay >= 0 {
            self.nodelay = nodelay > 0;
        }
        if interval_ms >= 0 {
            self.interval_ms = interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
        }
        if resend >= 0 {
            self.resend = resend;
        }
        if no_congestion_control >= 0 {
            self.no_congestion_control = no_congestion_control > 0;
        }
        self.kcp.set_nodelay(self.nodelay, self.interval_ms, self.resend, self.no_congestion_control);
        STATUS_OK
    }
}
