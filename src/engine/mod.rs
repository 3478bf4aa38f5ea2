//! The fixed function contract of the ARQ engine. The binding never looks inside an engine, it
//!  only drives it through [ArqEngine] and hands it an [OutputSink] at creation time.
//!
//! Status codes are passed to the host unchanged. The constants below are the ones the classic
//!  engine (and the default [kcp_engine] backend) use.

pub mod kcp_engine;

#[cfg(test)] use mockall::automock;

use crate::dispatch::OutputSink;


pub const STATUS_OK: i32 = 0;

pub const RECV_QUEUE_EMPTY: i32 = -1;
pub const RECV_EXPECTING_FRAGMENT: i32 = -2;
/// the next message does not fit the receive buffer - it stays queued
pub const RECV_BUFFER_TOO_SMALL: i32 = -3;

pub const SEND_INVALID: i32 = -1;
pub const SEND_TOO_LARGE: i32 = -2;

pub const INPUT_INVALID_HEADER: i32 = -1;
pub const INPUT_INVALID_SEGMENT: i32 = -2;
pub const INPUT_UNSUPPORTED_COMMAND: i32 = -3;


/// One engine instance. All calls are synchronous; `send`, `input`, `update` and `flush` may
///  call the engine's [OutputSink] any number of times before they return.
pub trait ArqEngine: Send + 'static {
    /// queue a message for sending, returns `>= 0` on success
    fn send(&mut self, payload: &[u8]) -> i32;

    /// Move the next complete message into `buf`, returning its length. Returns a non-positive
    ///  status if there is nothing to deliver. The engine must not write beyond `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> i32;

    /// feed a datagram received from the peer
    fn input(&mut self, datagram: &[u8]) -> i32;

    /// `current_ms` is a wrapping 32 bit millisecond clock
    fn update(&mut self, current_ms: u32);

    /// when `update` should be called next
    fn check(&self, current_ms: u32) -> u32;

    fn flush(&mut self);

    /// non-positive values leave the respective window unchanged
    fn set_window_size(&mut self, send_window: i32, recv_window: i32);

    /// negative values leave the respective parameter unchanged
    fn set_timing(&mut self, nodelay: i32, interval_ms: i32, resend: i32, no_congestion_control: i32) -> i32;
}

#[cfg_attr(test, automock)]
pub trait EngineFactory: Send + Sync + 'static {
    /// Create an engine for a conversation, or `None` if the engine refuses. The engine emits
    ///  every outbound datagram through `output`.
    fn create(&self, conversation_id: u32, output: OutputSink) -> Option<Box<dyn ArqEngine>>;
}
