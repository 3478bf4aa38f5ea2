//! The module is what the host loads: it owns the process-wide pieces (the output function
//!  registration and the staging buffer), and it maps the host-visible operation names to
//!  their implementations.
//!
//! Operations are called with host values and return host values. Any failure is returned
//!  to the host as the pair `(nil, "error: ...")` - nothing panics, nothing is raised later.
//!
//! Module functions:
//! * `create(conv, {context...})` -> session
//! * `init(output_function)`
//!
//! Session methods, the session being the first argument:
//! * `send(s, bytes)` -> status
//! * `recv(s)` -> status [, bytes]
//! * `input(s, bytes)` -> status
//! * `update(s, now_ms)`
//! * `check(s, now_ms)` -> next_due_ms
//! * `flush(s)`
//! * `wndsize(s, send_window, recv_window)`
//! * `nodelay(s, nodelay, interval_ms, resend, no_congestion_control)` -> status
//! * `release(s)` -> 1 if released now, 0 if it was released before
//! * `__gc(s)` - the finalizer

use std::sync::{Arc, OnceLock};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::buffers::staging::StagingBuffer;
use crate::config::BindingConfig;
use crate::context::ContextList;
use crate::dispatch::OutputDispatcher;
use crate::engine::kcp_engine::KcpEngineFactory;
use crate::engine::EngineFactory;
use crate::error::{BindingError, BindingResult};
use crate::host::{HostFunction, HostTable, HostValue};
use crate::safe_converter::{SafeCast, WrappingCast};
use crate::session::{Session, SessionHandle};


pub const OP_CREATE: &str = "create";
pub const OP_INIT: &str = "init";

pub const OP_SEND: &str = "send";
pub const OP_RECV: &str = "recv";
pub const OP_INPUT: &str = "input";
pub const OP_UPDATE: &str = "update";
pub const OP_CHECK: &str = "check";
pub const OP_FLUSH: &str = "flush";
pub const OP_WNDSIZE: &str = "wndsize";
pub const OP_NODELAY: &str = "nodelay";
pub const OP_RELEASE: &str = "release";
pub const OP_FINALIZER: &str = "__gc";

pub type Operation = fn(&BindingModule, &[HostValue]) -> BindingResult<Vec<HostValue>>;


pub struct BindingModule {
    config: BindingConfig,
    factory: Box<dyn EngineFactory>,
    dispatcher: Arc<OutputDispatcher>,
    staging: Arc<StagingBuffer>,
    functions: FxHashMap<&'static str, Operation>,
    methods: FxHashMap<&'static str, Operation>,
}

impl BindingModule {
    pub fn new(config: BindingConfig, factory: impl EngineFactory) -> BindingResult<BindingModule> {
        config.validate()
            .map_err(|e| BindingError::InvalidConfig(e.to_string()))?;
        Ok(Self::build(config, Box::new(factory)))
    }

    /// a module driving the default engine backend
    pub fn with_kcp(config: BindingConfig) -> BindingResult<BindingModule> {
        Self::new(config, KcpEngineFactory::new())
    }

    fn build(config: BindingConfig, factory: Box<dyn EngineFactory>) -> BindingModule {
        let mut functions: FxHashMap<&'static str, Operation> = FxHashMap::default();
        functions.insert(OP_CREATE, op_create);
        functions.insert(OP_INIT, op_init);

        let mut methods: FxHashMap<&'static str, Operation> = FxHashMap::default();
        methods.insert(OP_SEND, op_send);
        methods.insert(OP_RECV, op_recv);
        methods.insert(OP_INPUT, op_input);
        methods.insert(OP_UPDATE, op_update);
        methods.insert(OP_CHECK, op_check);
        methods.insert(OP_FLUSH, op_flush);
        methods.insert(OP_WNDSIZE, op_wndsize);
        methods.insert(OP_NODELAY, op_nodelay);
        methods.insert(OP_RELEASE, op_release);
        // the finalizer shares the idempotent teardown with `release`
        methods.insert(OP_FINALIZER, op_finalize);

        debug!("initializing module with a staging buffer of {} bytes", config.staging_buffer_capacity);

        BindingModule {
            staging: Arc::new(StagingBuffer::new(config.staging_buffer_capacity)),
            dispatcher: Arc::new(OutputDispatcher::new()),
            config,
            factory,
            functions,
            methods,
        }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn staging_buffer(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn is_output_registered(&self) -> bool {
        self.dispatcher.is_registered()
    }

    /// Replaces the output function of *all* sessions of this module, including existing ones.
    ///  Sessions driven before the first registration drop their output.
    pub fn init_output_callback(&self, callback: Arc<dyn HostFunction>) {
        self.dispatcher.register(callback);
    }

    pub fn create_session(&self, conversation_id: u32, context: ContextList) -> BindingResult<SessionHandle> {
        Session::create(conversation_id, context, self.factory.as_ref(), self.dispatcher.clone(), self.staging.clone(), &self.config)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.keys().copied()
    }

    /// the finalizer to be installed for the host's session type
    pub fn finalizer(&self) -> Operation {
        op_finalize
    }

    pub fn try_call(&self, name: &str, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
        let op = self.functions.get(name)
            .or_else(|| self.methods.get(name))
            .ok_or_else(|| BindingError::UnknownOperation(name.to_string()))?;

        trace!("calling {} with {} args", name, args.len());
        op(self, args)
    }

    /// Calls an operation by name, turning failures into `(nil, message)`
    pub fn call(&self, name: &str, args: &[HostValue]) -> Vec<HostValue> {
        match self.try_call(name, args) {
            Ok(result) => result,
            Err(e) => {
                debug!("{} failed: {}", name, e);
                vec![HostValue::Nil, HostValue::Bytes(Bytes::from(e.host_message()))]
            }
        }
    }
}


static MODULE: OnceLock<Arc<BindingModule>> = OnceLock::new();

/// The process-wide module with the default configuration and engine backend. The staging
///  buffer is allocated on the first call; later calls return the same module.
pub fn module_init() -> Arc<BindingModule> {
    MODULE.get_or_init(|| Arc::new(BindingModule::build(BindingConfig::default(), Box::new(KcpEngineFactory::new()))))
        .clone()
}


fn arg(args: &[HostValue], position: usize) -> &HostValue {
    static NIL: HostValue = HostValue::Nil;
    position.checked_sub(1)
        .and_then(|idx| args.get(idx))
        .unwrap_or(&NIL)
}

fn check_integer(args: &[HostValue], position: usize) -> BindingResult<i64> {
    arg(args, position).as_integer()
        .ok_or(BindingError::bad_argument(position, "integer"))
}

fn check_i32(args: &[HostValue], position: usize) -> BindingResult<i32> {
    i32::try_from(check_integer(args, position)?)
        .map_err(|_| BindingError::bad_argument(position, "32 bit integer"))
}

/// the engine's clock is a wrapping u32
fn check_time(args: &[HostValue], position: usize) -> BindingResult<u32> {
    Ok(check_integer(args, position)?.wrapping_cast())
}

fn check_bytes(args: &[HostValue], position: usize) -> BindingResult<&Bytes> {
    arg(args, position).as_bytes()
        .ok_or(BindingError::bad_argument(position, "bytes"))
}

fn check_table(args: &[HostValue], position: usize) -> BindingResult<&HostTable> {
    match arg(args, position) {
        HostValue::Table(t) => Ok(t),
        _ => Err(BindingError::bad_argument(position, "table")),
    }
}

fn check_session(args: &[HostValue], position: usize) -> BindingResult<&SessionHandle> {
    match arg(args, position) {
        HostValue::Session(s) => Ok(s),
        _ => Err(BindingError::bad_argument(position, "session")),
    }
}

fn status(value: i32) -> HostValue {
    HostValue::Integer(value.safe_cast())
}


fn op_create(module: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let conversation_id = check_integer(args, 1)?.wrapping_cast();
    let context = ContextList::from_host_table(check_table(args, 2)?, 2)?;
    let session = module.create_session(conversation_id, context)?;
    Ok(vec![HostValue::Session(session)])
}

fn op_init(module: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    match arg(args, 1) {
        HostValue::Function(f) => {
            module.init_output_callback(f.clone());
            Ok(vec![])
        }
        _ => Err(BindingError::bad_argument(1, "function")),
    }
}

fn op_send(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    let payload = check_bytes(args, 2)?;
    Ok(vec![status(session.send(payload)?)])
}

fn op_recv(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let received = check_session(args, 1)?.receive()?;
    let mut result = vec![status(received.status)];
    if let Some(payload) = received.payload {
        result.push(HostValue::Bytes(payload));
    }
    Ok(result)
}

fn op_input(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    let datagram = check_bytes(args, 2)?;
    Ok(vec![status(session.input(datagram)?)])
}

fn op_update(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    session.update(check_time(args, 2)?)?;
    Ok(vec![])
}

fn op_check(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    let next_due = session.check(check_time(args, 2)?)?;
    Ok(vec![HostValue::Integer(next_due.wrapping_cast())])
}

fn op_flush(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    check_session(args, 1)?.flush()?;
    Ok(vec![])
}

fn op_wndsize(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    session.configure_window(check_i32(args, 2)?, check_i32(args, 3)?)?;
    Ok(vec![])
}

fn op_nodelay(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let session = check_session(args, 1)?;
    let result = session.configure_timing(
        check_i32(args, 2)?,
        check_i32(args, 3)?,
        check_i32(args, 4)?,
        check_i32(args, 5)?,
    )?;
    Ok(vec![status(result)])
}

fn op_release(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    let released = check_session(args, 1)?.destroy()?;
    Ok(vec![HostValue::Integer(released.into())])
}

fn op_finalize(_: &BindingModule, args: &[HostValue]) -> BindingResult<Vec<HostValue>> {
    check_session(args, 1)?.destroy()?;
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use rstest::rstest;
    use crate::host::host_function;
    use crate::test_util::{RecordingHostFunction, ScriptedEngineFactory};
    use super::*;

    fn scripted_module() -> BindingModule {
        BindingModule::new(BindingConfig::default(), ScriptedEngineFactory::new()).unwrap()
    }

    fn error_message(result: &[HostValue]) -> String {
        assert_eq!(result.len(), 2, "expected (nil, message), got {:?}", result);
        assert!(result[0].is_nil());
        String::from_utf8(result[1].as_bytes().unwrap().to_vec()).unwrap()
    }

    fn create(module: &BindingModule, conv: i64, context: Vec<HostValue>) -> HostValue {
        let result = module.call(OP_CREATE, &[conv.into(), HostValue::Table(context.into())]);
        assert_eq!(result.len(), 1, "create failed: {:?}", result);
        result.into_iter().next().unwrap()
    }

    #[test]
    fn test_registration_table() {
        let module = scripted_module();

        let functions: BTreeSet<_> = module.function_names().collect();
        assert_eq!(functions, BTreeSet::from([OP_CREATE, OP_INIT]));

        let methods: BTreeSet<_> = module.method_names().collect();
        assert_eq!(methods, BTreeSet::from([OP_SEND, OP_RECV, OP_INPUT, OP_UPDATE, OP_CHECK, OP_FLUSH, OP_WNDSIZE, OP_NODELAY, OP_RELEASE, OP_FINALIZER]));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BindingConfig { staging_buffer_capacity: 1, ..Default::default() };
        assert!(matches!(BindingModule::new(config, ScriptedEngineFactory::new()), Err(BindingError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_operation() {
        let module = scripted_module();
        assert_eq!(error_message(&module.call("frobnicate", &[])), "error: unknown operation \"frobnicate\"");
    }

    #[rstest]
    #[case::no_args(OP_CREATE, vec![], "error: bad argument #1: integer expected")]
    #[case::no_context(OP_CREATE, vec![HostValue::Integer(1)], "error: bad argument #2: table expected")]
    #[case::bad_context(OP_CREATE, vec![HostValue::Integer(1), HostValue::Table(vec![HostValue::Nil].into())], "error: bad argument #2: table of 32 bit integers or byte strings expected")]
    #[case::init_no_function(OP_INIT, vec![HostValue::Integer(1)], "error: bad argument #1: function expected")]
    #[case::send_no_session(OP_SEND, vec![HostValue::Integer(1)], "error: bad argument #1: session expected")]
    #[case::recv_no_session(OP_RECV, vec![], "error: bad argument #1: session expected")]
    fn test_argument_validation(#[case] op: &str, #[case] args: Vec<HostValue>, #[case] expected: &str) {
        let module = scripted_module();
        assert_eq!(error_message(&module.call(op, &args)), expected);
    }

    #[test]
    fn test_method_argument_validation() {
        let module = scripted_module();
        let session = create(&module, 1, vec![]);

        assert_eq!(error_message(&module.call(OP_SEND, &[session.clone(), HostValue::Integer(3)])), "error: bad argument #2: bytes expected");
        assert_eq!(error_message(&module.call(OP_WNDSIZE, &[session.clone(), HostValue::Integer(1 << 40), HostValue::Integer(1)])), "error: bad argument #2: 32 bit integer expected");
        assert_eq!(error_message(&module.call(OP_NODELAY, &[session.clone(), 1.into(), 10.into(), 2.into()])), "error: bad argument #5: integer expected");
        assert_eq!(error_message(&module.call(OP_UPDATE, &[session, "now".into()])), "error: bad argument #2: integer expected");
    }

    #[test]
    fn test_refused_creation() {
        let module = BindingModule::new(BindingConfig::default(), ScriptedEngineFactory::refusing()).unwrap();
        let result = module.call(OP_CREATE, &[HostValue::Integer(1), HostValue::Table(HostTable::new())]);
        assert_eq!(error_message(&result), "error: fail to create session: engine refused conversation 1");
    }

    #[test]
    fn test_released_session_reports_invalid_handle() {
        let module = scripted_module();
        let session = create(&module, 1, vec![HostValue::Integer(1)]);

        assert_eq!(module.call(OP_RELEASE, &[session.clone()]), vec![HostValue::Integer(1)]);
        assert_eq!(module.call(OP_RELEASE, &[session.clone()]), vec![HostValue::Integer(0)]);
        assert_eq!(module.call(OP_FINALIZER, &[session.clone()]), vec![]);

        let calls: Vec<(&str, Vec<HostValue>)> = vec![
            (OP_SEND, vec![session.clone(), "x".into()]),
            (OP_RECV, vec![session.clone()]),
            (OP_INPUT, vec![session.clone(), "x".into()]),
            (OP_UPDATE, vec![session.clone(), 1.into()]),
            (OP_CHECK, vec![session.clone(), 1.into()]),
            (OP_FLUSH, vec![session.clone()]),
            (OP_WNDSIZE, vec![session.clone(), 1.into(), 1.into()]),
            (OP_NODELAY, vec![session.clone(), 1.into(), 1.into(), 1.into(), 1.into()]),
        ];
        for (op, args) in calls {
            assert_eq!(error_message(&module.call(op, &args)), "error: session was already released", "{}", op);
        }
    }

    #[test]
    fn test_recv_result_shapes() {
        let module = scripted_module();
        let session = create(&module, 1, vec![]);

        assert_eq!(module.call(OP_RECV, &[session.clone()]), vec![HostValue::Integer(-1)]);

        assert_eq!(module.call(OP_INPUT, &[session.clone(), HostValue::bytes(&[1, 0, 2])]), vec![HostValue::Integer(0)]);
        assert_eq!(module.call(OP_RECV, &[session]), vec![HostValue::Integer(3), HostValue::bytes(&[1, 0, 2])]);
    }

    #[test]
    fn test_check_and_time_wrapping() {
        let module = scripted_module();
        let session = create(&module, 1, vec![]);

        assert_eq!(module.call(OP_CHECK, &[session.clone(), 100.into()]), vec![HostValue::Integer(110)]);
        // 2^32 + 5 wraps to 5 on the engine's clock
        assert_eq!(module.call(OP_CHECK, &[session, HostValue::Integer((1i64 << 32) + 5)]), vec![HostValue::Integer(15)]);
    }

    #[test]
    fn test_output_through_registered_function() {
        let module = scripted_module();
        let recorder = RecordingHostFunction::new();
        module.call(OP_INIT, &[HostValue::Function(recorder.clone())]);
        assert!(module.is_output_registered());

        let session = create(&module, 1, vec![10.into(), "ab".into(), 20.into()]);
        assert_eq!(module.call(OP_SEND, &[session.clone(), "data".into()]), vec![HostValue::Integer(0)]);
        assert_eq!(module.call(OP_FLUSH, &[session]), vec![]);

        let expected_context: HostTable = vec![10.into(), "ab".into(), 20.into()].into();
        assert_eq!(recorder.take_calls(), vec![vec![HostValue::Table(expected_context), "data".into()]]);
    }

    #[test]
    fn test_second_init_replaces_first() {
        let module = scripted_module();
        let first_count = Arc::new(AtomicUsize::new(0));
        let second_count = Arc::new(AtomicUsize::new(0));

        let c = first_count.clone();
        module.call(OP_INIT, &[HostValue::Function(host_function(move |_| { c.fetch_add(1, Ordering::SeqCst); Ok(vec![]) }))]);
        let c = second_count.clone();
        module.call(OP_INIT, &[HostValue::Function(host_function(move |_| { c.fetch_add(1, Ordering::SeqCst); Ok(vec![]) }))]);

        let session = create(&module, 1, vec![1.into()]);
        module.call(OP_SEND, &[session.clone(), "a".into()]);
        module.call(OP_SEND, &[session.clone(), "b".into()]);
        module.call(OP_UPDATE, &[session, 10.into()]);

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_output_before_init_is_dropped() {
        let module = scripted_module();
        assert!(!module.is_output_registered());

        let session = create(&module, 1, vec![1.into()]);
        module.call(OP_SEND, &[session.clone(), "lost".into()]);
        assert_eq!(module.call(OP_FLUSH, &[session.clone()]), vec![]);

        let recorder = RecordingHostFunction::new();
        module.init_output_callback(recorder.clone());
        module.call(OP_SEND, &[session.clone(), "kept".into()]);
        module.call(OP_FLUSH, &[session]);

        let calls = recorder.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][1], HostValue::from("kept"));
    }

    #[test]
    fn test_finalizer_is_installed() {
        let module = scripted_module();
        let session = create(&module, 1, vec![]);

        let finalizer = module.finalizer();
        assert_eq!(finalizer(&module, &[session.clone()]).unwrap(), vec![]);
        assert_eq!(finalizer(&module, &[session.clone()]).unwrap(), vec![]);
        match &session {
            HostValue::Session(s) => assert!(s.is_released()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_module_init_is_idempotent() {
        let a = module_init();
        let b = module_init();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.staging_buffer().capacity(), 2000);
    }
}
