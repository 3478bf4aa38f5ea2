//! The surface of the embedding host runtime, as far as the binding needs it: a small set of
//!  host values, ordered collections with 1-based positions, and host-callable functions.
//!
//! The actual interpreter is out of scope - an embedding translates between its own value
//!  representation and [HostValue] at the boundary, and wraps its callables as [HostFunction].

use bytes::Bytes;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
#[cfg(test)] use mockall::automock;

use crate::session::SessionHandle;


/// A value as it crosses the host boundary
#[derive(Clone)]
pub enum HostValue {
    Nil,
    Integer(i64),
    /// length-exact byte string, may contain zero bytes
    Bytes(Bytes),
    Table(HostTable),
    Function(Arc<dyn HostFunction>),
    Session(SessionHandle),
}

impl HostValue {
    pub fn bytes(data: &[u8]) -> HostValue {
        HostValue::Bytes(Bytes::copy_from_slice(data))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Integer(_) => "integer",
            HostValue::Bytes(_) => "bytes",
            HostValue::Table(_) => "table",
            HostValue::Function(_) => "function",
            HostValue::Session(_) => "session",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HostValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }
}

impl Debug for HostValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HostValue::Nil => write!(f, "nil"),
            HostValue::Integer(v) => write!(f, "{}", v),
            HostValue::Bytes(b) => write!(f, "{:?}", b),
            HostValue::Table(t) => t.fmt(f),
            HostValue::Function(_) => write!(f, "function"),
            HostValue::Session(s) => s.fmt(f),
        }
    }
}

/// NB: functions and sessions compare by identity
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Integer(a), HostValue::Integer(b)) => a == b,
            (HostValue::Bytes(a), HostValue::Bytes(b)) => a == b,
            (HostValue::Table(a), HostValue::Table(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => Arc::ptr_eq(a, b),
            (HostValue::Session(a), HostValue::Session(b)) => a.same_session(b),
            _ => false,
        }
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Integer(value)
    }
}
impl From<&[u8]> for HostValue {
    fn from(value: &[u8]) -> Self {
        HostValue::bytes(value)
    }
}
impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::bytes(value.as_bytes())
    }
}
impl From<Bytes> for HostValue {
    fn from(value: Bytes) -> Self {
        HostValue::Bytes(value)
    }
}
impl From<HostTable> for HostValue {
    fn from(value: HostTable) -> Self {
        HostValue::Table(value)
    }
}
impl From<SessionHandle> for HostValue {
    fn from(value: SessionHandle) -> Self {
        HostValue::Session(value)
    }
}


/// An ordered host collection. Positions are 1-based, the way the host addresses them.
#[derive(Clone, Default, PartialEq)]
pub struct HostTable {
    entries: Vec<HostValue>,
}

impl HostTable {
    pub fn new() -> HostTable {
        HostTable::default()
    }

    pub fn with_capacity(capacity: usize) -> HostTable {
        HostTable {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// append at position `len() + 1`
    pub fn push(&mut self, value: HostValue) {
        self.entries.push(value);
    }

    /// returns the value at a 1-based position
    pub fn get(&self, position: usize) -> Option<&HostValue> {
        position.checked_sub(1)
            .and_then(|idx| self.entries.get(idx))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostValue> {
        self.entries.iter()
    }
}

impl Debug for HostTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl From<Vec<HostValue>> for HostTable {
    fn from(entries: Vec<HostValue>) -> Self {
        HostTable { entries }
    }
}

impl FromIterator<HostValue> for HostTable {
    fn from_iter<T: IntoIterator<Item = HostValue>>(iter: T) -> Self {
        HostTable {
            entries: iter.into_iter().collect(),
        }
    }
}


/// A function living in the host that the binding can call synchronously. The call may
///  re-enter the binding.
#[cfg_attr(test, automock)]
pub trait HostFunction: Send + Sync + 'static {
    fn call(&self, args: Vec<HostValue>) -> anyhow::Result<Vec<HostValue>>;
}

struct ClosureFunction<F> {
    f: F,
}

impl<F> HostFunction for ClosureFunction<F>
where F: Fn(Vec<HostValue>) -> anyhow::Result<Vec<HostValue>> + Send + Sync + 'static
{
    fn call(&self, args: Vec<HostValue>) -> anyhow::Result<Vec<HostValue>> {
        (self.f)(args)
    }
}

/// wrap a closure as a host function
pub fn host_function<F>(f: F) -> Arc<dyn HostFunction>
where F: Fn(Vec<HostValue>) -> anyhow::Result<Vec<HostValue>> + Send + Sync + 'static
{
    Arc::new(ClosureFunction { f })
}
