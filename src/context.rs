//! Context values are attached to a session when it is created, and they are replayed to the
//!  host's output function - in their original order - with every datagram the session emits.
//!  They are how the host tells sessions apart in its single output function.

use bytes::Bytes;

use crate::error::{BindingError, BindingResult};
use crate::host::{HostTable, HostValue};


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContextValue {
    Integer(i32),
    /// length-exact, may contain zero bytes
    Bytes(Bytes),
}

impl ContextValue {
    pub fn to_host_value(&self) -> HostValue {
        match self {
            ContextValue::Integer(v) => HostValue::Integer((*v).into()),
            ContextValue::Bytes(b) => HostValue::Bytes(b.clone()),
        }
    }
}


/// Append-only, iteration order is insertion order. A context list belongs to exactly one
///  session.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ContextList {
    entries: Vec<ContextValue>,
}

impl ContextList {
    pub fn new() -> ContextList {
        ContextList::default()
    }

    /// Copies every entry of a host collection: integers by value, byte strings by deep copy of
    ///  exactly their length. Entries of any other type are rejected.
    ///
    /// `arg_position` is the position of the collection in the host call, for error reporting.
    pub fn from_host_table(values: &HostTable, arg_position: usize) -> BindingResult<ContextList> {
        let mut result = ContextList::new();
        result.entries.try_reserve_exact(values.len())
            .map_err(|e| BindingError::Creation(format!("no memory for context values: {}", e)))?;

        for value in values.iter() {
            match value {
                HostValue::Integer(v) => {
                    let v = i32::try_from(*v)
                        .map_err(|_| BindingError::bad_argument(arg_position, "table of 32 bit integers or byte strings"))?;
                    result.push(ContextValue::Integer(v));
                }
                HostValue::Bytes(b) => {
                    // deep copy: the host's buffer must not be shared with the session
                    result.push(ContextValue::Bytes(Bytes::copy_from_slice(b)));
                }
                _ => return Err(BindingError::bad_argument(arg_position, "table of 32 bit integers or byte strings")),
            }
        }
        Ok(result)
    }

    pub fn push(&mut self, value: ContextValue) {
        self.entries.push(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextValue> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// builds a fresh host collection with the entries at positions 1..=len, in insertion order
    pub fn to_host_table(&self) -> HostTable {
        let mut table = HostTable::with_capacity(self.entries.len());
        for entry in &self.entries {
            table.push(entry.to_host_value());
        }
        table
    }
}
