//! Typed connection and transport options.
//!
//! Every option is identified by a name and declares the type of value it
//! accepts. [`OptionKey<T>`] carries that type statically; the dynamic path
//! ([`OptionValue`] keyed by name) is checked against the same declarations,
//! so a value of the wrong type is rejected before anything is changed.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::ClientError;

/// Type tag of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    U32,
    Duration,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Bool => "bool",
            ValueKind::U32 => "u32",
            ValueKind::Duration => "duration",
            ValueKind::Text => "text",
        })
    }
}

/// A dynamically typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    U32(u32),
    Duration(Duration),
    Text(String),
}

impl OptionValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            OptionValue::Bool(_) => ValueKind::Bool,
            OptionValue::U32(_) => ValueKind::U32,
            OptionValue::Duration(_) => ValueKind::Duration,
            OptionValue::Text(_) => ValueKind::Text,
        }
    }
}

/// Rust types usable as option values.
pub trait OptionType: Sized {
    const KIND: ValueKind;

    fn into_value(self) -> OptionValue;

    fn from_value(value: OptionValue) -> Option<Self>;
}

impl OptionType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn into_value(self) -> OptionValue {
        OptionValue::Bool(self)
    }

    fn from_value(value: OptionValue) -> Option<Self> {
        match value {
            OptionValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl OptionType for u32 {
    const KIND: ValueKind = ValueKind::U32;

    fn into_value(self) -> OptionValue {
        OptionValue::U32(self)
    }

    fn from_value(value: OptionValue) -> Option<Self> {
        match value {
            OptionValue::U32(v) => Some(v),
            _ => None,
        }
    }
}

impl OptionType for Duration {
    const KIND: ValueKind = ValueKind::Duration;

    fn into_value(self) -> OptionValue {
        OptionValue::Duration(self)
    }

    fn from_value(value: OptionValue) -> Option<Self> {
        match value {
            OptionValue::Duration(v) => Some(v),
            _ => None,
        }
    }
}

impl OptionType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn into_value(self) -> OptionValue {
        OptionValue::Text(self)
    }

    fn from_value(value: OptionValue) -> Option<Self> {
        match value {
            OptionValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Where an option lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionLevel {
    /// Held by the connection itself.
    Connection,
    /// Passed through to the transport.
    Transport,
}

/// A named option with a statically known value type.
pub struct OptionKey<T> {
    name: &'static str,
    level: OptionLevel,
    _type: PhantomData<fn() -> T>,
}

impl<T: OptionType> OptionKey<T> {
    pub const fn connection(name: &'static str) -> Self {
        Self {
            name,
            level: OptionLevel::Connection,
            _type: PhantomData,
        }
    }

    pub const fn transport(name: &'static str) -> Self {
        Self {
            name,
            level: OptionLevel::Transport,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn level(&self) -> OptionLevel {
        self.level
    }

    pub fn kind(&self) -> ValueKind {
        T::KIND
    }
}

// Manual impls: the derive would require `T: Clone`.
impl<T> Clone for OptionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OptionKey<T> {}

impl<T> fmt::Debug for OptionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionKey")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// Built-in option catalog.
pub mod options {
    use std::time::Duration;

    use super::OptionKey;

    /// Allow more than one request in flight. Read by the pipeliner.
    pub const PIPELINING: OptionKey<bool> = OptionKey::connection("pipelining");
    /// Disable Nagle's algorithm.
    pub const TCP_NODELAY: OptionKey<bool> = OptionKey::transport("tcp_nodelay");
    /// Enable TCP keepalive probes.
    pub const KEEP_ALIVE: OptionKey<bool> = OptionKey::transport("keep_alive");
    /// Socket receive buffer size in bytes.
    pub const RECV_BUFFER_SIZE: OptionKey<u32> = OptionKey::transport("recv_buffer_size");
    /// Socket send buffer size in bytes.
    pub const SEND_BUFFER_SIZE: OptionKey<u32> = OptionKey::transport("send_buffer_size");
    pub const READ_TIMEOUT: OptionKey<Duration> = OptionKey::transport("read_timeout");
    pub const WRITE_TIMEOUT: OptionKey<Duration> = OptionKey::transport("write_timeout");
}

#[derive(Debug, Clone, Copy)]
struct Declaration {
    kind: ValueKind,
    level: OptionLevel,
}

/// Declared options and the values of connection-level ones.
#[derive(Debug)]
pub struct OptionRegistry {
    declared: HashMap<&'static str, Declaration>,
    values: HashMap<&'static str, OptionValue>,
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionRegistry {
    /// A registry holding the built-in catalog.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.declare(&options::PIPELINING);
        registry.declare(&options::TCP_NODELAY);
        registry.declare(&options::KEEP_ALIVE);
        registry.declare(&options::RECV_BUFFER_SIZE);
        registry.declare(&options::SEND_BUFFER_SIZE);
        registry.declare(&options::READ_TIMEOUT);
        registry.declare(&options::WRITE_TIMEOUT);
        registry
    }

    pub fn empty() -> Self {
        Self {
            declared: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Declare an option. Redeclaring a name replaces its declaration.
    pub fn declare<T: OptionType>(&mut self, key: &OptionKey<T>) {
        self.declared.insert(
            key.name,
            Declaration {
                kind: T::KIND,
                level: key.level,
            },
        );
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    /// Level of a declared option.
    pub fn level(&self, name: &str) -> Option<OptionLevel> {
        self.declared.get(name).map(|d| d.level)
    }

    /// Check that `kind` is acceptable for `name`. No side effects.
    pub fn check(&self, name: &str, kind: ValueKind) -> Result<OptionLevel, ClientError> {
        let decl = self
            .declared
            .get(name)
            .ok_or_else(|| ClientError::UnsupportedOption(name.to_string()))?;
        if decl.kind != kind {
            return Err(ClientError::OptionTypeMismatch {
                name: name.to_string(),
                expected: decl.kind,
                actual: kind,
            });
        }
        Ok(decl.level)
    }

    /// Current value of a connection-level option.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Store a connection-level value, returning the previous one.
    pub fn set(
        &mut self,
        name: &str,
        value: OptionValue,
    ) -> Result<Option<OptionValue>, ClientError> {
        self.check(name, value.kind())?;
        // `check` succeeded, so the name is declared and has a static key.
        let (&key, _) = self
            .declared
            .get_key_value(name)
            .ok_or_else(|| ClientError::UnsupportedOption(name.to_string()))?;
        Ok(self.values.insert(key, value))
    }

    /// Typed read of a connection-level option.
    pub fn get_typed<T: OptionType>(&self, key: &OptionKey<T>) -> Option<T> {
        self.values
            .get(key.name)
            .cloned()
            .and_then(T::from_value)
    }
}
