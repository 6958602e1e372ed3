//! Core types for the record store.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// The fixed set of record classes the store persists.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordClass {
    Person,
    Family,
    Event,
    Place,
    Media,
    Source,
    Citation,
    Repository,
    Note,
    Tag,
}

impl RecordClass {
    /// Every record class, in declaration order.
    pub const ALL: [RecordClass; 10] = [
        RecordClass::Person,
        RecordClass::Family,
        RecordClass::Event,
        RecordClass::Place,
        RecordClass::Media,
        RecordClass::Source,
        RecordClass::Citation,
        RecordClass::Repository,
        RecordClass::Note,
        RecordClass::Tag,
    ];

    /// Name used for tables and signal names.
    pub fn name(self) -> &'static str {
        match self {
            RecordClass::Person => "person",
            RecordClass::Family => "family",
            RecordClass::Event => "event",
            RecordClass::Place => "place",
            RecordClass::Media => "media",
            RecordClass::Source => "source",
            RecordClass::Citation => "citation",
            RecordClass::Repository => "repository",
            RecordClass::Note => "note",
            RecordClass::Tag => "tag",
        }
    }

    /// Secondary indices declared for this class.
    pub fn indices(self) -> &'static [IndexKind] {
        match self {
            RecordClass::Person => &[IndexKind::GrampsId, IndexKind::Surname],
            RecordClass::Tag => &[IndexKind::Name],
            _ => &[IndexKind::GrampsId],
        }
    }

    /// Default pattern for user-facing ids. Tags carry no id.
    pub fn default_id_prefix(self) -> Option<&'static str> {
        match self {
            RecordClass::Person => Some("I%04d"),
            RecordClass::Family => Some("F%04d"),
            RecordClass::Event => Some("E%04d"),
            RecordClass::Place => Some("P%04d"),
            RecordClass::Media => Some("O%04d"),
            RecordClass::Source => Some("S%04d"),
            RecordClass::Citation => Some("C%04d"),
            RecordClass::Repository => Some("R%04d"),
            RecordClass::Note => Some("N%04d"),
            RecordClass::Tag => None,
        }
    }
}

impl fmt::Debug for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordClass {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordClass::ALL
            .into_iter()
            .find(|class| class.name() == s)
            .ok_or_else(|| StoreError::UnknownSignalKey(s.to_string()))
    }
}

/// Opaque unique key of a record within its class.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    pub fn new(value: impl Into<String>) -> Self {
        Handle(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(value: &str) -> Self {
        Handle(value.to_string())
    }
}

impl From<String> for Handle {
    fn from(value: String) -> Self {
        Handle(value)
    }
}

impl Borrow<str> for Handle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The kind of change a signal reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalMethod {
    Add,
    Update,
    Delete,
    Rebuild,
}

impl SignalMethod {
    pub const ALL: [SignalMethod; 4] = [
        SignalMethod::Add,
        SignalMethod::Update,
        SignalMethod::Delete,
        SignalMethod::Rebuild,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            SignalMethod::Add => "add",
            SignalMethod::Update => "update",
            SignalMethod::Delete => "delete",
            SignalMethod::Rebuild => "rebuild",
        }
    }
}

impl FromStr for SignalMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalMethod::ALL
            .into_iter()
            .find(|method| method.suffix() == s)
            .ok_or_else(|| StoreError::UnknownSignalKey(s.to_string()))
    }
}

/// A bus signal name: `<class>-<method>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalKey {
    pub class: RecordClass,
    pub method: SignalMethod,
}

impl SignalKey {
    pub fn new(class: RecordClass, method: SignalMethod) -> Self {
        Self { class, method }
    }

    pub fn add(class: RecordClass) -> Self {
        Self::new(class, SignalMethod::Add)
    }

    pub fn update(class: RecordClass) -> Self {
        Self::new(class, SignalMethod::Update)
    }

    pub fn delete(class: RecordClass) -> Self {
        Self::new(class, SignalMethod::Delete)
    }

    pub fn rebuild(class: RecordClass) -> Self {
        Self::new(class, SignalMethod::Rebuild)
    }
}

impl fmt::Debug for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.class, self.method.suffix())
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.class, self.method.suffix())
    }
}

impl FromStr for SignalKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || StoreError::UnknownSignalKey(s.to_string());
        let (class, method) = s.rsplit_once('-').ok_or_else(unknown)?;
        Ok(SignalKey {
            class: class.parse().map_err(|_| unknown())?,
            method: method.parse().map_err(|_| unknown())?,
        })
    }
}

/// A derived lookup key extracted from record payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKind {
    /// User-facing id such as `I0001`.
    GrampsId,
    /// Person surname.
    Surname,
    /// Tag name.
    Name,
}

impl IndexKind {
    /// Top-level JSON field the key is read from.
    pub fn field(self) -> &'static str {
        match self {
            IndexKind::GrampsId => "gramps_id",
            IndexKind::Surname => "surname",
            IndexKind::Name => "name",
        }
    }

    /// Extract the index key from a payload, if it carries one.
    ///
    /// Payloads that are not JSON objects, or that lack the field, or whose
    /// field is not a non-empty string, yield no key.
    pub fn extract(self, payload: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        match value.get(self.field())? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// Content hash (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Encode a value as a JSON payload.
pub fn json_payload(value: &impl Serialize) -> crate::error::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    /// Records per class, in `RecordClass::ALL` order.
    pub record_counts: Vec<(RecordClass, usize)>,
    pub total_records: usize,
    pub payload_bytes: u64,
    pub undo_depth: usize,
    pub redo_depth: usize,
}
