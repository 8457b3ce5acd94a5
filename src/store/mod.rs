//! Abstract contract of the database collaborator.
//!
//! Pipeline stages only see these traits: a [`Database`] opens
//! [`Session`]s, a session runs queries and transactions, manages remote
//! large objects ([`RemoteFile`]) and exposes the entity-attribute-value
//! executor ([`ExecutorEav`]). Steady-state calls report failure through
//! [`Status`]; nothing here panics.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use memory::{Fault, MemoryDatabase, MemoryStats};

/// Error reported by the collaborator, carrying its message verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Ok / Error outcome of a collaborator call
pub type Status = Result<(), StoreError>;

/// Numeric id of one entity within its entity table
pub type EntityId = i64;

/// Id of a remote large object
pub type RemoteFileId = u64;

/// Attribute types an entity can register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SqlDataType {
    Integer,
    Text,
    Bytes,
    RemoteFileId,
}

impl fmt::Display for SqlDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDataType::Integer => "integer",
            SqlDataType::Text => "text",
            SqlDataType::Bytes => "bytea",
            SqlDataType::RemoteFileId => "oid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    RemoteFileId(RemoteFileId),
}

impl SqlValue {
    pub fn data_type(&self) -> SqlDataType {
        match self {
            SqlValue::Integer(_) => SqlDataType::Integer,
            SqlValue::Text(_) => SqlDataType::Text,
            SqlValue::Bytes(_) => SqlDataType::Bytes,
            SqlValue::RemoteFileId(_) => SqlDataType::RemoteFileId,
        }
    }
}

/// Entity name -> attribute types it uses
pub type EavRegistry = BTreeMap<String, Vec<SqlDataType>>;

/// Attribute name with its value; `None` when the attribute exists but has no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValue {
    pub attribute: String,
    pub value: Option<SqlValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Vec<SqlValue>>,
    pub affected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpenMode {
    Read,
    /// Truncate, then write
    Write,
    Append,
}

/// Entry point: turns a connection string into a live session
pub trait Database: Send + Sync {
    fn open_session(&self, connection_info: &str) -> Result<Box<dyn Session>, StoreError>;
}

/// One live database session. Sessions are not shared between threads.
pub trait Session: Send {
    fn is_valid(&self) -> bool;

    fn execute(&mut self, query: &str) -> Result<QueryResult, StoreError>;

    fn begin_transaction(&mut self) -> Status;

    fn commit_transaction(&mut self) -> Status;

    fn rollback_transaction(&mut self) -> Status;

    fn create_remote_file(&mut self) -> Result<Box<dyn RemoteFile>, StoreError>;

    fn get_remote_file(&mut self, id: RemoteFileId) -> Result<Box<dyn RemoteFile>, StoreError>;

    fn delete_remote_file(&mut self, id: RemoteFileId) -> Status;

    /// EAV executor bound to this session; it never opens or closes transactions itself
    fn eav(&mut self) -> &mut dyn ExecutorEav;
}

/// Byte-stream handle on a remote large object
pub trait RemoteFile: Send {
    fn id(&self) -> RemoteFileId;

    fn open(&mut self, mode: FileOpenMode) -> Status;

    fn write_bytes(&mut self, bytes: &[u8]) -> Status;

    /// Read up to `max` bytes from the current position
    fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>, StoreError>;

    fn close(&mut self);
}

/// Entity-attribute-value operations
pub trait ExecutorEav: Send {
    /// Register entities and the attribute types they use, optionally creating tables
    fn set_registered_entities(&mut self, entries: &EavRegistry, create_tables: bool) -> Status;

    fn registered_entities(&self) -> &EavRegistry;

    fn create_new_entity(&mut self, entity: &str) -> Result<EntityId, StoreError>;

    fn entity_ids(&mut self, entity: &str) -> Result<Vec<EntityId>, StoreError>;

    /// Insert a value; fails if the attribute already has one
    fn insert(&mut self, entity: &str, id: EntityId, attribute: &str, value: &SqlValue) -> Status;

    /// Update an existing value; fails if the attribute has none
    fn update(&mut self, entity: &str, id: EntityId, attribute: &str, value: &SqlValue) -> Status;

    fn insert_or_update(
        &mut self,
        entity: &str,
        id: EntityId,
        attribute: &str,
        value: &SqlValue,
    ) -> Status;

    fn get_value(
        &mut self,
        entity: &str,
        id: EntityId,
        attribute: &str,
        data_type: SqlDataType,
    ) -> Result<Option<SqlValue>, StoreError>;

    fn get_attribute_values(
        &mut self,
        entity: &str,
        id: EntityId,
    ) -> Result<BTreeMap<SqlDataType, Vec<AttrValue>>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(SqlValue::RemoteFileId(3).data_type(), SqlDataType::RemoteFileId);
        assert_eq!(SqlValue::Text("a".into()).data_type(), SqlDataType::Text);
        assert_eq!(SqlDataType::Bytes.to_string(), "bytea");
    }

    #[test]
    fn test_store_error_message() {
        let err = StoreError::new("connection refused");
        assert_eq!(err.message(), "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }
}
