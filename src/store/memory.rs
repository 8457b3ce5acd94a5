//! In-process implementation of the database collaborator.
//!
//! Remote-file writes made inside a transaction are staged per session and
//! become visible only on commit. Every call is counted, and individual
//! operations can be made to fail with [`MemoryDatabase::set_fault`].

use super::{
    AttrValue, Database, EavRegistry, EntityId, ExecutorEav, FileOpenMode, QueryResult,
    RemoteFile, RemoteFileId, Session, SqlDataType, SqlValue, Status, StoreError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// Operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fault {
    Connect,
    Begin,
    Write,
    Commit,
    Rollback,
    RegisterEntities,
    CreateEntity,
    CreateFile,
}

/// Call accounting for a [`MemoryDatabase`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Every call that reached the collaborator
    pub interactions: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    /// Highest number of sessions alive at the same time
    pub peak_live_sessions: u64,
    pub files_created: u64,
    pub files_deleted: u64,
    pub transactions_begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// Bytes made visible by committed or autocommit writes
    pub bytes_written: u64,
}

impl MemoryStats {
    pub fn live_sessions(&self) -> u64 {
        self.sessions_opened - self.sessions_closed
    }
}

enum FileOp {
    Truncate,
    Append(Vec<u8>),
}

type PendingOps = Arc<Mutex<Option<Vec<(RemoteFileId, FileOp)>>>>;

#[derive(Default)]
struct Store {
    faults: BTreeSet<Fault>,
    stats: MemoryStats,
    files: BTreeMap<RemoteFileId, Vec<u8>>,
    next_file_id: RemoteFileId,
    registry: EavRegistry,
    tables: BTreeSet<String>,
    entities: BTreeMap<String, BTreeMap<EntityId, BTreeMap<String, SqlValue>>>,
    next_entity_id: EntityId,
    queries: Vec<String>,
    last_connection_info: Option<String>,
}

impl Store {
    fn touch(&mut self) {
        self.stats.interactions += 1;
    }

    fn check(&mut self, fault: Fault) -> Status {
        self.touch();
        if self.faults.contains(&fault) {
            return Err(StoreError::new(format!("injected {:?} failure", fault)));
        }
        Ok(())
    }

    fn apply(&mut self, id: RemoteFileId, op: FileOp) -> Status {
        let file = self
            .files
            .get_mut(&id)
            .ok_or_else(|| StoreError::new(format!("remote file {} does not exist", id)))?;
        match op {
            FileOp::Truncate => file.clear(),
            FileOp::Append(bytes) => {
                self.stats.bytes_written += bytes.len() as u64;
                file.extend_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn entity_mut(
        &mut self,
        entity: &str,
        id: EntityId,
    ) -> Result<&mut BTreeMap<String, SqlValue>, StoreError> {
        self.entities
            .get_mut(entity)
            .and_then(|table| table.get_mut(&id))
            .ok_or_else(|| StoreError::new(format!("entity {}#{} does not exist", entity, id)))
    }

    fn check_type(&self, entity: &str, data_type: SqlDataType) -> Status {
        match self.registry.get(entity) {
            Some(types) if types.contains(&data_type) => Ok(()),
            Some(_) => Err(StoreError::new(format!(
                "entity '{}' does not use attributes of type {}",
                entity, data_type
            ))),
            None => Err(StoreError::new(format!(
                "entity '{}' is not registered",
                entity
            ))),
        }
    }
}

/// Shared in-memory database; clones observe the same state
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    store: Arc<Mutex<Store>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        let mut store = self.store.lock();
        if enabled {
            store.faults.insert(fault);
        } else {
            store.faults.remove(&fault);
        }
    }

    pub fn clear_faults(&self) {
        self.store.lock().faults.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        self.store.lock().stats
    }

    /// Committed contents of a remote file
    pub fn file_contents(&self, id: RemoteFileId) -> Option<Vec<u8>> {
        self.store.lock().files.get(&id).cloned()
    }

    pub fn file_ids(&self) -> Vec<RemoteFileId> {
        self.store.lock().files.keys().copied().collect()
    }

    pub fn entity_value(&self, entity: &str, id: EntityId, attribute: &str) -> Option<SqlValue> {
        self.store
            .lock()
            .entities
            .get(entity)
            .and_then(|table| table.get(&id))
            .and_then(|attrs| attrs.get(attribute))
            .cloned()
    }

    pub fn has_table(&self, entity: &str) -> bool {
        self.store.lock().tables.contains(entity)
    }

    pub fn last_connection_info(&self) -> Option<String> {
        self.store.lock().last_connection_info.clone()
    }

    pub fn executed_queries(&self) -> Vec<String> {
        self.store.lock().queries.clone()
    }
}

impl Database for MemoryDatabase {
    fn open_session(&self, connection_info: &str) -> Result<Box<dyn Session>, StoreError> {
        let mut store = self.store.lock();
        store.check(Fault::Connect)?;
        store.last_connection_info = Some(connection_info.to_string());
        store.stats.sessions_opened += 1;
        store.stats.peak_live_sessions = store
            .stats
            .peak_live_sessions
            .max(store.stats.live_sessions());
        trace!(sessions = store.stats.live_sessions(), "memory session opened");
        drop(store);

        Ok(Box::new(MemorySession {
            store: Arc::clone(&self.store),
            pending: Arc::new(Mutex::new(None)),
            eav: MemoryEav {
                store: Arc::clone(&self.store),
                registry: EavRegistry::new(),
            },
            valid: !connection_info.trim().is_empty(),
        }))
    }
}

struct MemorySession {
    store: Arc<Mutex<Store>>,
    pending: PendingOps,
    eav: MemoryEav,
    valid: bool,
}

impl MemorySession {
    fn file(&self, id: RemoteFileId) -> Box<dyn RemoteFile> {
        Box::new(MemoryFile {
            id,
            store: Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
            mode: None,
            cursor: 0,
        })
    }
}

impl Session for MemorySession {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn execute(&mut self, query: &str) -> Result<QueryResult, StoreError> {
        let mut store = self.store.lock();
        store.touch();
        store.queries.push(query.to_string());
        Ok(QueryResult::default())
    }

    fn begin_transaction(&mut self) -> Status {
        {
            let mut store = self.store.lock();
            store.check(Fault::Begin)?;
            store.stats.transactions_begun += 1;
        }
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(StoreError::new("transaction already in progress"));
        }
        *pending = Some(Vec::new());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Status {
        let mut pending = self.pending.lock();
        let mut store = self.store.lock();
        store.check(Fault::Commit)?;
        let ops = pending
            .take()
            .ok_or_else(|| StoreError::new("no transaction in progress"))?;
        for (id, op) in ops {
            store.apply(id, op)?;
        }
        store.stats.commits += 1;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Status {
        // Pending work is discarded even when the rollback reports failure
        let discarded = self.pending.lock().take();
        let mut store = self.store.lock();
        store.check(Fault::Rollback)?;
        if discarded.is_none() {
            return Err(StoreError::new("no transaction in progress"));
        }
        store.stats.rollbacks += 1;
        Ok(())
    }

    fn create_remote_file(&mut self) -> Result<Box<dyn RemoteFile>, StoreError> {
        let id = {
            let mut store = self.store.lock();
            store.check(Fault::CreateFile)?;
            store.next_file_id += 1;
            let id = store.next_file_id;
            store.files.insert(id, Vec::new());
            store.stats.files_created += 1;
            id
        };
        Ok(self.file(id))
    }

    fn get_remote_file(&mut self, id: RemoteFileId) -> Result<Box<dyn RemoteFile>, StoreError> {
        {
            let mut store = self.store.lock();
            store.touch();
            if !store.files.contains_key(&id) {
                return Err(StoreError::new(format!("remote file {} does not exist", id)));
            }
        }
        Ok(self.file(id))
    }

    fn delete_remote_file(&mut self, id: RemoteFileId) -> Status {
        let mut store = self.store.lock();
        store.touch();
        if store.files.remove(&id).is_none() {
            return Err(StoreError::new(format!("remote file {} does not exist", id)));
        }
        store.stats.files_deleted += 1;
        Ok(())
    }

    fn eav(&mut self) -> &mut dyn ExecutorEav {
        &mut self.eav
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // Uncommitted work dies with the session
        self.pending.lock().take();
        let mut store = self.store.lock();
        store.stats.sessions_closed += 1;
        trace!(sessions = store.stats.live_sessions(), "memory session closed");
    }
}

struct MemoryFile {
    id: RemoteFileId,
    store: Arc<Mutex<Store>>,
    pending: PendingOps,
    mode: Option<FileOpenMode>,
    cursor: usize,
}

impl MemoryFile {
    fn stage(&self, op: FileOp) -> Status {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(ops) => {
                ops.push((self.id, op));
                Ok(())
            }
            None => self.store.lock().apply(self.id, op),
        }
    }
}

impl RemoteFile for MemoryFile {
    fn id(&self) -> RemoteFileId {
        self.id
    }

    fn open(&mut self, mode: FileOpenMode) -> Status {
        {
            let mut store = self.store.lock();
            store.touch();
            if !store.files.contains_key(&self.id) {
                return Err(StoreError::new(format!(
                    "remote file {} does not exist",
                    self.id
                )));
            }
        }
        if mode == FileOpenMode::Write {
            self.stage(FileOp::Truncate)?;
        }
        self.mode = Some(mode);
        self.cursor = 0;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Status {
        self.store.lock().check(Fault::Write)?;
        match self.mode {
            Some(FileOpenMode::Write) | Some(FileOpenMode::Append) => {
                self.stage(FileOp::Append(bytes.to_vec()))
            }
            Some(FileOpenMode::Read) => Err(StoreError::new("remote file opened read-only")),
            None => Err(StoreError::new("remote file is not open")),
        }
    }

    fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>, StoreError> {
        if self.mode.is_none() {
            return Err(StoreError::new("remote file is not open"));
        }
        let mut store = self.store.lock();
        store.touch();
        let data = store
            .files
            .get(&self.id)
            .ok_or_else(|| StoreError::new(format!("remote file {} does not exist", self.id)))?;
        let start = self.cursor.min(data.len());
        let end = start.saturating_add(max).min(data.len());
        self.cursor = end;
        Ok(data[start..end].to_vec())
    }

    fn close(&mut self) {
        self.mode = None;
    }
}

struct MemoryEav {
    store: Arc<Mutex<Store>>,
    registry: EavRegistry,
}

impl ExecutorEav for MemoryEav {
    fn set_registered_entities(&mut self, entries: &EavRegistry, create_tables: bool) -> Status {
        let mut store = self.store.lock();
        store.check(Fault::RegisterEntities)?;
        for (entity, types) in entries {
            store.registry.insert(entity.clone(), types.clone());
            if create_tables {
                store.tables.insert(entity.clone());
            }
        }
        self.registry = entries.clone();
        Ok(())
    }

    fn registered_entities(&self) -> &EavRegistry {
        &self.registry
    }

    fn create_new_entity(&mut self, entity: &str) -> Result<EntityId, StoreError> {
        let mut store = self.store.lock();
        store.check(Fault::CreateEntity)?;
        if !store.tables.contains(entity) {
            return Err(StoreError::new(format!(
                "no table for entity '{}'",
                entity
            )));
        }
        store.next_entity_id += 1;
        let id = store.next_entity_id;
        store
            .entities
            .entry(entity.to_string())
            .or_default()
            .insert(id, BTreeMap::new());
        Ok(id)
    }

    fn entity_ids(&mut self, entity: &str) -> Result<Vec<EntityId>, StoreError> {
        let mut store = self.store.lock();
        store.touch();
        if !store.tables.contains(entity) {
            return Err(StoreError::new(format!(
                "no table for entity '{}'",
                entity
            )));
        }
        Ok(store
            .entities
            .get(entity)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default())
    }

    fn insert(&mut self, entity: &str, id: EntityId, attribute: &str, value: &SqlValue) -> Status {
        let mut store = self.store.lock();
        store.touch();
        store.check_type(entity, value.data_type())?;
        let attrs = store.entity_mut(entity, id)?;
        if attrs.contains_key(attribute) {
            return Err(StoreError::new(format!(
                "attribute '{}' of {}#{} already has a value",
                attribute, entity, id
            )));
        }
        attrs.insert(attribute.to_string(), value.clone());
        Ok(())
    }

    fn update(&mut self, entity: &str, id: EntityId, attribute: &str, value: &SqlValue) -> Status {
        let mut store = self.store.lock();
        store.touch();
        store.check_type(entity, value.data_type())?;
        let attrs = store.entity_mut(entity, id)?;
        match attrs.get_mut(attribute) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(StoreError::new(format!(
                "attribute '{}' of {}#{} has no value",
                attribute, entity, id
            ))),
        }
    }

    fn insert_or_update(
        &mut self,
        entity: &str,
        id: EntityId,
        attribute: &str,
        value: &SqlValue,
    ) -> Status {
        let mut store = self.store.lock();
        store.touch();
        store.check_type(entity, value.data_type())?;
        store
            .entity_mut(entity, id)?
            .insert(attribute.to_string(), value.clone());
        Ok(())
    }

    fn get_value(
        &mut self,
        entity: &str,
        id: EntityId,
        attribute: &str,
        data_type: SqlDataType,
    ) -> Result<Option<SqlValue>, StoreError> {
        let mut store = self.store.lock();
        store.touch();
        store.check_type(entity, data_type)?;
        match store.entity_mut(entity, id)?.get(attribute) {
            Some(value) if value.data_type() == data_type => Ok(Some(value.clone())),
            Some(value) => Err(StoreError::new(format!(
                "attribute '{}' holds {}, not {}",
                attribute,
                value.data_type(),
                data_type
            ))),
            None => Ok(None),
        }
    }

    fn get_attribute_values(
        &mut self,
        entity: &str,
        id: EntityId,
    ) -> Result<BTreeMap<SqlDataType, Vec<AttrValue>>, StoreError> {
        let mut store = self.store.lock();
        store.touch();
        let mut grouped: BTreeMap<SqlDataType, Vec<AttrValue>> = BTreeMap::new();
        for (attribute, value) in store.entity_mut(entity, id)?.iter() {
            grouped.entry(value.data_type()).or_default().push(AttrValue {
                attribute: attribute.clone(),
                value: Some(value.clone()),
            });
        }
        Ok(grouped)
    }
}
