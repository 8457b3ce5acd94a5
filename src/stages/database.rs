//! Sink that appends payload bytes to a remote large object addressed through
//! the EAV schema.
//!
//! Configuration registers the entity (with a remote-file attribute), creates
//! a fresh remote file, creates a new entity and stores the file id under the
//! configured attribute. Every payload is then written in its own transaction.

use super::encode::Encode;
use crate::config::StageParameters;
use crate::error::{ConfigurationError, Result};
use crate::parameterized::{
    ParameterSet, ParameterSpec, ParameterState, Parameterized, StateCell, StateWatcher,
};
use crate::stage::{Ack, Capability, Stage};
use crate::store::{
    Database, EavRegistry, EntityId, FileOpenMode, RemoteFile, RemoteFileId, Session,
    SqlDataType, SqlValue, StoreError,
};
use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keys accepted by [`DbWriteStage`], all required
pub const DB_PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec {
        key: "login",
        description: "Database user name",
    },
    ParameterSpec {
        key: "password",
        description: "Database user password",
    },
    ParameterSpec {
        key: "ip",
        description: "Database host address",
    },
    ParameterSpec {
        key: "port",
        description: "Database port",
    },
    ParameterSpec {
        key: "db",
        description: "Database name",
    },
    ParameterSpec {
        key: "entityName",
        description: "Name of the stored entity",
    },
    ParameterSpec {
        key: "attributeName",
        description: "Name of the entity attribute holding the data",
    },
];

const HELP: &str = "Login, password, host address, port and database name are the usual \
connection parameters, the same ones psql asks for.\n\
An entity is any object that has attributes: a \"user\" entity may have \"name\" and \
\"address\" attributes, a \"result\" entity may have a \"data\" attribute.\n\
Each configuration creates a new entity instance whose attribute points at a fresh \
remote file receiving the pipeline data.";

/// Validated connection and target settings for a database sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub login: String,
    pub password: String,
    pub ip: String,
    pub port: u16,
    pub db: String,
    pub entity_name: String,
    pub attribute_name: String,
}

impl DbSettings {
    pub fn from_parameters(params: &ParameterSet) -> std::result::Result<Self, ConfigurationError> {
        let missing = params.missing();
        if let Some(first) = missing.first() {
            return Err(ConfigurationError::MissingParameter(first.to_string()));
        }

        let port = params.require("port")?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigurationError::InvalidParameter {
                key: "port".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            login: params.require("login")?.to_string(),
            password: params.require("password")?.to_string(),
            ip: params.require("ip")?.to_string(),
            port,
            db: params.require("db")?.to_string(),
            entity_name: params.require("entityName")?.to_string(),
            attribute_name: params.require("attributeName")?.to_string(),
        })
    }

    /// Flat key/value form, as stored in a pipeline config file
    pub fn to_parameters(&self) -> StageParameters {
        [
            ("login", self.login.clone()),
            ("password", self.password.clone()),
            ("ip", self.ip.clone()),
            ("port", self.port.to_string()),
            ("db", self.db.clone()),
            ("entityName", self.entity_name.clone()),
            ("attributeName", self.attribute_name.clone()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    pub fn connection_info(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.login, self.password, self.ip, self.port, self.db
        )
    }

    /// Connection string with the password masked, for diagnostics
    pub fn redacted_connection_info(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.login, self.ip, self.port, self.db
        )
    }
}

// Field order matters: the file handle is released before its session.
struct SinkResource {
    file: Box<dyn RemoteFile>,
    session: Box<dyn Session>,
    entity_id: EntityId,
    settings: DbSettings,
}

/// Transactional database sink
pub struct DbWriteStage<T> {
    name: String,
    database: Arc<dyn Database>,
    params: ParameterSet,
    state: StateCell,
    register_schema: bool,
    resource: Option<SinkResource>,
    buffer: Vec<u8>,
    _payload: PhantomData<fn(T)>,
}

impl<T: Encode + Send + 'static> DbWriteStage<T> {
    /// Unconfigured sink named after its payload type, e.g. `i32ToDatabase`
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            name: Self::default_name(),
            database,
            params: ParameterSet::new(DB_PARAMETERS),
            state: StateCell::new(),
            register_schema: true,
            resource: None,
            buffer: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Sink with its parameters filled in; `apply_parameters` is still required
    pub fn with_settings(database: Arc<dyn Database>, settings: &DbSettings) -> Self {
        let mut stage = Self::new(database);
        for (key, value) in settings.to_parameters() {
            stage.params.set(&key, value);
        }
        stage
    }

    pub fn default_name() -> String {
        format!("{}ToDatabase", short_type_name(type_name::<T>()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Skip entity registration, for schemas managed elsewhere
    pub fn without_schema_registration(mut self) -> Self {
        self.register_schema = false;
        self
    }

    /// Readiness handle that stays valid after the stage is started
    pub fn watch(&self) -> StateWatcher {
        self.state.watch()
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.resource.as_ref().map(|res| res.entity_id)
    }

    pub fn remote_file_id(&self) -> Option<RemoteFileId> {
        self.resource.as_ref().map(|res| res.file.id())
    }

    /// Start a new entity backed by a fresh remote file on the open session.
    ///
    /// Later payloads go to the new file; the previous entity and its data stay in the store.
    pub fn reset_file(&mut self) -> std::result::Result<RemoteFileId, ConfigurationError> {
        let Some(resource) = self.resource.as_mut() else {
            return Err(ConfigurationError::Resource(format!(
                "stage '{}' is not configured",
                self.name
            )));
        };

        let (file, entity_id) = Self::new_target(resource.session.as_mut(), &resource.settings)
            .map_err(|e| ConfigurationError::Resource(e.to_string()))?;
        resource.file.close();
        resource.file = file;
        resource.entity_id = entity_id;

        let file_id = resource.file.id();
        info!(stage = %self.name, entity_id, file_id, "remote file reset");
        Ok(file_id)
    }

    fn release(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.file.close();
            debug!(stage = %self.name, entity_id = resource.entity_id, "downstream resource released");
        }
        self.state.set(ParameterState::Unconfigured);
    }

    fn open(&self, settings: &DbSettings) -> std::result::Result<SinkResource, StoreError> {
        let mut session = self.database.open_session(&settings.connection_info())?;
        if !session.is_valid() {
            return Err(StoreError::new(format!(
                "Bad connection info: \"{}\"",
                settings.redacted_connection_info()
            )));
        }

        if self.register_schema {
            let mut entries = EavRegistry::new();
            entries.insert(
                settings.entity_name.clone(),
                vec![SqlDataType::RemoteFileId],
            );
            session.eav().set_registered_entities(&entries, true)?;
        }

        let (file, entity_id) = Self::new_target(session.as_mut(), settings)?;
        Ok(SinkResource {
            file,
            session,
            entity_id,
            settings: settings.clone(),
        })
    }

    /// Create a remote file and a new entity pointing at it
    fn new_target(
        session: &mut dyn Session,
        settings: &DbSettings,
    ) -> std::result::Result<(Box<dyn RemoteFile>, EntityId), StoreError> {
        let file = session.create_remote_file()?;
        let file_id = file.id();
        match Self::attach_file(session, settings, file_id) {
            Ok(entity_id) => Ok((file, entity_id)),
            Err(e) => {
                if let Err(cleanup) = session.delete_remote_file(file_id) {
                    warn!(file_id, error = %cleanup, "failed to remove orphaned remote file");
                }
                Err(e)
            }
        }
    }

    fn attach_file(
        session: &mut dyn Session,
        settings: &DbSettings,
        file_id: RemoteFileId,
    ) -> std::result::Result<EntityId, StoreError> {
        let eav = session.eav();
        let entity_id = eav.create_new_entity(&settings.entity_name)?;
        eav.insert(
            &settings.entity_name,
            entity_id,
            &settings.attribute_name,
            &SqlValue::RemoteFileId(file_id),
        )?;
        Ok(entity_id)
    }

    fn write(&mut self, payload: &T) -> Ack {
        let Some(resource) = self.resource.as_mut() else {
            debug!(stage = %self.name, "payload rejected, stage not configured");
            return Ack::Fail;
        };

        if let Err(e) = resource.session.begin_transaction() {
            warn!(stage = %self.name, error = %e, "begin transaction failed");
            return Ack::Retry;
        }

        self.buffer.clear();
        payload.encode(&mut self.buffer);

        let written = resource
            .file
            .open(FileOpenMode::Append)
            .and_then(|_| resource.file.write_bytes(&self.buffer));
        resource.file.close();

        let outcome = written.and_then(|_| resource.session.commit_transaction());
        let Err(e) = outcome else {
            return Ack::Ok;
        };
        warn!(stage = %self.name, error = %e, "write failed, rolling back");
        let rolled_back = resource.session.rollback_transaction();
        match rolled_back {
            Ok(()) => Ack::Retry,
            Err(rollback) => {
                // The session may still hold the open transaction
                warn!(stage = %self.name, error = %rollback, "rollback failed, releasing session");
                self.release();
                Ack::Fail
            }
        }
    }
}

impl<T: Encode + Send + 'static> Parameterized for DbWriteStage<T> {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn help(&self) -> &str {
        HELP
    }

    fn apply_parameters(&mut self) -> std::result::Result<(), ConfigurationError> {
        if self.resource.is_some() {
            info!(stage = %self.name, "reconfiguring, releasing previous resource");
        }
        self.release();

        let settings = DbSettings::from_parameters(&self.params)?;
        self.state.set(ParameterState::Configuring);

        match self.open(&settings) {
            Ok(resource) => {
                info!(
                    stage = %self.name,
                    target = %settings.redacted_connection_info(),
                    entity = %settings.entity_name,
                    entity_id = resource.entity_id,
                    "parameters applied"
                );
                self.resource = Some(resource);
                self.state.set(ParameterState::Ready);
                Ok(())
            }
            Err(e) => {
                self.state.set(ParameterState::Unconfigured);
                Err(ConfigurationError::Resource(e.to_string()))
            }
        }
    }

    fn state(&self) -> ParameterState {
        self.state.get()
    }
}

impl<T: Encode + Send + 'static> Stage for DbWriteStage<T> {
    type In = T;
    type Out = ();

    const CAPABILITY: Capability = Capability::Consumer;

    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) -> Result<()> {
        if !self.is_ready() {
            warn!(stage = %self.name, "started without parameters, every payload will fail");
        }
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn consume(&mut self, input: &T) -> Ack {
        self.write(input)
    }
}

/// `type_name` output with the module path stripped from every path segment
fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut segment = 0;
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            short.truncate(segment);
        } else {
            short.push(c);
            if !(c.is_alphanumeric() || c == '_') {
                segment = short.len();
            }
        }
    }
    short
}
