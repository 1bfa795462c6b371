use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::ScriptContext;
use crate::error::{ConnectionError, HostError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn from_raw(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// SQL database
    Tabular,
    /// Document store
    Document,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Tabular => "tabular",
            ConnectionKind::Document => "document",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to connect
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub kind: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionSpec {
    pub fn new(kind: ConnectionKind, host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            database: database.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Connection URI handed to the driver
    pub fn uri(&self) -> String {
        self.format_uri(self.password.as_deref())
    }

    /// URI safe for logs
    pub fn redacted_uri(&self) -> String {
        self.format_uri(self.password.as_ref().map(|_| "****"))
    }

    fn format_uri(&self, password: Option<&str>) -> String {
        match self.kind {
            ConnectionKind::Tabular => {
                let mut uri = format!("jdbc:mysql://{}:{}/{}", self.host, self.port, self.database);
                if let Some(username) = &self.username {
                    uri.push_str(&format!("?user={}", username));
                    if let Some(password) = password {
                        uri.push_str(&format!("&password={}", password));
                    }
                }
                uri
            }
            ConnectionKind::Document => {
                let credentials = match (&self.username, password) {
                    (Some(username), Some(password)) => format!("{}:{}@", username, password),
                    (Some(username), None) => format!("{}@", username),
                    _ => String::new(),
                };
                format!(
                    "mongodb://{}{}:{}/{}",
                    credentials, self.host, self.port, self.database
                )
            }
        }
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("kind", &self.kind)
            .field("uri", &self.redacted_uri())
            .finish()
    }
}

/// An open connection owned by one script
pub trait Connection: Send + Sync {
    fn kind(&self) -> ConnectionKind;

    fn is_open(&self) -> bool;

    fn close(&self) -> Result<(), HostError>;
}

/// Database driver collaborator
pub trait ConnectionFactory: Send + Sync + 'static {
    fn open(&self, spec: &ConnectionSpec) -> Result<Arc<dyn Connection>, HostError>;
}

/// Factory used when no database driver is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledConnections;

impl ConnectionFactory for DisabledConnections {
    fn open(&self, spec: &ConnectionSpec) -> Result<Arc<dyn Connection>, HostError> {
        Err(HostError::Unavailable(format!(
            "no {} database driver is configured",
            spec.kind
        )))
    }
}

type Owned = BTreeMap<ConnectionId, Arc<dyn Connection>>;

pub struct ConnectionRegistry {
    factory: Arc<dyn ConnectionFactory>,
    connections: Mutex<HashMap<String, Owned>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a connection on behalf of `script`
    pub fn connect(&self, script: &ScriptContext, spec: &ConnectionSpec) -> Result<ConnectionId, ConnectionError> {
        if !script.is_accepting() {
            return Err(ConnectionError::ScriptNotRunning(script.name().to_string()));
        }

        let connection = self.factory.open(spec).map_err(|source| {
            script.logger().error(&format!(
                "Failed to open a connection to the {} database. URI: {}",
                spec.kind,
                spec.redacted_uri()
            ));
            ConnectionError::Open {
                kind: spec.kind.to_string(),
                uri: spec.redacted_uri(),
                source,
            }
        })?;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut connections = self.connections.lock();
            if !script.is_accepting() {
                drop(connections);
                // unload started while the driver was connecting
                self.close(script, id, connection.as_ref());
                return Err(ConnectionError::ScriptNotRunning(script.name().to_string()));
            }
            connections
                .entry(script.name().to_string())
                .or_default()
                .insert(id, connection);
        }
        script.with_resources(|resources| resources.connections.insert(id));
        tracing::debug!(
            target: "scripting",
            script = script.name(),
            connection = %id,
            uri = spec.redacted_uri().as_str(),
            "Opened connection"
        );
        Ok(id)
    }

    /// Close one connection. Returns whether it closed cleanly.
    pub fn disconnect(&self, script: &ScriptContext, id: ConnectionId) -> Result<bool, ConnectionError> {
        let connection = {
            let mut connections = self.connections.lock();
            let owned = connections.get_mut(script.name());
            let connection = owned.and_then(|owned| owned.remove(&id));
            if connections.get(script.name()).is_some_and(BTreeMap::is_empty) {
                connections.remove(script.name());
            }
            connection.ok_or(ConnectionError::NotFound(id.0))?
        };
        Ok(self.close(script, id, connection.as_ref()))
    }

    /// Close every connection `script` owns. Returns whether all of them
    /// closed cleanly.
    pub fn disconnect_all(&self, script: &ScriptContext) -> bool {
        let owned = self.connections.lock().remove(script.name()).unwrap_or_default();
        let mut clean = true;
        for (id, connection) in owned {
            clean &= self.close(script, id, connection.as_ref());
        }
        clean
    }

    /// Connections owned by `script`, optionally only those of `kind`
    pub fn connections(
        &self,
        script: &str,
        kind: Option<ConnectionKind>,
    ) -> Vec<(ConnectionId, Arc<dyn Connection>)> {
        self.connections
            .lock()
            .get(script)
            .map(|owned| {
                owned
                    .iter()
                    .filter(|(_, connection)| kind.map_or(true, |kind| connection.kind() == kind))
                    .map(|(id, connection)| (*id, Arc::clone(connection)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connection(&self, script: &str, id: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.lock().get(script)?.get(&id).cloned()
    }

    fn close(&self, script: &ScriptContext, id: ConnectionId, connection: &dyn Connection) -> bool {
        script.with_resources(|resources| resources.connections.remove(&id));
        match connection.close() {
            Ok(()) => true,
            Err(e) => {
                script
                    .logger()
                    .warn(&format!("Failed to close {} {}: {}", connection.kind(), id, e));
                false
            }
        }
    }
}
