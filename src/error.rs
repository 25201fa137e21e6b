//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Launcher error carrying a machine-readable kind and a string payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance not found in the registry
    InstanceNotFound,
    /// An instance with the same name is already registered
    InstanceExists,
    /// Instance is currently running
    InstanceRunning,
    /// Source checkout of an Odoo version failed
    FetchFailed,
    /// Isolated Python environment could not be created
    EnvironmentCreateFailed,
    /// Dependency installation failed (soft, never escapes the provisioner)
    DependencyInstallFailed,
    /// Downloaded PostgreSQL archive lacks the expected executables
    InvalidEngineArchive,
    /// No PostgreSQL distribution could be found or provisioned
    EngineUnavailable,
    /// PostgreSQL initialisation or start failed
    EngineStartFailed,
    /// Dedicated database role could not be created (soft)
    RoleCreationFailed,
    /// Every port in the scanned range is in use
    NoPortAvailable,
    /// Port is occupied at launch time
    PortOccupied,
    /// Setup was stopped between phases
    Cancelled,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Process error
    Process,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InstanceNotFound => 1001,
            Self::InstanceExists => 1002,
            Self::InstanceRunning => 1003,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::FetchFailed => 3001,
            Self::EnvironmentCreateFailed => 3002,
            Self::DependencyInstallFailed => 3003,
            Self::InvalidEngineArchive => 4001,
            Self::EngineUnavailable => 4002,
            Self::EngineStartFailed => 4003,
            Self::RoleCreationFailed => 4004,
            Self::NoPortAvailable => 5001,
            Self::PortOccupied => 5002,
            Self::Process => 5003,
            Self::Cancelled => 6001,
            Self::Other => 9999,
        }
    }

    /// Soft kinds are logged and absorbed by the component that raised them.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::DependencyInstallFailed | Self::RoleCreationFailed
        )
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn instance_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn instance_exists(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceExists,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn instance_running(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceRunning,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn fetch_failed(version: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::FetchFailed,
            HashMap::from([
                ("version".to_string(), version.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn environment_create_failed(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::EnvironmentCreateFailed, detail)
    }

    pub fn dependency_install_failed(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::DependencyInstallFailed, detail)
    }

    pub fn invalid_engine_archive(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidEngineArchive, detail)
    }

    pub fn engine_unavailable(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::EngineUnavailable, detail)
    }

    pub fn engine_start_failed(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::EngineStartFailed, detail)
    }

    pub fn role_creation_failed(role: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RoleCreationFailed,
            HashMap::from([
                ("role".to_string(), role.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn no_port_available(start: u16, end: u16) -> Self {
        Self::new(
            ErrorKind::NoPortAvailable,
            HashMap::from([
                ("start".to_string(), start.to_string()),
                ("end".to_string(), end.to_string()),
            ]),
        )
    }

    pub fn port_occupied(port: u16) -> Self {
        Self::new(
            ErrorKind::PortOccupied,
            HashMap::from([("port".to_string(), port.to_string())]),
        )
    }

    pub fn cancelled(phase: &str) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            HashMap::from([("phase".to_string(), phase.to_string())]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 3)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::invalid_engine_archive(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
