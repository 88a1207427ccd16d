//! Error types for kgloop

use thiserror::Error;

/// Result type alias using kgloop's Error
pub type Result<T> = std::result::Result<T, Error>;

/// kgloop error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Playbook errors (E001-E099)
    #[error("Artifact '{0}' not found in the playbook. Run `kgloop status` to list artifacts.")]
    ArtifactNotFound(String),

    #[error("Path '{0}' escapes the playbook root")]
    PathEscape(String),

    #[error("Playbook not initialized at '{0}'. Run `kgloop init` first.")]
    PlaybookNotInitialized(String),

    #[error("Version conflict: expected v{expected}, found v{found}")]
    VersionConflict { expected: u32, found: u32 },

    #[error("History record '{0}' already exists")]
    HistoryExists(String),

    // Oracle errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Oracle API error: {0}")]
    OracleError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Oracle request timed out after {0} seconds")]
    OracleTimeout(u64),

    #[error("Oracle unavailable (HTTP {0}): {1}")]
    OracleUnavailable(u16, String),

    #[error("Oracle credential missing. Set KGLOOP_API_KEY or ANTHROPIC_API_KEY.")]
    MissingCredential,

    // Pipeline errors (E200-E299)
    #[error("Module '{0}' is not registered")]
    UnknownModule(String),

    #[error("Module '{module}' failed: {message}")]
    ModuleFailed { module: String, message: String },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidPipeline(String),

    // Lock errors (E300-E399)
    #[error("Lock timeout: '{0}' is held by another writer. Try again later.")]
    LockTimeout(String),

    // Changeset errors (E400-E499)
    #[error("Changeset is malformed ({0}) and cannot be applied")]
    MalformedChangeset(String),

    #[error("Operation '{0}' not found in changeset")]
    OperationNotFound(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArtifactNotFound(_) => "E001",
            Self::PathEscape(_) => "E002",
            Self::PlaybookNotInitialized(_) => "E003",
            Self::VersionConflict { .. } => "E004",
            Self::HistoryExists(_) => "E005",
            Self::NetworkError(_) => "E100",
            Self::OracleError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::OracleTimeout(_) => "E103",
            Self::MissingCredential => "E104",
            Self::OracleUnavailable(..) => "E105",
            Self::UnknownModule(_) => "E200",
            Self::ModuleFailed { .. } => "E201",
            Self::InvalidPipeline(_) => "E202",
            Self::LockTimeout(_) => "E300",
            Self::MalformedChangeset(_) => "E400",
            Self::OperationNotFound(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ArtifactNotFound(_) => Some("kgloop status".to_string()),
            Self::PlaybookNotInitialized(path) => Some(format!("kgloop --playbook {} init", path)),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::MissingCredential => Some("export KGLOOP_API_KEY=<key>".to_string()),
            Self::UnknownModule(_) => Some("Check config/pipeline.json module names".to_string()),
            Self::VersionConflict { .. } => Some("kgloop status".to_string()),
            _ => None,
        }
    }

    /// Whether the failure is worth retrying against the oracle
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::OracleTimeout(_) | Self::OracleUnavailable(..) => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
