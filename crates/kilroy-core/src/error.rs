use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilroyError {
    #[error("invalid configuration document '{origin}': {reason}")]
    Config { origin: String, reason: String },

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("protocol already exists: {0}")]
    ProtocolExists(String),

    #[error("duration {value} s is out of range: must be below {limit} s")]
    Range { value: u64, limit: u64 },

    #[error("hyperprotocol index {index} out of range ({count} loaded)")]
    HyperprotocolIndex { index: usize, count: usize },

    #[error("hyperprotocol not found: {0}")]
    HyperprotocolNotFound(String),

    #[error("hyperprotocol '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no completion for '{protocol}' ({overdue_secs} s past its expected end)")]
    Desync { protocol: String, overdue_secs: u64 },

    #[error("hybe list is empty")]
    EmptyHybeList,

    #[error("invalid hybe list token '{0}': expected an integer or a range like 3-7")]
    InvalidHybeList(String),

    #[error("invalid name '{0}': must be non-empty and contain no path separators")]
    InvalidName(String),

    #[error("executor failed to start '{protocol}': {reason}")]
    Executor { protocol: String, reason: String },

    #[error("failed to render document: {0}")]
    Render(String),

    #[error("runner session closed")]
    SessionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl KilroyError {
    pub(crate) fn config(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        KilroyError::Config {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KilroyError>;
