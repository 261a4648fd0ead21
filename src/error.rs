use thiserror::Error;

#[derive(Error, Debug)]
pub enum KitError {
    #[error("Map {0} is declared more than once")]
    DuplicateMap(String),

    #[error("Probe {0} is declared more than once")]
    DuplicateProbe(String),

    #[error("Dispatch table {table} already routes key {key}")]
    DuplicateTailCallKey { table: String, key: u32 },

    #[error("Dispatch table {table} key {key} targets unregistered probe {probe}")]
    UnregisteredProbe {
        table: String,
        key: u32,
        probe: String,
    },

    #[error("Map {map}: {field} is {actual} bytes, layout declares {expected}")]
    LayoutMismatch {
        map: String,
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid {layout} layout: {reason}")]
    InvalidLayout {
        layout: &'static str,
        reason: String,
    },

    #[error("Prefix length {prefix} exceeds key width of {max} bytes")]
    PrefixTooLong { prefix: u32, max: usize },

    #[error("Failed to load eBPF program: {0}")]
    ProgramLoadFailed(String),

    #[error("Failed to attach eBPF program: {0}")]
    AttachFailed(String),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KitError {
    pub(crate) fn layout(layout: &'static str, reason: impl Into<String>) -> Self {
        KitError::InvalidLayout {
            layout,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KitError>;
