use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error reading/writing state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state file at {0} is corrupt, falling back to empty state")]
    Corrupt(String),

    #[error("failed to persist state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("missing pbk for reality")]
    MissingRealityKey,

    #[error("missing sni for reality")]
    MissingRealitySni,

    #[error("xray binary not found: {0}")]
    EngineMissing(String),

    #[error("tcp unreachable")]
    TcpUnreachable,
}
