use std::path::PathBuf;

/// Everything that can stop a fixture run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read fixture config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML fixture config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON fixture config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate name `{0}` in fixture config")]
    DuplicateName(String),
    #[error("end entity `{entity}` names unknown signer `{signer}`")]
    UnknownSigner { entity: String, signer: String },
    #[error("CRL step names unknown CA `{0}`")]
    UnknownCa(String),
    #[error("revocation names unknown end entity `{0}`")]
    UnknownEndEntity(String),
    #[error("`{0}` has a zero-length validity")]
    EmptyValidity(String),
    #[error("validity window of `{0}` ends beyond the supported date range")]
    ValidityOverflow(String),
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    ToolFailed { command: String, status: String },
    #[error("failed to format validity stamp: {0}")]
    Time(#[from] time::error::Format),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
