use std::io;

use thiserror::Error;

/// Errors raised while building an engine.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to map code buffer: {0}")]
    CodeBuffer(#[from] io::Error),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse engine config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("host backend {backend} cannot allocate operands of {ops:?}")]
    Constraints {
        backend: &'static str,
        ops: Vec<&'static str>,
    },
}
