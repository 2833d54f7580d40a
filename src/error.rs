//! Unified error type.

use thiserror::Error;

use crate::config::ConfigError;

/// The error type returned by taskd's fallible infrastructure operations.
///
/// Request-level failures (401, 404, 409, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// what can stop the process: binding a port or reading config.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}
