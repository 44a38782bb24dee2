use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Static configuration problems. Any of these aborts the run before the
/// first export is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Malformed channel section [{0}]: expected <server_id>.<channel_id>")]
    MalformedChannelKey(String),

    #[error("Missing section: {0}")]
    MissingSection(String),

    #[error("Invalid value for `{key}` in [{section}]: {value:?} ({reason})")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Unknown token `{0}`: no such section in the token store")]
    UnknownToken(String),

    #[error("Token `{0}` has no `token` value")]
    MissingSecret(String),

    #[error("Token `{name}` has an invalid `bot` value: {value:?}")]
    InvalidBool { name: String, value: String },
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to launch {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting on {}: {source}", executable.display())]
    Wait {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// True when the executable itself is unusable, so every later channel
    /// would fail the same way.
    pub fn is_executable_unusable(&self) -> bool {
        match self {
            LaunchError::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            LaunchError::Wait { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to replace {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}
