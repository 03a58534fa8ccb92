use thiserror::Error;

/// Errors raised by the core across PTY spawn, session lifecycle, and config I/O.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open pseudo-terminal: {0}")]
    PtyOpen(#[source] anyhow::Error),

    #[error("failed to spawn shell '{shell}': {source}")]
    ShellSpawn {
        shell: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create shell init directory: {0}")]
    ShellInitDir(#[source] std::io::Error),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("renderer-state mutex was poisoned")]
    MutexPoisoned,

    #[error("failed to load config from {path}: {source}")]
    ConfigLoad {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[source] serde_json::Error),

    #[error("failed to save config to {path}: {source}")]
    ConfigSave {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shell hook install failed: {0}")]
    ShellHookInstall(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
