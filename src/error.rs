use trackle_client::ClientError;
use trackle_engine::EngineError;
use trackle_store::StoreError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Lookup key matched no package. Exits with code 2.
    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Io(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 2,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
