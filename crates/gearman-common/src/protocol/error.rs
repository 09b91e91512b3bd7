use thiserror::Error;

#[derive(Error, Debug)]
pub enum GearmanError {
    #[error("Invalid servers specified: {0}")]
    InvalidServers(String),

    #[error("Couldn't connect to any available servers")]
    NoServersAvailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Server error {code}: {message}")]
    Server { code: String, message: String },

    #[error("Invalid function {0}")]
    UnrecognizedFunction(String),

    #[error("Response for unknown job handle: {0}")]
    UnknownHandle(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task type: {0}")]
    InvalidTaskType(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl GearmanError {
    /// Returns `true` for failures local to one server connection.
    ///
    /// These are recovered from by moving the server into backoff; every
    /// other variant is either a construction error or fatal to the run.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            GearmanError::Connection(_)
                | GearmanError::Io(_)
                | GearmanError::Timeout(_)
                | GearmanError::InvalidResponse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GearmanError>;
