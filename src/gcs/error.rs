use thiserror::Error;

/// Errors from GCS transport and command handling.
#[derive(Error, Debug)]
pub enum GcsError {
    /// Transport could not be established or the socket failed mid-session.
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A single command/response round-trip failed.
    #[error("Command failed: {0}")]
    Command(String),

    /// The controller reported a nonzero `ERR?` code after a command.
    #[error("Controller error code {code}")]
    Controller { code: i32 },

    /// A bounded retry or poll window expired without success.
    #[error("Timed out waiting for controller")]
    Timeout,

    /// A response could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Requested wave-table size exceeds the firmware capacity.
    ///
    /// Never retried; no amount of retrying changes a capacity violation.
    #[error("Trajectory too long: {requested} points exceed wave table capacity of {max}")]
    TrajectoryTooLong { requested: u64, max: u64 },

    /// A domain rule was violated (e.g. removing the root coordinate system).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type GcsResult<T> = Result<T, GcsError>;
