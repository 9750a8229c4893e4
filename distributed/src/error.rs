use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use comms::msg::Msg;
use machine_learning::MlErr;
use safetensors::SafeTensorError;

use crate::role::RoleKind;

/// The result type used in the entire distributed module.
pub type Result<T> = std::result::Result<T, DistributedErr>;

/// The distributed module's error type.
#[derive(Debug)]
pub enum DistributedErr {
    /// A collaborator doesn't provide the capabilities the caller requires.
    TypeMismatch { expected: String, got: String },
    /// A role query was made before role discovery.
    UninitializedRole,
    /// A lifecycle or collective operation was called before `init`.
    Uninitialized,
    AlreadyInitialized,
    /// An operation was called on a process with the wrong role.
    RoleMisuse { op: &'static str, kind: RoleKind },
    /// The role maker has no collective transport for more than one worker.
    CollectiveUnsupported,
    LengthMismatch { got: usize, expected: usize },
    Protocol(String),
    InvalidConfig(String),
    Checkpoint(String),
    Ml(MlErr),
    Io(io::Error),
}

impl DistributedErr {
    /// Creates a `Protocol` error for a message the receiver wasn't waiting for.
    ///
    /// # Arguments
    /// * `expected` - What the receiver was waiting for.
    /// * `msg` - The received message.
    pub(crate) fn unexpected(expected: &str, msg: &Msg) -> Self {
        match msg {
            Msg::Err(detail) => Self::Protocol(format!("the peer failed: {detail}")),
            msg => Self::Protocol(format!("expected {expected}, got {}", msg.kind())),
        }
    }
}

impl Display for DistributedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributedErr::TypeMismatch { expected, got } => {
                write!(f, "Type mismatch: expected {expected}, got {got}")
            }
            DistributedErr::UninitializedRole => {
                f.write_str("The role was queried before role discovery completed")
            }
            DistributedErr::Uninitialized => {
                f.write_str("The distributed algorithm must be initialized first")
            }
            DistributedErr::AlreadyInitialized => {
                f.write_str("The distributed algorithm was already initialized")
            }
            DistributedErr::RoleMisuse { op, kind } => {
                write!(f, "{op} can't be called on a {kind}")
            }
            DistributedErr::CollectiveUnsupported => f.write_str(
                "The role maker has no collective transport and there's more than one worker",
            ),
            DistributedErr::LengthMismatch { got, expected } => {
                write!(f, "Buffer length mismatch, got {got} and expected {expected}")
            }
            DistributedErr::Protocol(detail) => write!(f, "Protocol error: {detail}"),
            DistributedErr::InvalidConfig(detail) => write!(f, "Invalid job config: {detail}"),
            DistributedErr::Checkpoint(detail) => write!(f, "Checkpoint error: {detail}"),
            DistributedErr::Ml(e) => write!(f, "{e}"),
            DistributedErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DistributedErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DistributedErr::Ml(e) => Some(e),
            DistributedErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for DistributedErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for DistributedErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for DistributedErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}
