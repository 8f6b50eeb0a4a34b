use conduit::key::Key;
use conduit::support::{WireError, WorkerAddr};
use std::fmt;
use std::io;
use std::sync::mpsc;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// No usable identity response from the target address.
    Connect(String),
    /// The identity endpoint is neither a scheduler nor a center.
    UnknownPeerType(String),
    /// Invalid user-supplied argument.
    Argument(String),
    /// The scheduler reported the task failed on a worker.
    Task {
        exception: String,
        traceback: Option<String>,
    },
    /// The handle was cancelled, or the cluster restarted while it was pending.
    Cancelled(Key),
    /// The scheduler rejected or garbled a request/response call.
    Rpc(String),
    /// A worker failed during a broadcast upload.
    Upload { worker: WorkerAddr, message: String },
    /// Transport failure on the wire.
    Wire(WireError),
    /// The event loop is no longer running.
    Shutdown,
    /// Declared-unimplemented surface.
    Unsupported(&'static str),
}

impl From<WireError> for DriverError {
    #[inline]
    fn from(error: WireError) -> Self {
        DriverError::Wire(error)
    }
}

impl From<io::Error> for DriverError {
    #[inline]
    fn from(error: io::Error) -> Self {
        DriverError::Wire(error.into())
    }
}

impl<T> From<mpsc::SendError<T>> for DriverError {
    #[inline]
    fn from(_: mpsc::SendError<T>) -> Self {
        DriverError::Shutdown
    }
}

impl From<mpsc::RecvError> for DriverError {
    #[inline]
    fn from(_: mpsc::RecvError) -> Self {
        DriverError::Shutdown
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverError::Connect(detail) => write!(f, "could not connect: {}", detail),
            DriverError::UnknownPeerType(kind) => write!(f, "unknown peer type: {}", kind),
            DriverError::Argument(detail) => write!(f, "invalid argument: {}", detail),
            DriverError::Task { exception, .. } => write!(f, "task failed: {}", exception),
            DriverError::Cancelled(key) => write!(f, "cancelled: {}", key),
            DriverError::Rpc(detail) => write!(f, "scheduler rpc failed: {}", detail),
            DriverError::Upload { worker, message } => {
                write!(f, "upload failed on {}: {}", worker, message)
            }
            DriverError::Wire(error) => write!(f, "wire failure: {}", error),
            DriverError::Shutdown => write!(f, "driver is shut down"),
            DriverError::Unsupported(what) => write!(f, "not implemented: {}", what),
        }
    }
}

impl std::error::Error for DriverError {}
