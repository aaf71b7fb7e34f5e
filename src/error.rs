use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Secondary detail attached to lock- and timeout-flavored errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubCode {
    #[default]
    None,
    MutexTimeout,
    LockTimeout,
    LockLimit,
}

impl SubCode {
    fn message(&self) -> &'static str {
        match self {
            SubCode::None => "",
            SubCode::MutexTimeout => "Timeout Acquiring Mutex",
            SubCode::LockTimeout => "Timeout waiting to lock key",
            SubCode::LockLimit => "Failed to acquire lock due to max_num_locks limit",
        }
    }
}

/// ShaleDB errors.
///
/// This is the error vocabulary shared across the engine. The table layer
/// itself produces a subset (`Corruption`, `IoError`, `InvalidArgument`,
/// `NotSupported`, `MergeInProgress`, `NotFound`); the remaining kinds are
/// latched and forwarded by collaborators so that a single type crosses
/// every boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A requested entity (key, file, column) does not exist.
    NotFound(String),
    /// On-disk data failed validation: bad magic, CRC mismatch, short read,
    /// undecodable block contents.
    Corruption(String),
    /// The operation or configuration is not implemented.
    NotSupported(String),
    /// The caller handed us something malformed: out-of-order keys, a value
    /// whose split arity disagrees with the column count, a closed builder.
    InvalidArgument(String),
    /// An error from the filesystem layer.
    IoError(String),
    /// The read touched merge operands that only the merging iterator can
    /// resolve.
    MergeInProgress(String),
    /// A partial result; the caller may retry with a larger budget.
    Incomplete(String),
    /// The database is shutting down and refuses new work.
    ShutdownInProgress(String),
    /// The operation timed out.
    TimedOut(SubCode, String),
    /// The operation was aborted and must be retried.
    Aborted(SubCode, String),
    /// A resource was busy.
    Busy(SubCode, String),
    /// A time-bounded resource (snapshot, lease) expired.
    Expired(String),
    /// Transient failure, safe to retry immediately.
    TryAgain(String),
}

impl Error {
    /// The sub-code carried by this error, `SubCode::None` for kinds that
    /// never carry one.
    pub fn subcode(&self) -> SubCode {
        match self {
            Error::TimedOut(sub, _) | Error::Aborted(sub, _) | Error::Busy(sub, _) => *sub,
            _ => SubCode::None,
        }
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        fn with_sub(
            f: &mut std::fmt::Formatter,
            what: &str,
            sub: &SubCode,
            msg: &str,
        ) -> std::fmt::Result {
            if *sub == SubCode::None {
                write!(f, "{what}: {msg}")
            } else {
                write!(f, "{what}: {}: {msg}", sub.message())
            }
        }
        match self {
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::IoError(msg) => write!(f, "io error: {msg}"),
            Error::MergeInProgress(msg) => write!(f, "merge in progress: {msg}"),
            Error::Incomplete(msg) => write!(f, "incomplete: {msg}"),
            Error::ShutdownInProgress(msg) => write!(f, "shutdown in progress: {msg}"),
            Error::TimedOut(sub, msg) => with_sub(f, "operation timed out", sub, msg),
            Error::Aborted(sub, msg) => with_sub(f, "operation aborted", sub, msg),
            Error::Busy(sub, msg) => with_sub(f, "resource busy", sub, msg),
            Error::Expired(msg) => write!(f, "expired: {msg}"),
            Error::TryAgain(msg) => write!(f, "try again: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption from the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// Constructs an Error::InvalidArgument from the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)) };
}

/// A ShaleDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IoError(err.to_string())
    }
}
