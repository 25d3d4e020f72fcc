use std::fmt;
use std::io;

/// Errors surfaced by the fallible parts of the engine. Shape checks in the
/// hot numeric loops stay as `debug_assert!` and never reach this type.
#[derive(Debug)]
pub enum MlError {
    /// Incompatible matrix dimensions in a fallible constructor or conversion.
    DimensionMismatch { context: &'static str },
    /// A collection that must hold at least one element was empty.
    EmptyInput { context: &'static str },
    /// An underlying read/write failed (missing or truncated checkpoint etc.).
    Io(io::Error),
}

impl fmt::Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlError::DimensionMismatch { context } => {
                write!(f, "dimension mismatch in {context}")
            }
            MlError::EmptyInput { context } => {
                write!(f, "cannot operate on an empty collection in {context}")
            }
            MlError::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for MlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MlError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MlError {
    fn from(err: io::Error) -> Self {
        MlError::Io(err)
    }
}
