use std::fmt;

/// Errors surfaced by a [`crate::BlockDevice`] implementation.
#[derive(Debug)]
pub enum IoError {
    Std(std::io::Error),
    /// A positioned read/write ran past the device's declared sector count.
    OutOfRange,
    /// A read or write was not a whole number of sectors.
    Unaligned,
    /// A short read or write: fewer bytes were transferred than requested
    /// and the device has no more to give (or take).
    ShortTransfer { expected: usize, actual: usize },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Std(e) => write!(f, "io error: {e}"),
            IoError::OutOfRange => write!(f, "access past end of device"),
            IoError::Unaligned => write!(f, "unaligned sector access"),
            IoError::ShortTransfer { expected, actual } => {
                write!(f, "short transfer: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for IoError {}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Std(e)
    }
}

pub type Result<T> = std::result::Result<T, IoError>;
