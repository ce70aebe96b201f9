//! Errors produced by the reopenable streams.

use std::io::{self, ErrorKind};
use std::path::PathBuf;

use thiserror::Error;

/// The failures specific to reopenable streams.
///
/// The streams speak [`std::io::Write`], so these travel inside an [`io::Error`]. Use
/// [`Error::from_io`] to get them back out.
#[derive(Debug, Error)]
pub enum Error {
    /// The file could not be opened, either on construction or on reopen.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// The path that was being opened.
        path: PathBuf,
        /// The error reported by the OS.
        #[source]
        source: io::Error,
    },

    /// There's no live file handle.
    ///
    /// Either the last reopen failed or the stream was closed.
    #[error("{} is not open", path.display())]
    Closed {
        /// The path of the stream.
        path: PathBuf,
    },

    /// A fan-out member accepted only part of the data.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// How much the member took.
        written: usize,
        /// How much it was asked to take.
        expected: usize,
    },
}

impl Error {
    /// Extracts the typed error out of an [`io::Error`] produced by this crate.
    pub fn from_io(error: &io::Error) -> Option<&Error> {
        error.get_ref().and_then(|inner| inner.downcast_ref::<Error>())
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { source, .. } => source.kind(),
            Error::Closed { .. } => ErrorKind::NotConnected,
            Error::ShortWrite { .. } => ErrorKind::WriteZero,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        io::Error::new(error.kind(), error)
    }
}
