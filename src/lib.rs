#![doc(html_root_url = "https://docs.rs/reopenable/0.1.0/reopenable/")]
#![warn(missing_docs)]

//! Output streams that can reopen their files after an external rotation.
//!
//! The main motivation is integration of logging with logrotate. Usually, when logrotate wants
//! to rotate log files, it moves the current log file to a new place and creates a new empty
//! file. However, for the new messages to appear in the new file, a running program needs to
//! close and reopen the file. This is most often signalled by SIGHUP.
//!
//! The streams here do the reopening part. When to reopen is up to the caller (a signal, a
//! timer, an admin command…), the streams only make sure the reopen doesn't race with writes
//! from other threads. The building blocks are:
//!
//! * [`FileStream`]: a file opened for appending.
//! * [`BufferedStream`]: the above with a write buffer, flushed before each reopen and
//!   periodically in the background.
//! * [`Tee`]: sends every write and reopen to several streams, in order.
//! * [`NoopReopen`]: makes any writer (eg. [`stdout`]) fit in, reopening does nothing.
//!
//! All of them implement [`Write`] and [`Reopen`], so they nest freely.
//!
//! ```rust
//! use std::io::Write;
//!
//! use reopenable::{BufferedStream, FileStream, Reopen, Tee};
//!
//! # fn main() -> Result<(), std::io::Error> {
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("log.txt");
//! let file = BufferedStream::new(FileStream::open(&path)?)?;
//! let mut out = Tee::new(vec![
//!     Box::new(file) as Box<dyn reopenable::ReopenWrite + Send>,
//!     Box::new(reopenable::stderr()),
//! ]);
//! writeln!(out, "Hello")?;
//! // Logrotate moved the file away
//! out.reopen()?;
//! writeln!(out, "Hello again")?;
//! # Ok(())
//! # }
//! ```

use std::io::{Error as IoError, Write};

mod buffered;
mod error;
mod file;
mod noop;
mod tee;

pub use crate::buffered::{
    BufferedOptions, BufferedStream, ErrorObserver, DEFAULT_CAPACITY, DEFAULT_FLUSH_INTERVAL,
};
pub use crate::error::Error;
#[cfg(unix)]
pub use crate::file::DEFAULT_MODE;
pub use crate::file::FileStream;
pub use crate::noop::{stderr, stdout, NoopReopen};
pub use crate::tee::Tee;

/// Something that can be reopened.
///
/// For files this means closing the current handle and opening the same path again.
pub trait Reopen {
    /// Performs the reopen.
    ///
    /// On error, the object may be left unusable until a later reopen succeeds.
    fn reopen(&mut self) -> Result<(), IoError>;
}

/// A writer that can also be reopened.
///
/// This is implemented for everything that is both [`Write`] and [`Reopen`]. Mostly useful as
/// `Box<dyn ReopenWrite + Send>` when mixing different streams in a [`Tee`].
pub trait ReopenWrite: Reopen + Write {}

impl<T: Reopen + Write + ?Sized> ReopenWrite for T {}

impl<R: Reopen + ?Sized> Reopen for Box<R> {
    fn reopen(&mut self) -> Result<(), IoError> {
        (**self).reopen()
    }
}

impl<R: Reopen + ?Sized> Reopen for &mut R {
    fn reopen(&mut self) -> Result<(), IoError> {
        (**self).reopen()
    }
}
