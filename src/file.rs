use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Error;
use crate::Reopen;

/// Permission bits of newly created files, before the umask applies.
#[cfg(unix)]
pub const DEFAULT_MODE: u32 = 0o666;

/// A file opened for appending that can be reopened at the same path.
///
/// This is the leaf of the stack. Writes, reopens and closes all go through one lock, so a write
/// never lands in a half-swapped handle and a reopen never tears a write apart.
///
/// Both `FileStream` and `&FileStream` implement [`Write`] and [`Reopen`], the same way `&File`
/// is a writer. That allows sharing one stream between threads through an `Arc`.
///
/// # Failed reopen
///
/// If the reopen can't open the file again, the stream is left without any handle. All writes
/// fail with [`Error::Closed`] until some later reopen succeeds. Writing into the old, possibly
/// already rotated away file would be silently losing data.
#[derive(Debug)]
pub struct FileStream {
    path: PathBuf,
    options: OpenOptions,
    file: Mutex<Option<File>>,
}

fn append_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(DEFAULT_MODE);
    }
    options
}

impl FileStream {
    /// Opens (creating if needed) the file at `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Self::build(path.as_ref().to_owned(), append_options())
    }

    /// Like [`open`][FileStream::open], but newly created files get the given permission bits.
    ///
    /// This applies to the files created by later reopens too.
    #[cfg(unix)]
    pub fn with_mode<P: AsRef<Path>>(path: P, mode: u32) -> Result<Self, IoError> {
        use std::os::unix::fs::OpenOptionsExt;

        let mut options = append_options();
        options.mode(mode);
        Self::build(path.as_ref().to_owned(), options)
    }

    fn build(path: PathBuf, options: OpenOptions) -> Result<Self, IoError> {
        let stream = Self {
            path,
            options,
            file: Mutex::new(None),
        };
        let file = stream.open_file()?;
        *stream.file.lock() = Some(file);
        debug!("Opened {}", stream.path.display());
        Ok(stream)
    }

    fn open_file(&self) -> Result<File, Error> {
        self.options.open(&self.path).map_err(|source| Error::Open {
            path: self.path.clone(),
            source,
        })
    }

    fn closed(&self) -> IoError {
        Error::Closed {
            path: self.path.clone(),
        }
        .into()
    }

    /// The path this stream (re)opens.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Is there a live handle to write into?
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Appends to the current file.
    ///
    /// As with any [`Write::write`], only a prefix may get written.
    pub fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        match self.file.lock().as_mut() {
            Some(file) => file.write(buf),
            None => Err(self.closed()),
        }
    }

    /// Flushes the current file.
    pub fn flush(&self) -> Result<(), IoError> {
        match self.file.lock().as_mut() {
            Some(file) => file.flush(),
            None => Err(self.closed()),
        }
    }

    /// Waits for the written data to reach stable storage.
    pub fn sync_all(&self) -> Result<(), IoError> {
        match self.file.lock().as_ref() {
            Some(file) => file.sync_all(),
            None => Err(self.closed()),
        }
    }

    /// Closes the current handle and opens the file at the same path again.
    ///
    /// Errors from closing the old handle are ignored, the file may be long renamed or deleted.
    pub fn reopen(&self) -> Result<(), IoError> {
        let mut file = self.file.lock();
        // Drop the old one first, failing to open the new one must not keep it around.
        drop(file.take());
        match self.open_file() {
            Ok(new) => {
                debug!("Reopened {}", self.path.display());
                *file = Some(new);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                Err(e.into())
            }
        }
    }

    /// Closes the handle, reporting any error from the OS.
    ///
    /// Further writes fail with [`Error::Closed`], until reopened. Closing an already closed
    /// stream does nothing.
    pub fn close(&self) -> Result<(), IoError> {
        match self.file.lock().take() {
            Some(file) => {
                debug!("Closing {}", self.path.display());
                close_file(file)
            }
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
fn close_file(file: File) -> Result<(), IoError> {
    use std::os::unix::io::IntoRawFd;

    let fd = file.into_raw_fd();
    // The descriptor is released even when close reports an error, so there's nothing to retry.
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

#[cfg(not(unix))]
fn close_file(file: File) -> Result<(), IoError> {
    drop(file);
    Ok(())
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        FileStream::write(self, buf)
    }
    fn flush(&mut self) -> Result<(), IoError> {
        FileStream::flush(self)
    }
}

impl Write for &FileStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        FileStream::write(*self, buf)
    }
    fn flush(&mut self) -> Result<(), IoError> {
        FileStream::flush(*self)
    }
}

impl Reopen for FileStream {
    fn reopen(&mut self) -> Result<(), IoError> {
        FileStream::reopen(self)
    }
}

impl Reopen for &FileStream {
    fn reopen(&mut self) -> Result<(), IoError> {
        FileStream::reopen(*self)
    }
}
