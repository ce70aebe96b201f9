use std::io::{self, Error as IoError, Stderr, Stdout, Write};

use crate::Reopen;

/// Wraps a writer that has nothing to reopen.
///
/// The writes go straight through, the reopen does nothing and always succeeds. This allows
/// things like the standard output to take part in a [`Tee`][crate::Tee] along with real files.
#[derive(Clone, Debug, Default)]
pub struct NoopReopen<W>(W);

impl<W> NoopReopen<W> {
    /// Wraps the writer.
    pub fn new(inner: W) -> Self {
        NoopReopen(inner)
    }

    /// Access to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.0
    }

    /// Mutable access to the wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.0
    }

    /// Unwraps it again.
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> Write for NoopReopen<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        self.0.write(buf)
    }
    fn write_all(&mut self, buf: &[u8]) -> Result<(), IoError> {
        self.0.write_all(buf)
    }
    fn flush(&mut self) -> Result<(), IoError> {
        self.0.flush()
    }
}

impl<W> Reopen for NoopReopen<W> {
    fn reopen(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

/// The standard output of the process, as a reopenable stream.
///
/// Each call returns a new handle to the same process-wide stream.
pub fn stdout() -> NoopReopen<Stdout> {
    NoopReopen::new(io::stdout())
}

/// The standard error output of the process, as a reopenable stream.
pub fn stderr() -> NoopReopen<Stderr> {
    NoopReopen::new(io::stderr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_keeps_the_writer() {
        let mut noop = NoopReopen::new(Vec::new());
        noop.write_all(b"hello ").unwrap();
        for _ in 0..3 {
            noop.reopen().unwrap();
        }
        noop.write_all(b"world").unwrap();
        assert_eq!(b"hello world", &noop.into_inner()[..]);
    }

    #[test]
    fn standard_streams() {
        stdout().reopen().unwrap();
        stderr().reopen().unwrap();
        stderr().flush().unwrap();
    }
}
