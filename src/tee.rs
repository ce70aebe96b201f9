use std::io::{Error as IoError, Write};
use std::iter::FromIterator;

use crate::error::Error;
use crate::{Reopen, ReopenWrite};

/// Duplicates writes and reopens into several streams, like the `tee` command.
///
/// The members are visited in the order they were given. The first one that fails stops the whole
/// operation and the rest are not touched at all. This leaves the members diverged (the earlier
/// ones got the data, the later ones didn't) and it's up to the caller to decide if that's
/// fatal. A member that accepts only part of the data counts as failed, with
/// [`Error::ShortWrite`].
///
/// The default member type allows mixing different kinds of streams.
#[derive(Debug)]
pub struct Tee<W = Box<dyn ReopenWrite + Send>> {
    members: Vec<W>,
}

impl<W: ReopenWrite> Tee<W> {
    /// Creates the tee. The members can't be changed later.
    pub fn new(members: Vec<W>) -> Self {
        Self { members }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Is it writing nowhere?
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Gives the members back.
    pub fn into_inner(self) -> Vec<W> {
        self.members
    }
}

impl<W: ReopenWrite> FromIterator<W> for Tee<W> {
    fn from_iter<I: IntoIterator<Item = W>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<W: ReopenWrite> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        for member in &mut self.members {
            let written = member.write(buf)?;
            if written != buf.len() {
                return Err(Error::ShortWrite {
                    written,
                    expected: buf.len(),
                }
                .into());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.members.iter_mut().try_for_each(Write::flush)
    }
}

impl<W: ReopenWrite> Reopen for Tee<W> {
    fn reopen(&mut self) -> Result<(), IoError> {
        self.members.iter_mut().try_for_each(Reopen::reopen)
    }
}
