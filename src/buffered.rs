use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{BufWriter, Error as IoError, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::error::Error;
use crate::file::FileStream;
use crate::Reopen;

/// Default size of the write buffer.
pub const DEFAULT_CAPACITY: usize = 256 * 1024;

/// Default period of the background flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Callback receiving errors of the background flush.
///
/// Nobody waits for the background flush, so its errors can't be returned anywhere.
pub type ErrorObserver = Arc<dyn Fn(&IoError) + Send + Sync>;

/// Configuration of a [`BufferedStream`].
#[derive(Clone)]
pub struct BufferedOptions {
    capacity: usize,
    flush_interval: Duration,
    observer: Option<ErrorObserver>,
}

impl BufferedOptions {
    /// The defaults: [`DEFAULT_CAPACITY`], [`DEFAULT_FLUSH_INTERVAL`], errors logged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of the write buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how often the background thread flushes and syncs the file.
    ///
    /// This bounds how much gets lost on a crash. A zero interval turns the background flushing
    /// off completely.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Installs a callback for errors of the background flush.
    ///
    /// Without one, the errors are only logged as warnings.
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&IoError) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }
}

impl Default for BufferedOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            observer: None,
        }
    }
}

impl Debug for BufferedOptions {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("BufferedOptions")
            .field("capacity", &self.capacity)
            .field("flush_interval", &self.flush_interval)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct State {
    writer: BufWriter<FileStream>,
    closed: bool,
}

impl State {
    fn closed_error(&self) -> IoError {
        let path = self.writer.get_ref().path().to_owned();
        Error::Closed { path }.into()
    }

    /// Fails only after an explicit close.
    fn check_not_closed(&self) -> Result<(), IoError> {
        if self.closed {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    /// Fails after an explicit close and also while a failed reopen left no file handle.
    fn check_open(&self) -> Result<(), IoError> {
        if self.closed || !self.writer.get_ref().is_open() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn flush_and_sync(&mut self) -> Result<(), IoError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

#[derive(Debug)]
struct Flusher {
    // Dropping it wakes the thread up and makes it terminate.
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Flusher {
    fn spawn(state: Arc<Mutex<State>>, options: &BufferedOptions) -> Result<Self, IoError> {
        let (stop, stopped) = mpsc::channel();
        let interval = options.flush_interval;
        let observer = options.observer.clone();
        let thread = thread::Builder::new()
            .name("reopenable-flush".to_owned())
            .spawn(move || flush_periodically(&state, &stopped, interval, observer.as_ref()))?;
        Ok(Self { stop, thread })
    }

    fn stop(self) {
        drop(self.stop);
        // Stopped from inside the observer. The thread notices the closed channel and ends on
        // its own once the observer returns; joining itself would fail.
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("Background flush thread panicked");
        }
    }
}

fn flush_periodically(
    state: &Mutex<State>,
    stopped: &Receiver<()>,
    interval: Duration,
    observer: Option<&ErrorObserver>,
) {
    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
        let mut state = state.lock();
        if state.closed {
            break;
        }
        trace!("Periodic flush of {}", state.writer.get_ref().path().display());
        let result = state.flush_and_sync();
        // The observer may want to log, possibly into this very stream.
        drop(state);
        if let Err(e) = result {
            match observer {
                Some(observer) => observer(&e),
                None => warn!("Background flush failed: {}", e),
            }
        }
    }
    debug!("Background flush thread terminating");
}

/// A buffered [`FileStream`] that flushes before reopening.
///
/// Writes are collected in a buffer and handed to the file in bigger chunks. A background thread
/// flushes the buffer and syncs the file to disk periodically (see
/// [`BufferedOptions::flush_interval`]).
///
/// The reopen flushes the buffer into the old file, reopens the file and only then lets anyone
/// write again, all under a single lock. The background thread takes the same lock, so nothing
/// ever flushes concurrently with a write or a reopen.
///
/// A single write is never split between the old and the new file. If part of it had to be
/// flushed out (because it didn't fit), the rest is flushed right away too.
///
/// Like [`FileStream`], it can be shared by reference between threads.
#[derive(Debug)]
pub struct BufferedStream {
    path: PathBuf,
    state: Arc<Mutex<State>>,
    flusher: Mutex<Option<Flusher>>,
}

impl BufferedStream {
    /// Wraps the stream with the default options.
    pub fn new(inner: FileStream) -> Result<Self, IoError> {
        Self::with_options(inner, BufferedOptions::default())
    }

    /// Wraps the stream and starts the background flushing.
    ///
    /// Fails if the background thread can't be started.
    pub fn with_options(inner: FileStream, options: BufferedOptions) -> Result<Self, IoError> {
        let path = inner.path().to_owned();
        let state = Arc::new(Mutex::new(State {
            writer: BufWriter::with_capacity(options.capacity, inner),
            closed: false,
        }));
        let flusher = if options.flush_interval > Duration::from_secs(0) {
            Some(Flusher::spawn(Arc::clone(&state), &options)?)
        } else {
            None
        };
        Ok(Self {
            path,
            state,
            flusher: Mutex::new(flusher),
        })
    }

    /// The path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many bytes wait in the buffer.
    pub fn buffered(&self) -> usize {
        self.state.lock().writer.buffer().len()
    }

    /// The size of the buffer.
    pub fn capacity(&self) -> usize {
        self.state.lock().writer.capacity()
    }

    /// Writes the whole `buf`.
    ///
    /// Returns the full length on success, there are no short writes. On error, part of a
    /// payload at least as big as the buffer may already be in the file.
    ///
    /// Fails with [`Error::Closed`] after a close and after a failed reopen, until a reopen
    /// succeeds.
    pub fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.writer.write_all(buf)?;
        // Some of it already went out, don't leave the tail behind.
        if state.writer.buffer().len() < buf.len() {
            state.writer.flush()?;
        }
        Ok(buf.len())
    }

    /// Pushes the buffer into the file.
    pub fn flush(&self) -> Result<(), IoError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.writer.flush()
    }

    /// Flushes the buffer and reopens the file.
    ///
    /// If the flush fails, the file is *not* reopened and the error is returned. The buffered
    /// data stays for another try.
    ///
    /// If an earlier reopen failed and there's no file handle, there's nothing to flush into.
    /// The file is reopened first and whatever is still buffered goes into the new one.
    pub fn reopen(&self) -> Result<(), IoError> {
        let mut state = self.state.lock();
        state.check_not_closed()?;
        if state.writer.get_ref().is_open() {
            state.writer.flush()?;
            // The buffer is empty now and the writer keeps pointing to the same stream, which
            // swaps its handle internally.
            state.writer.get_ref().reopen()
        } else {
            state.writer.get_ref().reopen()?;
            state.writer.flush()
        }
    }

    /// Stops the background flushing, flushes and closes the file.
    ///
    /// The file is closed even if the flush fails; the first error is returned. Further writes
    /// fail with [`Error::Closed`].
    pub fn close(&self) -> Result<(), IoError> {
        // Outside of the state lock, the thread may be waiting for it.
        self.stop_flusher();
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let flushed = state.writer.flush();
        let closed = state.writer.get_ref().close();
        flushed.and(closed)
    }

    fn stop_flusher(&self) {
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            flusher.stop();
        }
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        self.stop_flusher();
        let mut state = self.state.lock();
        if !state.closed {
            if let Err(e) = state.writer.flush() {
                warn!("Failed to flush {} on drop: {}", self.path.display(), e);
            }
        }
    }
}

impl Write for BufferedStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        BufferedStream::write(self, buf)
    }
    fn flush(&mut self) -> Result<(), IoError> {
        BufferedStream::flush(self)
    }
}

impl Write for &BufferedStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        BufferedStream::write(*self, buf)
    }
    fn flush(&mut self) -> Result<(), IoError> {
        BufferedStream::flush(*self)
    }
}

impl Reopen for BufferedStream {
    fn reopen(&mut self) -> Result<(), IoError> {
        BufferedStream::reopen(self)
    }
}

impl Reopen for &BufferedStream {
    fn reopen(&mut self) -> Result<(), IoError> {
        BufferedStream::reopen(*self)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::ErrorKind;
    use std::time::Instant;

    use super::*;

    fn quiet() -> BufferedOptions {
        BufferedOptions::new().flush_interval(Duration::from_secs(0))
    }

    fn len(path: &Path) -> usize {
        fs::read(path).unwrap().len()
    }

    #[test]
    fn small_writes_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let stream = BufferedStream::with_options(FileStream::open(&path).unwrap(), quiet())
            .unwrap();
        assert_eq!(DEFAULT_CAPACITY, stream.capacity());
        assert_eq!(5, stream.write(b"hello").unwrap());
        assert_eq!(5, stream.buffered());
        assert_eq!(0, len(&path));
        stream.flush().unwrap();
        assert_eq!(0, stream.buffered());
        assert_eq!(b"hello", &fs::read(&path).unwrap()[..]);
    }

    #[test]
    fn overflow_is_flushed_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let stream =
            BufferedStream::with_options(FileStream::open(&path).unwrap(), quiet().capacity(16))
                .unwrap();

        stream.write(&[b'a'; 10]).unwrap();
        assert_eq!(0, len(&path));
        // Doesn't fit next to the previous one, so the previous one goes out.
        stream.write(&[b'b'; 10]).unwrap();
        assert_eq!(10, len(&path));
        assert_eq!(10, stream.buffered());
        // Bigger than the whole buffer, everything is out before the call returns.
        stream.write(&[b'c'; 40]).unwrap();
        assert!(stream.buffered() < 40);
        assert_eq!(60, len(&path));
        assert_eq!(0, stream.buffered());
    }

    #[test]
    fn reopen_flushes_into_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let rotated = dir.path().join("log.txt.1");
        let mut stream =
            BufferedStream::with_options(FileStream::open(&path).unwrap(), quiet()).unwrap();

        writeln!(stream, "before").unwrap();
        fs::rename(&path, &rotated).unwrap();
        Reopen::reopen(&mut stream).unwrap();
        assert_eq!(b"before\n", &fs::read(&rotated).unwrap()[..]);
        assert_eq!(0, len(&path));

        writeln!(stream, "after").unwrap();
        stream.flush().unwrap();
        assert_eq!(b"after\n", &fs::read(&path).unwrap()[..]);
        assert_eq!(b"before\n", &fs::read(&rotated).unwrap()[..]);
    }

    #[test]
    fn close_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let stream = BufferedStream::new(FileStream::open(&path).unwrap()).unwrap();
        stream.write(b"data").unwrap();
        stream.close().unwrap();
        assert!(stream.flusher.lock().is_none());
        assert_eq!(b"data", &fs::read(&path).unwrap()[..]);

        let err = stream.write(b"more").unwrap_err();
        assert_eq!(ErrorKind::NotConnected, err.kind());
        assert!(stream.reopen().is_err());
        stream.close().unwrap();
    }

    #[test]
    fn drop_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let stream = BufferedStream::new(FileStream::open(&path).unwrap()).unwrap();
        stream.write(b"data").unwrap();
        drop(stream);
        assert_eq!(b"data", &fs::read(&path).unwrap()[..]);
    }

    #[test]
    fn background_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let options = BufferedOptions::new().flush_interval(Duration::from_millis(20));
        let stream = BufferedStream::with_options(FileStream::open(&path).unwrap(), options)
            .unwrap();
        stream.write(b"tick").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while len(&path) < 4 {
            assert!(Instant::now() < deadline, "Background flush didn't happen");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(0, stream.buffered());
    }

    #[test]
    fn background_errors_observed() {
        let dir = tempfile::tempdir().unwrap();
        let subdir = dir.path().join("logs");
        fs::create_dir(&subdir).unwrap();
        let path = subdir.join("log.txt");
        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);
        let options = BufferedOptions::new()
            .flush_interval(Duration::from_millis(20))
            .on_error(move |e| {
                let _ = sender.lock().send(e.kind());
            });
        let stream = BufferedStream::with_options(FileStream::open(&path).unwrap(), options)
            .unwrap();

        // Make the file disappear for good, so the inner stream ends up without a handle.
        fs::remove_file(&path).unwrap();
        fs::remove_dir(&subdir).unwrap();
        assert!(stream.reopen().is_err());
        // Nowhere to put it, refused right away instead of piling up in the buffer.
        let err = stream.write(b"lost").unwrap_err();
        assert_eq!(ErrorKind::NotConnected, err.kind());
        assert_eq!(0, stream.buffered());

        let kind = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(ErrorKind::NotConnected, kind);
    }

    #[test]
    fn recovers_after_failed_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let subdir = dir.path().join("logs");
        fs::create_dir(&subdir).unwrap();
        let path = subdir.join("log.txt");
        let stream =
            BufferedStream::with_options(FileStream::open(&path).unwrap(), quiet()).unwrap();
        stream.write(b"before\n").unwrap();

        fs::remove_file(&path).unwrap();
        fs::remove_dir(&subdir).unwrap();
        assert!(stream.reopen().is_err());
        assert!(stream.write(b"lost\n").is_err());
        assert!(stream.flush().is_err());
        // Still nowhere to open it.
        assert!(stream.reopen().is_err());

        fs::create_dir(&subdir).unwrap();
        stream.reopen().unwrap();
        stream.write(b"after\n").unwrap();
        stream.flush().unwrap();
        assert_eq!(b"after\n", &fs::read(&path).unwrap()[..]);
    }

    #[test]
    fn observer_may_close() {
        let dir = tempfile::tempdir().unwrap();
        let subdir = dir.path().join("logs");
        fs::create_dir(&subdir).unwrap();
        let path = subdir.join("log.txt");

        let slot: Arc<Mutex<Option<Arc<BufferedStream>>>> = Arc::default();
        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);
        let options = BufferedOptions::new()
            .flush_interval(Duration::from_millis(20))
            .on_error({
                let slot = Arc::clone(&slot);
                move |_| {
                    let stream = slot.lock().take();
                    if let Some(stream) = stream {
                        // Runs in the flush thread, which must not try to join itself.
                        let _ = stream.close();
                        let _ = sender.lock().send(());
                    }
                }
            });
        let stream = Arc::new(
            BufferedStream::with_options(FileStream::open(&path).unwrap(), options).unwrap(),
        );
        *slot.lock() = Some(Arc::clone(&stream));

        fs::remove_file(&path).unwrap();
        fs::remove_dir(&subdir).unwrap();
        assert!(stream.reopen().is_err());

        receiver.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(stream.flusher.lock().is_none());
        match Error::from_io(&stream.write(b"late").unwrap_err()) {
            Some(Error::Closed { .. }) => (),
            other => panic!("Unexpected {:?}", other),
        }
    }
}
