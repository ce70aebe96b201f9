//! Example of reopening log file on SIGHUP
//!
//! This program keeps writing messages into a file `log.txt` and to its standard output. If it
//! receives SIGHUP, it reopens the file.
//!
//! To demonstrate the effect:
//!
//! * Run the program.
//! * Observe `log.txt` appeared and it is growing (every 5 seconds, it is buffered).
//! * Move the `log.txt` to some other file (`mv log.txt log2.txt`).
//! * See that the file is still growing, even when under different name.
//! * Send `SIGHUP` to the program (`killall -SIGHUP reopen_log`).
//! * See `log2.txt` no longer grows, new `log.txt` appeared and grows.

#[cfg(unix)]
#[rustfmt::skip]
mod example {

use std::io::{Error, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, LevelFilter};
use parking_lot::Mutex;
use reopenable::{BufferedOptions, BufferedStream, FileStream, Reopen, ReopenWrite, Tee};
use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;

type Output = Arc<Mutex<Tee<Box<dyn ReopenWrite + Send>>>>;

/// Keeps writing into the given output, one line per second.
fn log_forever(output: Output) -> Result<(), Error> {
    let mut no = 1u128;
    loop {
        thread::sleep(Duration::from_secs(1));
        writeln!(output.lock(), "Tick no {}", no)?;
        no += 1;
    }
}

/// Reopens the output each time a SIGHUP comes.
fn reopen_on_signal(output: Output) -> Result<(), Error> {
    let mut signals = Signals::new(&[SIGHUP])?;
    thread::spawn(move || {
        for _ in signals.forever() {
            info!("Got SIGHUP, reopening");
            if let Err(e) = output.lock().reopen() {
                error!("Failed to reopen: {}", e);
            }
        }
    });
    Ok(())
}

pub fn main() -> Result<(), Error> {
    // Our own messages go to stderr, so they don't get mixed up with the ticks
    simple_logging::log_to_stderr(LevelFilter::Debug);

    let options = BufferedOptions::new().flush_interval(Duration::from_secs(5));
    let file = BufferedStream::with_options(FileStream::open("log.txt")?, options)?;
    let members: Vec<Box<dyn ReopenWrite + Send>> =
        vec![Box::new(file), Box::new(reopenable::stdout())];
    let output = Arc::new(Mutex::new(Tee::new(members)));
    reopen_on_signal(Arc::clone(&output))?;
    log_forever(output)
}

}

// Version just to make compiler happy on systems without SIGHUP
#[cfg(not(unix))]
#[rustfmt::skip]
mod example {
pub fn main() -> Result<(), std::io::Error> {
    Ok(())
}
}

fn main() -> Result<(), std::io::Error> {
    example::main()
}
