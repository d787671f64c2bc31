//! Log file writer that stops after a fixed number of lines.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fs::File;
use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::fmt::MakeWriter;

/// Lines written to the log file before further output is dropped.
pub const MAX_LOG_FILE_LINES: u64 = 100_000;

/// A log file that silently drops everything past `max_lines`.
#[derive(Debug)]
pub struct CappedLogFile {
    file: Mutex<File>,
    written: AtomicU64,
    max_lines: u64,
}

impl CappedLogFile {
    pub const fn new(file: File, max_lines: u64) -> Self {
        Self {
            file: Mutex::new(file),
            written: AtomicU64::new(0),
            max_lines,
        }
    }
}

/// Writer handed out per event.
pub struct CappedLogWriter<'a> {
    log: &'a CappedLogFile,
}

impl Write for CappedLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let lines = buf.iter().filter(|byte| **byte == b'\n').count();
        let lines = u64::try_from(lines).unwrap_or(u64::MAX);
        let before = self.log.written.fetch_add(lines, Ordering::Relaxed);
        if before >= self.log.max_lines {
            return Ok(buf.len());
        }

        let mut file = self
            .log
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?
            .flush()
    }
}

impl<'a> MakeWriter<'a> for CappedLogFile {
    type Writer = CappedLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        CappedLogWriter { log: self }
    }
}
