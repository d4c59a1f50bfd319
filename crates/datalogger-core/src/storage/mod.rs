//! Durable, append-only log of readings
//!
//! [`AppendLog`] owns the single log file for the lifetime of the process
//! but never keeps it open between operations: every append and every bulk
//! read opens the file, does its work and closes it again. A power loss in
//! the idle time between two samples therefore never finds an open handle.

mod record;
pub mod sd_card;

pub use record::*;

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, error, info};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("Log store could not be opened")]
    OpenFailed,
    #[error("Write to log store failed")]
    WriteFailed,
    #[error("Read from log store failed")]
    ReadFailed,
    #[error("Log store could not be closed cleanly")]
    CloseFailed,
    #[error("Log store size unavailable")]
    SizeUnavailable,
    #[error("Record does not fit in one log row")]
    RecordTooLong,
}

/// An open log file.
///
/// Dropping a handle must release it, so an early return through `?` still
/// closes the file. [`LogHandle::close`] exists to report close errors on
/// the success path.
pub trait LogHandle {
    type Error: core::fmt::Debug;

    /// Write the whole buffer at the end of the file.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Read up to `buf.len()` bytes, returning 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn close(self) -> Result<(), Self::Error>;
}

/// Port to the persistent store holding the log file
///
/// Implemented by the SD card backend on the device and by a plain file on
/// desktop hosts.
pub trait LogStorage {
    type Error: core::fmt::Debug;
    type Handle<'a>: LogHandle<Error = Self::Error>
    where
        Self: 'a;

    /// Current size of the log in bytes; 0 when it does not exist yet.
    fn size(&self) -> Result<u64, Self::Error>;

    /// Open the log for appending, creating it when missing.
    fn open_append(&self) -> Result<Self::Handle<'_>, Self::Error>;

    /// Open the log for reading from the start.
    fn open_read(&self) -> Result<Self::Handle<'_>, Self::Error>;
}

/// Append-only CSV log on top of a [`LogStorage`]
pub struct AppendLog<S: LogStorage> {
    storage: S,
    chunk_size: usize,
    /// Set once the header has been verified for this run
    header_ready: bool,
}

impl<S: LogStorage> AppendLog<S> {
    pub fn new(storage: S, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
            header_ready: false,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn size(&self) -> Result<u64, StorageError> {
        self.storage.size().map_err(|e| {
            error!("Failed to query log size: {:?}", e);
            StorageError::SizeUnavailable
        })
    }

    /// Write the header row if, and only if, the log is empty.
    ///
    /// Returns whether the header was written. Calling it again on a
    /// non-empty log is a no-op.
    pub fn ensure_header(&mut self) -> Result<bool, StorageError> {
        if self.size()? > 0 {
            self.header_ready = true;
            return Ok(false);
        }

        self.write_line(HEADER_LINE.as_bytes())?;
        self.header_ready = true;
        info!("Created log with header row");
        Ok(true)
    }

    /// Append one record, writing the header first on a fresh log.
    pub fn append(&mut self, record: &LogRecord) -> Result<(), StorageError> {
        if !self.header_ready {
            self.ensure_header()?;
        }

        self.write_line(record.as_bytes())?;
        debug!("Appended {} bytes to log", record.len());
        Ok(())
    }

    /// Open-write-close one line.
    fn write_line(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut handle = self.storage.open_append().map_err(|e| {
            error!("Failed to open log for append: {:?}", e);
            StorageError::OpenFailed
        })?;

        // On error the handle is dropped here, which closes the file
        handle.write_all(bytes).map_err(|e| {
            error!("Failed to write log row: {:?}", e);
            StorageError::WriteFailed
        })?;

        handle.close().map_err(|e| {
            error!("Failed to close log after append: {:?}", e);
            StorageError::CloseFailed
        })
    }

    /// Read the whole log as a lazy sequence of `chunk_size` byte chunks.
    ///
    /// The file stays open while the returned iterator is alive and is
    /// closed once it is exhausted, hits an error or is dropped. Every call
    /// starts again from the beginning of the log.
    pub fn read_all(&self) -> Result<LogChunks<'_, S>, StorageError> {
        let handle = self.storage.open_read().map_err(|e| {
            error!("Failed to open log for reading: {:?}", e);
            StorageError::OpenFailed
        })?;

        Ok(LogChunks {
            handle: Some(handle),
            chunk_size: self.chunk_size,
        })
    }
}

/// Iterator returned by [`AppendLog::read_all`]
///
/// Every chunk is exactly `chunk_size` bytes long except the last one.
pub struct LogChunks<'a, S: LogStorage + 'a> {
    handle: Option<S::Handle<'a>>,
    chunk_size: usize,
}

impl<'a, S: LogStorage + 'a> LogChunks<'a, S> {
    /// Whether the underlying file is still open
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn finish(&mut self) -> Result<(), StorageError> {
        match self.handle.take() {
            Some(handle) => handle.close().map_err(|e| {
                error!("Failed to close log after reading: {:?}", e);
                StorageError::CloseFailed
            }),
            None => Ok(()),
        }
    }
}

impl<'a, S: LogStorage + 'a> Iterator for LogChunks<'a, S> {
    type Item = Result<Vec<u8>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.handle.as_mut()?;

        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < chunk.len() {
            match handle.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    error!("Failed to read log chunk: {:?}", e);
                    self.handle = None;
                    return Some(Err(StorageError::ReadFailed));
                }
            }
        }

        if filled < chunk.len() {
            // End of file: close now rather than waiting for the next call
            if let Err(e) = self.finish() {
                return Some(Err(e));
            }
        }

        if filled == 0 {
            return None;
        }

        chunk.truncate(filled);
        Some(Ok(chunk))
    }
}
