//! Log store backed by a plain file on the host

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use datalogger_core::storage::{LogHandle, LogStorage};

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileStorage {
    type Error = io::Error;
    type Handle<'a>
        = FileHandle
    where
        Self: 'a;

    fn size(&self) -> Result<u64, Self::Error> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn open_append(&self) -> Result<Self::Handle<'_>, Self::Error> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(FileHandle)
    }

    fn open_read(&self) -> Result<Self::Handle<'_>, Self::Error> {
        File::open(&self.path).map(FileHandle)
    }
}

/// Closed when dropped, like any [`File`]
pub struct FileHandle(File);

impl LogHandle for FileHandle {
    type Error = io::Error;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.0.write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        loop {
            match self.0.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn close(self) -> Result<(), Self::Error> {
        self.0.sync_all()
    }
}
