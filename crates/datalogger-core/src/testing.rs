//! Test doubles shared by the unit tests of this crate

use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::sensors::{AnalogInput, ClimateSensor, heat_index};
use crate::storage::{LogHandle, LogStorage};
use crate::transport::{CommandLine, CommandTransport, TransportError, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    Open,
    Write,
    Read,
}

/// In-memory log store with open-handle accounting and fault injection
#[derive(Default)]
pub struct MemoryStorage {
    data: RefCell<Vec<u8>>,
    open: Cell<usize>,
    fail_open: Cell<bool>,
    fail_writes: Cell<bool>,
    fail_reads: Cell<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: &[u8]) -> Self {
        let storage = Self::new();
        storage.data.borrow_mut().extend_from_slice(bytes);
        storage
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn open_handles(&self) -> usize {
        self.open.get()
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    fn open(&self, mode: Mode) -> Result<MemoryHandle<'_>, MemoryError> {
        if self.fail_open.get() {
            return Err(MemoryError::Open);
        }
        self.open.set(self.open.get() + 1);
        Ok(MemoryHandle {
            storage: self,
            mode,
        })
    }
}

enum Mode {
    Append,
    Read { pos: usize },
}

pub struct MemoryHandle<'a> {
    storage: &'a MemoryStorage,
    mode: Mode,
}

impl LogHandle for MemoryHandle<'_> {
    type Error = MemoryError;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !matches!(self.mode, Mode::Append) {
            return Err(MemoryError::Write);
        }

        let mut data = self.storage.data.borrow_mut();
        if self.storage.fail_writes.get() {
            // A torn row, like a card pulled mid-write
            data.extend_from_slice(&bytes[..bytes.len() / 2]);
            return Err(MemoryError::Write);
        }
        data.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.storage.fail_reads.get() {
            return Err(MemoryError::Read);
        }

        let Mode::Read { pos } = &mut self.mode else {
            return Err(MemoryError::Read);
        };

        let data = self.storage.data.borrow();
        let remaining = &data[(*pos).min(data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        *pos += n;
        Ok(n)
    }

    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Drop for MemoryHandle<'_> {
    fn drop(&mut self) {
        self.storage.open.set(self.storage.open.get() - 1);
    }
}

impl LogStorage for MemoryStorage {
    type Error = MemoryError;
    type Handle<'a> = MemoryHandle<'a>;

    fn size(&self) -> Result<u64, Self::Error> {
        Ok(self.data.borrow().len() as u64)
    }

    fn open_append(&self) -> Result<Self::Handle<'_>, Self::Error> {
        self.open(Mode::Append)
    }

    fn open_read(&self) -> Result<Self::Handle<'_>, Self::Error> {
        self.open(Mode::Read { pos: 0 })
    }
}

/// Climate sensor replaying `(humidity, temperature)` pairs.
///
/// Each pair is consumed by one humidity + temperature read; the last pair
/// repeats forever.
pub struct ScriptedClimate {
    script: Vec<(f32, f32)>,
    index: usize,
    heat_index_calls: Cell<usize>,
    last_fahrenheit: Cell<Option<bool>>,
}

impl ScriptedClimate {
    pub fn new(script: &[(f32, f32)]) -> Self {
        assert!(!script.is_empty());
        Self {
            script: script.to_vec(),
            index: 0,
            heat_index_calls: Cell::new(0),
            last_fahrenheit: Cell::new(None),
        }
    }

    pub fn heat_index_calls(&self) -> usize {
        self.heat_index_calls.get()
    }

    pub fn last_fahrenheit_flag(&self) -> Option<bool> {
        self.last_fahrenheit.get()
    }

    fn current(&self) -> (f32, f32) {
        self.script[self.index]
    }
}

impl ClimateSensor for ScriptedClimate {
    fn read_humidity(&mut self) -> f32 {
        self.current().0
    }

    fn read_temperature(&mut self) -> f32 {
        let temperature = self.current().1;
        if self.index + 1 < self.script.len() {
            self.index += 1;
        }
        temperature
    }

    fn compute_heat_index(&self, temperature: f32, humidity: f32, is_fahrenheit: bool) -> f32 {
        self.heat_index_calls.set(self.heat_index_calls.get() + 1);
        self.last_fahrenheit.set(Some(is_fahrenheit));
        heat_index::compute_heat_index(temperature, humidity, is_fahrenheit)
    }
}

pub struct CountingAdc {
    value: u16,
    reads: usize,
    last_channel: Option<u8>,
}

impl CountingAdc {
    pub fn new(value: u16) -> Self {
        Self {
            value,
            reads: 0,
            last_channel: None,
        }
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn last_channel(&self) -> Option<u8> {
        self.last_channel
    }
}

impl AnalogInput for CountingAdc {
    fn read_raw(&mut self, channel: u8) -> u16 {
        self.reads += 1;
        self.last_channel = Some(channel);
        self.value
    }
}

/// Transport that records every accepted write
#[derive(Default)]
pub struct RecordingTransport {
    peer: bool,
    reject: bool,
    sent: Vec<Vec<u8>>,
}

impl RecordingTransport {
    pub fn connected() -> Self {
        Self {
            peer: true,
            ..Self::default()
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_peer(&mut self, peer: bool) {
        self.peer = peer;
    }

    pub fn reject_writes(&mut self, reject: bool) {
        self.reject = reject;
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.concat()
    }
}

impl CommandTransport for RecordingTransport {
    fn has_peer(&self) -> bool {
        self.peer
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.peer {
            return Err(TransportError::NoPeer);
        }
        if self.reject {
            return Err(TransportError::Rejected);
        }
        self.sent.push(bytes.to_vec());
        Ok(())
    }
}

pub fn command(line: &str) -> TransportEvent {
    let mut text = CommandLine::new();
    text.push_str(line).unwrap();
    TransportEvent::CommandReceived(text)
}
