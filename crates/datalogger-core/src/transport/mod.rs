//! Wireless command channel
//!
//! The link itself (pairing, RFCOMM/serial profile) belongs to the platform.
//! This module defines what the logger needs from it: a way to push bytes
//! to the connected peer, a connection check, and a stream of
//! [`TransportEvent`]s delivered by the adapter.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;
use thiserror_no_std::Error;

/// Longest accepted inbound command line
pub const MAX_COMMAND_LEN: usize = 64;

/// Events buffered between the transport adapter and the command task
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

pub type CommandLine = heapless::String<MAX_COMMAND_LEN>;

/// Queue feeding transport events from the adapter (often an interrupt or
/// driver callback) to the command task
pub type EventChannel = Channel<CriticalSectionRawMutex, TransportEvent, EVENT_CHANNEL_CAPACITY>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete inbound line, not yet trimmed
    CommandReceived(CommandLine),
    PeerConnected,
    PeerDisconnected,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("No peer connected")]
    NoPeer,
    #[error("Transport rejected the write")]
    Rejected,
}

/// Outbound side of the command channel
pub trait CommandTransport {
    fn has_peer(&self) -> bool;

    /// Fire-and-forget write to the connected peer.
    ///
    /// Must not block waiting for the peer; a write the link cannot take
    /// right now is rejected.
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Consumer of transport events, called synchronously by the adapter
pub trait TransportEventHandler {
    fn on_transport_event(&mut self, event: TransportEvent);
}

/// Splits the inbound byte stream into command lines.
///
/// A line ends at `\n`. Peers that do not terminate their commands are
/// served by [`LineAssembler::flush`], which the adapter calls once the
/// stream has been quiet for the command idle interval. Lines longer than
/// [`MAX_COMMAND_LEN`] are discarded up to the next newline.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: heapless::Vec<u8, MAX_COMMAND_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Feed received bytes, calling `on_line` for every completed line.
    pub fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(CommandLine)) {
        for &byte in bytes {
            if byte == b'\n' {
                if let Some(line) = self.take_line() {
                    on_line(line);
                }
                continue;
            }

            if !self.overflowed && self.buf.push(byte).is_err() {
                warn!("Command line longer than {} bytes, discarding", MAX_COMMAND_LEN);
                self.overflowed = true;
            }
        }
    }

    /// Whether bytes of an unterminated line are buffered
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty() || self.overflowed
    }

    /// Complete the pending line after the idle interval.
    pub fn flush(&mut self) -> Option<CommandLine> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<CommandLine> {
        let overflowed = core::mem::replace(&mut self.overflowed, false);
        let mut line = CommandLine::new();

        if !overflowed {
            match core::str::from_utf8(&self.buf) {
                Ok(text) if !text.trim().is_empty() => {
                    // Same capacity as the byte buffer, cannot fail
                    let _ = line.push_str(text);
                }
                Ok(_) => {}
                Err(_) => warn!("Dropping command line with invalid UTF-8"),
            }
        }

        self.buf.clear();
        (!line.is_empty()).then_some(line)
    }
}
