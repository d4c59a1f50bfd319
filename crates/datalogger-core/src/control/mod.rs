//! Command interpreter for the wireless link
//!
//! Decodes inbound lines into [`Command`]s and performs them: toggling live
//! mode or sending the whole log as a bulk transfer. Nothing is ever sent
//! back to report a failure; problems only show up in the local log output.

mod command;

pub use command::{Command, UnknownCommand};

use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::app_state::AppState;
use crate::storage::{AppendLog, LogRecord, LogStorage, Reading, StorageError};
use crate::transport::{CommandTransport, TransportError, TransportEvent};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    #[error("Bulk transfer aborted by storage: {0}")]
    Storage(StorageError),
    #[error("Bulk transfer aborted by transport: {0}")]
    Transport(TransportError),
}

impl From<StorageError> for TransferError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<TransportError> for TransferError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub chunks: usize,
    pub bytes: usize,
}

/// What handling one transport event amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    PeerConnected,
    /// Live mode is forced off; carries its value before the disconnect
    PeerDisconnected { live_mode_was: bool },
    LiveMode(bool),
    TransferCompleted(TransferStats),
    TransferFailed(TransferError),
    /// Not a command
    Ignored,
}

/// Sole writer of the live mode flag
pub struct ControlPlane<'a> {
    state: &'a AppState,
}

impl<'a> ControlPlane<'a> {
    pub const fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    pub fn live_mode_enabled(&self) -> bool {
        self.state.live_mode.is_enabled()
    }

    pub fn handle_event<S, T>(
        &self,
        event: TransportEvent,
        log: &AppendLog<S>,
        transport: &mut T,
    ) -> ControlOutcome
    where
        S: LogStorage,
        T: CommandTransport,
    {
        match event {
            TransportEvent::PeerConnected => {
                info!("Peer connected");
                ControlOutcome::PeerConnected
            }
            TransportEvent::PeerDisconnected => {
                // Live mode is never remembered across connections
                let live_mode_was = self.state.live_mode.set(false);
                info!("Peer disconnected, live mode off");
                ControlOutcome::PeerDisconnected { live_mode_was }
            }
            TransportEvent::CommandReceived(line) => match Command::parse(&line) {
                Some(command) => self.execute(command, log, transport),
                None => {
                    debug!("Ignoring unknown command {:?}", line.as_str());
                    ControlOutcome::Ignored
                }
            },
        }
    }

    pub fn execute<S, T>(
        &self,
        command: Command,
        log: &AppendLog<S>,
        transport: &mut T,
    ) -> ControlOutcome
    where
        S: LogStorage,
        T: CommandTransport,
    {
        info!("Command: {}", command.as_str());

        match command {
            Command::LiveModeOn => {
                self.state.live_mode.set(true);
                ControlOutcome::LiveMode(true)
            }
            Command::LiveModeOff => {
                self.state.live_mode.set(false);
                ControlOutcome::LiveMode(false)
            }
            Command::DataLog => match Self::bulk_transfer(log, transport) {
                Ok(stats) => ControlOutcome::TransferCompleted(stats),
                Err(e) => {
                    warn!("{}", e);
                    ControlOutcome::TransferFailed(e)
                }
            },
        }
    }

    /// Send the raw bytes of the log, chunk by chunk, in order.
    ///
    /// Best effort and one shot: no framing, no acknowledgement, no retry.
    /// The first failing read or write abandons the rest of the transfer.
    pub fn bulk_transfer<S, T>(
        log: &AppendLog<S>,
        transport: &mut T,
    ) -> Result<TransferStats, TransferError>
    where
        S: LogStorage,
        T: CommandTransport,
    {
        if !transport.has_peer() {
            return Err(TransportError::NoPeer.into());
        }

        let mut stats = TransferStats::default();
        for chunk in log.read_all()? {
            let chunk = chunk?;
            transport.send_bytes(&chunk)?;
            stats.chunks += 1;
            stats.bytes += chunk.len();
        }

        info!("Sent log: {} bytes in {} chunks", stats.bytes, stats.chunks);
        Ok(stats)
    }

    /// Stream `reading` as one line when live mode is on and a peer is
    /// connected. A write the transport refuses is dropped for this cycle.
    pub fn stream_reading<T: CommandTransport>(
        &self,
        reading: &Reading,
        transport: &mut T,
    ) -> bool {
        if !self.live_mode_enabled() || !transport.has_peer() {
            return false;
        }

        let record = match LogRecord::from_reading(reading) {
            Ok(record) => record,
            Err(e) => {
                warn!("Cannot format live update: {}", e);
                return false;
            }
        };

        match transport.send_bytes(record.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Live update dropped: {}", e);
                false
            }
        }
    }
}
