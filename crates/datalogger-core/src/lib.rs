//! Hardware-independent core library for the datalogger
//!
//! This crate contains all platform-agnostic logic of the single-node
//! telemetry logger: the periodic sampling cycle, the append-only CSV log,
//! and the line-oriented command protocol spoken over the wireless serial
//! link (live updates and bulk log retrieval).
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).
//!
//! ```text
//!  timer ──► sampling_task ──► DataLogger::run_cycle
//!                                 │ SensorSampler::sample
//!                                 │ AppState (latest reading)
//!                                 │ AppendLog::append
//!                                 └ ControlPlane::stream_reading ──► transport
//!
//!  transport ──► EventChannel ──► command_task ──► DataLogger::handle_event
//!                                                    └ ControlPlane (live mode / bulk transfer)
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod control;
pub mod logger;
pub mod sensors;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use app_state::AppState;
pub use config::LoggerConfig;
pub use control::{Command, ControlOutcome, ControlPlane};
pub use logger::{CycleOutcome, DataLogger, SharedLogger};
pub use sensors::{AnalogInput, ClimateSensor, SensorSampler};
pub use storage::{AppendLog, LogRecord, LogStorage, Reading, StorageError};
pub use transport::{CommandTransport, LineAssembler, TransportError, TransportEvent};
