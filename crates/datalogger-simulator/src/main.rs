//! Desktop simulator for the datalogger.
//!
//! Runs the datalogger-core sampling cycle against a simulated climate
//! sensor and ADC, logging to `DATALOG.CSV` in the data directory (first
//! argument, default `./datalogger-data`). A TCP socket stands in for the
//! Bluetooth serial link:
//!
//! ```text
//! $ RUST_LOG=info cargo run -p datalogger-simulator
//! $ nc 127.0.0.1 5151
//! TOGGLE ON AUTOUPDATE
//! DATALOG
//! ```

mod file_storage;
mod tcp_link;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use embassy_time::Instant;
use log::{debug, error, info, warn};

use datalogger_core::config::LOG_FILE_NAME;
use datalogger_core::logger::CycleSchedule;
use datalogger_core::{
    AnalogInput, AppState, AppendLog, ClimateSensor, CycleOutcome, DataLogger, LoggerConfig,
    SensorSampler,
};

use file_storage::FileStorage;
use tcp_link::TcpLink;

// ---------------------------------------------------------------------------
// Simulator constants
// ---------------------------------------------------------------------------

/// Address the simulated serial link listens on.
const LISTEN_ADDR: &str = "127.0.0.1:5151";

/// Data directory used when none is given on the command line.
const DEFAULT_DATA_DIR: &str = "datalogger-data";

/// Persisted settings, next to the log.
const CONFIG_FILE_NAME: &str = "logger.cfg";

/// Pause between two polls of the link.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// Every n-th humidity read fails, like a DHT checksum error.
const SENSOR_FAULT_EVERY: u64 = 17;

// ---------------------------------------------------------------------------
// Simulated hardware
// ---------------------------------------------------------------------------

/// DHT-style sensor producing slowly drifting values.
struct SimulatedClimate {
    started: std::time::Instant,
    humidity_reads: u64,
}

impl SimulatedClimate {
    fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
            humidity_reads: 0,
        }
    }

    fn t(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl ClimateSensor for SimulatedClimate {
    fn read_humidity(&mut self) -> f32 {
        self.humidity_reads += 1;
        if self.humidity_reads % SENSOR_FAULT_EVERY == 0 {
            return f32::NAN;
        }

        // 40-60 %
        let t = self.t();
        (50.0 + 8.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos()) as f32
    }

    fn read_temperature(&mut self) -> f32 {
        // 20-26 °C
        let t = self.t();
        (23.0 + 2.5 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos()) as f32
    }
}

/// 12-bit ADC watching a slowly swinging voltage.
struct SimulatedAdc {
    started: std::time::Instant,
    full_scale: u16,
}

impl SimulatedAdc {
    fn new(config: &LoggerConfig) -> Self {
        Self {
            started: std::time::Instant::now(),
            full_scale: config.adc_full_scale,
        }
    }
}

impl AnalogInput for SimulatedAdc {
    fn read_raw(&mut self, _channel: u8) -> u16 {
        let t = self.started.elapsed().as_secs_f64();
        let half = f64::from(self.full_scale) / 2.0;
        (half + 0.8 * half * (t / 60.0).sin()).round() as u16
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Load persisted settings, falling back to the defaults when the file is
/// missing or damaged. Defaults are written back for next time.
fn load_config(path: &Path) -> LoggerConfig {
    match fs::read(path) {
        Ok(bytes) => match LoggerConfig::from_bytes(&bytes) {
            Ok(config) => {
                info!("Loaded settings from {}", path.display());
                return config;
            }
            Err(e) => warn!("Ignoring {}: {}", path.display(), e),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No settings at {}, using defaults", path.display());
        }
        Err(e) => warn!("Cannot read {}: {}", path.display(), e),
    }

    let config = LoggerConfig::default();
    if let Err(e) = save_config(path, &config) {
        warn!("Cannot save settings: {}", e);
    }
    config
}

fn save_config(path: &Path, config: &LoggerConfig) -> io::Result<()> {
    let bytes = config
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    fs::write(path, bytes)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::init();
    info!("Starting datalogger simulator");

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if let Err(e) = fs::create_dir_all(&data_dir) {
        error!("Cannot create {}: {}", data_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let config = load_config(&data_dir.join(CONFIG_FILE_NAME));
    info!(
        "Sampling every {} ms, bulk transfer chunks of {} bytes",
        config.sample_period_ms, config.chunk_size
    );

    let idle = std::time::Duration::from_millis(config.command_idle_ms);
    let link = match TcpLink::bind(LISTEN_ADDR, idle) {
        Ok(link) => link,
        Err(e) => {
            error!("Cannot listen on {}: {}", LISTEN_ADDR, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Waiting for a peer on {}", LISTEN_ADDR);

    let storage = FileStorage::new(data_dir.join(LOG_FILE_NAME));
    info!("Logging to {}", storage.path().display());

    let state = AppState::new();
    let sampler = SensorSampler::new(SimulatedClimate::new(), SimulatedAdc::new(&config), &config);
    let log = AppendLog::new(storage, config.chunk_size as usize);
    let mut logger = DataLogger::new(sampler, log, link, &state);

    if let Err(e) = logger.start() {
        warn!("Log not ready, retrying on the first sample: {}", e);
    }

    let mut schedule = CycleSchedule::new(Instant::now(), config.sample_period());

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    loop {
        // --- Link events ----------------------------------------------------
        for event in logger.transport_mut().poll() {
            let outcome = logger.handle_event(event);
            debug!("Event: {:?}", outcome);
        }

        // --- Sampling cycle -------------------------------------------------
        let now = Instant::now();
        if schedule.is_due(now) {
            match logger.run_cycle(now.as_secs()) {
                CycleOutcome::Completed { persisted, streamed } => {
                    if let Some(reading) = logger.latest_reading() {
                        info!("{} (logged: {}, streamed: {})", reading, persisted, streamed);
                    }
                }
                CycleOutcome::SensorFault => {}
            }

            let skipped = schedule.advance(Instant::now());
            if skipped > 0 {
                warn!("Sampling cycle overran, skipped {} ticks", skipped);
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
