//! Sampling cycle and the tasks that drive it
//!
//! [`DataLogger`] owns every collaborator the cycle touches. Single-threaded
//! hosts call it directly; firmware puts it behind a [`SharedLogger`] and
//! spawns [`sampling_task`] and [`command_task`], so an append and a bulk
//! read can never interleave mid-line.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};

use crate::app_state::AppState;
use crate::control::{ControlOutcome, ControlPlane};
use crate::sensors::{AnalogInput, ClimateSensor, SensorSampler};
use crate::storage::{AppendLog, LogRecord, LogStorage, Reading, StorageError};
use crate::transport::{CommandTransport, EventChannel, TransportEvent, TransportEventHandler};

/// Result of one sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No valid reading; nothing was stored, appended or streamed
    SensorFault,
    Completed { persisted: bool, streamed: bool },
}

pub struct DataLogger<'a, C, A, S: LogStorage, T> {
    sampler: SensorSampler<C, A>,
    log: AppendLog<S>,
    transport: T,
    control: ControlPlane<'a>,
    state: &'a AppState,
}

pub type SharedLogger<'a, C, A, S, T> = Mutex<CriticalSectionRawMutex, DataLogger<'a, C, A, S, T>>;

impl<'a, C, A, S, T> DataLogger<'a, C, A, S, T>
where
    C: ClimateSensor,
    A: AnalogInput,
    S: LogStorage,
    T: CommandTransport,
{
    pub fn new(
        sampler: SensorSampler<C, A>,
        log: AppendLog<S>,
        transport: T,
        state: &'a AppState,
    ) -> Self {
        Self {
            sampler,
            log,
            transport,
            control: ControlPlane::new(state),
            state,
        }
    }

    /// Prepare the log before the first cycle.
    ///
    /// A failure here is not fatal: the header is retried by the first
    /// successful append.
    pub fn start(&mut self) -> Result<(), StorageError> {
        let created = self.log.ensure_header()?;
        if !created {
            info!("Resuming log with {} bytes", self.log.size()?);
        }
        Ok(())
    }

    /// One scheduler tick: sample, publish, persist, then stream.
    ///
    /// Every failure is local. A sensor fault ends the cycle early; a failed
    /// append loses the row but does not stop the live update.
    pub fn run_cycle(&mut self, timestamp_secs: u64) -> CycleOutcome {
        let reading = match self.sampler.sample(timestamp_secs) {
            Ok(reading) => reading,
            Err(_) => return CycleOutcome::SensorFault,
        };
        debug!("{}", reading);

        self.state.readings.publish(reading);
        let persisted = self.persist(&reading);
        let streamed = self.control.stream_reading(&reading, &mut self.transport);

        CycleOutcome::Completed { persisted, streamed }
    }

    fn persist(&mut self, reading: &Reading) -> bool {
        let result = LogRecord::from_reading(reading).and_then(|record| self.log.append(&record));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Reading at {}s not logged: {}", reading.timestamp_secs, e);
                false
            }
        }
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> ControlOutcome {
        self.control.handle_event(event, &self.log, &mut self.transport)
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.state.readings.latest()
    }

    pub fn live_mode_enabled(&self) -> bool {
        self.control.live_mode_enabled()
    }

    pub fn log(&self) -> &AppendLog<S> {
        &self.log
    }

    pub fn sampler(&self) -> &SensorSampler<C, A> {
        &self.sampler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<C, A, S, T> TransportEventHandler for DataLogger<'_, C, A, S, T>
where
    C: ClimateSensor,
    A: AnalogInput,
    S: LogStorage,
    T: CommandTransport,
{
    fn on_transport_event(&mut self, event: TransportEvent) {
        self.handle_event(event);
    }
}

/// Fixed-period deadlines for the sampling cycle.
///
/// Missed ticks are never replayed: after an overrun the next deadline is
/// one period from the moment the late cycle finished.
#[derive(Debug, Clone, Copy)]
pub struct CycleSchedule {
    period: Duration,
    next: Instant,
}

impl CycleSchedule {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self {
            period,
            next: start + period,
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Move to the next deadline once a cycle has run. Returns the number
    /// of ticks skipped because the cycle finished late.
    pub fn advance(&mut self, now: Instant) -> u64 {
        self.next += self.period;
        // A deadline falling exactly on `now` is still on time
        if self.next >= now {
            return 0;
        }

        let skipped = (now - self.next).as_ticks() / self.period.as_ticks().max(1) + 1;
        self.next = now + self.period;
        skipped
    }
}

/// Run the sampling cycle forever, once per `period`.
pub async fn sampling_task<C, A, S, T>(logger: &SharedLogger<'_, C, A, S, T>, period: Duration)
where
    C: ClimateSensor,
    A: AnalogInput,
    S: LogStorage,
    T: CommandTransport,
{
    info!("Sampling every {} ms", period.as_millis());
    let mut schedule = CycleSchedule::new(Instant::now(), period);

    loop {
        Timer::at(schedule.next_deadline()).await;

        let outcome = logger.lock().await.run_cycle(Instant::now().as_secs());
        debug!("Cycle: {:?}", outcome);

        let skipped = schedule.advance(Instant::now());
        if skipped > 0 {
            warn!("Sampling cycle overran, skipped {} ticks", skipped);
        }
    }
}

/// Dispatch transport events to the control plane as they arrive.
pub async fn command_task<C, A, S, T>(logger: &SharedLogger<'_, C, A, S, T>, events: &EventChannel)
where
    C: ClimateSensor,
    A: AnalogInput,
    S: LogStorage,
    T: CommandTransport,
{
    loop {
        let event = events.receive().await;
        let outcome = logger.lock().await.handle_event(event);
        debug!("Event: {:?}", outcome);
    }
}
