//! Process-wide state shared by the sampling cycle and the command handler
//!
//! Each field has exactly one writer: only the sampling cycle publishes
//! readings, only the control plane flips live mode. Readers may observe a
//! value written an instant earlier by the other side, which is fine for a
//! single reading slot and a single flag.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::storage::Reading;

/// Holds the most recent valid reading
pub struct ReadingStore {
    latest: BlockingMutex<CriticalSectionRawMutex, Cell<Option<Reading>>>,
}

impl ReadingStore {
    pub const fn new() -> Self {
        Self {
            latest: BlockingMutex::new(Cell::new(None)),
        }
    }

    /// Replace the stored reading. Sampling cycle only.
    pub fn publish(&self, reading: Reading) {
        self.latest.lock(|latest| latest.set(Some(reading)));
    }

    pub fn latest(&self) -> Option<Reading> {
        self.latest.lock(|latest| latest.get())
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether every new reading is streamed to the connected peer
pub struct LiveMode {
    enabled: AtomicBool,
}

impl LiveMode {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Control plane only. Returns the previous value.
    pub fn set(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }
}

impl Default for LiveMode {
    fn default() -> Self {
        Self::new()
    }
}

/// Main application state container
///
/// Created once at start-up and lives for the whole run. `const` so the
/// firmware can place it in a `static`.
pub struct AppState {
    pub readings: ReadingStore,
    pub live_mode: LiveMode,
}

impl AppState {
    pub const fn new() -> Self {
        Self {
            readings: ReadingStore::new(),
            live_mode: LiveMode::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
