//! Per-device leases around measurement runs.
//!
//! A harness run occupies the accelerator it executes on. Holding a
//! [`DeviceLease`] for the duration of the run keeps two searches from
//! timing kernels on the same device at once.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct LeaseState {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Registry of currently leased devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceLeases {
    state: Arc<LeaseState>,
}

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every controller that does not bring
    /// its own.
    pub fn global() -> &'static DeviceLeases {
        static GLOBAL: OnceLock<DeviceLeases> = OnceLock::new();
        GLOBAL.get_or_init(DeviceLeases::new)
    }

    /// Block until `device` is free, then hold it until the lease drops.
    pub fn acquire(&self, device: &str) -> DeviceLease {
        let start = Instant::now();
        let mut held = self.lock();
        while held.contains(device) {
            held = self
                .state
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(device.to_string());
        drop(held);

        debug!(device, waited = ?start.elapsed(), "device lease acquired");
        DeviceLease {
            state: Arc::clone(&self.state),
            device: device.to_string(),
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self, device: &str) -> Option<DeviceLease> {
        let mut held = self.lock();
        if !held.insert(device.to_string()) {
            return None;
        }
        Some(DeviceLease {
            state: Arc::clone(&self.state),
            device: device.to_string(),
        })
    }

    pub fn is_held(&self, device: &str) -> bool {
        self.lock().contains(device)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive use of one device; released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    state: Arc<LeaseState>,
    device: String,
}

impl DeviceLease {
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.device);
        drop(held);
        self.state.released.notify_all();
        debug!(device = %self.device, "device lease released");
    }
}
