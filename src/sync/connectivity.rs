//! Connectivity tracking for the remote API.
//!
//! Callers feed online/offline observations into a [`ConnectivityMonitor`],
//! which fires its reconnect callbacks once per offline to online transition.
//! While offline, probes back off exponentially.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Maximum backoff duration in seconds
pub const MAX_BACKOFF_SECS: u64 = 8;

/// Granularity at which [`ConnectivityMonitor::run`] checks its stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

type ReconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Observed connectivity with reconnect notification.
///
/// Starts out offline, so the first online observation counts as a
/// reconnect.
#[derive(Default)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    failed_probes: AtomicU32,
    callbacks: Mutex<Vec<ReconnectCallback>>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run on every offline to online transition.
    pub fn on_reconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Arc::new(callback));
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Feed one observation. Returns true if it was a reconnect.
    pub fn report(&self, online: bool) -> bool {
        if !online {
            if self.online.swap(false, Ordering::AcqRel) {
                tracing::info!("remote API went offline");
            }
            return false;
        }
        if self.online.swap(true, Ordering::AcqRel) {
            return false;
        }

        tracing::info!("remote API reachable");
        // Snapshot so callbacks may register further callbacks.
        let callbacks: Vec<ReconnectCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => return true,
        };
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Run `probe`, record its result, and return the delay before the next probe.
    ///
    /// Online probes wait `online_interval`; consecutive failed probes follow
    /// [`calculate_backoff`].
    pub fn tick(&self, probe: impl FnOnce() -> bool, online_interval: Duration) -> Duration {
        let online = probe();
        self.report(online);
        if online {
            self.failed_probes.store(0, Ordering::Release);
            online_interval
        } else {
            let attempt = self.failed_probes.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            let delay = calculate_backoff(attempt);
            tracing::debug!(attempt, delay_secs = delay.as_secs(), "remote unreachable");
            delay
        }
    }

    /// Probe repeatedly until `stop` is set.
    pub fn run(&self, probe: impl Fn() -> bool, online_interval: Duration, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            let delay = self.tick(&probe, online_interval);
            let deadline = Instant::now() + delay;
            while !stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep((deadline - now).min(STOP_POLL));
            }
        }
    }
}

/// Delay before the next probe after `failed_probes` failures in a row.
///
/// The first retry goes out at once; each later one waits twice as long as
/// the previous, capped at [`MAX_BACKOFF_SECS`].
pub fn calculate_backoff(failed_probes: u32) -> Duration {
    let secs = match failed_probes {
        0 | 1 => 0,
        n => 1u64
            .checked_shl(n - 2)
            .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS)),
    };
    Duration::from_secs(secs)
}
