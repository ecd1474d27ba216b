//! Background publishers for standardized periodic messages.
//!
//! A generator owns its own [Connection](crate::connection::Connection) and a
//! message skeleton built from the configured
//! [Specification](crate::specification::Specification). `start()` connects
//! and spawns a publish task; `stop()` joins the task and disconnects. The
//! publish cadence can be retuned while running through `set_field()` with a
//! `PUB-RATE` field.

pub mod heartbeat;
pub mod resource;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::{keys, Config};

pub use heartbeat::HeartbeatGenerator;
pub use resource::{ResourceGenerator, ResourceSample, ResourceSampler, SystemSampler};

/// How long `start()` waits for the publish task to confirm it is running
/// before giving up on the confirmation (the task itself keeps going).
pub(crate) const STARTUP_CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether `config` asks for message validation on the sending side. A
/// generator with validation configured checks its skeleton before
/// connecting, since every message it will ever publish derives from it.
pub(crate) fn validation_requested(config: &Config) -> bool {
    config.get_bool_value(keys::MSG_CONTENT_VALIDATE, false)
        || config.get_bool_value(keys::MSG_CONTENT_VALIDATE_ALL, false)
        || config.get_bool_value(keys::MSG_CONTENT_VALIDATE_SEND, false)
}

/// Publish cadence shared between a generator handle and its publish task.
///
/// Rate changes wake a waiting task immediately. Setting the rate to 0 lets
/// one more publish through, then parks the task until the next rate change.
pub(crate) struct PublishRate {
    secs: AtomicU64,
    fire_once: AtomicBool,
    changed: Notify,
}

impl PublishRate {
    pub fn new(secs: u64) -> PublishRate {
        PublishRate {
            secs: AtomicU64::new(secs),
            fire_once: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    pub fn secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
        if secs == 0 {
            self.fire_once.store(true, Ordering::SeqCst);
        }
        self.changed.notify_one();
    }

    /// Wakes a waiting task without changing the rate, so it can observe a
    /// cleared `alive` flag.
    pub fn wake(&self) {
        self.changed.notify_one();
    }

    /// Completes on the next [set](Self::set) or [wake](Self::wake) call.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Consumes the one-shot publish credit armed by `set(0)`.
    pub fn take_fire_once(&self) -> bool {
        self.fire_once.swap(false, Ordering::SeqCst)
    }

    /// Waits until the next publish is due, `secs()` seconds after
    /// `last_publish`. Rate 0 parks until a rate change. Returns `false`
    /// when `alive` is cleared while waiting.
    pub async fn wait_cycle(&self, last_publish: Instant, alive: &AtomicBool) -> bool {
        loop {
            if !alive.load(Ordering::SeqCst) {
                return false;
            }
            if self.take_fire_once() {
                return true;
            }

            let secs = self.secs();
            if secs == 0 {
                self.changed().await;
                continue;
            }

            let due = last_publish + Duration::from_secs(secs);
            if Instant::now() >= due {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(due) => {}
                _ = self.changed() => {}
            }
        }
    }
}

/// Steps a generator's COUNTER: returns the value to publish and advances,
/// skipping 0 on wrap-around.
pub(crate) fn next_counter(counter: &mut u16) -> u16 {
    if *counter == 0 {
        *counter = 1;
    }
    let value = *counter;
    *counter = counter.wrapping_add(1);
    value
}
