//! Periodic publisher of standardized `MSG.HB` heartbeat messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::field::{Field, FieldValue};
use crate::generator::{
    next_counter, validation_requested, PublishRate, STARTUP_CONFIRM_TIMEOUT,
};
use crate::message::Message;
use crate::specification::{Specification, ISD_2014_00};
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// Publishes a heartbeat message at a configurable rate from a background
/// task.
///
/// The generator owns a dedicated [Connection], built from the same `config`
/// as the message [Specification]. The heartbeat skeleton is instantiated
/// from the `MSG.HB` schema, `extra_fields` are merged in and the subject is
/// re-resolved so that fields like `COMPONENT` land in the subject as well.
///
/// A `PUB-RATE` of 0 publishes a single heartbeat and then idles until the
/// rate is changed through [set_field](Self::set_field) or
/// [change_publish_rate](Self::change_publish_rate).
pub struct HeartbeatGenerator {
    shared: Arc<HbShared>,
    specification: Specification,
    validate: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct HbShared {
    connection: Connection,
    state: Mutex<HbState>,
    rate: PublishRate,
    alive: AtomicBool,
    version: u32,
}

struct HbState {
    msg: Message,
    counter: u16,
}

impl HeartbeatGenerator {
    /// Builds the generator and its heartbeat skeleton. The connection is
    /// not touched until [start](Self::start).
    pub fn new(
        config: &Config,
        pub_rate_secs: u16,
        extra_fields: Vec<Field>,
    ) -> GmsecResult<HeartbeatGenerator> {
        let connection = Connection::from_config(config)?;
        let specification = Specification::from_config(config)?;

        let template = Arc::clone(specification.find_template("MSG.HB")?);
        let mut msg = specification.instantiate("MSG.HB")?;
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(pub_rate_secs))?);
        for field in extra_fields {
            msg.add_field(field);
        }
        msg.set_subject(template.resolve_subject(&msg))?;

        Ok(HeartbeatGenerator {
            shared: Arc::new(HbShared {
                connection,
                version: specification.version(),
                state: Mutex::new(HbState { msg, counter: 1 }),
                rate: PublishRate::new(pub_rate_secs as u64),
                alive: AtomicBool::new(false),
            }),
            specification,
            validate: validation_requested(config),
            task: Mutex::new(None),
        })
    }

    /// Validates the heartbeat skeleton (when validation is configured),
    /// connects and spawns the publish task. The first heartbeat goes out
    /// immediately. A second `start` on a running generator is a warning,
    /// not an error.
    pub async fn start(&self) -> GmsecResult<()> {
        let mut task = self.task.lock().await;
        if self.shared.alive.load(Ordering::SeqCst) {
            warn!("heartbeat generator is already running");
            return Ok(());
        }

        if self.validate {
            let state = self.shared.state.lock().await;
            self.specification.validate_message(&state.msg)?;
        }

        self.shared.connection.connect().await?;
        self.shared.alive.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move { shared.run(ready_tx).await }));

        match tokio::time::timeout(STARTUP_CONFIRM_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            _ => warn!("heartbeat publish task did not confirm startup"),
        }
        info!("heartbeat generator started");
        Ok(())
    }

    /// Signals the publish task, joins it and disconnects. Stopping a
    /// generator that is not running is a warning, not an error.
    pub async fn stop(&self) -> GmsecResult<()> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            warn!("heartbeat generator is not running");
            return Ok(());
        };

        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.rate.wake();
        if let Err(e) = handle.await {
            warn!("heartbeat publish task ended abnormally: {}", e);
        }
        info!("heartbeat generator stopped");
        self.shared.connection.disconnect().await
    }

    pub fn is_running(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Equivalent to setting a `PUB-RATE` field: the new rate takes effect
    /// no later than the end of the current publish cycle.
    pub async fn change_publish_rate(&self, pub_rate_secs: u16) -> GmsecResult<()> {
        self.set_field(Field::new("PUB-RATE", FieldValue::U16(pub_rate_secs))?)
            .await?;
        Ok(())
    }

    /// Merges `field` into the heartbeat message, returning whether an
    /// existing field was overwritten. `PUB-RATE` retunes the publish loop
    /// and `COUNTER` overrides the running counter; negative values for
    /// either are rejected.
    pub async fn set_field(&self, field: Field) -> GmsecResult<bool> {
        let mut state = self.shared.state.lock().await;

        if matches!(field.name(), "PUB-RATE" | "COUNTER") {
            let value = field.get_i64_value()?;
            if value < 0 {
                return Err(Status::new(
                    StatusClass::HeartbeatGenerator,
                    StatusCode::ValueOutOfRange,
                    format!(
                        "Setting {} to less than zero is not permitted",
                        field.name()
                    ),
                ));
            }
            let is_rate = field.name() == "PUB-RATE";
            let overwritten = state.msg.add_field(field);
            if is_rate {
                self.shared.rate.set(value as u64);
            } else {
                state.counter = value as u16;
            }
            Ok(overwritten)
        } else {
            Ok(state.msg.add_field(field))
        }
    }
}

impl Drop for HeartbeatGenerator {
    fn drop(&mut self) {
        // a generator dropped without stop() must not keep publishing
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.rate.wake();
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl HbShared {
    async fn run(&self, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        debug!("heartbeat publish task running");

        let mut last_publish = Instant::now();
        self.publish_heartbeat().await;

        loop {
            if !self.rate.wait_cycle(last_publish, &self.alive).await {
                break;
            }
            last_publish = Instant::now();
            self.publish_heartbeat().await;
        }
        debug!("heartbeat publish task stopped");
    }

    /// Publish errors are logged and the cadence keeps going.
    async fn publish_heartbeat(&self) {
        let mut state = self.state.lock().await;
        if self.version == ISD_2014_00 {
            // the 2014 ISD types COUNTER as a signed 16-bit value
            state.counter %= 1 << 15;
        }
        let counter = next_counter(&mut state.counter);

        let result = async {
            state
                .msg
                .add_field(Field::new("COUNTER", FieldValue::U16(counter))?);
            if self.version == ISD_2014_00 {
                state.msg.add_field(Field::new(
                    "MSG-ID",
                    FieldValue::String(format!("GMSEC-HB-MSG-{}", counter)),
                )?);
            }
            self.connection.publish(&mut state.msg).await
        }
        .await;

        match result {
            Ok(()) => debug!(counter, "published heartbeat message"),
            Err(e) => error!("failed to publish heartbeat message: {}", e),
        }
    }
}
