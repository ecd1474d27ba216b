//! Periodic publisher of standardized `MSG.RSRC` resource messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::field::{Field, FieldValue};
use crate::generator::{
    next_counter, validation_requested, PublishRate, STARTUP_CONFIRM_TIMEOUT,
};
use crate::message::Message;
use crate::specification::Specification;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::util::rolling_data::RollingData;

/// One point-in-time reading of host resource figures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSample {
    /// Utilization per CPU, `0..=100`.
    pub cpu_util_percent: Vec<f32>,
    /// Physical memory utilization, `0..=100`.
    pub mem_util_percent: f32,
}

/// Source of resource figures for a [ResourceGenerator].
#[cfg_attr(test, automock)]
pub trait ResourceSampler: Send + Sync + 'static {
    /// Operating system identification for the `OPER-SYS` field.
    fn oper_sys(&self) -> String;

    /// Takes one reading. Called once per sample interval and once more per
    /// publish.
    fn sample(&self) -> ResourceSample;
}

/// Portable fallback sampler: reports the OS name and CPU count, with
/// utilization figures pinned at zero. Platform-specific collectors plug in
/// through [ResourceGenerator::with_sampler].
#[derive(Debug, Default)]
pub struct SystemSampler;

impl ResourceSampler for SystemSampler {
    fn oper_sys(&self) -> String {
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
    }

    fn sample(&self) -> ResourceSample {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ResourceSample {
            cpu_util_percent: vec![0.0; cpus],
            mem_util_percent: 0.0,
        }
    }
}

/// Publishes a resource message at a configurable rate from a background
/// task, while sampling the host on its own faster cadence.
///
/// Utilization figures are smoothed over a moving window of
/// `average_interval / sample_interval` samples, so a publish reflects the
/// recent past rather than one instant. Sampling continues while the
/// publish rate is 0.
pub struct ResourceGenerator {
    shared: Arc<RsrcShared>,
    specification: Specification,
    validate: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[cfg(test)]
impl std::fmt::Debug for ResourceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGenerator")
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

struct RsrcShared {
    connection: Connection,
    state: Mutex<RsrcState>,
    rate: PublishRate,
    alive: AtomicBool,
    sample_interval: Duration,
    sampler: Box<dyn ResourceSampler>,
}

struct RsrcState {
    msg: Message,
    counter: u16,
    window: SampleWindow,
}

/// Moving averages over the most recent `capacity` samples.
struct SampleWindow {
    capacity: usize,
    cpu: Vec<RollingData>,
    mem: Option<RollingData>,
}

impl SampleWindow {
    fn new(capacity: usize) -> SampleWindow {
        SampleWindow {
            capacity,
            cpu: Vec::new(),
            mem: None,
        }
    }

    fn push(&mut self, sample: &ResourceSample) {
        for (i, util) in sample.cpu_util_percent.iter().enumerate() {
            match self.cpu.get_mut(i) {
                Some(data) => data.add_value(*util as f64),
                None => self.cpu.push(RollingData::new(self.capacity, *util as f64)),
            }
        }
        match &mut self.mem {
            Some(data) => data.add_value(sample.mem_util_percent as f64),
            None => {
                self.mem = Some(RollingData::new(
                    self.capacity,
                    sample.mem_util_percent as f64,
                ))
            }
        }
    }

    fn averaged_cpu(&self) -> impl Iterator<Item = f32> + '_ {
        self.cpu.iter().map(|data| data.mean() as f32)
    }

    fn averaged_mem(&self) -> f32 {
        self.mem.as_ref().map(|data| data.mean() as f32).unwrap_or(0.0)
    }
}

impl ResourceGenerator {
    /// Builds a generator backed by the portable [SystemSampler].
    pub fn new(
        config: &Config,
        pub_rate_secs: u16,
        sample_interval_secs: u16,
        average_interval_secs: u16,
        extra_fields: Vec<Field>,
    ) -> GmsecResult<ResourceGenerator> {
        ResourceGenerator::with_sampler(
            config,
            pub_rate_secs,
            sample_interval_secs,
            average_interval_secs,
            extra_fields,
            Box::new(SystemSampler),
        )
    }

    /// Builds a generator that draws its figures from a caller-supplied
    /// sampler.
    pub fn with_sampler(
        config: &Config,
        pub_rate_secs: u16,
        sample_interval_secs: u16,
        average_interval_secs: u16,
        extra_fields: Vec<Field>,
        sampler: Box<dyn ResourceSampler>,
    ) -> GmsecResult<ResourceGenerator> {
        if sample_interval_secs < 1 {
            return Err(Status::new(
                StatusClass::ResourceGenerator,
                StatusCode::ResourceInfoSamplingError,
                "A sample rate of zero was specified",
            ));
        }
        if average_interval_secs < sample_interval_secs {
            return Err(Status::new(
                StatusClass::ResourceGenerator,
                StatusCode::ResourceInfoSamplingError,
                "A moving average interval less than sampling interval was specified",
            ));
        }

        let connection = Connection::from_config(config)?;
        let specification = Specification::from_config(config)?;

        let template = Arc::clone(specification.find_template("MSG.RSRC")?);
        let mut msg = specification.instantiate("MSG.RSRC")?;
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(pub_rate_secs))?);
        msg.add_field(Field::new(
            "OPER-SYS",
            FieldValue::String(sampler.oper_sys()),
        )?);
        for field in extra_fields {
            msg.add_field(field);
        }
        msg.set_subject(template.resolve_subject(&msg))?;

        let window = (average_interval_secs / sample_interval_secs) as usize;

        Ok(ResourceGenerator {
            shared: Arc::new(RsrcShared {
                connection,
                state: Mutex::new(RsrcState {
                    msg,
                    counter: 1,
                    window: SampleWindow::new(window),
                }),
                rate: PublishRate::new(pub_rate_secs as u64),
                alive: AtomicBool::new(false),
                sample_interval: Duration::from_secs(sample_interval_secs as u64),
                sampler,
            }),
            specification,
            validate: validation_requested(config),
            task: Mutex::new(None),
        })
    }

    /// Validates the resource skeleton (when validation is configured),
    /// connects and spawns the publish task. The first resource message
    /// goes out immediately. A second `start` on a running generator is a
    /// warning, not an error.
    pub async fn start(&self) -> GmsecResult<()> {
        let mut task = self.task.lock().await;
        if self.shared.alive.load(Ordering::SeqCst) {
            warn!("resource generator is already running");
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
            _ => warn!("resource publish task did not confirm startup"),
        }
        info!("resource generator started");
        Ok(())
    }

    /// Signals the publish task, joins it and disconnects. Stopping a
    /// generator that is not running is a warning, not an error.
    pub async fn stop(&self) -> GmsecResult<()> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            warn!("resource generator is not running");
            return Ok(());
        };

        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.rate.wake();
        if let Err(e) = handle.await {
            warn!("resource publish task ended abnormally: {}", e);
        }
        info!("resource generator stopped");
        self.shared.connection.disconnect().await
    }

    pub fn is_running(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Merges `field` into the resource message, returning whether an
    /// existing field was overwritten. `PUB-RATE` retunes the publish loop
    /// and `COUNTER` overrides the running counter; negative values for
    /// either are rejected.
    pub async fn set_field(&self, field: Field) -> GmsecResult<bool> {
        let mut state = self.shared.state.lock().await;

        if matches!(field.name(), "PUB-RATE" | "COUNTER") {
            let value = field.get_i64_value()?;
            if value < 0 {
                return Err(Status::new(
                    StatusClass::ResourceGenerator,
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

impl Drop for ResourceGenerator {
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

impl RsrcShared {
    async fn run(&self, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        debug!("resource publish task running");

        let mut last_publish = Instant::now();
        let mut last_sample = last_publish;
        self.publish_resources().await;

        loop {
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            if self.rate.take_fire_once() {
                last_publish = Instant::now();
                last_sample = last_publish;
                self.publish_resources().await;
                continue;
            }

            let rate = self.rate.secs();
            let sample_due = last_sample + self.sample_interval;
            let publish_due = (rate > 0).then(|| last_publish + Duration::from_secs(rate));
            let due = publish_due.map_or(sample_due, |p| p.min(sample_due));

            if Instant::now() < due {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = self.rate.changed() => continue,
                }
            }
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }

            let now = Instant::now();
            if publish_due.is_some_and(|p| now >= p) {
                last_publish = now;
                last_sample = now;
                self.publish_resources().await;
            } else if now >= sample_due {
                last_sample = now;
                self.collect_sample().await;
            }
        }
        debug!("resource publish task stopped");
    }

    async fn collect_sample(&self) {
        let mut state = self.state.lock().await;
        let sample = self.sampler.sample();
        state.window.push(&sample);
        trace!("collected resource sample");
    }

    /// Takes one more sample, folds the window into the message and
    /// publishes. Errors are logged and the cadence keeps going.
    async fn publish_resources(&self) {
        let mut state = self.state.lock().await;
        let sample = self.sampler.sample();
        state.window.push(&sample);

        let counter = next_counter(&mut state.counter);
        let RsrcState { msg, window, .. } = &mut *state;

        let result = async {
            msg.add_field(Field::new(
                "NUM-OF-CPUS",
                FieldValue::U16(window.cpu.len() as u16),
            )?);
            for (i, util) in window.averaged_cpu().enumerate() {
                msg.add_field(Field::new(
                    format!("CPU.{}.UTIL-PERCENT", i + 1),
                    FieldValue::F32(util),
                )?);
            }
            msg.add_field(Field::new(
                "MEM-UTIL-PERCENT",
                FieldValue::F32(window.averaged_mem()),
            )?);
            msg.add_field(Field::new("COUNTER", FieldValue::U16(counter))?);
            self.connection.publish(msg).await
        }
        .await;

        match result {
            Ok(()) => debug!(counter, "published resource message"),
            Err(e) => error!("failed to publish resource message: {}", e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use crate::test_util::templates::write_standard_templates;

    use super::*;

    fn generator_config(bus: &str, extra: &[&str]) -> Config {
        let dir = write_standard_templates();
        let mut config = Config::from_args([
            "mw-id=loopback".to_string(),
            format!("mw-server={}", bus),
            format!("gmsec-schema-path={}", dir.display()),
        ]);
        config.merge(&Config::from_args(extra.iter().copied()), true);
        config
    }

    async fn consumer(bus: &str) -> Connection {
        let config = Config::from_args([
            "mw-id=loopback".to_string(),
            format!("mw-server={}", bus),
        ]);
        let conn = Connection::from_config(&config).unwrap();
        conn.connect().await.unwrap();
        conn.subscribe("C2MS.>").await.unwrap();
        conn
    }

    fn component(name: &str) -> Field {
        Field::new("COMPONENT", FieldValue::String(name.to_string())).unwrap()
    }

    fn scripted_sampler(samples: Vec<ResourceSample>) -> MockResourceSampler {
        let mut sampler = MockResourceSampler::new();
        sampler
            .expect_oper_sys()
            .return_const("TEST-OS".to_string());
        let calls = AtomicUsize::new(0);
        sampler.expect_sample().returning(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst).min(samples.len() - 1);
            samples[n].clone()
        });
        sampler
    }

    #[test]
    fn test_interval_guards() {
        let config = generator_config("rsrc-guards", &[]);

        let err = ResourceGenerator::new(&config, 10, 0, 10, Vec::new()).unwrap_err();
        assert_eq!(err.class, StatusClass::ResourceGenerator);
        assert_eq!(err.code, StatusCode::ResourceInfoSamplingError);
        assert_eq!(err.reason, "A sample rate of zero was specified");

        let err = ResourceGenerator::new(&config, 10, 5, 4, Vec::new()).unwrap_err();
        assert_eq!(
            err.reason,
            "A moving average interval less than sampling interval was specified"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_moving_averages() {
        let consumer = consumer("rsrc-avg").await;
        let sampler = scripted_sampler(vec![
            ResourceSample {
                cpu_util_percent: vec![20.0, 40.0],
                mem_util_percent: 30.0,
            },
            ResourceSample {
                cpu_util_percent: vec![40.0, 60.0],
                mem_util_percent: 50.0,
            },
            ResourceSample {
                cpu_util_percent: vec![60.0, 80.0],
                mem_util_percent: 70.0,
            },
        ]);

        // publish every 2s, sample every 1s, average over the last 2 samples
        let generator = ResourceGenerator::with_sampler(
            &generator_config("rsrc-avg", &[]),
            2,
            1,
            2,
            vec![component("RSRC-TOOL")],
            Box::new(sampler),
        )
        .unwrap();
        generator.start().await.unwrap();

        let first = consumer.receive(1000).await.unwrap().unwrap();
        assert_eq!(first.subject(), "C2MS.MSSN.FILL.MSG.RSRC.RSRC-TOOL");
        assert_eq!(first.get_string_value("OPER-SYS").unwrap(), "TEST-OS");
        assert_eq!(first.get_i64_value("NUM-OF-CPUS").unwrap(), 2);
        assert_eq!(first.get_f64_value("CPU.1.UTIL-PERCENT").unwrap(), 20.0);
        assert_eq!(first.get_f64_value("CPU.2.UTIL-PERCENT").unwrap(), 40.0);
        assert_eq!(first.get_f64_value("MEM-UTIL-PERCENT").unwrap(), 30.0);
        assert_eq!(first.get_i64_value("COUNTER").unwrap(), 1);

        // second publish averages the in-between sample with its own
        let second = consumer.receive(3000).await.unwrap().unwrap();
        assert_eq!(second.get_f64_value("CPU.1.UTIL-PERCENT").unwrap(), 50.0);
        assert_eq!(second.get_f64_value("CPU.2.UTIL-PERCENT").unwrap(), 70.0);
        assert_eq!(second.get_f64_value("MEM-UTIL-PERCENT").unwrap(), 60.0);
        assert_eq!(second.get_i64_value("COUNTER").unwrap(), 2);

        generator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_zero_keeps_sampling_without_publishing() {
        let consumer = consumer("rsrc-zero").await;

        let calls = Arc::new(AtomicUsize::new(0));
        let mut sampler = MockResourceSampler::new();
        sampler
            .expect_oper_sys()
            .return_const("TEST-OS".to_string());
        let counted = calls.clone();
        sampler.expect_sample().returning(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            ResourceSample {
                cpu_util_percent: vec![10.0],
                mem_util_percent: 5.0,
            }
        });

        let generator = ResourceGenerator::with_sampler(
            &generator_config("rsrc-zero", &[]),
            0,
            1,
            4,
            vec![component("RSRC-TOOL")],
            Box::new(sampler),
        )
        .unwrap();
        generator.start().await.unwrap();

        assert!(consumer.receive(1000).await.unwrap().is_some());
        assert!(consumer.receive(10_000).await.unwrap().is_none());

        // the sample cadence ran the whole time
        assert!(calls.load(Ordering::SeqCst) >= 10);
        assert!(generator.is_running());

        generator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_resources_pass_validation() {
        let consumer = consumer("rsrc-valid").await;
        let generator = ResourceGenerator::new(
            &generator_config("rsrc-valid", &["gmsec-msg-content-validate=true"]),
            1,
            1,
            1,
            vec![component("RSRC-TOOL")],
        )
        .unwrap();
        generator.start().await.unwrap();

        // a validation failure would be swallowed by the publish loop, so
        // delivery is the signal that the message passed
        let msg = consumer.receive(1000).await.unwrap().unwrap();
        assert!(msg.get_i64_value("NUM-OF-CPUS").unwrap() >= 1);

        generator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_field_rejects_negative_rate() {
        let generator = ResourceGenerator::new(
            &generator_config("rsrc-neg", &[]),
            10,
            1,
            10,
            Vec::new(),
        )
        .unwrap();

        let err = generator
            .set_field(Field::new("PUB-RATE", FieldValue::I32(-1)).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.class, StatusClass::ResourceGenerator);
        assert_eq!(err.code, StatusCode::ValueOutOfRange);
        assert_eq!(
            err.reason,
            "Setting PUB-RATE to less than zero is not permitted"
        );
    }

    #[test]
    fn test_default_sampler_reports_host_figures() {
        let sampler = SystemSampler;
        assert!(!sampler.oper_sys().is_empty());

        let sample = sampler.sample();
        assert!(!sample.cpu_util_percent.is_empty());
        assert!(sample.cpu_util_percent.iter().all(|u| *u == 0.0));
    }

    #[test]
    fn test_sample_window_evicts_oldest() {
        let mut window = SampleWindow::new(2);
        for mem in [10.0, 20.0, 40.0] {
            window.push(&ResourceSample {
                cpu_util_percent: vec![mem],
                mem_util_percent: mem,
            });
        }
        assert_eq!(window.averaged_mem(), 30.0);
        assert_eq!(window.averaged_cpu().collect::<Vec<_>>(), vec![30.0]);
    }
}
