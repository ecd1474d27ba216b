use std::fmt::Debug;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;

use crate::config::{keys, Config};
use crate::message::MessageKind;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// A packaged message as it crosses the middleware boundary: the policy wire
/// form plus the addressing a transport needs without opening the payload.
#[derive(Clone, Debug)]
pub struct WirePacket {
    pub subject: String,
    pub kind: MessageKind,
    pub data: Bytes,
}

/// The seam between the middleware-agnostic [Connection](crate::connection::Connection)
/// and a concrete transport. Implementations only move packaged bytes; all
/// validation, tracking and correlation happens above this trait.
///
/// Implementations are driven from behind a mutex, so `&mut self` methods do
/// not need internal synchronization.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionInterface: Debug + Send + Sync + 'static {
    fn library_root_name(&self) -> &'static str;
    fn library_version(&self) -> String;
    fn mw_info(&self) -> String;

    async fn mw_connect(&mut self) -> GmsecResult<()>;
    async fn mw_disconnect(&mut self) -> GmsecResult<()>;

    async fn mw_subscribe(&mut self, pattern: &str, config: &Config) -> GmsecResult<()>;
    async fn mw_unsubscribe(&mut self, pattern: &str) -> GmsecResult<()>;

    async fn mw_publish(&mut self, packet: WirePacket, config: &Config) -> GmsecResult<()>;
    async fn mw_request(&mut self, packet: WirePacket, unique_id: &str) -> GmsecResult<()>;

    /// Waits up to `max_wait` for the next inbound packet; `None` means the
    /// wait elapsed. Implementations may return `None` early, the caller
    /// compensates.
    async fn mw_receive(&mut self, max_wait: Duration) -> GmsecResult<Option<WirePacket>>;

    fn mw_get_unique_id(&mut self) -> String;

    /// Confirms consumption of the packet most recently returned by
    /// [mw_receive](Self::mw_receive). No-op for transports without delivery
    /// guarantees.
    async fn mw_acknowledge(&mut self) -> GmsecResult<()> {
        Ok(())
    }
}

pub type InterfaceCtor = fn(&Config) -> GmsecResult<Box<dyn ConnectionInterface>>;

static REGISTRY: OnceLock<Mutex<FxHashMap<String, InterfaceCtor>>> = OnceLock::new();

fn registry() -> &'static Mutex<FxHashMap<String, InterfaceCtor>> {
    REGISTRY.get_or_init(|| {
        let mut ctors: FxHashMap<String, InterfaceCtor> = FxHashMap::default();
        ctors.insert("loopback".to_string(), |config| {
            Ok(Box::new(crate::test_util::loopback::LoopbackInterface::from_config(config)))
        });
        Mutex::new(ctors)
    })
}

/// Registers a middleware constructor under `mw_id` (case-insensitive),
/// replacing any previous registration of that name.
pub fn register_middleware(mw_id: &str, ctor: InterfaceCtor) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(mw_id.to_lowercase(), ctor);
}

/// Instantiates the middleware selected by the `mw-id` config key.
pub fn from_config(config: &Config) -> GmsecResult<Box<dyn ConnectionInterface>> {
    let Some(mw_id) = config.get_value(keys::MW_ID) else {
        return Err(Status::new(
            StatusClass::Connection,
            StatusCode::InvalidConnectionType,
            "mw-id is not specified in configuration",
        ));
    };

    let ctor = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&mw_id.to_lowercase())
        .copied();
    match ctor {
        Some(ctor) => ctor(config),
        None => Err(Status::new(
            StatusClass::Connection,
            StatusCode::InvalidConnectionType,
            format!("Unrecognized middleware ID: {}", mw_id),
        )),
    }
}
