pub mod interface;
pub mod request;

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{keys, Config};
use crate::connection::interface::{ConnectionInterface, WirePacket};
use crate::connection::request::{
    republish_interval, request_deadline, RequestTable, REPLY_UNIQUE_ID_FIELD,
};
use crate::field::{Field, FieldValue};
use crate::message::{Message, MessageKind};
use crate::policy::{self, Policy};
use crate::specification::validator::check_reserved_tracking_fields;
use crate::specification::Specification;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::util::time::now_timestamp;

/// Blocks indefinitely when passed as a timeout.
pub const GMSEC_WAIT_FOREVER: i32 = -1;
/// Disables request republishing when passed as a republish interval.
pub const REQUEST_REPUBLISH_NEVER: i32 = -1;

/// Upper bound on a single receive-pump wait, so pumps periodically recheck
/// deadlines and republish schedules.
const PUMP_SLICE: Duration = Duration::from_millis(20);

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Completion callback of [Connection::request_with_callback]. `on_reply` may
/// fire more than once for a multi-response request; `on_timeout` fires at
/// most once, and never after a final reply.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplyCallback: Send + Sync + 'static {
    async fn on_reply(&self, request: &Message, reply: &Message);
    async fn on_timeout(&self, request: &Message);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionState {
    Disconnected,
    Connected,
}

/// Which tracking fields get injected on send. Each field follows the master
/// `TRACKING` switch unless overridden individually.
#[derive(Clone, Copy, Debug)]
struct TrackingConfig {
    node: bool,
    process_id: bool,
    user_name: bool,
    connection_id: bool,
    publish_time: bool,
    unique_id: bool,
    mw_info: bool,
}

impl TrackingConfig {
    fn from_config(config: &Config) -> TrackingConfig {
        let master = config.get_bool_value(keys::TRACKING, true);
        TrackingConfig {
            node: config.get_bool_value(keys::TRACKING_NODE, master),
            process_id: config.get_bool_value(keys::TRACKING_PROCESS_ID, master),
            user_name: config.get_bool_value(keys::TRACKING_USER_NAME, master),
            connection_id: config.get_bool_value(keys::TRACKING_CONNECTION_ID, master),
            publish_time: config.get_bool_value(keys::TRACKING_PUBLISH_TIME, master),
            unique_id: config.get_bool_value(keys::TRACKING_UNIQUE_ID, master),
            mw_info: config.get_bool_value(keys::TRACKING_MW_INFO, master),
        }
    }
}

/// A middleware-agnostic bus connection: pub/sub plus correlated
/// request/reply on top of a [ConnectionInterface], with policy-controlled
/// packaging, optional message validation and tracking-field injection.
///
/// All methods take `&self`; internal state is synchronized so a connection
/// can be driven from several tasks at once, and background request pumps
/// share the internals via `Arc`.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{id:{}}}", self.inner.connection_id)
    }
}

impl Connection {
    /// Builds a connection for the middleware selected by `mw-id`.
    pub fn from_config(config: &Config) -> GmsecResult<Connection> {
        Connection::with_interface(config, interface::from_config(config)?)
    }

    /// Builds a connection around a caller-supplied middleware, bypassing the
    /// `mw-id` registry.
    pub fn with_interface(
        config: &Config,
        interface: Box<dyn ConnectionInterface>,
    ) -> GmsecResult<Connection> {
        let validate_all = config.get_bool_value(keys::MSG_CONTENT_VALIDATE_ALL, false);
        let validate_send = validate_all
            || config.get_bool_value(keys::MSG_CONTENT_VALIDATE_SEND, false)
            || config.get_bool_value(keys::MSG_CONTENT_VALIDATE, false);
        let validate_recv =
            validate_all || config.get_bool_value(keys::MSG_CONTENT_VALIDATE_RECV, false);

        let specification = if validate_send || validate_recv {
            Some(Specification::from_config(config)?)
        } else {
            None
        };

        let open_response = config
            .get_value(keys::REQ_RESP_BEHAVIOR)
            .is_some_and(|v| v.eq_ignore_ascii_case("OPEN-RESP"));

        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            mw = interface.library_root_name(),
            connection_id, "created connection"
        );

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                policy: policy::from_config(config)?,
                interface: Mutex::new(interface),
                state: RwLock::new(ConnectionState::Disconnected),
                subscriptions: RwLock::new(FxHashSet::default()),
                pending: RequestTable::new(),
                inbound: Mutex::new(VecDeque::new()),
                pump_gate: Mutex::new(()),
                specification,
                tracking: TrackingConfig::from_config(config),
                validate_send,
                validate_recv,
                open_response,
                remove_tracking: config.get_bool_value(keys::REMOVE_TRACKING_FIELDS, true),
                connection_id,
            }),
        })
    }

    pub fn connection_id(&self) -> u32 {
        self.inner.connection_id
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    pub async fn library_root_name(&self) -> String {
        self.inner.interface.lock().await.library_root_name().to_string()
    }

    pub async fn library_version(&self) -> String {
        self.inner.interface.lock().await.library_version()
    }

    pub async fn mw_info(&self) -> String {
        self.inner.interface.lock().await.mw_info()
    }

    pub async fn connect(&self) -> GmsecResult<()> {
        let mut state = self.inner.state.write().await;
        if *state == ConnectionState::Connected {
            return Err(Status::new(
                StatusClass::Connection,
                StatusCode::InvalidConnection,
                "Connection has already been initialized",
            ));
        }

        let mut mw = self.inner.interface.lock().await;
        mw.mw_connect().await?;
        info!(mw_info = mw.mw_info(), "connected to middleware");
        *state = ConnectionState::Connected;
        Ok(())
    }

    /// Idempotent. Cancels pending requests, which ends their pumps.
    pub async fn disconnect(&self) -> GmsecResult<()> {
        let mut state = self.inner.state.write().await;
        if *state != ConnectionState::Connected {
            return Ok(());
        }

        self.inner.pending.cancel_all().await;
        self.inner.interface.lock().await.mw_disconnect().await?;
        *state = ConnectionState::Disconnected;
        info!("disconnected from middleware");
        Ok(())
    }

    pub async fn subscribe(&self, pattern: &str) -> GmsecResult<()> {
        self.subscribe_with_config(pattern, &Config::new()).await
    }

    pub async fn subscribe_with_config(&self, pattern: &str, config: &Config) -> GmsecResult<()> {
        self.inner.ensure_connected().await?;
        self.inner.policy.check_subscribe(pattern)?;

        let mut subscriptions = self.inner.subscriptions.write().await;
        if subscriptions.contains(pattern) {
            return Err(Status::new(
                StatusClass::Connection,
                StatusCode::InvalidSubjectName,
                format!("Duplicate subscription to subject '{}'", pattern),
            ));
        }

        self.inner.interface.lock().await.mw_subscribe(pattern, config).await?;
        subscriptions.insert(pattern.to_string());
        debug!(pattern, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, pattern: &str) -> GmsecResult<()> {
        self.inner.ensure_connected().await?;

        let mut subscriptions = self.inner.subscriptions.write().await;
        if !subscriptions.contains(pattern) {
            return Err(Status::new(
                StatusClass::Connection,
                StatusCode::InvalidSubjectName,
                format!("Not subscribed to subject '{}'", pattern),
            ));
        }

        self.inner.interface.lock().await.mw_unsubscribe(pattern).await?;
        subscriptions.remove(pattern);
        debug!(pattern, "unsubscribed");
        Ok(())
    }

    pub async fn publish(&self, msg: &mut Message) -> GmsecResult<()> {
        self.publish_with_config(msg, &Config::new()).await
    }

    pub async fn publish_with_config(&self, msg: &mut Message, config: &Config) -> GmsecResult<()> {
        self.inner.ensure_connected().await?;
        require_kind(msg, MessageKind::Publish)?;

        self.inner.send(msg, config, None).await?;
        trace!(subject = msg.subject(), "published message");
        Ok(())
    }

    /// Issues a request and waits for the reply, pumping the receive side
    /// inline. Republishing follows the clamped interval; see
    /// [request::republish_interval] for the clamps.
    pub async fn request(
        &self,
        request: &mut Message,
        timeout_ms: i32,
        republish_ms: i32,
    ) -> GmsecResult<Message> {
        self.inner.ensure_connected().await?;
        require_kind(request, MessageKind::Request)?;

        let unique_id = self.inner.interface.lock().await.mw_get_unique_id();
        let mut reply_rx = self.inner.pending.register(unique_id.clone(), false).await;

        let packet = match self.inner.send(request, &Config::new(), Some(&unique_id)).await {
            Ok(packet) => packet,
            Err(e) => {
                self.inner.pending.retire(&unique_id).await;
                return Err(e);
            }
        };

        let result = self
            .inner
            .await_reply(
                &mut reply_rx,
                request_deadline(timeout_ms),
                republish_interval(republish_ms),
                &unique_id,
                &packet,
            )
            .await;
        self.inner.pending.retire(&unique_id).await;
        result
    }

    /// Issues a request and delivers replies through `callback` from a
    /// background pump. Multi-response requests (`MW-MULTI-RESP` in the
    /// request's config) keep the pump alive across keep-alive replies.
    pub async fn request_with_callback(
        &self,
        request: &mut Message,
        timeout_ms: i32,
        republish_ms: i32,
        callback: Arc<dyn ReplyCallback>,
    ) -> GmsecResult<()> {
        self.inner.ensure_connected().await?;
        require_kind(request, MessageKind::Request)?;

        let multi_response = request.config().get_bool_value(keys::MULTI_RESP, false);
        let unique_id = self.inner.interface.lock().await.mw_get_unique_id();
        let reply_rx = self.inner.pending.register(unique_id.clone(), multi_response).await;

        let packet = match self.inner.send(request, &Config::new(), Some(&unique_id)).await {
            Ok(packet) => packet,
            Err(e) => {
                self.inner.pending.retire(&unique_id).await;
                return Err(e);
            }
        };

        let inner = self.inner.clone();
        let request = request.clone();
        let deadline = request_deadline(timeout_ms);
        let republish = republish_interval(republish_ms);
        tokio::spawn(async move {
            inner
                .run_callback_pump(request, unique_id, reply_rx, deadline, republish, packet, callback)
                .await;
        });
        Ok(())
    }

    /// Sends `reply` back to the issuer of `request`, carrying over the
    /// request's correlation ID.
    pub async fn reply(&self, request: &Message, reply: &mut Message) -> GmsecResult<()> {
        self.inner.ensure_connected().await?;
        require_kind(reply, MessageKind::Reply)?;

        let unique_id = request.get_string_value(REPLY_UNIQUE_ID_FIELD).map_err(|_| {
            Status::new(
                StatusClass::Msg,
                StatusCode::InvalidMessage,
                "Request message carries no reply correlation ID",
            )
        })?;

        let mut correlation = Field::new(REPLY_UNIQUE_ID_FIELD, FieldValue::String(unique_id))?;
        correlation.set_tracking(true);
        reply.add_field(correlation);

        self.inner.send(reply, &Config::new(), None).await?;
        trace!(subject = reply.subject(), "sent reply");
        Ok(())
    }

    /// Next inbound message, `Ok(None)` once `timeout_ms` elapses. 0 polls
    /// without blocking, [GMSEC_WAIT_FOREVER] blocks until traffic arrives.
    pub async fn receive(&self, timeout_ms: i32) -> GmsecResult<Option<Message>> {
        self.inner.ensure_connected().await?;

        let deadline = if timeout_ms < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        };

        let mut polled = false;
        loop {
            if let Some(msg) = self.inner.inbound.lock().await.pop_front() {
                return Ok(Some(msg));
            }

            let max_wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() && polled {
                        return Ok(None);
                    }
                    remaining.min(PUMP_SLICE)
                }
                None => PUMP_SLICE,
            };
            self.inner.pump_once(max_wait).await?;
            polled = true;
        }
    }
}

struct ConnectionInner {
    policy: Box<dyn Policy>,
    interface: Mutex<Box<dyn ConnectionInterface>>,
    state: RwLock<ConnectionState>,
    subscriptions: RwLock<FxHashSet<String>>,
    pending: RequestTable,
    inbound: Mutex<VecDeque<Message>>,
    /// Serializes receive pumps: inline pumps of sync requests and
    /// `receive()`, and the spawned pumps of callback requests.
    pump_gate: Mutex<()>,
    specification: Option<Specification>,
    tracking: TrackingConfig,
    validate_send: bool,
    validate_recv: bool,
    open_response: bool,
    remove_tracking: bool,
    connection_id: u32,
}

impl ConnectionInner {
    async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    async fn ensure_connected(&self) -> GmsecResult<()> {
        if !self.is_connected().await {
            return Err(Status::new(
                StatusClass::Connection,
                StatusCode::InvalidConnection,
                "Connection has not been initialized",
            ));
        }
        Ok(())
    }

    /// Shared send path of publish, request and reply. `request_id` marks a
    /// request send: the ID is embedded for reply correlation and the packet
    /// goes out through `mw_request`.
    async fn send(
        &self,
        msg: &mut Message,
        config: &Config,
        request_id: Option<&str>,
    ) -> GmsecResult<WirePacket> {
        check_reserved_tracking_fields(msg)?;
        if self.validate_send {
            if let Some(spec) = &self.specification {
                spec.validate_message(msg)?;
            }
        }
        self.policy.check_send(msg.subject())?;

        let mut mw = self.interface.lock().await;
        self.inject_tracking_fields(msg, &mut **mw, request_id)?;
        let result = match self.policy.package(msg) {
            Ok(data) => {
                let packet = WirePacket {
                    subject: msg.subject().to_string(),
                    kind: msg.kind(),
                    data,
                };
                let sent = match request_id {
                    Some(unique_id) => mw.mw_request(packet.clone(), unique_id).await,
                    None => mw.mw_publish(packet.clone(), config).await,
                };
                sent.map(|()| packet)
            }
            Err(e) => Err(e),
        };
        drop(mw);

        if self.remove_tracking {
            strip_tracking_fields(msg);
        }
        result
    }

    fn inject_tracking_fields(
        &self,
        msg: &mut Message,
        mw: &mut dyn ConnectionInterface,
        request_id: Option<&str>,
    ) -> GmsecResult<()> {
        let tracking = &self.tracking;
        if tracking.node {
            msg.add_field(tracking_field("NODE", FieldValue::String(node_name()))?);
        }
        if tracking.process_id {
            msg.add_field(tracking_field(
                "PROCESS-ID",
                FieldValue::U32(std::process::id()),
            )?);
        }
        if tracking.user_name {
            msg.add_field(tracking_field("USER-NAME", FieldValue::String(user_name()))?);
        }
        if tracking.connection_id {
            msg.add_field(tracking_field(
                "CONNECTION-ID",
                FieldValue::U32(self.connection_id),
            )?);
        }
        if tracking.publish_time {
            msg.add_field(tracking_field(
                "PUBLISH-TIME",
                FieldValue::String(now_timestamp()),
            )?);
        }
        if tracking.unique_id {
            msg.add_field(tracking_field(
                "UNIQUE-ID",
                FieldValue::String(mw.mw_get_unique_id()),
            )?);
        }
        if tracking.mw_info {
            msg.add_field(tracking_field("MW-INFO", FieldValue::String(mw.mw_info()))?);
        }

        if let Some(unique_id) = request_id {
            msg.add_field(tracking_field(
                REPLY_UNIQUE_ID_FIELD,
                FieldValue::String(unique_id.to_string()),
            )?);
        }
        Ok(())
    }

    /// Inline pump of a sync request: drains the reply channel, republishes
    /// on schedule and turns an elapsed deadline into a timeout error.
    async fn await_reply(
        &self,
        reply_rx: &mut mpsc::UnboundedReceiver<Message>,
        deadline: Option<Instant>,
        republish: Option<Duration>,
        unique_id: &str,
        packet: &WirePacket,
    ) -> GmsecResult<Message> {
        let mut next_republish = republish.map(|interval| Instant::now() + interval);
        loop {
            match reply_rx.try_recv() {
                Ok(reply) => return Ok(reply),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(Status::new(
                        StatusClass::Connection,
                        StatusCode::InvalidConnection,
                        "Request was cancelled before a reply arrived",
                    ));
                }
            }

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Err(Status::new(
                        StatusClass::Connection,
                        StatusCode::TimeoutOccurred,
                        format!("Request on subject {} timed out", packet.subject),
                    ));
                }
            }

            next_republish = self
                .republish_if_due(now, next_republish, republish, packet, unique_id)
                .await;

            self.pump_once(pump_slice(now, deadline, next_republish)).await?;
        }
    }

    /// Background pump of a callback request. Never fails; errors are logged
    /// and the pump carries on until a final reply, the deadline, or
    /// cancellation.
    #[allow(clippy::too_many_arguments)]
    async fn run_callback_pump(
        &self,
        request: Message,
        unique_id: String,
        mut reply_rx: mpsc::UnboundedReceiver<Message>,
        deadline: Option<Instant>,
        republish: Option<Duration>,
        packet: WirePacket,
        callback: Arc<dyn ReplyCallback>,
    ) {
        let mut next_republish = republish.map(|interval| Instant::now() + interval);
        loop {
            loop {
                match reply_rx.try_recv() {
                    Ok(reply) => callback.on_reply(&request, &reply).await,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        trace!(subject = request.subject(), "request retired, pump stopping");
                        return;
                    }
                }
            }

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    self.pending.retire(&unique_id).await;
                    callback.on_timeout(&request).await;
                    return;
                }
            }

            next_republish = self
                .republish_if_due(now, next_republish, republish, &packet, &unique_id)
                .await;

            if let Err(e) = self.pump_once(pump_slice(now, deadline, next_republish)).await {
                warn!(subject = request.subject(), "receive pump failed: {}", e);
                tokio::time::sleep(PUMP_SLICE).await;
            }
        }
    }

    async fn republish_if_due(
        &self,
        now: Instant,
        next_republish: Option<Instant>,
        republish: Option<Duration>,
        packet: &WirePacket,
        unique_id: &str,
    ) -> Option<Instant> {
        let (due, interval) = match (next_republish, republish) {
            (Some(due), Some(interval)) => (due, interval),
            _ => return next_republish,
        };
        if now < due {
            return next_republish;
        }

        trace!(subject = %packet.subject, "republishing pending request");
        let result = self
            .interface
            .lock()
            .await
            .mw_request(packet.clone(), unique_id)
            .await;
        if let Err(e) = result {
            warn!(subject = %packet.subject, "republish of pending request failed: {}", e);
        }
        Some(due + interval)
    }

    /// Receives at most one message from the middleware and dispatches it.
    /// Only one pump runs at a time; the others queue on the gate.
    async fn pump_once(&self, max_wait: Duration) -> GmsecResult<()> {
        let _pump = self.pump_gate.lock().await;

        let wait_started = Instant::now();
        let received = self.interface.lock().await.mw_receive(max_wait).await?;
        let Some(packet) = received else {
            // interfaces may return early - keep polling callers from spinning
            tokio::time::sleep_until(wait_started + max_wait).await;
            return Ok(());
        };

        let msg = self.policy.unpackage(packet.data)?;
        if self.validate_recv {
            if let Some(spec) = &self.specification {
                spec.validate_message(&msg)?;
            }
        }

        self.dispatch(msg).await;
        self.interface.lock().await.mw_acknowledge().await?;
        Ok(())
    }

    /// Replies are routed to their pending request; everything else, plus
    /// unmatched replies, queues up for [Connection::receive]. In
    /// open-response mode routed replies are queued as well.
    async fn dispatch(&self, mut msg: Message) {
        if msg.kind() == MessageKind::Reply {
            if let Ok(unique_id) = msg.get_string_value(REPLY_UNIQUE_ID_FIELD) {
                msg.clear_field(REPLY_UNIQUE_ID_FIELD);
                if self.pending.route(&unique_id, &msg).await {
                    trace!(subject = msg.subject(), "reply routed to pending request");
                    if self.open_response {
                        self.inbound.lock().await.push_back(msg);
                    }
                    return;
                }
            }
        }
        self.inbound.lock().await.push_back(msg);
    }
}

fn require_kind(msg: &Message, wanted: MessageKind) -> GmsecResult<()> {
    if msg.kind() != wanted {
        return Err(Status::new(
            StatusClass::Msg,
            StatusCode::InvalidMessage,
            format!(
                "Operation requires a {} message, got {}",
                wanted.kind_name(),
                msg.kind().kind_name()
            ),
        ));
    }
    Ok(())
}

fn pump_slice(now: Instant, deadline: Option<Instant>, next_republish: Option<Instant>) -> Duration {
    let mut slice = PUMP_SLICE;
    if let Some(deadline) = deadline {
        slice = slice.min(deadline.saturating_duration_since(now));
    }
    if let Some(due) = next_republish {
        slice = slice.min(due.saturating_duration_since(now));
    }
    slice
}

fn tracking_field(name: &str, value: FieldValue) -> GmsecResult<Field> {
    let mut field = Field::new(name, value)?.with_header(true);
    field.set_tracking(true);
    Ok(field)
}

fn strip_tracking_fields(msg: &mut Message) {
    let names = msg
        .fields()
        .filter(|f| f.is_tracking())
        .map(|f| f.name().to_string())
        .collect::<Vec<_>>();
    for name in names {
        msg.clear_field(&name);
    }
}

fn node_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
