use std::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::message::Message;

/// Reserved field carrying the correlation ID of a request across the bus.
/// Embedded into outgoing requests and replies, stripped from incoming
/// replies before delivery.
pub const REPLY_UNIQUE_ID_FIELD: &str = "__GMSEC-REPLY-UNIQUE-ID__";

/// Republish interval used when the caller passes 0.
pub const DEFAULT_REPUBLISH_MS: i32 = 60_000;
/// Smallest republish interval; anything lower is raised to this.
pub const MIN_REPUBLISH_MS: i32 = 100;
/// Smallest effective request timeout; anything lower is raised to this.
pub const MIN_REQUEST_TIMEOUT_MS: i32 = 10;

/// RESPONSE-STATUS values of RESP messages. The first two keep a
/// multi-response request alive, the rest retire it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(i16)]
pub enum ResponseStatus {
    Acknowledgement = 1,
    WorkingKeepAlive = 2,
    SuccessfulCompletion = 3,
    FailedCompletion = 4,
    InvalidRequest = 5,
    FinalMessage = 6,
}

impl ResponseStatus {
    pub fn is_final(&self) -> bool {
        !matches!(
            self,
            ResponseStatus::Acknowledgement | ResponseStatus::WorkingKeepAlive
        )
    }
}

/// Replies without a recognizable RESPONSE-STATUS count as final.
pub(crate) fn is_final_reply(reply: &Message) -> bool {
    let Ok(raw) = reply.get_i64_value("RESPONSE-STATUS") else {
        return true;
    };
    let Ok(raw) = i16::try_from(raw) else {
        return true;
    };
    match ResponseStatus::try_from(raw) {
        Ok(status) => status.is_final(),
        Err(_) => true,
    }
}

/// `None` means the request never expires.
pub(crate) fn request_deadline(timeout_ms: i32) -> Option<Instant> {
    if timeout_ms < 0 {
        return None;
    }
    let clamped = timeout_ms.max(MIN_REQUEST_TIMEOUT_MS);
    Some(Instant::now() + Duration::from_millis(clamped as u64))
}

/// `None` means never republish.
pub(crate) fn republish_interval(republish_ms: i32) -> Option<Duration> {
    if republish_ms < 0 {
        return None;
    }
    let clamped = if republish_ms == 0 {
        DEFAULT_REPUBLISH_MS
    } else {
        republish_ms.max(MIN_REPUBLISH_MS)
    };
    Some(Duration::from_millis(clamped as u64))
}

struct PendingRequest {
    reply_tx: mpsc::UnboundedSender<Message>,
    multi_response: bool,
}

/// Correlation table of in-flight requests, keyed by unique ID. The receive
/// pump routes incoming replies through here; a reply that no entry claims is
/// reported back so it can fall through to ordinary delivery.
pub(crate) struct RequestTable {
    pending: Mutex<FxHashMap<String, PendingRequest>>,
}

impl RequestTable {
    pub fn new() -> RequestTable {
        RequestTable {
            pending: Default::default(),
        }
    }

    /// Registers a request and returns the channel its replies arrive on.
    pub async fn register(
        &self,
        unique_id: String,
        multi_response: bool,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        self.pending.lock().await.insert(
            unique_id,
            PendingRequest {
                reply_tx,
                multi_response,
            },
        );
        reply_rx
    }

    /// Routes a reply to its pending request, retiring the entry unless a
    /// multi-response request is being kept alive. Returns whether a pending
    /// request claimed the reply.
    pub async fn route(&self, unique_id: &str, reply: &Message) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get(unique_id) else {
            return false;
        };

        let delivered = entry.reply_tx.send(reply.clone()).is_ok();
        if !delivered || !entry.multi_response || is_final_reply(reply) {
            pending.remove(unique_id);
        }
        delivered
    }

    pub async fn retire(&self, unique_id: &str) -> bool {
        self.pending.lock().await.remove(unique_id).is_some()
    }

    /// Drops all entries; their reply channels close, which ends any pump
    /// still waiting on them.
    pub async fn cancel_all(&self) {
        self.pending.lock().await.clear();
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
