//! In-process middleware. Peers attach to a process-wide named bus
//! (`mw-server` key, default "default"); PUBLISH and REQUEST packets go to
//! every peer with a matching subscription, REPLY packets go to every other
//! peer since reply addressing is private to the requester.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::{keys, Config};
use crate::connection::interface::{ConnectionInterface, WirePacket};
use crate::message::MessageKind;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::subject;

static BUSES: OnceLock<Mutex<FxHashMap<String, Bus>>> = OnceLock::new();
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

fn buses() -> &'static Mutex<FxHashMap<String, Bus>> {
    BUSES.get_or_init(Default::default)
}

#[derive(Default)]
struct Bus {
    peers: Vec<Peer>,
}

struct Peer {
    id: u64,
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<WirePacket>,
}

impl Bus {
    fn deliver(&mut self, packet: &WirePacket, from: u64) {
        let mut delivered = 0;
        self.peers.retain(|peer| {
            let wants = match packet.kind {
                MessageKind::Reply => peer.id != from,
                _ => peer
                    .patterns
                    .iter()
                    .any(|pattern| subject::matches(&packet.subject, pattern)),
            };
            if !wants {
                return true;
            }
            match peer.sender.send(packet.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // peer was dropped without detaching
                Err(_) => false,
            }
        });
        trace!(subject = %packet.subject, delivered, "loopback delivery");
    }
}

#[derive(Debug)]
pub struct LoopbackInterface {
    bus_name: String,
    peer_id: u64,
    inbox: Option<mpsc::UnboundedReceiver<WirePacket>>,
    unique_counter: u64,
}

impl LoopbackInterface {
    pub fn from_config(config: &Config) -> LoopbackInterface {
        LoopbackInterface {
            bus_name: config
                .get_value(keys::MW_SERVER)
                .unwrap_or("default")
                .to_string(),
            peer_id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            inbox: None,
            unique_counter: 0,
        }
    }

    fn with_bus<T>(&self, f: impl FnOnce(&mut Bus) -> T) -> T {
        let mut buses = buses().lock().unwrap_or_else(PoisonError::into_inner);
        f(buses.entry(self.bus_name.clone()).or_default())
    }

    fn detach(&mut self) {
        self.inbox = None;
        self.with_bus(|bus| bus.peers.retain(|peer| peer.id != self.peer_id));
    }

    fn connected_inbox(&mut self) -> GmsecResult<&mut mpsc::UnboundedReceiver<WirePacket>> {
        self.inbox.as_mut().ok_or_else(|| {
            Status::new(
                StatusClass::Middleware,
                StatusCode::UninitializedObject,
                "Loopback interface is not connected",
            )
        })
    }
}

#[async_trait]
impl ConnectionInterface for LoopbackInterface {
    fn library_root_name(&self) -> &'static str {
        "loopback"
    }

    fn library_version(&self) -> String {
        format!("loopback {}", env!("CARGO_PKG_VERSION"))
    }

    fn mw_info(&self) -> String {
        format!("loopback: bus={}", self.bus_name)
    }

    async fn mw_connect(&mut self) -> GmsecResult<()> {
        if self.inbox.is_some() {
            return Err(Status::new(
                StatusClass::Middleware,
                StatusCode::InvalidConnection,
                "Loopback interface is already connected",
            ));
        }

        let (sender, inbox) = mpsc::unbounded_channel();
        self.with_bus(|bus| {
            bus.peers.push(Peer {
                id: self.peer_id,
                patterns: Vec::new(),
                sender,
            })
        });
        self.inbox = Some(inbox);
        trace!(bus = %self.bus_name, peer = self.peer_id, "loopback peer attached");
        Ok(())
    }

    async fn mw_disconnect(&mut self) -> GmsecResult<()> {
        self.detach();
        trace!(bus = %self.bus_name, peer = self.peer_id, "loopback peer detached");
        Ok(())
    }

    async fn mw_subscribe(&mut self, pattern: &str, _config: &Config) -> GmsecResult<()> {
        self.connected_inbox()?;
        self.with_bus(|bus| {
            if let Some(peer) = bus.peers.iter_mut().find(|peer| peer.id == self.peer_id) {
                peer.patterns.push(pattern.to_string());
            }
        });
        Ok(())
    }

    async fn mw_unsubscribe(&mut self, pattern: &str) -> GmsecResult<()> {
        self.connected_inbox()?;
        self.with_bus(|bus| {
            if let Some(peer) = bus.peers.iter_mut().find(|peer| peer.id == self.peer_id) {
                peer.patterns.retain(|p| p != pattern);
            }
        });
        Ok(())
    }

    async fn mw_publish(&mut self, packet: WirePacket, _config: &Config) -> GmsecResult<()> {
        self.connected_inbox()?;
        self.with_bus(|bus| bus.deliver(&packet, self.peer_id));
        Ok(())
    }

    async fn mw_request(&mut self, packet: WirePacket, _unique_id: &str) -> GmsecResult<()> {
        self.connected_inbox()?;
        self.with_bus(|bus| bus.deliver(&packet, self.peer_id));
        Ok(())
    }

    async fn mw_receive(&mut self, max_wait: Duration) -> GmsecResult<Option<WirePacket>> {
        let inbox = self.connected_inbox()?;
        if max_wait.is_zero() {
            return Ok(inbox.try_recv().ok());
        }
        match tokio::time::timeout(max_wait, inbox.recv()).await {
            Ok(packet) => Ok(packet),
            Err(_) => Ok(None),
        }
    }

    fn mw_get_unique_id(&mut self) -> String {
        self.unique_counter += 1;
        format!(
            "{}.{}.{}",
            std::process::id(),
            self.peer_id,
            self.unique_counter
        )
    }
}

impl Drop for LoopbackInterface {
    fn drop(&mut self) {
        if self.inbox.is_some() {
            self.detach();
        }
    }
}
