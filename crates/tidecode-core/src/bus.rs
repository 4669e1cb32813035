//! Event bus for inter-component communication.
//!
//! The bus provides a typed publish/subscribe mechanism so components can
//! announce state transitions without direct coupling. Delivery is in
//! publish order per subscriber, non-durable, and without backpressure:
//! a slow subscriber lags and loses (broadcast semantics).
//!
//! Publication is synchronous — the channel map sits behind a
//! `parking_lot` lock held only during publish iteration — so producers
//! on plain OS threads (the PTY reader loop) can publish without an
//! async context.
//!
//! # Example
//!
//! ```ignore
//! let bus = Bus::new();
//!
//! let mut rx = bus.subscribe::<PtyExited>();
//! tokio::spawn(async move {
//!     while let Ok(event) = rx.recv().await {
//!         println!("pty {} exited", event.id);
//!     }
//! });
//!
//! bus.publish(PtyExited { id: "pty_123".into(), exit_code: Some(0) });
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Trait for events that can be published on the bus.
pub trait Event: Clone + Send + Sync + 'static {
    /// Event type name for serialization/logging.
    fn event_type() -> &'static str;
}

/// The event bus for pub/sub communication.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Typed channels by TypeId.
    channels: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    /// Wildcard subscribers (receive all events as JSON).
    wildcard: broadcast::Sender<BusEvent>,
}

/// A serialized event for wildcard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload as JSON.
    pub payload: serde_json::Value,
}

impl Bus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (wildcard, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                channels: RwLock::new(HashMap::new()),
                wildcard,
            }),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Callbacks must not re-enter `publish` for the same event kind.
    pub fn publish<E: Event + Serialize>(&self, event: E) {
        let type_id = TypeId::of::<E>();

        {
            let channels = self.inner.channels.read();
            if let Some(sender) = channels.get(&type_id) {
                if let Some(tx) = sender.downcast_ref::<broadcast::Sender<E>>() {
                    // Ignore send errors (no receivers)
                    let _ = tx.send(event.clone());
                }
            }
        }

        if let Ok(payload) = serde_json::to_value(&event) {
            let bus_event = BusEvent {
                event_type: E::event_type().to_string(),
                payload,
            };
            let _ = self.inner.wildcard.send(bus_event);
        }
    }

    /// Subscribe to events of type E.
    pub fn subscribe<E: Event>(&self) -> broadcast::Receiver<E> {
        let type_id = TypeId::of::<E>();

        {
            let channels = self.inner.channels.read();
            if let Some(sender) = channels.get(&type_id) {
                if let Some(tx) = sender.downcast_ref::<broadcast::Sender<E>>() {
                    return tx.subscribe();
                }
            }
        }

        let mut channels = self.inner.channels.write();
        // Re-check under the write lock: another subscriber may have raced us.
        if let Some(sender) = channels.get(&type_id) {
            if let Some(tx) = sender.downcast_ref::<broadcast::Sender<E>>() {
                return tx.subscribe();
            }
        }
        let (tx, rx) = broadcast::channel::<E>(DEFAULT_CAPACITY);
        channels.insert(type_id, Box::new(tx));
        rx
    }

    /// Subscribe to all events (wildcard).
    pub fn subscribe_all(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.wildcard.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PTY Event Types
// ============================================================================

/// Snapshot of a PTY session, carried by `pty.created` / `pty.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtySessionInfo {
    pub id: String,
    pub title: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: String,
    pub status: PtyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// PTY session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyStatus {
    Running,
    Exited,
}

/// PTY session created event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyCreated {
    pub info: PtySessionInfo,
}

impl Event for PtyCreated {
    fn event_type() -> &'static str {
        "pty.created"
    }
}

/// PTY session updated (title or cwd change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyUpdated {
    pub info: PtySessionInfo,
}

impl Event for PtyUpdated {
    fn event_type() -> &'static str {
        "pty.updated"
    }
}

/// PTY child exited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyExited {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Event for PtyExited {
    fn event_type() -> &'static str {
        "pty.exited"
    }
}

/// PTY session removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyDeleted {
    pub id: String,
}

impl Event for PtyDeleted {
    fn event_type() -> &'static str {
        "pty.deleted"
    }
}

// ============================================================================
// MCP Event Types
// ============================================================================

/// Connection status of an MCP server.
///
/// Derivable from (config.enabled, stored-credential freshness, last
/// connect outcome).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum McpServerStatus {
    /// Connected and tools enumerated.
    Connected,
    /// Disabled in configuration.
    Disabled,
    /// Server requires OAuth; run the auth flow.
    NeedsAuth,
    /// Dynamic client registration was rejected.
    NeedsClientRegistration { error: String },
    /// Connection or protocol failure.
    Failed { error: String },
}

impl McpServerStatus {
    /// Whether the connection is usable for tool calls.
    pub fn is_connected(&self) -> bool {
        matches!(self, McpServerStatus::Connected)
    }
}

/// MCP server status changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpStatusChanged {
    pub name: String,
    pub status: McpServerStatus,
}

impl Event for McpStatusChanged {
    fn event_type() -> &'static str {
        "mcp.status"
    }
}
