//! The transport abstraction both the BLE and Classic Bluetooth drivers
//! implement, and the events they surface to the gadget core.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TransportError;

/// Which Bluetooth transport a gadget instance is bound to. At most one is
/// active per instance (invariant I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
    Classic,
}

/// Link-level events a transport driver surfaces to the gadget core's
/// connection-lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { peer_address: String },
    Disconnected,
    /// A complete directive/event payload arrived on a data stream.
    PayloadReceived { stream_id: u8, payload: Vec<u8> },
    /// A CONTROL-stream command byte arrived.
    ControlReceived { payload: Vec<u8> },
}

/// Unified interface for sending/receiving framed bytes regardless of which
/// Bluetooth transport backs the link. Mirrors the donor transport crate's
/// `Transport` trait shape, generalized from HID command/response framing
/// to BLE-packet/SPP-frame framing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write a complete, already-framed payload to the link (a full BLE
    /// transaction's worth of packets, or a single SPP frame).
    async fn send(&self, stream_id: u8, payload: &[u8]) -> Result<(), TransportError>;

    /// Begin advertising/listening so a hub can connect.
    async fn start(&self) -> Result<(), TransportError>;

    /// Tear down the current link without clearing pairing state.
    async fn stop(&self) -> Result<(), TransportError>;

    /// True if a hub is currently connected.
    async fn is_connected(&self) -> bool;

    /// Toggle host-level discoverability: which advertisement payload BLE
    /// broadcasts, or the `Discoverable`/`Pairable` adapter flags for
    /// Classic Bluetooth.
    async fn set_discoverable(&self, on: bool) -> Result<(), TransportError>;

    /// Subscribe to link events (connect/disconnect/payload arrival).
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;
}

pub type BoxedTransport = Arc<dyn Transport>;
