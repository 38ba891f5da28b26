//! Classic Bluetooth transport driver: RFCOMM listener, SDP record
//! registration, and the SPP framer hookup.

use std::sync::Arc;

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::Session;
use futures_util::StreamExt;
use gadget_transport::error::TransportError;
use gadget_transport::spp::{SppDecoder, SppFramer};
use gadget_transport::transport::{LinkEvent, Transport};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{CLASSIC_SERVICE_UUID, RFCOMM_CHANNEL, SPP_SERVICE_CLASS_UUID};

struct Inner {
    session: Session,
    adapter_name: String,
    friendly_name: String,
    framer: Mutex<SppFramer>,
    events_tx: broadcast::Sender<LinkEvent>,
    outbound_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    connected: Mutex<bool>,
}

/// `gadget_transport::Transport` bound to an RFCOMM SPP channel, with pairing
/// auto-confirmed the way a NoInputNoOutput accessory would.
pub struct ClassicTransport {
    inner: Arc<Inner>,
}

impl ClassicTransport {
    pub fn new(session: Session, adapter_name: String, friendly_name: String) -> Self {
        let (events_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                session,
                adapter_name,
                friendly_name,
                framer: Mutex::new(SppFramer::new()),
                events_tx,
                outbound_tx: Mutex::new(None),
                connected: Mutex::new(false),
            }),
        }
    }

    async fn register_profile(&self) -> Result<ProfileHandle, TransportError> {
        let profile = Profile {
            uuid: SPP_SERVICE_CLASS_UUID,
            name: Some(self.inner.friendly_name.clone()),
            service: Some(CLASSIC_SERVICE_UUID.to_string()),
            channel: Some(RFCOMM_CHANNEL as u16),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(true),
            ..Default::default()
        };

        self.inner
            .session
            .register_profile(profile)
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))
    }

    fn spawn_connection_handler(inner: Arc<Inner>, stream: Stream) {
        tokio::spawn(async move {
            *inner.connected.lock() = true;
            let peer_address = stream
                .peer_address()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".into());
            inner.events_tx.send(LinkEvent::Connected { peer_address }).ok();

            let (mut reader, mut writer) = stream.into_split();
            let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);
            *inner.outbound_tx.lock() = Some(outbound_tx);

            let writer_task = tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    if let Err(err) = writer.write_all(&frame).await {
                        warn!(%err, "RFCOMM write failed");
                        break;
                    }
                }
            });

            let mut decoder = SppDecoder::new();
            let mut byte = [0u8; 1];
            loop {
                match reader.read_exact(&mut byte).await {
                    Ok(_) => {
                        if let Some(payload) = decoder.feed(byte[0]) {
                            debug!(len = payload.len(), "SPP frame decoded");
                            inner
                                .events_tx
                                .send(LinkEvent::PayloadReceived { stream_id: 0, payload })
                                .ok();
                        }
                    }
                    Err(err) => {
                        info!(%err, "RFCOMM connection closed");
                        break;
                    }
                }
            }

            *inner.connected.lock() = false;
            *inner.outbound_tx.lock() = None;
            writer_task.abort();
            inner.events_tx.send(LinkEvent::Disconnected).ok();
        });
    }
}

#[async_trait]
impl Transport for ClassicTransport {
    async fn send(&self, _stream_id: u8, payload: &[u8]) -> Result<(), TransportError> {
        let frame = self.inner.framer.lock().encode(payload);
        let tx = self.inner.outbound_tx.lock().clone().ok_or(TransportError::Disconnected)?;
        tx.send(frame).await.map_err(|_| TransportError::Disconnected)
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut handle = self.register_profile().await?;
        let inner = self.inner.clone();

        tokio::spawn(async move {
            while let Some(req) = handle.next().await {
                let stream = match req.accept() {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(%err, "failed to accept RFCOMM connection");
                        continue;
                    }
                };
                info!("RFCOMM connection accepted");
                ClassicTransport::spawn_connection_handler(inner.clone(), stream);
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        *self.inner.outbound_tx.lock() = None;
        *self.inner.connected.lock() = false;
        let _ = self.inner.events_tx.send(LinkEvent::Disconnected);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.inner.connected.lock()
    }

    /// Drive `Pairable`/`Discoverable` adapter properties and apply the
    /// local-name half of the EIR payload computed by `build_eir` (§4.6).
    ///
    /// BlueZ assembles the Classic Bluetooth inquiry-scan EIR itself from a
    /// handful of `org.bluez.Adapter1` properties (`Alias`, `Class`,
    /// registered service UUIDs) plus the management socket; there is no
    /// D-Bus property or `bluer` method to inject a literal EIR byte blob,
    /// so `build_eir`'s manufacturer-specific (vendor/product ID) field
    /// cannot be installed through this surface. Setting `Alias` is the one
    /// part of `build_eir`'s content BlueZ will actually fold into the
    /// broadcast EIR; the service UUID half is already covered by the SDP
    /// record `register_profile` installs.
    async fn set_discoverable(&self, on: bool) -> Result<(), TransportError> {
        let adapter = self
            .inner
            .session
            .adapter(&self.inner.adapter_name)
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        adapter
            .set_alias(self.inner.friendly_name.clone())
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        adapter
            .set_pairable(on)
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        adapter
            .set_discoverable(on)
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events_tx.subscribe()
    }
}
