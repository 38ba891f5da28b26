//! BLE transport driver: GATT service, advertising, and the packetizer
//! hookup that turns TX writes into directive payloads and ALEXA-stream
//! events into RX notifications.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::Advertisement;
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicWrite, CharacteristicWriteMethod, Service,
};
use bluer::{Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty};
use futures_util::StreamExt;
use gadget_transport::ble::packetizer::{Packetizer, ReassemblyOutcome};
use gadget_transport::error::TransportError;
use gadget_transport::transport::{LinkEvent, Transport};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::{
    pairing_service_data, reconnect_service_data, GATT_SERVICE_UUID, NOTIFY_SETTLE_DELAY,
    RX_CHARACTERISTIC_UUID, TX_CHARACTERISTIC_UUID,
};
use gadget_transport::ble::PROTOCOL_VERSION_PACKET;

/// Floor BLE ATT MTU, used verbatim in compatibility mode for older hub
/// firmware that never exchanges an MTU request.
const MINIMUM_MTU: u16 = 23;
/// Optimistic default assumed outside compatibility mode; a commonly
/// negotiated value once the hub has exchanged MTU.
const OPTIMISTIC_MTU: u16 = 244;

struct Inner {
    adapter: Adapter,
    friendly_name: String,
    packetizer: Mutex<Packetizer>,
    events_tx: broadcast::Sender<LinkEvent>,
    notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Owns the RX-notification receiver between connections so the
    /// characteristic's notify callback (invoked each time the hub
    /// (re)subscribes) can pick it back up and resume draining `send()`
    /// output into the live `CharacteristicNotifier`.
    notify_rx: AsyncMutex<Option<mpsc::Receiver<Vec<u8>>>>,
    adv_handle: Mutex<Option<bluer::adv::AdvertisementHandle>>,
    app_handle: Mutex<Option<ApplicationHandle>>,
    mtu: Mutex<u16>,
}

/// `gadget_transport::Transport` bound to a `bluer` GATT application.
pub struct BleTransport {
    inner: Arc<Inner>,
}

impl BleTransport {
    pub fn new(adapter: Adapter, friendly_name: String, compat_mode: bool) -> Self {
        let (events_tx, _) = broadcast::channel(32);
        let mtu = if compat_mode { MINIMUM_MTU } else { OPTIMISTIC_MTU };
        Self {
            inner: Arc::new(Inner {
                adapter,
                friendly_name,
                packetizer: Mutex::new(Packetizer::new()),
                events_tx,
                notify_tx: Mutex::new(None),
                notify_rx: AsyncMutex::new(None),
                adv_handle: Mutex::new(None),
                app_handle: Mutex::new(None),
                mtu: Mutex::new(mtu),
            }),
        }
    }

    /// Build and register the GATT service. TX writes are fed straight into
    /// the packetizer; RX notifications are driven from an internal mpsc
    /// channel so `send()` can write without holding a lock across `.await`.
    async fn serve_gatt(&self) -> Result<(), TransportError> {
        let inner = self.inner.clone();
        let inner_for_notify = self.inner.clone();
        let (notify_tx, notify_rx) = mpsc::channel::<Vec<u8>>(64);
        *self.inner.notify_tx.lock() = Some(notify_tx);
        *self.inner.notify_rx.lock().await = Some(notify_rx);

        let app = Application {
            services: vec![Service {
                uuid: GATT_SERVICE_UUID,
                primary: true,
                characteristics: vec![
                    Characteristic {
                        uuid: TX_CHARACTERISTIC_UUID,
                        write: Some(CharacteristicWrite {
                            write: Some(CharacteristicWriteMethod::Fun(Box::new(move |new_value, _req| {
                                let inner = inner.clone();
                                Box::pin(async move {
                                    inner.handle_tx_write(new_value).await;
                                    Ok(())
                                })
                            }))),
                            write_without_response: false,
                            encrypt_authenticated_write: true,
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Characteristic {
                        uuid: RX_CHARACTERISTIC_UUID,
                        notify: Some(CharacteristicNotify {
                            notify: Some(CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
                                let inner = inner_for_notify.clone();
                                Box::pin(async move {
                                    tokio::time::sleep(NOTIFY_SETTLE_DELAY).await;
                                    if let Err(err) = notifier.notify(PROTOCOL_VERSION_PACKET.to_vec()).await {
                                        warn!(%err, "failed to send protocol version packet");
                                        return;
                                    }

                                    let Some(mut rx) = inner.notify_rx.lock().await.take() else {
                                        warn!("RX notification channel already in use, dropping this subscription");
                                        return;
                                    };

                                    // `notify` errors once the hub unsubscribes or disconnects,
                                    // which is this loop's only exit besides the channel closing.
                                    while let Some(bytes) = rx.recv().await {
                                        debug!(len = bytes.len(), "draining queued frame to RX notifier");
                                        if let Err(err) = notifier.notify(bytes).await {
                                            warn!(%err, "RX notify failed, ending notification session");
                                            break;
                                        }
                                    }

                                    *inner.notify_rx.lock().await = Some(rx);
                                })
                            }))),
                            encrypt_authenticated_read: true,
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self
            .inner
            .adapter
            .serve_gatt_application(app)
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        *self.inner.app_handle.lock() = Some(handle);

        self.spawn_device_watcher();

        Ok(())
    }
}

impl Inner {
    async fn handle_tx_write(&self, bytes: Vec<u8>) {
        let outcome = {
            let mut packetizer = self.packetizer.lock();
            packetizer.reassemble(&bytes)
        };

        match outcome {
            Ok(ReassemblyOutcome::Control { payload }) => {
                let _ = self.events_tx.send(LinkEvent::ControlReceived { payload });
            }
            Ok(ReassemblyOutcome::Complete { stream_id, payload, ack_bit, transaction_id }) => {
                if ack_bit {
                    let ack = self.packetizer.lock().build_ack(stream_id, transaction_id);
                    if let Some(tx) = self.notify_tx.lock().clone() {
                        let _ = tx.send(ack).await;
                    }
                }
                let _ = self.events_tx.send(LinkEvent::PayloadReceived { stream_id, payload });
            }
            Ok(ReassemblyOutcome::Incomplete) => {}
            Err(err) => warn!(%err, "dropping malformed BLE packet"),
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn send(&self, stream_id: u8, payload: &[u8]) -> Result<(), TransportError> {
        let mtu = *self.inner.mtu.lock();
        let packets = {
            let mut packetizer = self.inner.packetizer.lock();
            packetizer.fragment(stream_id, payload, mtu)?
        };

        let tx = self.inner.notify_tx.lock().clone().ok_or(TransportError::Disconnected)?;
        for packet in packets {
            tx.send(packet).await.map_err(|_| TransportError::Disconnected)?;
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.serve_gatt().await?;
        self.readvertise(true).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.inner.adv_handle.lock().take();
        self.inner.app_handle.lock().take();
        let _ = self.inner.events_tx.send(LinkEvent::Disconnected);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.app_handle.lock().is_some() && self.inner.adv_handle.lock().is_none()
    }

    async fn set_discoverable(&self, on: bool) -> Result<(), TransportError> {
        self.readvertise(on).await
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events_tx.subscribe()
    }
}

impl BleTransport {
    /// Swap the active advertisement between the pairing and reconnect AD
    /// payloads (§4.5). `bluer`'s `Advertisement` builder assembles the AD
    /// structures from typed fields rather than a raw byte blob, so the
    /// service-data payload computed by `pairing_service_data`/
    /// `reconnect_service_data` is carried through `service_data` itself
    /// (keyed by the same 16-bit UUID the byte layout uses) instead of being
    /// discarded — this is what makes the broadcast bytes match what a
    /// spec-compliant hub scans for.
    async fn readvertise(&self, pairing: bool) -> Result<(), TransportError> {
        self.inner.adv_handle.lock().take();

        let (data, interval) = if pairing {
            (pairing_service_data(), std::time::Duration::from_millis(20))
        } else {
            (reconnect_service_data(), std::time::Duration::from_millis(100))
        };

        let mut service_data = BTreeMap::new();
        service_data.insert(GATT_SERVICE_UUID, data);

        let ad = Advertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            service_uuids: vec![GATT_SERVICE_UUID].into_iter().collect(),
            service_data,
            local_name: Some(self.inner.friendly_name.clone()),
            min_interval: Some(interval),
            max_interval: Some(interval),
            ..Default::default()
        };

        let handle = self
            .inner
            .adapter
            .advertise(ad)
            .await
            .map_err(|err| TransportError::BluetoothError(err.to_string()))?;
        *self.inner.adv_handle.lock() = Some(handle);

        info!(pairing, "BLE transport advertising");
        Ok(())
    }

    /// Watch for the hub's `Device` object appearing under the adapter and
    /// track its `Connected` property, the authoritative source of the peer
    /// address and of connect/disconnect transitions (§4.5, I5, P7) — the
    /// notify-enable callback only tells us a client subscribed, not who it
    /// is or whether the underlying link is still up.
    fn spawn_device_watcher(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut events = match inner.adapter.events().await {
                Ok(events) => events,
                Err(err) => {
                    warn!(%err, "failed to watch adapter for device connections");
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    let inner = inner.clone();
                    tokio::spawn(async move { inner.watch_device(address).await });
                }
            }
        });
    }
}

impl Inner {
    async fn watch_device(&self, address: Address) {
        let device = match self.adapter.device(address) {
            Ok(device) => device,
            Err(err) => {
                warn!(%err, %address, "failed to open device handle");
                return;
            }
        };

        let mut events = match device.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!(%err, %address, "failed to watch device properties");
                return;
            }
        };

        while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event {
                if connected {
                    info!(%address, "hub device connected");
                    self.events_tx.send(LinkEvent::Connected { peer_address: address.to_string() }).ok();
                } else {
                    info!(%address, "hub device disconnected");
                    self.events_tx.send(LinkEvent::Disconnected).ok();
                }
            }
        }
    }
}
