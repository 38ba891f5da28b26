//! Connection-lifecycle state machine, directive dispatch, and the
//! discovery-response builder. The one object an application embeds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gadget_transport::ble::{control, streams};
use gadget_transport::codec::wire::{Capability as WireCapability, DiscoverResponseEvent, Envelope, Header};
use gadget_transport::{decode, decode_directive, encode, BoxedTransport, Directive, LinkEvent};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Capability, PersistentState, ResolvedGadgetConfig};
use crate::error::GadgetError;
use crate::reconnect::{poll_interval, ReconnectStatus};
use crate::token::device_token;

/// A directive handler registered for one `(namespace, name)` pair. Replaces
/// the original's runtime `getattr`-style name synthesis (SPEC_FULL.md §9).
pub type Handler = Box<dyn Fn(Directive) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    AdvertisingPair,
    AdvertisingReconnect,
    Connected,
    DisconnectedManual,
}

struct State {
    lifecycle: LifecycleState,
    persistent: PersistentState,
}

/// The gadget's runtime core: owns the transport, the reconnect scheduler,
/// and the directive registration table. Cloned cheaply (it's a handle over
/// an `Arc`-shared inner state) so the link-event and reconnect tasks can
/// each hold one.
pub struct GadgetCore {
    config: ResolvedGadgetConfig,
    state_path: PathBuf,
    state: Mutex<State>,
    transport: BoxedTransport,
    handlers: Mutex<HashMap<(String, String), Handler>>,
    reconnect: Mutex<ReconnectStatus>,
    next_message_id: AtomicU64,
}

impl GadgetCore {
    pub fn new(
        config: ResolvedGadgetConfig,
        state_path: PathBuf,
        persistent: PersistentState,
        transport: BoxedTransport,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state_path,
            state: Mutex::new(State { lifecycle: LifecycleState::Idle, persistent }),
            transport,
            handlers: Mutex::new(HashMap::new()),
            reconnect: Mutex::new(ReconnectStatus::fresh(Instant::now())),
            next_message_id: AtomicU64::new(0),
        })
    }

    /// Register a handler for directives arriving with this exact
    /// `(namespace, name)` header, invoked at gadget-construction time
    /// before `start()` (§4.7, §9).
    pub fn on(&self, namespace: impl Into<String>, name: impl Into<String>, handler: Handler) {
        self.handlers.lock().insert((namespace.into(), name.into()), handler);
    }

    pub fn is_paired(&self) -> bool {
        self.state.lock().persistent.paired_hub_address.is_some()
    }

    pub async fn set_discoverable(&self, on: bool) -> Result<(), GadgetError> {
        self.transport.set_discoverable(on).await?;
        Ok(())
    }

    /// Start the transport server and the background link-event/reconnect
    /// tasks. Consumes `Arc<Self>` so those tasks can outlive the caller's
    /// stack frame.
    pub async fn start(self: &Arc<Self>) -> Result<(), GadgetError> {
        {
            let mut state = self.state.lock();
            state.lifecycle = if state.persistent.paired_hub_address.is_some() {
                LifecycleState::AdvertisingReconnect
            } else {
                LifecycleState::AdvertisingPair
            };
        }

        self.transport.start().await?;

        let events = self.transport.subscribe();
        let this = self.clone();
        tokio::spawn(async move { this.run_link_events(events).await });

        let this = self.clone();
        tokio::spawn(async move { this.run_reconnect_worker().await });

        info!("gadget core started");
        Ok(())
    }

    /// Tear down the link without clearing the stored bond, and suppress
    /// automatic reconnection until the next `reconnect()` call.
    pub async fn disconnect(&self) -> Result<(), GadgetError> {
        self.transport.stop().await?;
        self.state.lock().lifecycle = LifecycleState::DisconnectedManual;
        self.reconnect.lock().suppress();
        Ok(())
    }

    /// Force an immediate reconnect attempt.
    pub async fn reconnect(&self) -> Result<(), GadgetError> {
        self.reconnect.lock().reset(Instant::now());
        self.state.lock().lifecycle = LifecycleState::AdvertisingReconnect;
        self.transport.start().await?;
        Ok(())
    }

    /// Remove the stored bond and return to the pairing state.
    pub fn clear(&self) -> Result<(), GadgetError> {
        let mut state = self.state.lock();
        state.persistent.paired_hub_address = None;
        state.lifecycle = LifecycleState::Idle;
        state.persistent.save(&self.state_path)?;
        Ok(())
    }

    pub async fn send_event(&self, envelope: Envelope) -> Result<(), GadgetError> {
        let bytes = encode(&envelope)?;
        self.transport.send(streams::ALEXA, &bytes).await?;
        Ok(())
    }

    /// Build and send an Event with a raw JSON payload under the given
    /// `(namespace, name)` header.
    pub async fn send_custom_event(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        json_payload: &str,
    ) -> Result<(), GadgetError> {
        let envelope = Envelope {
            header: Some(Header {
                namespace: namespace.into(),
                name: name.into(),
                message_id: self.next_message_id(),
            }),
            payload: json_payload.as_bytes().to_vec(),
        };
        self.send_event(envelope).await
    }

    fn next_message_id(&self) -> String {
        format!("evt-{}", self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn run_link_events(self: Arc<Self>, mut events: tokio::sync::broadcast::Receiver<LinkEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "link event receiver lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            if let Err(err) = self.handle_link_event(event).await {
                error!(%err, "error handling link event");
            }
        }
    }

    async fn handle_link_event(&self, event: LinkEvent) -> Result<(), GadgetError> {
        match event {
            LinkEvent::Connected { peer_address } => {
                let was_pairing = {
                    let state = self.state.lock();
                    matches!(state.lifecycle, LifecycleState::AdvertisingPair)
                };

                let mut state = self.state.lock();
                state.lifecycle = LifecycleState::Connected;
                if was_pairing {
                    state.persistent.paired_hub_address = Some(peer_address.clone());
                    state.persistent.save(&self.state_path)?;
                }
                drop(state);

                self.reconnect.lock().reset(Instant::now());
                info!(%peer_address, "hub connected");
            }
            LinkEvent::Disconnected => {
                let mut state = self.state.lock();
                if state.lifecycle != LifecycleState::DisconnectedManual {
                    state.lifecycle = LifecycleState::AdvertisingReconnect;
                    drop(state);
                    self.reconnect.lock().reset(Instant::now());
                    self.transport.start().await?;
                    info!("hub disconnected, re-advertising for reconnect");
                }
            }
            LinkEvent::PayloadReceived { stream_id, payload } => {
                self.dispatch_payload(stream_id, payload).await;
            }
            LinkEvent::ControlReceived { payload } => {
                self.handle_control(payload).await;
            }
        }
        Ok(())
    }

    async fn dispatch_payload(&self, stream_id: u8, payload: Vec<u8>) {
        let envelope = match decode(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, stream_id, "dropping malformed envelope");
                return;
            }
        };
        let Some(header) = envelope.header.as_ref() else {
            warn!(stream_id, "dropping envelope with no header");
            return;
        };

        let directive = match decode_directive(header, &envelope.payload) {
            Ok(directive) => directive,
            Err(err) => {
                warn!(%err, namespace = %header.namespace, name = %header.name, "dropping undecodable directive");
                return;
            }
        };

        if matches!(directive, Directive::Discover) {
            if let Err(err) = self.respond_to_discover().await {
                error!(%err, "failed to send discovery response");
            }
            return;
        }

        let key = (header.namespace.clone(), header.name.clone());
        let handlers = self.handlers.lock();
        match handlers.get(&key) {
            Some(handler) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(directive)));
                if let Err(panic) = result {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".into());
                    error!(namespace = %key.0, name = %key.1, %message, "directive handler panicked");
                }
            }
            None => debug!(namespace = %key.0, name = %key.1, "no handler registered, dropping"),
        }
    }

    async fn respond_to_discover(&self) -> Result<(), GadgetError> {
        let token = device_token(&self.config.endpoint_id, &self.config.gadget_secret);
        let capabilities = self.config.capabilities.iter().map(to_wire_capability).collect();

        let event = DiscoverResponseEvent {
            endpoint_id: self.config.endpoint_id.clone(),
            device_token: token,
            capabilities,
        };
        let mut payload = Vec::new();
        prost::Message::encode(&event, &mut payload).map_err(|err| {
            GadgetError::Transport(gadget_transport::error::TransportError::Internal(err.to_string()))
        })?;

        let envelope = Envelope {
            header: Some(Header {
                namespace: "Alexa.Discovery".into(),
                name: "Discover.Response".into(),
                message_id: self.next_message_id(),
            }),
            payload,
        };
        self.send_event(envelope).await
    }

    async fn handle_control(&self, payload: Vec<u8>) {
        let Some(&command) = payload.first() else {
            warn!("empty control-stream payload");
            return;
        };

        let info = control::DeviceInfo {
            serial_number: self.config.endpoint_id.clone(),
            name: self.config.friendly_name.clone(),
            device_type: self.config.amazon_id.clone(),
            supported_transports: vec![control::SupportedTransport::BluetoothLowEnergy],
        };

        match control::handle(command, &info) {
            control::ControlResponse::Ignored => {}
            response => {
                let bytes = encode_control_response(response);
                if let Err(err) = self.transport.send(streams::CONTROL, &bytes).await {
                    error!(%err, "failed to send control response");
                }
            }
        }
    }

    async fn run_reconnect_worker(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(poll_interval());
        loop {
            ticker.tick().await;

            let now = Instant::now();
            let due = {
                let mut reconnect = self.reconnect.lock();
                if reconnect.is_due(now) {
                    reconnect.advance(now);
                    true
                } else {
                    false
                }
            };

            if !due {
                continue;
            }

            let in_reconnect_state = matches!(
                self.state.lock().lifecycle,
                LifecycleState::AdvertisingReconnect
            );
            if in_reconnect_state {
                if let Err(err) = self.transport.start().await {
                    warn!(%err, "reconnect attempt failed");
                }
            }
        }
    }
}

fn to_wire_capability(capability: &Capability) -> WireCapability {
    WireCapability {
        interface: capability.interface.clone(),
        version: capability.version.clone(),
        supported_types: capability.supported_types.clone(),
    }
}

/// Flatten a `ControlResponse` to the bytes written back on the CONTROL
/// stream. The on-wire control envelope is a small fixed layout: response
/// kind byte, then the kind-specific fields, matching the donor's handshake
/// framing rather than the full prost schema (the control stream predates
/// pairing and must stay decodable without it).
fn encode_control_response(response: control::ControlResponse) -> Vec<u8> {
    match response {
        control::ControlResponse::DeviceInformation(info) => {
            let mut out = vec![0x01u8];
            out.extend(encode_str(&info.serial_number));
            out.extend(encode_str(&info.name));
            out.extend(encode_str(&info.device_type));
            out.push(info.supported_transports.len() as u8);
            for &transport in &info.supported_transports {
                out.extend(encode_str(transport));
            }
            out
        }
        control::ControlResponse::DeviceFeatures(features) => {
            vec![0x02, features.features, 0x00, 0x00, 0x00, 0x00]
        }
        control::ControlResponse::Ignored => Vec::new(),
    }
}

fn encode_str(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = vec![bytes.len() as u8];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportMode;
    use async_trait::async_trait;
    use gadget_transport::error::TransportError;
    use gadget_transport::Transport;
    use tokio::sync::broadcast;

    struct FakeTransport {
        sent: Mutex<Vec<(u8, Vec<u8>)>>,
        events_tx: broadcast::Sender<LinkEvent>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            let (events_tx, _) = broadcast::channel(16);
            Arc::new(Self { sent: Mutex::new(Vec::new()), events_tx })
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, stream_id: u8, payload: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().push((stream_id, payload.to_vec()));
            Ok(())
        }
        async fn start(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            false
        }
        async fn set_discoverable(&self, _on: bool) -> Result<(), TransportError> {
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
            self.events_tx.subscribe()
        }
    }

    fn sample_config() -> ResolvedGadgetConfig {
        ResolvedGadgetConfig {
            amazon_id: "amzn1.ask".into(),
            gadget_secret: "s3cret".into(),
            endpoint_id: "AGT001122334455".into(),
            friendly_name: "Gadget455".into(),
            model_name: "Gadget".into(),
            firmware_version: "1.0.0".into(),
            manufacturer_name: "Unknown".into(),
            description: "".into(),
            vendor_id: "1234".into(),
            product_id: "0000".into(),
            capabilities: vec![Capability {
                interface: "Alerts".into(),
                version: "1.2".into(),
                supported_types: vec!["ALARM".into()],
            }],
            compat_mode: false,
        }
    }

    fn sample_state() -> PersistentState {
        PersistentState { transport_mode: TransportMode::Ble, paired_hub_address: None }
    }

    #[tokio::test]
    async fn discover_directive_produces_response_event() {
        let transport = FakeTransport::new();
        let core = GadgetCore::new(
            sample_config(),
            std::env::temp_dir().join("agt-gadget-test-state.json"),
            sample_state(),
            transport.clone(),
        );

        core.respond_to_discover().await.unwrap();
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, streams::ALEXA);
    }

    #[tokio::test]
    async fn unregistered_directive_is_dropped_without_panic() {
        let transport = FakeTransport::new();
        let core = GadgetCore::new(
            sample_config(),
            std::env::temp_dir().join("agt-gadget-test-state2.json"),
            sample_state(),
            transport.clone(),
        );

        let envelope = Envelope {
            header: Some(Header {
                namespace: "Some.Unknown".into(),
                name: "Whatever".into(),
                message_id: "1".into(),
            }),
            payload: vec![],
        };
        let bytes = encode(&envelope).unwrap();
        core.dispatch_payload(streams::ALEXA, bytes).await;
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn registered_handler_is_invoked() {
        let transport = FakeTransport::new();
        let core = GadgetCore::new(
            sample_config(),
            std::env::temp_dir().join("agt-gadget-test-state3.json"),
            sample_state(),
            transport.clone(),
        );

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        core.on("Custom.Gadget", "StateUpdate", Box::new(move |_directive| {
            flag.store(true, Ordering::SeqCst);
        }));

        let inner = gadget_transport::codec::wire::StateUpdateDirective { state: "LISTENING".into() };
        let mut payload = Vec::new();
        prost::Message::encode(&inner, &mut payload).unwrap();
        let envelope = Envelope {
            header: Some(Header {
                namespace: "Custom.Gadget".into(),
                name: "StateUpdate".into(),
                message_id: "1".into(),
            }),
            payload,
        };
        let bytes = encode(&envelope).unwrap();
        core.dispatch_payload(streams::ALEXA, bytes).await;
        assert!(invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn control_device_information_response_round_trips_encoding() {
        let response = control::ControlResponse::DeviceInformation(control::DeviceInformationResponse {
            serial_number: "AGT1".into(),
            name: "Gadget1".into(),
            device_type: "amzn1.ask".into(),
            supported_transports: vec!["BLUETOOTH_LOW_ENERGY"],
        });
        let bytes = encode_control_response(response);
        assert_eq!(bytes[0], 0x01);
    }
}
