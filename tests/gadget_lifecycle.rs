//! Black-box scenarios against the public `GadgetCore` API, driven through a
//! fake `Transport` rather than a real Bluetooth adapter (§8 Concrete
//! scenarios 1, 3, 5, 7).

use std::sync::Arc;
use std::time::Duration;

use agt_gadget::config::{Capability, PersistentState, ResolvedGadgetConfig, TransportMode};
use agt_gadget::GadgetCore;
use async_trait::async_trait;
use gadget_transport::ble::streams;
use gadget_transport::error::TransportError;
use gadget_transport::{LinkEvent, Transport};
use parking_lot::Mutex;
use tokio::sync::broadcast;

struct FakeTransport {
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
    events_tx: broadcast::Sender<LinkEvent>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(32);
        Arc::new(Self { sent: Mutex::new(Vec::new()), events_tx })
    }

    fn inject(&self, event: LinkEvent) {
        let _ = self.events_tx.send(event);
    }

    fn last_sent_on(&self, stream_id: u8) -> Option<Vec<u8>> {
        self.sent.lock().iter().rev().find(|(id, _)| *id == stream_id).map(|(_, bytes)| bytes.clone())
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
        amazon_id: "amzn1.ask.integration".into(),
        gadget_secret: "integration-secret".into(),
        endpoint_id: "AGTAABBCCDDEEFF".into(),
        friendly_name: "GadgetEFF".into(),
        model_name: "Gadget".into(),
        firmware_version: "1.0.0".into(),
        manufacturer_name: "Unknown".into(),
        description: "".into(),
        vendor_id: "1234".into(),
        product_id: "0000".into(),
        capabilities: vec![
            Capability { interface: "Alerts".into(), version: "1.2".into(), supported_types: vec!["ALARM".into(), "TIMER".into()] },
            Capability { interface: "Notifications".into(), version: "1.0".into(), supported_types: vec![] },
        ],
        compat_mode: false,
    }
}

fn state_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("agt-gadget-it-{}-{}.json", std::process::id(), name))
}

#[tokio::test]
async fn control_stream_device_information_query_is_answered() {
    let transport = FakeTransport::new();
    let state = state_path("device-info");
    let core = GadgetCore::new(
        sample_config(),
        state.clone(),
        PersistentState { transport_mode: TransportMode::Ble, paired_hub_address: None },
        transport.clone(),
    );

    core.start().await.unwrap();
    // GET_DEVICE_INFORMATION command byte.
    transport.inject(LinkEvent::ControlReceived { payload: vec![0x01] });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = transport.last_sent_on(streams::CONTROL).expect("no control response sent");
    assert_eq!(response[0], 0x01);

    let _ = std::fs::remove_file(&state);
}

#[tokio::test]
async fn control_stream_unknown_command_is_ignored() {
    let transport = FakeTransport::new();
    let state = state_path("unknown-control");
    let core = GadgetCore::new(
        sample_config(),
        state.clone(),
        PersistentState { transport_mode: TransportMode::Ble, paired_hub_address: None },
        transport.clone(),
    );

    core.start().await.unwrap();
    transport.inject(LinkEvent::ControlReceived { payload: vec![0xEE] });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(transport.last_sent_on(streams::CONTROL).is_none());
    let _ = std::fs::remove_file(&state);
}

#[tokio::test]
async fn successful_connect_persists_peer_address_and_clear_removes_it() {
    let transport = FakeTransport::new();
    let state = state_path("persist-peer");
    let core = GadgetCore::new(
        sample_config(),
        state.clone(),
        PersistentState { transport_mode: TransportMode::Ble, paired_hub_address: None },
        transport.clone(),
    );

    core.start().await.unwrap();
    assert!(!core.is_paired());

    transport.inject(LinkEvent::Connected { peer_address: "AA:BB:CC:DD:EE:FF".into() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(core.is_paired());
    let persisted = PersistentState::load(&state).unwrap();
    assert_eq!(persisted.paired_hub_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));

    core.clear().unwrap();
    assert!(!core.is_paired());
    let persisted = PersistentState::load(&state).unwrap();
    assert_eq!(persisted.paired_hub_address, None);

    let _ = std::fs::remove_file(&state);
}

#[tokio::test]
async fn discover_directive_carries_all_configured_capabilities() {
    let transport = FakeTransport::new();
    let state = state_path("discover-caps");
    let core = GadgetCore::new(
        sample_config(),
        state.clone(),
        PersistentState { transport_mode: TransportMode::Ble, paired_hub_address: None },
        transport.clone(),
    );

    core.start().await.unwrap();

    let envelope = gadget_transport::codec::wire::Envelope {
        header: Some(gadget_transport::codec::wire::Header {
            namespace: "Alexa.Discovery".into(),
            name: "Discover".into(),
            message_id: "msg-1".into(),
        }),
        payload: vec![],
    };
    let bytes = gadget_transport::encode(&envelope).unwrap();
    transport.inject(LinkEvent::PayloadReceived { stream_id: streams::ALEXA, payload: bytes });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = transport.last_sent_on(streams::ALEXA).expect("no discovery response sent");
    let response_envelope = gadget_transport::decode(&sent).unwrap();
    let response: gadget_transport::codec::wire::DiscoverResponseEvent =
        prost::Message::decode(response_envelope.payload.as_slice()).unwrap();

    assert_eq!(response.endpoint_id, "AGTAABBCCDDEEFF");
    assert_eq!(response.capabilities.len(), 2);
    assert_eq!(response.capabilities[0].interface, "Alerts");

    let _ = std::fs::remove_file(&state);
}
