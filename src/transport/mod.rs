//! `bluer`-backed implementations of `gadget_transport::Transport`: one for
//! the BLE GATT service, one for the Classic Bluetooth RFCOMM channel.

pub mod ble;
pub mod classic;

use bluer::Uuid;

/// GATT primary service UUID advertised by the BLE driver.
pub const GATT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FE03_0000_1000_8000_00805F9B34FB);
/// TX characteristic: inbound writes from the hub.
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xF04EB177_3005_43A7_AC61_A390DDF83076);
/// RX characteristic: outbound notifications to the hub.
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x2BEEA05B_1879_4BB4_8A2F_72641F82420B);

/// RFCOMM channel the Classic Bluetooth driver listens on.
pub const RFCOMM_CHANNEL: u8 = 4;
/// Primary gadget service record UUID.
pub const CLASSIC_SERVICE_UUID: Uuid = Uuid::from_u128(0x6088d2b3_983a_4eed_9f94_5ad1256816b7);
/// Standard SPP service class UUID.
pub const SPP_SERVICE_CLASS_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Delay between the hub enabling notifications and the gadget emitting the
/// Protocol Version Packet handshake (§4.5).
pub const NOTIFY_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Service-data payload broadcast during pairing (§4.5/§6): the content
/// bytes that follow the 16-bit UUID in the `0x16` Service Data AD
/// structure. Returned separately from `pairing_advertisement_data` so the
/// BLE driver can hand it to `bluer` via `Advertisement::service_data`
/// without re-parsing the assembled AD bytes.
pub fn pairing_service_data() -> Vec<u8> {
    let mut data = vec![0x71, 0x01, 0x00, 0xFF];
    data.extend(std::iter::repeat(0u8).take(16));
    data
}

/// Service-data payload broadcast once a bond exists and the gadget is only
/// advertising for reconnect (§4.5/§6).
pub fn reconnect_service_data() -> Vec<u8> {
    let mut data = vec![0x71, 0x01, 0x00, 0xFF];
    data.extend(std::iter::repeat(0u8).take(20));
    data
}

/// Full pairing advertisement, assembled for documentation/testing: flags,
/// incomplete 16-bit service UUID list, then the service-data block built
/// from `pairing_service_data`.
pub fn pairing_advertisement_data() -> Vec<u8> {
    let mut ad = vec![0x02, 0x01, 0x06, 0x03, 0x03, 0x03, 0xFE];
    let data = pairing_service_data();
    ad.push((1 + 2 + data.len()) as u8);
    ad.push(0x16);
    ad.extend_from_slice(&[0x03, 0xFE]);
    ad.extend(data);
    ad
}

/// Full reconnect advertisement, assembled for documentation/testing.
pub fn reconnect_advertisement_data() -> Vec<u8> {
    let mut ad = vec![0x02, 0x01, 0x06];
    let data = reconnect_service_data();
    ad.push((1 + 2 + data.len()) as u8);
    ad.push(0x16);
    ad.extend_from_slice(&[0x03, 0xFE]);
    ad.extend(data);
    ad
}

/// Scan-response complete-local-name field, padded to 31 bytes. Documents
/// the literal wire bytes a spec-compliant hub expects in the scan response;
/// the BLE driver sets `Advertisement::local_name` instead, which `bluer`
/// serializes to the same `0x09` Complete Local Name AD type itself, so this
/// helper isn't called from the advertising path and exists for parity
/// testing against that expectation.
pub fn scan_response_name(friendly_name: &str) -> Vec<u8> {
    let mut field = vec![(friendly_name.len() + 1) as u8, 0x09];
    field.extend_from_slice(friendly_name.as_bytes());
    field.resize(31, 0);
    field
}

/// EIR payload for Classic Bluetooth inquiry scan (§6).
pub fn build_eir(friendly_name: &str, vendor_id: u16, product_id: u16) -> Vec<u8> {
    let mut eir = Vec::new();

    eir.push((friendly_name.len() + 1) as u8);
    eir.push(0x09);
    eir.extend_from_slice(friendly_name.as_bytes());

    eir.extend_from_slice(&[0x11, 0x06]);
    eir.extend_from_slice(&uuid_bytes_little_endian(CLASSIC_SERVICE_UUID));

    eir.extend_from_slice(&[0x0B, 0xFF]);
    eir.extend_from_slice(&vendor_id.to_le_bytes());
    eir.extend_from_slice(&product_id.to_le_bytes());
    eir.extend_from_slice(&[0x71, 0x01, 0x10, 0x15, 0x15, 0xFE]);

    eir.push(0x00);
    eir
}

fn uuid_bytes_little_endian(uuid: Uuid) -> [u8; 16] {
    let mut bytes = uuid.as_bytes().to_owned();
    bytes.reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_advertisement_is_31_bytes() {
        assert_eq!(pairing_advertisement_data().len(), 31);
    }

    #[test]
    fn reconnect_advertisement_is_31_bytes() {
        assert_eq!(reconnect_advertisement_data().len(), 31);
    }

    #[test]
    fn scan_response_is_padded_to_31_bytes() {
        assert_eq!(scan_response_name("Gadget123").len(), 31);
    }

    #[test]
    fn eir_ends_with_terminator() {
        let eir = build_eir("Gadget123", 0x1234, 0x5678);
        assert_eq!(*eir.last().unwrap(), 0x00);
    }
}
