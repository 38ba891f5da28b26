//! BLE packet header encoding, transaction fragmentation, and per-stream
//! reassembly.

use std::collections::HashMap;

use crate::error::{PacketizerError, TransportError};

/// Per-packet transaction role. Bit-packed into the low two bits of
/// `tx_type` within the header's second byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    First = 0,
    Continuation = 1,
    Last = 2,
    Control = 3,
}

impl TxType {
    fn from_bits(bits: u8) -> Result<Self, PacketizerError> {
        match bits {
            0 => Ok(TxType::First),
            1 => Ok(TxType::Continuation),
            2 => Ok(TxType::Last),
            3 => Ok(TxType::Control),
            other => Err(PacketizerError::UnknownTxType(other)),
        }
    }

    fn bits(self) -> u8 {
        self as u8
    }
}

/// Parsed fields of a BLE packet header, independent of payload.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub stream_id: u8,
    pub transaction_id: u8,
    pub sequence_no: u8,
    pub tx_type: TxType,
    pub ack_bit: bool,
}

fn build_packet(
    stream_id: u8,
    transaction_id: u8,
    sequence_no: u8,
    tx_type: TxType,
    ack_bit: bool,
    total_length: Option<u16>,
    payload: &[u8],
) -> Vec<u8> {
    let length_ext = payload.len() > 255;

    let byte1 = (stream_id << 4) | (transaction_id & 0x0F);
    let byte2 = (sequence_no << 4)
        | ((tx_type.bits() & 0x03) << 2)
        | ((ack_bit as u8) << 1)
        | (length_ext as u8);

    let mut out = Vec::with_capacity(payload.len() + 7);
    out.push(byte1);
    out.push(byte2);

    if let Some(total) = total_length {
        out.push(0x00); // reserved
        out.extend_from_slice(&total.to_be_bytes());
    }

    if length_ext {
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(payload.len() as u8);
    }

    out.extend_from_slice(payload);
    out
}

/// Parse a single BLE packet into its header and fragment payload.
fn parse_packet(bytes: &[u8]) -> Result<(PacketHeader, Vec<u8>), PacketizerError> {
    if bytes.len() < 2 {
        return Err(PacketizerError::ShortHeader);
    }

    let byte1 = bytes[0];
    let byte2 = bytes[1];

    let stream_id = byte1 >> 4;
    let transaction_id = byte1 & 0x0F;
    let sequence_no = byte2 >> 4;
    let tx_type = TxType::from_bits((byte2 >> 2) & 0x03)?;
    let ack_bit = (byte2 >> 1) & 0x01 == 1;
    let length_ext = byte2 & 0x01 == 1;

    let mut idx = 2usize;

    let total_length: Option<u16> = if matches!(tx_type, TxType::First | TxType::Control) {
        if bytes.len() < idx + 3 {
            return Err(PacketizerError::ShortHeader);
        }
        idx += 1; // reserved byte
        let tl = ((bytes[idx] as u16) << 8) | bytes[idx + 1] as u16;
        idx += 2;
        Some(tl)
    } else {
        None
    };

    let length = if length_ext {
        if bytes.len() < idx + 2 {
            return Err(PacketizerError::ShortHeader);
        }
        let l = ((bytes[idx] as u16) << 8) | bytes[idx + 1] as u16;
        idx += 2;
        l as usize
    } else {
        if bytes.len() < idx + 1 {
            return Err(PacketizerError::ShortHeader);
        }
        let l = bytes[idx] as usize;
        idx += 1;
        l
    };

    if bytes.len() < idx + length {
        return Err(PacketizerError::LengthMismatch {
            declared: length,
            available: bytes.len() - idx,
        });
    }

    let header = PacketHeader {
        stream_id,
        transaction_id,
        sequence_no,
        tx_type,
        ack_bit,
    };
    let payload = bytes[idx..idx + length].to_vec();

    // total_length is only meaningful to the caller for FIRST-type framing
    // (see Packetizer::reassemble); keep it around on the header copy so
    // callers needing it don't have to re-parse.
    let _ = total_length;

    Ok((header, payload))
}

/// Outcome of feeding one BLE packet into the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// A complete payload is ready for the directive dispatcher.
    Complete {
        stream_id: u8,
        payload: Vec<u8>,
        ack_bit: bool,
        transaction_id: u8,
    },
    /// More fragments are needed before this transaction completes.
    Incomplete,
    /// An isolated, never-fragmented control-stream message.
    Control { payload: Vec<u8> },
}

/// Fragments outbound payloads and reassembles inbound ones, one instance
/// per transport driver. Reassembly buffers are keyed by `stream_id` and
/// touched only by the transport's inbound callback (single-writer).
pub struct Packetizer {
    buffers: HashMap<u8, Vec<u8>>,
    next_transaction_id: u8,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_transaction_id: 0,
        }
    }

    /// Split `payload` into MTU-sized BLE packets on `stream_id`. Advances
    /// the gadget's transaction_id counter once per call, not once per
    /// fragment.
    pub fn fragment(
        &mut self,
        stream_id: u8,
        payload: &[u8],
        mtu: u16,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        let header_overhead = 7usize;
        let capacity = (mtu as usize).checked_sub(header_overhead).unwrap_or(0);
        if capacity == 0 {
            return Err(TransportError::InvalidMtu(mtu));
        }

        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = (self.next_transaction_id + 1) % 16;

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&payload[0..0]]
        } else {
            payload.chunks(capacity).collect()
        };
        let total = chunks.len();

        let packets = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let tx_type = if i == 0 {
                    TxType::First
                } else if i == total - 1 {
                    TxType::Last
                } else {
                    TxType::Continuation
                };
                let total_length = matches!(tx_type, TxType::First).then_some(payload.len() as u16);
                let sequence_no = (i % 16) as u8;
                build_packet(
                    stream_id,
                    transaction_id,
                    sequence_no,
                    tx_type,
                    false,
                    total_length,
                    chunk,
                )
            })
            .collect();

        Ok(packets)
    }

    /// Feed one incoming BLE packet into the per-stream reassembler.
    pub fn reassemble(&mut self, bytes: &[u8]) -> Result<ReassemblyOutcome, PacketizerError> {
        let (header, payload) = parse_packet(bytes)?;

        match header.tx_type {
            TxType::Control => Ok(ReassemblyOutcome::Control { payload }),
            TxType::First => {
                let fragment_len = payload.len() as u16;
                let total_length = header_total_length(bytes)?;
                if total_length == fragment_len {
                    // Single-packet transaction: deliver directly, buffer
                    // untouched.
                    self.buffers.remove(&header.stream_id);
                    Ok(ReassemblyOutcome::Complete {
                        stream_id: header.stream_id,
                        payload,
                        ack_bit: header.ack_bit,
                        transaction_id: header.transaction_id,
                    })
                } else {
                    // A FIRST while the buffer is non-empty discards
                    // whatever was pending and starts a fresh transaction.
                    self.buffers.insert(header.stream_id, payload);
                    Ok(ReassemblyOutcome::Incomplete)
                }
            }
            TxType::Continuation => {
                self.buffers.entry(header.stream_id).or_default().extend(payload);
                Ok(ReassemblyOutcome::Incomplete)
            }
            TxType::Last => {
                let mut buffer = self.buffers.remove(&header.stream_id).unwrap_or_default();
                buffer.extend(payload);
                Ok(ReassemblyOutcome::Complete {
                    stream_id: header.stream_id,
                    payload: buffer,
                    ack_bit: header.ack_bit,
                    transaction_id: header.transaction_id,
                })
            }
        }
    }

    /// Build the outbound ACK control packet for a received transaction
    /// whose `ack_bit` was set.
    pub fn build_ack(&self, stream_id: u8, transaction_id: u8) -> Vec<u8> {
        build_packet(
            stream_id,
            transaction_id,
            0,
            TxType::Control,
            true,
            Some(2),
            &[0x01, 0x00],
        )
    }
}

fn header_total_length(bytes: &[u8]) -> Result<u16, PacketizerError> {
    if bytes.len() < 5 {
        return Err(PacketizerError::ShortHeader);
    }
    Ok(((bytes[3] as u16) << 8) | bytes[4] as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_round_trip() {
        let mut p = Packetizer::new();
        let payload = b"short payload";
        let packets = p.fragment(crate::ble::streams::ALEXA, payload, 244).unwrap();
        assert_eq!(packets.len(), 1);

        let outcome = p.reassemble(&packets[0]).unwrap();
        match outcome {
            ReassemblyOutcome::Complete { stream_id, payload: got, .. } => {
                assert_eq!(stream_id, crate::ble::streams::ALEXA);
                assert_eq!(got, payload);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn fragmentation_at_mtu_boundary_yields_one_packet() {
        let mut p = Packetizer::new();
        let mtu = 244u16;
        let capacity = mtu as usize - 7;
        let payload = vec![0xAB; capacity];
        let packets = p.fragment(crate::ble::streams::ALEXA, &payload, mtu).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn one_byte_over_boundary_yields_first_and_last() {
        let mut p = Packetizer::new();
        let mtu = 244u16;
        let capacity = mtu as usize - 7;
        let payload = vec![0xCD; capacity + 1];
        let packets = p.fragment(crate::ble::streams::ALEXA, &payload, mtu).unwrap();
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn three_fragment_transaction_matches_scenario() {
        let mut p = Packetizer::new();
        let payload = vec![0x42u8; 600];
        let packets = p.fragment(crate::ble::streams::ALEXA, &payload, 244).unwrap();
        assert_eq!(packets.len(), 3);

        let mut reassembler = Packetizer::new();
        let mut complete = None;
        for packet in &packets {
            if let ReassemblyOutcome::Complete { payload: got, .. } =
                reassembler.reassemble(packet).unwrap()
            {
                complete = Some(got);
            }
        }
        assert_eq!(complete.unwrap(), payload);

        let transaction_ids: Vec<u8> = packets
            .iter()
            .map(|pkt| parse_packet(pkt).unwrap().0.transaction_id)
            .collect();
        assert!(transaction_ids.iter().all(|&t| t == transaction_ids[0]));

        let sequence_nos: Vec<u8> = packets
            .iter()
            .map(|pkt| parse_packet(pkt).unwrap().0.sequence_no)
            .collect();
        assert_eq!(sequence_nos, vec![0, 1, 2]);
    }

    #[test]
    fn transaction_id_increments_mod_16_per_call() {
        let mut p = Packetizer::new();
        let mut last = None;
        for _ in 0..20 {
            let packets = p.fragment(crate::ble::streams::ALEXA, b"x", 244).unwrap();
            let (header, _) = parse_packet(&packets[0]).unwrap();
            if let Some(prev) = last {
                assert_eq!(header.transaction_id, (prev + 1) % 16);
            }
            last = Some(header.transaction_id);
        }
    }

    #[test]
    fn first_arriving_mid_buffer_discards_pending_data() {
        let mut p = Packetizer::new();
        let payload_a = vec![0x11u8; 600];
        let packets_a = p.fragment(crate::ble::streams::ALEXA, &payload_a, 244).unwrap();

        // Feed only the FIRST fragment, leaving the buffer non-empty.
        assert!(matches!(
            p.reassemble(&packets_a[0]).unwrap(),
            ReassemblyOutcome::Incomplete
        ));

        // A new FIRST for a shorter payload should discard the old partial
        // buffer and deliver its own single-packet transaction.
        let payload_b = b"fresh transaction";
        let packets_b = p.fragment(crate::ble::streams::ALEXA, payload_b, 244).unwrap();
        match p.reassemble(&packets_b[0]).unwrap() {
            ReassemblyOutcome::Complete { payload, .. } => assert_eq!(payload, payload_b),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn ack_packet_shape() {
        let p = Packetizer::new();
        let ack = p.build_ack(crate::ble::streams::ALEXA, 3);
        let (header, payload) = parse_packet(&ack).unwrap();
        assert_eq!(header.tx_type, TxType::Control);
        assert!(header.ack_bit);
        assert_eq!(payload, vec![0x01, 0x00]);
    }
}
