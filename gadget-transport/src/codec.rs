//! Schema-driven byte codec for the Message/Directive/Event envelopes.
//!
//! Wire types are generated from `proto/gadget.proto` by `prost-build` at
//! compile time; this module layers the decode-leniency and directive/event
//! routing the wire format itself doesn't express.

use prost::Message as _;

use crate::error::CodecError;

pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/gadget.rs"));
}

pub use wire::{
    Capability, ClearIndicatorDirective, DeleteAlertDirective, DiscoverDirective,
    DiscoverResponseEvent, Envelope, Header, SetAlertDirective, SetIndicatorDirective,
    SpeechmarksDirective, StateUpdateDirective, TempoDirective,
};

/// A decoded directive: known variants carry their typed payload, anything
/// else is delivered as raw bytes keyed by the (namespace, name) it arrived
/// with so a registration-table dispatcher (see `gadget::GadgetCore`) can
/// still route it.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Discover,
    StateUpdate(StateUpdateDirective),
    SetIndicator(SetIndicatorDirective),
    ClearIndicator,
    Speechmarks(SpeechmarksDirective),
    Tempo(TempoDirective),
    SetAlert(SetAlertDirective),
    DeleteAlert(DeleteAlertDirective),
    Generic { namespace: String, name: String, payload: Vec<u8> },
}

/// Encode an `Envelope` to bytes.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(envelope.encoded_len());
    envelope.encode(&mut buf)?;
    Ok(buf)
}

/// Decode bytes into an `Envelope`.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(Envelope::decode(bytes)?)
}

/// Decode a directive envelope's payload into a typed `Directive`.
///
/// Decoding is lenient: a namespace/name pair this build doesn't recognize
/// produces `Directive::Generic` carrying the raw payload bytes rather than
/// failing the whole envelope.
pub fn decode_directive(header: &Header, payload: &[u8]) -> Result<Directive, CodecError> {
    let directive = match (header.namespace.as_str(), header.name.as_str()) {
        ("Alexa.Discovery", "Discover") => Directive::Discover,
        ("Custom.Gadget", "StateUpdate") => {
            Directive::StateUpdate(StateUpdateDirective::decode(payload)?)
        }
        ("Alerts", "SetAlert") => Directive::SetAlert(SetAlertDirective::decode(payload)?),
        ("Alerts", "DeleteAlert") => {
            Directive::DeleteAlert(DeleteAlertDirective::decode(payload)?)
        }
        ("Notifications", "SetIndicator") => {
            Directive::SetIndicator(SetIndicatorDirective::decode(payload)?)
        }
        ("Notifications", "ClearIndicator") => Directive::ClearIndicator,
        ("SpeechSynthesizer", "Speechmarks") => {
            Directive::Speechmarks(SpeechmarksDirective::decode(payload)?)
        }
        ("Tempo", "SetTempo") => Directive::Tempo(TempoDirective::decode(payload)?),
        (namespace, name) => Directive::Generic {
            namespace: namespace.to_string(),
            name: name.to_string(),
            payload: payload.to_vec(),
        },
    };
    Ok(directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let inner = StateUpdateDirective { state: "LISTENING".into() };
        let mut payload = Vec::new();
        inner.encode(&mut payload).unwrap();

        let envelope = Envelope {
            header: Some(Header {
                namespace: "Custom.Gadget".into(),
                name: "StateUpdate".into(),
                message_id: "abc-123".into(),
            }),
            payload,
        };

        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);

        let directive = decode_directive(decoded.header.as_ref().unwrap(), &decoded.payload).unwrap();
        assert_eq!(directive, Directive::StateUpdate(StateUpdateDirective { state: "LISTENING".into() }));
    }

    #[test]
    fn unknown_namespace_name_is_generic() {
        let header = Header {
            namespace: "Some.Unknown".into(),
            name: "Whatever".into(),
            message_id: "1".into(),
        };
        let directive = decode_directive(&header, b"\x01\x02\x03").unwrap();
        assert_eq!(
            directive,
            Directive::Generic {
                namespace: "Some.Unknown".into(),
                name: "Whatever".into(),
                payload: vec![1, 2, 3],
            }
        );
    }
}
