//! Device token derivation: `hex(sha256(endpoint_id || gadget_secret))`.

use sha2::{Digest, Sha256};

/// Derive the device token a hub uses to trust this gadget's identity.
/// Deterministic and stable across restarts given equal inputs (P6).
pub fn device_token(endpoint_id: &str, gadget_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint_id.as_bytes());
    hasher.update(gadget_secret.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_lowercase_hex_sha256() {
        let token = device_token("AGT001122334455", "s3cr3t");
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn token_is_stable_given_equal_inputs() {
        let a = device_token("AGT001122334455", "s3cr3t");
        let b = device_token("AGT001122334455", "s3cr3t");
        assert_eq!(a, b);
    }

    #[test]
    fn token_changes_with_either_input() {
        let base = device_token("AGT001122334455", "s3cr3t");
        assert_ne!(base, device_token("AGT001122334456", "s3cr3t"));
        assert_ne!(base, device_token("AGT001122334455", "different"));
    }
}
