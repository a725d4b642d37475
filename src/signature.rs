//! Constant-time HMAC-SHA256 webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `header_signature` is the full header value, e.g. `sha256=<hex>`.
/// Returns false on any malformed input rather than panicking — a bad header
/// is just another way to fail verification.
pub fn verify(raw_body: &[u8], header_signature: &str, tenant_shared_secret: &str) -> bool {
    let Some(hex_digest) = header_signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(tenant_shared_secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    // `verify_slice` is constant-time internally.
    mac.verify_slice(&expected).is_ok()
}

/// Sign a body, used by tests and by the documented round-trip law
/// (verify ∘ sign = true for a matching secret).
pub fn sign(raw_body: &[u8], tenant_shared_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(tenant_shared_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// First 8 bytes of the computed digest, masked, for the `AUTH_SIGNATURE_FAIL`
/// audit entry.
pub fn masked_digest_prefix(raw_body: &[u8], tenant_shared_secret: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(tenant_shared_secret.as_bytes()) else {
        return "****".to_string();
    };
    mac.update(raw_body);
    let digest = mac.finalize().into_bytes();
    hex::encode(&digest[..8.min(digest.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verify_sign() {
        let body = b"{\"hello\":\"world\"}";
        let secret = "tenant-secret";
        let sig = sign(body, secret);
        assert!(verify(body, &sig, secret));
    }

    #[test]
    fn single_byte_mutation_fails() {
        let body = b"{\"hello\":\"world\"}";
        let mut mutated = body.to_vec();
        mutated[2] ^= 0x01;
        let secret = "tenant-secret";
        let sig = sign(body, secret);
        assert!(!verify(&mutated, &sig, secret));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign(body, "secret-a");
        assert!(!verify(body, &sig, "secret-b"));
    }

    #[test]
    fn malformed_header_fails_closed() {
        assert!(!verify(b"payload", "not-a-signature", "secret"));
        assert!(!verify(b"payload", "sha256=not-hex", "secret"));
    }
}
