//! Request signing.
//!
//! The signing key is the SHA-1 of the application salt plus the tenant
//! secret; the token is `base64(payload).base64(hmac)`. SHA-1 here is
//! the portal-mandated wire format, not a local choice.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Application-level salt mixed into every tenant key.
const KEY_SALT: &str = "saltysigner";

fn derive_key(secret: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(KEY_SALT.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

fn keyed_mac(secret: &str) -> HmacSha1 {
    HmacSha1::new_from_slice(&derive_key(secret)).expect("HMAC accepts any key length")
}

/// Sign `payload` with the tenant secret.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(payload);
    let tag = mac.finalize().into_bytes();
    format!("{}.{}", BASE64.encode(payload), BASE64.encode(tag))
}

/// Verify a signed token and return the embedded payload.
///
/// Rejects tokens missing the two-part delimiter structure and tokens
/// whose MAC does not match; there is no partial trust.
pub fn verify(token: &str, secret: &str) -> Option<Vec<u8>> {
    let (payload_b64, tag_b64) = token.split_once('.')?;
    let payload = BASE64.decode(payload_b64).ok()?;
    let tag = BASE64.decode(tag_b64).ok()?;

    let mut mac = keyed_mac(secret);
    mac.update(&payload);
    mac.verify_slice(&tag).ok()?;
    Some(payload)
}
