/**
 * Long-term credential message integrity, https://tools.ietf.org/html/rfc5389#section-15.4
 */
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::errors::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// Size of the MESSAGE-INTEGRITY attribute value.
pub const INTEGRITY_LENGTH: usize = 20;

/**
 * Computes the MESSAGE-INTEGRITY MAC over a serialized message prefix.
 *
 * key = MD5(username ":" realm ":" SASLprep(password)), then HMAC-SHA1 over
 * the message bytes up to (but excluding) the MESSAGE-INTEGRITY attribute.
 * The caller is responsible for having set the header length to include the
 * integrity attribute before computing the MAC.
 */
pub fn message_integrity(
    buf: &[u8],
    username: &str,
    realm: &str,
    password: &str,
) -> Result<[u8; INTEGRITY_LENGTH]> {
    let mut md = Md5::new();
    md.update(format!("{}:{}:{}", username, realm, password).as_bytes());
    let key = md.finalize();

    let mut mac = HmacSha1::new_from_slice(&key).map_err(|_| Error::Integrity)?;
    mac.update(buf);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer() {
        // HMAC-SHA1 with key MD5("user:example.org:pass") over a captured
        // Allocate request
        let buf = hex::decode(
            "000300102112a442dca12e20d9251238502b86ac0019000411000000000d000400000320",
        )
        .expect("invalid hex");
        let mac = message_integrity(&buf, "user", "example.org", "pass").expect("mac failed");
        assert_eq!(
            hex::encode(mac),
            "d63fa5554045ffb0528f7b88fb87e2f1b5e6dd9e"
        );
    }

    #[test]
    fn test_key_depends_on_realm() {
        let buf = b"test buffer";
        let a = message_integrity(buf, "user", "realm-a", "pass").expect("mac failed");
        let b = message_integrity(buf, "user", "realm-b", "pass").expect("mac failed");
        assert_ne!(a, b);
    }
}
