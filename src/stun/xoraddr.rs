/**
 * XOR address transform shared by XOR-MAPPED-ADDRESS, XOR-PEER-ADDRESS and
 * XOR-RELAYED-ADDRESS.
 *
 * ```text
 *     0                   1                   2                   3
 *     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *     |x x x x x x x x|    Family     |         X-Port                |
 *     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *     |                X-Address (Variable)
 *     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 * ```
 *
 * The port is XORed with the high 16 bits of the magic cookie. An IPv4
 * address is XORed with the magic cookie; an IPv6 address with the
 * concatenation of the magic cookie and the 96-bit transaction ID.
 */
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::errors::{Error, Result};
use crate::stun::MAGIC_COOKIE;

/// XORs `content` with a repeating `key`.
fn xor(content: &[u8], key: &[u8]) -> Vec<u8> {
    content
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/**
 * Encodes an address and port into the XOR wire representation.
 *
 * @param ip The address to encode.
 * @param port The port to encode.
 * @param transaction_id The message transaction ID (used for IPv6 only).
 * @return The attribute value bytes.
 */
pub fn xor_address(ip: IpAddr, port: u16, transaction_id: &[u8]) -> Vec<u8> {
    let magic = u16::from_be_bytes([MAGIC_COOKIE[0], MAGIC_COOKIE[1]]);

    let (family, encoded) = match ip {
        IpAddr::V4(v4) => (0x01u16, xor(&v4.octets(), &MAGIC_COOKIE)),
        IpAddr::V6(v6) => {
            let mut key = MAGIC_COOKIE.to_vec();
            key.extend_from_slice(transaction_id);
            (0x02u16, xor(&v6.octets(), &key))
        }
    };

    let mut buf = Vec::with_capacity(4 + encoded.len());
    buf.extend_from_slice(&family.to_be_bytes());
    buf.extend_from_slice(&(port ^ magic).to_be_bytes());
    buf.extend_from_slice(&encoded);
    buf
}

/**
 * Decodes an XOR address attribute value back into address and port.
 */
pub fn decode_xor_address(value: &[u8], transaction_id: &[u8]) -> Result<(IpAddr, u16)> {
    if value.len() < 5 {
        return Err(Error::InvalidLength(value.len()));
    }
    if value[0] != 0x00 {
        return Err(Error::InvalidAddressFamily(value[0]));
    }

    let magic = u16::from_be_bytes([MAGIC_COOKIE[0], MAGIC_COOKIE[1]]);
    let port = u16::from_be_bytes([value[2], value[3]]) ^ magic;
    let payload = &value[4..];

    match value[1] {
        0x01 => {
            if payload.len() != 4 {
                return Err(Error::InvalidLength(value.len()));
            }
            let host = xor(payload, &MAGIC_COOKIE);
            Ok((
                IpAddr::V4(Ipv4Addr::new(host[0], host[1], host[2], host[3])),
                port,
            ))
        }
        0x02 => {
            if payload.len() != 16 {
                return Err(Error::InvalidLength(value.len()));
            }
            let mut key = MAGIC_COOKIE.to_vec();
            key.extend_from_slice(transaction_id);
            let host = xor(payload, &key);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&host);
            Ok((IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        family => Err(Error::InvalidAddressFamily(family)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_address_v4() {
        // IPv4 127.0.0.1:22
        let out = xor_address(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 22, b"ASDF");
        assert_eq!(hex::encode(out), "000121045e12a443");
    }

    #[test]
    fn test_decode_xor_address() {
        let input = hex::decode("000121422112a442").expect("invalid hex");
        let (host, port) = decode_xor_address(&input, b"ASDF").expect("decode failed");
        assert_eq!(host, IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        assert_eq!(port, 80);
    }

    #[test]
    fn test_round_trip_v4() {
        let tid = b"aBcDeFgHiJkL";
        let ip = IpAddr::V4(Ipv4Addr::new(10, 13, 37, 254));
        let encoded = xor_address(ip, 8443, tid);
        let (host, port) = decode_xor_address(&encoded, tid).expect("decode failed");
        assert_eq!(host, ip);
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_round_trip_v6() {
        let tid = b"aBcDeFgHiJkL";
        let ip: IpAddr = "fd00:dead:beef::1".parse().expect("invalid ip");
        let encoded = xor_address(ip, 53, tid);
        assert_eq!(encoded.len(), 20);
        let (host, port) = decode_xor_address(&encoded, tid).expect("decode failed");
        assert_eq!(host, ip);
        assert_eq!(port, 53);
    }

    #[test]
    fn test_decode_rejects_bad_family() {
        let input = hex::decode("000321422112a442").expect("invalid hex");
        assert!(matches!(
            decode_xor_address(&input, b"ASDF"),
            Err(Error::InvalidAddressFamily(0x03))
        ));
    }

    #[test]
    fn test_decode_rejects_short_value() {
        assert!(matches!(
            decode_xor_address(&[0x00, 0x01, 0x21], b"ASDF"),
            Err(Error::InvalidLength(3))
        ));
    }
}
