/**
 * STUN and TURN attributes.
 *
 * ```text
 *     0                   1                   2                   3
 *     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |         Type                  |            Length             |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |                         Value (variable)                ....
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 * ```
 */
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::errors::{Error, Result};
use crate::stun::error_codes::parse_error_attribute;
use crate::stun::xoraddr::decode_xor_address;
use crate::stun::{pad, requests::RequestedTransport};
use crate::utils;

// Attribute Types
#[allow(dead_code)]
pub mod attribute_type {
    // STUN, https://tools.ietf.org/html/rfc5389#section-15
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const UNKNOWN_ATTRIBUTES: u16 = 0x000a;
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    /// https://datatracker.ietf.org/doc/html/rfc6156#section-10.1
    pub const REQUESTED_ADDRESS_FAMILY: u16 = 0x0017;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const SOFTWARE: u16 = 0x8022;
    pub const ALTERNATE_SERVER: u16 = 0x8023;
    pub const FINGERPRINT: u16 = 0x8028;

    // TURN, https://tools.ietf.org/html/rfc5766#section-14
    pub const CHANNEL_NUMBER: u16 = 0x000c;
    pub const LIFETIME: u16 = 0x000d;
    pub const BANDWIDTH: u16 = 0x0010;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
    pub const EVEN_PORT: u16 = 0x0018;
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    pub const DONT_FRAGMENT: u16 = 0x001a;
    pub const TIMER_VAL: u16 = 0x0021;
    pub const RESERVATION_TOKEN: u16 = 0x0022;

    // TURN over TCP, https://tools.ietf.org/html/rfc6062#section-6.2.1
    pub const CONNECTION_ID: u16 = 0x002a;

    // RFC5780 leftovers still emitted by coturn
    pub const RESPONSE_ORIGIN: u16 = 0x802b;
    pub const OTHER_ADDRESS: u16 = 0x802c;
}

/**
 * Returns the human readable attribute name, if known.
 */
pub fn attribute_name(t: u16) -> Option<&'static str> {
    use attribute_type::*;
    match t {
        MAPPED_ADDRESS => Some("MAPPED-ADDRESS"),
        USERNAME => Some("USERNAME"),
        MESSAGE_INTEGRITY => Some("MESSAGE-INTEGRITY"),
        ERROR_CODE => Some("ERROR-CODE"),
        UNKNOWN_ATTRIBUTES => Some("UNKNOWN-ATTRIBUTES"),
        REALM => Some("REALM"),
        NONCE => Some("NONCE"),
        REQUESTED_ADDRESS_FAMILY => Some("REQUESTED-ADDRESS-FAMILY"),
        XOR_MAPPED_ADDRESS => Some("XOR-MAPPED-ADDRESS"),
        SOFTWARE => Some("SOFTWARE"),
        ALTERNATE_SERVER => Some("ALTERNATE-SERVER"),
        FINGERPRINT => Some("FINGERPRINT"),
        CHANNEL_NUMBER => Some("CHANNEL-NUMBER"),
        LIFETIME => Some("LIFETIME"),
        BANDWIDTH => Some("BANDWIDTH"),
        XOR_PEER_ADDRESS => Some("XOR-PEER-ADDRESS"),
        DATA => Some("DATA"),
        XOR_RELAYED_ADDRESS => Some("XOR-RELAYED-ADDRESS"),
        EVEN_PORT => Some("EVEN-PORT"),
        REQUESTED_TRANSPORT => Some("REQUESTED-TRANSPORT"),
        DONT_FRAGMENT => Some("DONT-FRAGMENT"),
        TIMER_VAL => Some("TIMER-VAL"),
        RESERVATION_TOKEN => Some("RESERVATION-TOKEN"),
        CONNECTION_ID => Some("CONNECTION-ID"),
        RESPONSE_ORIGIN => Some("RESPONSE-ORIGIN"),
        OTHER_ADDRESS => Some("OTHER-ADDRESS"),
        _ => None,
    }
}

/**
 * A single STUN attribute. `length` reflects the unpadded value size;
 * `padding` records the padding seen on the wire so parsed messages can be
 * rendered faithfully.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u16,
    pub length: u16,
    pub value: Vec<u8>,
    pub(crate) padding: u16,
}

impl Attribute {
    pub fn new(attr_type: u16, value: Vec<u8>) -> Self {
        Self {
            attr_type,
            length: 0,
            value,
            padding: 0,
        }
    }

    /**
     * Returns the byte representation of the attribute, zero padded to a
     * 4-byte boundary. The length field reflects the unpadded size.
     */
    pub fn serialize(&self) -> Vec<u8> {
        let length = if self.length == 0 {
            self.value.len() as u16
        } else {
            self.length
        };

        let mut buf = Vec::with_capacity(4 + self.value.len() + 3);
        buf.extend_from_slice(&self.attr_type.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.value);
        pad(buf)
    }

    /**
     * Walks an attribute block and returns the contained attributes.
     *
     * @param data The attribute block without the message header.
     * @return The parsed attributes, or an error if an attribute header or
     *         value would run past the end of the block.
     */
    pub(crate) fn parse_all(data: &[u8]) -> Result<Vec<Attribute>> {
        let mut attrs = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            if pos + 4 > data.len() {
                return Err(Error::InvalidLength(data.len()));
            }
            let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            pos += 4;
            if pos + length as usize > data.len() {
                return Err(Error::InvalidLength(data.len()));
            }
            let value = data[pos..pos + length as usize].to_vec();
            pos += length as usize;
            // skip inter-attribute padding; the last attribute may omit it
            let mut padding = 0u16;
            if pos % 4 != 0 {
                padding = 4 - (pos % 4) as u16;
                pos += padding as usize;
            }
            attrs.push(Attribute {
                attr_type,
                length,
                value,
                padding,
            });
        }
        Ok(attrs)
    }

    /**
     * Renders the attribute for the debug dump. Address-bearing attributes
     * are XOR-decoded with the message transaction ID.
     */
    pub fn describe(&self, transaction_id: &[u8]) -> String {
        use attribute_type::*;
        let attr_name = attribute_name(self.attr_type);
        let value = match self.attr_type {
            MESSAGE_INTEGRITY | FINGERPRINT | CONNECTION_ID => hex::encode(&self.value),
            ERROR_CODE => {
                let (code, text) = parse_error_attribute(&self.value);
                format!("Error {}: {}", code, text)
            }
            REQUESTED_ADDRESS_FAMILY => match self.value.first().copied() {
                Some(0x01) => "IPv4".to_string(),
                Some(0x02) => "IPv6".to_string(),
                _ => "None".to_string(),
            },
            XOR_MAPPED_ADDRESS | XOR_PEER_ADDRESS | XOR_RELAYED_ADDRESS => {
                match decode_xor_address(&self.value, transaction_id) {
                    Ok((host, port)) => format!("{} ({}:{})", hex::encode(&self.value), host, port),
                    Err(_) => hex::encode(&self.value),
                }
            }
            LIFETIME if self.value.len() == 4 => u32::from_be_bytes([
                self.value[0],
                self.value[1],
                self.value[2],
                self.value[3],
            ])
            .to_string(),
            REQUESTED_TRANSPORT if self.value.len() >= 4 => {
                let raw = u32::from_le_bytes([
                    self.value[0],
                    self.value[1],
                    self.value[2],
                    self.value[3],
                ]);
                RequestedTransport(raw)
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.to_string())
            }
            DATA => format!(
                "{} ({})",
                String::from_utf8_lossy(&self.value),
                hex::encode(&self.value)
            ),
            _ => {
                let text = String::from_utf8_lossy(&self.value).into_owned();
                if utils::is_printable(&text) {
                    text
                } else {
                    hex::encode(&self.value)
                }
            }
        };

        let name = attr_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:#06x} ({})", self.attr_type, self.length));
        if self.padding > 0 {
            format!("{}: {} Padding: {}", name, value, self.padding)
        } else {
            format!("{}: {}", name, value)
        }
    }
}

/**
 * Parses a plain MAPPED-ADDRESS style value (no XOR): zero byte, family
 * byte, port, address. Also used for RESPONSE-ORIGIN and OTHER-ADDRESS.
 */
pub fn parse_mapped_address(value: &[u8]) -> Result<(IpAddr, u16)> {
    if value.len() < 4 {
        return Err(Error::InvalidLength(value.len()));
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    match (value[1], value.len()) {
        (0x01, 8) => Ok((
            IpAddr::V4(Ipv4Addr::new(value[4], value[5], value[6], value[7])),
            port,
        )),
        (0x02, 20) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            Ok((IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        (0x01, n) | (0x02, n) => Err(Error::InvalidLength(n)),
        (family, _) => Err(Error::InvalidAddressFamily(family)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_pads_value() {
        let a = Attribute::new(attribute_type::REALM, b"slack.com".to_vec());
        let out = a.serialize();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[0..2], &attribute_type::REALM.to_be_bytes());
        // length field holds the unpadded size
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 9);
        assert_eq!(&out[4..13], b"slack.com");
        assert_eq!(&out[13..16], &[0, 0, 0]);
    }

    #[test]
    fn test_parse_all_records_padding() {
        let mut block = Attribute::new(attribute_type::REALM, b"slack.com".to_vec()).serialize();
        block.extend_from_slice(&Attribute::new(attribute_type::SOFTWARE, b"None".to_vec()).serialize());
        let attrs = Attribute::parse_all(&block).expect("parse failed");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].padding, 3);
        assert_eq!(attrs[0].value, b"slack.com");
        assert_eq!(attrs[1].padding, 0);
    }

    #[test]
    fn test_parse_all_truncated_value() {
        // claims 16 bytes of value but only carries 2
        let block = [0x00, 0x14, 0x00, 0x10, 0x61, 0x62];
        assert!(matches!(
            Attribute::parse_all(&block),
            Err(Error::InvalidLength(_))
        ));
    }

    #[test]
    fn test_parse_mapped_address_v4() {
        let value = [0x00, 0x01, 0x1f, 0x90, 192, 168, 1, 10];
        let (ip, port) = parse_mapped_address(&value).expect("parse failed");
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_parse_mapped_address_bad_family() {
        let value = [0x00, 0x07, 0x1f, 0x90, 1, 2, 3, 4];
        assert!(matches!(
            parse_mapped_address(&value),
            Err(Error::InvalidAddressFamily(0x07))
        ));
    }
}
