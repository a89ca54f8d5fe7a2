/**
 * The STUN/TURN message codec.
 *
 * ```text
 *     0                   1                   2                   3
 *     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |0 0|     STUN Message Type     |         Message Length        |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |                         Magic Cookie                          |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |                                                               |
 *    |                     Transaction ID (96 bits)                  |
 *    |                                                               |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 * ```
 *
 * FINGERPRINT is intentionally never emitted and server MESSAGE-INTEGRITY
 * is never validated; many of the servers this tool targets are not
 * compliant, and rejecting their responses would defeat the point.
 */
use std::fmt;

use crate::errors::{Error, Result};
use crate::utils;

pub mod attributes;
pub mod channel;
pub mod error_codes;
pub mod integrity;
pub mod message_type;
pub mod requests;
pub mod xoraddr;

pub use attributes::{attribute_name, attribute_type, Attribute};
pub use error_codes::{error_code, error_code_text, parse_error_attribute};
pub use integrity::INTEGRITY_LENGTH;
pub use message_type::{method, method_name, Class, MessageType};

/// length of a STUN header is 20 bytes
pub const HEADER_LENGTH: usize = 20;

/// This value is included in STUN messages to help differentiate them from
/// other types of network traffic and to ensure that the messages are
/// processed correctly. The Magic Cookie value is 0x2112A442.
pub const MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xa4, 0x42];

/// Sentinel written where MESSAGE-INTEGRITY goes until the MAC is computed.
const INTEGRITY_PLACEHOLDER: &[u8; 20] = b"_DUMMYDATADUMMYDATA_";

/**
 * Zero pads a buffer to the smallest multiple of 4 which is larger than or
 * equal to its current length.
 */
pub fn pad(mut bytes: Vec<u8>) -> Vec<u8> {
    let length = bytes.len();
    let aligned = (length + 3) & !3;
    bytes.resize(aligned, 0);
    bytes
}

/**
 * The header of a STUN message. The transaction ID is 12 bytes; request
 * constructors fill it with random ASCII letters.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub message_length: u16,
    pub transaction_id: Vec<u8>,
}

impl Header {
    /**
     * Parses the 20-byte wire header. The caller guarantees the slice is at
     * least `HEADER_LENGTH` long.
     */
    pub(crate) fn parse(header: &[u8]) -> Header {
        Header {
            message_type: MessageType::decode(u16::from_be_bytes([header[0], header[1]])),
            message_length: u16::from_be_bytes([header[2], header[3]]),
            transaction_id: header[8..20].to_vec(),
        }
    }
}

/**
 * A STUN message: header plus attribute list. `username` and `password` are
 * not attributes themselves; they drive the MESSAGE-INTEGRITY computation
 * during serialization.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub attributes: Vec<Attribute>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /**
     * Creates an empty message with a fresh random transaction ID.
     */
    pub fn new() -> Message {
        Message {
            header: Header {
                message_type: MessageType::new(Class::Request, method::BINDING),
                message_length: 0,
                transaction_id: utils::random_string(12).into_bytes(),
            },
            attributes: Vec::new(),
            username: None,
            password: None,
        }
    }

    /**
     * Gets a single attribute by type, or None if not present.
     */
    pub fn attribute(&self, attr_type: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /**
     * Returns the string value of an attribute, or an empty string when the
     * attribute is missing. Used for REALM and NONCE extraction.
     */
    pub fn attribute_string(&self, attr_type: u16) -> String {
        self.attribute(attr_type)
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
            .unwrap_or_default()
    }

    /**
     * Returns the decoded ERROR-CODE of an error response, if present.
     */
    pub fn error_details(&self) -> Option<(u16, String)> {
        self.attribute(attribute_type::ERROR_CODE)
            .map(|a| parse_error_attribute(&a.value))
    }

    /**
     * Returns the printable error string from the ERROR-CODE attribute, or
     * an empty string when the response carries none.
     */
    pub fn error_string(&self) -> String {
        match self.error_details() {
            Some((code, text)) => format!("Error {}: {}", code, text),
            None => String::new(),
        }
    }

    /// Shorthand for turning an error response into a crate error.
    pub fn server_error(&self) -> Error {
        let (code, text) = self.error_details().unwrap_or((0, "Invalid Error".into()));
        Error::Server { code, text }
    }

    /**
     * Converts the message into its wire representation.
     *
     * If any attribute is USERNAME, a MESSAGE-INTEGRITY attribute is
     * appended: the header length already accounts for it, but the MAC is
     * computed over the bytes up to the start of the integrity attribute.
     * The placeholder bytes are then replaced with the MAC.
     *
     * @return The serialized message, or an error when the transaction ID
     *         is missing or the MAC cannot be computed.
     */
    pub fn serialize(&self) -> Result<Vec<u8>> {
        // start with the attributes so the message length is known afterward
        let mut attributes = Vec::new();
        let mut authenticated = false;
        for a in &self.attributes {
            attributes.extend_from_slice(&a.serialize());
            if a.attr_type == attribute_type::USERNAME {
                authenticated = true;
            }
        }

        let integrity_pos = attributes.len();
        if authenticated {
            attributes.extend_from_slice(&attribute_type::MESSAGE_INTEGRITY.to_be_bytes());
            attributes.extend_from_slice(&(INTEGRITY_LENGTH as u16).to_be_bytes());
            attributes.extend_from_slice(INTEGRITY_PLACEHOLDER);
        }

        if self.header.transaction_id.is_empty() {
            return Err(Error::MissingTransactionId);
        }

        let mut buf = Vec::with_capacity(HEADER_LENGTH + attributes.len());
        buf.extend_from_slice(&self.header.message_type.encode().to_be_bytes());
        buf.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(&self.header.transaction_id);
        buf.extend_from_slice(&attributes);

        if authenticated {
            let realm = self.attribute_string(attribute_type::REALM);
            let username = self.username.clone().unwrap_or_default();
            let password = self.password.clone().unwrap_or_default();
            // the MAC covers everything up to the integrity attribute while
            // the length field above already includes it
            let mac = integrity::message_integrity(
                &buf[..HEADER_LENGTH + integrity_pos],
                &username,
                &realm,
                &password,
            )?;
            let mac_start = HEADER_LENGTH + integrity_pos + 4;
            buf[mac_start..mac_start + INTEGRITY_LENGTH].copy_from_slice(&mac);
        }

        Ok(buf)
    }

    /**
     * Creates a message from a byte slice.
     *
     * The buffer must contain exactly one message: a declared length that
     * does not match the remaining bytes is rejected, and trailing bytes
     * are surfaced in the error diagnostic.
     */
    pub fn parse(data: &[u8]) -> Result<Message> {
        if data.len() < HEADER_LENGTH {
            return Err(Error::InvalidLength(data.len()));
        }
        let header = Header::parse(&data[0..HEADER_LENGTH]);
        let expected = header.message_length as usize + HEADER_LENGTH;
        if expected != data.len() {
            let extra = if expected < data.len() {
                String::from_utf8_lossy(&data[expected..]).into_owned()
            } else {
                String::new()
            };
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
                extra,
            });
        }
        let attributes = Attribute::parse_all(&data[HEADER_LENGTH..expected])?;
        Ok(Message {
            header,
            attributes,
            username: None,
            password: None,
        })
    }
}

impl fmt::Display for Message {
    /**
     * Renders the message for debug logs: header fields followed by one
     * line per attribute.
     */
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mt = &self.header.message_type;
        writeln!(f, "Header:")?;
        writeln!(
            f,
            "\tMessage Type: {}({:#05x}) {}({:#04x})",
            method_name(mt.method).unwrap_or("Unknown"),
            mt.method,
            mt.class.name(),
            mt.class as u8,
        )?;
        writeln!(f, "\tMessage Length: {}", self.header.message_length)?;
        writeln!(
            f,
            "\tMessage Transaction ID: {}",
            hex::encode(&self.header.transaction_id)
        )?;
        write!(f, "Attributes:")?;
        for a in &self.attributes {
            write!(f, "\n\t{}", a.describe(&self.header.transaction_id))?;
        }
        Ok(())
    }
}
