/**
 * STUN message types.
 *
 * The 16-bit message type field interleaves a 2-bit class and a 12-bit
 * method:
 *
 *    0                 1
 *    2  3  4 5 6 7 8 9 0 1 2 3 4 5
 *   +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
 *   |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
 *   |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
 *   +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
 *
 * For example, 0x0113 is an Allocate Error Response: class bits at
 * positions 4 and 8 give 3 (Error), the remaining method bits give 0x003
 * (Allocate).
 */
use std::fmt;

/**
 * The message class, https://tools.ietf.org/html/rfc5389#section-6
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Class {
    Request = 0x00,
    Indication = 0x01,
    Success = 0x02,
    Error = 0x03,
}

impl Class {
    fn from_bits(bits: u16) -> Class {
        match bits & 0x03 {
            0x00 => Class::Request,
            0x01 => Class::Indication,
            0x02 => Class::Success,
            _ => Class::Error,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Class::Request => "Request",
            Class::Indication => "Indication",
            Class::Success => "Success Response",
            Class::Error => "Error Response",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// STUN and TURN method numbers.
#[allow(dead_code)]
pub mod method {
    /// https://tools.ietf.org/html/rfc5389#section-18.1
    pub const BINDING: u16 = 0x001;
    /// https://tools.ietf.org/html/rfc5766#section-13
    pub const ALLOCATE: u16 = 0x003;
    pub const REFRESH: u16 = 0x004;
    pub const SEND: u16 = 0x006;
    pub const DATA: u16 = 0x007;
    pub const CREATE_PERMISSION: u16 = 0x008;
    pub const CHANNEL_BIND: u16 = 0x009;
    /// https://tools.ietf.org/html/rfc6062#section-6.1
    pub const CONNECT: u16 = 0x00a;
    pub const CONNECTION_BIND: u16 = 0x00b;
    pub const CONNECTION_ATTEMPT: u16 = 0x00c;
}

/**
 * Returns the human readable name of a method, if it is a known one.
 */
pub fn method_name(m: u16) -> Option<&'static str> {
    match m {
        method::BINDING => Some("Binding"),
        method::ALLOCATE => Some("Allocate"),
        method::REFRESH => Some("Refresh"),
        method::SEND => Some("Send"),
        method::DATA => Some("Data"),
        method::CREATE_PERMISSION => Some("CreatePermission"),
        method::CHANNEL_BIND => Some("Channel-Bind"),
        method::CONNECT => Some("Connect"),
        method::CONNECTION_BIND => Some("ConnectionBind"),
        method::CONNECTION_ATTEMPT => Some("ConnectionAttempt"),
        _ => None,
    }
}

/**
 * A decoded message type: class plus method.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageType {
    pub class: Class,
    pub method: u16,
}

impl MessageType {
    pub fn new(class: Class, method: u16) -> Self {
        Self { class, method }
    }

    /**
     * Encodes the class and method into the wire representation.
     *
     * Class bit 0 lands at position 4, class bit 1 at position 8. Method
     * bits 0-3 stay in place, bits 4-6 shift to positions 5-7, bits 7-11 to
     * positions 9-13.
     */
    pub fn encode(&self) -> u16 {
        let class = ((self.class as u16 & 0x02) << 7) | ((self.class as u16 & 0x01) << 4);
        let method =
            (self.method & 0x000f) | ((self.method & 0x0070) << 1) | ((self.method & 0x0f80) << 2);
        class | method
    }

    /**
     * Decodes a wire message type into class and method.
     *
     * Example: 0x0113 = Allocate Error Response
     * 0x0113 --> 0000 0001 0001 0011
     * 0x0010 --> 0000 0000 0001 0000 --> class bit 0
     * 0x0100 --> 0000 0001 0000 0000 --> class bit 1
     *        --> 0000 0000 0000 0011 --> 3 (Error)
     * 0x000F --> 0000 0000 0000 1111 --> method bits 0-3
     * 0x00E0 --> 0000 0000 1110 0000 --> method bits 4-6
     * 0x3E00 --> 0011 1110 0000 0000 --> method bits 7-11
     *        --> 0000 0000 0000 0011 --> 3 (Allocate)
     */
    pub fn decode(raw: u16) -> MessageType {
        let class = ((raw & 0x0010) >> 4) | ((raw & 0x0100) >> 7);
        let method = (raw & 0x000f) | ((raw & 0x00e0) >> 1) | ((raw & 0x3e00) >> 2);
        MessageType {
            class: Class::from_bits(class),
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        // Binding Request
        assert_eq!(MessageType::new(Class::Request, method::BINDING).encode(), 0x0001);
        // Binding Success Response
        assert_eq!(MessageType::new(Class::Success, method::BINDING).encode(), 0x0101);
        // Allocate Error Response
        assert_eq!(MessageType::new(Class::Error, method::ALLOCATE).encode(), 0x0113);
        // Connect Success Response
        assert_eq!(MessageType::new(Class::Success, method::CONNECT).encode(), 0x010a);
    }

    #[test]
    fn test_decode_allocate_error() {
        let mt = MessageType::decode(0x0113);
        assert_eq!(mt.class, Class::Error);
        assert_eq!(mt.method, method::ALLOCATE);
    }

    #[test]
    fn test_round_trip_all_classes_and_methods() {
        for class in [Class::Request, Class::Indication, Class::Success, Class::Error] {
            for m in 0..0x1000u16 {
                let mt = MessageType::new(class, m);
                let decoded = MessageType::decode(mt.encode());
                assert_eq!(decoded, mt, "round trip failed for class {:?} method {:#x}", class, m);
            }
        }
    }
}
