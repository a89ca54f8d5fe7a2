/**
 * Typed request constructors. Every constructor allocates a fresh random
 * transaction ID and populates the required attribute list; authenticated
 * variants additionally carry the credentials used by the serializer to
 * compute MESSAGE-INTEGRITY, and append USERNAME, REALM and NONCE in that
 * order.
 */
use std::fmt;
use std::net::IpAddr;

use crate::stun::attributes::{attribute_type, Attribute};
use crate::stun::message_type::{method, Class, MessageType};
use crate::stun::xoraddr::xor_address;
use crate::stun::Message;

/**
 * The protocol number carried in REQUESTED-TRANSPORT. TCP and UDP are the
 * two transports servers are expected to accept; the tuple form exists so
 * the brute-transports probe can sweep the whole byte range.
 *
 * The wire encoding is the 4-byte little-endian integer. This is what the
 * TURN deployments this tool was written against accept; do not change it
 * without a compatibility test matrix.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedTransport(pub u32);

impl RequestedTransport {
    pub const TCP: RequestedTransport = RequestedTransport(6);
    pub const UDP: RequestedTransport = RequestedTransport(17);

    pub fn name(&self) -> Option<&'static str> {
        match *self {
            RequestedTransport::TCP => Some("TCP"),
            RequestedTransport::UDP => Some("UDP"),
            _ => None,
        }
    }

    fn serialize(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

/**
 * The REQUESTED-ADDRESS-FAMILY of an allocation (RFC 6156). `None` is an
 * internal sentinel meaning the attribute is omitted entirely.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    None,
    V4,
    V6,
}

impl AddressFamily {
    /// Returns `V6` for IPv6 targets and `None` otherwise, matching the
    /// behavior servers were probed with (v4 allocations never send the
    /// attribute).
    pub fn for_target(target: IpAddr) -> AddressFamily {
        match target {
            IpAddr::V4(_) => AddressFamily::None,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// The attribute value is the family byte followed by four zero bytes.
    /// Five bytes rather than the four of RFC 6156; tested servers expect
    /// this form.
    fn serialize(&self) -> Option<Vec<u8>> {
        let family = match self {
            AddressFamily::None => return None,
            AddressFamily::V4 => 0x01u8,
            AddressFamily::V6 => 0x02u8,
        };
        Some(vec![family, 0x00, 0x00, 0x00, 0x00])
    }
}

fn request(method: u16) -> Message {
    let mut message = Message::new();
    message.header.message_type = MessageType::new(Class::Request, method);
    message
}

/// Sets the credentials and appends USERNAME, REALM and NONCE.
fn authenticate(message: &mut Message, username: &str, password: &str, nonce: &str, realm: &str) {
    message.username = Some(username.to_string());
    message.password = Some(password.to_string());
    message.attributes.push(Attribute::new(
        attribute_type::USERNAME,
        username.as_bytes().to_vec(),
    ));
    message.attributes.push(Attribute::new(
        attribute_type::REALM,
        realm.as_bytes().to_vec(),
    ));
    message.attributes.push(Attribute::new(
        attribute_type::NONCE,
        nonce.as_bytes().to_vec(),
    ));
}

/**
 * Returns a request for the BINDING method.
 */
pub fn binding_request() -> Message {
    request(method::BINDING)
}

/**
 * Returns an unauthenticated ALLOCATE request. Servers answer this with an
 * Unauthorized error carrying the realm and nonce for the follow-up.
 */
pub fn allocate_request(transport: RequestedTransport, family: AddressFamily) -> Message {
    let mut message = request(method::ALLOCATE);
    message.attributes.push(Attribute::new(
        attribute_type::REQUESTED_TRANSPORT,
        transport.serialize(),
    ));
    if let Some(value) = family.serialize() {
        message
            .attributes
            .push(Attribute::new(attribute_type::REQUESTED_ADDRESS_FAMILY, value));
    }
    message
}

/**
 * Returns an authenticated ALLOCATE request.
 */
pub fn allocate_request_auth(
    username: &str,
    password: &str,
    nonce: &str,
    realm: &str,
    transport: RequestedTransport,
    family: AddressFamily,
) -> Message {
    let mut message = request(method::ALLOCATE);
    message.attributes.push(Attribute::new(
        attribute_type::REQUESTED_TRANSPORT,
        transport.serialize(),
    ));
    authenticate(&mut message, username, password, nonce, realm);
    if let Some(value) = family.serialize() {
        message
            .attributes
            .push(Attribute::new(attribute_type::REQUESTED_ADDRESS_FAMILY, value));
    }
    message
}

/**
 * Returns a SEND indication-style request carrying DATA for the peer.
 */
pub fn send_request(target: IpAddr, port: u16, data: &[u8]) -> Message {
    let mut message = request(method::SEND);
    let target_xor = xor_address(target, port, &message.header.transaction_id);
    message
        .attributes
        .push(Attribute::new(attribute_type::XOR_PEER_ADDRESS, target_xor));
    message
        .attributes
        .push(Attribute::new(attribute_type::DATA, data.to_vec()));
    message
}

/**
 * Returns an authenticated CREATE PERMISSION request for the target peer.
 */
pub fn create_permission_request(
    username: &str,
    password: &str,
    nonce: &str,
    realm: &str,
    target: IpAddr,
    port: u16,
) -> Message {
    let mut message = request(method::CREATE_PERMISSION);
    let target_xor = xor_address(target, port, &message.header.transaction_id);
    message
        .attributes
        .push(Attribute::new(attribute_type::XOR_PEER_ADDRESS, target_xor));
    authenticate(&mut message, username, password, nonce, realm);
    message
}

/**
 * Returns an authenticated CHANNEL BIND request binding the channel number
 * to the target peer. The CHANNEL-NUMBER value carries two reserved zero
 * bytes after the channel.
 */
pub fn channel_bind_request(
    username: &str,
    password: &str,
    nonce: &str,
    realm: &str,
    target: IpAddr,
    port: u16,
    channel: [u8; 2],
) -> Message {
    let mut message = request(method::CHANNEL_BIND);
    let target_xor = xor_address(target, port, &message.header.transaction_id);
    message.attributes.push(Attribute::new(
        attribute_type::CHANNEL_NUMBER,
        vec![channel[0], channel[1], 0x00, 0x00],
    ));
    message
        .attributes
        .push(Attribute::new(attribute_type::XOR_PEER_ADDRESS, target_xor));
    authenticate(&mut message, username, password, nonce, realm);
    message
}

/**
 * Returns an authenticated REFRESH request.
 */
pub fn refresh_request(username: &str, password: &str, nonce: &str, realm: &str) -> Message {
    let mut message = request(method::REFRESH);
    authenticate(&mut message, username, password, nonce, realm);
    message
}

/**
 * Returns an unauthenticated CONNECT request (RFC 6062).
 */
pub fn connect_request(target: IpAddr, port: u16) -> Message {
    let mut message = request(method::CONNECT);
    let target_xor = xor_address(target, port, &message.header.transaction_id);
    message
        .attributes
        .push(Attribute::new(attribute_type::XOR_PEER_ADDRESS, target_xor));
    message
}

/**
 * Returns an authenticated CONNECT request (RFC 6062).
 */
pub fn connect_request_auth(
    username: &str,
    password: &str,
    nonce: &str,
    realm: &str,
    target: IpAddr,
    port: u16,
) -> Message {
    let mut message = request(method::CONNECT);
    let target_xor = xor_address(target, port, &message.header.transaction_id);
    message
        .attributes
        .push(Attribute::new(attribute_type::XOR_PEER_ADDRESS, target_xor));
    authenticate(&mut message, username, password, nonce, realm);
    message
}

/**
 * Returns an authenticated CONNECTION BIND request that claims the
 * CONNECTION-ID on the data connection (RFC 6062).
 */
pub fn connection_bind_request(
    connection_id: &[u8],
    username: &str,
    password: &str,
    nonce: &str,
    realm: &str,
) -> Message {
    let mut message = request(method::CONNECTION_BIND);
    message.attributes.push(Attribute::new(
        attribute_type::CONNECTION_ID,
        connection_id.to_vec(),
    ));
    authenticate(&mut message, username, password, nonce, realm);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_requested_transport_is_little_endian() {
        assert_eq!(RequestedTransport::UDP.serialize(), vec![0x11, 0x00, 0x00, 0x00]);
        assert_eq!(RequestedTransport::TCP.serialize(), vec![0x06, 0x00, 0x00, 0x00]);
        assert_eq!(RequestedTransport(0xfe).serialize(), vec![0xfe, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_address_family_value() {
        assert_eq!(AddressFamily::None.serialize(), None);
        assert_eq!(
            AddressFamily::V6.serialize(),
            Some(vec![0x02, 0x00, 0x00, 0x00, 0x00])
        );
    }

    #[test]
    fn test_allocate_request_attributes() {
        let m = allocate_request(RequestedTransport::UDP, AddressFamily::None);
        assert_eq!(m.header.message_type.class, Class::Request);
        assert_eq!(m.header.message_type.method, method::ALLOCATE);
        assert_eq!(m.header.transaction_id.len(), 12);
        assert_eq!(m.attributes.len(), 1);
        assert_eq!(m.attributes[0].attr_type, attribute_type::REQUESTED_TRANSPORT);
        assert!(m.username.is_none());

        let m = allocate_request(RequestedTransport::UDP, AddressFamily::V6);
        assert_eq!(m.attributes.len(), 2);
        assert_eq!(
            m.attributes[1].attr_type,
            attribute_type::REQUESTED_ADDRESS_FAMILY
        );
        assert_eq!(m.attributes[1].value.len(), 5);
    }

    #[test]
    fn test_auth_attribute_order() {
        let m = allocate_request_auth(
            "user",
            "pass",
            "nonce",
            "realm",
            RequestedTransport::TCP,
            AddressFamily::None,
        );
        let types: Vec<u16> = m.attributes.iter().map(|a| a.attr_type).collect();
        assert_eq!(
            types,
            vec![
                attribute_type::REQUESTED_TRANSPORT,
                attribute_type::USERNAME,
                attribute_type::REALM,
                attribute_type::NONCE,
            ]
        );
        assert_eq!(m.username.as_deref(), Some("user"));
        assert_eq!(m.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_channel_bind_request_channel_value() {
        let m = channel_bind_request(
            "user",
            "pass",
            "nonce",
            "realm",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            161,
            [0x4f, 0x21],
        );
        assert_eq!(m.attributes[0].attr_type, attribute_type::CHANNEL_NUMBER);
        assert_eq!(m.attributes[0].value, vec![0x4f, 0x21, 0x00, 0x00]);
    }

    #[test]
    fn test_fresh_transaction_ids() {
        let a = binding_request();
        let b = binding_request();
        assert_ne!(a.header.transaction_id, b.header.transaction_id);
    }
}
