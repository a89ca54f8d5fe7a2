/**
 * STUN, TURN and TURN-over-TCP error codes.
 *
 * The ERROR-CODE attribute carries the code split into a class and a number
 * plus an optional reason phrase:
 *
 *    0                   1                   2                   3
 *    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |           Reserved, should be 0         |Class|     Number    |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |      Reason Phrase (variable)                                ..
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 */

#[allow(dead_code)]
pub mod error_code {
    // STUN, https://tools.ietf.org/html/rfc5389#section-15.6
    pub const TRY_ALTERNATE: u16 = 300;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const UNKNOWN_ATTRIBUTE: u16 = 420;
    pub const STALE_NONCE: u16 = 438;
    pub const SERVER_ERROR: u16 = 500;

    // TURN, https://tools.ietf.org/html/rfc5766#section-15
    pub const FORBIDDEN: u16 = 403;
    pub const ALLOCATION_MISMATCH: u16 = 437;
    pub const WRONG_CREDENTIALS: u16 = 441;
    pub const UNSUPPORTED_TRANSPORT_PROTOCOL: u16 = 442;
    pub const ALLOCATION_QUOTA_REACHED: u16 = 486;
    pub const INSUFFICIENT_CAPACITY: u16 = 508;

    // RFC6156, https://datatracker.ietf.org/doc/html/rfc6156#section-10.2
    pub const ADDRESS_FAMILY_NOT_SUPPORTED: u16 = 440;
    pub const PEER_ADDRESS_FAMILY_MISMATCH: u16 = 443;

    // TURN over TCP, https://tools.ietf.org/html/rfc6062#section-6.3
    pub const CONNECTION_ALREADY_EXISTS: u16 = 446;
    pub const CONNECTION_TIMEOUT_OR_FAILURE: u16 = 447;
}

/**
 * Returns the built-in reason phrase for a standard error code.
 */
pub fn error_code_text(code: u16) -> Option<&'static str> {
    use error_code::*;
    match code {
        TRY_ALTERNATE => Some("Try Alternate"),
        BAD_REQUEST => Some("Bad Request"),
        UNAUTHORIZED => Some("Unauthorized"),
        FORBIDDEN => Some("Forbidden"),
        UNKNOWN_ATTRIBUTE => Some("Unknown Attribute"),
        ALLOCATION_MISMATCH => Some("Allocation Mismatch"),
        STALE_NONCE => Some("Stale Nonce"),
        ADDRESS_FAMILY_NOT_SUPPORTED => Some("Address Family not supported"),
        WRONG_CREDENTIALS => Some("Wrong Credentials"),
        UNSUPPORTED_TRANSPORT_PROTOCOL => Some("Unsupported Transport Protocol"),
        PEER_ADDRESS_FAMILY_MISMATCH => Some("Peer Address Family Missmatch"),
        CONNECTION_ALREADY_EXISTS => Some("Connection Already Exists"),
        CONNECTION_TIMEOUT_OR_FAILURE => Some("Connection Timeout or Failure"),
        ALLOCATION_QUOTA_REACHED => Some("Allocation Quota Reached"),
        SERVER_ERROR => Some("Server Error"),
        INSUFFICIENT_CAPACITY => Some("Insufficient Capacity"),
        _ => None,
    }
}

/**
 * Parses an ERROR-CODE attribute value into the numeric code and the reason
 * phrase. A missing or blank reason falls back to the built-in table, or
 * "Invalid Error" for unknown codes.
 */
pub fn parse_error_attribute(value: &[u8]) -> (u16, String) {
    if value.len() < 4 {
        return (0, "Invalid Error".to_string());
    }
    let code = value[2] as u16 * 100 + value[3] as u16;
    let text = String::from_utf8_lossy(&value[4..]).into_owned();
    if text.trim().is_empty() {
        let fallback = error_code_text(code).unwrap_or("Invalid Error");
        return (code, fallback.to_string());
    }
    (code, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_reason() {
        let mut value = vec![0x00, 0x00, 0x04, 0x01];
        value.extend_from_slice(b"Unauthorized");
        let (code, text) = parse_error_attribute(&value);
        assert_eq!(code, 401);
        assert_eq!(text, "Unauthorized");
    }

    #[test]
    fn test_parse_falls_back_to_table() {
        let (code, text) = parse_error_attribute(&[0x00, 0x00, 0x04, 0x26]);
        assert_eq!(code, 438);
        assert_eq!(text, "Stale Nonce");

        let (code, text) = parse_error_attribute(&[0x00, 0x00, 0x04, 0x2f]);
        assert_eq!(code, 447);
        assert_eq!(text, "Connection Timeout or Failure");
    }

    #[test]
    fn test_parse_unknown_code() {
        let (code, text) = parse_error_attribute(&[0x00, 0x00, 0x06, 0x63]);
        assert_eq!(code, 699);
        assert_eq!(text, "Invalid Error");
    }

    #[test]
    fn test_parse_short_value() {
        let (code, text) = parse_error_attribute(&[0x00]);
        assert_eq!(code, 0);
        assert_eq!(text, "Invalid Error");
    }
}
