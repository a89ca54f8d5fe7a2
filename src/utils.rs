/**
 * Various misc. utility functions
 */
use rand::Rng;

/**
 * Encodes a byte slice into a hexadecimal string with each byte separated by a comma.
 * Usually used in debug/trace logs.
 *
 * @param buffer The byte slice to encode.
 * @return A `String` containing the hexadecimal representation of the byte slice,
 *         with each byte separated by a comma.
 *
 */
pub fn hex_encode_delimited(buffer: &[u8]) -> String {
    buffer
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(",")
}

/**
 * Generates a random string of ASCII letters. Transaction IDs are built from
 * this so that server-side logs of probes stay printable.
 *
 * @param length The number of characters to generate.
 * @return A `String` of `length` random letters.
 */
pub fn random_string(length: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/**
 * Returns true if the string only contains printable characters. Used when
 * rendering attribute values of unknown type.
 */
pub fn is_printable(s: &str) -> bool {
    s.chars().all(|c| !c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode_delimited() {
        assert_eq!(hex_encode_delimited(&[0x00, 0xff, 0x21]), "00,ff,21");
        assert_eq!(hex_encode_delimited(&[]), "");
    }

    #[test]
    fn test_random_string_is_alpha() {
        let s = random_string(12);
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_is_printable() {
        assert!(is_printable("slack.com"));
        assert!(!is_printable("a\x00b"));
    }
}
