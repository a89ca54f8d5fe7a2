/**
 * TURN ChannelData framing, https://tools.ietf.org/html/rfc5766#section-11.4
 *
 * ```text
 *     0                   1                   2                   3
 *     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |         Channel Number        |            Length             |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *    |                       Application Data                        |
 *    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 * ```
 */
use rand::Rng;

use crate::errors::{Error, Result};
use crate::stun::pad;

/**
 * Generates a random valid channel number. 0x4000 through 0x7FFF are the
 * allowed channel numbers (16,383 possible values).
 */
pub fn random_channel_number() -> [u8; 2] {
    rand::thread_rng()
        .gen_range(0x4000u16..=0x7fff)
        .to_be_bytes()
}

/**
 * Frames a payload into a ChannelData message. The payload is zero padded
 * to a 4-byte boundary and the length field declares the padded size, which
 * is what the tested relays expect on stream transports.
 */
pub fn encode_channel_data(channel: [u8; 2], payload: &[u8]) -> Vec<u8> {
    let padded = pad(payload.to_vec());
    let mut buf = Vec::with_capacity(4 + padded.len());
    buf.extend_from_slice(&channel);
    buf.extend_from_slice(&(padded.len() as u16).to_be_bytes());
    buf.extend_from_slice(&padded);
    buf
}

/**
 * Extracts the channel number and application data from a ChannelData
 * message, verifying the declared length against the carried data.
 */
pub fn extract_channel_data(buf: &[u8]) -> Result<([u8; 2], &[u8])> {
    if buf.len() < 4 {
        return Err(Error::InvalidLength(buf.len()));
    }
    let channel = [buf[0], buf[1]];
    if !(0x40..=0x7f).contains(&channel[0]) {
        return Err(Error::InvalidChannelNumber(u16::from_be_bytes(channel)));
    }
    let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let data = &buf[4..];
    if declared != data.len() {
        return Err(Error::SizeMismatch {
            expected: declared + 4,
            actual: buf.len(),
            extra: String::new(),
        });
    }
    Ok((channel, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_channel_number_range() {
        for _ in 0..1000 {
            let channel = random_channel_number();
            assert!((0x40..=0x7f).contains(&channel[0]), "channel {:02x?}", channel);
        }
    }

    #[test]
    fn test_encode_pads_payload() {
        let framed = encode_channel_data([0x40, 0x01], b"abcde");
        assert_eq!(framed.len(), 4 + 8);
        assert_eq!(&framed[0..2], &[0x40, 0x01]);
        assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 8);
        assert_eq!(&framed[4..9], b"abcde");
        assert_eq!(&framed[9..12], &[0, 0, 0]);
    }

    #[test]
    fn test_extract_round_trip() {
        let framed = encode_channel_data([0x7f, 0xff], b"data");
        let (channel, data) = extract_channel_data(&framed).expect("extract failed");
        assert_eq!(channel, [0x7f, 0xff]);
        assert_eq!(data, b"data");
    }

    #[test]
    fn test_extract_rejects_short_buffer() {
        assert!(matches!(
            extract_channel_data(&[0x40, 0x00]),
            Err(Error::InvalidLength(2))
        ));
    }

    #[test]
    fn test_extract_rejects_length_mismatch() {
        // declares 16 bytes but carries 4
        let buf = [0x40, 0x00, 0x00, 0x10, 0x61, 0x62, 0x63, 0x64];
        assert!(matches!(
            extract_channel_data(&buf),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_extract_rejects_invalid_channel() {
        let buf = [0x20, 0x00, 0x00, 0x04, 0x61, 0x62, 0x63, 0x64];
        assert!(matches!(
            extract_channel_data(&buf),
            Err(Error::InvalidChannelNumber(0x2000))
        ));
    }
}
