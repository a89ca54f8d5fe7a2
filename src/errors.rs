use crate::stun::message_type::Class;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/**
 * All error conditions surfaced by the crate.
 *
 * Scanners treat `Timeout` as a signal rather than a failure (an unanswered
 * TURN Connect means an open port, an unanswered UDP probe means an
 * unreachable host), so it must stay distinguishable from `Cancelled` and
 * from genuine I/O errors. `Timeout` carries the bytes that were already
 * read when the deadline fired.
 */
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("error on establishing a connection to the server: {0}")]
    Dial(String),

    #[error("error on establishing a TLS connection to the server: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("error on establishing a DTLS connection to the server: {0}")]
    Dtls(String),

    #[error("timeout occurred. you can try to increase the timeout if the server responds too slowly")]
    Timeout { partial: Vec<u8> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid packet length {0}")]
    InvalidLength(usize),

    #[error("message size ({expected}) mismatch to received data ({actual}). extra data: {extra}")]
    SizeMismatch {
        expected: usize,
        actual: usize,
        extra: String,
    },

    #[error("invalid address family {0:#04x}")]
    InvalidAddressFamily(u8),

    #[error("invalid channel number {0:#06x}")]
    InvalidChannelNumber(u16),

    #[error("missing transaction ID")]
    MissingTransactionId,

    #[error("unexpected message class {actual}, expected {expected}")]
    UnexpectedClass { expected: Class, actual: Class },

    #[error("server error {code}: {text}")]
    Server { code: u16, text: String },

    #[error("message integrity computation failed")]
    Integrity,

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for deadline expiry, regardless of partial data.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
