/**
 * The probing subcommands. Every command takes an options struct with a
 * `validate` method mirroring its input contract; scanners swallow
 * per-iteration errors and keep going, while setup failures bubble up to
 * the CLI.
 */
pub mod brute_force;
pub mod brute_transports;
pub mod info;
pub mod memory_leak;
pub mod range_scan;
pub mod socks;
pub mod tcp_scanner;
pub mod udp_scanner;

use crate::errors::{Error, Result};

/// Shared sanity check: the TURN server must be given as "host:port".
pub(crate) fn validate_turn_server(turn_server: &str) -> Result<()> {
    if turn_server.is_empty() {
        return Err(Error::Config("need a valid turnserver".to_string()));
    }
    if !turn_server.contains(':') {
        return Err(Error::Config("turnserver needs a port".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_credentials(username: &str, password: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::Config("please supply a username".to_string()));
    }
    if password.is_empty() {
        return Err(Error::Config("please supply a password".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_turn_server() {
        assert!(validate_turn_server("turn.example.org:3478").is_ok());
        assert!(validate_turn_server("").is_err());
        assert!(validate_turn_server("no-port").is_err());
    }

    #[test]
    fn test_validate_credentials() {
        assert!(validate_credentials("user", "pass").is_ok());
        assert!(validate_credentials("", "pass").is_err());
        assert!(validate_credentials("user", "").is_err());
    }
}
