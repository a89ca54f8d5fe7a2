/**
 * turnpike probes TURN relay servers (RFC 5389, 5766, 6062, 6156) for
 * misconfigurations that allow relaying into internal networks, and turns a
 * vulnerable relay into a local SOCKS5 proxy.
 *
 * The crate is split into a library (used by the integration tests) and a
 * thin CLI binary.
 */
use slog::Logger;

pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
pub mod net;
pub mod socks;
pub mod stun;
pub mod turn;
pub mod utils;

pub use errors::{Error, Result};

/**
 * Represents the shared context for all subcommands.
 *
 * Fields:
 * - `config`: The tool configuration settings.
 * - `logger`: The root logger instance.
 */
#[derive(Debug, Clone)]
pub struct Context {
    pub config: config::Settings,
    pub logger: Logger,
}
