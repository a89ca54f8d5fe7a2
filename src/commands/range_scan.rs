/**
 * The range-scan subcommand: asks the relay for connections into
 * special-use address ranges. A relay that accepts any of these does not
 * filter restricted ranges correctly.
 */
use std::net::IpAddr;

use slog::{error, warn};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::{Connection, Protocol};
use crate::stun::requests::{
    allocate_request, allocate_request_auth, connect_request_auth, AddressFamily,
    RequestedTransport,
};
use crate::stun::{attribute_type, Class};
use crate::turn::{send_and_receive, setup_udp_allocation};
use crate::Context;

/// Special-use addresses probed in both passes.
const RANGES: &[&str] = &[
    // all
    "0.0.0.0",
    "::",
    // localhosts
    "127.0.0.1",
    "127.0.0.8",
    "127.255.255.254",
    "::1",
    // private ranges
    "10.0.0.1",
    "10.255.255.254",
    "172.16.0.1",
    "172.31.255.254",
    "192.168.0.1",
    "192.168.255.254",
    // Link Local
    "169.254.0.1",
    "169.254.254.255",
    // Multicast
    "224.0.0.1",
    "239.255.255.254",
    // Shared Address Space
    "100.64.0.0",
    "100.127.255.254",
    // ietf
    "192.0.0.1",
    "192.0.0.254",
    // TEST-NET-1
    "192.0.2.1",
    "192.0.2.254",
    // Benchmark
    "198.18.0.1",
    "198.19.255.254",
    // TEST-NET-2
    "198.51.100.1",
    "198.51.100.254",
    // TEST-NET-3
    "203.0.113.1",
    "203.0.113.254",
    // Reserved
    "240.0.0.1",
    // Broadcast
    "255.255.255.255",
    // Cloud Metadata Services
    "169.254.169.254",
];

pub struct RangeScanOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
}

impl RangeScanOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)
    }
}

pub async fn run(ctx: &Context, opts: RangeScanOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    // UDP scanning
    for entry in RANGES {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let ip: IpAddr = entry
            .parse()
            .map_err(|e| Error::Config(format!("target is no valid ip address: {}", e)))?;
        match scan_udp(ctx, &opts, ip, 80, cancel).await {
            Ok(()) => warn!(ctx.logger, "UDP {} was successful!", ip),
            Err(e) => error!(ctx.logger, "UDP {}: {}", ip, e),
        }
    }

    // TCP scanning
    for entry in RANGES {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let ip: IpAddr = entry
            .parse()
            .map_err(|e| Error::Config(format!("target is no valid ip address: {}", e)))?;
        match scan_tcp(ctx, &opts, ip, 80, cancel).await {
            Ok(()) => warn!(ctx.logger, "TCP {} was successful!", ip),
            Err(e) => error!(ctx.logger, "TCP {}: {}", ip, e),
        }
    }
    Ok(())
}

/// A permission grant for the target counts as success.
async fn scan_udp(
    ctx: &Context,
    opts: &RangeScanOpts,
    target: IpAddr,
    port: u16,
    cancel: &CancellationToken,
) -> Result<()> {
    let (mut remote, _, _) = setup_udp_allocation(
        &ctx.logger,
        opts.protocol,
        &opts.turn_server,
        opts.use_tls,
        opts.timeout,
        target,
        port,
        &opts.username,
        &opts.password,
        cancel,
    )
    .await?;
    remote.close().await;
    Ok(())
}

/**
 * Runs the RFC 6062 Connect half of the TCP setup. A Connect timeout means
 * the relay is still waiting on an open handshake to the target, so it is
 * treated as success.
 */
async fn scan_tcp(
    ctx: &Context,
    opts: &RangeScanOpts,
    target: IpAddr,
    port: u16,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut conn =
        Connection::connect(opts.protocol, &opts.turn_server, opts.use_tls, opts.timeout).await?;

    let family = AddressFamily::for_target(target);
    let request = allocate_request(RequestedTransport::TCP, family);
    let response = send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;
    if response.header.message_type.class != Class::Error {
        return Err(Error::UnexpectedClass {
            expected: Class::Error,
            actual: response.header.message_type.class,
        });
    }

    let realm = response.attribute_string(attribute_type::REALM);
    let nonce = response.attribute_string(attribute_type::NONCE);

    let request = allocate_request_auth(
        &opts.username,
        &opts.password,
        &nonce,
        &realm,
        RequestedTransport::TCP,
        family,
    );
    let response = send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    let request = connect_request_auth(&opts.username, &opts.password, &nonce, &realm, target, port);
    match send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await {
        Ok(response) if response.header.message_type.class == Class::Error => {
            Err(response.server_error())
        }
        Ok(_) => Ok(()),
        // a timeout means open port
        Err(e) if e.is_timeout() => Ok(()),
        Err(e) => Err(e),
    }
}
