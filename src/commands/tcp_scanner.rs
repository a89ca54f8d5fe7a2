/**
 * The tcp-scanner subcommand: walks IP×port combinations through the RFC
 * 6062 relay and issues an HTTP/1.0 GET on each data connection. Ports
 * that conventionally speak TLS get the request wrapped in a handshake
 * with verification disabled.
 */
use std::net::IpAddr;

use slog::{debug, error, info};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::ranges::{ip_iterator, PRIVATE_RANGES};
use crate::net::Protocol;
use crate::turn::setup_tcp_allocation;
use crate::Context;

const HTTP_REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// Ports where the data connection is wrapped in TLS before speaking HTTP.
const TLS_PORTS: &[u16] = &[443, 8443, 7443, 8843];

pub struct TcpScannerOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
    pub ports: String,
    pub ips: Vec<String>,
}

impl TcpScannerOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)?;
        if self.ports.trim().is_empty() {
            return Err(Error::Config("please supply valid ports".to_string()));
        }
        // no need to check IPs, the default ranges kick in when empty
        Ok(())
    }
}

pub async fn run(ctx: &Context, opts: TcpScannerOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    let mut ports = Vec::new();
    for port in opts.ports.split(',') {
        let port = port.trim();
        ports.push(
            port.parse::<u16>()
                .map_err(|e| Error::Config(format!("Invalid port {}: {}", port, e)))?,
        );
    }

    let ip_input = if opts.ips.is_empty() {
        PRIVATE_RANGES.iter().map(|s| s.to_string()).collect()
    } else {
        opts.ips.clone()
    };

    for entry in ip_iterator(&ip_input) {
        let ip = match entry {
            Ok(ip) => ip,
            Err(e) => {
                error!(ctx.logger, "{}", e);
                continue;
            }
        };
        for port in &ports {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(ctx.logger, "Scanning {}:{}", ip, port);
            if let Err(e) = http_scan(ctx, &opts, ip, *port, cancel).await {
                error!(
                    ctx.logger,
                    "error on running HTTP Scan for {}:{}: {}", ip, port, e
                );
            }
        }
    }

    Ok(())
}

async fn http_scan(
    ctx: &Context,
    opts: &TcpScannerOpts,
    ip: IpAddr,
    port: u16,
    cancel: &CancellationToken,
) -> Result<()> {
    let allocation = setup_tcp_allocation(
        &ctx.logger,
        &opts.turn_server,
        opts.use_tls,
        opts.timeout,
        ip,
        port,
        &opts.username,
        &opts.password,
        cancel,
    )
    .await?;
    let mut control = allocation.control;
    let mut data = allocation.data;

    if TLS_PORTS.contains(&port) {
        // wrap the relayed stream; certificate checks stay off, the point
        // is reading banners off internal services
        data = data.upgrade_tls(&ip.to_string(), opts.timeout).await?;
    }

    data.write_data(HTTP_REQUEST, opts.timeout, cancel).await?;
    let response = match data.read_all(opts.timeout, cancel).await {
        Ok(response) => response,
        Err(Error::Timeout { partial }) if !partial.is_empty() => partial,
        Err(e) => {
            control.close().await;
            return Err(e);
        }
    };
    info!(ctx.logger, "{}", String::from_utf8_lossy(&response));
    info!(ctx.logger, "{}", hex::encode(&response));

    data.close().await;
    control.close().await;
    Ok(())
}
