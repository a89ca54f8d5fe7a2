/**
 * The udp-scanner subcommand: probes internal ranges for SNMP and DNS
 * through relayed UDP. Both payloads are assembled by hand; unanswered
 * probes (timeouts) just mean the host is unreachable and are skipped
 * silently.
 */
use std::net::IpAddr;

use rand::Rng;
use slog::{debug, error, info};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::ranges::{ip_iterator, PRIVATE_RANGES};
use crate::net::Protocol;
use crate::stun::channel::{extract_channel_data, random_channel_number};
use crate::stun::requests::channel_bind_request;
use crate::stun::Class;
use crate::turn::{send_and_receive, setup_udp_allocation};
use crate::Context;

pub struct UdpScannerOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
    pub community: String,
    pub domain: String,
    pub ips: Vec<String>,
}

impl UdpScannerOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)?;
        if self.community.is_empty() {
            return Err(Error::Config(
                "please supply a valid community string".to_string(),
            ));
        }
        if self.domain.is_empty() {
            return Err(Error::Config(
                "please supply a valid domain name".to_string(),
            ));
        }
        // no need to check IPs, the default ranges kick in when empty
        Ok(())
    }
}

pub async fn run(ctx: &Context, opts: UdpScannerOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

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
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        debug!(ctx.logger, "Scanning {}", ip);
        if let Err(e) = probe(ctx, &opts, ip, 161, snmp_payload(&opts.community), cancel).await {
            error!(
                ctx.logger,
                "error on running SNMP Scan for ip {}: {}", ip, e
            );
        }
        if let Err(e) = probe(ctx, &opts, ip, 53, dns_payload(&opts.domain), cancel).await {
            error!(ctx.logger, "error on running DNS Scan for ip {}: {}", ip, e);
        }
    }

    Ok(())
}

/**
 * Sets up a relayed channel to (ip, port), sends the payload as
 * ChannelData and logs whatever comes back.
 */
async fn probe(
    ctx: &Context,
    opts: &UdpScannerOpts,
    ip: IpAddr,
    port: u16,
    payload: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<()> {
    let setup = setup_udp_allocation(
        &ctx.logger,
        opts.protocol,
        &opts.turn_server,
        opts.use_tls,
        opts.timeout,
        ip,
        port,
        &opts.username,
        &opts.password,
        cancel,
    )
    .await;
    let (mut remote, realm, nonce) = match setup {
        Ok(setup) => setup,
        // ignore timeouts, the host is unreachable
        Err(e) if e.is_timeout() => return Ok(()),
        Err(e) => return Err(e),
    };

    let channel = random_channel_number();
    let request = channel_bind_request(
        &opts.username,
        &opts.password,
        &nonce,
        &realm,
        ip,
        port,
        channel,
    );
    let response = send_and_receive(&ctx.logger, &mut remote, &request, opts.timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    // frame the probe; the declared length is the raw payload size
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&channel);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(&payload);
    remote.write_data(&framed, opts.timeout, cancel).await?;

    let response = match remote.read_all(opts.timeout, cancel).await {
        Ok(response) => response,
        // ignore timeouts, nothing answered
        Err(e) if e.is_timeout() => {
            remote.close().await;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    remote.close().await;

    let (channel, data) = extract_channel_data(&response)?;
    info!(
        ctx.logger,
        "received {} bytes on channel {} for ip {}",
        data.len(),
        hex::encode(channel),
        ip
    );
    info!(
        ctx.logger,
        "UDP Response: {}",
        String::from_utf8_lossy(&response)
    );

    Ok(())
}

/// An SNMPv2c get-next of 1.3.6.1.2.1 with the given community string.
fn snmp_payload(community: &str) -> Vec<u8> {
    let mut inner = Vec::new();
    // INTEGER version, 1 == v2c
    inner.extend_from_slice(&[0x02, 0x01, 0x01]);
    // OCTET STRING community
    inner.push(0x04);
    inner.push(community.len() as u8);
    inner.extend_from_slice(community.as_bytes());
    // get-next 1.3.6.1.2.1
    inner.extend_from_slice(&[0xa1, 0x19, 0x02, 0x04]);
    // request ID
    inner.extend_from_slice(&rand::thread_rng().gen::<u32>().to_be_bytes());
    // error status, error index and the OID binding
    inner.extend_from_slice(&[
        0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0b, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x06, 0x01,
        0x02, 0x01, 0x05, 0x00,
    ]);

    let mut snmp = Vec::with_capacity(2 + inner.len());
    // SEQUENCE with the overall length
    snmp.push(0x30);
    snmp.push(inner.len() as u8);
    snmp.extend_from_slice(&inner);
    snmp
}

/// A DNS A query for the given name.
fn dns_payload(domain: &str) -> Vec<u8> {
    let mut dns = Vec::new();
    // transaction ID
    dns.extend_from_slice(&rand::thread_rng().gen::<u16>().to_be_bytes());
    // flags: standard query
    dns.extend_from_slice(&[0x01, 0x00]);
    // questions: 1, answer/authority/additional RRs: 0
    dns.extend_from_slice(&1u16.to_be_bytes());
    dns.extend_from_slice(&0u16.to_be_bytes());
    dns.extend_from_slice(&0u16.to_be_bytes());
    dns.extend_from_slice(&0u16.to_be_bytes());

    // QNAME as length-prefixed labels, null terminated
    for label in domain.split('.') {
        dns.push(label.len() as u8);
        dns.extend_from_slice(label.as_bytes());
    }
    dns.push(0x00);
    // QTYPE A, QCLASS IN
    dns.extend_from_slice(&1u16.to_be_bytes());
    dns.extend_from_slice(&1u16.to_be_bytes());
    dns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snmp_payload_shape() {
        let payload = snmp_payload("public");
        assert_eq!(payload[0], 0x30);
        assert_eq!(payload[1] as usize, payload.len() - 2);
        // version v2c
        assert_eq!(&payload[2..5], &[0x02, 0x01, 0x01]);
        // community string
        assert_eq!(payload[5], 0x04);
        assert_eq!(payload[6], 6);
        assert_eq!(&payload[7..13], b"public");
    }

    #[test]
    fn test_dns_payload_shape() {
        let payload = dns_payload("internal.example");
        // one question, no answers
        assert_eq!(&payload[4..6], &[0x00, 0x01]);
        assert_eq!(&payload[6..8], &[0x00, 0x00]);
        // first label
        assert_eq!(payload[12], 8);
        assert_eq!(&payload[13..21], b"internal");
        assert_eq!(payload[21], 7);
        // trailing QTYPE/QCLASS
        let n = payload.len();
        assert_eq!(&payload[n - 4..], &[0x00, 0x01, 0x00, 0x01]);
    }
}
