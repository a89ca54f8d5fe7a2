/**
 * The brute-transports subcommand: sweeps all 256 low-byte transport
 * numbers through authenticated Allocates. Transports are the protocols
 * the relay speaks towards internal systems; anything beyond TCP and UDP
 * is a finding.
 */
use slog::{error, info};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::{Connection, Protocol};
use crate::stun::requests::{
    allocate_request, allocate_request_auth, AddressFamily, RequestedTransport,
};
use crate::stun::{attribute_type, Class};
use crate::turn::send_and_receive;
use crate::Context;

pub struct BruteTransportsOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
}

impl BruteTransportsOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)
    }
}

pub async fn run(ctx: &Context, opts: BruteTransportsOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    for i in 0..=255u32 {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut conn =
            Connection::connect(opts.protocol, &opts.turn_server, opts.use_tls, opts.timeout)
                .await?;

        let transport = RequestedTransport(i);
        let request = allocate_request(transport, AddressFamily::None);
        let response =
            send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;

        let realm = response.attribute_string(attribute_type::REALM);
        let nonce = response.attribute_string(attribute_type::NONCE);

        let request = allocate_request_auth(
            &opts.username,
            &opts.password,
            &nonce,
            &realm,
            transport,
            AddressFamily::None,
        );
        let response =
            send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;

        if response.header.message_type.class == Class::Success {
            match transport {
                RequestedTransport::TCP => info!(
                    ctx.logger,
                    "Found supported protocol {} which is TCP and a default protocol", i
                ),
                RequestedTransport::UDP => info!(
                    ctx.logger,
                    "Found supported protocol {} which is UDP and a default protocol", i
                ),
                _ => info!(ctx.logger, "Found non standard protocol {}", i),
            }
        } else {
            error!(ctx.logger, "{} {}", i, response.error_string());
        }
        conn.close().await;
    }
    Ok(())
}
