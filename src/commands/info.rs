/**
 * The info subcommand: checks STUN support with a Binding request and TURN
 * support with unauthenticated Allocates for both transports, then prints
 * the gathered attributes.
 */
use slog::{debug, error, info, warn};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::validate_turn_server;
use crate::errors::{Error, Result};
use crate::net::{Connection, Protocol};
use crate::stun::attributes::parse_mapped_address;
use crate::stun::requests::{allocate_request, binding_request, AddressFamily, RequestedTransport};
use crate::stun::{attribute_name, attribute_type, Attribute, Class};
use crate::turn::send_and_receive;
use crate::utils;
use crate::Context;

pub struct InfoOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
}

impl InfoOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)
    }
}

pub async fn run(ctx: &Context, opts: InfoOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    match test_stun(ctx, &opts, cancel).await {
        Ok(attributes) => {
            info!(ctx.logger, "this server supports the STUN protocol");
            print_attributes(ctx, &attributes);
        }
        Err(e) => {
            debug!(ctx.logger, "STUN error: {}", e);
            error!(ctx.logger, "this server does not support the STUN protocol");
        }
    }

    match test_turn(ctx, &opts, RequestedTransport::UDP, cancel).await {
        Ok(attributes) => {
            info!(
                ctx.logger,
                "this server supports the TURN protocol with UDP transports"
            );
            print_attributes(ctx, &attributes);
        }
        Err(e) => {
            debug!(ctx.logger, "TURN UDP error: {}", e);
            error!(
                ctx.logger,
                "this server does not support the TURN UDP protocol"
            );
        }
    }

    match test_turn(ctx, &opts, RequestedTransport::TCP, cancel).await {
        Ok(attributes) => {
            info!(
                ctx.logger,
                "this server supports the TURN protocol with TCP transports"
            );
            print_attributes(ctx, &attributes);
        }
        Err(e) => {
            debug!(ctx.logger, "TURN TCP error: {}", e);
            error!(
                ctx.logger,
                "this server does not support the TURN TCP protocol"
            );
        }
    }

    Ok(())
}

async fn test_stun(
    ctx: &Context,
    opts: &InfoOpts,
    cancel: &CancellationToken,
) -> Result<Vec<Attribute>> {
    let mut conn =
        Connection::connect(opts.protocol, &opts.turn_server, opts.use_tls, opts.timeout).await?;

    let request = binding_request();
    let response = send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;
    conn.close().await;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }
    Ok(response.attributes)
}

async fn test_turn(
    ctx: &Context,
    opts: &InfoOpts,
    transport: RequestedTransport,
    cancel: &CancellationToken,
) -> Result<Vec<Attribute>> {
    let mut conn =
        Connection::connect(opts.protocol, &opts.turn_server, opts.use_tls, opts.timeout).await?;

    let request = allocate_request(transport, AddressFamily::None);
    let response = send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;
    conn.close().await;
    // an unauthenticated Allocate must be answered with a challenge
    if response.header.message_type.class != Class::Error {
        return Err(Error::UnexpectedClass {
            expected: Class::Error,
            actual: response.header.message_type.class,
        });
    }
    Ok(response.attributes)
}

fn print_attributes(ctx: &Context, attributes: &[Attribute]) {
    if attributes.is_empty() {
        return;
    }

    let mut header_printed = false;
    for a in attributes {
        // do not print common protocol related attributes
        if matches!(
            a.attr_type,
            attribute_type::NONCE
                | attribute_type::ERROR_CODE
                | attribute_type::FINGERPRINT
                | attribute_type::XOR_MAPPED_ADDRESS
                | attribute_type::MAPPED_ADDRESS
        ) {
            continue;
        }

        if !header_printed {
            info!(ctx.logger, "Attributes:");
            header_printed = true;
        }

        let mut value = String::from_utf8_lossy(&a.value).into_owned();
        // checks for old RFC5780 attributes still implemented for example
        // in coturn
        if matches!(
            a.attr_type,
            attribute_type::RESPONSE_ORIGIN | attribute_type::OTHER_ADDRESS
        ) {
            match parse_mapped_address(&a.value) {
                Ok((ip, port)) => value = format!("{}:{}", ip, port),
                Err(e) => {
                    error!(
                        ctx.logger,
                        "could not parse mapped address: {} {}",
                        hex::encode(&a.value),
                        e
                    );
                    continue;
                }
            }
        }

        match attribute_name(a.attr_type) {
            Some(name) => info!(ctx.logger, "\t{}: {}", name, value),
            None => {
                if utils::is_printable(&value) {
                    warn!(
                        ctx.logger,
                        "\tNon Standard Attribute {} returned with value {}", a.attr_type, value
                    );
                } else {
                    warn!(
                        ctx.logger,
                        "\tNon Standard Attribute {} returned with value {}",
                        a.attr_type,
                        hex::encode(&a.value)
                    );
                }
            }
        }
    }
}
