/**
 * The socks subcommand: starts a local SOCKS5 server and relays traffic
 * through the TURN server. With --protocol tcp each CONNECT becomes an RFC
 * 6062 Connect/ConnectionBind pair; with --protocol udp the tunnel uses
 * ChannelBind and ChannelData framing.
 */
use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::{validate_credentials, validate_turn_server};
use crate::errors::{Error, Result};
use crate::net::Protocol;
use crate::socks::{ProxyHandler, SocksProxy, SocksTurnTcpHandler, SocksTurnUdpHandler};
use crate::Context;

pub struct SocksOpts {
    pub turn_server: String,
    pub protocol: Protocol,
    pub use_tls: bool,
    pub timeout: Duration,
    pub username: String,
    pub password: String,
    pub listen: String,
    pub drop_public: bool,
}

impl SocksOpts {
    pub fn validate(&self) -> Result<()> {
        validate_turn_server(&self.turn_server)?;
        validate_credentials(&self.username, &self.password)?;
        if self.listen.is_empty() {
            return Err(Error::Config(
                "please supply a valid listen address".to_string(),
            ));
        }
        if !self.listen.contains(':') {
            return Err(Error::Config(
                "listen must be in the format host:port".to_string(),
            ));
        }
        Ok(())
    }
}

pub async fn run(ctx: &Context, opts: SocksOpts, cancel: &CancellationToken) -> Result<()> {
    opts.validate()?;

    let proxy = SocksProxy {
        listen: opts.listen.clone(),
        timeout: opts.timeout,
        logger: ctx.logger.clone(),
        factory: handler_factory(ctx, &opts),
    };
    proxy.run(cancel.clone()).await
}

/**
 * Builds the per-client handler factory for the selected bridge.
 */
fn handler_factory(
    ctx: &Context,
    opts: &SocksOpts,
) -> Arc<dyn Fn() -> Arc<dyn ProxyHandler> + Send + Sync> {
    let logger = ctx.logger.clone();
    let refresh_interval = Duration::from_secs(ctx.config.refresh_interval);
    let turn_server = opts.turn_server.clone();
    let username = opts.username.clone();
    let password = opts.password.clone();
    let protocol = opts.protocol;
    let use_tls = opts.use_tls;
    let timeout = opts.timeout;
    let drop_public = opts.drop_public;

    match protocol {
        Protocol::Tcp => Arc::new(move || {
            Arc::new(SocksTurnTcpHandler::new(
                logger.clone(),
                turn_server.clone(),
                username.clone(),
                password.clone(),
                use_tls,
                timeout,
                refresh_interval,
                drop_public,
            )) as Arc<dyn ProxyHandler>
        }),
        Protocol::Udp => Arc::new(move || {
            Arc::new(SocksTurnUdpHandler::new(
                logger.clone(),
                turn_server.clone(),
                username.clone(),
                password.clone(),
                protocol,
                use_tls,
                timeout,
                drop_public,
            )) as Arc<dyn ProxyHandler>
        }),
    }
}
