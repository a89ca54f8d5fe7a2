/**
 * The SOCKS5 side of the relay. The wire protocol itself (greeting, method
 * negotiation, request parsing, replies) belongs to the `fast-socks5`
 * crate; this module only supplies the handler contract the tunnel
 * implementations fill in, and wires the per-client tasks around it.
 */
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use fast_socks5::server::Socks5ServerProtocol;
use fast_socks5::util::target_addr::TargetAddr;
use fast_socks5::{ReplyError, Socks5Command};
use slog::{debug, error, info, Logger};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::net::resolver::resolve_name;
use crate::net::{ConnReader, ConnWriter, Connection};

pub mod turn_tcp;
pub mod turn_udp;

pub use turn_tcp::SocksTurnTcpHandler;
pub use turn_udp::SocksTurnUdpHandler;

/**
 * An error carrying the SOCKS reply code sent back to the client.
 */
#[derive(Debug)]
pub struct SocksError {
    pub reply: ReplyError,
    pub message: String,
}

impl SocksError {
    pub fn new(reply: ReplyError, err: impl fmt::Display) -> Self {
        Self {
            reply,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SocksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reply, self.message)
    }
}

/**
 * The contract between the SOCKS library plumbing and a tunnel
 * implementation.
 *
 * `init` is called once per accepted client with the already parsed
 * destination and returns the stream the tunnel pumps data through.
 * `read_from_client`, `read_from_remote` and `refresh` then run as three
 * cooperating tasks sharing the handler for the connection's lifetime;
 * they synchronize only through the connection endpoints. `close` releases
 * whatever `init` kept (the data connection belongs to the caller, not the
 * handler).
 */
#[async_trait]
pub trait ProxyHandler: Send + Sync {
    async fn init(
        &self,
        target: &TargetAddr,
        cancel: &CancellationToken,
    ) -> std::result::Result<Connection, SocksError>;

    async fn refresh(&self, cancel: CancellationToken);

    async fn read_from_client(
        &self,
        client: &mut OwnedReadHalf,
        remote: &mut ConnWriter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn read_from_remote(
        &self,
        remote: &mut ConnReader,
        client: &mut OwnedWriteHalf,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn close(&self);
}

/**
 * Resolves the destination of a SOCKS request. Domain destinations are
 * tried as IP literals first and looked up via DNS otherwise; the first
 * resolved address wins.
 */
pub(crate) async fn resolve_target(
    target: &TargetAddr,
) -> std::result::Result<(IpAddr, u16), SocksError> {
    match target {
        TargetAddr::Ip(addr) => Ok((addr.ip(), addr.port())),
        TargetAddr::Domain(name, port) => {
            if let Ok(ip) = name.parse::<IpAddr>() {
                return Ok((ip, *port));
            }
            let names = resolve_name(name)
                .await
                .map_err(|e| SocksError::new(ReplyError::HostUnreachable, e))?;
            match names.first() {
                Some(ip) => Ok((*ip, *port)),
                None => Err(SocksError::new(
                    ReplyError::HostUnreachable,
                    format!("{} could not be resolved", name),
                )),
            }
        }
    }
}

/**
 * The SOCKS5 proxy. One handler instance is created per accepted client
 * through the factory.
 */
pub struct SocksProxy {
    pub listen: String,
    pub timeout: Duration,
    pub logger: Logger,
    pub factory: Arc<dyn Fn() -> Arc<dyn ProxyHandler> + Send + Sync>,
}

impl SocksProxy {
    /**
     * Binds the listen address and serves until cancelled.
     */
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.listen)
            .await
            .map_err(|e| Error::Dial(format!("{}: {}", self.listen, e)))?;
        self.run_on(listener, cancel).await
    }

    /**
     * Serves on an already bound listener. Split out so tests can bind an
     * ephemeral port themselves.
     */
    pub async fn run_on(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(self.logger, "starting SOCKS server on {}", addr);
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(self.logger, "[socks] accepted connection from {}", peer);
                            let handler = (self.factory)();
                            let logger = self.logger.clone();
                            let timeout = self.timeout;
                            let token = cancel.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(&logger, stream, handler, timeout, token).await {
                                    error!(logger, "[socks] client error: {}", e);
                                }
                            });
                        }
                        Err(e) => error!(self.logger, "[socks] accept error: {}", e),
                    }
                }
            }
        }
    }
}

/**
 * Runs the library handshake, hands the parsed CONNECT destination to the
 * handler and wires the tunnel tasks.
 */
async fn handle_client(
    logger: &Logger,
    stream: TcpStream,
    handler: Arc<dyn ProxyHandler>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    // fast-socks5 owns the wire protocol up to the parsed command
    let negotiated = timeout(handshake_timeout, async {
        Socks5ServerProtocol::accept_no_auth(stream)
            .await?
            .read_command()
            .await
    })
    .await
    .map_err(|_| Error::Timeout { partial: Vec::new() })?
    .map_err(|e| Error::Config(format!("SOCKS handshake failed: {}", e)))?;
    let (proto, cmd, target_addr) = negotiated;

    match cmd {
        Socks5Command::TCPConnect => {}
        other => {
            let _ = proto.reply_error(&ReplyError::CommandNotSupported).await;
            return Err(Error::Config(format!(
                "unsupported SOCKS command {:?}",
                other
            )));
        }
    }

    let remote = match handler.init(&target_addr, &cancel).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(logger, "[socks] init failed: {}", e);
            let _ = proto.reply_error(&e.reply).await;
            return Ok(());
        }
    };
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let stream = proto
        .reply_success(bind_addr)
        .await
        .map_err(|e| Error::Config(format!("SOCKS reply failed: {}", e)))?;

    let (mut client_read, mut client_write) = stream.into_split();
    let (mut remote_read, mut remote_write) = remote.split();
    let tunnel = cancel.child_token();

    let refresh_handler = handler.clone();
    let refresh_token = tunnel.clone();
    let refresh_task = tokio::spawn(async move {
        refresh_handler.refresh(refresh_token).await;
    });

    let up_handler = handler.clone();
    let up_token = tunnel.clone();
    let mut up_task = tokio::spawn(async move {
        up_handler
            .read_from_client(&mut client_read, &mut remote_write, &up_token)
            .await
    });

    let down_handler = handler.clone();
    let down_token = tunnel.clone();
    let mut down_task = tokio::spawn(async move {
        down_handler
            .read_from_remote(&mut remote_read, &mut client_write, &down_token)
            .await
    });

    // either direction ending tears down the whole tunnel
    let result = tokio::select! {
        r = &mut up_task => {
            tunnel.cancel();
            let _ = down_task.await;
            r
        }
        r = &mut down_task => {
            tunnel.cancel();
            let _ = up_task.await;
            r
        }
    };
    tunnel.cancel();
    let _ = refresh_task.await;
    handler.close().await;

    match result {
        Ok(Ok(())) | Ok(Err(Error::Cancelled)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(join_err) => Err(Error::Config(format!("tunnel task failed: {}", join_err))),
    }
}
