// https://datatracker.ietf.org/doc/html/rfc5389 (STUN)
// https://datatracker.ietf.org/doc/html/rfc5766 (TURN)
// https://datatracker.ietf.org/doc/html/rfc6062 (TURN for TCP)
// https://datatracker.ietf.org/doc/html/rfc6156 (TURN IPv6 extension)

/**
 * The main entry point: parses the command line, builds the shared context
 * and dispatches to the subcommands. Ctrl-C cancels the root token so all
 * in-flight I/O winds down promptly.
 */
use std::net::IpAddr;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use slog::{crit, Level};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use turnpike::commands::{
    brute_force, brute_transports, info, memory_leak, range_scan, socks, tcp_scanner, udp_scanner,
};
use turnpike::errors::{Error, Result};
use turnpike::net::Protocol;
use turnpike::{config, logging, Context};

#[derive(Parser)]
#[command(name = "turnpike", version, about = "test turn servers for misconfigurations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Connection flags shared by every subcommand.
#[derive(Args, Clone)]
struct ConnectionArgs {
    /// turn server to connect to in the format host:port
    #[arg(short = 's', long)]
    turnserver: String,

    /// use TLS/DTLS for connecting (false in most tests)
    #[arg(long)]
    tls: bool,

    /// protocol to use when connecting to the TURN server
    #[arg(long, value_enum, default_value_t = Protocol::Udp)]
    protocol: Protocol,

    /// connect timeout in seconds, overrides the configured default
    #[arg(long)]
    timeout: Option<u64>,

    /// enable debug output
    #[arg(short, long)]
    debug: bool,
}

/// Long-term credentials for the relay.
#[derive(Args, Clone)]
struct CredentialArgs {
    /// username for the turn server
    #[arg(short, long)]
    username: String,

    /// password for the turn server
    #[arg(short, long)]
    password: String,
}

#[derive(Subcommand)]
enum Command {
    /// Prints out some info about the server
    Info {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
    /// Bruteforces all available transports on the STUN protocol
    BruteTransports {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
    },
    /// Tries a password list against the server
    BruteForce {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// username for the turn server
        #[arg(short, long)]
        username: String,
        /// file with one password per line
        #[arg(long)]
        passfile: String,
    },
    /// Scans if the TURN server allows connections to restricted network ranges
    RangeScan {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
    },
    /// Scans internal IPv4 ranges for HTTP servers on the given ports
    TcpScanner {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
        /// ports to check
        #[arg(long, default_value = "80,443,8080,8081")]
        ports: String,
        /// scan single IPs or CIDR ranges instead of the whole private range
        #[arg(long = "ip")]
        ips: Vec<String>,
    },
    /// Scans internal IPv4 ranges for SNMP and DNS
    UdpScanner {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
        /// SNMP community string to use for scanning
        #[arg(long = "community-string", default_value = "public")]
        community: String,
        /// domain name to resolve on internal DNS servers during scanning
        #[arg(long)]
        domain: String,
        /// scan single IPs or CIDR ranges instead of the whole private range
        #[arg(long = "ip")]
        ips: Vec<String>,
    },
    /// Exploits a memory information leak in some cisco software
    Memoryleak {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
        /// target to leak memory to in the form host:port, a public server
        /// under your control
        #[arg(short, long)]
        target: String,
        /// size of the buffer to leak
        #[arg(long, default_value_t = 35510)]
        size: u16,
    },
    /// Starts a socks5 server and relays traffic via the TURN server
    Socks {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[command(flatten)]
        creds: CredentialArgs,
        /// address and port to listen on
        #[arg(short, long)]
        listen: Option<String>,
        /// drop requests to public IPs, handy if the target cannot connect
        /// to the internet and your browser wants to check TLS certificates
        #[arg(short = 'x', long, default_value_t = true, action = ArgAction::Set)]
        drop_public: bool,
    },
}

impl Command {
    fn connection_args(&self) -> &ConnectionArgs {
        match self {
            Command::Info { conn }
            | Command::BruteTransports { conn, .. }
            | Command::BruteForce { conn, .. }
            | Command::RangeScan { conn, .. }
            | Command::TcpScanner { conn, .. }
            | Command::UdpScanner { conn, .. }
            | Command::Memoryleak { conn, .. }
            | Command::Socks { conn, .. } => conn,
        }
    }
}

/// Splits and parses the memoryleak target argument.
fn parse_target(target: &str) -> Result<(IpAddr, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| Error::Config("please supply a valid target".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = host
        .parse()
        .map_err(|e| Error::Config(format!("target is no valid ip address: {}", e)))?;
    let port: u16 = port
        .parse()
        .map_err(|e| Error::Config(format!("error on parsing port: {}", e)))?;
    Ok((ip, port))
}

async fn dispatch(ctx: &Context, command: Command, cancel: &CancellationToken) -> Result<()> {
    let conn = command.connection_args().clone();
    let timeout = Duration::from_secs(conn.timeout.unwrap_or(ctx.config.timeout));

    match command {
        Command::Info { .. } => {
            info::run(
                ctx,
                info::InfoOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                },
                cancel,
            )
            .await
        }
        Command::BruteTransports { creds, .. } => {
            brute_transports::run(
                ctx,
                brute_transports::BruteTransportsOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                },
                cancel,
            )
            .await
        }
        Command::BruteForce {
            username, passfile, ..
        } => {
            brute_force::run(
                ctx,
                brute_force::BruteForceOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username,
                    passfile,
                },
                cancel,
            )
            .await
        }
        Command::RangeScan { creds, .. } => {
            range_scan::run(
                ctx,
                range_scan::RangeScanOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                },
                cancel,
            )
            .await
        }
        Command::TcpScanner {
            creds, ports, ips, ..
        } => {
            tcp_scanner::run(
                ctx,
                tcp_scanner::TcpScannerOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                    ports,
                    ips,
                },
                cancel,
            )
            .await
        }
        Command::UdpScanner {
            creds,
            community,
            domain,
            ips,
            ..
        } => {
            udp_scanner::run(
                ctx,
                udp_scanner::UdpScannerOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                    community,
                    domain,
                    ips,
                },
                cancel,
            )
            .await
        }
        Command::Memoryleak {
            creds, target, size, ..
        } => {
            let (target_host, target_port) = parse_target(&target)?;
            memory_leak::run(
                ctx,
                memory_leak::MemoryLeakOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                    target_host,
                    target_port,
                    size,
                },
                cancel,
            )
            .await
        }
        Command::Socks {
            creds,
            listen,
            drop_public,
            ..
        } => {
            socks::run(
                ctx,
                socks::SocksOpts {
                    turn_server: conn.turnserver,
                    protocol: conn.protocol,
                    use_tls: conn.tls,
                    timeout,
                    username: creds.username,
                    password: creds.password,
                    listen: listen.unwrap_or_else(|| ctx.config.socks_listen.clone()),
                    drop_public,
                },
                cancel,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match config::Settings::new() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.command.connection_args().debug {
        Level::Debug
    } else {
        cfg.log_level
    };
    let logger = logging::init_logger(level);
    let context = Context {
        config: cfg,
        logger: logger.clone(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    match dispatch(&context, cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            crit!(logger, "{}", e);
            ExitCode::FAILURE
        }
    }
}
