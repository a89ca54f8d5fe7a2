/**
 * Network related functionality
 *
 * The four dial modes (TCP, TLS over TCP, connected UDP, DTLS over UDP)
 * converge on a single `Connection` with deadline-based reads and writes.
 * Certificate verification is disabled for both TLS and DTLS: the tool
 * targets misconfigured servers and self-signed certificates are expected.
 */
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::{fmt, io};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout_at, Duration, Instant};
use tokio_native_tls::TlsStream;
use tokio_util::sync::CancellationToken;
use webrtc_dtls::config::Config as DtlsConfig;
use webrtc_dtls::conn::DTLSConn;
use webrtc_util::conn::Conn;

use crate::errors::{Error, Result};

pub mod ranges;
pub mod resolver;

/// Read size used by `read_all`; a read shorter than this ends the loop.
const READ_CHUNK: usize = 1024;

/// Receive buffer large enough for a full datagram, so the two-phase header
/// read never truncates a UDP/DTLS response.
const DATAGRAM_BUFFER: usize = 65536;

/**
 * The transport used towards the TURN server.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

enum ReadStream {
    Tcp(OwnedReadHalf),
    Tls(ReadHalf<TlsStream<TcpStream>>),
    Udp(Arc<UdpSocket>),
    Dtls(Arc<DTLSConn>),
}

enum WriteStream {
    Tcp(OwnedWriteHalf),
    Tls(WriteHalf<TlsStream<TcpStream>>),
    Udp(Arc<UdpSocket>),
    Dtls(Arc<DTLSConn>),
}

/**
 * Runs an I/O future against a deadline and a cancellation token.
 * Cancellation wins over the deadline so a torn down probe reports
 * `Cancelled` rather than `Timeout`.
 */
async fn guarded<T, F>(deadline: Instant, cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = timeout_at(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout { partial: Vec::new() }),
        },
    }
}

/**
 * The read half of a connection. Keeps a buffer of already received bytes
 * so that on datagram transports the remainder of a datagram survives the
 * two-phase header read.
 */
pub struct ConnReader {
    stream: ReadStream,
    pending: Vec<u8>,
}

impl ConnReader {
    async fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.stream {
            ReadStream::Tcp(r) => Ok(r.read(buf).await?),
            ReadStream::Tls(r) => Ok(r.read(buf).await?),
            ReadStream::Udp(s) => Ok(s.recv(buf).await?),
            ReadStream::Dtls(c) => c.recv(buf).await.map_err(|e| Error::Dtls(e.to_string())),
        }
    }

    /**
     * Reads exactly `n` bytes. On stream transports this reads as often as
     * needed; on datagram transports whole datagrams are buffered and the
     * requested prefix is handed out, leaving the rest for later reads.
     */
    pub async fn read_exact(
        &mut self,
        n: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < n {
            let mut chunk = vec![0u8; DATAGRAM_BUFFER];
            let read = guarded(deadline, cancel, self.raw_read(&mut chunk)).await?;
            if read == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading",
                )));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
        let rest = self.pending.split_off(n);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    /**
     * Buffers until EOF, a short read, or the deadline. A timeout returns
     * the bytes already read inside the error so callers can treat it as a
     * signal rather than a failure.
     */
    pub async fn read_all(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = std::mem::take(&mut self.pending);
        loop {
            let mut chunk = vec![0u8; READ_CHUNK];
            match guarded(deadline, cancel, self.raw_read(&mut chunk)).await {
                Ok(0) => return Ok(out),
                Ok(read) => {
                    out.extend_from_slice(&chunk[..read]);
                    if read < READ_CHUNK {
                        return Ok(out);
                    }
                }
                Err(Error::Timeout { .. }) => return Err(Error::Timeout { partial: out }),
                Err(e) => return Err(e),
            }
        }
    }

    /**
     * Performs a single read of up to `buf.len()` bytes with a deadline.
     * Returns 0 on EOF. Used by the SOCKS data pumps.
     */
    pub async fn read_chunk(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            let rest = self.pending.split_off(n);
            buf[..n].copy_from_slice(&self.pending);
            self.pending = rest;
            return Ok(n);
        }
        let deadline = Instant::now() + timeout;
        guarded(deadline, cancel, self.raw_read(buf)).await
    }

    fn keepalive(&self) -> bool {
        match &self.stream {
            ReadStream::Tcp(r) => {
                let stream: &TcpStream = r.as_ref();
                socket2::SockRef::from(stream).set_keepalive(true).is_ok()
            }
            _ => false,
        }
    }
}

/**
 * The write half of a connection.
 */
pub struct ConnWriter {
    stream: WriteStream,
}

impl ConnWriter {
    /**
     * Writes the whole buffer under a deadline, retrying short writes. On
     * datagram transports the buffer is sent as a single datagram.
     */
    pub async fn write_data(
        &mut self,
        data: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let stream = &mut self.stream;
        guarded(deadline, cancel, async move {
            match stream {
                WriteStream::Tcp(w) => {
                    w.write_all(data).await?;
                    Ok(())
                }
                WriteStream::Tls(w) => {
                    w.write_all(data).await?;
                    w.flush().await?;
                    Ok(())
                }
                WriteStream::Udp(s) => {
                    s.send(data).await?;
                    Ok(())
                }
                WriteStream::Dtls(c) => {
                    c.send(data)
                        .await
                        .map(|_| ())
                        .map_err(|e| Error::Dtls(e.to_string()))
                }
            }
        })
        .await
    }

    /// Closes the write direction; the DTLS close also tears down the
    /// underlying session.
    pub async fn close(&mut self) {
        match &mut self.stream {
            WriteStream::Tcp(w) => {
                let _ = w.shutdown().await;
            }
            WriteStream::Tls(w) => {
                let _ = w.shutdown().await;
            }
            WriteStream::Udp(_) => {}
            WriteStream::Dtls(c) => {
                let _ = c.close().await;
            }
        }
    }
}

/**
 * A connection to a TURN server over any of the four supported transports.
 */
pub struct Connection {
    reader: ConnReader,
    writer: ConnWriter,
}

impl Connection {
    /**
     * Opens a connection to `server` ("host:port").
     *
     * - tcp: plain TCP connect with timeout
     * - tcp + tls: TCP connect, then TLS handshake without verification
     * - udp: connected UDP socket
     * - udp + tls: UDP socket wrapped in DTLS, also without verification
     */
    pub async fn connect(
        protocol: Protocol,
        server: &str,
        use_tls: bool,
        timeout: Duration,
    ) -> Result<Connection> {
        let deadline = Instant::now() + timeout;
        match (protocol, use_tls) {
            (Protocol::Tcp, false) => {
                let stream = timeout_at(deadline, TcpStream::connect(server))
                    .await
                    .map_err(|_| Error::Timeout { partial: Vec::new() })?
                    .map_err(|e| Error::Dial(e.to_string()))?;
                let (r, w) = stream.into_split();
                Ok(Self::assemble(ReadStream::Tcp(r), WriteStream::Tcp(w)))
            }
            (Protocol::Tcp, true) => {
                let stream = timeout_at(deadline, TcpStream::connect(server))
                    .await
                    .map_err(|_| Error::Timeout { partial: Vec::new() })?
                    .map_err(|e| Error::Dial(e.to_string()))?;
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let host = server.rsplit_once(':').map(|(h, _)| h).unwrap_or(server);
                let tls = timeout_at(deadline, connector.connect(host, stream))
                    .await
                    .map_err(|_| Error::Timeout { partial: Vec::new() })?
                    .map_err(|e| Error::Dial(e.to_string()))?;
                let (r, w) = tokio::io::split(tls);
                Ok(Self::assemble(ReadStream::Tls(r), WriteStream::Tls(w)))
            }
            (Protocol::Udp, false) => {
                let socket = Arc::new(Self::connected_udp(server, deadline).await?);
                Ok(Self::assemble(
                    ReadStream::Udp(socket.clone()),
                    WriteStream::Udp(socket),
                ))
            }
            (Protocol::Udp, true) => {
                let socket = Arc::new(Self::connected_udp(server, deadline).await?);
                let config = DtlsConfig {
                    insecure_skip_verify: true,
                    ..Default::default()
                };
                let dtls = timeout_at(deadline, DTLSConn::new(socket, config, true, None))
                    .await
                    .map_err(|_| Error::Timeout { partial: Vec::new() })?
                    .map_err(|e| Error::Dtls(e.to_string()))?;
                let conn = Arc::new(dtls);
                Ok(Self::assemble(
                    ReadStream::Dtls(conn.clone()),
                    WriteStream::Dtls(conn),
                ))
            }
        }
    }

    fn assemble(reader: ReadStream, writer: WriteStream) -> Connection {
        Connection {
            reader: ConnReader {
                stream: reader,
                pending: Vec::new(),
            },
            writer: ConnWriter { stream: writer },
        }
    }

    async fn connected_udp(server: &str, deadline: Instant) -> Result<UdpSocket> {
        let addr = resolver::resolve_endpoint(server).await?;
        let bind: SocketAddr = match addr {
            SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
            SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| Error::Dial(e.to_string()))?;
        timeout_at(deadline, socket.connect(addr))
            .await
            .map_err(|_| Error::Timeout { partial: Vec::new() })?
            .map_err(|e| Error::Dial(e.to_string()))?;
        Ok(socket)
    }

    /**
     * Wraps an established plain TCP connection in TLS, used by the
     * tcp-scanner to speak HTTPS to internal services through the relay.
     * Verification is disabled just like at dial time.
     */
    pub async fn upgrade_tls(self, host: &str, timeout: Duration) -> Result<Connection> {
        let deadline = Instant::now() + timeout;
        match (self.reader.stream, self.writer.stream) {
            (ReadStream::Tcp(r), WriteStream::Tcp(w)) => {
                let stream = r
                    .reunite(w)
                    .map_err(|e| Error::Dial(e.to_string()))?;
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let tls = timeout_at(deadline, connector.connect(host, stream))
                    .await
                    .map_err(|_| Error::Timeout { partial: Vec::new() })?
                    .map_err(|e| Error::Dial(e.to_string()))?;
                let (r, w) = tokio::io::split(tls);
                Ok(Self::assemble(ReadStream::Tls(r), WriteStream::Tls(w)))
            }
            _ => Err(Error::Dial(
                "TLS upgrade is only supported on plain TCP connections".to_string(),
            )),
        }
    }

    /**
     * Enables TCP keepalive where the transport supports it. Returns
     * whether the option took effect.
     */
    pub fn set_keepalive(&self) -> bool {
        self.reader.keepalive()
    }

    /// Splits the connection into independently owned halves for the data
    /// pumps. Buffered bytes travel with the read half.
    pub fn split(self) -> (ConnReader, ConnWriter) {
        (self.reader, self.writer)
    }

    pub async fn read_exact(
        &mut self,
        n: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.reader.read_exact(n, timeout, cancel).await
    }

    pub async fn read_all(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.reader.read_all(timeout, cancel).await
    }

    pub async fn write_data(
        &mut self,
        data: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.writer.write_data(data, timeout, cancel).await
    }

    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_read_exact_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept failed");
            stream.write_all(b"abc").await.expect("write failed");
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(b"defgh").await.expect("write failed");
        });

        let cancel = CancellationToken::new();
        let mut conn = Connection::connect(
            Protocol::Tcp,
            &addr.to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        let data = conn
            .read_exact(6, Duration::from_secs(1), &cancel)
            .await
            .expect("read failed");
        assert_eq!(&data, b"abcdef");
        // the surplus of the second write stays buffered
        let rest = conn
            .read_exact(2, Duration::from_secs(1), &cancel)
            .await
            .expect("read failed");
        assert_eq!(&rest, b"gh");
    }

    #[tokio::test]
    async fn test_read_all_returns_partial_on_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept failed");
            // exactly one full chunk so the reader keeps waiting for more
            stream
                .write_all(&[0x41u8; 1024])
                .await
                .expect("write failed");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let cancel = CancellationToken::new();
        let mut conn = Connection::connect(
            Protocol::Tcp,
            &addr.to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        match conn.read_all(Duration::from_millis(200), &cancel).await {
            Err(Error::Timeout { partial }) => assert_eq!(partial.len(), 1024),
            other => panic!("expected timeout with partial data, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_cancellation_beats_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            let _stream = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut conn = Connection::connect(
            Protocol::Tcp,
            &addr.to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        match conn.read_exact(1, Duration::from_secs(1), &cancel).await {
            Err(Error::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_udp_datagram_is_buffered() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = server.local_addr().expect("no local addr");

        let cancel = CancellationToken::new();
        let mut conn = Connection::connect(
            Protocol::Udp,
            &addr.to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        conn.write_data(b"ping", Duration::from_secs(1), &cancel)
            .await
            .expect("write failed");

        let mut buf = [0u8; 16];
        let (n, peer) = server.recv_from(&mut buf).await.expect("recv failed");
        assert_eq!(&buf[..n], b"ping");
        server
            .send_to(b"pong-and-more", peer)
            .await
            .expect("send failed");

        // two-phase read out of a single datagram
        let first = conn
            .read_exact(4, Duration::from_secs(1), &cancel)
            .await
            .expect("read failed");
        assert_eq!(&first, b"pong");
        let second = conn
            .read_exact(9, Duration::from_secs(1), &cancel)
            .await
            .expect("read failed");
        assert_eq!(&second, b"-and-more");
    }

    #[tokio::test]
    async fn test_keepalive_capability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            let _stream = listener.accept().await;
        });

        let tcp = Connection::connect(
            Protocol::Tcp,
            &addr.to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        assert!(tcp.set_keepalive());

        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
        let udp = Connection::connect(
            Protocol::Udp,
            &server.local_addr().expect("no local addr").to_string(),
            false,
            Duration::from_secs(1),
        )
        .await
        .expect("connect failed");
        assert!(!udp.set_keepalive());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }
}
