/**
 * The SOCKS handler relaying datagrams through a TURN server using
 * CreatePermission, ChannelBind and ChannelData framing.
 */
use std::sync::Mutex;

use async_trait::async_trait;
use fast_socks5::util::target_addr::TargetAddr;
use fast_socks5::ReplyError;
use slog::{debug, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::net::ranges::is_private_ip;
use crate::net::{ConnReader, ConnWriter, Connection, Protocol};
use crate::socks::{resolve_target, ProxyHandler, SocksError};
use crate::stun::channel::{encode_channel_data, extract_channel_data, random_channel_number};
use crate::stun::requests::channel_bind_request;
use crate::stun::Class;
use crate::turn::{send_and_receive, setup_udp_allocation};

/// One ChannelData frame per client read; sized for a full datagram.
const FRAME_BUFFER: usize = 65536;

/**
 * Handler state for one SOCKS client. The channel number is chosen in
 * `init` and read by the pumps afterwards. There is no refresh loop; the
 * probe-style usage pattern of the UDP bridge stays well below the
 * allocation lifetime.
 */
pub struct SocksTurnUdpHandler {
    logger: Logger,
    turn_server: String,
    username: String,
    password: String,
    protocol: Protocol,
    use_tls: bool,
    timeout: Duration,
    drop_non_private: bool,
    channel: Mutex<Option<[u8; 2]>>,
}

impl SocksTurnUdpHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        turn_server: String,
        username: String,
        password: String,
        protocol: Protocol,
        use_tls: bool,
        timeout: Duration,
        drop_non_private: bool,
    ) -> Self {
        Self {
            logger,
            turn_server,
            username,
            password,
            protocol,
            use_tls,
            timeout,
            drop_non_private,
            channel: Mutex::new(None),
        }
    }

    fn bound_channel(&self) -> Result<[u8; 2]> {
        self.channel
            .lock()
            .unwrap()
            .ok_or_else(|| Error::Config("no channel bound, init not run".to_string()))
    }
}

#[async_trait]
impl ProxyHandler for SocksTurnUdpHandler {
    /**
     * Builds the UDP allocation, binds a random channel to the target and
     * returns the TURN connection as the data stream.
     */
    async fn init(
        &self,
        target_addr: &TargetAddr,
        cancel: &CancellationToken,
    ) -> std::result::Result<Connection, SocksError> {
        let (target, port) = resolve_target(target_addr).await?;

        if self.drop_non_private && !is_private_ip(target) {
            debug!(
                self.logger,
                "[socks] dropping non private connection to {}:{}", target, port
            );
            return Err(SocksError::new(
                ReplyError::HostUnreachable,
                format!("dropping non private connection to {}:{}", target, port),
            ));
        }

        let (mut remote, realm, nonce) = setup_udp_allocation(
            &self.logger,
            self.protocol,
            &self.turn_server,
            self.use_tls,
            self.timeout,
            target,
            port,
            &self.username,
            &self.password,
            cancel,
        )
        .await
        .map_err(|e| SocksError::new(ReplyError::HostUnreachable, e))?;

        let channel = random_channel_number();
        let request = channel_bind_request(
            &self.username,
            &self.password,
            &nonce,
            &realm,
            target,
            port,
            channel,
        );
        let response =
            send_and_receive(&self.logger, &mut remote, &request, self.timeout, cancel)
                .await
                .map_err(|e| SocksError::new(ReplyError::HostUnreachable, e))?;
        if response.header.message_type.class == Class::Error {
            return Err(SocksError::new(
                ReplyError::GeneralFailure,
                format!("error on ChannelBind: {}", response.error_string()),
            ));
        }

        *self.channel.lock().unwrap() = Some(channel);
        Ok(remote)
    }

    /// Unused; allocations of this bridge are short-lived.
    async fn refresh(&self, _cancel: CancellationToken) {}

    /**
     * Frames every client read into a ChannelData message: the payload is
     * padded to a 4-byte boundary and the length field declares the padded
     * size.
     */
    async fn read_from_client(
        &self,
        client: &mut OwnedReadHalf,
        remote: &mut ConnWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let channel = self.bound_channel()?;
        let mut buf = vec![0u8; FRAME_BUFFER];
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(self.timeout, client.read(&mut buf)) => match r {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(Error::Timeout { partial: Vec::new() }),
                },
            };
            if read == 0 {
                return Ok(());
            }
            let framed = encode_channel_data(channel, &buf[..read]);
            remote.write_data(&framed, self.timeout, cancel).await?;
            debug!(
                self.logger,
                "[socks] sent {} bytes on channel {}",
                read,
                hex::encode(channel)
            );
        }
    }

    /**
     * Unframes one ChannelData message per iteration and forwards the
     * payload, after verifying the declared length against the data.
     */
    async fn read_from_remote(
        &self,
        remote: &mut ConnReader,
        client: &mut OwnedWriteHalf,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; FRAME_BUFFER];
        loop {
            let read = remote.read_chunk(&mut buf, self.timeout, cancel).await?;
            if read == 0 {
                return Ok(());
            }
            let (channel, data) = extract_channel_data(&buf[..read])?;
            debug!(
                self.logger,
                "[socks] received {} bytes on channel {}",
                data.len(),
                hex::encode(channel)
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(self.timeout, client.write_all(data)) => match r {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(Error::Timeout { partial: Vec::new() }),
                },
            }
        }
    }

    /// Nothing kept beyond the data connection, which the server owns.
    async fn close(&self) {}
}
