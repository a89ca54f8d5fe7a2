/**
 * The SOCKS handler relaying TCP streams through a TURN server with the
 * RFC 6062 Connect/ConnectionBind extension.
 */
use std::sync::Mutex;

use async_trait::async_trait;
use fast_socks5::util::target_addr::TargetAddr;
use fast_socks5::ReplyError;
use slog::{debug, error, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::net::ranges::is_private_ip;
use crate::net::{ConnReader, ConnWriter, Connection};
use crate::socks::{resolve_target, ProxyHandler, SocksError};
use crate::stun::requests::refresh_request;
use crate::stun::{attribute_type, Class};
use crate::turn::{send_and_receive, setup_tcp_allocation};

/// Per-iteration copy size of the data pumps.
const BUFFER_LENGTH: usize = 1024 * 100;

/**
 * Handler state for one SOCKS client. The control connection outlives
 * `init` and is closed in `close`; the data connection is handed to the
 * server. Realm and nonce are written only by the refresh task after
 * setup.
 */
pub struct SocksTurnTcpHandler {
    logger: Logger,
    turn_server: String,
    username: String,
    password: String,
    use_tls: bool,
    timeout: Duration,
    refresh_interval: Duration,
    drop_non_private: bool,
    control: tokio::sync::Mutex<Option<Connection>>,
    realm: Mutex<String>,
    nonce: Mutex<String>,
}

impl SocksTurnTcpHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        turn_server: String,
        username: String,
        password: String,
        use_tls: bool,
        timeout: Duration,
        refresh_interval: Duration,
        drop_non_private: bool,
    ) -> Self {
        Self {
            logger,
            turn_server,
            username,
            password,
            use_tls,
            timeout,
            refresh_interval,
            drop_non_private,
            control: tokio::sync::Mutex::new(None),
            realm: Mutex::new(String::new()),
            nonce: Mutex::new(String::new()),
        }
    }

    fn store_challenge(&self, realm: String, nonce: String) {
        *self.realm.lock().unwrap() = realm;
        *self.nonce.lock().unwrap() = nonce;
    }

    fn challenge(&self) -> (String, String) {
        (
            self.realm.lock().unwrap().clone(),
            self.nonce.lock().unwrap().clone(),
        )
    }
}

#[async_trait]
impl ProxyHandler for SocksTurnTcpHandler {
    /**
     * Connects to the TURN server, runs the full RFC 6062 setup and
     * returns the data connection for the server to pump.
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

        let allocation = setup_tcp_allocation(
            &self.logger,
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

        self.store_challenge(allocation.realm, allocation.nonce);
        // the control connection has to stay open for the lifetime of the
        // tunneled data connection
        *self.control.lock().await = Some(allocation.control);
        Ok(allocation.data)
    }

    /**
     * Refreshes the allocation periodically on the control connection.
     * A stale-nonce error rotates realm and nonce and retries once; two
     * consecutive errors end the loop, which tears down the tunnel when
     * the allocation eventually expires server side.
     */
    async fn refresh(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }

            debug!(self.logger, "[socks] refreshing connection");
            let (realm, nonce) = self.challenge();
            let request = refresh_request(&self.username, &self.password, &nonce, &realm);

            let mut guard = self.control.lock().await;
            let Some(control) = guard.as_mut() else {
                return;
            };
            let response =
                match send_and_receive(&self.logger, control, &request, self.timeout, &cancel)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        error!(self.logger, "[socks] refresh failed: {}", e);
                        return;
                    }
                };

            // should happen on a stale nonce
            if response.header.message_type.class == Class::Error {
                let realm = response.attribute_string(attribute_type::REALM);
                let nonce = response.attribute_string(attribute_type::NONCE);
                self.store_challenge(realm.clone(), nonce.clone());
                let request = refresh_request(&self.username, &self.password, &nonce, &realm);
                match send_and_receive(&self.logger, control, &request, self.timeout, &cancel)
                    .await
                {
                    Ok(response) if response.header.message_type.class == Class::Error => {
                        error!(self.logger, "[socks] refresh failed: {}", response.error_string());
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(self.logger, "[socks] refresh failed: {}", e);
                        return;
                    }
                }
            }
        }
    }

    /**
     * Copies client bytes to the TURN data connection. The deadline is per
     * chunk to support long downloads while still detecting idle stalls.
     */
    async fn read_from_client(
        &self,
        client: &mut OwnedReadHalf,
        remote: &mut ConnWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; BUFFER_LENGTH];
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
            remote.write_data(&buf[..read], self.timeout, cancel).await?;
            debug!(self.logger, "[socks] wrote {} bytes to remote", read);
        }
    }

    /**
     * Copies TURN data connection bytes back to the client, with the same
     * per-chunk deadline regime.
     */
    async fn read_from_remote(
        &self,
        remote: &mut ConnReader,
        client: &mut OwnedWriteHalf,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; BUFFER_LENGTH];
        loop {
            let read = remote.read_chunk(&mut buf, self.timeout, cancel).await?;
            if read == 0 {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(self.timeout, client.write_all(&buf[..read])) => match r {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(Error::Timeout { partial: Vec::new() }),
                },
            }
            debug!(self.logger, "[socks] wrote {} bytes to client", read);
        }
    }

    /**
     * Closes the stored control connection. The data connection belongs to
     * the server and is not touched here.
     */
    async fn close(&self) {
        let mut guard = self.control.lock().await;
        if let Some(mut control) = guard.take() {
            control.close().await;
        }
    }
}
