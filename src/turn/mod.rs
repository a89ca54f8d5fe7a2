/**
 * The request/response engine and the TURN allocation scripts.
 */
use std::net::IpAddr;

use slog::{debug, Logger};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::net::{Connection, Protocol};
use crate::stun::requests::{
    allocate_request, allocate_request_auth, connect_request_auth, connection_bind_request,
    create_permission_request, AddressFamily, RequestedTransport,
};
use crate::stun::{attribute_type, Class, Message, HEADER_LENGTH};

/**
 * Sends a request and reads the single header-framed response.
 *
 * The two-phase read matters: on stream transports several responses may be
 * pipelined, and reading past the first message would corrupt subsequent
 * exchanges. Requests and responses on one connection are strictly
 * serialized; there is no pipelining on the send side either.
 *
 * @param logger Logger for the wire dumps.
 * @param conn The connection to exchange on.
 * @param request The request to serialize and send.
 * @param timeout Deadline applied separately to the write and both reads.
 * @return The parsed response message.
 */
pub async fn send_and_receive(
    logger: &Logger,
    conn: &mut Connection,
    request: &Message,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Message> {
    let data = request.serialize()?;
    debug!(logger, "sending\n{}", request);
    conn.write_data(&data, timeout, cancel).await?;

    let header = conn.read_exact(HEADER_LENGTH, timeout, cancel).await?;
    let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut full = header;
    if declared > 0 {
        let body = conn.read_exact(declared, timeout, cancel).await?;
        full.extend_from_slice(&body);
    }

    let response = Message::parse(&full)?;
    debug!(logger, "received\n{}", response);
    Ok(response)
}

/// Extracts realm and nonce from the unauthenticated Allocate error
/// response.
fn challenge(response: &Message) -> (String, String) {
    (
        response.attribute_string(attribute_type::REALM),
        response.attribute_string(attribute_type::NONCE),
    )
}

/**
 * Sets up a UDP relay allocation:
 *
 *   Allocate unauthenticated (to get realm and nonce)
 *   Allocate authenticated
 *   CreatePermission for the target peer
 *
 * The first Allocate must come back as an error response; anything else
 * means the server skipped the authentication challenge and the script
 * cannot continue.
 *
 * @return The connection together with the realm and nonce in use.
 */
#[allow(clippy::too_many_arguments)]
pub async fn setup_udp_allocation(
    logger: &Logger,
    protocol: Protocol,
    turn_server: &str,
    use_tls: bool,
    timeout: Duration,
    target: IpAddr,
    target_port: u16,
    username: &str,
    password: &str,
    cancel: &CancellationToken,
) -> Result<(Connection, String, String)> {
    let mut remote = Connection::connect(protocol, turn_server, use_tls, timeout).await?;

    let family = AddressFamily::for_target(target);

    let request = allocate_request(RequestedTransport::UDP, family);
    let response = send_and_receive(logger, &mut remote, &request, timeout, cancel).await?;
    if response.header.message_type.class != Class::Error {
        return Err(Error::UnexpectedClass {
            expected: Class::Error,
            actual: response.header.message_type.class,
        });
    }
    let (realm, nonce) = challenge(&response);

    let request = allocate_request_auth(
        username,
        password,
        &nonce,
        &realm,
        RequestedTransport::UDP,
        family,
    );
    let response = send_and_receive(logger, &mut remote, &request, timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    let request =
        create_permission_request(username, password, &nonce, &realm, target, target_port);
    let response = send_and_receive(logger, &mut remote, &request, timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    Ok((remote, realm, nonce))
}

/**
 * The product of a successful TCP relay setup. The control connection has
 * to stay open for the lifetime of the data connection, and is the one the
 * refresh loop runs on.
 */
pub struct TcpAllocation {
    pub realm: String,
    pub nonce: String,
    pub control: Connection,
    pub data: Connection,
}

/**
 * Sets up a TCP relay to the target (RFC 6062):
 *
 *   Allocate unauthenticated (to get realm and nonce)
 *   Allocate authenticated
 *   Connect
 *   Opens the data connection
 *   ConnectionBind
 *
 * ConnectionBind on the data connection must follow a successful Connect
 * response on the control connection; apart from that the two streams are
 * independent.
 */
#[allow(clippy::too_many_arguments)]
pub async fn setup_tcp_allocation(
    logger: &Logger,
    turn_server: &str,
    use_tls: bool,
    timeout: Duration,
    target: IpAddr,
    target_port: u16,
    username: &str,
    password: &str,
    cancel: &CancellationToken,
) -> Result<TcpAllocation> {
    // the transport towards the server is always TCP here
    let mut control = Connection::connect(Protocol::Tcp, turn_server, use_tls, timeout).await?;
    if control.set_keepalive() {
        debug!(logger, "control connection: keepalive enabled");
    }

    let family = AddressFamily::for_target(target);

    let request = allocate_request(RequestedTransport::TCP, family);
    let response = send_and_receive(logger, &mut control, &request, timeout, cancel).await?;
    if response.header.message_type.class != Class::Error {
        return Err(Error::UnexpectedClass {
            expected: Class::Error,
            actual: response.header.message_type.class,
        });
    }
    let (realm, nonce) = challenge(&response);

    let request = allocate_request_auth(
        username,
        password,
        &nonce,
        &realm,
        RequestedTransport::TCP,
        family,
    );
    let response = send_and_receive(logger, &mut control, &request, timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    let request = connect_request_auth(username, password, &nonce, &realm, target, target_port);
    let response = send_and_receive(logger, &mut control, &request, timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }
    let connection_id = response
        .attribute(attribute_type::CONNECTION_ID)
        .map(|a| a.value.clone())
        .unwrap_or_default();

    let mut data = Connection::connect(Protocol::Tcp, turn_server, use_tls, timeout).await?;
    if data.set_keepalive() {
        debug!(logger, "data connection: keepalive enabled");
    }

    let request = connection_bind_request(&connection_id, username, password, &nonce, &realm);
    let response = send_and_receive(logger, &mut data, &request, timeout, cancel).await?;
    if response.header.message_type.class == Class::Error {
        return Err(response.server_error());
    }

    Ok(TcpAllocation {
        realm,
        nonce,
        control,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::requests::binding_request;
    use crate::stun::{method, MessageType};
    use slog::{o, Discard};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_logger() -> Logger {
        Logger::root(Discard, o!())
    }

    async fn read_message(stream: &mut tokio::net::TcpStream) -> Message {
        let mut header = [0u8; HEADER_LENGTH];
        stream.read_exact(&mut header).await.expect("read failed");
        let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; declared];
        stream.read_exact(&mut body).await.expect("read failed");
        let mut full = header.to_vec();
        full.extend_from_slice(&body);
        Message::parse(&full).expect("parse failed")
    }

    #[tokio::test]
    async fn test_send_and_receive_leaves_pipelined_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept failed");
            let request = read_message(&mut stream).await;

            let mut response = Message::new();
            response.header.message_type =
                MessageType::new(Class::Success, request.header.message_type.method);
            response.header.transaction_id = request.header.transaction_id.clone();
            let mut out = response.serialize().expect("serialize failed");
            // a second pipelined message must stay unread
            out.extend_from_slice(&response.serialize().expect("serialize failed"));
            stream.write_all(&out).await.expect("write failed");
            tokio::time::sleep(Duration::from_millis(200)).await;
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

        let request = binding_request();
        let response = send_and_receive(&test_logger(), &mut conn, &request, Duration::from_secs(1), &cancel)
            .await
            .expect("exchange failed");
        assert_eq!(response.header.message_type.class, Class::Success);
        assert_eq!(
            response.header.transaction_id,
            request.header.transaction_id
        );

        // the second response is still available for the next exchange
        let second = conn
            .read_exact(HEADER_LENGTH, Duration::from_secs(1), &cancel)
            .await
            .expect("read failed");
        assert_eq!(second.len(), HEADER_LENGTH);
    }

    #[tokio::test]
    async fn test_setup_tcp_rejects_unexpected_class() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept failed");
            let request = read_message(&mut stream).await;
            // a success response to the unauthenticated Allocate violates
            // the long-term-credential script
            let mut response = Message::new();
            response.header.message_type = MessageType::new(Class::Success, method::ALLOCATE);
            response.header.transaction_id = request.header.transaction_id.clone();
            let out = response.serialize().expect("serialize failed");
            stream.write_all(&out).await.expect("write failed");
        });

        let cancel = CancellationToken::new();
        let result = setup_tcp_allocation(
            &test_logger(),
            &addr.to_string(),
            false,
            Duration::from_secs(1),
            "10.0.0.5".parse().expect("invalid ip"),
            80,
            "user",
            "pass",
            &cancel,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedClass {
                expected: Class::Error,
                actual: Class::Success
            })
        ));
    }
}
