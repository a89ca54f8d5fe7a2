/**
 * End-to-end test of the SOCKS tunnel against a mock TURN server: a SOCKS5
 * CONNECT has to produce the Allocate/Allocate/Connect exchange on the
 * control connection, a single ConnectionBind on the data connection, and
 * client bytes must appear verbatim on the data socket egress.
 */
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use slog::{o, Discard, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use turnpike::socks::{ProxyHandler, SocksProxy, SocksTurnTcpHandler};
use turnpike::stun::{
    attribute_type, method, Attribute, Class, Message, MessageType, HEADER_LENGTH,
};

const REALM: &str = "example.org";
const NONCE: &str = "3f7a90";
const CONNECTION_ID: [u8; 4] = [0x35, 0xd8, 0xcb, 0x0d];

#[derive(Default)]
struct MockState {
    control_messages: AtomicUsize,
    data_messages: AtomicUsize,
    egress: Mutex<Vec<u8>>,
}

async fn read_message(stream: &mut TcpStream) -> Option<Message> {
    let mut header = [0u8; HEADER_LENGTH];
    stream.read_exact(&mut header).await.ok()?;
    let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut body = vec![0u8; declared];
    stream.read_exact(&mut body).await.ok()?;
    let mut full = header.to_vec();
    full.extend_from_slice(&body);
    Message::parse(&full).ok()
}

fn response(request: &Message, class: Class, attributes: Vec<Attribute>) -> Vec<u8> {
    let mut message = Message::new();
    message.header.message_type = MessageType::new(class, request.header.message_type.method);
    message.header.transaction_id = request.header.transaction_id.clone();
    message.attributes = attributes;
    message.serialize().expect("mock serialize failed")
}

async fn serve_connection(mut stream: TcpStream, state: Arc<MockState>) {
    while let Some(request) = read_message(&mut stream).await {
        let out = match request.header.message_type.method {
            method::ALLOCATE => {
                state.control_messages.fetch_add(1, Ordering::SeqCst);
                if request.attribute(attribute_type::USERNAME).is_none() {
                    // challenge the unauthenticated Allocate
                    let mut error_value = vec![0x00, 0x00, 0x04, 0x01];
                    error_value.extend_from_slice(b"Unauthorized");
                    response(
                        &request,
                        Class::Error,
                        vec![
                            Attribute::new(attribute_type::ERROR_CODE, error_value),
                            Attribute::new(attribute_type::REALM, REALM.as_bytes().to_vec()),
                            Attribute::new(attribute_type::NONCE, NONCE.as_bytes().to_vec()),
                        ],
                    )
                } else {
                    response(
                        &request,
                        Class::Success,
                        vec![Attribute::new(
                            attribute_type::LIFETIME,
                            vec![0x00, 0x00, 0x02, 0x58],
                        )],
                    )
                }
            }
            method::CONNECT => {
                state.control_messages.fetch_add(1, Ordering::SeqCst);
                response(
                    &request,
                    Class::Success,
                    vec![Attribute::new(
                        attribute_type::CONNECTION_ID,
                        CONNECTION_ID.to_vec(),
                    )],
                )
            }
            method::CONNECTION_BIND => {
                state.data_messages.fetch_add(1, Ordering::SeqCst);
                let out = response(&request, Class::Success, Vec::new());
                if stream.write_all(&out).await.is_err() {
                    return;
                }
                // from here on the connection carries raw tunneled bytes
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => state
                            .egress
                            .lock()
                            .expect("poisoned lock")
                            .extend_from_slice(&buf[..n]),
                    }
                }
            }
            method::REFRESH => {
                state.control_messages.fetch_add(1, Ordering::SeqCst);
                response(&request, Class::Success, Vec::new())
            }
            _ => return,
        };
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

async fn run_mock_turn_server(listener: TcpListener, state: Arc<MockState>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(serve_connection(stream, state));
            }
            Err(_) => return,
        }
    }
}

fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

#[tokio::test]
async fn socks_connect_tunnels_bytes_through_mock_turn_server() {
    let state = Arc::new(MockState::default());

    // mock TURN server
    let turn_listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let turn_addr = turn_listener.local_addr().expect("no local addr");
    tokio::spawn(run_mock_turn_server(turn_listener, state.clone()));

    // SOCKS proxy wired to the mock
    let socks_listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let socks_addr = socks_listener.local_addr().expect("no local addr");
    let logger = test_logger();
    let factory_logger = logger.clone();
    let turn_server = turn_addr.to_string();
    let proxy = SocksProxy {
        listen: socks_addr.to_string(),
        timeout: Duration::from_secs(2),
        logger,
        factory: Arc::new(move || {
            Arc::new(SocksTurnTcpHandler::new(
                factory_logger.clone(),
                turn_server.clone(),
                "user".to_string(),
                "pass".to_string(),
                false,
                Duration::from_secs(2),
                Duration::from_secs(300),
                true,
            )) as Arc<dyn ProxyHandler>
        }),
    };
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = proxy.run_on(socks_listener, server_cancel).await;
    });

    // SOCKS5 handshake: greeting, no-auth, CONNECT 10.0.0.5:80
    let mut client = TcpStream::connect(socks_addr).await.expect("connect failed");
    client
        .write_all(&[0x05, 0x01, 0x00])
        .await
        .expect("write failed");
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.expect("read failed");
    assert_eq!(reply, [0x05, 0x00]);

    client
        .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 5, 0, 80])
        .await
        .expect("write failed");
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.expect("read failed");
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00, "expected a success reply");

    // the tunnel is up; bytes written by the client must appear verbatim
    // on the data socket egress
    let payload = b"hello through the relay";
    client.write_all(payload).await.expect("write failed");

    let mut delivered = false;
    for _ in 0..150 {
        if state.egress.lock().expect("poisoned lock").as_slice() == payload {
            delivered = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "payload did not reach the data connection");

    // Allocate unauth, Allocate auth and Connect ran on the control
    // connection; only ConnectionBind ran on the data connection
    assert_eq!(state.control_messages.load(Ordering::SeqCst), 3);
    assert_eq!(state.data_messages.load(Ordering::SeqCst), 1);

    cancel.cancel();
}
