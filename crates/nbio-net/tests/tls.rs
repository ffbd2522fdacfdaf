//! TLS sessions end to end

mod common;

use common::{config, wait_until, Recorder, CA, CERT, KEY};

use nbio_core::error::{NetError, TimeoutKind};
use nbio_net::tls::manager::parse_certs;
use nbio_net::{
    IoHandler, LineSplitter, Message, NetConfig, SocketContext, TcpClient, TcpServer, TlsManager,
};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

fn tls_server(handler: Arc<Recorder>) -> TcpServer {
    tls_server_with(handler, config())
}

fn tls_server_with(handler: Arc<Recorder>, config: NetConfig) -> TcpServer {
    let ctx = SocketContext::with_handler(handler as Arc<dyn IoHandler>)
        .with_config(config)
        .with_tls(TlsManager::server(CERT, KEY).unwrap());
    TcpServer::bind("127.0.0.1:0", ctx).unwrap()
}

/// Client connection trusting the test CA, with nothing sent yet
fn raw_client() -> ClientConnection {
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(parse_certs(CA).unwrap());
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    ClientConnection::new(Arc::new(config), ServerName::try_from("localhost").unwrap()).unwrap()
}

#[test]
fn test_handshake_connects_each_side_once() {
    let server_handler = Recorder::echo();
    let server = tls_server(server_handler.clone());

    let client_handler = Recorder::silent();
    let ctx = SocketContext::with_handler(client_handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_tls(TlsManager::client(CA, "localhost").unwrap());
    let client = TcpClient::connect(server.local_addr(), ctx).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));
    assert!(client.session().is_tls());

    client.send_sync(Message::from("secret")).unwrap();
    assert!(wait_until(|| client_handler.received_bytes() == b"secret"));
    assert_eq!(server_handler.received_bytes(), b"secret");

    // a second exchange must not re-trigger Connect
    client.send_sync(Message::from("again")).unwrap();
    assert!(wait_until(|| client_handler.received_bytes() == b"secretagain"));
    assert_eq!(Recorder::count(&client_handler.connects), 1);
    assert_eq!(Recorder::count(&server_handler.connects), 1);
}

#[test]
fn test_framing_over_tls() {
    let server_handler = Recorder::echo();
    let ctx = SocketContext::with_handler(server_handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_splitter(LineSplitter)
        .with_tls(TlsManager::server(CERT, KEY).unwrap());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let client_handler = Recorder::silent();
    let ctx = SocketContext::with_handler(client_handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_tls(TlsManager::client_trust_all("localhost").unwrap());
    let client = TcpClient::connect(server.local_addr(), ctx).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send_sync(Message::from("x\nyy\n")).unwrap();
    assert!(wait_until(|| server_handler.received().len() == 2));
    assert_eq!(
        server_handler.received(),
        vec![Message::Bytes(b"x\n".to_vec()), Message::Bytes(b"yy\n".to_vec())]
    );
}

#[test]
fn test_garbage_fails_handshake() {
    let handler = Recorder::silent();
    let server = tls_server(handler.clone());

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

    assert!(wait_until(|| Recorder::count(&handler.disconnects) == 1));
    assert_eq!(Recorder::count(&handler.connects), 0);
    assert_eq!(handler.exceptions.lock().unwrap().len(), 1);
}

#[test]
fn test_untrusted_server_rejected() {
    let server = tls_server(Recorder::silent());

    let client_handler = Recorder::silent();
    // trust roots that did not sign the server certificate
    let ctx = SocketContext::with_handler(client_handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_tls(TlsManager::client(CERT, "localhost").unwrap());
    let client = TcpClient::connect(server.local_addr(), ctx).unwrap();
    assert!(!client.wait_connected(Duration::from_secs(5)));
    assert_eq!(Recorder::count(&client_handler.connects), 0);
    assert!(wait_until(|| Recorder::count(&client_handler.disconnects) == 1));
}

#[test]
fn test_connect_precedes_data_sent_with_finished() {
    for _ in 0..3 {
        let handler = Recorder::silent();
        let server = tls_server(handler.clone());

        let mut tls = raw_client();
        // held back until the handshake completes, then sent right behind Finished
        tls.writer().write_all(b"hi").unwrap();
        let mut sock = TcpStream::connect(server.local_addr()).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        while tls.wants_write() {
            tls.write_tls(&mut sock).unwrap();
        }
        while tls.is_handshaking() {
            assert!(tls.read_tls(&mut sock).unwrap() > 0);
            tls.process_new_packets().unwrap();
        }
        let mut flight = Vec::new();
        while tls.wants_write() {
            tls.write_tls(&mut flight).unwrap();
        }
        sock.write_all(&flight).unwrap();

        assert!(wait_until(|| handler.order().len() == 2));
        assert_eq!(handler.order(), ["connect", "receive"]);
        assert_eq!(handler.received_bytes(), b"hi");
    }
}

#[test]
fn test_stalled_handshake_times_out() {
    let handler = Recorder::silent();
    let server = tls_server_with(handler.clone(), config().connect_timeout(Duration::from_millis(150)));

    // connect, then say nothing
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);

    assert!(wait_until(|| Recorder::count(&handler.disconnects) == 1));
    assert_eq!(
        *handler.exceptions.lock().unwrap(),
        vec![NetError::Timeout(TimeoutKind::Handshake)]
    );
    assert_eq!(Recorder::count(&handler.connects), 0);
}
