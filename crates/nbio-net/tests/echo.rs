//! Plain TCP end-to-end behavior over loopback

mod common;

use common::{config, wait_until, Recorder};

use nbio_core::error::{NetError, TimeoutKind};
use nbio_net::{
    ByteFilter, ByteFilterSplitter, IoHandler, LineSplitter, Message, SocketContext, StringFilter,
    SynchronousHandler, TcpClient, TcpServer,
};

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

fn connect(server: &TcpServer) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

#[test]
fn test_plain_echo() {
    let handler = Recorder::echo();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    stream.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    assert!(wait_until(|| Recorder::count(&handler.sent) == 1));
    assert_eq!(Recorder::count(&handler.connects), 1);
    server.shutdown();
    assert_eq!(Recorder::count(&handler.disconnects), 1);
}

#[test]
fn test_round_robin_spreads_sessions() {
    let n = 3;
    let ctx = SocketContext::new(common::Recorder::default()).with_config(config().io_threads(n));
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let clients: Vec<TcpStream> = (0..3 * n).map(|_| connect(&server)).collect();
    assert!(wait_until(|| server.session_count() == 3 * n));
    for runner in server.io_group().iter() {
        assert_eq!(runner.session_count(), 3, "runner {}", runner.name());
    }

    drop(clients);
    assert!(wait_until(|| server.session_count() == 0));
    assert!(server.io_group().iter().all(|r| r.session_count() == 0));
}

#[test]
fn test_line_frames_in_order() {
    let handler = Recorder::silent();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_splitter(LineSplitter)
        .with_filter(StringFilter);
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    stream.write_all(b"a\nbb\ncc").unwrap();
    stream.write_all(b"c\n").unwrap();
    assert!(wait_until(|| handler.received().len() == 3));
    assert_eq!(
        handler.received(),
        vec![Message::from("a\n"), Message::from("bb\n"), Message::from("ccc\n")]
    );
}

#[test]
fn test_unframed_tail_delivered_at_end_of_stream() {
    let handler = Recorder::silent();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_splitter(LineSplitter);
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    stream.write_all(b"one\ntwo").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    assert!(wait_until(|| Recorder::count(&handler.disconnects) == 1));
    assert_eq!(handler.received_bytes(), b"one\ntwo");
    assert_eq!(handler.received().len(), 2);
    // the server closed its side too
    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn test_byte_filter_round_trip() {
    let handler = Recorder::echo();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>)
        .with_config(config())
        .with_splitter(ByteFilterSplitter)
        .with_filter(ByteFilter)
        .with_filter(StringFilter);
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    let mut wire = ByteFilter::frame(b"one");
    wire.extend_from_slice(&ByteFilter::frame(b"three"));
    stream.write_all(&wire).unwrap();

    let mut back = vec![0u8; wire.len()];
    stream.read_exact(&mut back).unwrap();
    assert_eq!(back, wire);
    assert_eq!(handler.received(), vec![Message::from("one"), Message::from("three")]);
}

#[test]
fn test_close_from_handler_is_idempotent() {
    let handler = Recorder::closing_on(b"bye");
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    stream.write_all(b"bye").unwrap();
    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);

    assert!(wait_until(|| Recorder::count(&handler.disconnects) == 1));
    assert_eq!(*handler.close_results.lock().unwrap(), vec![true, false]);
    // nothing else arrives later
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(Recorder::count(&handler.disconnects), 1);
    assert!(handler.exceptions.lock().unwrap().is_empty());
}

#[test]
fn test_client_send_sync_echo() {
    let server_handler = Recorder::echo();
    let ctx = SocketContext::with_handler(server_handler.clone() as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let client_handler = Recorder::silent();
    let client_ctx =
        SocketContext::with_handler(client_handler.clone() as Arc<dyn IoHandler>).with_config(config());
    let client = TcpClient::connect(server.local_addr(), client_ctx).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send_sync(Message::from("ping")).unwrap();
    assert!(wait_until(|| client_handler.received_bytes() == b"ping"));
    assert!(wait_until(|| Recorder::count(&client_handler.sent) == 1));

    assert!(client.close());
    assert!(!client.close());
    assert!(wait_until(|| Recorder::count(&server_handler.disconnects) == 1));
    assert!(client.send_sync(Message::from("late")).is_err());
}

#[test]
fn test_send_from_foreign_thread() {
    let handler = Recorder::silent();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    assert!(wait_until(|| server.session_count() == 1));
    let session = server.context().sessions().pop().unwrap();
    assert!(wait_until(|| session.is_connected()));

    session.send_message(Message::from("push")).unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"push");
}

#[test]
fn test_async_send_and_receive_echo() {
    let handler = Recorder::echo();
    let ctx = SocketContext::with_handler(handler.clone() as Arc<dyn IoHandler>)
        .with_config(config().async_send(true).async_receive(true))
        .with_splitter(LineSplitter);
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let mut stream = connect(&server);
    stream.write_all(b"a\nbb\n").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"a\nbb\n");
    assert_eq!(
        handler.received(),
        vec![Message::Bytes(b"a\n".to_vec()), Message::Bytes(b"bb\n".to_vec())]
    );

    let session = server.context().sessions().pop().unwrap();
    assert!(session.read_channel().is_thread_safe());
    assert!(session.write_channel().is_thread_safe());
    // written and flushed from this thread, not queued on the runner
    session.send_message(Message::from("push\n")).unwrap();
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"push\n");
}

#[test]
fn test_sync_read_pairs_with_send_sync() {
    let server_handler = Recorder::echo();
    let ctx = SocketContext::with_handler(server_handler as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let sync = Arc::new(SynchronousHandler::new());
    let client_ctx = SocketContext::with_handler(sync.clone() as Arc<dyn IoHandler>)
        .with_config(config().read_timeout(Duration::from_secs(2)));
    let client = TcpClient::connect(server.local_addr(), client_ctx).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    for word in ["one", "two"] {
        client.send_sync(Message::from(word)).unwrap();
        let reply = client.sync_read().unwrap();
        assert_eq!(reply.as_bytes(), Some(word.as_bytes()));
    }
    assert!(!sync.has_response());
}

#[test]
fn test_sync_read_times_out_on_silent_server() {
    let ctx = SocketContext::with_handler(Recorder::silent() as Arc<dyn IoHandler>).with_config(config());
    let server = TcpServer::bind("127.0.0.1:0", ctx).unwrap();

    let client_ctx = SocketContext::new(SynchronousHandler::new())
        .with_config(config().read_timeout(Duration::from_millis(150)));
    let client = TcpClient::connect(server.local_addr(), client_ctx).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send_sync(Message::from("anyone?")).unwrap();
    assert_eq!(client.sync_read(), Err(NetError::Timeout(TimeoutKind::Read)));
}
