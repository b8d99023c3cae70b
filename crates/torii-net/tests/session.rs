//! Loopback exercises of the full protocol: handshake in both roles,
//! framed command traffic, the exact server hello layout, and teardown on
//! protocol violations.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use torii_codec::Packet;
use torii_net::{Connection, Message, MessageQueue, Role, Server, Status};

/// The 1024-bit MODP prime from RFC 2409, standing in for an
/// operator-pinned prime.
const PINNED_PRIME: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

async fn start_server() -> (Arc<Server>, Arc<MessageQueue<Message>>, u16) {
    let server = Arc::new(Server::new("127.0.0.1", 0));
    server.seed_prime(PINNED_PRIME).unwrap();

    let queue = Arc::new(MessageQueue::new());
    server.set_message_queue(&queue);

    let listener = server.bind().await.unwrap();
    let port = server.local_address().unwrap().port();
    tokio::spawn(Arc::clone(&server).run(listener));

    (server, queue, port)
}

async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn handshake_encrypts_both_roles() {
    let (server, _queue, port) = start_server().await;

    let client = Connection::connect("127.0.0.1", port);
    assert_eq!(client.role(), Role::Client);

    wait_until("client encryption", || client.status() == Status::Encrypted).await;
    wait_until("server encryption", || {
        server
            .connections()
            .first()
            .map(|connection| connection.status())
            == Some(Status::Encrypted)
    })
    .await;

    let connections = server.connections();
    let accepted = &connections[0];
    assert_eq!(accepted.role(), Role::Server);
    assert_eq!(accepted.remote_address(), "127.0.0.1");
}

#[tokio::test]
async fn frame_demultiplexes_into_ordered_messages() {
    let (_server, queue, port) = start_server().await;

    let client = Connection::connect("127.0.0.1", port);
    wait_until("client encryption", || client.status() == Status::Encrypted).await;

    // One frame, two commands: 0x1000 with a 10-byte body and 0x1001 with
    // a 4-byte body.
    let mut frame = Packet::new();
    frame.write_blank(8).unwrap();
    frame.write_blank(2).unwrap();
    frame.write_u16_little(14).unwrap();
    frame.write_u16_little(0x1000).unwrap();
    frame.write_array(&[0xAB; 10]).unwrap();
    frame.write_blank(2).unwrap();
    frame.write_u16_little(8).unwrap();
    frame.write_u16_little(0x1001).unwrap();
    frame.write_array(&[1, 2, 3, 4]).unwrap();
    client.send(frame);

    wait_until("two messages", || queue.len() >= 2).await;

    let first = queue.try_dequeue().unwrap();
    let second = queue.try_dequeue().unwrap();
    assert!(queue.try_dequeue().is_none());

    assert_eq!(first.command_code(), 0x1000);
    assert_eq!(second.command_code(), 0x1001);
    assert_eq!(first.connection().role(), Role::Server);

    let mut body = first.into_data();
    assert_eq!(body.size(), 10);
    assert_eq!(body.read_array(10).unwrap(), vec![0xAB; 10]);

    let mut body = second.into_data();
    assert_eq!(body.size(), 4);
    assert_eq!(body.read_array(4).unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn frames_flow_from_server_to_client_too() {
    let (server, _server_queue, port) = start_server().await;

    let client = Connection::connect("127.0.0.1", port);
    let client_queue = Arc::new(MessageQueue::new());
    client.set_message_queue(&client_queue);

    wait_until("client encryption", || client.status() == Status::Encrypted).await;
    wait_until("server connection", || !server.connections().is_empty()).await;

    let accepted = server.connections()[0].clone();
    wait_until("server encryption", || accepted.status() == Status::Encrypted).await;

    let mut frame = Packet::new();
    frame.write_blank(8).unwrap();
    frame.write_blank(2).unwrap();
    frame.write_u16_little(9).unwrap();
    frame.write_u16_little(0x0023).unwrap();
    frame.write_array(b"hello").unwrap();
    accepted.send(frame);

    wait_until("client message", || !client_queue.is_empty()).await;

    let message = client_queue.try_dequeue().unwrap();
    assert_eq!(message.command_code(), 0x0023);
    assert_eq!(message.data().as_bytes(), b"hello");
}

#[tokio::test]
async fn server_hello_has_the_fixed_wire_layout() {
    let (_server, _queue, port) = start_server().await;

    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Send the client hello in two short writes; the server's parser must
    // re-request the remainder rather than advance.
    socket.write_all(&[0, 0, 0, 1]).await.unwrap();
    socket.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    socket.write_all(&[0, 0, 0, 8]).await.unwrap();

    let mut reply = [0u8; 529];
    socket.read_exact(&mut reply).await.unwrap();

    assert_eq!(&reply[..4], &[0, 0, 0, 0]);
    assert_eq!(&reply[4..8], &1u32.to_be_bytes());
    assert_eq!(reply[8], b'2');
    assert_eq!(&reply[9..13], &256u32.to_be_bytes());
    assert_eq!(&reply[13..269], PINNED_PRIME.as_bytes());
    assert_eq!(&reply[269..273], &256u32.to_be_bytes());
    assert!(reply[273..529]
        .iter()
        .all(|byte| byte.is_ascii_hexdigit()));
}

#[tokio::test]
async fn bad_client_hello_closes_the_connection() {
    let (server, _queue, port) = start_server().await;

    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    socket
        .write_all(&[0, 0, 0, 2, 0, 0, 0, 9])
        .await
        .unwrap();

    wait_until("server connection", || !server.connections().is_empty()).await;
    wait_until("disconnect", || {
        server.connections()[0].status() == Status::NotConnected
    })
    .await;
}

#[tokio::test]
async fn remove_connection_forgets_it() {
    let (server, _queue, port) = start_server().await;

    let client = Connection::connect("127.0.0.1", port);
    wait_until("server connection", || !server.connections().is_empty()).await;

    let accepted = server.connections()[0].clone();
    server.remove_connection(&accepted);
    assert!(server.connections().is_empty());

    client.close();
    assert_eq!(client.status(), Status::NotConnected);
}
