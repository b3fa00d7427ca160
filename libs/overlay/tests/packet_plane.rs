use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bufferpool::BufferPool;
use overlay::datagram::DatagramServer;
use overlay::{IpPacket, Router};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn test_packet(destination: [u8; 4]) -> Vec<u8> {
    let builder = etherparse::PacketBuilder::ipv4([10, 0, 0, 1], destination, 64).udp(1001, 1000);
    let mut bytes = Vec::with_capacity(builder.size(11));
    builder.write(&mut bytes, b"test-packet").unwrap();

    bytes
}

#[tokio::test]
async fn overlay_egress_reaches_the_peer_socket() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let server = Arc::new(DatagramServer::new(socket, |_, _| {}, 1500));

    let router = Router::new(
        Box::new({
            let server = server.clone();
            move |endpoint, buffer| server.send_to(endpoint, buffer)
        }),
        Box::new(|_| panic!("nothing should reach the virtual side")),
        peer_port,
    );
    router.add_known_client(Ipv4Addr::new(11, 11, 11, 2), Ipv4Addr::LOCALHOST);

    let bytes = test_packet([11, 11, 11, 2]);
    let pool = BufferPool::new(1500);
    let packet = IpPacket::new(pool.pull_initialised(&bytes)).unwrap();

    router.from_virtual(packet).unwrap();

    let mut received = vec![0u8; 1500];
    let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut received))
        .await
        .expect("packet to arrive within one second")
        .unwrap();

    assert_eq!(&received[..len], &bytes[..]);
}

#[tokio::test]
async fn received_datagrams_are_dispatched_with_their_sender() {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let server_addr = socket.local_addr().unwrap();

    let (tx, mut rx) = mpsc::channel::<(SocketAddr, Vec<u8>)>(8);
    let _server = DatagramServer::new(
        socket,
        move |sender, buffer| {
            tx.try_send((sender, buffer.to_vec())).unwrap();
        },
        1500,
    );

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bytes = test_packet([11, 11, 11, 3]);
    peer.send_to(&bytes, server_addr).await.unwrap();

    let (sender, received) = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("callback to fire within one second")
        .unwrap();

    assert_eq!(sender, peer.local_addr().unwrap());
    assert_eq!(received, bytes);
}
