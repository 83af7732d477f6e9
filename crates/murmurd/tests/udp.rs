//! UDP runner tests on the loopback interface

use murmur_membership::{JoinState, MembershipConfig, Message, NodeAddress, Transport};
use murmurd::{UdpNode, UdpTransport};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

const TICK: Duration = Duration::from_millis(20);

/// Bind an ephemeral loopback socket and return it with its identity
async fn bind_loopback() -> (UdpSocket, NodeAddress) {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = match socket.local_addr().unwrap() {
        SocketAddr::V4(v4) => NodeAddress::from(v4),
        SocketAddr::V6(_) => unreachable!(),
    };
    (socket, addr)
}

#[tokio::test]
async fn test_transport_sends_datagram() {
    let (receiver, to) = bind_loopback().await;
    let (sender, from) = bind_loopback().await;
    let transport = UdpTransport::new(sender.into_std().unwrap()).unwrap();

    let msg = Message::Heartbeat {
        sender: from,
        heartbeat: 9,
    };
    transport.send(from, to, msg.encode()).unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Message::decode(&buf[..len]).unwrap(), msg);
}

#[tokio::test]
async fn test_two_nodes_join_over_udp() {
    let (socket_a, addr_a) = bind_loopback().await;
    let (socket_b, addr_b) = bind_loopback().await;
    let config = MembershipConfig::new(addr_a).with_fail_timeout(20);

    let introducer = UdpNode::with_socket(socket_a, config.clone(), TICK, 3).unwrap();
    let joiner = UdpNode::with_socket(socket_b, config, TICK, 3).unwrap();
    assert_eq!(joiner.address(), addr_b);

    let (stop_a, wait_a) = oneshot::channel::<()>();
    let (stop_b, wait_b) = oneshot::channel::<()>();
    let a = tokio::spawn(introducer.run(async move {
        let _ = wait_a.await;
    }));
    let b = tokio::spawn(joiner.run(async move {
        let _ = wait_b.await;
    }));

    tokio::time::sleep(Duration::from_millis(600)).await;
    let _ = stop_b.send(());
    let _ = stop_a.send(());

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    let mut expected = vec![addr_a, addr_b];
    expected.sort();
    assert_eq!(a.state, JoinState::InGroup);
    assert_eq!(b.state, JoinState::InGroup);
    assert_eq!(a.members, expected);
    assert_eq!(b.members, expected);
    assert!(a.ticks > 0);
}

#[tokio::test]
async fn test_garbage_datagram_is_ignored() {
    let (socket, addr) = bind_loopback().await;
    let config = MembershipConfig::new(addr).with_fail_timeout(50);
    let node = UdpNode::with_socket(socket, config, TICK, 3).unwrap();

    let (stop, wait) = oneshot::channel::<()>();
    let handle = tokio::spawn(node.run(async move {
        let _ = wait.await;
    }));

    let (peer, peer_addr) = bind_loopback().await;
    let target = SocketAddr::V4(SocketAddrV4::from(addr));
    peer.send_to(b"not a message", target).await.unwrap();
    let heartbeat = Message::Heartbeat {
        sender: peer_addr,
        heartbeat: 3,
    }
    .encode();
    peer.send_to(&heartbeat, target).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = stop.send(());
    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(outcome.state, JoinState::InGroup);
    assert!(outcome.members.contains(&peer_addr));
}

#[tokio::test]
async fn test_unanswered_join_stays_bootstrapping() {
    // Nobody listens on the introducer's port
    let (silent, introducer) = bind_loopback().await;
    drop(silent);
    let (socket, _) = bind_loopback().await;
    let node = UdpNode::with_socket(socket, MembershipConfig::new(introducer), TICK, 2).unwrap();

    let outcome = node
        .run(tokio::time::sleep(Duration::from_millis(120)))
        .await
        .unwrap();
    assert_eq!(outcome.state, JoinState::Bootstrapping);
    assert!(outcome.members.is_empty());
}

#[tokio::test]
async fn test_first_join_request_is_delivered() {
    let (socket_a, addr_a) = bind_loopback().await;
    let (socket_b, addr_b) = bind_loopback().await;
    let config = MembershipConfig::new(addr_a).with_fail_timeout(50);

    // Retries effectively disabled: the request sent by start() must land
    let introducer = UdpNode::with_socket(socket_a, config.clone(), TICK, 10_000).unwrap();
    let joiner = UdpNode::with_socket(socket_b, config, TICK, 10_000).unwrap();

    let (stop_a, wait_a) = oneshot::channel::<()>();
    let a = tokio::spawn(introducer.run(async move {
        let _ = wait_a.await;
    }));
    let b = joiner
        .run(tokio::time::sleep(Duration::from_millis(400)))
        .await
        .unwrap();
    let _ = stop_a.send(());
    let a = a.await.unwrap().unwrap();

    assert_eq!(b.state, JoinState::InGroup);
    assert!(b.members.contains(&addr_a));
    assert!(a.members.contains(&addr_b));
}
