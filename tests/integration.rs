//! End-to-end exercises of `Client` against `Server` over real loopback
//! sockets, grounded on `connection_test.c`'s three/four-way handshake
//! scenarios and `flow_control_test.c`'s send/receive scenario, but driving
//! the actual implementation instead of hand-rolled packets.

use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use rudp::{Client, Server};

/// Runs `server.run_once()` up to `iterations` times in a background
/// thread, enough to carry one client through handshake, one data
/// exchange, and close.
fn drive_server(mut server: Server, iterations: usize) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for _ in 0..iterations {
            if server.run_once().is_err() {
                break;
            }
        }
    })
}

#[test]
fn client_connects_exchanges_data_and_closes() {
    let server = Server::bind((Ipv4Addr::LOCALHOST, 0), 8).unwrap();
    let server_addr = server.local_addr().unwrap();
    let handle = drive_server(server, 8);

    let client_sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let mut client = Client::connect(client_sock, server_addr).expect("handshake should succeed");
    assert_eq!(client.peer_addr(), server_addr);

    let sent = client.send(b"ping").expect("send should succeed");
    assert_eq!(sent, 4);

    client.close().expect("close should succeed");

    handle.join().unwrap();
}

#[test]
fn two_clients_can_connect_to_the_same_server_independently() {
    let server = Server::bind((Ipv4Addr::LOCALHOST, 0), 8).unwrap();
    let server_addr = server.local_addr().unwrap();
    let handle = drive_server(server, 16);

    let sock_a = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let sock_b = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let mut client_a = Client::connect(sock_a, server_addr).expect("client A handshake");
    let mut client_b = Client::connect(sock_b, server_addr).expect("client B handshake");

    assert_ne!(client_a.peer_addr().port(), 0);
    assert_eq!(client_a.peer_addr(), client_b.peer_addr());

    client_a.send(b"from-a").unwrap();
    client_b.send(b"from-b").unwrap();

    client_a.close().unwrap();
    client_b.close().unwrap();

    handle.join().unwrap();
}

#[test]
fn handshake_against_a_closed_port_fails_after_retries() {
    // No server is bound on this address; every SYN retry must time out.
    let client_sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let unused_addr: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();

    let result = Client::connect(client_sock, unused_addr);
    assert!(result.is_err());
}

#[test]
fn recv_without_incoming_data_times_out() {
    let server = Server::bind((Ipv4Addr::LOCALHOST, 0), 8).unwrap();
    let server_addr = server.local_addr().unwrap();
    let handle = drive_server(server, 4);

    let client_sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let mut client = Client::connect(client_sock, server_addr).expect("handshake should succeed");

    let mut buf = [0u8; 64];
    let result = client.recv(&mut buf, Duration::from_millis(200));
    assert!(matches!(result, Err(rudp::Error::Timeout)));

    client.close().ok();
    handle.join().unwrap();
}
