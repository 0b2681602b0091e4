//! Server main loop: demultiplexes many peers over one bound datagram
//! socket by flag precedence, and sweeps the registry for dead peers.
//! Grounded on `server_socket.c`'s `handle_handshake` /
//! `handle_connection_termination`, generalized from its single-client
//! `while (1) { handshake; data; close }` loop to flag-dispatch over a
//! shared [`Registry`] so many peers can be mid-connection at once.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Instant;

use log::{debug, info, warn};
use rand::Rng;

use crate::congestion::CongestionState;
use crate::consts::{ACK, FIN, MAX_PAYLOAD_SIZE, SWEEP_INTERVAL, SYN};
use crate::err::Error;
use crate::flow::FlowState;
use crate::registry::{ConnectionControl, PeerState, Registry};
use crate::segment::Segment;

pub struct Server {
    socket: UdpSocket,
    registry: Registry,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A, capacity: usize) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        info!("listening on {}", socket.local_addr()?);
        Ok(Server {
            socket,
            registry: Registry::new(capacity),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the dispatch loop forever. Each iteration either processes one
    /// inbound segment or, on the `SWEEP_INTERVAL` deadline, sweeps the
    /// registry for peers that went quiet.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.run_once()?;
        }
    }

    /// One iteration of the dispatch loop: process at most one segment, or
    /// sweep the registry if the receive deadline elapses first.
    pub fn run_once(&mut self) -> Result<(), Error> {
        self.socket.set_read_timeout(Some(SWEEP_INTERVAL))?;
        let mut buf = [0u8; 64];

        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => self.dispatch(&buf[..n], from),
            Err(e) if would_block_or_timed_out(&e) => {
                self.registry.sweep(Instant::now());
                Ok(())
            }
            Err(e) => Err(Error::Substrate(e)),
        }
    }

    /// Dispatches one raw datagram by flag precedence: SYN, FIN, bare ACK,
    /// then PSH; anything else (or anything that fails to decode or verify)
    /// is silently dropped — no RST is emitted.
    fn dispatch(&mut self, buf: &[u8], from: SocketAddr) -> Result<(), Error> {
        let segment = match Segment::decode(buf) {
            Ok(seg) if seg.verify() => seg,
            _ => {
                debug!("dropping malformed or corrupt segment from {from}");
                return Ok(());
            }
        };

        if segment.is_syn() {
            self.handle_syn(&segment, from)?;
        } else if segment.is_fin() {
            self.handle_fin(&segment, from)?;
        } else if segment.is_ack() && !segment.is_psh() {
            self.handle_bare_ack(&segment, from);
        } else if segment.is_psh() {
            self.handle_psh(&segment, from)?;
        } else {
            debug!("ignoring segment with flags={:#x} from {from}", segment.flags);
        }

        Ok(())
    }

    /// SYN from an unknown peer: register it and reply SYN|ACK. A SYN
    /// arriving while the registry is full is dropped — a capacity error
    /// affects only this peer, never the server loop.
    fn handle_syn(&mut self, segment: &Segment, from: SocketAddr) -> Result<(), Error> {
        let now = Instant::now();
        let peer = match self.registry.add(from, now) {
            Ok(peer) => peer,
            Err(Error::CapacityExceeded) => {
                debug!("registry full, dropping SYN from {from}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        peer.state = PeerState::SynReceived;
        peer.expected_next_seq = segment.seq_num.wrapping_add(1);
        peer.touch(now);

        let local_port = self.socket.local_addr()?.port();
        let server_isn: u32 = rand::thread_rng().gen();

        let synack = Segment::new(
            local_port,
            segment.source_port,
            server_isn,
            peer.expected_next_seq,
            SYN | ACK,
        );
        self.socket.send_to(&synack.encode(), from)?;
        debug!("sent SYN|ACK to {from}");
        Ok(())
    }

    /// A bare ACK finalizes a pending handshake, or is treated as a
    /// heartbeat once the peer is already established.
    fn handle_bare_ack(&mut self, _segment: &Segment, from: SocketAddr) {
        let now = Instant::now();
        if let Some(peer) = self.registry.find_mut(&from) {
            if peer.state == PeerState::SynReceived {
                peer.state = PeerState::Established;
                info!("peer {from} established");
            }
            peer.touch(now);
        }
    }

    /// First PSH from an established peer lazily creates its flow and
    /// congestion state; subsequent ones reuse it.
    fn handle_psh(&mut self, segment: &Segment, from: SocketAddr) -> Result<(), Error> {
        let local_port = self.socket.local_addr()?.port();
        let now = Instant::now();

        let peer = match self.registry.find_mut(&from) {
            Some(peer) => peer,
            None => {
                warn!("dropping PSH from unregistered peer {from}");
                return Ok(());
            }
        };
        peer.touch(now);
        peer.state = PeerState::Established;

        if peer.control.is_none() {
            peer.control = Some(ConnectionControl {
                flow: FlowState::new(0, local_port, segment.source_port, from),
                congestion: CongestionState::new(MAX_PAYLOAD_SIZE as u32),
            });
        }

        let len = segment.payload.len();
        let ack_num = segment.seq_num.wrapping_add(len as u32);
        let ack = Segment::new(local_port, segment.source_port, 0, ack_num, ACK)
            .with_window(u16::MAX);
        self.socket.send_to(&ack.encode(), from)?;

        if let Some(control) = peer.control.as_mut() {
            control.flow.last_ack = ack_num;
        }

        Ok(())
    }

    /// FIN from a peer: reply with the combined FIN|ACK, then remove the
    /// peer from the registry — the subsequent ACK is terminal and not
    /// otherwise acted on.
    fn handle_fin(&mut self, segment: &Segment, from: SocketAddr) -> Result<(), Error> {
        let local_port = self.socket.local_addr()?.port();

        let fin_ack = Segment::new(
            local_port,
            segment.source_port,
            0,
            segment.seq_num.wrapping_add(1),
            FIN | ACK,
        );
        self.socket.send_to(&fin_ack.encode(), from)?;
        self.registry.remove(&from);
        info!("peer {from} closed");
        Ok(())
    }
}

fn would_block_or_timed_out(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn syn_registers_peer_and_sends_synack() {
        let mut server = Server::bind((Ipv4Addr::LOCALHOST, 0), 4).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let client_addr = client.local_addr().unwrap();

        let syn = Segment::new(client_addr.port(), server_addr.port(), 1000, 0, SYN);
        client.send_to(&syn.encode(), server_addr).unwrap();

        server.run_once().unwrap();

        assert!(server.registry.find(&client_addr).is_some());

        client.set_read_timeout(Some(std::time::Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        let synack = Segment::decode(&buf[..n]).unwrap();
        assert!(synack.is_syn() && synack.is_ack());
        assert_eq!(synack.ack_num, 1001);
    }

    #[test]
    fn fin_removes_peer_and_replies_finack() {
        let mut server = Server::bind((Ipv4Addr::LOCALHOST, 0), 4).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let client_addr = client.local_addr().unwrap();

        server.registry.add(client_addr, Instant::now()).unwrap();

        let fin = Segment::new(client_addr.port(), server_addr.port(), 2000, 0, FIN);
        client.send_to(&fin.encode(), server_addr).unwrap();
        server.run_once().unwrap();

        assert!(server.registry.find(&client_addr).is_none());

        client.set_read_timeout(Some(std::time::Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        let reply = Segment::decode(&buf[..n]).unwrap();
        assert!(reply.is_fin() && reply.is_ack());
        assert_eq!(reply.ack_num, 2001);
    }

    #[test]
    fn unregistered_psh_is_dropped_without_reply() {
        let mut server = Server::bind((Ipv4Addr::LOCALHOST, 0), 4).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let client_addr = client.local_addr().unwrap();

        let psh = Segment::new(client_addr.port(), server_addr.port(), 3000, 0, crate::consts::PSH)
            .with_payload(b"hi");
        client.send_to(&psh.encode(), server_addr).unwrap();
        server.run_once().unwrap();

        client
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(client.recv_from(&mut buf).is_err());
    }
}
