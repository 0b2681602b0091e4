//! Client-side connection: three-way open, data transfer, four-way close.
//! Grounded on `client_socket.c`'s handshake retry loop, paired with
//! `flow.rs`/`congestion.rs` for the data phase instead of the original's
//! un-implemented `<Data exchange>` placeholder.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::congestion::CongestionState;
use crate::consts::{ACK, FIN, MAX_PAYLOAD_SIZE, MAX_RETRIES, SYN, TIMEOUT_SEC};
use crate::err::Error;
use crate::flow::FlowState;
use crate::segment::Segment;

/// An established connection to a peer, ready for `send`/`recv`/`close`.
pub struct Client {
    socket: UdpSocket,
    flow: FlowState,
    congestion: CongestionState,
}

impl Client {
    /// Performs the three-way open against `server_addr` over `socket`,
    /// randomising the initial sequence number.
    pub fn connect<A: ToSocketAddrs>(socket: UdpSocket, server_addr: A) -> Result<Self, Error> {
        let server_addr = server_addr
            .to_socket_addrs()?
            .next()
            .ok_or(Error::Malformed("no address resolved"))?;

        let local_port = socket.local_addr()?.port();
        let remote_port = server_addr.port();

        let s0: u32 = rand::thread_rng().gen();
        let syn = Segment::new(local_port, remote_port, s0, 0, SYN);

        socket.set_read_timeout(Some(TIMEOUT_SEC))?;

        for attempt in 0..MAX_RETRIES {
            socket.send_to(&syn.encode(), server_addr)?;
            debug!("sent SYN seq={s0} (attempt {})", attempt + 1);

            let mut buf = [0u8; 64];
            let synack = match socket.recv_from(&mut buf) {
                Ok((n, from)) if from == server_addr => match Segment::decode(&buf[..n]) {
                    Ok(seg) if seg.verify() => seg,
                    _ => {
                        warn!("malformed or corrupt reply during handshake, retrying");
                        continue;
                    }
                },
                Ok(_) => continue,
                Err(e) if would_block_or_timed_out(&e) => {
                    debug!("handshake timeout, retry {}/{}", attempt + 1, MAX_RETRIES);
                    continue;
                }
                Err(e) => return Err(Error::Substrate(e)),
            };

            if !(synack.is_syn() && synack.is_ack()) {
                warn!("expected SYN|ACK, got flags={:#x}", synack.flags);
                continue;
            }

            let final_ack = Segment::new(
                local_port,
                remote_port,
                synack.ack_num,
                synack.seq_num.wrapping_add(1),
                ACK,
            );
            socket.send_to(&final_ack.encode(), server_addr)?;
            info!("handshake complete, connected to {server_addr}");

            let flow = FlowState::new(synack.ack_num, local_port, remote_port, server_addr);
            let congestion = CongestionState::new(MAX_PAYLOAD_SIZE as u32);
            return Ok(Client {
                socket,
                flow,
                congestion,
            });
        }

        Err(Error::HandshakeFailed)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.flow.send(&self.socket, &mut self.congestion, data)
    }

    pub fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        self.flow.recv(&self.socket, buffer, timeout)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.flow.peer_addr
    }

    /// Four-way close, initiated by this side: FIN, await the
    /// combined FIN|ACK, send the final ACK. Retries up to `MAX_RETRIES`.
    pub fn close(mut self) -> Result<(), Error> {
        self.socket.set_read_timeout(Some(TIMEOUT_SEC))?;

        for attempt in 0..MAX_RETRIES {
            let fin = Segment::new(
                self.flow.local_port,
                self.flow.remote_port,
                self.flow.next_seq,
                self.flow.last_ack,
                FIN,
            );
            self.socket.send_to(&fin.encode(), self.flow.peer_addr)?;
            debug!("sent FIN (attempt {})", attempt + 1);

            let mut buf = [0u8; 64];
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) if from == self.flow.peer_addr => {
                    let seg = match Segment::decode(&buf[..n]) {
                        Ok(seg) if seg.verify() => seg,
                        _ => continue,
                    };

                    if seg.is_fin() && seg.is_ack() {
                        let final_ack = Segment::new(
                            self.flow.local_port,
                            self.flow.remote_port,
                            seg.ack_num,
                            seg.seq_num.wrapping_add(1),
                            ACK,
                        );
                        self.socket.send_to(&final_ack.encode(), self.flow.peer_addr)?;
                        info!("connection closed");
                        return Ok(());
                    }
                }
                Ok(_) => continue,
                Err(e) if would_block_or_timed_out(&e) => continue,
                Err(e) => return Err(Error::Substrate(e)),
            }
        }

        Err(Error::HandshakeFailed)
    }
}

fn would_block_or_timed_out(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
