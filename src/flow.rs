//! Per-connection flow control: windowed, cumulative-ACK data transfer over
//! the datagram substrate. Grounded on `flow_control.c`'s
//! `send_data_with_flow_control`/`receive_data_with_flow_control`, adapted
//! from its `select`-based stop-and-wait loop to a blocking `UdpSocket` with
//! read timeouts (the core is a single-threaded cooperative loop, so a
//! blocking call with a deadline is equivalent to the C source's `select`
//! gate).

use std::cmp;
use std::net::{SocketAddr, UdpSocket};

use log::{debug, trace, warn};

use crate::congestion::CongestionState;
use crate::consts::{
    ACK, CONGESTION_WAIT_TIMEOUT, FLOW_CONTROL_TIMEOUT, MAX_PAYLOAD_SIZE, MAX_RETRANSMISSIONS, PSH,
};
use crate::err::Error;
use crate::segment::Segment;

/// Per-connection sliding-window bookkeeping. Pairs with a
/// [`CongestionState`] for the lifetime of the connection.
#[derive(Debug)]
pub struct FlowState {
    pub base_seq: u32,
    pub next_seq: u32,
    pub last_ack: u32,
    pub rwnd: u32,
    pub local_port: u16,
    pub remote_port: u16,
    pub peer_addr: SocketAddr,
    pub recv_window: u16,
}

impl FlowState {
    pub fn new(base_seq: u32, local_port: u16, remote_port: u16, peer_addr: SocketAddr) -> Self {
        FlowState {
            base_seq,
            next_seq: base_seq,
            // Nothing has been sent yet, so nothing is in flight: `last_ack`
            // starts level with `base_seq`, not zero (an all-zero start
            // would read a freshly opened connection as having a huge
            // in-flight backlog against `can_send`'s unsigned subtraction).
            last_ack: base_seq,
            rwnd: u16::MAX as u32,
            local_port,
            remote_port,
            peer_addr,
            recv_window: u16::MAX,
        }
    }

    /// Folds an inbound segment's ACK into this state: `last_ack` only ever
    /// moves forward, and `rwnd` tracks the peer's most recent advertisement.
    pub fn on_ack(&mut self, segment: &Segment) {
        if segment.ack_num > self.last_ack {
            self.last_ack = segment.ack_num;
        }
        self.rwnd = segment.window_size as u32;
    }

    fn effective_window(&self, congestion: &CongestionState) -> u32 {
        congestion.effective_window(self.rwnd)
    }

    /// Sends `data` to completion, driven by `congestion`. Returns the
    /// number of bytes delivered, which is always `data.len()` on success.
    pub fn send(
        &mut self,
        socket: &UdpSocket,
        congestion: &mut CongestionState,
        data: &[u8],
    ) -> Result<usize, Error> {
        let mut bytes_sent = 0usize;

        while bytes_sent < data.len() {
            let eff = self.effective_window(congestion);
            let remaining = data.len() - bytes_sent;
            let chunk = remaining.min(eff as usize).min(MAX_PAYLOAD_SIZE) as u32;

            if !congestion.can_send(self.next_seq, self.last_ack, chunk) {
                self.wait_for_ack_and_update(socket, congestion, CONGESTION_WAIT_TIMEOUT)?;
                continue;
            }

            let chunk = chunk as usize;
            bytes_sent += self.send_chunk_to_completion(
                socket,
                congestion,
                &data[bytes_sent..bytes_sent + chunk],
            )?;
        }

        Ok(bytes_sent)
    }

    /// Transmits one chunk, retransmitting on timeout up to
    /// `MAX_RETRANSMISSIONS`, until it is at least partially acknowledged.
    /// Returns the number of bytes the peer actually acknowledged.
    fn send_chunk_to_completion(
        &mut self,
        socket: &UdpSocket,
        congestion: &mut CongestionState,
        chunk: &[u8],
    ) -> Result<usize, Error> {
        let mut retransmissions = 0u32;

        'retransmit: loop {
            let segment = Segment::new(
                self.local_port,
                self.remote_port,
                self.next_seq,
                self.last_ack,
                PSH,
            )
            .with_window(congestion.effective_window(self.rwnd).min(u16::MAX as u32) as u16)
            .with_payload(chunk);

            socket.send_to(&segment.encode(), self.peer_addr)?;
            trace!(
                "sent PSH seq={} ack={} len={} cwnd={}",
                self.next_seq,
                self.last_ack,
                chunk.len(),
                congestion.cwnd
            );

            socket.set_read_timeout(Some(FLOW_CONTROL_TIMEOUT))?;
            loop {
                let mut buf = [0u8; 64];
                match socket.recv_from(&mut buf) {
                    Ok((n, from)) if from == self.peer_addr => {
                        let acked =
                            self.handle_ack_reply(&buf[..n], congestion, chunk.len() as u32);
                        if let Some(acked) = acked {
                            return Ok(acked as usize);
                        }
                        // Non-ACK or unverified segment: keep waiting within
                        // the same timeout budget.
                        continue;
                    }
                    Ok(_) => continue, // stray datagram from another peer
                    Err(e) if would_block_or_timed_out(&e) => {
                        retransmissions += 1;
                        debug!(
                            "ACK timeout for seq={}, retransmission {}/{}",
                            self.next_seq, retransmissions, MAX_RETRANSMISSIONS
                        );
                        if retransmissions >= MAX_RETRANSMISSIONS {
                            return Err(Error::TransferFailed);
                        }
                        congestion.on_timeout();
                        continue 'retransmit;
                    }
                    Err(e) => return Err(Error::Substrate(e)),
                }
            }
        }
    }

    /// Interprets one received buffer as a reply to an outstanding chunk.
    /// Returns `Some(acked_bytes)` once the cumulative ACK advances past
    /// `next_seq`, `None` if the segment should be ignored.
    fn handle_ack_reply(
        &mut self,
        buf: &[u8],
        congestion: &mut CongestionState,
        chunk_len: u32,
    ) -> Option<u32> {
        let segment = Segment::decode(buf).ok()?;
        if !segment.verify() {
            warn!("checksum mismatch on ACK reply, dropping");
            return None;
        }
        if !segment.is_ack() {
            return None;
        }

        self.on_ack(&segment);
        congestion.on_ack(segment.ack_num);

        if segment.ack_num > self.next_seq {
            let acked = cmp::min(segment.ack_num - self.next_seq, chunk_len);
            self.next_seq += acked;
            Some(acked)
        } else {
            None
        }
    }

    /// Used while blocked on the congestion gate: drains one
    /// incoming datagram, if any, and folds it into both control states.
    fn wait_for_ack_and_update(
        &mut self,
        socket: &UdpSocket,
        congestion: &mut CongestionState,
        timeout: std::time::Duration,
    ) -> Result<(), Error> {
        socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 64];
        match socket.recv_from(&mut buf) {
            Ok((n, from)) if from == self.peer_addr => {
                if let Ok(segment) = Segment::decode(&buf[..n]) {
                    if segment.verify() && segment.is_ack() {
                        self.on_ack(&segment);
                        congestion.on_ack(segment.ack_num);
                    }
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if would_block_or_timed_out(&e) => Ok(()),
            Err(e) => Err(Error::Substrate(e)),
        }
    }

    /// Waits for one data segment and ACKs it cumulatively. Returns the
    /// payload length, or 0 if the received segment carried no data.
    pub fn recv(
        &mut self,
        socket: &UdpSocket,
        buffer: &mut [u8],
        timeout: std::time::Duration,
    ) -> Result<usize, Error> {
        socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 64];

        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if would_block_or_timed_out(&e) => return Err(Error::Timeout),
            Err(e) => return Err(Error::Substrate(e)),
        };

        if from != self.peer_addr {
            return Ok(0);
        }

        let segment = match Segment::decode(&buf[..n]) {
            Ok(s) => s,
            Err(_) => return Ok(0),
        };
        if !segment.verify() {
            debug!("checksum mismatch on inbound segment, dropping");
            return Ok(0);
        }

        if !segment.is_psh() {
            return Ok(0);
        }

        let len = segment.payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&segment.payload[..len]);

        let ack_num = segment.seq_num.wrapping_add(len as u32);
        let ack = Segment::new(self.local_port, self.remote_port, self.next_seq, ack_num, ACK)
            .with_window(self.recv_window);
        socket.send_to(&ack.encode(), self.peer_addr)?;
        self.last_ack = ack_num;

        Ok(len)
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

    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let b = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        (a, b)
    }

    #[test]
    fn send_then_recv_one_chunk() {
        let (sender_sock, receiver_sock) = socket_pair();
        let receiver_addr = receiver_sock.local_addr().unwrap();
        let sender_addr = sender_sock.local_addr().unwrap();

        let mut sender = FlowState::new(1000, sender_addr.port(), receiver_addr.port(), receiver_addr);
        let mut receiver =
            FlowState::new(5000, receiver_addr.port(), sender_addr.port(), sender_addr);
        let mut congestion = CongestionState::new(MAX_PAYLOAD_SIZE as u32);

        let data = b"hello, reliable world";

        let send_thread = std::thread::spawn(move || {
            sender
                .send(&sender_sock, &mut congestion, data)
                .expect("send should succeed")
        });

        let mut buf = [0u8; 128];
        let n = receiver
            .recv(&receiver_sock, &mut buf, std::time::Duration::from_secs(2))
            .expect("recv should succeed");

        assert_eq!(&buf[..n], data);
        assert_eq!(send_thread.join().unwrap(), data.len());
    }

    #[test]
    fn recv_times_out_with_no_sender() {
        let receiver_sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let receiver_addr = receiver_sock.local_addr().unwrap();
        let mut receiver = FlowState::new(1, receiver_addr.port(), 1, receiver_addr);

        let mut buf = [0u8; 16];
        let result = receiver.recv(&receiver_sock, &mut buf, std::time::Duration::from_millis(50));
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn on_ack_is_monotonic_and_tracks_rwnd() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut flow = FlowState::new(0, 1, 2, addr);

        let seg = Segment::new(2, 1, 0, 100, ACK).with_window(4096);
        flow.on_ack(&seg);
        assert_eq!(flow.last_ack, 100);
        assert_eq!(flow.rwnd, 4096);

        let stale = Segment::new(2, 1, 0, 50, ACK).with_window(1);
        flow.on_ack(&stale);
        assert_eq!(flow.last_ack, 100, "ack must not regress");
        assert_eq!(flow.rwnd, 1, "rwnd follows the latest segment regardless");
    }
}
