//! Fixed 64-byte wire segment: encode/decode and the one's-complement
//! checksum. Pure — no I/O, no knowledge of the substrate.

use crate::consts::{
    ACK, DEFAULT_DATA_OFFSET, FIN, MAX_PAYLOAD_SIZE, PSH, RST, SEGMENT_SIZE, SYN, URG,
};
use crate::err::Error;

/// A single reliable-transport segment.
///
/// `payload` holds only the logical bytes; `encode` zero-pads it to
/// [`MAX_PAYLOAD_SIZE`] and `decode` recovers the length via the first NUL
/// byte (or the full 44 bytes if none is present). This mirrors the
/// NUL-terminated convention the wire format inherited from the original C
/// implementation — it collides with payloads containing a `0x00` byte, but
/// adding an explicit length field would change the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(source_port: u16, dest_port: u16, seq_num: u32, ack_num: u32, flags: u8) -> Self {
        Segment {
            source_port,
            dest_port,
            seq_num,
            ack_num,
            flags,
            window_size: 0,
            checksum: 0,
            urgent_pointer: 0,
            payload: Vec::new(),
        }
    }

    pub fn with_window(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PAYLOAD_SIZE);
        self.payload = payload[..len].to_vec();
        self
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_syn(&self) -> bool {
        self.has_flag(SYN)
    }
    pub fn is_ack(&self) -> bool {
        self.has_flag(ACK)
    }
    pub fn is_fin(&self) -> bool {
        self.has_flag(FIN)
    }
    pub fn is_rst(&self) -> bool {
        self.has_flag(RST)
    }
    pub fn is_psh(&self) -> bool {
        self.has_flag(PSH)
    }
    pub fn is_urg(&self) -> bool {
        self.has_flag(URG)
    }

    /// Encodes this segment into a fixed 64-byte wire buffer, network byte
    /// order, with a freshly computed checksum.
    pub fn encode(&self) -> [u8; SEGMENT_SIZE] {
        let mut buf = [0u8; SEGMENT_SIZE];
        self.write_fields(&mut buf, 0);

        let checksum = compute_checksum(&buf);
        buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Writes every field except the checksum (left as whatever `checksum`
    /// argument is passed, normally zero) into `buf`.
    fn write_fields(&self, buf: &mut [u8; SEGMENT_SIZE], checksum: u16) {
        buf[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack_num.to_be_bytes());
        buf[12] = DEFAULT_DATA_OFFSET << 4;
        buf[13] = self.flags;
        buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let len = self.payload.len().min(MAX_PAYLOAD_SIZE);
        buf[20..20 + len].copy_from_slice(&self.payload[..len]);
        // Remaining payload bytes are already zero (NUL padding/terminator).
    }

    /// Decodes a received byte buffer into a `Segment`. Does not verify the
    /// checksum — call [`Segment::verify`] separately.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < SEGMENT_SIZE {
            return Err(Error::Malformed("buffer shorter than a segment"));
        }

        let reserved = buf[12] & 0x0F;
        if reserved != 0 {
            return Err(Error::Malformed("reserved bits must be zero"));
        }

        let source_port = u16::from_be_bytes([buf[0], buf[1]]);
        let dest_port = u16::from_be_bytes([buf[2], buf[3]]);
        let seq_num = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ack_num = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let flags = buf[13];
        let window_size = u16::from_be_bytes([buf[14], buf[15]]);
        let checksum = u16::from_be_bytes([buf[16], buf[17]]);
        let urgent_pointer = u16::from_be_bytes([buf[18], buf[19]]);

        let payload_field = &buf[20..20 + MAX_PAYLOAD_SIZE];
        let len = payload_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_PAYLOAD_SIZE);

        Ok(Segment {
            source_port,
            dest_port,
            seq_num,
            ack_num,
            flags,
            window_size,
            checksum,
            urgent_pointer,
            payload: payload_field[..len].to_vec(),
        })
    }

    /// Re-zeroes the checksum field, recomputes it, and compares against the
    /// value that was actually transmitted.
    pub fn verify(&self) -> bool {
        let mut buf = [0u8; SEGMENT_SIZE];
        self.write_fields(&mut buf, 0);
        compute_checksum(&buf) == self.checksum
    }
}

/// One's-complement sum of 16-bit words over the whole 64-byte record with
/// the checksum field zeroed, end-around carry, final complement.
///
/// `buf` must already have its checksum field (bytes 16..18) zeroed.
pub fn compute_checksum(buf: &[u8; SEGMENT_SIZE]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in buf.chunks_exact(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
