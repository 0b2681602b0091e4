use std::time::Duration;

/// Size of the fixed-layout wire segment, in bytes.
pub const SEGMENT_SIZE: usize = 64;
/// Bytes available for payload within one segment.
pub const MAX_PAYLOAD_SIZE: usize = 44;

// Control flags.
pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;
pub const URG: u8 = 0x20;

/// Header length in 32-bit words (20-byte header, no options).
pub const DEFAULT_DATA_OFFSET: u8 = 5;

/// Default address the substrate binds/connects to when none is given.
pub const DEFAULT_ADDR: &str = "127.0.0.1:12345";

// Flow control.
pub const MAX_RETRANSMISSIONS: u32 = 5;
pub const FLOW_CONTROL_TIMEOUT: Duration = Duration::from_secs(2);
pub const CONGESTION_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

// Congestion control.
pub const SSTHRESH_INITIAL: u32 = 65535;
pub const DUPLICATE_ACK_THRESHOLD: u32 = 3;

// Connection lifecycle.
pub const TIMEOUT_SEC: Duration = Duration::from_secs(2);
pub const MAX_RETRIES: u32 = 3;

// Peer registry.
pub const TIMEOUT_HEARTBEAT: Duration = Duration::from_secs(30);
pub const DEFAULT_REGISTRY_CAPACITY: usize = 100;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
