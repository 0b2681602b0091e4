mod client;
mod congestion;
mod consts;
mod err;
mod flow;
mod registry;
mod segment;
mod server;

pub use client::Client;
pub use congestion::{CongestionState, Phase};
pub use consts::*;
pub use err::Error;
pub use flow::FlowState;
pub use registry::{ConnectionControl, PeerRecord, PeerState, Registry};
pub use segment::{compute_checksum, Segment};
pub use server::Server;
