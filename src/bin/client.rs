use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use rudp::{Client, DEFAULT_ADDR};

/// Reliable-transport echo client: connects, sends one message, prints the
/// echoed reply, then closes.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address to connect to.
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    server: String,

    /// Message to send.
    #[arg(short, long, default_value = "hello")]
    message: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(e) => {
            error!("failed to bind local socket: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut client = match Client::connect(socket, &args.server) {
        Ok(client) => client,
        Err(e) => {
            error!("handshake with {} failed: {e}", args.server);
            return ExitCode::FAILURE;
        }
    };

    info!("connected to {}", client.peer_addr());

    if let Err(e) = client.send(args.message.as_bytes()) {
        error!("send failed: {e}");
        return ExitCode::FAILURE;
    }

    let mut buf = [0u8; 64];
    match client.recv(&mut buf, Duration::from_secs(2)) {
        Ok(n) => info!("echoed back: {:?}", String::from_utf8_lossy(&buf[..n])),
        Err(e) => error!("recv failed: {e}"),
    }

    if let Err(e) = client.close() {
        error!("close failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
