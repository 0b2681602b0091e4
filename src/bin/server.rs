use std::process::ExitCode;

use clap::Parser;
use log::error;

use rudp::{Server, DEFAULT_ADDR};

/// Reliable-transport echo server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind and listen on.
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Maximum number of concurrently registered peers.
    #[arg(short, long, default_value_t = rudp::DEFAULT_REGISTRY_CAPACITY)]
    capacity: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut server = match Server::bind(&args.addr, args.capacity) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind {}: {e}", args.addr);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        error!("server loop exited: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
