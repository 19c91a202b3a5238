// CLI entry point for the Parley chat relay.
//
// Starts a standalone relay that chat clients connect to over WebSocket. The
// relay numbers messages, broadcasts them, and replays history on request.
// See `server.rs` for the networking architecture and `session.rs` for the
// protocol handling.
//
// Usage:
//   relay [OPTIONS]
//     --host <HOST>               Bind address (default: 0.0.0.0)
//     --port <PORT>               Listen port (default: 4000)
//     --outbox-capacity <N>       Frames queued per client before eviction (default: 1024)
//     --poll-interval-ms <MS>     Connection read poll interval (default: 20)
//
// Logging goes through `env_logger`; set `RUST_LOG=debug` for per-connection
// detail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use parley_relay::server::{RelayConfig, start_relay};

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "WebSocket chat relay with history resync")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "PARLEY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PARLEY_PORT", default_value_t = 4000)]
    port: u16,

    /// Frames a client may have queued before it is disconnected.
    #[arg(long, env = "PARLEY_OUTBOX_CAPACITY", default_value_t = 1024)]
    outbox_capacity: usize,

    /// Read poll interval of each connection thread, in milliseconds.
    #[arg(long, default_value_t = 20)]
    poll_interval_ms: u64,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        RelayConfig {
            host: args.host,
            port: args.port,
            outbox_capacity: args.outbox_capacity,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from(Args::parse());

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    if let Err(e) = ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst)) {
        warn!("could not install Ctrl+C handler: {e}");
    }

    info!("serving chat on ws://{addr}; press Ctrl+C to stop");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    handle.stop();
}
