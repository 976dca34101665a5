//! Testhub: run one participant of the VAL/ECHO/READY emulation.
//!
//! ```text
//! testhub --config testhubconfig0.json
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use hub::boundary;
use hub_testhub::{Broadcast, Participant, RbcEmulation, TestHubConfig};
use peer_hub::domain::ENTRY_PREFIX_LEN;
use peer_hub::{split_drained, DEFAULT_MAX_QUEUED_PAYLOAD};

/// Drain buffer size: room for the largest frame the queue holds.
const BUF_SIZE: usize = ENTRY_PREFIX_LEN + DEFAULT_MAX_QUEUED_PAYLOAD;

/// Broadcast target sentinel: a zeroed account key.
const BROADCAST: [u8; 33] = [0u8; 33];

/// Time given to outgoing sends before stopping.
const LINGER: Duration = Duration::from_secs(3);

/// Idle wait between empty polls.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(name = "testhub")]
#[command(about = "Run one participant of a three-phase broadcast over the peer hub")]
struct Args {
    /// Participant config file
    #[arg(long, default_value = "testhubconfig0.json")]
    config: PathBuf,
}

/// Broadcasts through the process-wide boundary hub.
struct BoundaryNetwork;

impl Broadcast for BoundaryNetwork {
    fn broadcast(&mut self, payload: &[u8]) {
        if let Err(e) = boundary::send_message(&BROADCAST, payload) {
            warn!(error = %e, "Broadcast failed");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = TestHubConfig::load(&args.config)?;

    let fingerprint = boundary::start_hub(&config.bootstraps, &config.private_key)
        .context("failed to start hub")?;
    info!(idx = config.idx, port = config.port, %fingerprint, "Participant started");

    let rbc = RbcEmulation::new(config.idx, config.participants());
    let mut participant = Participant::new(rbc, BoundaryNetwork);
    participant.start()?;

    let mut buf = vec![0u8; BUF_SIZE];
    while !participant.is_ready() {
        let count = match boundary::get_messages(&mut buf) {
            Some(count) if count > 0 => count,
            // Empty, or only frames too large to deliver.
            _ => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        for payload in split_drained(&buf, count) {
            if let Err(e) = participant.deliver(payload) {
                warn!(error = %e, "Ignoring malformed message");
            }
        }
    }

    thread::sleep(LINGER);
    boundary::stop_hub();
    info!(idx = config.idx, "Hub finished");
    Ok(())
}
