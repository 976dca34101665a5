//! # Peer Hub Test Suite
//!
//! Multi-node scenarios run over loopback QUIC. Every hub in a test binds
//! `127.0.0.1:0`, so scenarios run in parallel without port coordination.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── harness.rs        # Node start-up, inboxes, polling
//! │   └── integration/
//! │       ├── delivery.rs     # Send, mass send, large frames, reconnect
//! │       ├── registration.rs # Forged records, rediscovery
//! │       └── boundary.rs     # Queue draining and eviction
//! └── benches/
//!     └── hub_benchmarks.rs # Codec, verify, queue throughput
//! ```
//!
//! ## Running
//!
//! ```bash
//! cargo test -p hub-tests
//! cargo bench -p hub-tests
//! ```

pub mod harness;
pub mod integration;
