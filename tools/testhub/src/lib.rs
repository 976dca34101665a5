//! # Testhub
//!
//! A validator-network smoke test built on the hub's boundary functions.
//!
//! Every participant broadcasts a VAL, answers each VAL with an ECHO and,
//! once it has seen an ECHO from every participant for every VAL, broadcasts
//! READY. A participant is done when it has seen READY from everyone.

pub mod config;
pub mod rbc;

pub use config::TestHubConfig;
pub use rbc::{Broadcast, Participant, RbcEmulation, RbcMessage};
