//! # Hub FFI
//!
//! C ABI over [`peer_hub::PeerHub`], built as `libhub`.
//!
//! Two surfaces:
//!
//! - **Handle façade** (`hub_new`, `hub_get_id`, `hub_register`,
//!   `hub_set_stream_handler`, `hub_send_message_to_peer`, `hub_stop`,
//!   `hub_free`): any number of hubs, each behind an opaque pointer.
//! - **Boundary functions** (`StartHub`, `TestStartHub`, `SendMessage`,
//!   `GetMessages`, `StopHub`, `LogLevel`): one process-wide hub whose inbound frames are
//!   drained by polling.
//!
//! The library owns its tokio runtime; callers never need one. No exported
//! function unwinds: failures are logged and reported as sentinels.

mod config;
mod errors;
mod runtime;

pub mod boundary;
pub mod handle;

pub use errors::FfiError;
