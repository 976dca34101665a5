//! Domain layer: frames, registration records, the registry and the
//! boundary queue. No network I/O.

pub mod boundary_queue;
pub mod dedup;
pub mod frame;
pub mod pending;
pub mod registration;
pub mod registry;

pub use boundary_queue::{split_drained, BoundaryQueue, PushOutcome, ENTRY_PREFIX_LEN};
pub use dedup::{RecentMessages, SharedRecentMessages};
pub use frame::{Ack, Frame, FrameError, FrameKind, FRAME_HEADER_LEN};
pub use pending::{PendingSend, Recipient, Scheduled};
pub use registration::{Announcement, RegistrationRecord};
pub use registry::{InstallOutcome, PeerRegistry};
