//! Ingestion core for the F1 24/25 UDP telemetry protocol.
//!
//! Datagrams from each rig are decoded by [`protocol::decode`], applied to that rig's
//! [`RigSession`] by a worker owned by the [`SessionManager`], and turned into lap records for the
//! [`LeaderboardEngine`] and snapshots for the [`Broadcaster`]. Raw traffic can be captured with a
//! [`Recorder`] and fed back through the same path by a [`Player`].

pub mod broadcast;
pub mod config;
pub mod leaderboard;
pub mod manager;
pub mod protocol;
pub mod recording;
pub mod session;
pub mod simulator;
pub mod source;

pub use broadcast::{Broadcaster, Subscription};
pub use config::{BackoffConfig, Config, ConfigError, RigConfig};
pub use leaderboard::{
    JsonLinesStore, LeaderboardEngine, LeaderboardError, LeaderboardStore, MemoryStore, Scope,
};
pub use manager::{ManagerError, RigStats, SessionManager};
pub use protocol::{decode, DecodeError, Packet, PacketKind, ProtocolVersion};
pub use recording::{PlaybackOptions, Player, Recorder, Recording, RecordingError};
pub use session::{
    LapRecord, LapStats, Lifecycle, RigSession, RigSnapshot, SessionError, SessionEvent,
};
pub use source::{Frame, FrameSource, SourceError, UdpSource};
