use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub mod f1_enum;
pub mod inbound;
pub mod outbound;
mod parser;
pub mod registry;

/// Size of the header which prefixes every datagram, in bytes.
pub const HEADER_SIZE: usize = 29;
/// Number of car slots carried by every per-car packet.
pub const NUM_CARS: usize = 22;
/// Car index used by the game when the local player is spectating.
pub const SPECTATOR_INDEX: u8 = 255;

pub use inbound::*;
pub use outbound::*;
pub use registry::{Entry, Field, FormatRegistry, Layout};

/// Wire format revision, as carried in the `packetFormat` header field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    F1_24,
    F1_25,
}

impl ProtocolVersion {
    pub const SUPPORTED: [ProtocolVersion; 2] = [ProtocolVersion::F1_24, ProtocolVersion::F1_25];

    pub fn from_wire(value: u16) -> Option<ProtocolVersion> {
        match value {
            2024 => Some(ProtocolVersion::F1_24),
            2025 => Some(ProtocolVersion::F1_25),
            _ => None,
        }
    }

    pub fn wire(self) -> u16 {
        match self {
            ProtocolVersion::F1_24 => 2024,
            ProtocolVersion::F1_25 => 2025,
        }
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PacketKind {
    Motion,
    Session,
    LapData,
    Event,
    Participants,
    CarSetups,
    CarTelemetry,
    CarStatus,
    FinalClassification,
    LobbyInfo,
    CarDamage,
    SessionHistory,
    TyreSets,
    MotionEx,
    TimeTrial,
    LapPositions,
}

impl PacketKind {
    pub const ALL: [PacketKind; 16] = [
        PacketKind::Motion,
        PacketKind::Session,
        PacketKind::LapData,
        PacketKind::Event,
        PacketKind::Participants,
        PacketKind::CarSetups,
        PacketKind::CarTelemetry,
        PacketKind::CarStatus,
        PacketKind::FinalClassification,
        PacketKind::LobbyInfo,
        PacketKind::CarDamage,
        PacketKind::SessionHistory,
        PacketKind::TyreSets,
        PacketKind::MotionEx,
        PacketKind::TimeTrial,
        PacketKind::LapPositions,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(value)
    }
}

impl Display for PacketKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unsupported packet format `{0}`")]
    UnsupportedFormat(u16),
    #[error("Unrecognised packet id `{id}` for format {format}")]
    UnknownPacketKind { format: ProtocolVersion, id: u8 },
    #[error("Truncated buffer, expected {expected} bytes but got {actual}")]
    TruncatedBuffer { expected: usize, actual: usize },
    #[error("Malformed {kind} packet: {detail}")]
    Malformed { kind: PacketKind, detail: String },
}

impl DecodeError {
    /// Unknown packet kinds are expected from newer game builds and are not worth reporting.
    pub fn is_benign(&self) -> bool {
        matches!(self, DecodeError::UnknownPacketKind { .. })
    }
}

/// Decode a single datagram using the built-in layouts for every supported format.
pub fn decode(input: &[u8]) -> Result<Packet, DecodeError> {
    FormatRegistry::standard().decode(input)
}
