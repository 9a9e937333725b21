//! Error types for the ST 2110-20 packetization core.

use std::fmt;

use crate::frame::{SlotIndex, SlotState};
use crate::session::SessionType;

/// Errors that can occur in the packetization core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transient**: [`ResourceExhausted`](Self::ResourceExhausted). No free
///   slot, no ready frame or a full packet pool. The caller retries.
/// - **Per packet**: [`OffsetOutOfRange`](Self::OffsetOutOfRange),
///   [`MalformedPacket`](Self::MalformedPacket). The packet is dropped and the
///   session continues.
/// - **Per frame**: [`SlotBusy`](Self::SlotBusy). The received frame is
///   dropped and its buffer goes straight back to the transport.
/// - **Setup**: [`ConfigInvalid`](Self::ConfigInvalid), [`Io`](Self::Io). Session
///   creation fails.
/// - **Programming errors**: [`InvalidSlotState`](Self::InvalidSlotState),
///   [`UnknownSlot`](Self::UnknownSlot), [`Unsupported`](Self::Unsupported).
#[derive(Debug, thiserror::Error)]
pub enum St20Error {
    /// Underlying I/O error while loading or saving a frame file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No slot, frame or packet buffer is available right now.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A packet header points outside the destination frame.
    #[error("offset {offset} + length {length} exceeds frame size {frame_size}")]
    OffsetOutOfRange {
        offset: usize,
        length: usize,
        frame_size: usize,
    },

    /// The receive ring's producer slot still holds an undrained frame.
    #[error("receive slot {slot} still holds an unconsumed frame")]
    SlotBusy { slot: SlotIndex },

    /// Session configuration rejected at setup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A slot index outside the ring.
    #[error("slot {slot} does not exist (ring holds {capacity})")]
    UnknownSlot { slot: SlotIndex, capacity: usize },

    /// A slot transition was requested from the wrong state.
    #[error("slot {slot} is {actual:?}, expected {expected:?}")]
    InvalidSlotState {
        slot: SlotIndex,
        expected: SlotState,
        actual: SlotState,
    },

    /// An inbound packet could not be parsed.
    #[error("malformed packet: {kind}")]
    MalformedPacket { kind: PacketErrorKind },

    /// A callback was invoked on a session type that does not serve it.
    #[error("{operation} is not available on a {session_type}-level session")]
    Unsupported {
        session_type: SessionType,
        operation: &'static str,
    },
}

/// Specific kind of packet parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketErrorKind {
    /// Fewer bytes than the fixed headers require.
    Truncated,
    /// RTP version field is not 2.
    BadVersion(u8),
    /// Payload type differs from the session's.
    PayloadType { expected: u8, actual: u8 },
    /// The row lengths claim more payload than the packet carries.
    ShortPayload { claimed: usize, actual: usize },
}

impl fmt::Display for PacketErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated header"),
            Self::BadVersion(v) => write!(f, "unsupported RTP version {v}"),
            Self::PayloadType { expected, actual } => {
                write!(f, "payload type {actual}, expected {expected}")
            }
            Self::ShortPayload { claimed, actual } => {
                write!(f, "row lengths claim {claimed} bytes, payload has {actual}")
            }
        }
    }
}

impl St20Error {
    pub(crate) fn malformed(kind: PacketErrorKind) -> Self {
        Self::MalformedPacket { kind }
    }
}

/// Convenience alias for `Result<T, St20Error>`.
pub type Result<T> = std::result::Result<T, St20Error>;
