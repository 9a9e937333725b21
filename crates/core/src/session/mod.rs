//! Tx and rx sessions.
//!
//! A session owns one worker thread and the ring it shares with the
//! transport. The transport drives it through the callback traits in
//! [`crate::transport`]; the worker only touches frame data.
//!
//! | Type        | Tx worker                        | Rx worker                     |
//! |-------------|----------------------------------|-------------------------------|
//! | Frame-level | copies whole units into slots    | drains delivered frames       |
//! | Slice-level | publishes early, fills in slices | same, plus slice progress     |
//! | RTP-level   | builds packets itself            | depacketizes packets itself   |
//!
//! ## Lifecycle
//!
//! ```text
//! start() -> worker running -> stop() / ShutdownToken::trigger() -> joined
//! ```
//!
//! `stop()` hands the frame arena back so rx output can be saved.

pub mod rx;
pub mod tx;
mod wake;

use std::fmt;

pub use rx::RxSession;
pub use tx::TxSession;

/// How a session exchanges data with its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionType {
    /// Whole frames through the slot ring.
    #[default]
    FrameLevel,
    /// Frames published before they are complete, tracked by lines ready.
    SliceLevel,
    /// Individual RTP packets, packetized by the session itself.
    RtpLevel,
}

impl SessionType {
    pub const ALL: [SessionType; 3] = [Self::FrameLevel, Self::SliceLevel, Self::RtpLevel];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "frame" | "frame-level" => Some(Self::FrameLevel),
            "slice" | "slice-level" => Some(Self::SliceLevel),
            "rtp" | "rtp-level" => Some(Self::RtpLevel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameLevel => "frame",
            Self::SliceLevel => "slice",
            Self::RtpLevel => "rtp",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for t in SessionType::ALL {
            assert_eq!(SessionType::from_name(t.name()), Some(t));
        }
        assert_eq!(SessionType::from_name("RTP-Level"), Some(SessionType::RtpLevel));
        assert_eq!(SessionType::from_name("packet"), None);
    }
}
