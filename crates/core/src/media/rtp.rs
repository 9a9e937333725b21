use rand::RngExt;

use crate::error::{PacketErrorKind, Result, St20Error};

/// Length of the RTP fixed header.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header state for one sending session (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |   Sequence Number (low 16)    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// RFC 4175 widens the sequence number to 32 bits: the low half lives in
/// the fixed header, the high half in the payload header that follows.
/// This struct keeps the full 32-bit counter and hands out both halves.
///
/// The timestamp is set once per transmission unit from the media clock,
/// so every packet of a frame (or field) carries the same value.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, dynamic range).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u32,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::rng().random::<u32>())
    }

    /// Full 32-bit sequence number of the next packet.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Stamp all following packets with `ts` (90 kHz media clock).
    pub fn set_timestamp(&mut self, ts: u32) {
        self.timestamp = ts;
    }

    /// Append the 12-byte fixed header to `out` and advance the sequence.
    ///
    /// Returns the high 16 bits of the sequence number that was written,
    /// which the RFC 4175 payload header carries as the extended sequence.
    pub fn write(&mut self, marker: bool, out: &mut Vec<u8>) -> u16 {
        let seq = self.sequence;
        out.push(2 << 6);
        out.push(((marker as u8) << 7) | (self.pt & 0x7f));
        out.extend_from_slice(&(seq as u16).to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        (seq >> 16) as u16
    }
}

/// Fields of a received RTP fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpFields {
    pub marker: bool,
    pub payload_type: u8,
    /// Low 16 bits of the sequence number.
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpFields {
    /// Parse the fixed header at the front of `buf`.
    ///
    /// Only version 2 is accepted. ST 2110-20 senders never set CC or X, so
    /// the payload header is expected right after the 12 fixed bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(St20Error::malformed(PacketErrorKind::Truncated));
        }
        let version = buf[0] >> 6;
        if version != 2 {
            return Err(St20Error::malformed(PacketErrorKind::BadVersion(version)));
        }
        Ok(Self {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(112, 0xAABBCCDD)
    }

    fn written(h: &mut RtpHeader, marker: bool) -> Vec<u8> {
        let mut out = Vec::new();
        h.write(marker, &mut out);
        out
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = written(&mut h, false);
        assert_eq!(buf.len(), RTP_HEADER_LEN);
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        assert_eq!(written(&mut h, false)[1] & 0x80, 0);
        assert_eq!(written(&mut h, true)[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_type() {
        let mut h = make_header();
        assert_eq!(written(&mut h, false)[1] & 0x7f, 112);
    }

    #[test]
    fn extended_sequence_carries_high_half() {
        let mut h = make_header();
        h.sequence = 0x0001_FFFF;
        let mut out = Vec::new();
        let ext = h.write(false, &mut out);
        assert_eq!(ext, 0x0001);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 0xFFFF);

        out.clear();
        let ext = h.write(false, &mut out);
        assert_eq!(ext, 0x0002);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 0x0000);
    }

    #[test]
    fn sequence_wraps_at_32_bits() {
        let mut h = make_header();
        h.sequence = u32::MAX;
        let _ = written(&mut h, false);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn timestamp_is_sticky() {
        let mut h = make_header();
        h.set_timestamp(1501);
        let a = written(&mut h, false);
        let b = written(&mut h, true);
        assert_eq!(a[4..8], b[4..8]);
        assert_eq!(u32::from_be_bytes([a[4], a[5], a[6], a[7]]), 1501);
    }

    #[test]
    fn parse_written_header() {
        let mut h = make_header();
        h.set_timestamp(3003);
        let buf = written(&mut h, true);
        let f = RtpFields::parse(&buf).unwrap();
        assert!(f.marker);
        assert_eq!(f.payload_type, 112);
        assert_eq!(f.sequence, 0);
        assert_eq!(f.timestamp, 3003);
        assert_eq!(f.ssrc, 0xAABBCCDD);
    }

    #[test]
    fn parse_rejects_bad_version() {
        let mut buf = written(&mut make_header(), false);
        buf[0] = 1 << 6;
        assert!(matches!(
            RtpFields::parse(&buf),
            Err(St20Error::MalformedPacket {
                kind: PacketErrorKind::BadVersion(1)
            })
        ));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(matches!(
            RtpFields::parse(&[0x80; 11]),
            Err(St20Error::MalformedPacket {
                kind: PacketErrorKind::Truncated
            })
        ));
    }

    #[test]
    fn random_ssrc_differs() {
        let h1 = RtpHeader::with_random_ssrc(112);
        let h2 = RtpHeader::with_random_ssrc(112);
        assert_ne!(h1.ssrc, h2.ssrc);
    }
}
