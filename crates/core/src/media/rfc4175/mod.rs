//! RFC 4175 payload format for uncompressed video, as profiled by
//! SMPTE ST 2110-20.
//!
//! ## Packet layout
//!
//! ```text
//! +---------------------------+
//! | RTP fixed header (12)     |  V=2, M = last packet of the frame
//! +---------------------------+
//! | Extended sequence (2)     |  high 16 bits of the 32-bit sequence
//! +---------------------------+
//! | SRD 1: length|F+row|C+off |  6 bytes
//! +---------------------------+
//! | SRD 2 (only if C set)     |  6 bytes, C always 0
//! +---------------------------+
//! | segment 1 bytes           |
//! | segment 2 bytes           |
//! +---------------------------+
//! ```
//!
//! A sample row data header (SRD) describes one contiguous run of bytes
//! inside one row: its length in bytes, the row number, and the offset of
//! its first pixel. The F bit (top bit of the row number) marks rows of the
//! second field of an interlaced frame. The C bit (top bit of the offset)
//! announces another SRD.
//!
//! [`packetizer`] builds these packets from a frame buffer;
//! [`depacketizer`] writes them back into one.

pub mod depacketizer;
pub mod packetizer;

use crate::error::{PacketErrorKind, Result, St20Error};
use crate::media::rtp::{RTP_HEADER_LEN, RtpFields};

pub use depacketizer::{Depacketizer, FrameSummary, PacketOutcome};
pub use packetizer::{PacketDescriptor, PackingMode, PackingPlan, Rfc4175Packetizer, RowSegment};

/// Bytes in one sample row data header.
pub const SRD_LEN: usize = 6;

/// RTP fixed header + extended sequence + first SRD.
pub const RFC4175_HEADER_LEN: usize = RTP_HEADER_LEN + 2 + SRD_LEN;

/// Default RTP payload type for ST 2110-20 video.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 112;

/// Fixed payload length used by byte-packing mode (ST 2110-20 BPM).
pub const BPM_PAYLOAD_LEN: usize = 1260;

const SECOND_FIELD_BIT: u16 = 0x8000;
const CONTINUATION_BIT: u16 = 0x8000;
const ROW_MASK: u16 = 0x7fff;

/// One sample row data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRowData {
    /// Bytes of payload belonging to this segment.
    pub length: u16,
    /// Row number, without the field bit.
    pub row: u16,
    /// Offset of the first pixel in the row, without the continuation bit.
    pub offset: u16,
    pub second_field: bool,
    pub continuation: bool,
}

impl SampleRowData {
    pub fn write(&self, out: &mut Vec<u8>) {
        let row = (self.row & ROW_MASK) | if self.second_field { SECOND_FIELD_BIT } else { 0 };
        let offset =
            (self.offset & ROW_MASK) | if self.continuation { CONTINUATION_BIT } else { 0 };
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&row.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
    }

    /// Parse a header from the first [`SRD_LEN`] bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let b = buf
            .get(..SRD_LEN)
            .ok_or(St20Error::malformed(PacketErrorKind::Truncated))?;
        let row = u16::from_be_bytes([b[2], b[3]]);
        let offset = u16::from_be_bytes([b[4], b[5]]);
        Ok(Self {
            length: u16::from_be_bytes([b[0], b[1]]),
            row: row & ROW_MASK,
            offset: offset & ROW_MASK,
            second_field: row & SECOND_FIELD_BIT != 0,
            continuation: offset & CONTINUATION_BIT != 0,
        })
    }
}

/// A received RFC 4175 packet, borrowed from the datagram.
#[derive(Debug, Clone, Copy)]
pub struct Rfc4175Packet<'a> {
    pub rtp: RtpFields,
    pub extended_sequence: u16,
    pub first: (SampleRowData, &'a [u8]),
    pub second: Option<(SampleRowData, &'a [u8])>,
}

impl<'a> Rfc4175Packet<'a> {
    /// Split a datagram into headers and payload segments.
    ///
    /// Fails with [`PacketErrorKind::ShortPayload`] if the SRD lengths add up
    /// to more bytes than the datagram carries. Trailing bytes beyond the
    /// claimed lengths are ignored.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let rtp = RtpFields::parse(buf)?;
        if buf.len() < RFC4175_HEADER_LEN {
            return Err(St20Error::malformed(PacketErrorKind::Truncated));
        }
        let extended_sequence = u16::from_be_bytes([buf[RTP_HEADER_LEN], buf[RTP_HEADER_LEN + 1]]);
        let srd1 = SampleRowData::parse(&buf[RTP_HEADER_LEN + 2..])?;

        let mut header_len = RFC4175_HEADER_LEN;
        let srd2 = if srd1.continuation {
            let srd = SampleRowData::parse(&buf[header_len..])?;
            header_len += SRD_LEN;
            Some(srd)
        } else {
            None
        };

        let payload = &buf[header_len..];
        let len1 = srd1.length as usize;
        let len2 = srd2.map_or(0, |s| s.length as usize);
        if payload.len() < len1 + len2 {
            return Err(St20Error::malformed(PacketErrorKind::ShortPayload {
                claimed: len1 + len2,
                actual: payload.len(),
            }));
        }

        Ok(Self {
            rtp,
            extended_sequence,
            first: (srd1, &payload[..len1]),
            second: srd2.map(|s| (s, &payload[len1..len1 + len2])),
        })
    }

    /// Full 32-bit sequence number.
    pub fn sequence(&self) -> u32 {
        ((self.extended_sequence as u32) << 16) | self.rtp.sequence as u32
    }

    /// Total payload bytes across both segments.
    pub fn payload_len(&self) -> usize {
        self.first.1.len() + self.second.map_or(0, |(_, d)| d.len())
    }
}
