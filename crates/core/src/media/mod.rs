//! Raw video formats and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and the RFC 4175
//! implementation that turns uncompressed frames into RTP packets and back.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each video frame (or field, for interlaced video) is one *transmission
//! unit*, split into a few thousand RTP packets. Every packet carries a
//! 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number**: low 16 bits of a 32-bit counter, the high half
//!   rides in the RFC 4175 payload header.
//! - **Timestamp** (32-bit): 90 kHz media clock, constant within a unit.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of a unit.
//!
//! ## Payload formats
//!
//! | Format | Module | Spec | Status |
//! |--------|--------|------|--------|
//! | Raw video | [`rfc4175`] | [RFC 4175](https://tools.ietf.org/html/rfc4175), SMPTE ST 2110-20 | Implemented |
//!
//! Pixel formats and frame rates live in [`format`]; SDP generation in
//! [`sdp`].

pub mod format;
pub mod rfc4175;
pub mod rtp;
pub mod sdp;

use rfc4175::PacketDescriptor;

/// RTP packetizer for one sending session.
///
/// Implementations provide:
/// - **Packetization**: one packet at a time, into a caller-owned buffer
/// - **SDP attributes**: `a=rtpmap` and `a=fmtp` lines for the stream
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The RTP fixed header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Write the next packet of `unit` into `out` (cleared first).
    ///
    /// The returned descriptor's `marker` is set on the last packet of the
    /// unit; the next call starts the following unit.
    fn build_packet(&mut self, unit: &[u8], out: &mut Vec<u8>) -> PacketDescriptor;

    /// Packets in one transmission unit.
    fn packets_per_unit(&self) -> u32;

    /// Packetize a whole unit into freshly allocated packets.
    fn packetize(&mut self, unit: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(self.packets_per_unit() as usize);
        loop {
            let mut out = Vec::new();
            let descriptor = self.build_packet(unit, &mut out);
            packets.push(out);
            if descriptor.marker {
                return packets;
            }
        }
    }

    /// Encoding name for the SDP `a=rtpmap` attribute.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz (90 kHz for video).
    fn clock_rate(&self) -> u32;

    /// RTP payload type number.
    ///
    /// Dynamic types use 96–127. ST 2110-20 senders conventionally use 112.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines, `a=` prefix included.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Full 32-bit sequence number of the next packet.
    fn next_sequence(&self) -> u32;

    /// RTP timestamp the next unit will carry.
    fn next_rtp_timestamp(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::{Fps, PixelFormat, VideoGeometry};
    use rfc4175::{PackingMode, PackingPlan, Rfc4175Packetizer};

    #[test]
    fn packetize_emits_one_unit() {
        let g = VideoGeometry {
            width: 640,
            height: 4,
            format: PixelFormat::Yuv422_10bit,
            fps: Fps::P25,
            interlaced: false,
        };
        let plan = PackingPlan::new(640, 4, g.pixel_group(), 1332, PackingMode::General).unwrap();
        let mut p: Box<dyn Packetizer> =
            Box::new(Rfc4175Packetizer::new(plan, rtp::RtpHeader::new(112, 9), g));
        let unit = vec![1u8; g.frame_size()];

        let packets = p.packetize(&unit);
        assert_eq!(packets.len(), p.packets_per_unit() as usize);
        assert_eq!(packets.last().unwrap()[1] & 0x80, 0x80);
        assert_eq!(p.next_sequence(), packets.len() as u32);
        assert_eq!(p.next_rtp_timestamp(), 3600);
    }
}
