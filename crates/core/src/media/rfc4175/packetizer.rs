//! RFC 4175 packetizer.
//!
//! The packing geometry is computed once per session by [`PackingPlan`].
//! After that, every packet is a pure function of its index within the
//! frame, so [`Rfc4175Packetizer::build_packet`] never fails and never
//! allocates beyond the caller's output buffer.
//!
//! ## Packing modes
//!
//! | Mode | Payload length | Rows per packet |
//! |------|----------------|-----------------|
//! | [`SingleLine`](PackingMode::SingleLine) | row split evenly, whole pixel groups | 1 |
//! | [`General`](PackingMode::General) | fixed budget, whole pixel groups | 1 or 2 |
//! | [`BytePacking`](PackingMode::BytePacking) | fixed 1260 bytes | 1 or 2 |
//!
//! In the two offset-based modes a packet that straddles a row boundary
//! carries a continuation header for the second row. A segment is never
//! emitted with zero length: a packet ending exactly on a row boundary has
//! a single segment.

use std::fmt;
use std::ops::Range;

use crate::error::{Result, St20Error};
use crate::frame::FrameSource;
use crate::media::Packetizer;
use crate::media::format::{PixelGroup, VIDEO_CLOCK_RATE, VideoGeometry};
use crate::media::rtp::RtpHeader;

use super::{BPM_PAYLOAD_LEN, RFC4175_HEADER_LEN, SRD_LEN, SampleRowData};

/// Payload layout of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackingMode {
    /// Every packet carries part of exactly one row (ST 2110-20 GPM_SL).
    SingleLine,
    /// Fixed-size packets that may span two rows (ST 2110-20 GPM).
    General,
    /// Fixed 1260-byte packets (ST 2110-20 BPM).
    #[default]
    BytePacking,
}

impl PackingMode {
    /// `PM=` value for the SDP fmtp line.
    pub fn sdp_name(&self) -> &'static str {
        match self {
            Self::SingleLine | Self::General => "2110GPM",
            Self::BytePacking => "2110BPM",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sl" | "single-line" => Some(Self::SingleLine),
            "gpm" | "general" => Some(Self::General),
            "bpm" | "byte-packing" => Some(Self::BytePacking),
            _ => None,
        }
    }
}

impl fmt::Display for PackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleLine => write!(f, "single-line"),
            Self::General => write!(f, "general"),
            Self::BytePacking => write!(f, "byte-packing"),
        }
    }
}

/// Per-session packing geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingPlan {
    pub mode: PackingMode,
    pub pixel_group: PixelGroup,
    pub width: u32,
    /// Rows per transmission unit (field height when interlaced).
    pub height: u32,
    pub bytes_per_line: usize,
    /// Bytes per transmission unit.
    pub frame_size: usize,
    /// Maximum payload bytes per packet (excluding headers).
    pub payload_len: usize,
    /// Single-line mode only: packets spanning each row.
    pub packets_per_line: u32,
    /// Single-line mode only: pixels carried by each full packet.
    pub pixels_per_packet: u32,
    pub total_packets: u32,
}

impl PackingPlan {
    /// Compute the packing geometry for a `width` × `height` unit.
    ///
    /// `max_payload_bytes` is the budget left after the 20-byte RTP and
    /// RFC 4175 headers; in the offset-based modes it also has to fit the
    /// continuation header.
    pub fn new(
        width: u32,
        height: u32,
        pixel_group: PixelGroup,
        max_payload_bytes: usize,
        mode: PackingMode,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(St20Error::ConfigInvalid(format!(
                "empty frame {width}x{height}"
            )));
        }
        if width % pixel_group.coverage != 0 {
            return Err(St20Error::ConfigInvalid(format!(
                "width {width} is not a multiple of the {}-pixel group",
                pixel_group.coverage
            )));
        }
        if width > u16::MAX as u32 >> 1 || height > u16::MAX as u32 >> 1 {
            return Err(St20Error::ConfigInvalid(format!(
                "{width}x{height} does not fit 15-bit row fields"
            )));
        }

        let size = pixel_group.size as usize;
        let bytes_per_line = pixel_group.bytes_per_line(width);
        let frame_size = bytes_per_line * height as usize;

        let mut plan = Self {
            mode,
            pixel_group,
            width,
            height,
            bytes_per_line,
            frame_size,
            payload_len: 0,
            packets_per_line: 0,
            pixels_per_packet: 0,
            total_packets: 0,
        };

        match mode {
            PackingMode::SingleLine => {
                if max_payload_bytes < size {
                    return Err(St20Error::ConfigInvalid(format!(
                        "payload budget {max_payload_bytes} is smaller than one pixel group"
                    )));
                }
                let coverage = pixel_group.coverage;
                let mut per_line = bytes_per_line.div_ceil(max_payload_bytes) as u32;
                let mut pixels = width.div_ceil(per_line).next_multiple_of(coverage);
                while pixel_group.pixel_offset_to_bytes(pixels) > max_payload_bytes {
                    per_line += 1;
                    pixels = width.div_ceil(per_line).next_multiple_of(coverage);
                }
                // rounding up may leave the last packet of a row empty
                per_line = width.div_ceil(pixels);

                plan.packets_per_line = per_line;
                plan.pixels_per_packet = pixels;
                plan.payload_len = pixel_group.pixel_offset_to_bytes(pixels);
                plan.total_packets = per_line * height;
            }
            PackingMode::General | PackingMode::BytePacking => {
                let payload_len = if mode == PackingMode::BytePacking {
                    if max_payload_bytes < BPM_PAYLOAD_LEN + SRD_LEN {
                        return Err(St20Error::ConfigInvalid(format!(
                            "byte packing needs a {} byte budget, have {max_payload_bytes}",
                            BPM_PAYLOAD_LEN + SRD_LEN
                        )));
                    }
                    if BPM_PAYLOAD_LEN % size != 0 {
                        return Err(St20Error::ConfigInvalid(format!(
                            "{BPM_PAYLOAD_LEN} bytes is not a whole number of {size}-byte groups"
                        )));
                    }
                    BPM_PAYLOAD_LEN
                } else {
                    // at most one row per packet, so a packet spans two rows at most
                    pixel_group
                        .align_down(max_payload_bytes.saturating_sub(SRD_LEN))
                        .min(bytes_per_line)
                };
                if payload_len == 0 {
                    return Err(St20Error::ConfigInvalid(format!(
                        "payload budget {max_payload_bytes} leaves no room for pixel data"
                    )));
                }
                if payload_len > bytes_per_line {
                    return Err(St20Error::ConfigInvalid(format!(
                        "{payload_len} byte packets would span more than two {bytes_per_line} byte rows"
                    )));
                }
                plan.payload_len = payload_len;
                plan.total_packets = frame_size.div_ceil(payload_len) as u32;
            }
        }

        tracing::debug!(
            mode = %mode,
            width,
            height,
            bytes_per_line,
            payload_len = plan.payload_len,
            packets_per_line = plan.packets_per_line,
            total_packets = plan.total_packets,
            "packing plan computed"
        );
        Ok(plan)
    }

    /// Row segments carried by packet `index` of a unit.
    pub fn segments(&self, index: u32) -> (RowSegment, Option<RowSegment>) {
        let pg = &self.pixel_group;
        match self.mode {
            PackingMode::SingleLine => {
                let row = index / self.packets_per_line;
                let offset = self.pixels_per_packet * (index % self.packets_per_line);
                let length = self
                    .payload_len
                    .min(pg.pixel_offset_to_bytes(self.width - offset));
                let seg = RowSegment {
                    row: row as u16,
                    offset: offset as u16,
                    length,
                    byte_offset: row as usize * self.bytes_per_line + pg.pixel_offset_to_bytes(offset),
                };
                (seg, None)
            }
            PackingMode::General | PackingMode::BytePacking => {
                let start = index as usize * self.payload_len;
                let total = self.payload_len.min(self.frame_size - start);
                let row = start / self.bytes_per_line;
                let in_row = start % self.bytes_per_line;
                let first_len = total.min(self.bytes_per_line - in_row);
                let first = RowSegment {
                    row: row as u16,
                    offset: pg.bytes_to_pixel_offset(in_row) as u16,
                    length: first_len,
                    byte_offset: start,
                };
                let second = (total > first_len).then(|| RowSegment {
                    row: (row + 1) as u16,
                    offset: 0,
                    length: total - first_len,
                    byte_offset: start + first_len,
                });
                (first, second)
            }
        }
    }
}

/// One contiguous run of bytes within one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSegment {
    pub row: u16,
    /// Offset of the first pixel in the row.
    pub offset: u16,
    /// Payload bytes.
    pub length: usize,
    /// Byte offset within the unit buffer.
    pub byte_offset: usize,
}

impl RowSegment {
    pub fn byte_range(&self) -> Range<usize> {
        self.byte_offset..self.byte_offset + self.length
    }
}

/// What [`Rfc4175Packetizer::build_packet`] just wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Full 32-bit sequence number.
    pub sequence: u32,
    pub timestamp: u32,
    /// Set on the last packet of a unit.
    pub marker: bool,
    pub second_field: bool,
    pub first: RowSegment,
    pub second: Option<RowSegment>,
    /// Total bytes written, headers included.
    pub len: usize,
}

impl PacketDescriptor {
    pub fn payload_len(&self) -> usize {
        self.first.length + self.second.map_or(0, |s| s.length)
    }
}

/// Stateful RFC 4175 packetizer for one tx session.
///
/// Tracks the packet index within the current unit, the 32-bit sequence
/// number, the media-clock position and, for interlaced video, which field
/// is being sent.
pub struct Rfc4175Packetizer {
    plan: PackingPlan,
    rtp: RtpHeader,
    geometry: VideoGeometry,
    packet_index: u32,
    unit_index: u64,
    second_field: bool,
}

impl Rfc4175Packetizer {
    pub fn new(plan: PackingPlan, rtp: RtpHeader, geometry: VideoGeometry) -> Self {
        tracing::debug!(
            pt = rtp.pt,
            mode = %plan.mode,
            total_packets = plan.total_packets,
            interlaced = geometry.interlaced,
            "RFC 4175 packetizer created"
        );
        Self {
            plan,
            rtp,
            geometry,
            packet_index: 0,
            unit_index: 0,
            second_field: false,
        }
    }

    pub fn plan(&self) -> &PackingPlan {
        &self.plan
    }

    /// Index of the next packet within the current unit.
    pub fn packet_index(&self) -> u32 {
        self.packet_index
    }

    /// Transmission units completed so far.
    pub fn units_sent(&self) -> u64 {
        self.unit_index
    }

    pub fn second_field(&self) -> bool {
        self.second_field
    }

    /// Override the field of the unit about to start.
    ///
    /// Frame-slot transports use this to follow the flag the producer
    /// recorded on the slot. Ignored in the middle of a unit.
    pub fn set_second_field(&mut self, second_field: bool) {
        if self.packet_index == 0 && self.geometry.interlaced {
            self.second_field = second_field;
        }
    }

    /// Byte range of the unit that the next packet reads.
    pub fn next_packet_extent(&self) -> Range<usize> {
        let (first, second) = self.plan.segments(self.packet_index);
        let end = second.unwrap_or(first).byte_range().end;
        first.byte_offset..end
    }

    /// Write the next packet of the unit held in `unit` into `out`.
    ///
    /// `out` is cleared first. `unit` should be exactly one unit long; bytes
    /// it does not cover are sent as zeros.
    pub fn build_packet(&mut self, unit: &[u8], out: &mut Vec<u8>) -> PacketDescriptor {
        if self.packet_index == 0 {
            self.rtp
                .set_timestamp(self.geometry.fps.media_clock(self.unit_index));
        }
        let (first, second) = self.plan.segments(self.packet_index);
        let marker = self.packet_index + 1 == self.plan.total_packets;
        let timestamp = self.rtp.timestamp();
        let sequence = self.rtp.sequence();

        out.clear();
        out.reserve(RFC4175_HEADER_LEN + SRD_LEN + self.plan.payload_len);
        let ext = self.rtp.write(marker, out);
        out.extend_from_slice(&ext.to_be_bytes());

        let srd = |seg: &RowSegment, continuation: bool| SampleRowData {
            length: seg.length as u16,
            row: seg.row,
            offset: seg.offset,
            second_field: self.second_field,
            continuation,
        };
        srd(&first, second.is_some()).write(out);
        if let Some(seg) = &second {
            srd(seg, false).write(out);
        }
        for seg in std::iter::once(&first).chain(second.as_ref()) {
            match unit.get(seg.byte_range()) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => out.resize(out.len() + seg.length, 0),
            }
        }

        tracing::trace!(
            seq = sequence,
            index = self.packet_index,
            row = first.row,
            offset = first.offset,
            continuation = second.is_some(),
            marker,
            "RFC 4175 packet built"
        );

        let descriptor = PacketDescriptor {
            sequence,
            timestamp,
            marker,
            second_field: self.second_field,
            first,
            second,
            len: out.len(),
        };

        if marker {
            self.packet_index = 0;
            self.unit_index += 1;
            if self.geometry.interlaced {
                self.second_field = !self.second_field;
            }
        } else {
            self.packet_index += 1;
        }
        descriptor
    }

    /// Build the next packet from a multi-frame source, moving the source
    /// to its next frame once the unit is complete.
    pub fn build_packet_from<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        out: &mut Vec<u8>,
    ) -> PacketDescriptor {
        let descriptor = self.build_packet(source.frame(), out);
        if descriptor.marker {
            source.advance_frame();
        }
        descriptor
    }
}

impl Packetizer for Rfc4175Packetizer {
    fn build_packet(&mut self, unit: &[u8], out: &mut Vec<u8>) -> PacketDescriptor {
        Rfc4175Packetizer::build_packet(self, unit, out)
    }

    fn packets_per_unit(&self) -> u32 {
        self.plan.total_packets
    }

    fn codec_name(&self) -> &'static str {
        "raw"
    }

    fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.rtp.pt
    }

    fn sdp_attributes(&self) -> Vec<String> {
        let g = &self.geometry;
        let (num, den) = g.fps.fraction();
        let rate = if den == 1 {
            num.to_string()
        } else {
            format!("{num}/{den}")
        };
        let mut fmtp = format!(
            "a=fmtp:{} sampling={}; width={}; height={}; exactframerate={}; depth={}; \
             TCS=SDR; colorimetry=BT709; PM={}; SSN=ST2110-20:2017; TP=2110TPN;",
            self.rtp.pt,
            g.format.sampling(),
            g.width,
            g.frame_height(),
            rate,
            g.format.depth(),
            self.plan.mode.sdp_name(),
        );
        if g.interlaced {
            fmtp.push_str(" interlace;");
        }
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.rtp.pt,
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
        ]
    }

    fn next_sequence(&self) -> u32 {
        self.rtp.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.geometry.fps.media_clock(self.unit_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::{Fps, PixelFormat};
    use crate::media::rfc4175::Rfc4175Packet;

    const PG_422_10: PixelGroup = PixelGroup::new(5, 2);

    fn geometry(plan: &PackingPlan, fps: Fps, interlaced: bool) -> VideoGeometry {
        VideoGeometry {
            width: plan.width,
            height: plan.height,
            format: PixelFormat::Yuv422_10bit,
            fps,
            interlaced,
        }
    }

    fn packetizer(plan: PackingPlan) -> Rfc4175Packetizer {
        let g = geometry(&plan, Fps::P59_94, false);
        Rfc4175Packetizer::new(plan, RtpHeader::new(112, 0x1234), g)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    /// Run one unit through `p` and return every packet built.
    fn one_unit(p: &mut Rfc4175Packetizer, unit: &[u8]) -> Vec<(PacketDescriptor, Vec<u8>)> {
        let mut packets = Vec::new();
        loop {
            let mut out = Vec::new();
            let d = p.build_packet(unit, &mut out);
            packets.push((d, out));
            if d.marker {
                return packets;
            }
        }
    }

    #[test]
    fn single_line_1080p_10bit() {
        let plan = PackingPlan::new(1920, 1080, PG_422_10, 1200, PackingMode::SingleLine).unwrap();
        assert_eq!(plan.bytes_per_line, 4800);
        assert_eq!(plan.packets_per_line, 4);
        assert_eq!(plan.pixels_per_packet, 480);
        assert_eq!(plan.payload_len, 1200);
        assert_eq!(plan.total_packets, 4320);
    }

    #[test]
    fn single_line_default_budget() {
        let plan = PackingPlan::new(1920, 1080, PG_422_10, 1332, PackingMode::SingleLine).unwrap();
        assert_eq!(plan.packets_per_line, 4);
        assert_eq!(plan.total_packets, 4320);
    }

    #[test]
    fn single_line_1196_budget_needs_five_packets() {
        let plan = PackingPlan::new(1920, 1080, PG_422_10, 1196, PackingMode::SingleLine).unwrap();
        assert_eq!(plan.packets_per_line, 5);
        assert_eq!(plan.pixels_per_packet, 384);
        assert_eq!(plan.payload_len, 960);
    }

    #[test]
    fn single_line_last_packet_never_empty() {
        // 4:2:0 10-bit, 8-pixel groups: 1928 px do not split evenly into 6
        let pg = PixelFormat::Yuv420_10bit.pixel_group();
        let plan = PackingPlan::new(1928, 4, pg, 700, PackingMode::SingleLine).unwrap();
        assert_eq!(plan.packets_per_line, 6);
        assert_eq!(plan.pixels_per_packet, 328);
        let (tail, _) = plan.segments(5);
        assert_eq!(tail.length, 540);
        for index in 0..plan.total_packets {
            let (seg, second) = plan.segments(index);
            assert!(second.is_none());
            assert!(seg.length > 0, "packet {index} is empty");
            assert!(seg.length <= 700);
        }
    }

    #[test]
    fn single_line_every_row_spanned_by_packets_per_line() {
        let plan = PackingPlan::new(1920, 8, PG_422_10, 1332, PackingMode::SingleLine).unwrap();
        let mut per_row = vec![0u32; 8];
        let mut bytes_per_row = vec![0usize; 8];
        for index in 0..plan.total_packets {
            let (seg, _) = plan.segments(index);
            per_row[seg.row as usize] += 1;
            bytes_per_row[seg.row as usize] += seg.length;
        }
        assert!(per_row.iter().all(|&n| n == plan.packets_per_line));
        assert!(bytes_per_row.iter().all(|&n| n == 4800));
    }

    #[test]
    fn byte_packing_field_and_frame_counts() {
        let field = PackingPlan::new(1920, 540, PG_422_10, 1332, PackingMode::BytePacking).unwrap();
        assert_eq!(field.frame_size, 2_592_000);
        assert_eq!(field.payload_len, 1260);
        assert_eq!(field.total_packets, 2058);

        let frame = PackingPlan::new(1920, 1080, PG_422_10, 1332, PackingMode::BytePacking).unwrap();
        assert_eq!(frame.frame_size, 5_184_000);
        assert_eq!(frame.total_packets, 4115);
    }

    #[test]
    fn byte_packing_rejects_small_budget() {
        let err = PackingPlan::new(1920, 1080, PG_422_10, 1265, PackingMode::BytePacking);
        assert!(matches!(err, Err(St20Error::ConfigInvalid(_))));
    }

    #[test]
    fn byte_packing_rejects_unaligned_group() {
        let pg = PixelFormat::Yuv422_16bit.pixel_group();
        let err = PackingPlan::new(1920, 1080, pg, 1332, PackingMode::BytePacking);
        assert!(matches!(err, Err(St20Error::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_width_not_multiple_of_group() {
        let err = PackingPlan::new(1921, 1080, PG_422_10, 1332, PackingMode::General);
        assert!(matches!(err, Err(St20Error::ConfigInvalid(_))));
    }

    #[test]
    fn general_clamps_packets_to_narrow_rows() {
        // 64 px of 4:2:2 10-bit is 160 bytes per row
        let plan = PackingPlan::new(64, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        assert_eq!(plan.payload_len, 160);
        assert_eq!(plan.total_packets, 4);
        for index in 0..plan.total_packets {
            let (first, second) = plan.segments(index);
            assert_eq!(first.row as u32, index);
            assert_eq!(first.length, 160);
            assert!(second.is_none());
        }

        // 640 px of 4:2:2 8-bit is 1280 bytes, under the 1326 byte budget
        let pg = PixelFormat::Yuv422_8bit.pixel_group();
        let plan = PackingPlan::new(640, 16, pg, 1332, PackingMode::General).unwrap();
        assert_eq!(plan.payload_len, 1280);
        assert_eq!(plan.total_packets, 16);
    }

    #[test]
    fn byte_packing_rejects_rows_narrower_than_a_packet() {
        let err = PackingPlan::new(64, 4, PG_422_10, 1332, PackingMode::BytePacking);
        assert!(matches!(err, Err(St20Error::ConfigInvalid(_))));
    }

    #[test]
    fn general_payload_leaves_room_for_continuation() {
        let plan = PackingPlan::new(1920, 1080, PG_422_10, 1332, PackingMode::General).unwrap();
        assert_eq!(plan.payload_len, 1325);
        assert_eq!(plan.total_packets, 5_184_000usize.div_ceil(1325) as u32);
    }

    #[test]
    fn row_lengths_sum_to_frame_size_in_every_mode() {
        let cases = [
            (PackingMode::SingleLine, PixelFormat::Yuv422_10bit, 1920, 6),
            (PackingMode::General, PixelFormat::Yuv422_10bit, 1920, 6),
            (PackingMode::BytePacking, PixelFormat::Yuv422_10bit, 1920, 6),
            (PackingMode::General, PixelFormat::Rgb8bit, 1280, 5),
            (PackingMode::SingleLine, PixelFormat::Yuv420_10bit, 1280, 4),
            (PackingMode::General, PixelFormat::Yuv444_12bit, 720, 7),
        ];
        for (mode, format, width, height) in cases {
            let plan = PackingPlan::new(width, height, format.pixel_group(), 1332, mode).unwrap();
            let mut covered = vec![0u8; plan.frame_size];
            for index in 0..plan.total_packets {
                let (first, second) = plan.segments(index);
                for seg in std::iter::once(first).chain(second) {
                    assert!(seg.length > 0, "{mode} {format}: empty segment at {index}");
                    for b in &mut covered[seg.byte_range()] {
                        *b += 1;
                    }
                }
            }
            assert!(
                covered.iter().all(|&c| c == 1),
                "{mode} {format}: gap or overlap"
            );
        }
    }

    #[test]
    fn continuation_only_when_crossing_a_row() {
        // budget 1332 -> 1325 byte packets over 4800 byte rows
        let plan = PackingPlan::new(1920, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let (first, second) = plan.segments(3);
        assert_eq!(first.row, 0);
        assert_eq!(first.byte_offset, 3975);
        assert_eq!(first.length, 825);
        assert_eq!(first.offset, 1590);
        let second = second.expect("packet 3 crosses into row 1");
        assert_eq!(second.row, 1);
        assert_eq!(second.offset, 0);
        assert_eq!(second.length, 500);

        let (_, none) = plan.segments(0);
        assert!(none.is_none());
    }

    #[test]
    fn packet_ending_on_row_boundary_has_no_empty_continuation() {
        // 1206 byte budget -> 1200 byte packets, exactly four per row
        let plan = PackingPlan::new(1920, 4, PG_422_10, 1206, PackingMode::General).unwrap();
        assert_eq!(plan.payload_len, 1200);
        for index in 0..plan.total_packets {
            let (first, second) = plan.segments(index);
            assert!(second.is_none(), "packet {index} got a continuation");
            assert_eq!(first.length, 1200);
        }
        let (last_of_row, _) = plan.segments(3);
        assert_eq!(last_of_row.byte_range().end, 4800);
    }

    #[test]
    fn marker_only_on_last_packet() {
        let plan = PackingPlan::new(640, 8, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        let unit = pattern(plan.frame_size);
        let packets = one_unit(&mut p, &unit);
        assert_eq!(packets.len(), plan.total_packets as usize);
        let markers = packets.iter().filter(|(d, _)| d.marker).count();
        assert_eq!(markers, 1);
        assert!(packets.last().unwrap().0.marker);
        for (_, bytes) in &packets[..packets.len() - 1] {
            assert_eq!(bytes[1] & 0x80, 0);
        }
    }

    #[test]
    fn sequence_strictly_increases_across_units() {
        let plan = PackingPlan::new(320, 4, PG_422_10, 1332, PackingMode::BytePacking);
        // 320 px rows are 800 bytes, too narrow for byte packing
        assert!(plan.is_err());

        let plan = PackingPlan::new(640, 4, PG_422_10, 1332, PackingMode::BytePacking).unwrap();
        let mut p = packetizer(plan);
        let unit = pattern(plan.frame_size);
        let mut last: Option<u32> = None;
        for _ in 0..3 {
            for (d, _) in one_unit(&mut p, &unit) {
                if let Some(prev) = last {
                    assert_eq!(d.sequence, prev.wrapping_add(1));
                }
                last = Some(d.sequence);
            }
        }
    }

    #[test]
    fn timestamp_advances_once_per_unit() {
        let plan = PackingPlan::new(640, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        let unit = pattern(plan.frame_size);

        let first = one_unit(&mut p, &unit);
        assert!(first.iter().all(|(d, _)| d.timestamp == 0));
        let second = one_unit(&mut p, &unit);
        assert!(second.iter().all(|(d, _)| d.timestamp == 1501));
        let third = one_unit(&mut p, &unit);
        assert!(third.iter().all(|(d, _)| d.timestamp == 3003));
        assert_eq!(p.units_sent(), 3);
    }

    #[test]
    fn wire_bytes_match_descriptor() {
        let plan = PackingPlan::new(1920, 2, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        let unit = pattern(plan.frame_size);
        for (d, bytes) in one_unit(&mut p, &unit) {
            let pkt = Rfc4175Packet::parse(&bytes).unwrap();
            assert_eq!(pkt.sequence(), d.sequence);
            assert_eq!(pkt.rtp.marker, d.marker);
            assert_eq!(pkt.first.0.row, d.first.row);
            assert_eq!(pkt.first.0.offset, d.first.offset);
            assert_eq!(pkt.first.1, &unit[d.first.byte_range()]);
            assert_eq!(pkt.second.is_some(), d.second.is_some());
            if let (Some((srd, data)), Some(seg)) = (pkt.second, d.second) {
                assert!(!srd.continuation);
                assert_eq!(data, &unit[seg.byte_range()]);
            }
            let srd_count = 1 + d.second.is_some() as usize;
            assert_eq!(bytes.len(), 14 + srd_count * SRD_LEN + d.payload_len());
            assert_eq!(d.len, bytes.len());
        }
    }

    #[test]
    fn interlaced_flips_field_bit_per_unit() {
        let plan = PackingPlan::new(640, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let g = geometry(&plan, Fps::P50, true);
        let mut p = Rfc4175Packetizer::new(plan, RtpHeader::new(112, 1), g);
        let unit = pattern(plan.frame_size);
        for expected in [false, true, false] {
            for (d, bytes) in one_unit(&mut p, &unit) {
                assert_eq!(d.second_field, expected);
                let pkt = Rfc4175Packet::parse(&bytes).unwrap();
                assert_eq!(pkt.first.0.second_field, expected);
            }
        }
    }

    #[test]
    fn progressive_never_sets_field_bit() {
        let plan = PackingPlan::new(640, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        p.set_second_field(true);
        let unit = pattern(plan.frame_size);
        assert!(one_unit(&mut p, &unit).iter().all(|(d, _)| !d.second_field));
    }

    #[test]
    fn source_advances_only_on_unit_completion() {
        use crate::frame::FrameArena;

        let plan = PackingPlan::new(640, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        let mut source = FrameArena::new(pattern(plan.frame_size * 2), plan.frame_size).unwrap();
        let mut out = Vec::new();
        for _ in 0..plan.total_packets - 1 {
            p.build_packet_from(&mut source, &mut out);
            assert_eq!(source.cursor(), 0);
        }
        p.build_packet_from(&mut source, &mut out);
        assert_eq!(source.cursor(), plan.frame_size);
        for _ in 0..plan.total_packets {
            p.build_packet_from(&mut source, &mut out);
        }
        assert_eq!(source.cursor(), 0, "source wraps after the last frame");
    }

    #[test]
    fn next_packet_extent_tracks_index() {
        let plan = PackingPlan::new(1920, 4, PG_422_10, 1332, PackingMode::General).unwrap();
        let mut p = packetizer(plan);
        assert_eq!(p.next_packet_extent(), 0..1325);
        let unit = pattern(plan.frame_size);
        let mut out = Vec::new();
        for _ in 0..3 {
            p.build_packet(&unit, &mut out);
        }
        assert_eq!(p.next_packet_extent(), 3975..5300);
    }

    #[test]
    fn sdp_attributes_describe_the_stream() {
        let plan = PackingPlan::new(1920, 540, PG_422_10, 1332, PackingMode::BytePacking).unwrap();
        let g = geometry(&plan, Fps::P59_94, true);
        let p = Rfc4175Packetizer::new(plan, RtpHeader::new(112, 1), g);
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:112 raw/90000");
        assert!(attrs[1].starts_with("a=fmtp:112 sampling=YCbCr-4:2:2; width=1920; height=1080;"));
        assert!(attrs[1].contains("exactframerate=60000/1001;"));
        assert!(attrs[1].contains("depth=10;"));
        assert!(attrs[1].contains("PM=2110BPM;"));
        assert!(attrs[1].ends_with("TP=2110TPN; interlace;"));
    }
}
