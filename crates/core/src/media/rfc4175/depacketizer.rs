//! RFC 4175 depacketizer.
//!
//! Packets are written straight into the sink's current frame at the
//! position their sample row headers name. There is no reorder buffer and
//! no retransmission: a lost packet leaves its bytes untouched.
//!
//! The RTP timestamp is the only frame-boundary signal. The marker bit
//! closes a frame early so it can be handed on without waiting for the next
//! one, but only a timestamp change moves the sink to its next frame.

use std::ops::Range;

use crate::error::{PacketErrorKind, Result, St20Error};
use crate::frame::FrameSink;
use crate::media::format::{PixelGroup, VideoGeometry};

use super::Rfc4175Packet;

/// Accounting for one received unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub timestamp: u32,
    /// Distinct payload bytes written into the unit. Duplicated packets
    /// count once.
    pub received: usize,
    pub frame_size: usize,
    pub second_field: bool,
}

impl FrameSummary {
    pub fn is_complete(&self) -> bool {
        self.received >= self.frame_size
    }
}

/// What a single packet did to the receive state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketOutcome {
    /// The packet is the first one seen with its timestamp.
    pub new_frame: bool,
    /// The previous unit, if a timestamp change closed it before its
    /// marker packet arrived.
    pub unterminated: Option<FrameSummary>,
    /// Set when this packet carried the marker bit.
    pub completed: Option<FrameSummary>,
    /// Payload bytes copied from this packet.
    pub bytes: usize,
}

/// Byte ranges of the unit in progress that packets have written, sorted
/// and merged.
#[derive(Debug, Default)]
struct Coverage {
    spans: Vec<Range<usize>>,
}

impl Coverage {
    fn clear(&mut self) {
        self.spans.clear();
    }

    /// Record `range` and return how many of its bytes were not covered yet.
    fn insert(&mut self, range: Range<usize>) -> usize {
        if range.is_empty() {
            return 0;
        }
        // spans that overlap or touch `range` sit in lo..hi
        let lo = self.spans.partition_point(|s| s.end < range.start);
        let hi = lo + self.spans[lo..].partition_point(|s| s.start <= range.end);
        let mut merged = range.clone();
        let mut seen = 0;
        for s in &self.spans[lo..hi] {
            seen += s.end.min(range.end).saturating_sub(s.start.max(range.start));
            merged.start = merged.start.min(s.start);
            merged.end = merged.end.max(s.end);
        }
        self.spans.splice(lo..hi, std::iter::once(merged));
        range.len() - seen
    }
}

/// Reassembles units from an RFC 4175 packet stream.
#[derive(Debug)]
pub struct Depacketizer {
    pixel_group: PixelGroup,
    bytes_per_line: usize,
    frame_size: usize,
    payload_type: u8,
    last_timestamp: Option<u32>,
    received: usize,
    covered: Coverage,
    furthest: usize,
    second_field: bool,
    open: bool,
}

impl Depacketizer {
    pub fn new(geometry: &VideoGeometry, payload_type: u8) -> Self {
        let pixel_group = geometry.pixel_group();
        let bytes_per_line = geometry.bytes_per_line();
        let frame_size = geometry.frame_size();
        tracing::debug!(
            bytes_per_line,
            frame_size,
            pt = payload_type,
            "RFC 4175 depacketizer created"
        );
        Self {
            pixel_group,
            bytes_per_line,
            frame_size,
            payload_type,
            last_timestamp: None,
            received: 0,
            covered: Coverage::default(),
            furthest: 0,
            second_field: false,
            open: false,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn bytes_per_line(&self) -> usize {
        self.bytes_per_line
    }

    pub fn last_timestamp(&self) -> Option<u32> {
        self.last_timestamp
    }

    /// `(bytes received, end of the furthest byte written)` for the unit
    /// in progress.
    pub fn progress(&self) -> (usize, usize) {
        (self.received, self.furthest)
    }

    fn summary(&self) -> FrameSummary {
        FrameSummary {
            timestamp: self.last_timestamp.unwrap_or_default(),
            received: self.received,
            frame_size: self.frame_size,
            second_field: self.second_field,
        }
    }

    /// Map a segment to its destination byte range, rejecting anything that
    /// would land outside the unit.
    fn destination(&self, row: u16, offset: u16, length: usize) -> Result<usize> {
        let start =
            row as usize * self.bytes_per_line + self.pixel_group.pixel_offset_to_bytes(offset as u32);
        if start + length > self.frame_size {
            return Err(St20Error::OffsetOutOfRange {
                offset: start,
                length,
                frame_size: self.frame_size,
            });
        }
        Ok(start)
    }

    /// Feed one datagram.
    ///
    /// Every segment is validated before anything is copied, so a rejected
    /// packet leaves both the sink and the frame accounting untouched.
    pub fn on_packet<S: FrameSink + ?Sized>(
        &mut self,
        packet: &[u8],
        sink: &mut S,
    ) -> Result<PacketOutcome> {
        let pkt = Rfc4175Packet::parse(packet)?;
        if pkt.rtp.payload_type != self.payload_type {
            return Err(St20Error::malformed(PacketErrorKind::PayloadType {
                expected: self.payload_type,
                actual: pkt.rtp.payload_type,
            }));
        }

        let (srd1, data1) = pkt.first;
        let first = (self.destination(srd1.row, srd1.offset, data1.len())?, data1);
        let second = match pkt.second {
            Some((srd, data)) => Some((self.destination(srd.row, srd.offset, data.len())?, data)),
            None => None,
        };

        let mut outcome = PacketOutcome::default();
        let timestamp = pkt.rtp.timestamp;
        if self.last_timestamp != Some(timestamp) {
            if self.last_timestamp.is_some() {
                if self.open {
                    outcome.unterminated = Some(self.summary());
                }
                sink.advance_frame();
            }
            tracing::trace!(timestamp, seq = pkt.sequence(), "new frame");
            outcome.new_frame = true;
            self.last_timestamp = Some(timestamp);
            self.received = 0;
            self.covered.clear();
            self.furthest = 0;
        }

        let dest = sink
            .frame_mut()
            .ok_or(St20Error::ResourceExhausted("no receive buffer"))?;
        let dest_len = dest.len();
        for (start, data) in std::iter::once(first).chain(second) {
            let end = start + data.len();
            let slot = dest.get_mut(start..end).ok_or(St20Error::OffsetOutOfRange {
                offset: start,
                length: data.len(),
                frame_size: dest_len,
            })?;
            slot.copy_from_slice(data);
            outcome.bytes += data.len();
            self.received += self.covered.insert(start..end);
            self.furthest = self.furthest.max(end);
        }
        self.second_field = srd1.second_field;
        self.open = true;

        tracing::trace!(
            seq = pkt.sequence(),
            row = srd1.row,
            offset = srd1.offset,
            bytes = outcome.bytes,
            marker = pkt.rtp.marker,
            "RFC 4175 packet placed"
        );

        if pkt.rtp.marker {
            outcome.completed = Some(self.summary());
            self.open = false;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameArena;
    use crate::media::format::{Fps, PixelFormat};
    use crate::media::rfc4175::{PackingMode, PackingPlan, Rfc4175Packetizer, SampleRowData};
    use crate::media::rtp::RtpHeader;

    fn geometry(width: u32, height: u32) -> VideoGeometry {
        VideoGeometry {
            width,
            height,
            format: PixelFormat::Yuv422_10bit,
            fps: Fps::P50,
            interlaced: false,
        }
    }

    fn packetizer(g: &VideoGeometry, mode: PackingMode) -> Rfc4175Packetizer {
        let plan = PackingPlan::new(g.width, g.height, g.pixel_group(), 1332, mode).unwrap();
        Rfc4175Packetizer::new(plan, RtpHeader::new(112, 7), *g)
    }

    fn unit_packets(p: &mut Rfc4175Packetizer, unit: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        loop {
            let mut out = Vec::new();
            let d = p.build_packet(unit, &mut out);
            packets.push(out);
            if d.marker {
                return packets;
            }
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn round_trip_every_mode() {
        let g = geometry(1280, 6);
        for mode in [PackingMode::SingleLine, PackingMode::General, PackingMode::BytePacking] {
            let mut p = packetizer(&g, mode);
            let mut d = Depacketizer::new(&g, 112);
            let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();
            let unit = pattern(g.frame_size(), 3);

            let mut completed = None;
            for pkt in unit_packets(&mut p, &unit) {
                let outcome = d.on_packet(&pkt, &mut sink).unwrap();
                completed = completed.or(outcome.completed);
            }
            let summary = completed.expect("marker packet closes the frame");
            assert!(summary.is_complete(), "{mode}: {summary:?}");
            assert_eq!(sink.frame_at(0).unwrap(), &unit[..], "{mode}: bytes differ");
        }
    }

    #[test]
    fn timestamp_change_advances_sink_once() {
        let g = geometry(640, 4);
        let mut p = packetizer(&g, PackingMode::General);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(3, g.frame_size()).unwrap();
        let a = pattern(g.frame_size(), 1);
        let b = pattern(g.frame_size(), 2);

        let first = unit_packets(&mut p, &a);
        let second = unit_packets(&mut p, &b);

        let mut new_frames = 0;
        for pkt in &first {
            let o = d.on_packet(pkt, &mut sink).unwrap();
            new_frames += o.new_frame as u32;
            assert_eq!(sink.cursor(), 0, "first frame stays in slot 0");
        }
        for pkt in &second {
            let o = d.on_packet(pkt, &mut sink).unwrap();
            new_frames += o.new_frame as u32;
            assert_eq!(sink.cursor(), g.frame_size(), "second frame lands in slot 1");
        }
        assert_eq!(new_frames, 2);
        assert_eq!(sink.frame_at(0).unwrap(), &a[..]);
        assert_eq!(sink.frame_at(1).unwrap(), &b[..]);
    }

    #[test]
    fn lost_packets_leave_holes() {
        let g = geometry(640, 4);
        let mut p = packetizer(&g, PackingMode::General);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();
        let unit = vec![0xAB; g.frame_size()];

        let packets = unit_packets(&mut p, &unit);
        let mut completed = None;
        for (i, pkt) in packets.iter().enumerate() {
            if i == 1 {
                continue;
            }
            completed = d.on_packet(pkt, &mut sink).unwrap().completed;
        }
        let summary = completed.unwrap();
        assert!(!summary.is_complete());
        assert_eq!(summary.received, g.frame_size() - 1325);
        let frame = sink.frame_at(0).unwrap();
        assert!(frame[1325..2650].iter().all(|&b| b == 0));
        assert!(frame[..1325].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn missing_marker_reported_on_next_timestamp() {
        let g = geometry(640, 4);
        let mut p = packetizer(&g, PackingMode::General);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(2, g.frame_size()).unwrap();
        let unit = pattern(g.frame_size(), 9);

        let first = unit_packets(&mut p, &unit);
        for pkt in &first[..first.len() - 1] {
            assert!(d.on_packet(pkt, &mut sink).unwrap().completed.is_none());
        }
        let second = unit_packets(&mut p, &unit);
        let o = d.on_packet(&second[0], &mut sink).unwrap();
        assert!(o.new_frame);
        let lost = o.unterminated.expect("previous frame never saw its marker");
        assert_eq!(lost.timestamp, 0);
        assert!(!lost.is_complete());

        // a frame closed by its marker is not reported again
        for pkt in &second[1..] {
            d.on_packet(pkt, &mut sink).unwrap();
        }
        let third = unit_packets(&mut p, &unit);
        assert!(d.on_packet(&third[0], &mut sink).unwrap().unterminated.is_none());
    }

    fn forged(row: u16, offset: u16, length: u16, marker: bool) -> Vec<u8> {
        let mut buf = vec![0x80, 112 | ((marker as u8) << 7), 0, 1, 0, 0, 0, 5, 0, 0, 0, 7, 0, 0];
        SampleRowData {
            length,
            row,
            offset,
            ..Default::default()
        }
        .write(&mut buf);
        buf.resize(buf.len() + length as usize, 0x55);
        buf
    }

    #[test]
    fn rejects_offset_past_frame_end() {
        let g = geometry(640, 4);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();

        // last row, 600 px in: 1500 bytes into a 1600 byte row
        let err = d.on_packet(&forged(3, 600, 200, false), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            St20Error::OffsetOutOfRange {
                offset: 6300,
                length: 200,
                frame_size: 6400
            }
        ));
        assert!(sink.frame_at(0).unwrap().iter().all(|&b| b == 0));
        assert_eq!(d.last_timestamp(), None, "rejected packets do not open a frame");

        let ok = d.on_packet(&forged(3, 600, 100, true), &mut sink).unwrap();
        assert_eq!(ok.bytes, 100);
    }

    #[test]
    fn rejects_foreign_payload_type() {
        let g = geometry(640, 4);
        let mut d = Depacketizer::new(&g, 96);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();
        let err = d.on_packet(&forged(0, 0, 10, false), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            St20Error::MalformedPacket {
                kind: PacketErrorKind::PayloadType {
                    expected: 96,
                    actual: 112
                }
            }
        ));
    }

    #[test]
    fn duplicated_packet_does_not_hide_a_lost_one() {
        let g = geometry(640, 2);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();

        // row 0 arrives twice, row 1 never does
        let first = d.on_packet(&forged(0, 0, 1600, false), &mut sink).unwrap();
        assert_eq!(first.bytes, 1600);
        let again = d.on_packet(&forged(0, 0, 1600, true), &mut sink).unwrap();
        assert_eq!(again.bytes, 1600);

        let summary = again.completed.unwrap();
        assert_eq!(summary.received, 1600);
        assert!(!summary.is_complete(), "{summary:?}");
    }

    #[test]
    fn overlapping_segments_count_once() {
        let g = geometry(640, 2);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();

        // bytes 500..1500 of row 0, then 0..1000, then all of row 1, then the
        // tail of row 0 which closes the gap between the two spans
        d.on_packet(&forged(0, 200, 1000, false), &mut sink).unwrap();
        d.on_packet(&forged(0, 0, 1000, false), &mut sink).unwrap();
        assert_eq!(d.progress().0, 1500);
        d.on_packet(&forged(1, 0, 1600, false), &mut sink).unwrap();
        let last = d.on_packet(&forged(0, 400, 600, true), &mut sink).unwrap();
        let summary = last.completed.unwrap();
        assert_eq!(summary.received, 3200);
        assert!(summary.is_complete());
    }

    #[test]
    fn coverage_merges_and_counts_new_bytes() {
        let mut c = Coverage::default();
        assert_eq!(c.insert(10..20), 10);
        assert_eq!(c.insert(30..40), 10);
        assert_eq!(c.insert(15..35), 10);
        assert_eq!(c.spans, vec![10..40]);
        assert_eq!(c.insert(0..50), 20);
        assert_eq!(c.insert(0..50), 0);
        assert_eq!(c.insert(50..50), 0);
        c.clear();
        assert_eq!(c.insert(0..5), 5);
    }

    #[test]
    fn progress_tracks_furthest_byte() {
        let g = geometry(640, 4);
        let mut d = Depacketizer::new(&g, 112);
        let mut sink = FrameArena::with_frames(1, g.frame_size()).unwrap();
        d.on_packet(&forged(2, 0, 1600, false), &mut sink).unwrap();
        assert_eq!(d.progress(), (1600, 4800));
    }
}
