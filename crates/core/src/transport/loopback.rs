//! In-process transport joining a tx session to an rx session.
//!
//! Packets are built into pooled buffers, optionally dropped, then either
//! reassembled into pooled frame buffers (frame and slice rx) or queued
//! raw for the rx session (RTP rx). Everything runs on the caller's
//! thread, or on the one thread started by [`Loopback::spawn`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::{Result, St20Error};
use crate::frame::{FrameSink, SliceMeta, SliceProducer};
use crate::media::rfc4175::{
    Depacketizer, FrameSummary, RFC4175_HEADER_LEN, Rfc4175Packetizer, SRD_LEN,
};
use crate::media::rtp::RtpFields;
use crate::session::SessionType;
use crate::shutdown::ShutdownToken;
use crate::stats::{self, SessionStats};

use super::{NextFrame, RxCallbacks, RxFrame, RxTransport, TxCallbacks, TxTransport};

/// Poll interval while waiting on the other side.
const IDLE_WAIT: Duration = Duration::from_micros(200);

/// Link behaviour.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Drop every Nth packet.
    pub drop_every: Option<u32>,
    /// Wait for a free rx buffer instead of dropping the packet.
    pub backpressure: bool,
    /// Rx frame buffers. Defaults to the session's slot count, which keeps
    /// the rx ring from ever reporting a busy slot.
    pub frame_buffers: Option<usize>,
    /// Packet buffers in each direction.
    pub packet_buffers: usize,
    /// Release units at the configured frame rate instead of as fast as
    /// the sessions allow.
    pub paced: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            drop_every: None,
            backpressure: true,
            frame_buffers: None,
            packet_buffers: 64,
            paced: false,
        }
    }
}

/// Buffer pools and queues shared with the sessions.
struct Pools {
    frame_size: usize,
    tx_free: Mutex<Vec<Vec<u8>>>,
    tx_sent: Mutex<VecDeque<Vec<u8>>>,
    rx_frames: Mutex<Vec<Vec<u8>>>,
    rx_free: Mutex<Vec<Vec<u8>>>,
    rx_queue: Mutex<VecDeque<Vec<u8>>>,
}

impl TxTransport for Pools {
    fn get_packet_buffer(&self) -> Option<Vec<u8>> {
        self.tx_free.lock().pop()
    }

    fn put_packet(&self, packet: Vec<u8>) {
        self.tx_sent.lock().push_back(packet);
    }
}

impl RxTransport for Pools {
    fn put_framebuffer(&self, buffer: Vec<u8>) {
        self.rx_frames.lock().push(buffer);
    }

    fn get_packet(&self) -> Option<Vec<u8>> {
        self.rx_queue.lock().pop_front()
    }

    fn put_packet_buffer(&self, buffer: Vec<u8>) {
        self.rx_free.lock().push(buffer);
    }
}

/// Depacketizer sink backed by the rx frame pool.
///
/// A unit closed by its marker is taken from `current`; one closed by a
/// timestamp change is parked in `finished` until it is handed over.
struct Assembler {
    pools: Arc<Pools>,
    current: Option<Vec<u8>>,
    finished: Option<Vec<u8>>,
}

impl Assembler {
    fn release(&mut self) {
        let mut pool = self.pools.rx_frames.lock();
        pool.extend(self.current.take());
        pool.extend(self.finished.take());
    }
}

impl FrameSink for Assembler {
    fn frame_mut(&mut self) -> Option<&mut [u8]> {
        if self.current.is_none() {
            let mut buffer = self.pools.rx_frames.lock().pop()?;
            buffer.resize(self.pools.frame_size, 0);
            self.current = Some(buffer);
        }
        self.current.as_deref_mut()
    }

    fn advance_frame(&mut self) {
        let Some(done) = self.current.take() else {
            return;
        };
        if let Some(stale) = self.finished.replace(done) {
            self.pools.rx_frames.lock().push(stale);
        }
    }
}

enum Pumped {
    Idle,
    Packet,
    UnitEnd,
}

/// Loopback link between one tx and one rx session.
///
/// Counters in [`stats`](Self::stats) describe the link: packets taken
/// from tx, delivered to rx and dropped, plus units sent, frames handed
/// over and frames refused with a busy slot.
pub struct Loopback {
    pools: Arc<Pools>,
    link: LoopbackConfig,
    packetizer: Rfc4175Packetizer,
    depacketizer: Depacketizer,
    assembler: Assembler,
    in_transit: Option<NextFrame>,
    wire: Vec<u8>,
    bytes_per_line: usize,
    slice_step: u32,
    next_slice_lines: u32,
    packet_count: u64,
    unit_period: Option<Duration>,
    stats: Arc<SessionStats>,
}

impl Loopback {
    pub fn new(config: &SessionConfig, link: LoopbackConfig) -> Result<Self> {
        let geometry = config.validate()?;
        let frame_buffers = link.frame_buffers.unwrap_or(config.slots);
        if frame_buffers == 0 || link.packet_buffers == 0 {
            return Err(St20Error::ConfigInvalid(
                "loopback needs at least one frame and one packet buffer".into(),
            ));
        }
        if link.drop_every == Some(0) {
            return Err(St20Error::ConfigInvalid("drop interval is zero".into()));
        }

        let frame_size = geometry.frame_size();
        let packet_capacity = RFC4175_HEADER_LEN + 2 * SRD_LEN + config.max_payload_bytes;
        let packets = |n: usize| -> Vec<Vec<u8>> {
            (0..n).map(|_| Vec::with_capacity(packet_capacity)).collect()
        };
        let pools = Arc::new(Pools {
            frame_size,
            tx_free: Mutex::new(packets(link.packet_buffers)),
            tx_sent: Mutex::new(VecDeque::new()),
            rx_frames: Mutex::new((0..frame_buffers).map(|_| vec![0; frame_size]).collect()),
            rx_free: Mutex::new(packets(link.packet_buffers)),
            rx_queue: Mutex::new(VecDeque::new()),
        });

        tracing::info!(
            frame_buffers,
            packet_buffers = link.packet_buffers,
            drop_every = link.drop_every,
            backpressure = link.backpressure,
            paced = link.paced,
            "loopback link created"
        );
        Ok(Self {
            assembler: Assembler {
                pools: pools.clone(),
                current: None,
                finished: None,
            },
            pools,
            packetizer: config.packetizer()?,
            depacketizer: config.depacketizer()?,
            in_transit: None,
            wire: Vec::with_capacity(packet_capacity),
            bytes_per_line: geometry.bytes_per_line(),
            slice_step: SliceProducer::new(geometry.height).step(),
            next_slice_lines: 0,
            packet_count: 0,
            unit_period: link
                .paced
                .then(|| Duration::from_secs_f64(1.0 / geometry.fps.as_f64())),
            stats: Arc::new(SessionStats::new()),
            link,
        })
    }

    /// Packet pool for an RTP-level tx session.
    pub fn tx_transport(&self) -> Arc<dyn TxTransport> {
        self.pools.clone()
    }

    /// Buffer pools for the rx session.
    pub fn rx_transport(&self) -> Arc<dyn RxTransport> {
        self.pools.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Rx frame buffers currently back in the pool.
    pub fn idle_frame_buffers(&self) -> usize {
        self.pools.rx_frames.lock().len()
    }

    /// Move packets until `units` transmission units have been sent or
    /// `shutdown` is triggered. Returns the units sent.
    pub fn run(
        &mut self,
        tx: &dyn TxCallbacks,
        rx: &dyn RxCallbacks,
        units: Option<u64>,
        shutdown: &ShutdownToken,
    ) -> Result<u64> {
        tracing::info!(
            tx = %tx.session_type(),
            rx = %rx.session_type(),
            units,
            "loopback running"
        );
        let started = Instant::now();
        let mut sent = 0;
        let result = loop {
            if shutdown.is_shutdown() || units.is_some_and(|n| sent >= n) {
                break Ok(sent);
            }
            let pumped = match tx.session_type() {
                SessionType::RtpLevel => self.pump_packet(tx, rx, shutdown),
                SessionType::FrameLevel | SessionType::SliceLevel => {
                    self.pump_frame(tx, rx, shutdown)
                }
            };
            match pumped {
                Ok(Pumped::Idle) => thread::sleep(IDLE_WAIT),
                Ok(Pumped::Packet) => {}
                Ok(Pumped::UnitEnd) => {
                    sent += 1;
                    stats::bump(&self.stats.frames_sent);
                    if let Some(period) = self.unit_period {
                        let due = started + period.mul_f64(sent as f64);
                        thread::sleep(due.saturating_duration_since(Instant::now()));
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.assembler.release();
        match &result {
            Ok(units) => tracing::info!(units, "loopback finished"),
            Err(e) => tracing::error!(error = %e, "loopback failed"),
        }
        result
    }

    /// Run on a new thread until `units` are sent or `shutdown` fires.
    pub fn spawn(
        mut self,
        tx: Arc<dyn TxCallbacks>,
        rx: Arc<dyn RxCallbacks>,
        units: Option<u64>,
        shutdown: ShutdownToken,
    ) -> Result<JoinHandle<Result<u64>>> {
        let handle = thread::Builder::new()
            .name("st20-loopback".into())
            .spawn(move || self.run(tx.as_ref(), rx.as_ref(), units, &shutdown))?;
        Ok(handle)
    }

    /// Packetize the next packet of the slot in transit, taking a new slot
    /// when none is.
    fn pump_frame(
        &mut self,
        tx: &dyn TxCallbacks,
        rx: &dyn RxCallbacks,
        shutdown: &ShutdownToken,
    ) -> Result<Pumped> {
        let next = match self.in_transit {
            Some(next) => next,
            None => match tx.get_next_frame() {
                Ok(next) => {
                    self.packetizer.set_second_field(next.second_field);
                    self.in_transit = Some(next);
                    next
                }
                Err(St20Error::ResourceExhausted(_)) => return Ok(Pumped::Idle),
                Err(e) => return Err(e),
            },
        };

        if tx.session_type() == SessionType::SliceLevel {
            let ready = tx.query_slice_lines_ready(next.slot)? as usize * self.bytes_per_line;
            if self.packetizer.next_packet_extent().end > ready {
                return Ok(Pumped::Idle);
            }
        }

        let descriptor = {
            let frame = tx.framebuffer(next.slot)?;
            self.packetizer.build_packet(&frame, &mut self.wire)
        };
        stats::bump(&self.stats.packets_built);
        let wire = std::mem::take(&mut self.wire);
        let delivered = self.deliver(&wire, rx, shutdown);
        self.wire = wire;
        delivered?;

        if descriptor.marker {
            tx.frame_done(next.slot)?;
            self.in_transit = None;
            return Ok(Pumped::UnitEnd);
        }
        Ok(Pumped::Packet)
    }

    /// Forward one packet built by an RTP-level tx session.
    fn pump_packet(
        &mut self,
        tx: &dyn TxCallbacks,
        rx: &dyn RxCallbacks,
        shutdown: &ShutdownToken,
    ) -> Result<Pumped> {
        let Some(packet) = self.pools.tx_sent.lock().pop_front() else {
            return Ok(Pumped::Idle);
        };
        stats::bump(&self.stats.packets_built);
        let marker = RtpFields::parse(&packet).is_ok_and(|rtp| rtp.marker);
        let delivered = self.deliver(&packet, rx, shutdown);
        self.pools.tx_free.lock().push(packet);
        delivered?;
        tx.notify_rtp_done()?;
        Ok(if marker { Pumped::UnitEnd } else { Pumped::Packet })
    }

    fn deliver(
        &mut self,
        packet: &[u8],
        rx: &dyn RxCallbacks,
        shutdown: &ShutdownToken,
    ) -> Result<()> {
        self.packet_count += 1;
        let count = self.packet_count;
        if self
            .link
            .drop_every
            .is_some_and(|n| count % u64::from(n) == 0)
        {
            stats::bump(&self.stats.packets_dropped);
            tracing::trace!(count, "packet dropped by link");
            return Ok(());
        }
        match rx.session_type() {
            SessionType::RtpLevel => self.deliver_packet(packet, rx, shutdown),
            SessionType::FrameLevel | SessionType::SliceLevel => {
                self.deliver_to_frame(packet, rx, shutdown)
            }
        }
    }

    fn deliver_packet(
        &mut self,
        packet: &[u8],
        rx: &dyn RxCallbacks,
        shutdown: &ShutdownToken,
    ) -> Result<()> {
        let buffer = loop {
            if let Some(buffer) = self.pools.rx_free.lock().pop() {
                break Some(buffer);
            }
            if !self.link.backpressure || shutdown.is_shutdown() {
                break None;
            }
            thread::sleep(IDLE_WAIT);
        };
        let Some(mut buffer) = buffer else {
            stats::bump(&self.stats.packets_dropped);
            tracing::debug!("no free rx packet buffer, packet dropped");
            return Ok(());
        };
        buffer.clear();
        buffer.extend_from_slice(packet);
        self.pools.rx_queue.lock().push_back(buffer);
        stats::bump(&self.stats.packets_received);
        rx.notify_rtp_ready()
    }

    fn deliver_to_frame(
        &mut self,
        packet: &[u8],
        rx: &dyn RxCallbacks,
        shutdown: &ShutdownToken,
    ) -> Result<()> {
        if self.link.backpressure && self.assembler.current.is_none() {
            while self.pools.rx_frames.lock().is_empty() && !shutdown.is_shutdown() {
                thread::sleep(IDLE_WAIT);
            }
        }

        let outcome = match self.depacketizer.on_packet(packet, &mut self.assembler) {
            Ok(outcome) => outcome,
            Err(e) => {
                stats::bump(&self.stats.packets_dropped);
                tracing::debug!(error = %e, "packet not placed");
                return Ok(());
            }
        };
        stats::bump(&self.stats.packets_received);
        if outcome.new_frame {
            self.next_slice_lines = self.slice_step;
        }

        if let Some(summary) = outcome.unterminated {
            if let Some(buffer) = self.assembler.finished.take() {
                self.hand_over(rx, buffer, summary)?;
            }
        }
        if rx.session_type() == SessionType::SliceLevel {
            self.report_slice(rx)?;
        }
        if let Some(summary) = outcome.completed {
            if let Some(buffer) = self.assembler.current.take() {
                self.hand_over(rx, buffer, summary)?;
            }
        }
        Ok(())
    }

    /// Tell a slice-level rx session each time another slice of rows has
    /// been covered.
    fn report_slice(&mut self, rx: &dyn RxCallbacks) -> Result<()> {
        let (received, furthest) = self.depacketizer.progress();
        let lines = (furthest / self.bytes_per_line) as u32;
        if lines < self.next_slice_lines {
            return Ok(());
        }
        self.next_slice_lines = lines + self.slice_step;
        rx.notify_slice_ready(SliceMeta {
            recv_lines: lines,
            recv_size: received,
        })
    }

    fn hand_over(
        &self,
        rx: &dyn RxCallbacks,
        buffer: Vec<u8>,
        summary: FrameSummary,
    ) -> Result<()> {
        let frame = RxFrame {
            buffer,
            size: summary.frame_size,
            timestamp: summary.timestamp,
            complete: summary.is_complete(),
            second_field: summary.second_field,
        };
        match rx.notify_frame_ready(frame) {
            Ok(()) => {
                stats::bump(&self.stats.frames_received);
                Ok(())
            }
            Err(St20Error::SlotBusy { slot }) => {
                stats::bump(&self.stats.frames_dropped);
                tracing::debug!(slot, timestamp = summary.timestamp, "rx slot busy");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
