use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::MutexGuard;

use crate::config::SessionConfig;
use crate::error::{Result, St20Error};
use crate::frame::{FrameArena, FrameSlotRing, FrameSource, SliceProducer, SlotIndex, SlotState};
use crate::media::format::VideoGeometry;
use crate::media::rfc4175::Rfc4175Packetizer;
use crate::shutdown::{ShutdownGuard, ShutdownToken};
use crate::stats::{self, SessionStats};
use crate::transport::{NextFrame, TxCallbacks, TxTransport};

use super::SessionType;
use super::wake::WakeSignal;

enum TxMode {
    Frames(FrameSlotRing),
    Rtp {
        transport: Arc<dyn TxTransport>,
        wake: WakeSignal,
    },
}

struct TxShared {
    name: String,
    session_type: SessionType,
    geometry: VideoGeometry,
    mode: TxMode,
    stop: AtomicBool,
    stats: Arc<SessionStats>,
}

impl TxShared {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        match &self.mode {
            TxMode::Frames(ring) => ring.wake(),
            TxMode::Rtp { wake, .. } => wake.notify(),
        }
    }

    fn ring(&self, operation: &'static str) -> Result<&FrameSlotRing> {
        match &self.mode {
            TxMode::Frames(ring) => Ok(ring),
            TxMode::Rtp { .. } => Err(St20Error::Unsupported {
                session_type: self.session_type,
                operation,
            }),
        }
    }
}

impl TxCallbacks for TxShared {
    fn session_type(&self) -> SessionType {
        self.session_type
    }

    fn get_next_frame(&self) -> Result<NextFrame> {
        let ring = self.ring("get_next_frame")?;
        let (slot, second_field) = ring.take_ready()?;
        tracing::trace!(session = %self.name, slot, second_field, "frame handed to transport");
        Ok(NextFrame {
            slot,
            second_field,
            size: ring.frame_size(),
        })
    }

    fn frame_done(&self, slot: SlotIndex) -> Result<()> {
        self.ring("frame_done")?.mark_free(slot)?;
        stats::bump(&self.stats.frames_sent);
        Ok(())
    }

    fn framebuffer(&self, slot: SlotIndex) -> Result<MutexGuard<'_, Vec<u8>>> {
        let ring = self.ring("framebuffer")?;
        let actual = ring.state(slot).ok_or(St20Error::UnknownSlot {
            slot,
            capacity: ring.capacity(),
        })?;
        if actual != SlotState::InTransit {
            return Err(St20Error::InvalidSlotState {
                slot,
                expected: SlotState::InTransit,
                actual,
            });
        }
        ring.framebuffer(slot)
    }

    fn query_slice_lines_ready(&self, slot: SlotIndex) -> Result<u16> {
        if self.session_type != SessionType::SliceLevel {
            return Err(St20Error::Unsupported {
                session_type: self.session_type,
                operation: "query_slice_lines_ready",
            });
        }
        let lines = self.ring("query_slice_lines_ready")?.lines_ready(slot);
        Ok(lines.min(u16::MAX as u32) as u16)
    }

    fn notify_rtp_done(&self) -> Result<()> {
        match &self.mode {
            TxMode::Rtp { wake, .. } => {
                wake.notify();
                Ok(())
            }
            TxMode::Frames(_) => Err(St20Error::Unsupported {
                session_type: self.session_type,
                operation: "notify_rtp_done",
            }),
        }
    }
}

/// A transmit session: one producer thread feeding frames (or packets)
/// from a [`FrameArena`] to a transport.
///
/// The transport pulls work through [`callbacks`](Self::callbacks). The
/// worker stops on [`stop`](Self::stop), on drop, or when the
/// [`ShutdownToken`] passed at start is triggered.
pub struct TxSession {
    shared: Arc<TxShared>,
    worker: Option<JoinHandle<FrameArena>>,
    _abort: ShutdownGuard,
}

impl TxSession {
    /// Validate `config`, set up the ring and start the worker.
    ///
    /// `transport` is required for RTP-level sessions, which pull packet
    /// buffers from it; frame and slice sessions ignore it.
    pub fn start(
        config: &SessionConfig,
        source: FrameArena,
        transport: Option<Arc<dyn TxTransport>>,
        shutdown: &ShutdownToken,
    ) -> Result<Self> {
        let geometry = config.validate()?;
        if source.frame_size() != geometry.frame_size() {
            return Err(St20Error::ConfigInvalid(format!(
                "source frame size {} does not match the {} byte unit",
                source.frame_size(),
                geometry.frame_size()
            )));
        }

        let mode = match config.session_type {
            SessionType::FrameLevel | SessionType::SliceLevel => {
                TxMode::Frames(FrameSlotRing::new(config.slots, geometry.frame_size())?)
            }
            SessionType::RtpLevel => TxMode::Rtp {
                transport: transport.ok_or_else(|| {
                    St20Error::ConfigInvalid("RTP-level tx needs a packet transport".into())
                })?,
                wake: WakeSignal::default(),
            },
        };
        // packetizer errors surface here rather than on the worker
        let packetizer = match &mode {
            TxMode::Rtp { .. } => Some(config.packetizer()?),
            TxMode::Frames(_) => None,
        };

        let shared = Arc::new(TxShared {
            name: config.name.clone(),
            session_type: config.session_type,
            geometry,
            mode,
            stop: AtomicBool::new(false),
            stats: Arc::new(SessionStats::new()),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-tx", config.name))
            .spawn(move || {
                let shared = worker_shared;
                let mut source = source;
                let result = match packetizer {
                    Some(packetizer) => run_packets(&shared, &mut source, packetizer),
                    None if shared.session_type == SessionType::SliceLevel => {
                        run_slices(&shared, &mut source)
                    }
                    None => run_frames(&shared, &mut source),
                };
                if let Err(e) = result {
                    tracing::error!(session = %shared.name, error = %e, "tx worker failed");
                }
                tracing::debug!(session = %shared.name, "tx worker exited");
                source
            })?;

        let weak: Weak<TxShared> = Arc::downgrade(&shared);
        let abort = shutdown.on_shutdown(move || {
            if let Some(shared) = weak.upgrade() {
                shared.request_stop();
            }
        });

        tracing::info!(
            session = %config.name,
            session_type = %config.session_type,
            width = geometry.width,
            height = geometry.height,
            format = %geometry.format,
            fps = %geometry.fps,
            slots = config.slots,
            "tx session started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
            _abort: abort,
        })
    }

    /// The callback surface a transport drives this session through.
    pub fn callbacks(&self) -> Arc<dyn TxCallbacks> {
        self.shared.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.shared.stats.clone()
    }

    pub fn session_type(&self) -> SessionType {
        self.shared.session_type
    }

    pub fn geometry(&self) -> &VideoGeometry {
        &self.shared.geometry
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Stop the worker and take the source back. `None` if the worker
    /// panicked.
    pub fn stop(mut self) -> Option<FrameArena> {
        self.join()
    }

    fn join(&mut self) -> Option<FrameArena> {
        self.shared.request_stop();
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(source) => {
                tracing::info!(session = %self.shared.name, "tx session stopped");
                Some(source)
            }
            Err(_) => {
                tracing::error!(session = %self.shared.name, "tx worker panicked");
                None
            }
        }
    }
}

impl Drop for TxSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.join();
        }
    }
}

fn ring_of(shared: &TxShared) -> Result<&FrameSlotRing> {
    shared.ring("frame producer")
}

/// Next field flag for the unit after one sent with `second_field`.
fn next_field(geometry: &VideoGeometry, second_field: bool) -> bool {
    geometry.interlaced && !second_field
}

fn run_frames(shared: &TxShared, source: &mut FrameArena) -> Result<()> {
    let ring = ring_of(shared)?;
    let mut second_field = false;
    while let Some(slot) = ring.wait_free_slot(&shared.stop) {
        source.copy_next(&mut ring.framebuffer(slot)?);
        ring.mark_ready(slot, second_field)?;
        stats::bump(&shared.stats.frames_produced);
        tracing::trace!(session = %shared.name, slot, second_field, "frame produced");
        second_field = next_field(&shared.geometry, second_field);
    }
    Ok(())
}

/// Publish each slot first, then fill it line range by line range so the
/// transport can start sending the top of the unit early.
fn run_slices(shared: &TxShared, source: &mut FrameArena) -> Result<()> {
    let ring = ring_of(shared)?;
    let bytes_per_line = shared.geometry.bytes_per_line();
    let mut slicer = SliceProducer::new(shared.geometry.height);
    let mut second_field = false;
    while let Some(slot) = ring.wait_free_slot(&shared.stop) {
        ring.set_lines_ready(slot, 0);
        ring.mark_ready(slot, second_field)?;
        slicer.reset();
        let frame = FrameSource::frame(&*source);
        while let Some(rows) = slicer.next_slice() {
            if shared.stop.load(Ordering::Acquire) {
                return Ok(());
            }
            let bytes = rows.start as usize * bytes_per_line..rows.end as usize * bytes_per_line;
            ring.framebuffer(slot)?[bytes.clone()].copy_from_slice(&frame[bytes]);
            ring.set_lines_ready(slot, rows.end);
        }
        FrameSource::advance_frame(source);
        stats::bump(&shared.stats.frames_produced);
        second_field = next_field(&shared.geometry, second_field);
    }
    Ok(())
}

fn run_packets(
    shared: &TxShared,
    source: &mut FrameArena,
    mut packetizer: Rfc4175Packetizer,
) -> Result<()> {
    let TxMode::Rtp { transport, wake } = &shared.mode else {
        return Err(St20Error::Unsupported {
            session_type: shared.session_type,
            operation: "packet producer",
        });
    };
    while !shared.stop.load(Ordering::Acquire) {
        let Some(mut buffer) = transport.get_packet_buffer() else {
            wake.wait(&shared.stop);
            continue;
        };
        let descriptor = packetizer.build_packet_from(source, &mut buffer);
        stats::bump(&shared.stats.packets_built);
        if descriptor.marker {
            stats::bump(&shared.stats.frames_produced);
            stats::bump(&shared.stats.frames_sent);
        }
        transport.put_packet(buffer);
    }
    Ok(())
}
