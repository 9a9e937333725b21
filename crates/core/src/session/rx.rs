use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::config::SessionConfig;
use crate::error::{Result, St20Error};
use crate::frame::{FrameArena, ReceiveRing, SliceMeta, SliceValidator};
use crate::media::format::VideoGeometry;
use crate::media::rfc4175::Depacketizer;
use crate::shutdown::{ShutdownGuard, ShutdownToken};
use crate::stats::{self, SessionStats};
use crate::transport::{RxCallbacks, RxFrame, RxTransport};

use super::SessionType;
use super::wake::WakeSignal;

enum RxMode {
    Frames {
        ring: ReceiveRing<RxFrame>,
        slices: SliceValidator,
    },
    Rtp(WakeSignal),
}

struct RxShared {
    name: String,
    session_type: SessionType,
    geometry: VideoGeometry,
    transport: Arc<dyn RxTransport>,
    mode: RxMode,
    stop: AtomicBool,
    stats: Arc<SessionStats>,
}

impl RxShared {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        match &self.mode {
            RxMode::Frames { ring, .. } => ring.wake(),
            RxMode::Rtp(wake) => wake.notify(),
        }
    }

    fn unsupported(&self, operation: &'static str) -> St20Error {
        St20Error::Unsupported {
            session_type: self.session_type,
            operation,
        }
    }
}

impl RxCallbacks for RxShared {
    fn session_type(&self) -> SessionType {
        self.session_type
    }

    fn notify_frame_ready(&self, frame: RxFrame) -> Result<()> {
        let RxMode::Frames { ring, .. } = &self.mode else {
            self.transport.put_framebuffer(frame.buffer);
            return Err(self.unsupported("notify_frame_ready"));
        };
        stats::bump(&self.stats.frames_received);
        if !frame.complete {
            stats::bump(&self.stats.frames_incomplete);
            tracing::debug!(session = %self.name, timestamp = frame.timestamp, "incomplete frame");
        }
        match ring.enqueue_received(frame) {
            Ok(slot) => {
                tracing::trace!(session = %self.name, slot, "frame queued");
                Ok(())
            }
            Err(busy) => {
                stats::bump(&self.stats.frames_dropped);
                tracing::warn!(
                    session = %self.name,
                    slot = busy.slot,
                    timestamp = busy.frame.timestamp,
                    "receive slot busy, frame dropped"
                );
                let slot = busy.slot;
                self.transport.put_framebuffer(busy.frame.buffer);
                Err(St20Error::SlotBusy { slot })
            }
        }
    }

    fn notify_slice_ready(&self, meta: SliceMeta) -> Result<()> {
        let RxMode::Frames { slices, .. } = &self.mode else {
            return Err(self.unsupported("notify_slice_ready"));
        };
        if self.session_type != SessionType::SliceLevel {
            return Err(self.unsupported("notify_slice_ready"));
        }
        if !slices.check(meta) {
            stats::bump(&self.stats.slice_mismatches);
        }
        Ok(())
    }

    fn notify_rtp_ready(&self) -> Result<()> {
        match &self.mode {
            RxMode::Rtp(wake) => {
                wake.notify();
                Ok(())
            }
            RxMode::Frames { .. } => Err(self.unsupported("notify_rtp_ready")),
        }
    }
}

/// A receive session: one consumer thread draining frames (or packets)
/// from a transport into an optional [`FrameArena`] sink.
///
/// Frames still queued when the session stops are consumed before the
/// worker exits, so every buffer is returned to the transport.
pub struct RxSession {
    shared: Arc<RxShared>,
    worker: Option<JoinHandle<Option<FrameArena>>>,
    _abort: ShutdownGuard,
}

impl RxSession {
    pub fn start(
        config: &SessionConfig,
        sink: Option<FrameArena>,
        transport: Arc<dyn RxTransport>,
        shutdown: &ShutdownToken,
    ) -> Result<Self> {
        let geometry = config.validate()?;
        if let Some(size) = sink
            .as_ref()
            .map(FrameArena::frame_size)
            .filter(|&size| size != geometry.frame_size())
        {
            return Err(St20Error::ConfigInvalid(format!(
                "sink frame size {size} does not match the {} byte unit",
                geometry.frame_size()
            )));
        }

        let (mode, depacketizer) = match config.session_type {
            SessionType::FrameLevel | SessionType::SliceLevel => (
                RxMode::Frames {
                    ring: ReceiveRing::new(config.slots)?,
                    slices: SliceValidator::new(geometry.bytes_per_line()),
                },
                None,
            ),
            SessionType::RtpLevel => (
                RxMode::Rtp(WakeSignal::default()),
                Some(config.depacketizer()?),
            ),
        };
        // RTP sessions without a sink still need somewhere to reassemble
        let scratch = match (&depacketizer, &sink) {
            (Some(_), None) => Some(FrameArena::with_frames(1, geometry.frame_size())?),
            _ => None,
        };

        let shared = Arc::new(RxShared {
            name: config.name.clone(),
            session_type: config.session_type,
            geometry,
            transport,
            mode,
            stop: AtomicBool::new(false),
            stats: Arc::new(SessionStats::new()),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-rx", config.name))
            .spawn(move || {
                let shared = worker_shared;
                let mut sink = sink;
                match depacketizer {
                    Some(depacketizer) => {
                        let result = match (&mut sink, scratch) {
                            (Some(sink), _) => run_packets(&shared, depacketizer, sink),
                            (None, Some(mut scratch)) => {
                                run_packets(&shared, depacketizer, &mut scratch)
                            }
                            (None, None) => Ok(()),
                        };
                        if let Err(e) = result {
                            tracing::error!(session = %shared.name, error = %e, "rx worker failed");
                        }
                    }
                    None => run_frames(&shared, sink.as_mut()),
                }
                tracing::debug!(session = %shared.name, "rx worker exited");
                sink
            })?;

        let weak: Weak<RxShared> = Arc::downgrade(&shared);
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
            slots = config.slots,
            "rx session started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
            _abort: abort,
        })
    }

    pub fn callbacks(&self) -> Arc<dyn RxCallbacks> {
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

    /// Stop the worker after it drains what is queued, and take the sink
    /// back.
    pub fn stop(mut self) -> Option<FrameArena> {
        self.join()
    }

    fn join(&mut self) -> Option<FrameArena> {
        self.shared.request_stop();
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(sink) => {
                tracing::info!(session = %self.shared.name, "rx session stopped");
                sink
            }
            Err(_) => {
                tracing::error!(session = %self.shared.name, "rx worker panicked");
                None
            }
        }
    }
}

impl Drop for RxSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.join();
        }
    }
}

fn run_frames(shared: &RxShared, mut sink: Option<&mut FrameArena>) {
    let RxMode::Frames { ring, .. } = &shared.mode else {
        return;
    };
    while let Some(frame) = ring.wait_received(&shared.stop) {
        if let Some(sink) = sink.as_deref_mut() {
            let size = frame.size.min(frame.buffer.len());
            sink.store_next(&frame.buffer[..size]);
        }
        stats::bump(&shared.stats.frames_consumed);
        tracing::trace!(
            session = %shared.name,
            timestamp = frame.timestamp,
            second_field = frame.second_field,
            "frame consumed"
        );
        shared.transport.put_framebuffer(frame.buffer);
    }
}

/// Pull packets until the transport runs dry, then sleep until notified.
/// Packets already queued at stop are still placed.
fn run_packets(
    shared: &RxShared,
    mut depacketizer: Depacketizer,
    sink: &mut FrameArena,
) -> Result<()> {
    let RxMode::Rtp(wake) = &shared.mode else {
        return Err(shared.unsupported("packet consumer"));
    };
    loop {
        while let Some(packet) = shared.transport.get_packet() {
            stats::bump(&shared.stats.packets_received);
            match depacketizer.on_packet(&packet, sink) {
                Ok(outcome) => {
                    if let Some(summary) = outcome.unterminated {
                        stats::bump(&shared.stats.frames_received);
                        stats::bump(&shared.stats.frames_incomplete);
                        tracing::debug!(
                            session = %shared.name,
                            timestamp = summary.timestamp,
                            received = summary.received,
                            "frame ended without marker"
                        );
                    }
                    if let Some(summary) = outcome.completed {
                        stats::bump(&shared.stats.frames_received);
                        stats::bump(&shared.stats.frames_consumed);
                        if !summary.is_complete() {
                            stats::bump(&shared.stats.frames_incomplete);
                        }
                    }
                }
                Err(e) => {
                    stats::bump(&shared.stats.packets_dropped);
                    tracing::warn!(session = %shared.name, error = %e, "packet dropped");
                }
            }
            shared.transport.put_packet_buffer(packet);
        }
        if shared.stop.load(Ordering::Acquire) {
            return Ok(());
        }
        wake.wait(&shared.stop);
    }
}
