use crate::error::{Result, St20Error};
use crate::media::format::{Fps, PixelFormat, VideoGeometry};
use crate::media::rfc4175::{
    DEFAULT_PAYLOAD_TYPE, Depacketizer, PackingMode, PackingPlan, Rfc4175Packetizer,
};
use crate::media::rtp::RtpHeader;
use crate::session::SessionType;

/// Payload budget per packet after the 20-byte RTP + RFC 4175 headers,
/// sized so a packet fits a standard 1500-byte MTU with IP/UDP overhead.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1332;

/// Upper bound on frame slots per session.
pub const MAX_SLOTS: usize = 16;

/// Session-level configuration shared by tx and rx sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Used in thread names and log fields.
    pub name: String,
    pub width: u32,
    /// Full picture height; each field is half of it when interlaced.
    pub height: u32,
    pub format: PixelFormat,
    pub fps: Fps,
    pub interlaced: bool,
    pub packing: PackingMode,
    pub session_type: SessionType,
    /// Frame slots in the session's ring.
    pub slots: usize,
    pub payload_type: u8,
    /// RTP SSRC; random when `None`.
    pub ssrc: Option<u32>,
    pub max_payload_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "st20".to_string(),
            width: 1920,
            height: 1080,
            format: PixelFormat::Yuv422_10bit,
            fps: Fps::P59_94,
            interlaced: false,
            packing: PackingMode::BytePacking,
            session_type: SessionType::FrameLevel,
            slots: 3,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            ssrc: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl SessionConfig {
    /// Check the configuration and derive the per-unit geometry.
    pub fn validate(&self) -> Result<VideoGeometry> {
        if self.slots == 0 || self.slots > MAX_SLOTS {
            return Err(St20Error::ConfigInvalid(format!(
                "slot count {} outside 1..={MAX_SLOTS}",
                self.slots
            )));
        }
        if self.payload_type > 0x7f {
            return Err(St20Error::ConfigInvalid(format!(
                "payload type {} does not fit 7 bits",
                self.payload_type
            )));
        }
        if self.interlaced && self.height % 2 != 0 {
            return Err(St20Error::ConfigInvalid(format!(
                "interlaced height {} is odd",
                self.height
            )));
        }
        let geometry = VideoGeometry {
            width: self.width,
            height: if self.interlaced {
                self.height / 2
            } else {
                self.height
            },
            format: self.format,
            fps: self.fps,
            interlaced: self.interlaced,
        };
        // surfaces width/height/packing errors at setup time
        self.plan_for(&geometry)?;
        Ok(geometry)
    }

    fn plan_for(&self, geometry: &VideoGeometry) -> Result<PackingPlan> {
        PackingPlan::new(
            geometry.width,
            geometry.height,
            geometry.pixel_group(),
            self.max_payload_bytes,
            self.packing,
        )
    }

    pub fn packing_plan(&self) -> Result<PackingPlan> {
        let geometry = self.validate()?;
        self.plan_for(&geometry)
    }

    pub fn rtp_header(&self) -> RtpHeader {
        match self.ssrc {
            Some(ssrc) => RtpHeader::new(self.payload_type, ssrc),
            None => RtpHeader::with_random_ssrc(self.payload_type),
        }
    }

    pub fn packetizer(&self) -> Result<Rfc4175Packetizer> {
        let geometry = self.validate()?;
        let plan = self.plan_for(&geometry)?;
        Ok(Rfc4175Packetizer::new(plan, self.rtp_header(), geometry))
    }

    pub fn depacketizer(&self) -> Result<Depacketizer> {
        let geometry = self.validate()?;
        Ok(Depacketizer::new(&geometry, self.payload_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_1080p_byte_packing() {
        let config = SessionConfig::default();
        let g = config.validate().unwrap();
        assert_eq!(g.frame_size(), 5_184_000);
        assert_eq!(config.packing_plan().unwrap().total_packets, 4115);
    }

    #[test]
    fn interlaced_geometry_uses_field_height() {
        let config = SessionConfig {
            interlaced: true,
            ..Default::default()
        };
        let g = config.validate().unwrap();
        assert_eq!(g.height, 540);
        assert_eq!(g.frame_size(), 2_592_000);
        assert_eq!(config.packing_plan().unwrap().total_packets, 2058);
    }

    #[test]
    fn rejects_bad_settings() {
        let cases = [
            SessionConfig {
                slots: 0,
                ..Default::default()
            },
            SessionConfig {
                payload_type: 200,
                ..Default::default()
            },
            SessionConfig {
                interlaced: true,
                height: 1081,
                ..Default::default()
            },
            SessionConfig {
                width: 1919,
                ..Default::default()
            },
            SessionConfig {
                max_payload_bytes: 1000,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(St20Error::ConfigInvalid(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn fixed_ssrc_is_used() {
        let config = SessionConfig {
            ssrc: Some(0x423450),
            ..Default::default()
        };
        assert_eq!(config.rtp_header().ssrc, 0x423450);
    }
}
