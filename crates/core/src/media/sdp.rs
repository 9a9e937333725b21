//! SDP (Session Description Protocol) generation for ST 2110-20 senders
//! (RFC 8866, SMPTE ST 2110-20 §7).
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing (live stream)
//! a=tool:st20-rs                               ← sender software
//! m=video <port> RTP/AVP 112                   ← media description
//! c=IN IP4 <group>/64                          ← destination
//! a=rtpmap:112 raw/90000                       ← encoding/clock rate
//! a=fmtp:112 sampling=YCbCr-4:2:2; ...         ← format parameters
//! a=mediaclk:direct=0                          ← media clock (ST 2110-10)
//! ```

use super::Packetizer;

/// Destination and origin fields of an SDP body.
#[derive(Debug, Clone)]
pub struct SdpSession<'a> {
    pub username: &'a str,
    pub session_id: &'a str,
    pub session_version: &'a str,
    pub session_name: &'a str,
    /// Sender address for the `o=` line.
    pub origin_ip: &'a str,
    /// Destination address for the `c=` line.
    pub dest_ip: &'a str,
    pub port: u16,
}

/// Generate an SDP description of the stream `packetizer` produces.
pub fn generate_sdp(session: &SdpSession<'_>, packetizer: &dyn Packetizer) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        session.username, session.session_id, session.session_version, session.origin_ip
    ));
    sdp.push(format!("s={}", session.session_name));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:st20-rs".to_string());
    sdp.push(format!(
        "m=video {} RTP/AVP {}",
        session.port,
        packetizer.payload_type()
    ));
    sdp.push(format!("c=IN IP4 {}/64", session.dest_ip));
    sdp.extend(packetizer.sdp_attributes());
    sdp.push("a=mediaclk:direct=0".to_string());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::{Fps, PixelFormat, VideoGeometry};
    use crate::media::rfc4175::{PackingMode, PackingPlan, Rfc4175Packetizer};
    use crate::media::rtp::RtpHeader;

    fn session() -> SdpSession<'static> {
        SdpSession {
            username: "-",
            session_id: "1234567890",
            session_version: "1",
            session_name: "st20 loopback",
            origin_ip: "192.168.1.100",
            dest_ip: "239.168.85.20",
            port: 20000,
        }
    }

    #[test]
    fn generates_st2110_20_sdp() {
        let g = VideoGeometry {
            width: 1920,
            height: 1080,
            format: PixelFormat::Yuv422_10bit,
            fps: Fps::P59_94,
            interlaced: false,
        };
        let plan =
            PackingPlan::new(1920, 1080, g.pixel_group(), 1332, PackingMode::SingleLine).unwrap();
        let p = Rfc4175Packetizer::new(plan, RtpHeader::new(112, 1), g);
        let sdp = generate_sdp(&session(), &p);

        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=- 1234567890 1 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=st20 loopback\r\n"));
        assert!(sdp.contains("m=video 20000 RTP/AVP 112\r\n"));
        assert!(
            sdp.contains("c=IN IP4 239.168.85.20/64\r\n"),
            "c= must carry the destination group"
        );
        assert!(sdp.contains("a=rtpmap:112 raw/90000\r\n"));
        assert!(sdp.contains(
            "a=fmtp:112 sampling=YCbCr-4:2:2; width=1920; height=1080; \
             exactframerate=60000/1001; depth=10; TCS=SDR; colorimetry=BT709; \
             PM=2110GPM; SSN=ST2110-20:2017; TP=2110TPN;\r\n"
        ));

        let m_idx = sdp.find("m=video").expect("SDP must include media section");
        let rtpmap_idx = sdp.find("a=rtpmap").expect("SDP must include rtpmap");
        let fmtp_idx = sdp.find("a=fmtp").expect("SDP must include fmtp");
        assert!(m_idx < rtpmap_idx, "media attributes must follow m=video");
        assert!(rtpmap_idx < fmtp_idx, "a=rtpmap must precede a=fmtp");
        assert!(sdp.ends_with("a=mediaclk:direct=0\r\n"));
    }

    #[test]
    fn interlaced_sdp_reports_frame_height() {
        let g = VideoGeometry {
            width: 1920,
            height: 540,
            format: PixelFormat::Yuv422_10bit,
            fps: Fps::P50,
            interlaced: true,
        };
        let plan =
            PackingPlan::new(1920, 540, g.pixel_group(), 1332, PackingMode::BytePacking).unwrap();
        let p = Rfc4175Packetizer::new(plan, RtpHeader::new(112, 1), g);
        let sdp = generate_sdp(&session(), &p);
        assert!(sdp.contains("height=1080;"));
        assert!(sdp.contains("exactframerate=50;"));
        assert!(sdp.contains("PM=2110BPM;"));
        assert!(sdp.contains("interlace;\r\n"));
    }
}
