//! Pixel groups and frame rates.
//!
//! RFC 4175 §4 packs samples into *pixel groups*: the smallest run of pixels
//! whose encoding is a whole number of bytes. Every byte↔pixel conversion in
//! the packetizer and depacketizer goes through [`PixelGroup`].

use std::fmt;

/// Bytes/pixels ratio of one pixel group.
///
/// 10-bit 4:2:2 is the canonical example: 2 pixels in 5 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGroup {
    /// Bytes in one pixel group.
    pub size: u32,
    /// Pixels covered by one pixel group.
    pub coverage: u32,
}

impl PixelGroup {
    pub const fn new(size: u32, coverage: u32) -> Self {
        Self { size, coverage }
    }

    /// Byte offset of pixel `pixels` within a row.
    pub fn pixel_offset_to_bytes(&self, pixels: u32) -> usize {
        pixels as usize / self.coverage as usize * self.size as usize
    }

    /// Pixel offset of byte `bytes` within a row (rounded down to a group).
    pub fn bytes_to_pixel_offset(&self, bytes: usize) -> u32 {
        (bytes / self.size as usize * self.coverage as usize) as u32
    }

    /// Bytes in one row of `width` pixels, rounded up to a whole byte.
    pub fn bytes_per_line(&self, width: u32) -> usize {
        let raw = width as usize * self.size as usize;
        raw.div_ceil(self.coverage as usize)
    }

    /// Bytes in a `width` × `height` frame.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        self.bytes_per_line(width) * height as usize
    }

    /// Round a byte count down to whole pixel groups.
    pub fn align_down(&self, bytes: usize) -> usize {
        bytes / self.size as usize * self.size as usize
    }
}

/// ST 2110-20 wire pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    Yuv422_8bit,
    #[default]
    Yuv422_10bit,
    Yuv422_12bit,
    Yuv422_16bit,
    Yuv420_8bit,
    Yuv420_10bit,
    Yuv420_12bit,
    Yuv420_16bit,
    Yuv444_8bit,
    Yuv444_10bit,
    Yuv444_12bit,
    Yuv444_16bit,
    Rgb8bit,
    Rgb10bit,
    Rgb12bit,
    Rgb16bit,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 16] = [
        Self::Yuv422_8bit,
        Self::Yuv422_10bit,
        Self::Yuv422_12bit,
        Self::Yuv422_16bit,
        Self::Yuv420_8bit,
        Self::Yuv420_10bit,
        Self::Yuv420_12bit,
        Self::Yuv420_16bit,
        Self::Yuv444_8bit,
        Self::Yuv444_10bit,
        Self::Yuv444_12bit,
        Self::Yuv444_16bit,
        Self::Rgb8bit,
        Self::Rgb10bit,
        Self::Rgb12bit,
        Self::Rgb16bit,
    ];

    pub fn pixel_group(&self) -> PixelGroup {
        match self {
            Self::Yuv422_8bit => PixelGroup::new(4, 2),
            Self::Yuv422_10bit => PixelGroup::new(5, 2),
            Self::Yuv422_12bit => PixelGroup::new(6, 2),
            Self::Yuv422_16bit => PixelGroup::new(8, 2),
            Self::Yuv420_8bit => PixelGroup::new(6, 4),
            Self::Yuv420_10bit => PixelGroup::new(15, 8),
            Self::Yuv420_12bit => PixelGroup::new(9, 4),
            Self::Yuv420_16bit => PixelGroup::new(12, 4),
            Self::Yuv444_8bit | Self::Rgb8bit => PixelGroup::new(3, 1),
            Self::Yuv444_10bit | Self::Rgb10bit => PixelGroup::new(15, 4),
            Self::Yuv444_12bit | Self::Rgb12bit => PixelGroup::new(9, 2),
            Self::Yuv444_16bit | Self::Rgb16bit => PixelGroup::new(6, 1),
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Self::Yuv422_8bit | Self::Yuv420_8bit | Self::Yuv444_8bit | Self::Rgb8bit => 8,
            Self::Yuv422_10bit | Self::Yuv420_10bit | Self::Yuv444_10bit | Self::Rgb10bit => 10,
            Self::Yuv422_12bit | Self::Yuv420_12bit | Self::Yuv444_12bit | Self::Rgb12bit => 12,
            Self::Yuv422_16bit | Self::Yuv420_16bit | Self::Yuv444_16bit | Self::Rgb16bit => 16,
        }
    }

    /// `sampling=` value for the SDP fmtp line (ST 2110-20 §7.4.1).
    pub fn sampling(&self) -> &'static str {
        match self {
            Self::Yuv422_8bit | Self::Yuv422_10bit | Self::Yuv422_12bit | Self::Yuv422_16bit => {
                "YCbCr-4:2:2"
            }
            Self::Yuv420_8bit | Self::Yuv420_10bit | Self::Yuv420_12bit | Self::Yuv420_16bit => {
                "YCbCr-4:2:0"
            }
            Self::Yuv444_8bit | Self::Yuv444_10bit | Self::Yuv444_12bit | Self::Yuv444_16bit => {
                "YCbCr-4:4:4"
            }
            Self::Rgb8bit | Self::Rgb10bit | Self::Rgb12bit | Self::Rgb16bit => "RGB",
        }
    }

    /// Parse a short name such as `yuv422-10` or `rgb8`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Yuv422_8bit => "yuv422-8",
            Self::Yuv422_10bit => "yuv422-10",
            Self::Yuv422_12bit => "yuv422-12",
            Self::Yuv422_16bit => "yuv422-16",
            Self::Yuv420_8bit => "yuv420-8",
            Self::Yuv420_10bit => "yuv420-10",
            Self::Yuv420_12bit => "yuv420-12",
            Self::Yuv420_16bit => "yuv420-16",
            Self::Yuv444_8bit => "yuv444-8",
            Self::Yuv444_10bit => "yuv444-10",
            Self::Yuv444_12bit => "yuv444-12",
            Self::Yuv444_16bit => "yuv444-16",
            Self::Rgb8bit => "rgb8",
            Self::Rgb10bit => "rgb10",
            Self::Rgb12bit => "rgb12",
            Self::Rgb16bit => "rgb16",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pg = self.pixel_group();
        write!(
            f,
            "{} {}-bit ({} bytes / {} px)",
            self.sampling(),
            self.depth(),
            pg.size,
            pg.coverage
        )
    }
}

/// RTP media clock for video (RFC 4175 §6.1).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Video frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fps {
    P23_98,
    P24,
    P25,
    P29_97,
    P30,
    P50,
    #[default]
    P59_94,
    P60,
    P100,
    P119_88,
    P120,
}

impl Fps {
    /// Exact rate as `(numerator, denominator)`.
    pub fn fraction(&self) -> (u32, u32) {
        match self {
            Self::P23_98 => (24000, 1001),
            Self::P24 => (24, 1),
            Self::P25 => (25, 1),
            Self::P29_97 => (30000, 1001),
            Self::P30 => (30, 1),
            Self::P50 => (50, 1),
            Self::P59_94 => (60000, 1001),
            Self::P60 => (60, 1),
            Self::P100 => (100, 1),
            Self::P119_88 => (120000, 1001),
            Self::P120 => (120, 1),
        }
    }

    pub fn as_f64(&self) -> f64 {
        let (num, den) = self.fraction();
        num as f64 / den as f64
    }

    /// 90 kHz timestamp of frame `index`, wrapped to 32 bits.
    pub fn media_clock(&self, index: u64) -> u32 {
        let (num, den) = self.fraction();
        (index as u128 * VIDEO_CLOCK_RATE as u128 * den as u128 / num as u128) as u32
    }

    /// Parse `59.94`, `50`, `p29.97` and similar.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches(['p', 'P']);
        Some(match name {
            "23.98" => Self::P23_98,
            "24" => Self::P24,
            "25" => Self::P25,
            "29.97" => Self::P29_97,
            "30" => Self::P30,
            "50" => Self::P50,
            "59.94" => Self::P59_94,
            "60" => Self::P60,
            "100" => Self::P100,
            "119.88" => Self::P119_88,
            "120" => Self::P120,
            _ => return None,
        })
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fraction() {
            (num, 1) => write!(f, "{num}"),
            _ => write!(f, "{:.2}", self.as_f64()),
        }
    }
}

/// Dimensions and timing of one video stream.
///
/// `height` is the height of one transmission unit: the full frame for
/// progressive video, one field for interlaced video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: Fps,
    pub interlaced: bool,
}

impl VideoGeometry {
    pub fn pixel_group(&self) -> PixelGroup {
        self.format.pixel_group()
    }

    pub fn bytes_per_line(&self) -> usize {
        self.pixel_group().bytes_per_line(self.width)
    }

    /// Bytes in one transmission unit.
    pub fn frame_size(&self) -> usize {
        self.pixel_group().frame_size(self.width, self.height)
    }

    /// Rows of the full picture.
    pub fn frame_height(&self) -> u32 {
        if self.interlaced {
            self.height * 2
        } else {
            self.height
        }
    }
}
