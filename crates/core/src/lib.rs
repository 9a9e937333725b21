pub mod config;
pub mod error;
pub mod frame;
pub mod media;
pub mod session;
pub mod shutdown;
pub mod stats;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Result, St20Error};
pub use frame::{FrameArena, FrameSink, FrameSource};
pub use media::Packetizer;
pub use media::format::{Fps, PixelFormat, VideoGeometry};
pub use media::rfc4175::{PackingMode, PackingPlan};
pub use session::{RxSession, SessionType, TxSession};
pub use shutdown::{ShutdownGuard, ShutdownToken};
pub use stats::{SessionStats, StatsReport, StatsSnapshot};
pub use transport::{Loopback, LoopbackConfig};
