use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use st20::media::sdp::{SdpSession, generate_sdp};
use st20::{
    FrameArena, Fps, Loopback, LoopbackConfig, PackingMode, PixelFormat, RxSession, SessionConfig,
    SessionType, ShutdownToken, St20Error, TxSession, VideoGeometry,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "st20-loopback",
    about = "Run an ST 2110-20 tx session into an rx session over an in-process link"
)]
struct Args {
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Full picture height (each field is half of it when interlaced)
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Pixel format, e.g. yuv422-10, yuv420-8, rgb8
    #[arg(long, default_value = "yuv422-10", value_parser = parse_format)]
    format: PixelFormat,

    /// Frame rate, e.g. 59.94, 50, p25
    #[arg(long, default_value = "59.94", value_parser = parse_fps)]
    fps: Fps,

    /// Packing mode: bpm, gpm or sl
    #[arg(long, default_value = "bpm", value_parser = parse_packing)]
    packing: PackingMode,

    /// Session type: frame, slice or rtp
    #[arg(long = "type", default_value = "frame", value_parser = parse_session_type)]
    session_type: SessionType,

    #[arg(long)]
    interlaced: bool,

    /// Frame slots per session
    #[arg(long, default_value_t = 3)]
    slots: usize,

    /// Units to send; runs until Ctrl-C when omitted
    #[arg(long, short = 'n')]
    frames: Option<u64>,

    /// Raw source file; a generated pattern when omitted
    #[arg(long)]
    src: Option<PathBuf>,

    /// Write received units here
    #[arg(long)]
    dst: Option<PathBuf>,

    /// Drop every Nth packet on the link
    #[arg(long)]
    drop_every: Option<u32>,

    /// Send as fast as possible instead of at the frame rate
    #[arg(long)]
    unpaced: bool,

    /// Print the tx SDP and continue
    #[arg(long)]
    sdp: bool,
}

fn parse_format(s: &str) -> Result<PixelFormat, String> {
    PixelFormat::from_name(s).ok_or_else(|| format!("unknown pixel format `{s}`"))
}

fn parse_fps(s: &str) -> Result<Fps, String> {
    Fps::from_name(s).ok_or_else(|| format!("unsupported frame rate `{s}`"))
}

fn parse_packing(s: &str) -> Result<PackingMode, String> {
    PackingMode::from_name(s).ok_or_else(|| format!("unknown packing mode `{s}`"))
}

fn parse_session_type(s: &str) -> Result<SessionType, String> {
    SessionType::from_name(s).ok_or_else(|| format!("unknown session type `{s}`"))
}

/// Two units of diagonal ramps, different per unit.
fn test_pattern(geometry: &VideoGeometry) -> Vec<u8> {
    let bpl = geometry.bytes_per_line();
    let fs = geometry.frame_size();
    (0..2 * fs)
        .map(|i| {
            let (unit, at) = (i / fs, i % fs);
            ((at / bpl + at % bpl + unit * 64) % 256) as u8
        })
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("st20-loopback: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the achieved rate is within 5% of the configured one.
fn run(args: &Args) -> st20::Result<bool> {
    let config = SessionConfig {
        name: "loopback".to_string(),
        width: args.width,
        height: args.height,
        format: args.format,
        fps: args.fps,
        interlaced: args.interlaced,
        packing: args.packing,
        session_type: args.session_type,
        slots: args.slots,
        ..Default::default()
    };
    let geometry = config.validate()?;
    let fs = geometry.frame_size();

    if args.sdp {
        let packetizer = config.packetizer()?;
        let session = SdpSession {
            username: "-",
            session_id: "0",
            session_version: "0",
            session_name: "st20-loopback",
            origin_ip: "127.0.0.1",
            dest_ip: "239.0.0.1",
            port: 20000,
        };
        print!("{}", generate_sdp(&session, &packetizer));
    }

    let source = match &args.src {
        Some(path) => FrameArena::load(path, fs)?,
        None => FrameArena::new(test_pattern(&geometry), fs)?,
    };
    let sink = match &args.dst {
        Some(_) => Some(FrameArena::with_frames(source.frame_count(), fs)?),
        None => None,
    };

    let shutdown = ShutdownToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger())
            .map_err(|e| St20Error::Io(io::Error::other(e)))?;
    }

    let link = Loopback::new(
        &config,
        LoopbackConfig {
            drop_every: args.drop_every,
            paced: !args.unpaced,
            ..Default::default()
        },
    )?;
    let tx = TxSession::start(&config, source, Some(link.tx_transport()), &shutdown)?;
    let rx = RxSession::start(&config, sink, link.rx_transport(), &shutdown)?;
    let (tx_stats, rx_stats, link_stats) = (tx.stats(), rx.stats(), link.stats());

    let started = Instant::now();
    let handle = link.spawn(tx.callbacks(), rx.callbacks(), args.frames, shutdown.clone())?;
    let mut last_report = started;
    while !handle.is_finished() {
        thread::sleep(Duration::from_millis(50));
        if last_report.elapsed() >= REPORT_INTERVAL {
            tx_stats.report("tx");
            rx_stats.report("rx");
            link_stats.report("link");
            last_report = Instant::now();
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    let sent = handle
        .join()
        .map_err(|_| St20Error::Io(io::Error::other("loopback thread panicked")))??;

    tx.stop();
    let sink = rx.stop();
    if let (Some(path), Some(sink)) = (&args.dst, sink) {
        sink.save(path)?;
    }

    let rx = rx_stats.snapshot();
    let achieved = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
    let target = args.fps.as_f64();
    let ok = args.unpaced || (achieved - target).abs() <= target * 0.05;
    println!(
        "{}: {sent} units in {elapsed:.2}s, {achieved:.2} fps (target {target:.2}), \
         {} received, {} incomplete, {} dropped",
        if ok { "OK" } else { "FAILED" },
        rx.frames_consumed,
        rx.frames_incomplete,
        rx.frames_dropped
    );
    Ok(ok)
}
