use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use pitwall::leaderboard::{JsonLinesStore, LeaderboardEngine, Scope};
use pitwall::protocol::{
    self, DecodeError, FormatRegistry, Layout, PacketKind, ProtocolVersion, HEADER_SIZE,
};
use pitwall::recording::{
    spawn_udp_playback, PlaybackOptions, Recorder, Recording, RecordingMetadata, MAX_SPEED,
    MIN_SPEED,
};
use pitwall::session::format_lap_time;
use pitwall::simulator::{LapPlan, SyntheticRig, MAX_SCRIPT_LAPS};
use pitwall::source::{FrameSource, UdpSource};
use pitwall::{BackoffConfig, Broadcaster, Config, SessionManager};

#[derive(Debug, Parser)]
#[command(name = "pitwall", version, about = "F1 24/25 telemetry ingestion for multiple rigs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen on every configured rig port and run the operator console on stdin
    Serve {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Capture raw datagrams from one port into a recording file
    Record {
        #[arg(long, default_value = "RIG_A")]
        rig: String,
        #[arg(short, long, default_value_t = 20777)]
        port: u16,
        #[arg(short, long, default_value = "recordings")]
        out: PathBuf,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Send a recording to a UDP target with its original timing
    Replay {
        file: PathBuf,
        #[arg(short, long, default_value = "127.0.0.1:20777")]
        target: SocketAddr,
        #[arg(short, long, default_value_t = 1.0)]
        speed: f64,
        #[arg(long = "loop")]
        looped: bool,
        #[arg(long, default_value_t = 1000)]
        loop_delay_ms: u64,
    },
    /// Summarise the packets in a recording
    Inspect {
        file: PathBuf,
        /// Print the first packet of this kind, by name or id
        #[arg(long)]
        dump: Option<String>,
    },
    /// Drive a rig with scripted laps over UDP
    Simulate {
        #[arg(short, long, default_value = "127.0.0.1:20777")]
        target: SocketAddr,
        #[arg(long, default_value_t = 2025)]
        format: u16,
        #[arg(long, default_value_t = 3)]
        laps: usize,
        #[arg(long, default_value_t = 90_000)]
        lap_time_ms: u32,
        #[arg(long, default_value_t = 60)]
        samples_per_lap: usize,
        /// Time compression, 10.0 runs a 90s lap in 9s
        #[arg(long, default_value_t = 10.0)]
        speed: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Serve { config } => serve(config).await,
        Command::Record {
            rig,
            port,
            out,
            seconds,
        } => record(rig, port, out, seconds).await,
        Command::Replay {
            file,
            target,
            speed,
            looped,
            loop_delay_ms,
        } => {
            let options = PlaybackOptions {
                speed,
                looped,
                loop_delay: Duration::from_millis(loop_delay_ms),
            };
            replay(file, target, options).await
        }
        Command::Inspect { file, dump } => inspect(file, dump).await,
        Command::Simulate {
            target,
            format,
            laps,
            lap_time_ms,
            samples_per_lap,
            speed,
        } => simulate(target, format, laps, lap_time_ms, samples_per_lap, speed).await,
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    let store = JsonLinesStore::open(&config.leaderboard_path).with_context(|| {
        format!(
            "Failed to open leaderboard at {}",
            config.leaderboard_path.display()
        )
    })?;
    let leaderboard = LeaderboardEngine::new(Arc::new(store));
    let broadcaster = Broadcaster::new(config.broadcast_capacity);

    let mut manager = SessionManager::new(leaderboard, broadcaster, config);
    let addrs = manager
        .spawn_all()
        .await
        .context("Failed to start rig workers")?;
    for addr in addrs {
        info!("Listening on {}", addr);
    }
    println!("Type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_console_command(&manager, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Returns false when the console should exit.
async fn run_console_command(manager: &SessionManager, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (None, _) => Ok(()),
        (Some("quit"), _) | (Some("exit"), _) => return false,
        (Some("help"), _) => {
            println!("register <rig> <name> | stop <rig> | reset <rig> | status");
            println!("leaderboard <today|month|track> [track] | record <rig> | stop-record <rig> | quit");
            Ok(())
        }
        (Some("register"), Some(rig)) => {
            let name = words.collect::<Vec<_>>().join(" ");
            manager
                .register_driver(rig, &name)
                .await
                .map(|_| println!("{} registered on {}", name, rig))
                .map_err(anyhow::Error::from)
        }
        (Some("stop"), Some(rig)) => manager
            .stop_session(rig)
            .await
            .map(|summary| {
                println!(
                    "{} stopped: {} laps, best {}",
                    rig,
                    summary.laps_completed,
                    summary
                        .best_lap_time_ms
                        .map(format_lap_time)
                        .unwrap_or_else(|| "-".to_string())
                )
            })
            .map_err(anyhow::Error::from),
        (Some("reset"), Some(rig)) => manager
            .reset_session(rig)
            .await
            .map(|_| println!("{} reset", rig))
            .map_err(anyhow::Error::from),
        (Some("record"), Some(rig)) => manager
            .start_recording(rig)
            .await
            .map(|path| println!("Recording {} to {}", rig, path.display()))
            .map_err(anyhow::Error::from),
        (Some("stop-record"), Some(rig)) => manager
            .stop_recording(rig)
            .await
            .map(|summary| {
                println!(
                    "Saved {} frames to {}",
                    summary.frames,
                    summary.path.display()
                )
            })
            .map_err(anyhow::Error::from),
        (Some("status"), _) => print_status(manager).await,
        (Some("leaderboard"), Some(scope)) => {
            print_leaderboard(manager.leaderboard(), scope, words.next())
        }
        (Some(command), _) => Err(anyhow!("Unknown or incomplete command `{}`", command)),
    };

    if let Err(e) = result {
        println!("Error: {:#}", e);
    }
    true
}

async fn print_status(manager: &SessionManager) -> Result<()> {
    let window = manager.config().receiving_window();
    for rig_id in manager.rig_ids() {
        let snapshot = manager.snapshot(rig_id).await?;
        let receiving = manager
            .stats(rig_id)
            .map_or(false, |stats| stats.is_receiving(window));
        let stats = manager
            .stats(rig_id)
            .map(|stats| stats.snapshot())
            .unwrap_or_default();
        println!(
            "{:<8} {:>5} {:<10} {:<16} {:<20} lap {:>2} best {:>9} last {:>9} {} pkts {}",
            snapshot.rig_id,
            snapshot.port,
            snapshot.state.to_string(),
            snapshot.driver_name.as_deref().unwrap_or("-"),
            snapshot.track_name,
            snapshot.current_lap,
            snapshot
                .best_lap_time_ms
                .map(format_lap_time)
                .unwrap_or_else(|| "-".to_string()),
            snapshot
                .last_lap_time_ms
                .map(format_lap_time)
                .unwrap_or_else(|| "-".to_string()),
            stats.packets,
            if receiving { "receiving" } else { "silent" },
        );
    }
    Ok(())
}

fn print_leaderboard(leaderboard: &LeaderboardEngine, scope: &str, track: Option<&str>) -> Result<()> {
    let scope: Scope = scope.parse()?;
    let records = leaderboard.query(scope, track, 10)?;
    if records.is_empty() {
        println!("No laps for {}", scope);
    }
    for (position, record) in records.iter().enumerate() {
        println!(
            "{:>2}. {:<20} {:>9} {:<16} {:<10} {}",
            position + 1,
            record.driver_name,
            record.formatted_time(),
            record.track_name,
            record.compound,
            record.timestamp.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn record(rig: String, port: u16, out: PathBuf, seconds: Option<u64>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let mut source = UdpSource::bind(addr).await?;
    let metadata = RecordingMetadata::new(rig, port, Utc::now());
    let mut recorder = Recorder::create(&out, metadata)
        .await
        .with_context(|| format!("Failed to create recording in {}", out.display()))?;

    let stop = async move {
        let deadline = async {
            match seconds {
                Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = deadline => (),
        }
    };
    capture(&mut source, &mut recorder, &BackoffConfig::default(), stop).await?;

    let summary = recorder.finish().await?;
    println!(
        "Saved {} frames ({} bytes, {:.1}s) to {}",
        summary.frames,
        summary.bytes,
        summary.duration.as_secs_f64(),
        summary.path.display()
    );
    Ok(())
}

/// Write frames from `source` until `stop` completes or the source runs out.
async fn capture(
    source: &mut dyn FrameSource,
    recorder: &mut Recorder,
    backoff: &BackoffConfig,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(stop);
    let mut failures = 0;
    let mut retry_at: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
            }
            frame = source.next(), if retry_at.is_none() => match frame {
                Ok(Some(frame)) => {
                    failures = 0;
                    recorder.write_frame(&frame).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    let delay = backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    warn!("Read failed ({}), retrying in {}ms", e, delay.as_millis());
                    retry_at = Some(Instant::now() + delay);
                }
            },
        }
    }
    Ok(())
}

async fn replay(file: PathBuf, target: SocketAddr, options: PlaybackOptions) -> Result<()> {
    let recording = Recording::load(&file)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))?;
    info!(
        "Loaded {} frames recorded on {} port {} at {}",
        recording.frames.len(),
        recording.metadata.rig_id,
        recording.metadata.port,
        recording.metadata.started_at
    );

    let mut handle = spawn_udp_playback(Arc::new(recording), target, options).await?;
    let summary = tokio::select! {
        summary = handle.join() => summary?,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            handle.join().await?
        }
    };
    println!(
        "Sent {} frames over {} loops{}",
        summary.frames_sent,
        summary.loops + 1,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn parse_kind(name: &str) -> Result<PacketKind> {
    if let Ok(id) = name.parse::<u8>() {
        return PacketKind::try_from(id).map_err(|id| anyhow!("No packet kind with id {}", id));
    }
    PacketKind::ALL
        .iter()
        .copied()
        .find(|kind| kind.to_string().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("No packet kind named `{}`", name))
}

async fn inspect(file: PathBuf, dump: Option<String>) -> Result<()> {
    let dump = dump.as_deref().map(parse_kind).transpose()?;
    let recording = Recording::load(&file)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))?;
    println!(
        "{} port {}, started {}, written by {}",
        recording.metadata.rig_id,
        recording.metadata.port,
        recording.metadata.started_at,
        recording.metadata.version
    );
    println!(
        "{} frames over {:.1}s",
        recording.frames.len(),
        recording.duration().as_secs_f64()
    );

    let mut histogram: BTreeMap<(ProtocolVersion, PacketKind), usize> = BTreeMap::new();
    let mut errors: BTreeMap<String, usize> = BTreeMap::new();
    let mut dumped = false;
    for frame in &recording.frames {
        match protocol::decode(&frame.bytes) {
            Ok(packet) => {
                *histogram
                    .entry((packet.header.format, packet.kind()))
                    .or_default() += 1;
                if !dumped && dump == Some(packet.kind()) {
                    println!("{:#?}", packet);
                    let layout = FormatRegistry::standard().get(packet.header.format, packet.kind());
                    if let Some(layout) = layout {
                        dump_fields(&frame.bytes, layout);
                    }
                    dumped = true;
                }
            }
            Err(e) => {
                let key = match e {
                    DecodeError::UnsupportedFormat(format) => format!("unsupported format {}", format),
                    DecodeError::UnknownPacketKind { format, id } => {
                        format!("unknown kind {} ({})", id, format)
                    }
                    DecodeError::TruncatedBuffer { .. } => "truncated".to_string(),
                    DecodeError::Malformed { kind, .. } => format!("malformed {}", kind),
                };
                *errors.entry(key).or_default() += 1;
            }
        }
    }

    for ((format, kind), count) in &histogram {
        println!("{:>6} {:<20} {}", format.to_string(), kind.to_string(), count);
    }
    for (error, count) in &errors {
        println!("{:>6} {:<20} {}", "-", error, count);
    }
    if let (Some(kind), false) = (dump, dumped) {
        println!("No {} packet in this recording", kind);
    }
    Ok(())
}

/// Raw bytes of every field, entry fields shown for the first car only.
fn dump_fields(bytes: &[u8], layout: &Layout) {
    println!("{:>6} {:>5}  {:<32} bytes", "offset", "width", "field");
    for field in layout.fields() {
        let offset = match layout.offset_of(field.name) {
            Some(offset) => offset,
            None => continue,
        };
        let start = HEADER_SIZE + offset;
        let raw = bytes.get(start..start + field.width).unwrap_or(&[]);
        let hex: Vec<String> = raw.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        let more = if raw.len() > 16 { " .." } else { "" };
        println!(
            "{:>6} {:>5}  {:<32} {}{}",
            offset,
            field.width,
            field.name,
            hex.join(" "),
            more
        );
    }
}

async fn simulate(
    target: SocketAddr,
    format: u16,
    laps: usize,
    lap_time_ms: u32,
    samples_per_lap: usize,
    speed: f64,
) -> Result<()> {
    let format = ProtocolVersion::from_wire(format)
        .ok_or_else(|| anyhow!("Unsupported format {}, use 2024 or 2025", format))?;
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        bail!("Speed must be between {} and {}", MIN_SPEED, MAX_SPEED);
    }
    if laps > MAX_SCRIPT_LAPS {
        warn!("Lap numbers are a single byte, sending {} laps", MAX_SCRIPT_LAPS);
    }
    let laps = laps.min(MAX_SCRIPT_LAPS);

    let plans = vec![
        LapPlan {
            lap_time_ms,
            invalid: false,
        };
        laps
    ];
    let session_uid = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let mut rig = SyntheticRig::new(format, session_uid);
    let interval = Duration::from_millis(u64::from(lap_time_ms) / samples_per_lap.max(1) as u64);
    let script = rig.script(&plans, samples_per_lap, interval);

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let start = Instant::now();
    info!(
        "Sending {} laps as {} packets to {}",
        laps,
        script.len(),
        target
    );
    for timed in &script {
        let due = start + Duration::from_secs_f64(timed.offset.as_secs_f64() / speed);
        tokio::time::sleep_until(due).await;
        socket.send_to(&timed.packet.to_bytes()?, target).await?;
    }
    println!("Sent {} packets for session {:016x}", script.len(), session_uid);
    Ok(())
}
