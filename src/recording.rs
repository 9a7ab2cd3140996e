//! Capture and replay of raw datagrams.
//!
//! A recording file is laid out as:
//!
//! ```text
//! "PWREC" | version: u8 | metadata length: u32 LE | metadata JSON | "\n---PACKETS---\n" | frames
//! ```
//!
//! where each frame is `offset_us: u64 LE | length: u32 LE | bytes`, the offset being measured from
//! the first frame in the file. Payloads are stored as received and never interpreted.

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use nom::bytes::complete::tag;
use nom::multi::length_data;
use nom::number::complete::{le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::source::{Frame, FrameSource, SourceError};

pub const MAGIC: &[u8] = b"PWREC";
pub const FORMAT_VERSION: u8 = 1;
pub const SEPARATOR: &[u8] = b"\n---PACKETS---\n";
pub const EXTENSION: &str = "pwrec";

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Recording I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a recording file")]
    BadMagic,
    #[error("Unsupported recording version {0}")]
    UnsupportedVersion(u8),
    #[error("Malformed recording: {0}")]
    Malformed(&'static str),
    #[error("Invalid recording metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Playback speed must be between 0.01 and 1000, got {0}")]
    InvalidSpeed(f64),
    #[error("Playback task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub rig_id: String,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl RecordingMetadata {
    pub fn new(rig_id: impl Into<String>, port: u16, started_at: DateTime<Utc>) -> Self {
        RecordingMetadata {
            rig_id: rig_id.into(),
            port,
            started_at,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// `{rig}-{port}-{YYYYmmdd-HHMMSS}.pwrec`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.rig_id,
            self.port,
            self.started_at.format("%Y%m%d-%H%M%S"),
            EXTENSION
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
    pub duration: Duration,
}

/// Writes frames to a recording file as they arrive.
#[derive(Debug)]
pub struct Recorder {
    path: PathBuf,
    writer: BufWriter<File>,
    metadata: RecordingMetadata,
    // Source offset of the first frame written, file offsets are relative to it
    base: Option<Duration>,
    last_offset: Duration,
    frames: u64,
    bytes: u64,
}

impl Recorder {
    /// Create a new recording in `dir`, named after the metadata.
    pub async fn create(
        dir: impl AsRef<Path>,
        metadata: RecordingMetadata,
    ) -> Result<Recorder, RecordingError> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let path = dir.as_ref().join(metadata.file_name());
        Recorder::create_at(path, metadata).await
    }

    pub async fn create_at(
        path: impl Into<PathBuf>,
        metadata: RecordingMetadata,
    ) -> Result<Recorder, RecordingError> {
        let path = path.into();
        let file = File::create(&path).await?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&preamble_bytes(&metadata)?).await?;

        info!(
            "Recording {} port {} to {}",
            metadata.rig_id,
            metadata.port,
            path.display()
        );
        Ok(Recorder {
            path,
            writer,
            metadata,
            base: None,
            last_offset: Duration::from_secs(0),
            frames: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        let base = *self.base.get_or_insert(frame.offset);
        // Offsets must never go backwards within a file
        let offset = frame.offset.saturating_sub(base).max(self.last_offset);

        self.writer
            .write_all(&frame_prefix(offset, frame.bytes.len()))
            .await?;
        self.writer.write_all(&frame.bytes).await?;

        self.last_offset = offset;
        self.frames += 1;
        self.bytes += frame.bytes.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<RecordingSummary, RecordingError> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        let summary = RecordingSummary {
            path: self.path,
            frames: self.frames,
            bytes: self.bytes,
            duration: self.last_offset,
        };
        info!(
            "Finished recording {}: {} frames over {:.1}s",
            summary.path.display(),
            summary.frames,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }
}

fn preamble_bytes(metadata: &RecordingMetadata) -> Result<Vec<u8>, RecordingError> {
    let json = serde_json::to_vec(metadata)?;
    let mut out = Vec::with_capacity(MAGIC.len() + 5 + json.len() + SEPARATOR.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    let mut length = [0u8; 4];
    LittleEndian::write_u32(&mut length, json.len() as u32);
    out.extend_from_slice(&length);
    out.extend_from_slice(&json);
    out.extend_from_slice(SEPARATOR);
    Ok(out)
}

fn frame_prefix(offset: Duration, length: usize) -> [u8; 12] {
    let mut prefix = [0u8; 12];
    LittleEndian::write_u64(&mut prefix[..8], offset.as_micros() as u64);
    LittleEndian::write_u32(&mut prefix[8..], length as u32);
    prefix
}

/// A recording loaded into memory. Immutable, share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub metadata: RecordingMetadata,
    pub frames: Vec<Frame>,
}

type Res<'a, T> = IResult<&'a [u8], T>;

fn preamble(input: &[u8]) -> Res<(u8, &[u8])> {
    let (input, _) = tag(MAGIC)(input)?;
    let (input, version) = le_u8(input)?;
    let (input, metadata) = length_data(le_u32)(input)?;
    let (input, _) = tag(SEPARATOR)(input)?;
    Ok((input, (version, metadata)))
}

fn frame(input: &[u8]) -> Res<Frame> {
    let (input, (offset_us, bytes)) = tuple((le_u64, length_data(le_u32)))(input)?;
    Ok((
        input,
        Frame {
            offset: Duration::from_micros(offset_us),
            bytes: bytes.to_vec(),
        },
    ))
}

impl Recording {
    pub async fn load(path: impl AsRef<Path>) -> Result<Recording, RecordingError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let recording = Recording::parse(&bytes)?;
        debug!(
            "Loaded {} frames from {}",
            recording.frames.len(),
            path.as_ref().display()
        );
        Ok(recording)
    }

    pub fn parse(input: &[u8]) -> Result<Recording, RecordingError> {
        if !input.starts_with(MAGIC) {
            return Err(RecordingError::BadMagic);
        }
        if let Some(version) = input.get(MAGIC.len()).filter(|v| **v != FORMAT_VERSION) {
            return Err(RecordingError::UnsupportedVersion(*version));
        }

        let (mut input, (_, metadata)) =
            preamble(input).map_err(|_| RecordingError::Malformed("truncated header"))?;
        let metadata: RecordingMetadata = serde_json::from_slice(metadata)?;

        let mut frames = vec![];
        while !input.is_empty() {
            match frame(input) {
                Ok((rest, frame)) => {
                    frames.push(frame);
                    input = rest;
                }
                Err(_) => {
                    warn!(
                        "Dropping truncated final frame ({} trailing bytes) after {} frames",
                        input.len(),
                        frames.len()
                    );
                    break;
                }
            }
        }

        Ok(Recording { metadata, frames })
    }

    /// Offset of the last frame.
    pub fn duration(&self) -> Duration {
        self.frames
            .last()
            .map_or(Duration::from_secs(0), |f| f.offset)
    }

    /// Serialise the whole recording, mainly for building fixtures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordingError> {
        let mut out = preamble_bytes(&self.metadata)?;
        for frame in &self.frames {
            out.extend_from_slice(&frame_prefix(frame.offset, frame.bytes.len()));
            out.extend_from_slice(&frame.bytes);
        }
        Ok(out)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PlaybackOptions {
    /// 2.0 plays twice as fast
    pub speed: f64,
    pub looped: bool,
    /// Pause between the last frame and the first frame of the next loop
    pub loop_delay: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        PlaybackOptions {
            speed: 1.0,
            looped: false,
            loop_delay: Duration::from_secs(1),
        }
    }
}

pub const MIN_SPEED: f64 = 0.01;
pub const MAX_SPEED: f64 = 1000.0;

impl PlaybackOptions {
    pub fn validate(&self) -> Result<(), RecordingError> {
        if (MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            Ok(())
        } else {
            Err(RecordingError::InvalidSpeed(self.speed))
        }
    }

    fn scale(&self, offset: Duration) -> Result<Duration, SourceError> {
        Duration::try_from_secs_f64(offset.as_secs_f64() / self.speed)
            .map_err(|_| SourceError::ClockOverflow)
    }
}

/// Replays a recording in real time as a [`FrameSource`].
///
/// Each player keeps its own clock, several players started together are not kept in step.
#[derive(Debug)]
pub struct Player {
    recording: Arc<Recording>,
    options: PlaybackOptions,
    index: usize,
    loops: u32,
    origin: Option<Instant>,
    loop_start: Option<Instant>,
    last_due: Option<Instant>,
}

impl Player {
    pub fn new(recording: Arc<Recording>, options: PlaybackOptions) -> Result<Player, RecordingError> {
        options.validate()?;
        Ok(Player {
            recording,
            options,
            index: 0,
            loops: 0,
            origin: None,
            loop_start: None,
            last_due: None,
        })
    }

    /// Number of times the recording has restarted.
    pub fn loops(&self) -> u32 {
        self.loops
    }
}

#[async_trait]
impl FrameSource for Player {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        let frames = &self.recording.frames;
        if frames.is_empty() {
            return Ok(None);
        }

        if self.index >= frames.len() {
            if !self.options.looped {
                return Ok(None);
            }
            let restart = self
                .last_due
                .unwrap_or_else(Instant::now)
                .checked_add(self.options.loop_delay)
                .ok_or(SourceError::ClockOverflow)?;
            debug!("Restarting playback of {}", self.recording.metadata.rig_id);
            self.index = 0;
            self.loops += 1;
            self.loop_start = Some(restart);
        }

        let now = Instant::now();
        let origin = *self.origin.get_or_insert(now);
        let loop_start = *self.loop_start.get_or_insert(now);
        let frame = &frames[self.index];
        let due = loop_start
            .checked_add(self.options.scale(frame.offset)?)
            .ok_or(SourceError::ClockOverflow)?;

        // Cancelling here leaves the frame in place for the next call
        tokio::time::sleep_until(due).await;

        self.index += 1;
        self.last_due = Some(due);
        Ok(Some(Frame {
            offset: due.duration_since(origin),
            bytes: frame.bytes.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!(
            "replay of {} port {} at {}x",
            self.recording.metadata.rig_id, self.recording.metadata.port, self.options.speed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSummary {
    pub frames_sent: u64,
    pub loops: u32,
    pub cancelled: bool,
}

/// A playback running in the background.
#[derive(Debug)]
pub struct PlaybackHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<PlaybackSummary, RecordingError>>,
}

impl PlaybackHandle {
    /// Stop sending, the remaining frames are skipped.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the playback to end. Call once it has been cancelled, or to wait for the last frame.
    pub async fn join(&mut self) -> Result<PlaybackSummary, RecordingError> {
        (&mut self.join)
            .await
            .map_err(|e| RecordingError::Task(e.to_string()))?
    }
}

/// Send a recording's frames as UDP datagrams to `target`, preserving their spacing.
pub async fn spawn_udp_playback(
    recording: Arc<Recording>,
    target: SocketAddr,
    options: PlaybackOptions,
) -> Result<PlaybackHandle, RecordingError> {
    let player = Player::new(recording, options)?;
    let bind: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    let (cancel, cancelled) = watch::channel(false);

    let join = tokio::spawn(send_frames(player, socket, target, cancelled));
    Ok(PlaybackHandle { cancel, join })
}

// Dropping the handle closes the channel, which also stops the playback
async fn send_frames(
    mut player: Player,
    socket: UdpSocket,
    target: SocketAddr,
    mut cancelled: watch::Receiver<bool>,
) -> Result<PlaybackSummary, RecordingError> {
    info!("Replaying {} to {}", player.describe(), target);
    let mut frames_sent = 0;
    let mut was_cancelled = false;
    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => {
                was_cancelled = true;
                break;
            }
            frame = player.next() => match frame {
                Ok(Some(frame)) => {
                    socket.send_to(&frame.bytes, target).await?;
                    frames_sent += 1;
                }
                Ok(None) => break,
                Err(SourceError::Io(e)) => return Err(e.into()),
                Err(e) => return Err(RecordingError::Task(e.to_string())),
            },
        }
    }
    info!(
        "Playback to {} {} after {} frames",
        target,
        if was_cancelled { "cancelled" } else { "finished" },
        frames_sent
    );
    Ok(PlaybackSummary {
        frames_sent,
        loops: player.loops(),
        cancelled: was_cancelled,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn recording_with_offsets(offsets_ms: &[u64]) -> Recording {
        Recording {
            metadata: RecordingMetadata::new(
                "RIG_A",
                20777,
                Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
            ),
            frames: offsets_ms
                .iter()
                .enumerate()
                .map(|(i, ms)| Frame {
                    offset: Duration::from_millis(*ms),
                    bytes: vec![i as u8; 4],
                })
                .collect(),
        }
    }

    #[test]
    fn file_name_carries_rig_port_and_time() {
        let recording = recording_with_offsets(&[]);
        assert_eq!(
            recording.metadata.file_name(),
            "RIG_A-20777-20250601-093000.pwrec"
        );
    }

    #[tokio::test]
    async fn recorder_output_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = RecordingMetadata::new("RIG_B", 20778, Utc::now());
        let mut recorder = Recorder::create(dir.path().join("nested"), metadata.clone())
            .await
            .unwrap();

        // Offsets are rebased onto the first recorded frame
        for (ms, bytes) in [(1000u64, vec![1u8, 2]), (1250, vec![3]), (3000, vec![4, 5, 6])].iter() {
            recorder
                .write_frame(&Frame {
                    offset: Duration::from_millis(*ms),
                    bytes: bytes.clone(),
                })
                .await
                .unwrap();
        }
        let summary = recorder.finish().await.unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.bytes, 6);
        assert_eq!(summary.duration, Duration::from_millis(2000));

        let loaded = Recording::load(&summary.path).await.unwrap();
        assert_eq!(loaded.metadata, metadata);
        let offsets: Vec<_> = loaded.frames.iter().map(|f| f.offset.as_millis()).collect();
        assert_eq!(offsets, vec![0, 250, 2000]);
        assert_eq!(loaded.frames[2].bytes, vec![4, 5, 6]);
    }

    #[test]
    fn truncated_final_frame_is_dropped() {
        let recording = recording_with_offsets(&[0, 10, 20]);
        let bytes = recording.to_bytes().unwrap();
        let parsed = Recording::parse(&bytes[..bytes.len() - 2]).unwrap();
        assert_eq!(parsed.frames.len(), 2);
        assert_eq!(parsed.frames[..], recording.frames[..2]);
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(
            Recording::parse(b"GIF89a"),
            Err(RecordingError::BadMagic)
        ));
        let mut bytes = recording_with_offsets(&[0]).to_bytes().unwrap();
        bytes[MAGIC.len()] = 9;
        assert!(matches!(
            Recording::parse(&bytes),
            Err(RecordingError::UnsupportedVersion(9))
        ));
        assert!(matches!(
            Recording::parse(b"PWREC\x01\xff\x00"),
            Err(RecordingError::Malformed(_))
        ));
    }

    #[test]
    fn speed_must_be_in_range() {
        let recording = Arc::new(recording_with_offsets(&[0, 1000]));
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-20, 1e20].iter() {
            let options = PlaybackOptions {
                speed: *speed,
                ..PlaybackOptions::default()
            };
            assert!(matches!(
                Player::new(recording.clone(), options),
                Err(RecordingError::InvalidSpeed(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_due_times_are_errors() {
        let mut recording = recording_with_offsets(&[0]);
        recording.frames.push(Frame {
            offset: Duration::from_secs(u64::MAX / 2),
            bytes: vec![1],
        });
        let options = PlaybackOptions {
            speed: MIN_SPEED,
            ..PlaybackOptions::default()
        };
        let mut player = Player::new(Arc::new(recording), options).unwrap();
        assert!(player.next().await.unwrap().is_some());
        assert!(matches!(player.next().await, Err(SourceError::ClockOverflow)));

        let options = PlaybackOptions {
            speed: MAX_SPEED,
            looped: true,
            loop_delay: Duration::MAX,
        };
        let mut player = Player::new(Arc::new(recording_with_offsets(&[0])), options).unwrap();
        assert!(player.next().await.unwrap().is_some());
        assert!(matches!(player.next().await, Err(SourceError::ClockOverflow)));
    }

    #[tokio::test(start_paused = true)]
    async fn double_speed_halves_the_gaps() {
        let offsets: Vec<u64> = (0..=10).map(|s| s * 1000).collect();
        let recording = Arc::new(recording_with_offsets(&offsets));
        let mut player = Player::new(
            recording,
            PlaybackOptions {
                speed: 2.0,
                ..PlaybackOptions::default()
            },
        )
        .unwrap();

        let start = Instant::now();
        let mut arrivals = vec![];
        let mut order = vec![];
        while let Some(frame) = player.next().await.unwrap() {
            arrivals.push(start.elapsed());
            order.push(frame.bytes[0]);
        }

        assert_eq!(order, (0..=10).collect::<Vec<u8>>());
        assert_eq!(*arrivals.last().unwrap(), Duration::from_secs(5));
        for pair in arrivals.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn looping_restarts_after_the_delay() {
        let recording = Arc::new(recording_with_offsets(&[0, 1000]));
        let mut player = Player::new(
            recording,
            PlaybackOptions {
                speed: 1.0,
                looped: true,
                loop_delay: Duration::from_millis(300),
            },
        )
        .unwrap();

        let start = Instant::now();
        let mut seen = vec![];
        for _ in 0..5 {
            let frame = player.next().await.unwrap().unwrap();
            seen.push((frame.bytes[0], start.elapsed().as_millis()));
        }

        assert_eq!(
            seen,
            vec![(0, 0), (1, 1000), (0, 1300), (1, 2300), (0, 2600)]
        );
        assert_eq!(player.loops(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_next_loses_no_frame() {
        let recording = Arc::new(recording_with_offsets(&[0, 1000]));
        let mut player = Player::new(recording, PlaybackOptions::default()).unwrap();
        assert_eq!(player.next().await.unwrap().unwrap().bytes[0], 0);

        let timed_out = tokio::time::timeout(Duration::from_millis(100), player.next()).await;
        assert!(timed_out.is_err());
        assert_eq!(player.next().await.unwrap().unwrap().bytes[0], 1);
        assert!(player.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn udp_playback_can_be_cancelled() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let recording = Arc::new(recording_with_offsets(&[0, 60_000, 120_000]));

        let mut handle = spawn_udp_playback(recording, target, PlaybackOptions::default())
            .await
            .unwrap();
        let mut buffer = [0u8; 16];
        let (size, _) = receiver.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..size], &[0, 0, 0, 0]);

        handle.cancel();
        let summary = handle.join().await.unwrap();
        assert_eq!(
            summary,
            PlaybackSummary {
                frames_sent: 1,
                loops: 0,
                cancelled: true,
            }
        );
    }
}
