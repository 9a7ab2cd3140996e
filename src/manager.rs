//! Per-rig ingestion workers and the manager which owns them.
//!
//! Each rig gets one tokio task which exclusively owns its [`RigSession`]. Frames from the rig's
//! [`FrameSource`] and operator commands are interleaved by a single `select!` loop, commands
//! first, so lifecycle changes are applied in arrival order and never race packet processing.

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::{BackoffConfig, Config, RigConfig};
use crate::leaderboard::LeaderboardEngine;
use crate::protocol::{self, DecodeError};
use crate::recording::{Recorder, RecordingError, RecordingMetadata, RecordingSummary};
use crate::session::{LapRecord, RigSession, RigSnapshot, SessionError, SessionEvent, SessionSummary};
use crate::source::{Frame, FrameSource, SourceError, UdpSource};

pub const CONTROL_QUEUE: usize = 32;
pub const MAX_PENDING_RECORDS: usize = 64;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Rig {rig_id} could not start: {source}")]
    Bind { rig_id: String, source: SourceError },
    #[error("Rig {0} is already running")]
    DuplicateRig(String),
    #[error("No rig named {0}")]
    UnknownRig(String),
    #[error("Worker for rig {0} has stopped")]
    WorkerGone(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Rig {0} is already recording")]
    AlreadyRecording(String),
    #[error("Rig {0} is not recording")]
    NotRecording(String),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

/// Commands delivered to a rig worker, each carrying its reply channel.
#[derive(Debug)]
pub enum Control {
    RegisterDriver {
        name: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    StopSession {
        reply: oneshot::Sender<Result<SessionSummary, SessionError>>,
    },
    ResetSession {
        reply: oneshot::Sender<()>,
    },
    StartRecording {
        dir: PathBuf,
        reply: oneshot::Sender<Result<PathBuf, ManagerError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<RecordingSummary, ManagerError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RigSnapshot>,
    },
}

/// Counters kept by a rig worker, readable from anywhere without asking the worker.
#[derive(Debug, Default)]
pub struct RigStats {
    packets: AtomicU64,
    bytes: AtomicU64,
    unsupported_format: AtomicU64,
    unknown_kind: AtomicU64,
    truncated: AtomicU64,
    malformed: AtomicU64,
    unattended: AtomicU64,
    laps_recorded: AtomicU64,
    store_failures: AtomicU64,
    read_errors: AtomicU64,
    // Unix millis, 0 before the first packet
    last_packet_ms: AtomicI64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RigStatsSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub unsupported_format: u64,
    pub unknown_kind: u64,
    pub truncated: u64,
    pub malformed: u64,
    pub unattended: u64,
    pub laps_recorded: u64,
    pub store_failures: u64,
    pub read_errors: u64,
    pub last_packet: Option<DateTime<Utc>>,
}

impl RigStats {
    fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_frame(&self, frame: &Frame, now: DateTime<Utc>) {
        RigStats::count(&self.packets);
        self.bytes
            .fetch_add(frame.bytes.len() as u64, Ordering::Relaxed);
        self.last_packet_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn on_decode_error(&self, err: &DecodeError) {
        let counter = match err {
            DecodeError::UnsupportedFormat(_) => &self.unsupported_format,
            DecodeError::UnknownPacketKind { .. } => &self.unknown_kind,
            DecodeError::TruncatedBuffer { .. } => &self.truncated,
            DecodeError::Malformed { .. } => &self.malformed,
        };
        RigStats::count(counter);
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn last_packet(&self) -> Option<DateTime<Utc>> {
        match self.last_packet_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn is_receiving(&self, within: Duration) -> bool {
        self.is_receiving_at(within, Utc::now())
    }

    pub fn is_receiving_at(&self, within: Duration, now: DateTime<Utc>) -> bool {
        match (self.last_packet(), chrono::Duration::from_std(within)) {
            (Some(last), Ok(within)) => now.signed_duration_since(last) <= within,
            _ => false,
        }
    }

    pub fn snapshot(&self) -> RigStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RigStatsSnapshot {
            packets: load(&self.packets),
            bytes: load(&self.bytes),
            unsupported_format: load(&self.unsupported_format),
            unknown_kind: load(&self.unknown_kind),
            truncated: load(&self.truncated),
            malformed: load(&self.malformed),
            unattended: load(&self.unattended),
            laps_recorded: load(&self.laps_recorded),
            store_failures: load(&self.store_failures),
            read_errors: load(&self.read_errors),
            last_packet: self.last_packet(),
        }
    }
}

struct RigHandle {
    port: u16,
    control: mpsc::Sender<Control>,
    stats: Arc<RigStats>,
    join: JoinHandle<()>,
}

/// Owns every rig worker. Nothing about a rig is reachable except through here.
pub struct SessionManager {
    leaderboard: LeaderboardEngine,
    broadcaster: Broadcaster,
    config: Config,
    rigs: BTreeMap<String, RigHandle>,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(leaderboard: LeaderboardEngine, broadcaster: Broadcaster, config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        SessionManager {
            leaderboard,
            broadcaster,
            config,
            rigs: BTreeMap::new(),
            shutdown,
        }
    }

    pub fn leaderboard(&self) -> &LeaderboardEngine {
        &self.leaderboard
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a worker for every configured rig. Stops at the first rig that fails to bind.
    pub async fn spawn_all(&mut self) -> Result<Vec<SocketAddr>, ManagerError> {
        let rigs = self.config.rigs.clone();
        let mut addrs = Vec::with_capacity(rigs.len());
        for rig in &rigs {
            addrs.push(self.spawn_rig(rig).await?);
        }
        Ok(addrs)
    }

    /// Bind the rig's socket and start its worker, returning the bound address.
    pub async fn spawn_rig(&mut self, rig: &RigConfig) -> Result<SocketAddr, ManagerError> {
        if self.rigs.contains_key(&rig.id) {
            return Err(ManagerError::DuplicateRig(rig.id.clone()));
        }
        let addr = SocketAddr::new(self.config.bind_address, rig.port);
        let source = UdpSource::bind(addr)
            .await
            .map_err(|source| ManagerError::Bind {
                rig_id: rig.id.clone(),
                source,
            })?;
        let local_addr = source.local_addr();
        self.spawn_rig_with_source(rig.id.clone(), rig.port, Box::new(source))?;
        Ok(local_addr)
    }

    pub fn spawn_rig_with_source(
        &mut self,
        rig_id: impl Into<String>,
        port: u16,
        source: Box<dyn FrameSource>,
    ) -> Result<(), ManagerError> {
        let rig_id = rig_id.into();
        if self.rigs.contains_key(&rig_id) {
            return Err(ManagerError::DuplicateRig(rig_id));
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let stats = Arc::new(RigStats::default());
        info!("Starting {} on {}", rig_id, source.describe());
        self.broadcaster.open(&rig_id);

        let worker = Worker {
            session: RigSession::with_event_log_capacity(
                rig_id.clone(),
                port,
                self.config.event_log_capacity,
            ),
            source,
            control: control_rx,
            shutdown: self.shutdown.subscribe(),
            stats: stats.clone(),
            leaderboard: self.leaderboard.clone(),
            broadcaster: self.broadcaster.clone(),
            recorder: None,
            pending: VecDeque::new(),
            backoff: self.config.backoff.clone(),
            read_failures: 0,
            retry_read_at: None,
            snapshot_interval: self.config.snapshot_interval(),
            dirty: false,
        };
        let join = tokio::spawn(worker.run());

        self.rigs.insert(
            rig_id,
            RigHandle {
                port,
                control: control_tx,
                stats,
                join,
            },
        );
        Ok(())
    }

    pub fn rig_ids(&self) -> impl Iterator<Item = &str> {
        self.rigs.keys().map(String::as_str)
    }

    pub fn port(&self, rig_id: &str) -> Option<u16> {
        self.rigs.get(rig_id).map(|handle| handle.port)
    }

    pub fn stats(&self, rig_id: &str) -> Option<Arc<RigStats>> {
        self.rigs.get(rig_id).map(|handle| handle.stats.clone())
    }

    pub fn subscribe(&self, rig_id: &str) -> Result<Subscription, ManagerError> {
        if !self.rigs.contains_key(rig_id) {
            return Err(ManagerError::UnknownRig(rig_id.to_string()));
        }
        Ok(self.broadcaster.subscribe(rig_id))
    }

    async fn request<T>(
        &self,
        rig_id: &str,
        command: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, ManagerError> {
        let handle = self
            .rigs
            .get(rig_id)
            .ok_or_else(|| ManagerError::UnknownRig(rig_id.to_string()))?;
        let (reply, response) = oneshot::channel();
        handle
            .control
            .send(command(reply))
            .await
            .map_err(|_| ManagerError::WorkerGone(rig_id.to_string()))?;
        response
            .await
            .map_err(|_| ManagerError::WorkerGone(rig_id.to_string()))
    }

    pub async fn register_driver(&self, rig_id: &str, name: &str) -> Result<(), ManagerError> {
        let name = name.to_string();
        self.request(rig_id, |reply| Control::RegisterDriver { name, reply })
            .await??;
        Ok(())
    }

    pub async fn stop_session(&self, rig_id: &str) -> Result<SessionSummary, ManagerError> {
        Ok(self
            .request(rig_id, |reply| Control::StopSession { reply })
            .await??)
    }

    pub async fn reset_session(&self, rig_id: &str) -> Result<(), ManagerError> {
        self.request(rig_id, |reply| Control::ResetSession { reply })
            .await
    }

    /// Start capturing the rig's raw frames into the configured recordings directory.
    pub async fn start_recording(&self, rig_id: &str) -> Result<PathBuf, ManagerError> {
        let dir = self.config.recordings_dir.clone();
        self.request(rig_id, |reply| Control::StartRecording { dir, reply })
            .await?
    }

    pub async fn stop_recording(&self, rig_id: &str) -> Result<RecordingSummary, ManagerError> {
        self.request(rig_id, |reply| Control::StopRecording { reply })
            .await?
    }

    pub async fn snapshot(&self, rig_id: &str) -> Result<RigSnapshot, ManagerError> {
        self.request(rig_id, |reply| Control::Snapshot { reply })
            .await
    }

    /// Wait for a rig's worker to finish on its own, as it does when a replay runs out.
    pub async fn join_rig(&mut self, rig_id: &str) -> Result<(), ManagerError> {
        let handle = self
            .rigs
            .remove(rig_id)
            .ok_or_else(|| ManagerError::UnknownRig(rig_id.to_string()))?;
        if let Err(e) = handle.join.await {
            error!("Worker for {} failed: {}", rig_id, e);
        }
        Ok(())
    }

    /// Stop every worker and wait for them. Open recordings are finished, laps already stored stay.
    pub async fn shutdown(mut self) {
        info!("Shutting down {} rigs", self.rigs.len());
        let _ = self.shutdown.send(true);
        let rigs = std::mem::take(&mut self.rigs);
        for (rig_id, handle) in rigs {
            drop(handle.control);
            if let Err(e) = handle.join.await {
                error!("Worker for {} failed: {}", rig_id, e);
            }
        }
    }
}

struct Worker {
    session: RigSession,
    source: Box<dyn FrameSource>,
    control: mpsc::Receiver<Control>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<RigStats>,
    leaderboard: LeaderboardEngine,
    broadcaster: Broadcaster,
    recorder: Option<Recorder>,
    pending: VecDeque<LapRecord>,
    backoff: BackoffConfig,
    read_failures: u32,
    // Reads are paused until then after a failure
    retry_read_at: Option<Instant>,
    snapshot_interval: Duration,
    // Changes not yet published
    dirty: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut snapshots = tokio::time::interval(self.snapshot_interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retries = tokio::time::interval(RETRY_INTERVAL);
        retries.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.publish();
        loop {
            let retry_read_at = self.retry_read_at;
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    debug!("{}: shutdown requested", self.session.rig_id());
                    break;
                }
                command = self.control.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = snapshots.tick() => {
                    if self.dirty {
                        self.publish();
                    }
                }
                _ = retries.tick(), if !self.pending.is_empty() => self.retry_pending(),
                _ = tokio::time::sleep_until(retry_read_at.unwrap_or_else(Instant::now)),
                    if retry_read_at.is_some() =>
                {
                    self.retry_read_at = None;
                }
                frame = self.source.next(), if retry_read_at.is_none() => match frame {
                    Ok(Some(frame)) => {
                        self.read_failures = 0;
                        self.on_frame(frame).await;
                    }
                    Ok(None) => {
                        info!("{}: {} finished", self.session.rig_id(), self.source.describe());
                        self.finish_session();
                        break;
                    }
                    Err(SourceError::ClockOverflow) => {
                        error!("{}: {} cannot continue", self.session.rig_id(), self.source.describe());
                        self.finish_session();
                        break;
                    }
                    Err(e) => self.back_off(e),
                },
            }
        }

        self.close().await;
    }

    fn back_off(&mut self, err: SourceError) {
        let delay = self.backoff.delay(self.read_failures);
        self.read_failures = self.read_failures.saturating_add(1);
        RigStats::count(&self.stats.read_errors);
        warn!(
            "{}: read from {} failed ({}), retrying in {}ms",
            self.session.rig_id(),
            self.source.describe(),
            err,
            delay.as_millis()
        );
        self.retry_read_at = Some(Instant::now() + delay);
    }

    async fn on_frame(&mut self, frame: Frame) {
        let now = Utc::now();
        self.stats.on_frame(&frame, now);

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_frame(&frame).await {
                error!(
                    "{}: recording to {} aborted: {}",
                    self.session.rig_id(),
                    recorder.path().display(),
                    e
                );
                self.recorder = None;
            }
        }

        let packet = match protocol::decode(&frame.bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.on_decode_error(&e);
                if e.is_benign() {
                    trace!("{}: {}", self.session.rig_id(), e);
                } else {
                    debug!("{}: dropped packet: {}", self.session.rig_id(), e);
                }
                return;
            }
        };

        if !self.session.accepts_packets() {
            RigStats::count(&self.stats.unattended);
            return;
        }
        let events = self.session.on_packet(&packet, now);
        self.dirty = true;
        self.apply_events(events);
    }

    async fn handle_command(&mut self, command: Control) {
        match command {
            Control::RegisterDriver { name, reply } => {
                let result = self.session.register_driver(&name);
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Control::StopSession { reply } => {
                let now = Utc::now();
                let result = self.session.stop(now).map(|events| {
                    let summary = events.iter().find_map(|event| match event {
                        SessionEvent::Stopped(summary) => Some(summary.clone()),
                        _ => None,
                    });
                    self.apply_events(events);
                    summary.unwrap_or_else(|| self.session.summary(now))
                });
                let _ = reply.send(result);
            }
            Control::ResetSession { reply } => {
                let events = self.session.reset();
                self.apply_events(events);
                let _ = reply.send(());
            }
            Control::StartRecording { dir, reply } => {
                let _ = reply.send(self.start_recording(dir).await);
            }
            Control::StopRecording { reply } => {
                let result = match self.recorder.take() {
                    Some(recorder) => recorder.finish().await.map_err(ManagerError::from),
                    None => Err(ManagerError::NotRecording(
                        self.session.rig_id().to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            Control::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    async fn start_recording(&mut self, dir: PathBuf) -> Result<PathBuf, ManagerError> {
        if self.recorder.is_some() {
            return Err(ManagerError::AlreadyRecording(
                self.session.rig_id().to_string(),
            ));
        }
        let metadata =
            RecordingMetadata::new(self.session.rig_id(), self.session.port(), Utc::now());
        let recorder = Recorder::create(dir, metadata).await?;
        let path = recorder.path().to_path_buf();
        self.recorder = Some(recorder);
        Ok(path)
    }

    fn apply_events(&mut self, events: Vec<SessionEvent>) {
        let mut lifecycle = false;
        for event in events {
            lifecycle |= event.is_lifecycle();
            match event {
                SessionEvent::LapCompleted(record) => self.record_lap(record),
                SessionEvent::Archived(summary) => info!(
                    "{}: archived session with {} laps for {}",
                    summary.rig_id,
                    summary.laps_completed,
                    summary.driver_name.as_deref().unwrap_or("?")
                ),
                _ => (),
            }
        }
        if lifecycle {
            self.publish();
        } else {
            self.dirty = true;
        }
    }

    fn record_lap(&mut self, record: LapRecord) {
        self.retry_pending();
        if !self.pending.is_empty() {
            // Keep records in completion order while the store is down
            self.queue(record);
            return;
        }
        match self.leaderboard.record(&record) {
            Ok(()) => RigStats::count(&self.stats.laps_recorded),
            Err(e) if e.is_retryable() => {
                RigStats::count(&self.stats.store_failures);
                warn!(
                    "{}: storing lap {} failed, will retry: {}",
                    self.session.rig_id(),
                    record.formatted_time(),
                    e
                );
                self.queue(record);
            }
            Err(e) => {
                RigStats::count(&self.stats.store_failures);
                error!(
                    "{}: lap {} for {} not stored: {}",
                    self.session.rig_id(),
                    record.formatted_time(),
                    record.driver_name,
                    e
                );
            }
        }
    }

    fn queue(&mut self, record: LapRecord) {
        if self.pending.len() >= MAX_PENDING_RECORDS {
            if let Some(dropped) = self.pending.pop_front() {
                error!(
                    "{}: pending queue full, dropped lap {} for {}",
                    self.session.rig_id(),
                    dropped.formatted_time(),
                    dropped.driver_name
                );
            }
        }
        self.pending.push_back(record);
    }

    fn retry_pending(&mut self) {
        while let Some(record) = self.pending.pop_front() {
            match self.leaderboard.record(&record) {
                Ok(()) => {
                    RigStats::count(&self.stats.laps_recorded);
                    debug!(
                        "{}: stored delayed lap {}",
                        self.session.rig_id(),
                        record.formatted_time()
                    );
                }
                Err(e) if e.is_retryable() => {
                    RigStats::count(&self.stats.store_failures);
                    debug!("{}: store still failing: {}", self.session.rig_id(), e);
                    self.pending.push_front(record);
                    break;
                }
                Err(e) => error!(
                    "{}: delayed lap {} not stored: {}",
                    self.session.rig_id(),
                    record.formatted_time(),
                    e
                ),
            }
        }
    }

    // A replay has run out, close the session so the final lap can be flushed
    fn finish_session(&mut self) {
        if let Ok(events) = self.session.stop(Utc::now()) {
            self.apply_events(events);
        }
    }

    fn publish(&mut self) {
        self.dirty = false;
        self.broadcaster
            .publish(self.session.rig_id(), self.session.snapshot());
    }

    async fn close(mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish().await {
                error!("{}: failed to finish recording: {}", self.session.rig_id(), e);
            }
        }
        self.retry_pending();
        if !self.pending.is_empty() {
            error!(
                "{}: {} laps could not be stored before exit",
                self.session.rig_id(),
                self.pending.len()
            );
        }
        self.publish();
        self.broadcaster.close(self.session.rig_id());
        info!("{}: worker stopped", self.session.rig_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::{LeaderboardStore, MemoryStore, RecordFilter, Scope, StoreError};
    use crate::protocol::inbound::Packet;
    use crate::protocol::ProtocolVersion;
    use crate::session::Lifecycle;
    use crate::simulator::{LapPlan, SyntheticRig};
    use async_trait::async_trait;
    use crate::recording::{PlaybackOptions, Player, Recording};
    use std::sync::atomic::AtomicUsize;

    struct ChannelSource {
        frames: mpsc::UnboundedReceiver<Vec<u8>>,
        failures: usize,
        start: Instant,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                )));
            }
            Ok(self.frames.recv().await.map(|bytes| Frame {
                offset: self.start.elapsed(),
                bytes,
            }))
        }

        fn describe(&self) -> String {
            "test channel".to_string()
        }
    }

    fn channel_source(failures: usize) -> (mpsc::UnboundedSender<Vec<u8>>, Box<dyn FrameSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = ChannelSource {
            frames: rx,
            failures,
            start: Instant::now(),
        };
        (tx, Box::new(source))
    }

    fn test_config() -> Config {
        Config {
            snapshot_interval_ms: 5,
            ..Config::default()
        }
    }

    fn laps() -> Vec<LapPlan> {
        vec![
            LapPlan {
                lap_time_ms: 90_000,
                invalid: false,
            },
            LapPlan {
                lap_time_ms: 95_500,
                invalid: true,
            },
            LapPlan {
                lap_time_ms: 89_250,
                invalid: false,
            },
        ]
    }

    fn script_bytes(rig: &mut SyntheticRig) -> Vec<Vec<u8>> {
        rig.script(&laps(), 4, Duration::from_millis(20))
            .into_iter()
            .map(|timed| timed.packet.to_bytes().unwrap())
            .collect()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn scripted_run_reaches_the_leaderboard() {
        let leaderboard = LeaderboardEngine::in_memory();
        let broadcaster = Broadcaster::default();
        let mut manager =
            SessionManager::new(leaderboard.clone(), broadcaster.clone(), test_config());
        let (frames, source) = channel_source(0);
        manager
            .spawn_rig_with_source("RIG_A", 20777, source)
            .unwrap();
        let mut subscription = manager.subscribe("RIG_A").unwrap();
        // The first snapshot is the idle one published at startup
        assert_eq!(subscription.next().await.unwrap().state, Lifecycle::Idle);

        manager.register_driver("RIG_A", "Lando").await.unwrap();
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 7);
        let packets = script_bytes(&mut rig);
        let count = packets.len() as u64;
        for bytes in packets {
            frames.send(bytes).unwrap();
        }

        let stats = manager.stats("RIG_A").unwrap();
        wait_for(|| stats.packets() == count).await;
        let snapshot = manager.snapshot("RIG_A").await.unwrap();
        assert_eq!(snapshot.state, Lifecycle::Active);
        assert_eq!(snapshot.best_lap_time_ms, Some(89_250));
        assert_eq!(snapshot.track_name, "Monza");

        let stats = stats.snapshot();
        assert_eq!(stats.laps_recorded, 2);
        assert_eq!(stats.unattended, 0);
        assert!(manager.stats("RIG_A").unwrap().is_receiving(Duration::from_secs(5)));

        let board = leaderboard.query(Scope::Today, None, 10).unwrap();
        let times: Vec<_> = board.iter().map(|r| r.lap_time_ms).collect();
        assert_eq!(times, vec![89_250, 90_000]);
        assert!(board.iter().all(|r| r.driver_name == "Lando" && r.rig_id == "RIG_A"));

        let summary = manager.stop_session("RIG_A").await.unwrap();
        assert_eq!(summary.laps_completed, 2);
        assert_eq!(summary.driver_name.as_deref(), Some("Lando"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn packets_without_a_driver_are_unattended() {
        let mut manager = SessionManager::new(
            LeaderboardEngine::in_memory(),
            Broadcaster::default(),
            test_config(),
        );
        let (frames, source) = channel_source(0);
        manager.spawn_rig_with_source("RIG_B", 20778, source).unwrap();

        let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 3);
        frames.send(rig.session().to_bytes().unwrap()).unwrap();
        frames.send(rig.car_status().to_bytes().unwrap()).unwrap();
        let mut unsupported = rig.session().to_bytes().unwrap();
        unsupported[..2].copy_from_slice(&2023u16.to_le_bytes());
        frames.send(unsupported).unwrap();
        frames.send(vec![0xe8, 0x07, 0x18]).unwrap();

        let stats = manager.stats("RIG_B").unwrap();
        wait_for(|| stats.packets() == 4).await;
        let counts = stats.snapshot();
        assert_eq!(counts.unattended, 2);
        assert_eq!(counts.unsupported_format, 1);
        assert_eq!(counts.truncated, 1);

        let snapshot = manager.snapshot("RIG_B").await.unwrap();
        assert_eq!(snapshot.state, Lifecycle::Idle);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn commands_are_checked() {
        let mut manager = SessionManager::new(
            LeaderboardEngine::in_memory(),
            Broadcaster::default(),
            test_config(),
        );
        let (_frames, source) = channel_source(0);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();

        let (_other, source) = channel_source(0);
        assert!(matches!(
            manager.spawn_rig_with_source("RIG_A", 20999, source),
            Err(ManagerError::DuplicateRig(_))
        ));
        assert!(matches!(
            manager.register_driver("RIG_Z", "Oscar").await,
            Err(ManagerError::UnknownRig(_))
        ));
        assert!(matches!(
            manager.stop_session("RIG_A").await,
            Err(ManagerError::Session(SessionError::InvalidTransition { .. }))
        ));
        assert!(matches!(
            manager.stop_recording("RIG_A").await,
            Err(ManagerError::NotRecording(_))
        ));

        manager.register_driver("RIG_A", "Oscar").await.unwrap();
        assert!(matches!(
            manager.register_driver("RIG_A", "Max").await,
            Err(ManagerError::Session(_))
        ));
        manager.reset_session("RIG_A").await.unwrap();
        manager.register_driver("RIG_A", "Max").await.unwrap();
        assert_eq!(
            manager.snapshot("RIG_A").await.unwrap().driver_name.as_deref(),
            Some("Max")
        );
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_starts_nothing() {
        let taken = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            bind_address: "127.0.0.1".parse().unwrap(),
            ..test_config()
        };
        let mut manager =
            SessionManager::new(LeaderboardEngine::in_memory(), Broadcaster::default(), config);

        let rig = RigConfig::new("RIG_A", taken.local_addr().unwrap().port());
        assert!(matches!(
            manager.spawn_rig(&rig).await,
            Err(ManagerError::Bind { .. })
        ));
        assert_eq!(manager.rig_ids().count(), 0);

        let addr = manager.spawn_rig(&RigConfig::new("RIG_B", 0)).await.unwrap();
        assert_ne!(addr.port(), 0);
        manager.register_driver("RIG_B", "Charles").await.unwrap();

        let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 11);
        taken
            .send_to(&rig.session().to_bytes().unwrap(), addr)
            .await
            .unwrap();
        let stats = manager.stats("RIG_B").unwrap();
        wait_for(|| stats.packets() == 1).await;
        assert_eq!(
            manager.snapshot("RIG_B").await.unwrap().state,
            Lifecycle::Active
        );
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_back_off_and_recover() {
        let mut manager = SessionManager::new(
            LeaderboardEngine::in_memory(),
            Broadcaster::default(),
            test_config(),
        );
        let (frames, source) = channel_source(3);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();
        let start = Instant::now();

        frames.send(vec![1, 2, 3]).unwrap();
        let stats = manager.stats("RIG_A").unwrap();
        wait_for(|| stats.packets() == 1).await;

        let counts = stats.snapshot();
        assert_eq!(counts.read_errors, 3);
        assert_eq!(counts.truncated, 1);
        // 50 + 100 + 200ms
        assert!(start.elapsed() >= Duration::from_millis(350));
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_served_while_reads_back_off() {
        let mut manager = SessionManager::new(
            LeaderboardEngine::in_memory(),
            Broadcaster::default(),
            Config::default(),
        );
        let (_frames, source) = channel_source(usize::MAX);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();

        // Long enough for the delay to reach its cap
        tokio::time::sleep(Duration::from_secs(20)).await;
        let stats = manager.stats("RIG_A").unwrap();
        assert!(stats.snapshot().read_errors >= 5);

        let start = Instant::now();
        manager.register_driver("RIG_A", "Pierre").await.unwrap();
        assert_eq!(
            manager.snapshot("RIG_A").await.unwrap().state,
            Lifecycle::Registered
        );
        assert!(start.elapsed() < Duration::from_millis(50));

        let start = Instant::now();
        manager.shutdown().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    fn scripted_recording(rig: &mut SyntheticRig, lead_in: Duration) -> Recording {
        Recording {
            metadata: RecordingMetadata::new("RIG_A", 20777, Utc::now()),
            frames: rig
                .script(&laps(), 4, Duration::from_millis(20))
                .into_iter()
                .map(|timed| Frame {
                    offset: lead_in + timed.offset,
                    bytes: timed.packet.to_bytes().unwrap(),
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_recording_reaches_the_leaderboard() {
        let leaderboard = LeaderboardEngine::in_memory();
        let mut manager =
            SessionManager::new(leaderboard.clone(), Broadcaster::default(), test_config());
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 21);
        // The lead-in leaves time to register before the first frame is due
        let recording = Arc::new(scripted_recording(&mut rig, Duration::from_secs(1)));
        let frame_count = recording.frames.len() as u64;
        let player = Player::new(recording, PlaybackOptions::default()).unwrap();
        manager
            .spawn_rig_with_source("RIG_A", 20777, Box::new(player))
            .unwrap();
        manager.register_driver("RIG_A", "Nico").await.unwrap();

        let stats = manager.stats("RIG_A").unwrap();
        manager.join_rig("RIG_A").await.unwrap();

        let counts = stats.snapshot();
        assert_eq!(counts.packets, frame_count);
        assert_eq!(counts.unattended, 0);
        assert_eq!(counts.laps_recorded, 2);
        let board = leaderboard.query(Scope::Today, None, 10).unwrap();
        let times: Vec<_> = board.iter().map(|r| r.lap_time_ms).collect();
        assert_eq!(times, vec![89_250, 90_000]);
        assert!(board.iter().all(|r| r.driver_name == "Nico"));
    }

    #[tokio::test]
    async fn subscribing_after_the_worker_ended_is_finite() {
        let mut manager = SessionManager::new(
            LeaderboardEngine::in_memory(),
            Broadcaster::default(),
            test_config(),
        );
        let empty = Recording {
            metadata: RecordingMetadata::new("RIG_A", 20777, Utc::now()),
            frames: vec![],
        };
        let player = Player::new(Arc::new(empty), PlaybackOptions::default()).unwrap();
        manager
            .spawn_rig_with_source("RIG_A", 20777, Box::new(player))
            .unwrap();
        wait_for(|| manager.rigs["RIG_A"].join.is_finished()).await;

        let mut subscription = manager.subscribe("RIG_A").unwrap();
        let last = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .unwrap();
        assert_eq!(last.unwrap().state, Lifecycle::Idle);
        let end = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .unwrap();
        assert!(end.is_none());
        manager.join_rig("RIG_A").await.unwrap();
    }

    struct FlakyStore {
        failures_left: AtomicUsize,
        inner: MemoryStore,
    }

    impl LeaderboardStore for FlakyStore {
        fn append(&self, record: &LapRecord) -> Result<(), StoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk unavailable",
                )));
            }
            self.inner.append(record)
        }

        fn query(&self, filter: &RecordFilter) -> Result<Vec<LapRecord>, StoreError> {
            self.inner.query(filter)
        }
    }

    #[tokio::test]
    async fn store_failures_are_retried_in_order() {
        let store = Arc::new(FlakyStore {
            failures_left: AtomicUsize::new(1),
            inner: MemoryStore::new(),
        });
        let mut manager = SessionManager::new(
            LeaderboardEngine::new(store.clone()),
            Broadcaster::default(),
            test_config(),
        );
        let (frames, source) = channel_source(0);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();
        manager.register_driver("RIG_A", "Yuki").await.unwrap();

        let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 9);
        for bytes in script_bytes(&mut rig) {
            frames.send(bytes).unwrap();
        }
        // Closing the source ends the run
        drop(frames);
        manager.join_rig("RIG_A").await.unwrap();

        let stored = store.query(&RecordFilter::default()).unwrap();
        let times: Vec<_> = stored.iter().map(|r| r.lap_time_ms).collect();
        assert_eq!(times, vec![90_000, 89_250]);
    }

    #[tokio::test]
    async fn recording_captures_raw_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            recordings_dir: dir.path().to_path_buf(),
            ..test_config()
        };
        let mut manager =
            SessionManager::new(LeaderboardEngine::in_memory(), Broadcaster::default(), config);
        let (frames, source) = channel_source(0);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();

        let path = manager.start_recording("RIG_A").await.unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(matches!(
            manager.start_recording("RIG_A").await,
            Err(ManagerError::AlreadyRecording(_))
        ));

        let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 5);
        let packets: Vec<Packet> = vec![rig.session(), rig.car_status(), rig.car_damage()];
        for packet in &packets {
            frames.send(packet.to_bytes().unwrap()).unwrap();
        }
        // Garbage is recorded too
        frames.send(vec![0xff; 3]).unwrap();

        let stats = manager.stats("RIG_A").unwrap();
        wait_for(|| stats.packets() == 4).await;
        let summary = manager.stop_recording("RIG_A").await.unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.path, path);

        let recording = crate::recording::Recording::load(&path).await.unwrap();
        assert_eq!(recording.metadata.rig_id, "RIG_A");
        assert_eq!(recording.frames.len(), 4);
        assert_eq!(recording.frames[3].bytes, vec![0xff; 3]);
        for (frame, packet) in recording.frames.iter().zip(&packets) {
            assert_eq!(&protocol::decode(&frame.bytes).unwrap(), packet);
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let broadcaster = Broadcaster::default();
        let mut manager =
            SessionManager::new(LeaderboardEngine::in_memory(), broadcaster, test_config());
        let (_frames, source) = channel_source(0);
        manager.spawn_rig_with_source("RIG_A", 20777, source).unwrap();
        let mut subscription = manager.subscribe("RIG_A").unwrap();

        manager.shutdown().await;
        while subscription.next().await.is_some() {}
    }
}
