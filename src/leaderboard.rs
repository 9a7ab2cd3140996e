use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::session::LapRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Leaderboard storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialise lap record: {0}")]
    Serialise(#[from] serde_json::Error),
}

impl StoreError {
    /// I/O failures may clear up on their own, serialisation failures will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("Refusing to store invalid lap {lap_time_ms}ms for {driver_name}")]
    InvalidLap {
        driver_name: String,
        lap_time_ms: u32,
    },
    #[error("A track name is required for the track leaderboard")]
    TrackRequired,
    #[error("Unknown leaderboard scope `{0}`")]
    UnknownScope(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaderboardError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LeaderboardError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Selection passed to a store. Ranking happens in the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub since: Option<DateTime<Utc>>,
    pub track_name: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &LapRecord) -> bool {
        self.since.map_or(true, |since| record.timestamp >= since)
            && self
                .track_name
                .as_ref()
                .map_or(true, |track| track.eq_ignore_ascii_case(&record.track_name))
    }
}

/// Durable storage for lap records. Appends may arrive concurrently from every rig worker.
pub trait LeaderboardStore: Send + Sync {
    fn append(&self, record: &LapRecord) -> Result<(), StoreError>;
    fn query(&self, filter: &RecordFilter) -> Result<Vec<LapRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<LapRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl LeaderboardStore for MemoryStore {
    fn append(&self, record: &LapRecord) -> Result<(), StoreError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<LapRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

/// Append-only file holding one JSON encoded [`LapRecord`] per line.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl JsonLinesStore {
    pub fn open(path: impl AsRef<Path>) -> Result<JsonLinesStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        Ok(JsonLinesStore {
            path,
            writer: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// A torn write leaves its fragment without a newline, end it so the next record gets its own line
fn open_append(path: &Path) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            warn!("Terminating partial line at the end of {}", path.display());
            file.write_all(b"\n")?;
        }
    }
    Ok(file)
}

impl LeaderboardStore for JsonLinesStore {
    fn append(&self, record: &LapRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        // The handle is only put back after a successful write, so a failure reopens the file
        let mut file = match writer.take() {
            Some(file) => file,
            None => open_append(&self.path)?,
        };
        file.write_all(&line)?;
        file.flush()?;
        *writer = Some(file);
        Ok(())
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<LapRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut records = vec![];
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LapRecord>(&line) {
                Ok(record) if filter.matches(&record) => records.push(record),
                Ok(_) => (),
                Err(e) => warn!(
                    "Skipping corrupt leaderboard line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Since local midnight
    Today,
    /// Since the first of the current month, local time
    Month,
    /// All time, for one track
    Track,
}

impl FromStr for Scope {
    type Err = LeaderboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "today" => Ok(Scope::Today),
            "month" => Ok(Scope::Month),
            "track" | "all" | "all-time" => Ok(Scope::Track),
            _ => Err(LeaderboardError::UnknownScope(s.to_string())),
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Today => f.write_str("today"),
            Scope::Month => f.write_str("month"),
            Scope::Track => f.write_str("track"),
        }
    }
}

impl Scope {
    /// Start of the scope's window, evaluated against `now`.
    pub fn window_start<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let date = now.date_naive();
        let start = match self {
            Scope::Today => date,
            Scope::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
            Scope::Track => return None,
        };
        let midnight = start.and_hms_opt(0, 0, 0)?;
        match now.timezone().from_local_datetime(&midnight) {
            LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            // Midnight skipped by a DST change, the day starts at the first local time that exists
            LocalResult::None => (1..=24 * 60).find_map(|minutes| {
                now.timezone()
                    .from_local_datetime(&(midnight + chrono::Duration::minutes(minutes)))
                    .earliest()
                    .map(|t| t.with_timezone(&Utc))
            }),
        }
    }
}

/// Ranking over stored lap records. Windows are evaluated at query time so nothing needs expiring.
#[derive(Clone)]
pub struct LeaderboardEngine {
    store: Arc<dyn LeaderboardStore>,
}

impl LeaderboardEngine {
    pub fn new(store: Arc<dyn LeaderboardStore>) -> LeaderboardEngine {
        LeaderboardEngine { store }
    }

    pub fn in_memory() -> LeaderboardEngine {
        LeaderboardEngine::new(Arc::new(MemoryStore::new()))
    }

    pub fn record(&self, record: &LapRecord) -> Result<(), LeaderboardError> {
        if !record.valid || record.lap_time_ms == 0 {
            return Err(LeaderboardError::InvalidLap {
                driver_name: record.driver_name.clone(),
                lap_time_ms: record.lap_time_ms,
            });
        }
        self.store.append(record)?;
        debug!(
            "Stored {} lap {} for {} at {}",
            record.rig_id,
            record.formatted_time(),
            record.driver_name,
            record.track_name
        );
        Ok(())
    }

    pub fn query(
        &self,
        scope: Scope,
        track_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LapRecord>, LeaderboardError> {
        self.query_at(scope, track_name, limit, Local::now())
    }

    pub fn query_at<Tz: TimeZone>(
        &self,
        scope: Scope,
        track_name: Option<&str>,
        limit: usize,
        now: DateTime<Tz>,
    ) -> Result<Vec<LapRecord>, LeaderboardError> {
        let track_name = track_name.map(str::trim).filter(|t| !t.is_empty());
        if scope == Scope::Track && track_name.is_none() {
            return Err(LeaderboardError::TrackRequired);
        }

        let filter = RecordFilter {
            since: scope.window_start(&now),
            track_name: track_name.map(str::to_string),
        };
        let mut records = self.store.query(&filter)?;
        records.retain(|r| r.valid && r.lap_time_ms > 0);
        records.sort_by(|a, b| {
            a.lap_time_ms
                .cmp(&b.lap_time_ms)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        records.truncate(limit);
        Ok(records)
    }
}
