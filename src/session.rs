use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::protocol::f1_enum::{self, EventCode};
use crate::protocol::inbound::{
    CarDamageData, CarLapData, CarStatusData, CarTelemetry, CarTelemetryData, EventData, LapData,
    MotionData,
    Packet, PacketVariant, SessionData,
};
use crate::protocol::SPECTATOR_INDEX;

/// Default number of entries kept in a session's event log.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 20;

/// Anything slower than this is a paused or abandoned lap rather than a real time.
pub const MAX_LAP_TIME_MS: u32 = 600_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// No driver assigned
    Idle,
    /// Driver assigned, waiting for telemetry
    Registered,
    /// Telemetry observed for the current session
    Active,
    /// Stopped by the operator
    Completed,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Registered => "registered",
            Lifecycle::Active => "active",
            Lifecycle::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Cannot {command} a session which is {state}")]
    InvalidTransition {
        state: Lifecycle,
        command: &'static str,
    },
    #[error("Driver name must not be empty")]
    EmptyDriverName,
}

/// Latest known values for one vehicle. Wheel arrays are ordered RL, RR, FL, FR.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleState {
    pub speed_kph: u16,
    pub engine_rpm: u16,
    pub gear: i8,
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
    pub drs: bool,
    pub tyres_wear: [f32; 4],
    pub tyres_surface_temperature: [u8; 4],
    pub tyre_blisters: Option<[u8; 4]>,
    pub visual_tyre_compound: u8,
    pub actual_tyre_compound: u8,
    pub tyres_age_laps: u8,
    pub front_left_wing_damage: u8,
    pub front_right_wing_damage: u8,
    pub rear_wing_damage: u8,
    pub floor_damage: u8,
    pub gear_box_damage: u8,
    pub engine_damage: u8,
    pub ers_store_energy: f32,
    pub fuel_in_tank: f32,
    pub fuel_remaining_laps: f32,
    pub g_force_lateral: f32,
    pub g_force_longitudinal: f32,
    pub car_position: u8,
    pub current_lap_num: u8,
    pub current_lap_time_ms: u32,
    pub last_lap_time_ms: u32,
    pub lap_distance: f32,
    pub sector: u8,
}

impl VehicleState {
    pub fn compound_name(&self) -> &'static str {
        f1_enum::visual_compound_name(self.visual_tyre_compound)
    }
}

/// One completed lap. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub rig_id: String,
    pub driver_name: String,
    pub track_name: String,
    pub lap_number: u8,
    pub lap_time_ms: u32,
    pub compound: String,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    #[serde(default)]
    pub stats: LapStats,
}

impl LapRecord {
    pub fn formatted_time(&self) -> String {
        format_lap_time(self.lap_time_ms)
    }
}

/// Tracked-car telemetry summarised over one lap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapStats {
    pub samples: u32,
    pub avg_speed_kph: u16,
    pub max_speed_kph: u16,
    pub avg_throttle: f32,
    pub max_throttle: f32,
    pub avg_brake: f32,
    pub max_brake: f32,
    pub avg_rpm: u16,
    pub max_rpm: u16,
    pub max_gear: i8,
    /// Reverse is not counted
    pub most_used_gear: Option<i8>,
}

const FORWARD_GEARS: usize = 8;

#[derive(Debug, Default, Clone)]
struct LapAccumulator {
    samples: u32,
    speed: u64,
    max_speed: u16,
    throttle: f64,
    max_throttle: f32,
    brake: f64,
    max_brake: f32,
    rpm: u64,
    max_rpm: u16,
    max_gear: i8,
    // Neutral, then first to eighth
    gears: [u32; FORWARD_GEARS + 1],
}

impl LapAccumulator {
    fn add(&mut self, car: &CarTelemetry) {
        self.samples += 1;
        self.speed += u64::from(car.speed);
        self.max_speed = self.max_speed.max(car.speed);
        self.throttle += f64::from(car.throttle);
        self.max_throttle = self.max_throttle.max(car.throttle);
        self.brake += f64::from(car.brake);
        self.max_brake = self.max_brake.max(car.brake);
        self.rpm += u64::from(car.engine_rpm);
        self.max_rpm = self.max_rpm.max(car.engine_rpm);
        self.max_gear = self.max_gear.max(car.gear);
        if let Some(count) = usize::try_from(car.gear)
            .ok()
            .and_then(|gear| self.gears.get_mut(gear))
        {
            *count += 1;
        }
    }

    fn summary(&self) -> LapStats {
        if self.samples == 0 {
            return LapStats::default();
        }
        let n = u64::from(self.samples);
        // Ties go to the lower gear
        let most_used_gear = self
            .gears
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(gear, _)| gear as i8);
        LapStats {
            samples: self.samples,
            avg_speed_kph: ((self.speed + n / 2) / n) as u16,
            max_speed_kph: self.max_speed,
            avg_throttle: (self.throttle / n as f64) as f32,
            max_throttle: self.max_throttle,
            avg_brake: (self.brake / n as f64) as f32,
            max_brake: self.max_brake,
            avg_rpm: ((self.rpm + n / 2) / n) as u16,
            max_rpm: self.max_rpm,
            max_gear: self.max_gear,
            most_used_gear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub session_time: f32,
    pub code: String,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub rig_id: String,
    pub driver_name: Option<String>,
    pub track_name: String,
    pub session_uid: Option<u64>,
    pub laps_completed: u32,
    pub best_lap_time_ms: Option<u32>,
    pub last_lap_time_ms: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Activated,
    LapCompleted(LapRecord),
    /// The game started a new session, the old one was closed
    Archived(SessionSummary),
    Stopped(SessionSummary),
    Reset,
}

impl SessionEvent {
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, SessionEvent::LapCompleted(_))
    }
}

/// An immutable copy of a rig's state, taken by its worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RigSnapshot {
    pub rig_id: String,
    pub port: u16,
    pub state: Lifecycle,
    pub driver_name: Option<String>,
    pub track_name: String,
    pub session_uid: Option<u64>,
    pub current_lap: u8,
    pub current_lap_invalid: bool,
    pub last_lap_time_ms: Option<u32>,
    pub best_lap_time_ms: Option<u32>,
    pub best_sectors_ms: [Option<u32>; 3],
    pub top_speed_kph: u16,
    pub current_lap_stats: LapStats,
    pub laps_completed: u32,
    pub player_car_index: u8,
    pub vehicles: BTreeMap<u8, VehicleState>,
    pub events: Vec<EventLogEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RigSnapshot {
    /// The tracked car, if telemetry has been seen for it.
    pub fn player(&self) -> Option<&VehicleState> {
        self.vehicles.get(&self.player_car_index)
    }
}

/// Lap bookkeeping for the tracked car.
#[derive(Debug, Default, Clone)]
struct LapTracker {
    current: Option<u8>,
    invalid: bool,
    // Sector 1 and 2 times of the lap in progress, once the car has passed them
    sectors: [Option<u32>; 2],
    regressed_to: Option<u8>,
    telemetry: LapAccumulator,
}

/// Session state for one physical rig.
///
/// `RigSession` does no I/O. The worker which owns it feeds it packets and control commands in
/// arrival order and forwards the returned [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct RigSession {
    rig_id: String,
    port: u16,
    state: Lifecycle,
    driver_name: Option<String>,
    session_uid: Option<u64>,
    track_name: String,
    track_length: u16,
    player_car_index: u8,
    lap: LapTracker,
    last_lap_time_ms: Option<u32>,
    best_lap_time_ms: Option<u32>,
    best_sectors_ms: [Option<u32>; 3],
    top_speed_kph: u16,
    laps_completed: u32,
    vehicles: FnvHashMap<u8, VehicleState>,
    events: VecDeque<EventLogEntry>,
    event_log_capacity: usize,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl RigSession {
    pub fn new(rig_id: impl Into<String>, port: u16) -> RigSession {
        RigSession::with_event_log_capacity(rig_id, port, DEFAULT_EVENT_LOG_CAPACITY)
    }

    pub fn with_event_log_capacity(
        rig_id: impl Into<String>,
        port: u16,
        capacity: usize,
    ) -> RigSession {
        RigSession {
            rig_id: rig_id.into(),
            port,
            state: Lifecycle::Idle,
            driver_name: None,
            session_uid: None,
            track_name: f1_enum::UNKNOWN.to_string(),
            track_length: 0,
            player_car_index: 0,
            lap: LapTracker::default(),
            last_lap_time_ms: None,
            best_lap_time_ms: None,
            best_sectors_ms: [None; 3],
            top_speed_kph: 0,
            laps_completed: 0,
            vehicles: FnvHashMap::default(),
            events: VecDeque::with_capacity(capacity),
            event_log_capacity: capacity.max(1),
            started_at: None,
            updated_at: None,
        }
    }

    pub fn rig_id(&self) -> &str {
        &self.rig_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver_name.as_deref()
    }

    pub fn session_uid(&self) -> Option<u64> {
        self.session_uid
    }

    pub fn track_name(&self) -> &str {
        &self.track_name
    }

    pub fn best_lap_time_ms(&self) -> Option<u32> {
        self.best_lap_time_ms
    }

    pub fn last_lap_time_ms(&self) -> Option<u32> {
        self.last_lap_time_ms
    }

    pub fn current_lap(&self) -> Option<u8> {
        self.lap.current
    }

    pub fn vehicle(&self, index: u8) -> Option<&VehicleState> {
        self.vehicles.get(&index)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.events.iter()
    }

    /// Whether packets arriving now would be applied.
    pub fn accepts_packets(&self) -> bool {
        matches!(self.state, Lifecycle::Registered | Lifecycle::Active)
    }

    pub fn register_driver(&mut self, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyDriverName);
        }
        match self.state {
            Lifecycle::Idle | Lifecycle::Completed => (),
            state => {
                return Err(SessionError::InvalidTransition {
                    state,
                    command: "register a driver for",
                })
            }
        }

        self.clear();
        self.driver_name = Some(name.to_string());
        self.state = Lifecycle::Registered;
        info!("{}: registered driver {}", self.rig_id, name);
        Ok(())
    }

    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>, SessionError> {
        if self.state != Lifecycle::Active {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                command: "stop",
            });
        }

        let mut events = vec![];
        self.flush_lap_in_progress(now, &mut events);
        self.state = Lifecycle::Completed;
        let summary = self.summary(now);
        info!(
            "{}: session stopped after {} laps, best {}",
            self.rig_id,
            summary.laps_completed,
            summary
                .best_lap_time_ms
                .map(format_lap_time)
                .unwrap_or_else(|| "-".to_string())
        );
        events.push(SessionEvent::Stopped(summary));
        Ok(events)
    }

    /// Return to Idle from any state, forgetting the driver and everything observed.
    pub fn reset(&mut self) -> Vec<SessionEvent> {
        self.clear();
        self.driver_name = None;
        self.state = Lifecycle::Idle;
        info!("{}: session reset", self.rig_id);
        vec![SessionEvent::Reset]
    }

    pub fn on_packet(&mut self, packet: &Packet, now: DateTime<Utc>) -> Vec<SessionEvent> {
        if !self.accepts_packets() {
            trace!(
                "{}: dropping {} packet while {}",
                self.rig_id,
                packet.kind(),
                self.state
            );
            return vec![];
        }

        let mut events = vec![];
        let uid = packet.header.session_uid;
        match self.session_uid {
            Some(current) if current != uid => self.supersede(uid, now, &mut events),
            Some(_) => (),
            None => self.session_uid = Some(uid),
        }

        if self.state == Lifecycle::Registered {
            self.state = Lifecycle::Active;
            self.started_at = Some(now);
            info!(
                "{}: session {:016x} active for {}",
                self.rig_id,
                uid,
                self.driver_name.as_deref().unwrap_or("?")
            );
            events.push(SessionEvent::Activated);
        }

        self.player_car_index = packet.header.player_car_index;
        self.updated_at = Some(now);

        match &packet.data {
            PacketVariant::Session(data) => self.apply_session(data),
            PacketVariant::LapData(data) => self.apply_lap_data(data, now, &mut events),
            PacketVariant::Event(data) => self.apply_event(data, packet.header.session_time),
            PacketVariant::Motion(data) => self.apply_motion(data),
            PacketVariant::CarTelemetry(data) => self.apply_telemetry(data),
            PacketVariant::CarStatus(data) => self.apply_status(data),
            PacketVariant::CarDamage(data) => self.apply_damage(data),
            other => trace!("{}: ignoring {} packet", self.rig_id, other.kind()),
        }

        events
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            rig_id: self.rig_id.clone(),
            driver_name: self.driver_name.clone(),
            track_name: self.track_name.clone(),
            session_uid: self.session_uid,
            laps_completed: self.laps_completed,
            best_lap_time_ms: self.best_lap_time_ms,
            last_lap_time_ms: self.last_lap_time_ms,
            started_at: self.started_at,
            ended_at: now,
        }
    }

    pub fn snapshot(&self) -> RigSnapshot {
        RigSnapshot {
            rig_id: self.rig_id.clone(),
            port: self.port,
            state: self.state,
            driver_name: self.driver_name.clone(),
            track_name: self.track_name.clone(),
            session_uid: self.session_uid,
            current_lap: self.lap.current.unwrap_or(0),
            current_lap_invalid: self.lap.invalid,
            last_lap_time_ms: self.last_lap_time_ms,
            best_lap_time_ms: self.best_lap_time_ms,
            best_sectors_ms: self.best_sectors_ms,
            top_speed_kph: self.top_speed_kph,
            current_lap_stats: self.lap.telemetry.summary(),
            laps_completed: self.laps_completed,
            player_car_index: self.player_car_index,
            vehicles: self
                .vehicles
                .iter()
                .map(|(index, state)| (*index, state.clone()))
                .collect(),
            events: self.events.iter().cloned().collect(),
            updated_at: self.updated_at,
        }
    }

    fn clear(&mut self) {
        self.session_uid = None;
        self.track_name = f1_enum::UNKNOWN.to_string();
        self.track_length = 0;
        self.player_car_index = 0;
        self.lap = LapTracker::default();
        self.last_lap_time_ms = None;
        self.best_lap_time_ms = None;
        self.best_sectors_ms = [None; 3];
        self.top_speed_kph = 0;
        self.laps_completed = 0;
        self.vehicles.clear();
        self.events.clear();
        self.started_at = None;
        self.updated_at = None;
    }

    // The game moved on to a new session: close the old one and start over under the same driver
    fn supersede(&mut self, uid: u64, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        if self.state == Lifecycle::Active {
            self.flush_lap_in_progress(now, events);
            let summary = self.summary(now);
            info!(
                "{}: session {:016x} superseded by {:016x}",
                self.rig_id,
                summary.session_uid.unwrap_or(0),
                uid
            );
            events.push(SessionEvent::Archived(summary));
        }

        self.clear();
        self.session_uid = Some(uid);
        // Re-enter through Registered so the fresh session is announced
        self.state = Lifecycle::Registered;
    }

    // The chequered flag lap never sees the lap number increment, so a lap is closed when the
    // tracked car has covered the whole track on a valid, timed lap.
    fn flush_lap_in_progress(&mut self, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        let lap_number = match self.lap.current {
            Some(lap) => lap,
            None => return,
        };
        let car = match self.vehicles.get(&self.player_car_index) {
            Some(car) => car,
            None => return,
        };
        let lap_distance = car.lap_distance;
        let lap_time_ms = car.current_lap_time_ms;
        let complete = self.track_length > 0 && lap_distance >= self.track_length as f32;

        if !self.lap.invalid && lap_time_ms > 0 && complete {
            debug!(
                "{}: flushing lap {} in progress at {}",
                self.rig_id,
                lap_number,
                format_lap_time(lap_time_ms)
            );
            self.complete_lap(lap_number, lap_time_ms, now, events);
        } else {
            debug!(
                "{}: discarding lap {} in progress (invalid {}, {:.0}m of {}m)",
                self.rig_id, lap_number, self.lap.invalid, lap_distance, self.track_length
            );
        }
        self.lap.current = None;
    }

    fn complete_lap(
        &mut self,
        lap_number: u8,
        lap_time_ms: u32,
        now: DateTime<Utc>,
        events: &mut Vec<SessionEvent>,
    ) {
        if lap_time_ms > MAX_LAP_TIME_MS {
            warn!(
                "{}: ignoring implausible lap time {}ms for lap {}",
                self.rig_id, lap_time_ms, lap_number
            );
            return;
        }

        let record = LapRecord {
            rig_id: self.rig_id.clone(),
            driver_name: self.driver_name.clone().unwrap_or_default(),
            track_name: self.track_name.clone(),
            lap_number,
            lap_time_ms,
            compound: self
                .vehicles
                .get(&self.player_car_index)
                .map_or(f1_enum::UNKNOWN, |car| car.compound_name())
                .to_string(),
            timestamp: now,
            valid: true,
            stats: self.lap.telemetry.summary(),
        };

        self.laps_completed += 1;
        self.best_lap_time_ms = Some(
            self.best_lap_time_ms
                .map_or(lap_time_ms, |best| best.min(lap_time_ms)),
        );
        self.update_best_sectors(lap_time_ms);

        info!(
            "{}: {} completed lap {} in {} on {}",
            self.rig_id,
            record.driver_name,
            lap_number,
            record.formatted_time(),
            record.compound
        );
        events.push(SessionEvent::LapCompleted(record));
    }

    fn update_best_sectors(&mut self, lap_time_ms: u32) {
        let [s1, s2] = self.lap.sectors;
        let s3 = match (s1, s2) {
            (Some(s1), Some(s2)) if lap_time_ms > s1 + s2 => Some(lap_time_ms - s1 - s2),
            _ => None,
        };
        for (best, sector) in self.best_sectors_ms.iter_mut().zip([s1, s2, s3].iter()) {
            if let Some(time) = sector {
                *best = Some(best.map_or(*time, |b| b.min(*time)));
            }
        }
    }

    fn apply_session(&mut self, data: &SessionData) {
        let track = f1_enum::track_name(data.track_id);
        if track != self.track_name {
            debug!(
                "{}: track is {} ({}m, {})",
                self.rig_id,
                track,
                data.track_length,
                f1_enum::session_type_name(data.session_type)
            );
            self.track_name = track.to_string();
        }
        self.track_length = data.track_length;
    }

    fn apply_lap_data(&mut self, data: &LapData, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        for (index, car) in data.cars.iter().enumerate() {
            let vehicle = self.vehicles.entry(index as u8).or_default();
            vehicle.car_position = car.car_position;
            vehicle.current_lap_num = car.current_lap_num;
            vehicle.current_lap_time_ms = car.current_lap_time_ms;
            vehicle.last_lap_time_ms = car.last_lap_time_ms;
            vehicle.lap_distance = car.lap_distance;
            vehicle.sector = car.sector;
        }

        if self.player_car_index == SPECTATOR_INDEX {
            return;
        }
        if let Some(car) = data.cars.get(self.player_car_index as usize) {
            self.track_lap(car, now, events);
        }
    }

    fn track_lap(&mut self, car: &CarLapData, now: DateTime<Utc>, events: &mut Vec<SessionEvent>) {
        let lap_num = car.current_lap_num;
        let previous = match self.lap.current {
            Some(previous) => previous,
            None => {
                debug!("{}: lap baseline {}", self.rig_id, lap_num);
                self.lap.current = Some(lap_num);
                self.lap.invalid = car.current_lap_invalid;
                self.lap.telemetry = LapAccumulator::default();
                self.track_sectors(car);
                return;
            }
        };

        if lap_num > previous {
            self.lap.regressed_to = None;
            let lap_time_ms = car.last_lap_time_ms;
            self.last_lap_time_ms = Some(lap_time_ms);

            if self.lap.invalid {
                debug!("{}: lap {} was invalidated", self.rig_id, previous);
            } else if lap_time_ms == 0 {
                debug!("{}: lap {} has no time", self.rig_id, previous);
            } else {
                self.complete_lap(previous, lap_time_ms, now, events);
            }

            self.lap.current = Some(lap_num);
            self.lap.invalid = car.current_lap_invalid;
            self.lap.sectors = [None; 2];
            self.lap.telemetry = LapAccumulator::default();
            self.track_sectors(car);
        } else if lap_num < previous {
            if self.lap.regressed_to != Some(lap_num) {
                warn!(
                    "{}: lap number went backwards from {} to {} within session, ignoring",
                    self.rig_id, previous, lap_num
                );
                self.lap.regressed_to = Some(lap_num);
            }
        } else {
            self.lap.regressed_to = None;
            self.lap.invalid |= car.current_lap_invalid;
            self.track_sectors(car);
        }
    }

    fn track_sectors(&mut self, car: &CarLapData) {
        if car.sector >= 1 && car.sector1_time_ms() > 0 {
            self.lap.sectors[0] = Some(car.sector1_time_ms());
        }
        if car.sector >= 2 && car.sector2_time_ms() > 0 {
            self.lap.sectors[1] = Some(car.sector2_time_ms());
        }
    }

    fn apply_event(&mut self, data: &EventData, session_time: f32) {
        match data.code {
            EventCode::SESSION_STARTED | EventCode::SESSION_ENDED => {
                info!("{}: {}", self.rig_id, data.code.description())
            }
            EventCode::BUTTONS => return,
            code => debug!("{}: event {}", self.rig_id, code),
        }

        if self.events.len() >= self.event_log_capacity {
            self.events.pop_front();
        }
        self.events.push_back(EventLogEntry {
            session_time,
            code: data.code.to_string(),
            description: data.code.description(),
        });
    }

    fn apply_motion(&mut self, data: &MotionData) {
        for (index, car) in data.cars.iter().enumerate() {
            let vehicle = self.vehicles.entry(index as u8).or_default();
            vehicle.g_force_lateral = car.g_force_lateral;
            vehicle.g_force_longitudinal = car.g_force_longitudinal;
        }
    }

    fn apply_telemetry(&mut self, data: &CarTelemetryData) {
        for (index, car) in data.cars.iter().enumerate() {
            let vehicle = self.vehicles.entry(index as u8).or_default();
            vehicle.speed_kph = car.speed;
            vehicle.engine_rpm = car.engine_rpm;
            vehicle.gear = car.gear;
            vehicle.throttle = car.throttle;
            vehicle.brake = car.brake;
            vehicle.steer = car.steer;
            vehicle.drs = car.drs;
            vehicle.tyres_surface_temperature = car.tyres_surface_temperature;
        }

        if let Some(player) = data.cars.get(self.player_car_index as usize) {
            self.top_speed_kph = self.top_speed_kph.max(player.speed);
            self.lap.telemetry.add(player);
        }
    }

    fn apply_status(&mut self, data: &CarStatusData) {
        for (index, car) in data.cars.iter().enumerate() {
            let vehicle = self.vehicles.entry(index as u8).or_default();
            vehicle.visual_tyre_compound = car.visual_tyre_compound;
            vehicle.actual_tyre_compound = car.actual_tyre_compound;
            vehicle.tyres_age_laps = car.tyres_age_laps;
            vehicle.ers_store_energy = car.ers_store_energy;
            vehicle.fuel_in_tank = car.fuel_in_tank;
            vehicle.fuel_remaining_laps = car.fuel_remaining_laps;
        }
    }

    fn apply_damage(&mut self, data: &CarDamageData) {
        for (index, car) in data.cars.iter().enumerate() {
            let vehicle = self.vehicles.entry(index as u8).or_default();
            vehicle.tyres_wear = car.tyres_wear;
            vehicle.tyre_blisters = car.tyre_blisters;
            vehicle.front_left_wing_damage = car.front_left_wing_damage;
            vehicle.front_right_wing_damage = car.front_right_wing_damage;
            vehicle.rear_wing_damage = car.rear_wing_damage;
            vehicle.floor_damage = car.floor_damage;
            vehicle.gear_box_damage = car.gear_box_damage;
            vehicle.engine_damage = car.engine_damage;
        }
    }
}

/// Render a lap time as `M:SS.mmm`.
pub fn format_lap_time(ms: u32) -> String {
    format!("{}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}
