use fnv::FnvHashMap;
use std::convert::TryFrom;
use std::fmt::{Debug, Formatter};
use std::sync::OnceLock;

use crate::protocol::inbound::{Packet, PacketVariant};
use crate::protocol::parser::{self, Res};
use crate::protocol::{DecodeError, PacketKind, ProtocolVersion, HEADER_SIZE, NUM_CARS};

pub(crate) type BodyParser = for<'a> fn(&Layout, &'a [u8]) -> Res<&'a [u8], PacketVariant>;

/// A named run of bytes within a packet body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub width: usize,
}

const fn f(name: &'static str, width: usize) -> Field {
    Field { name, width }
}

fn width_of(fields: &[Field]) -> usize {
    fields.iter().map(|f| f.width).sum()
}

fn offset_in(fields: &[Field], name: &str) -> Option<usize> {
    let mut offset = 0;
    for field in fields {
        if field.name == name {
            return Some(offset);
        }
        offset += field.width;
    }
    None
}

/// A block repeated `count` times, usually once per car.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Entry {
    pub count: usize,
    pub fields: &'static [Field],
    /// Fields appended to every entry by a newer format.
    pub tail: Option<&'static [Field]>,
}

impl Entry {
    pub fn stride(&self) -> usize {
        width_of(self.fields) + self.tail.map_or(0, width_of)
    }

    pub fn has_tail(&self) -> bool {
        self.tail.is_some()
    }

    fn offset_of(&self, name: &str) -> Option<usize> {
        offset_in(self.fields, name).or_else(|| {
            self.tail
                .and_then(|tail| offset_in(tail, name))
                .map(|offset| offset + width_of(self.fields))
        })
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .chain(self.tail.unwrap_or(&[]).iter())
            .find(|f| f.name == name)
    }
}

/// Byte layout of one packet body for one format.
///
/// A body is laid out as `prefix`, then `entry` repeated `entry.count` times, then `suffix`, then
/// the optional `tail` which newer formats append to the whole body.
#[derive(Copy, Clone)]
pub struct Layout {
    pub version: ProtocolVersion,
    pub kind: PacketKind,
    pub prefix: &'static [Field],
    pub entry: Option<Entry>,
    pub suffix: &'static [Field],
    pub tail: Option<&'static [Field]>,
    parse: BodyParser,
}

impl Layout {
    pub(crate) const fn new(version: ProtocolVersion, kind: PacketKind, parse: BodyParser) -> Self {
        Layout {
            version,
            kind,
            prefix: &[],
            entry: None,
            suffix: &[],
            tail: None,
            parse,
        }
    }

    pub(crate) const fn prefix(self, prefix: &'static [Field]) -> Self {
        Layout { prefix, ..self }
    }

    pub(crate) const fn entry(self, count: usize, fields: &'static [Field]) -> Self {
        Layout {
            entry: Some(Entry {
                count,
                fields,
                tail: None,
            }),
            ..self
        }
    }

    pub(crate) const fn entry_with_tail(
        self,
        count: usize,
        fields: &'static [Field],
        tail: &'static [Field],
    ) -> Self {
        Layout {
            entry: Some(Entry {
                count,
                fields,
                tail: Some(tail),
            }),
            ..self
        }
    }

    pub(crate) const fn suffix(self, suffix: &'static [Field]) -> Self {
        Layout { suffix, ..self }
    }

    pub(crate) const fn tail(self, tail: &'static [Field]) -> Self {
        Layout {
            tail: Some(tail),
            ..self
        }
    }

    /// Number of bytes following the header.
    pub fn body_size(&self) -> usize {
        width_of(self.prefix)
            + self.entry.map_or(0, |e| e.count * e.stride())
            + width_of(self.suffix)
            + self.tail.map_or(0, width_of)
    }

    /// Total datagram size, including the header.
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.body_size()
    }

    pub fn has_tail(&self) -> bool {
        self.tail.is_some()
    }

    pub fn entry_has_tail(&self) -> bool {
        self.entry.map_or(false, |e| e.has_tail())
    }

    /// Offset of the start of entry `index` from the start of the body.
    pub fn entry_offset(&self, index: usize) -> Option<usize> {
        self.entry
            .filter(|e| index < e.count)
            .map(|e| width_of(self.prefix) + index * e.stride())
    }

    /// Body offset of the named field. Entry fields resolve within the first entry.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let prefix = width_of(self.prefix);
        let entries = self.entry.map_or(0, |e| e.count * e.stride());
        let suffix = width_of(self.suffix);
        offset_in(self.prefix, name)
            .or_else(|| {
                self.entry
                    .and_then(|e| e.offset_of(name))
                    .map(|o| o + prefix)
            })
            .or_else(|| offset_in(self.suffix, name).map(|o| o + prefix + entries))
            .or_else(|| {
                self.tail
                    .and_then(|t| offset_in(t, name))
                    .map(|o| o + prefix + entries + suffix)
            })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.prefix
            .iter()
            .chain(self.suffix.iter())
            .chain(self.tail.unwrap_or(&[]).iter())
            .find(|f| f.name == name)
            .or_else(|| self.entry.as_ref().and_then(|e| e.field(name)))
    }

    /// Width of a named field, used for fixed-width text whose size varies between formats.
    pub fn width_of(&self, name: &str) -> usize {
        self.field(name).map_or(0, |f| f.width)
    }

    /// Every field in body order, with entry fields listed once.
    pub fn fields(&self) -> impl Iterator<Item = &Field> + '_ {
        let entry_fields = self.entry.map_or(&[][..], |e| e.fields);
        let entry_tail = self.entry.and_then(|e| e.tail).unwrap_or(&[]);
        self.prefix
            .iter()
            .chain(entry_fields.iter())
            .chain(entry_tail.iter())
            .chain(self.suffix.iter())
            .chain(self.tail.unwrap_or(&[]).iter())
    }

    pub(crate) fn parse_body<'a>(&self, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
        (self.parse)(self, input)
    }
}

impl Debug for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("version", &self.version)
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .field("entry", &self.entry)
            .field("suffix", &self.suffix)
            .field("tail", &self.tail)
            .finish()
    }
}

/// Lookup from (format, packet kind) to the layout used to decode it.
///
/// Supporting a new format means registering its layouts, nothing else changes.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    layouts: FnvHashMap<(ProtocolVersion, PacketKind), Layout>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        FormatRegistry::new()
    }
}

impl FormatRegistry {
    /// A registry holding the layouts for every supported format.
    pub fn new() -> FormatRegistry {
        let mut registry = FormatRegistry::empty();
        for version in ProtocolVersion::SUPPORTED.iter() {
            for layout in standard_layouts(*version) {
                registry.register(layout);
            }
        }
        registry
    }

    pub fn empty() -> FormatRegistry {
        FormatRegistry {
            layouts: FnvHashMap::default(),
        }
    }

    /// Shared instance of [`FormatRegistry::new`].
    pub fn standard() -> &'static FormatRegistry {
        static STANDARD: OnceLock<FormatRegistry> = OnceLock::new();
        STANDARD.get_or_init(FormatRegistry::new)
    }

    /// Add a layout, returning the one it replaced.
    pub fn register(&mut self, layout: Layout) -> Option<Layout> {
        self.layouts.insert((layout.version, layout.kind), layout)
    }

    pub fn get(&self, version: ProtocolVersion, kind: PacketKind) -> Option<&Layout> {
        self.layouts.get(&(version, kind))
    }

    pub fn lookup(&self, version: ProtocolVersion, packet_id: u8) -> Option<&Layout> {
        PacketKind::try_from(packet_id)
            .ok()
            .and_then(|kind| self.get(version, kind))
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn decode(&self, input: &[u8]) -> Result<Packet, DecodeError> {
        if input.len() < HEADER_SIZE {
            return Err(DecodeError::TruncatedBuffer {
                expected: HEADER_SIZE,
                actual: input.len(),
            });
        }

        let (body, raw) = parser::header(input).map_err(|_| DecodeError::TruncatedBuffer {
            expected: HEADER_SIZE,
            actual: input.len(),
        })?;

        let format = ProtocolVersion::from_wire(raw.packet_format)
            .ok_or(DecodeError::UnsupportedFormat(raw.packet_format))?;

        let layout = self
            .lookup(format, raw.packet_id)
            .ok_or(DecodeError::UnknownPacketKind {
                format,
                id: raw.packet_id,
            })?;

        let size = layout.body_size();
        if body.len() < size {
            return Err(DecodeError::TruncatedBuffer {
                expected: HEADER_SIZE + size,
                actual: input.len(),
            });
        }

        // Anything past the known layout belongs to a future revision and is ignored
        let data = parser::body(layout, &body[..size])?;

        Ok(Packet {
            header: raw.resolve(format, layout.kind),
            data,
        })
    }
}

const MOTION_CAR: &[Field] = &[
    f("world_position", 12),
    f("world_velocity", 12),
    f("world_forward_dir", 6),
    f("world_right_dir", 6),
    f("g_force_lateral", 4),
    f("g_force_longitudinal", 4),
    f("g_force_vertical", 4),
    f("yaw", 4),
    f("pitch", 4),
    f("roll", 4),
];

const SESSION: &[Field] = &[
    f("weather", 1),
    f("track_temperature", 1),
    f("air_temperature", 1),
    f("total_laps", 1),
    f("track_length", 2),
    f("session_type", 1),
    f("track_id", 1),
    f("formula", 1),
    f("session_time_left", 2),
    f("session_duration", 2),
    f("pit_speed_limit", 1),
    f("game_paused", 1),
    f("is_spectating", 1),
    f("spectator_car_index", 1),
    f("sli_pro_native_support", 1),
    f("num_marshal_zones", 1),
    f("marshal_zones", 21 * 5),
    f("safety_car_status", 1),
    f("network_game", 1),
    f("num_weather_forecast_samples", 1),
    f("weather_forecast_samples", 64 * 8),
    // Assists, settings and schedule, not interpreted
    f("settings", 85),
];

const LAP_DATA_CAR: &[Field] = &[
    f("last_lap_time_ms", 4),
    f("current_lap_time_ms", 4),
    f("sector1_time_ms_part", 2),
    f("sector1_time_minutes_part", 1),
    f("sector2_time_ms_part", 2),
    f("sector2_time_minutes_part", 1),
    f("delta_to_car_in_front_ms_part", 2),
    f("delta_to_car_in_front_minutes_part", 1),
    f("delta_to_race_leader_ms_part", 2),
    f("delta_to_race_leader_minutes_part", 1),
    f("lap_distance", 4),
    f("total_distance", 4),
    f("safety_car_delta", 4),
    f("car_position", 1),
    f("current_lap_num", 1),
    f("pit_status", 1),
    f("num_pit_stops", 1),
    f("sector", 1),
    f("current_lap_invalid", 1),
    f("penalties", 1),
    f("total_warnings", 1),
    f("corner_cutting_warnings", 1),
    f("num_unserved_drive_through_pens", 1),
    f("num_unserved_stop_go_pens", 1),
    f("grid_position", 1),
    f("driver_status", 1),
    f("result_status", 1),
    f("pit_lane_timer_active", 1),
    f("pit_lane_time_in_lane_ms", 2),
    f("pit_stop_timer_ms", 2),
    f("pit_stop_should_serve_pen", 1),
    f("speed_trap_fastest_speed", 4),
    f("speed_trap_fastest_lap", 1),
];

const LAP_DATA_SUFFIX: &[Field] = &[
    f("time_trial_pb_car_index", 1),
    f("time_trial_rival_car_index", 1),
];

const EVENT: &[Field] = &[f("event_code", 4), f("event_details", 12)];

const NUM_ACTIVE_CARS: &[Field] = &[f("num_active_cars", 1)];

const PARTICIPANT_24: &[Field] = &[
    f("ai_controlled", 1),
    f("driver_id", 1),
    f("network_id", 1),
    f("team_id", 1),
    f("my_team", 1),
    f("race_number", 1),
    f("nationality", 1),
    f("name", 48),
    f("your_telemetry", 1),
    f("show_online_names", 1),
    f("tech_level", 2),
    f("platform", 1),
];

const PARTICIPANT_25: &[Field] = &[
    f("ai_controlled", 1),
    f("driver_id", 1),
    f("network_id", 1),
    f("team_id", 1),
    f("my_team", 1),
    f("race_number", 1),
    f("nationality", 1),
    f("name", 32),
    f("your_telemetry", 1),
    f("show_online_names", 1),
    f("tech_level", 2),
    f("platform", 1),
];

const PARTICIPANT_LIVERY: &[Field] = &[f("num_colours", 1), f("livery_colours", 4 * 3)];

const CAR_SETUP: &[Field] = &[
    f("front_wing", 1),
    f("rear_wing", 1),
    f("on_throttle", 1),
    f("off_throttle", 1),
    f("front_camber", 4),
    f("rear_camber", 4),
    f("front_toe", 4),
    f("rear_toe", 4),
    f("front_suspension", 1),
    f("rear_suspension", 1),
    f("front_anti_roll_bar", 1),
    f("rear_anti_roll_bar", 1),
    f("front_suspension_height", 1),
    f("rear_suspension_height", 1),
    f("brake_pressure", 1),
    f("brake_bias", 1),
    f("engine_braking", 1),
    f("rear_left_tyre_pressure", 4),
    f("rear_right_tyre_pressure", 4),
    f("front_left_tyre_pressure", 4),
    f("front_right_tyre_pressure", 4),
    f("ballast", 1),
    f("fuel_load", 4),
];

const CAR_SETUP_SUFFIX: &[Field] = &[f("next_front_wing_value", 4)];

const CAR_TELEMETRY: &[Field] = &[
    f("speed", 2),
    f("throttle", 4),
    f("steer", 4),
    f("brake", 4),
    f("clutch", 1),
    f("gear", 1),
    f("engine_rpm", 2),
    f("drs", 1),
    f("rev_lights_percent", 1),
    f("rev_lights_bit_value", 2),
    f("brakes_temperature", 8),
    f("tyres_surface_temperature", 4),
    f("tyres_inner_temperature", 4),
    f("engine_temperature", 2),
    f("tyres_pressure", 16),
    f("surface_type", 4),
];

const CAR_TELEMETRY_SUFFIX: &[Field] = &[
    f("mfd_panel_index", 1),
    f("mfd_panel_index_secondary_player", 1),
    f("suggested_gear", 1),
];

const CAR_STATUS: &[Field] = &[
    f("traction_control", 1),
    f("anti_lock_brakes", 1),
    f("fuel_mix", 1),
    f("front_brake_bias", 1),
    f("pit_limiter_status", 1),
    f("fuel_in_tank", 4),
    f("fuel_capacity", 4),
    f("fuel_remaining_laps", 4),
    f("max_rpm", 2),
    f("idle_rpm", 2),
    f("max_gears", 1),
    f("drs_allowed", 1),
    f("drs_activation_distance", 2),
    f("actual_tyre_compound", 1),
    f("visual_tyre_compound", 1),
    f("tyres_age_laps", 1),
    f("vehicle_fia_flags", 1),
    f("engine_power_ice", 4),
    f("engine_power_mguk", 4),
    f("ers_store_energy", 4),
    f("ers_deploy_mode", 1),
    f("ers_harvested_this_lap_mguk", 4),
    f("ers_harvested_this_lap_mguh", 4),
    f("ers_deployed_this_lap", 4),
    f("network_paused", 1),
];

const FINAL_CLASSIFICATION_PREFIX: &[Field] = &[f("num_cars", 1)];

const FINAL_CLASSIFICATION: &[Field] = &[
    f("position", 1),
    f("num_laps", 1),
    f("grid_position", 1),
    f("points", 1),
    f("num_pit_stops", 1),
    f("result_status", 1),
    f("best_lap_time_ms", 4),
    f("total_race_time", 8),
    f("penalties_time", 1),
    f("num_penalties", 1),
    f("num_tyre_stints", 1),
    f("tyre_stints_actual", 8),
    f("tyre_stints_visual", 8),
    f("tyre_stints_end_laps", 8),
];

const FINAL_CLASSIFICATION_REASON: &[Field] = &[f("result_reason", 1)];

const LOBBY_PREFIX: &[Field] = &[f("num_players", 1)];

const LOBBY_PLAYER_24: &[Field] = &[
    f("ai_controlled", 1),
    f("team_id", 1),
    f("nationality", 1),
    f("platform", 1),
    f("name", 48),
    f("car_number", 1),
    f("your_telemetry", 1),
    f("show_online_names", 1),
    f("tech_level", 2),
    f("ready_status", 1),
];

const LOBBY_PLAYER_25: &[Field] = &[
    f("ai_controlled", 1),
    f("team_id", 1),
    f("nationality", 1),
    f("platform", 1),
    f("name", 32),
    f("car_number", 1),
    f("your_telemetry", 1),
    f("show_online_names", 1),
    f("tech_level", 2),
    f("ready_status", 1),
];

const CAR_DAMAGE: &[Field] = &[
    f("tyres_wear", 16),
    f("tyres_damage", 4),
    f("brakes_damage", 4),
    f("front_left_wing_damage", 1),
    f("front_right_wing_damage", 1),
    f("rear_wing_damage", 1),
    f("floor_damage", 1),
    f("diffuser_damage", 1),
    f("sidepod_damage", 1),
    f("drs_fault", 1),
    f("ers_fault", 1),
    f("gear_box_damage", 1),
    f("engine_damage", 1),
    f("engine_mguh_wear", 1),
    f("engine_es_wear", 1),
    f("engine_ce_wear", 1),
    f("engine_ice_wear", 1),
    f("engine_mguk_wear", 1),
    f("engine_tc_wear", 1),
    f("engine_blown", 1),
    f("engine_seized", 1),
];

const CAR_DAMAGE_BLISTERS: &[Field] = &[f("tyre_blisters", 4)];

const SESSION_HISTORY_PREFIX: &[Field] = &[
    f("car_index", 1),
    f("num_laps", 1),
    f("num_tyre_stints", 1),
    f("best_lap_time_lap_num", 1),
    f("best_sector1_lap_num", 1),
    f("best_sector2_lap_num", 1),
    f("best_sector3_lap_num", 1),
];

const LAP_HISTORY: &[Field] = &[
    f("lap_time_ms", 4),
    f("sector1_time_ms_part", 2),
    f("sector1_time_minutes_part", 1),
    f("sector2_time_ms_part", 2),
    f("sector2_time_minutes_part", 1),
    f("sector3_time_ms_part", 2),
    f("sector3_time_minutes_part", 1),
    f("lap_valid_bit_flags", 1),
];

const TYRE_STINT_HISTORY: &[Field] = &[f("tyre_stints_history", 8 * 3)];

pub(crate) const MAX_HISTORY_LAPS: usize = 100;
pub(crate) const MAX_TYRE_STINTS: usize = 8;
pub(crate) const NUM_TYRE_SETS: usize = 20;
pub(crate) const MAX_LAP_POSITIONS: usize = 50;
pub(crate) const NUM_MARSHAL_ZONES: usize = 21;
pub(crate) const NUM_FORECAST_SAMPLES: usize = 64;
pub(crate) const SESSION_SETTINGS_WIDTH: usize = 85;

const TYRE_SETS_PREFIX: &[Field] = &[f("car_index", 1)];

const TYRE_SET: &[Field] = &[
    f("actual_tyre_compound", 1),
    f("visual_tyre_compound", 1),
    f("wear", 1),
    f("available", 1),
    f("recommended_session", 1),
    f("life_span", 1),
    f("usable_life", 1),
    f("lap_delta_time", 2),
    f("fitted", 1),
];

const TYRE_SETS_SUFFIX: &[Field] = &[f("fitted_index", 1)];

const MOTION_EX: &[Field] = &[
    f("suspension_position", 16),
    f("suspension_velocity", 16),
    f("suspension_acceleration", 16),
    f("wheel_speed", 16),
    f("wheel_slip_ratio", 16),
    f("wheel_slip_angle", 16),
    f("wheel_lat_force", 16),
    f("wheel_long_force", 16),
    f("height_of_cog_above_ground", 4),
    f("local_velocity", 12),
    f("angular_velocity", 12),
    f("angular_acceleration", 12),
    f("front_wheels_angle", 4),
    f("wheel_vert_force", 16),
    f("front_aero_height", 4),
    f("rear_aero_height", 4),
    f("front_roll_angle", 4),
    f("rear_roll_angle", 4),
    f("chassis_yaw", 4),
];

const MOTION_EX_25: &[Field] = &[
    f("chassis_pitch", 4),
    f("wheel_camber", 16),
    f("wheel_camber_gain", 16),
];

const TIME_TRIAL_SET: &[Field] = &[
    f("car_index", 1),
    f("team_id", 1),
    f("lap_time_ms", 4),
    f("sector1_time_ms", 4),
    f("sector2_time_ms", 4),
    f("sector3_time_ms", 4),
    f("traction_control", 1),
    f("gearbox_assist", 1),
    f("anti_lock_brakes", 1),
    f("equal_car_performance", 1),
    f("custom_setup", 1),
    f("valid", 1),
];

const LAP_POSITIONS_PREFIX: &[Field] = &[f("num_laps", 1), f("lap_start", 1)];

const LAP_POSITIONS: &[Field] = &[f("position_for_vehicle_index", NUM_CARS)];

/// Layouts which are identical across every supported format.
fn common_layouts(v: ProtocolVersion) -> Vec<Layout> {
    use PacketKind::*;
    vec![
        Layout::new(v, Motion, parser::motion).entry(NUM_CARS, MOTION_CAR),
        Layout::new(v, Session, parser::session).prefix(SESSION),
        Layout::new(v, LapData, parser::lap_data)
            .entry(NUM_CARS, LAP_DATA_CAR)
            .suffix(LAP_DATA_SUFFIX),
        Layout::new(v, Event, parser::event).prefix(EVENT),
        Layout::new(v, CarSetups, parser::car_setups)
            .entry(NUM_CARS, CAR_SETUP)
            .suffix(CAR_SETUP_SUFFIX),
        Layout::new(v, CarTelemetry, parser::car_telemetry_packet)
            .entry(NUM_CARS, CAR_TELEMETRY)
            .suffix(CAR_TELEMETRY_SUFFIX),
        Layout::new(v, CarStatus, parser::car_status).entry(NUM_CARS, CAR_STATUS),
        Layout::new(v, SessionHistory, parser::session_history)
            .prefix(SESSION_HISTORY_PREFIX)
            .entry(MAX_HISTORY_LAPS, LAP_HISTORY)
            .suffix(TYRE_STINT_HISTORY),
        Layout::new(v, TyreSets, parser::tyre_sets)
            .prefix(TYRE_SETS_PREFIX)
            .entry(NUM_TYRE_SETS, TYRE_SET)
            .suffix(TYRE_SETS_SUFFIX),
        Layout::new(v, TimeTrial, parser::time_trial).entry(3, TIME_TRIAL_SET),
    ]
}

fn standard_layouts(v: ProtocolVersion) -> Vec<Layout> {
    use PacketKind::*;
    let mut layouts = common_layouts(v);
    match v {
        ProtocolVersion::F1_24 => layouts.extend(vec![
            Layout::new(v, Participants, parser::participants)
                .prefix(NUM_ACTIVE_CARS)
                .entry(NUM_CARS, PARTICIPANT_24),
            Layout::new(v, FinalClassification, parser::final_classification)
                .prefix(FINAL_CLASSIFICATION_PREFIX)
                .entry(NUM_CARS, FINAL_CLASSIFICATION),
            Layout::new(v, LobbyInfo, parser::lobby_info)
                .prefix(LOBBY_PREFIX)
                .entry(NUM_CARS, LOBBY_PLAYER_24),
            Layout::new(v, CarDamage, parser::car_damage).entry(NUM_CARS, CAR_DAMAGE),
            Layout::new(v, MotionEx, parser::motion_ex).prefix(MOTION_EX),
        ]),
        ProtocolVersion::F1_25 => layouts.extend(vec![
            Layout::new(v, Participants, parser::participants)
                .prefix(NUM_ACTIVE_CARS)
                .entry_with_tail(NUM_CARS, PARTICIPANT_25, PARTICIPANT_LIVERY),
            Layout::new(v, FinalClassification, parser::final_classification)
                .prefix(FINAL_CLASSIFICATION_PREFIX)
                .entry_with_tail(NUM_CARS, FINAL_CLASSIFICATION, FINAL_CLASSIFICATION_REASON),
            Layout::new(v, LobbyInfo, parser::lobby_info)
                .prefix(LOBBY_PREFIX)
                .entry(NUM_CARS, LOBBY_PLAYER_25),
            Layout::new(v, CarDamage, parser::car_damage).entry_with_tail(
                NUM_CARS,
                CAR_DAMAGE,
                CAR_DAMAGE_BLISTERS,
            ),
            Layout::new(v, MotionEx, parser::motion_ex)
                .prefix(MOTION_EX)
                .tail(MOTION_EX_25),
            Layout::new(v, LapPositions, parser::lap_positions)
                .prefix(LAP_POSITIONS_PREFIX)
                .entry(MAX_LAP_POSITIONS, LAP_POSITIONS),
        ]),
    }
    layouts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(version: ProtocolVersion, kind: PacketKind) -> usize {
        FormatRegistry::standard()
            .get(version, kind)
            .map(Layout::packet_size)
            .unwrap()
    }

    #[test]
    fn packet_sizes_match_the_wire() {
        use PacketKind::*;
        use ProtocolVersion::*;

        let expected = [
            (Motion, 1349, 1349),
            (Session, 753, 753),
            (LapData, 1285, 1285),
            (Event, 45, 45),
            (Participants, 1350, 1284),
            (CarSetups, 1133, 1133),
            (CarTelemetry, 1352, 1352),
            (CarStatus, 1239, 1239),
            (FinalClassification, 1020, 1042),
            (LobbyInfo, 1306, 954),
            (CarDamage, 953, 1041),
            (SessionHistory, 1460, 1460),
            (TyreSets, 231, 231),
            (MotionEx, 237, 273),
            (TimeTrial, 101, 101),
        ];

        for (kind, f1_24, f1_25) in expected.iter() {
            assert_eq!(size(F1_24, *kind), *f1_24, "{} 2024", kind);
            assert_eq!(size(F1_25, *kind), *f1_25, "{} 2025", kind);
        }
        assert_eq!(size(F1_25, LapPositions), 1131);
    }

    #[test]
    fn lap_positions_only_exist_in_2025() {
        let registry = FormatRegistry::new();
        assert!(registry
            .get(ProtocolVersion::F1_24, PacketKind::LapPositions)
            .is_none());
        assert!(registry
            .lookup(ProtocolVersion::F1_25, PacketKind::LapPositions.id())
            .is_some());
        assert_eq!(registry.len(), 15 + 16);
    }

    #[test]
    fn blisters_are_an_entry_tail() {
        let registry = FormatRegistry::new();
        let old = registry
            .get(ProtocolVersion::F1_24, PacketKind::CarDamage)
            .unwrap();
        let new = registry
            .get(ProtocolVersion::F1_25, PacketKind::CarDamage)
            .unwrap();

        assert!(!old.entry_has_tail());
        assert!(new.entry_has_tail());
        assert_eq!(new.entry.unwrap().stride(), old.entry.unwrap().stride() + 4);
        assert_eq!(new.offset_of("tyre_blisters"), Some(42));
        assert_eq!(old.offset_of("tyre_blisters"), None);
        assert_eq!(new.entry_offset(1), Some(46));
    }

    #[test]
    fn field_offsets() {
        let layout = FormatRegistry::standard()
            .get(ProtocolVersion::F1_24, PacketKind::LapData)
            .unwrap();
        assert_eq!(layout.offset_of("last_lap_time_ms"), Some(0));
        assert_eq!(layout.offset_of("current_lap_num"), Some(33));
        assert_eq!(layout.offset_of("current_lap_invalid"), Some(37));
        assert_eq!(layout.offset_of("time_trial_pb_car_index"), Some(22 * 57));

        let participants = FormatRegistry::standard()
            .get(ProtocolVersion::F1_25, PacketKind::Participants)
            .unwrap();
        assert_eq!(participants.width_of("name"), 32);
        assert_eq!(participants.offset_of("num_colours"), Some(1 + 44));
    }

    #[test]
    fn registering_a_format_is_additive() {
        let mut registry = FormatRegistry::empty();
        let layout = Layout::new(
            ProtocolVersion::F1_25,
            PacketKind::Event,
            parser::event,
        )
        .prefix(EVENT);
        assert!(registry.register(layout).is_none());
        assert!(registry.register(layout).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ProtocolVersion::F1_24, PacketKind::Event).is_none());
    }
}
