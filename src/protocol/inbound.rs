use tinyvec::ArrayVec;

use crate::protocol::f1_enum::EventCode;
use crate::protocol::{DecodeError, PacketKind, ProtocolVersion, NUM_CARS};

/// A fully decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub data: PacketVariant,
}

impl Packet {
    pub fn decode(input: &[u8]) -> Result<Packet, DecodeError> {
        crate::protocol::decode(input)
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }
}

/// Header which prefixes every datagram.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PacketHeader {
    pub format: ProtocolVersion,
    pub game_year: u8,
    pub game_major_version: u8,
    pub game_minor_version: u8,
    pub packet_version: u8,
    pub kind: PacketKind,
    /// Opaque identifier, changes whenever the game starts a new session.
    pub session_uid: u64,
    pub session_time: f32,
    pub frame_identifier: u32,
    pub overall_frame_identifier: u32,
    pub player_car_index: u8,
    /// 255 when there is no second player.
    pub secondary_player_car_index: u8,
}

/// The header as found on the wire, before the format and packet id are validated.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct RawHeader {
    pub packet_format: u16,
    pub game_year: u8,
    pub game_major_version: u8,
    pub game_minor_version: u8,
    pub packet_version: u8,
    pub packet_id: u8,
    pub session_uid: u64,
    pub session_time: f32,
    pub frame_identifier: u32,
    pub overall_frame_identifier: u32,
    pub player_car_index: u8,
    pub secondary_player_car_index: u8,
}

impl RawHeader {
    pub(crate) fn resolve(self, format: ProtocolVersion, kind: PacketKind) -> PacketHeader {
        PacketHeader {
            format,
            game_year: self.game_year,
            game_major_version: self.game_major_version,
            game_minor_version: self.game_minor_version,
            packet_version: self.packet_version,
            kind,
            session_uid: self.session_uid,
            session_time: self.session_time,
            frame_identifier: self.frame_identifier,
            overall_frame_identifier: self.overall_frame_identifier,
            player_car_index: self.player_car_index,
            secondary_player_car_index: self.secondary_player_car_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketVariant {
    Motion(MotionData),
    Session(SessionData),
    LapData(LapData),
    Event(EventData),
    Participants(ParticipantsData),
    CarSetups(CarSetupsData),
    CarTelemetry(CarTelemetryData),
    CarStatus(CarStatusData),
    FinalClassification(FinalClassificationData),
    LobbyInfo(LobbyInfoData),
    CarDamage(CarDamageData),
    SessionHistory(SessionHistoryData),
    TyreSets(TyreSetsData),
    MotionEx(MotionExData),
    TimeTrial(TimeTrialData),
    LapPositions(LapPositionsData),
}

impl PacketVariant {
    pub fn kind(&self) -> PacketKind {
        match self {
            PacketVariant::Motion(_) => PacketKind::Motion,
            PacketVariant::Session(_) => PacketKind::Session,
            PacketVariant::LapData(_) => PacketKind::LapData,
            PacketVariant::Event(_) => PacketKind::Event,
            PacketVariant::Participants(_) => PacketKind::Participants,
            PacketVariant::CarSetups(_) => PacketKind::CarSetups,
            PacketVariant::CarTelemetry(_) => PacketKind::CarTelemetry,
            PacketVariant::CarStatus(_) => PacketKind::CarStatus,
            PacketVariant::FinalClassification(_) => PacketKind::FinalClassification,
            PacketVariant::LobbyInfo(_) => PacketKind::LobbyInfo,
            PacketVariant::CarDamage(_) => PacketKind::CarDamage,
            PacketVariant::SessionHistory(_) => PacketKind::SessionHistory,
            PacketVariant::TyreSets(_) => PacketKind::TyreSets,
            PacketVariant::MotionEx(_) => PacketKind::MotionEx,
            PacketVariant::TimeTrial(_) => PacketKind::TimeTrial,
            PacketVariant::LapPositions(_) => PacketKind::LapPositions,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarMotion {
    pub world_position: [f32; 3],
    pub world_velocity: [f32; 3],
    /// Normalised to +/-32767
    pub world_forward_dir: [i16; 3],
    pub world_right_dir: [i16; 3],
    pub g_force_lateral: f32,
    pub g_force_longitudinal: f32,
    pub g_force_vertical: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionData {
    pub cars: Vec<CarMotion>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct MarshalZone {
    /// Fraction (0..1) of the way through the lap the zone starts
    pub zone_start: f32,
    /// -1 invalid, 0 none, 1 green, 2 blue, 3 yellow
    pub zone_flag: i8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct WeatherForecastSample {
    pub session_type: u8,
    pub time_offset: u8,
    pub weather: u8,
    pub track_temperature: i8,
    pub track_temperature_change: i8,
    pub air_temperature: i8,
    pub air_temperature_change: i8,
    pub rain_percentage: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub weather: u8,
    pub track_temperature: i8,
    pub air_temperature: i8,
    pub total_laps: u8,
    /// Track length in metres
    pub track_length: u16,
    pub session_type: u8,
    /// -1 for unknown
    pub track_id: i8,
    pub formula: u8,
    pub session_time_left: u16,
    pub session_duration: u16,
    pub pit_speed_limit: u8,
    pub game_paused: bool,
    pub is_spectating: bool,
    pub spectator_car_index: u8,
    pub sli_pro_native_support: bool,
    pub marshal_zones: ArrayVec<[MarshalZone; 21]>,
    pub safety_car_status: u8,
    pub network_game: bool,
    pub weather_forecast: ArrayVec<[WeatherForecastSample; 64]>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarLapData {
    pub last_lap_time_ms: u32,
    pub current_lap_time_ms: u32,
    pub sector1_time_ms_part: u16,
    pub sector1_time_minutes_part: u8,
    pub sector2_time_ms_part: u16,
    pub sector2_time_minutes_part: u8,
    pub delta_to_car_in_front_ms_part: u16,
    pub delta_to_car_in_front_minutes_part: u8,
    pub delta_to_race_leader_ms_part: u16,
    pub delta_to_race_leader_minutes_part: u8,
    /// Distance around the current lap in metres, may be negative before the line is crossed
    pub lap_distance: f32,
    pub total_distance: f32,
    pub safety_car_delta: f32,
    pub car_position: u8,
    pub current_lap_num: u8,
    pub pit_status: u8,
    pub num_pit_stops: u8,
    /// 0 = sector 1, 1 = sector 2, 2 = sector 3
    pub sector: u8,
    pub current_lap_invalid: bool,
    pub penalties: u8,
    pub total_warnings: u8,
    pub corner_cutting_warnings: u8,
    pub num_unserved_drive_through_pens: u8,
    pub num_unserved_stop_go_pens: u8,
    pub grid_position: u8,
    pub driver_status: u8,
    pub result_status: u8,
    pub pit_lane_timer_active: bool,
    pub pit_lane_time_in_lane_ms: u16,
    pub pit_stop_timer_ms: u16,
    pub pit_stop_should_serve_pen: bool,
    pub speed_trap_fastest_speed: f32,
    pub speed_trap_fastest_lap: u8,
}

impl CarLapData {
    pub fn sector1_time_ms(&self) -> u32 {
        self.sector1_time_minutes_part as u32 * 60_000 + self.sector1_time_ms_part as u32
    }

    pub fn sector2_time_ms(&self) -> u32 {
        self.sector2_time_minutes_part as u32 * 60_000 + self.sector2_time_ms_part as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LapData {
    pub cars: Vec<CarLapData>,
    pub time_trial_pb_car_index: u8,
    pub time_trial_rival_car_index: u8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EventDetails {
    None,
    FastestLap {
        vehicle_index: u8,
        lap_time: f32,
    },
    Retirement {
        vehicle_index: u8,
        reason: u8,
    },
    /// Team mate in pits, race winner, drive through served
    Vehicle {
        vehicle_index: u8,
    },
    Penalty {
        penalty_type: u8,
        infringement_type: u8,
        vehicle_index: u8,
        other_vehicle_index: u8,
        time: u8,
        lap_num: u8,
        places_gained: u8,
    },
    SpeedTrap {
        vehicle_index: u8,
        speed: f32,
        is_overall_fastest_in_session: bool,
        is_driver_fastest_in_session: bool,
        fastest_vehicle_index_in_session: u8,
        fastest_speed_in_session: f32,
    },
    StartLights {
        num_lights: u8,
    },
    Flashback {
        frame_identifier: u32,
        session_time: f32,
    },
    Buttons {
        status: u32,
    },
    Overtake {
        overtaking_vehicle_index: u8,
        being_overtaken_vehicle_index: u8,
    },
    Collision {
        vehicle1_index: u8,
        vehicle2_index: u8,
    },
    /// Details for a code this crate does not interpret.
    Raw([u8; 12]),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EventData {
    pub code: EventCode,
    pub details: EventDetails,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct LiveryColour {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LiveryColours {
    pub num_colours: u8,
    pub colours: [LiveryColour; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub ai_controlled: bool,
    pub driver_id: u8,
    pub network_id: u8,
    pub team_id: u8,
    pub my_team: bool,
    pub race_number: u8,
    pub nationality: u8,
    pub name: String,
    pub your_telemetry: u8,
    pub show_online_names: bool,
    pub tech_level: u16,
    pub platform: u8,
    /// Only present from the 2025 format onwards
    pub livery: Option<LiveryColours>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantsData {
    pub num_active_cars: u8,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarSetup {
    pub front_wing: u8,
    pub rear_wing: u8,
    pub on_throttle: u8,
    pub off_throttle: u8,
    pub front_camber: f32,
    pub rear_camber: f32,
    pub front_toe: f32,
    pub rear_toe: f32,
    pub front_suspension: u8,
    pub rear_suspension: u8,
    pub front_anti_roll_bar: u8,
    pub rear_anti_roll_bar: u8,
    pub front_suspension_height: u8,
    pub rear_suspension_height: u8,
    pub brake_pressure: u8,
    pub brake_bias: u8,
    pub engine_braking: u8,
    pub rear_left_tyre_pressure: f32,
    pub rear_right_tyre_pressure: f32,
    pub front_left_tyre_pressure: f32,
    pub front_right_tyre_pressure: f32,
    pub ballast: u8,
    pub fuel_load: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarSetupsData {
    pub cars: Vec<CarSetup>,
    pub next_front_wing_value: f32,
}

/// Wheel arrays are ordered RL, RR, FL, FR.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarTelemetry {
    /// km/h
    pub speed: u16,
    pub throttle: f32,
    pub steer: f32,
    pub brake: f32,
    pub clutch: u8,
    /// -1 reverse, 0 neutral
    pub gear: i8,
    pub engine_rpm: u16,
    pub drs: bool,
    pub rev_lights_percent: u8,
    pub rev_lights_bit_value: u16,
    pub brakes_temperature: [u16; 4],
    pub tyres_surface_temperature: [u8; 4],
    pub tyres_inner_temperature: [u8; 4],
    pub engine_temperature: u16,
    pub tyres_pressure: [f32; 4],
    pub surface_type: [u8; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarTelemetryData {
    pub cars: Vec<CarTelemetry>,
    pub mfd_panel_index: u8,
    pub mfd_panel_index_secondary_player: u8,
    pub suggested_gear: i8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarStatus {
    pub traction_control: u8,
    pub anti_lock_brakes: bool,
    pub fuel_mix: u8,
    pub front_brake_bias: u8,
    pub pit_limiter_status: bool,
    pub fuel_in_tank: f32,
    pub fuel_capacity: f32,
    pub fuel_remaining_laps: f32,
    pub max_rpm: u16,
    pub idle_rpm: u16,
    pub max_gears: u8,
    pub drs_allowed: bool,
    pub drs_activation_distance: u16,
    pub actual_tyre_compound: u8,
    pub visual_tyre_compound: u8,
    pub tyres_age_laps: u8,
    pub vehicle_fia_flags: i8,
    pub engine_power_ice: f32,
    pub engine_power_mguk: f32,
    /// Joules
    pub ers_store_energy: f32,
    pub ers_deploy_mode: u8,
    pub ers_harvested_this_lap_mguk: f32,
    pub ers_harvested_this_lap_mguh: f32,
    pub ers_deployed_this_lap: f32,
    pub network_paused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarStatusData {
    pub cars: Vec<CarStatus>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FinalClassification {
    pub position: u8,
    pub num_laps: u8,
    pub grid_position: u8,
    pub points: u8,
    pub num_pit_stops: u8,
    pub result_status: u8,
    pub best_lap_time_ms: u32,
    /// Seconds, without penalties
    pub total_race_time: f64,
    pub penalties_time: u8,
    pub num_penalties: u8,
    pub num_tyre_stints: u8,
    pub tyre_stints_actual: [u8; 8],
    pub tyre_stints_visual: [u8; 8],
    pub tyre_stints_end_laps: [u8; 8],
    /// Only present from the 2025 format onwards
    pub result_reason: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalClassificationData {
    pub num_cars: u8,
    pub cars: Vec<FinalClassification>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyPlayer {
    pub ai_controlled: bool,
    pub team_id: u8,
    pub nationality: u8,
    pub platform: u8,
    pub name: String,
    pub car_number: u8,
    pub your_telemetry: u8,
    pub show_online_names: bool,
    pub tech_level: u16,
    pub ready_status: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyInfoData {
    pub num_players: u8,
    pub players: Vec<LobbyPlayer>,
}

/// Damage and wear levels are percentages. Wheel arrays are ordered RL, RR, FL, FR.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CarDamage {
    pub tyres_wear: [f32; 4],
    pub tyres_damage: [u8; 4],
    pub brakes_damage: [u8; 4],
    pub front_left_wing_damage: u8,
    pub front_right_wing_damage: u8,
    pub rear_wing_damage: u8,
    pub floor_damage: u8,
    pub diffuser_damage: u8,
    pub sidepod_damage: u8,
    pub drs_fault: bool,
    pub ers_fault: bool,
    pub gear_box_damage: u8,
    pub engine_damage: u8,
    pub engine_mguh_wear: u8,
    pub engine_es_wear: u8,
    pub engine_ce_wear: u8,
    pub engine_ice_wear: u8,
    pub engine_mguk_wear: u8,
    pub engine_tc_wear: u8,
    pub engine_blown: bool,
    pub engine_seized: bool,
    /// Only present from the 2025 format onwards
    pub tyre_blisters: Option<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarDamageData {
    pub cars: Vec<CarDamage>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct LapHistory {
    pub lap_time_ms: u32,
    pub sector1_time_ms_part: u16,
    pub sector1_time_minutes_part: u8,
    pub sector2_time_ms_part: u16,
    pub sector2_time_minutes_part: u8,
    pub sector3_time_ms_part: u16,
    pub sector3_time_minutes_part: u8,
    /// bit 0 lap valid, bit 1..3 sector 1..3 valid
    pub valid_flags: u8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct TyreStintHistory {
    pub end_lap: u8,
    pub tyre_actual_compound: u8,
    pub tyre_visual_compound: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionHistoryData {
    pub car_index: u8,
    pub num_laps: u8,
    pub num_tyre_stints: u8,
    pub best_lap_time_lap_num: u8,
    pub best_sector1_lap_num: u8,
    pub best_sector2_lap_num: u8,
    pub best_sector3_lap_num: u8,
    /// Only the first `num_laps` of the 100 slots are kept
    pub laps: Vec<LapHistory>,
    pub tyre_stints: ArrayVec<[TyreStintHistory; 8]>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TyreSet {
    pub actual_tyre_compound: u8,
    pub visual_tyre_compound: u8,
    pub wear: u8,
    pub available: bool,
    pub recommended_session: u8,
    pub life_span: u8,
    pub usable_life: u8,
    pub lap_delta_time_ms: i16,
    pub fitted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyreSetsData {
    pub car_index: u8,
    /// 13 dry and 7 wet sets
    pub sets: Vec<TyreSet>,
    pub fitted_index: u8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MotionExTail {
    pub chassis_pitch: f32,
    pub wheel_camber: [f32; 4],
    pub wheel_camber_gain: [f32; 4],
}

/// Extended motion data for the player car only. Wheel arrays are ordered RL, RR, FL, FR.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MotionExData {
    pub suspension_position: [f32; 4],
    pub suspension_velocity: [f32; 4],
    pub suspension_acceleration: [f32; 4],
    pub wheel_speed: [f32; 4],
    pub wheel_slip_ratio: [f32; 4],
    pub wheel_slip_angle: [f32; 4],
    pub wheel_lat_force: [f32; 4],
    pub wheel_long_force: [f32; 4],
    pub height_of_cog_above_ground: f32,
    pub local_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub angular_acceleration: [f32; 3],
    pub front_wheels_angle: f32,
    pub wheel_vert_force: [f32; 4],
    pub front_aero_height: f32,
    pub rear_aero_height: f32,
    pub front_roll_angle: f32,
    pub rear_roll_angle: f32,
    pub chassis_yaw: f32,
    /// Only present from the 2025 format onwards
    pub extended: Option<MotionExTail>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeTrialDataSet {
    pub car_index: u8,
    pub team_id: u8,
    pub lap_time_ms: u32,
    pub sector1_time_ms: u32,
    pub sector2_time_ms: u32,
    pub sector3_time_ms: u32,
    pub traction_control: u8,
    pub gearbox_assist: u8,
    pub anti_lock_brakes: u8,
    pub equal_car_performance: u8,
    pub custom_setup: u8,
    pub valid: bool,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeTrialData {
    pub player_session_best: TimeTrialDataSet,
    pub personal_best: TimeTrialDataSet,
    pub rival: TimeTrialDataSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LapPositionsData {
    pub num_laps: u8,
    pub lap_start: u8,
    /// Race position of every car at the start of each lap, the first `num_laps` of 50 slots
    pub positions: Vec<[u8; NUM_CARS]>,
}
