//! Scripted packet generation for tests, benchmarks and the `simulate` command.
//!
//! [`SyntheticRig`] plays the part of the game for one rig. Every car slot carries the same values,
//! which keeps fixtures readable and works whichever car index is being tracked.

use std::time::Duration;

use crate::protocol::f1_enum::EventCode;
use crate::protocol::inbound::*;
use crate::protocol::{PacketKind, ProtocolVersion, NUM_CARS};

/// Lap numbers are a single byte and the closing packet starts one more lap.
pub const MAX_SCRIPT_LAPS: usize = u8::MAX as usize - 1;

/// Values for one lap data sample of the tracked car.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LapSample {
    pub lap_num: u8,
    pub invalid: bool,
    pub last_lap_time_ms: u32,
    pub current_lap_time_ms: u32,
    pub lap_distance: f32,
    pub sector: u8,
    pub sector1_time_ms: u32,
    pub sector2_time_ms: u32,
    pub car_position: u8,
}

impl Default for LapSample {
    fn default() -> Self {
        LapSample {
            lap_num: 1,
            invalid: false,
            last_lap_time_ms: 0,
            current_lap_time_ms: 0,
            lap_distance: 0.0,
            sector: 0,
            sector1_time_ms: 0,
            sector2_time_ms: 0,
            car_position: 1,
        }
    }
}

/// One lap in a scripted run.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LapPlan {
    pub lap_time_ms: u32,
    pub invalid: bool,
}

/// A packet and when it should be sent, relative to the start of the script.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedPacket {
    pub offset: Duration,
    pub packet: Packet,
}

#[derive(Debug, Clone)]
pub struct SyntheticRig {
    format: ProtocolVersion,
    session_uid: u64,
    player_car_index: u8,
    track_id: i8,
    track_length: u16,
    visual_compound: u8,
    frame: u32,
    session_time: f32,
}

impl SyntheticRig {
    pub fn new(format: ProtocolVersion, session_uid: u64) -> SyntheticRig {
        SyntheticRig {
            format,
            session_uid,
            player_car_index: 0,
            track_id: 11,
            track_length: 5793,
            visual_compound: 16,
            frame: 0,
            session_time: 0.0,
        }
    }

    pub fn with_track(mut self, track_id: i8, track_length: u16) -> SyntheticRig {
        self.track_id = track_id;
        self.track_length = track_length;
        self
    }

    pub fn with_player_car_index(mut self, index: u8) -> SyntheticRig {
        self.player_car_index = index;
        self
    }

    pub fn with_compound(mut self, visual_compound: u8) -> SyntheticRig {
        self.visual_compound = visual_compound;
        self
    }

    pub fn set_session_uid(&mut self, session_uid: u64) {
        self.session_uid = session_uid;
    }

    pub fn track_length(&self) -> u16 {
        self.track_length
    }

    fn header(&mut self, kind: PacketKind) -> PacketHeader {
        self.frame += 1;
        PacketHeader {
            format: self.format,
            game_year: (self.format.wire() % 100) as u8,
            game_major_version: 1,
            game_minor_version: 0,
            packet_version: 1,
            kind,
            session_uid: self.session_uid,
            session_time: self.session_time,
            frame_identifier: self.frame,
            overall_frame_identifier: self.frame,
            player_car_index: self.player_car_index,
            secondary_player_car_index: 255,
        }
    }

    fn packet(&mut self, data: PacketVariant) -> Packet {
        Packet {
            header: self.header(data.kind()),
            data,
        }
    }

    pub fn session(&mut self) -> Packet {
        self.packet(PacketVariant::Session(SessionData {
            weather: 0,
            track_temperature: 33,
            air_temperature: 24,
            total_laps: 5,
            track_length: self.track_length,
            session_type: 18,
            track_id: self.track_id,
            formula: 0,
            session_time_left: 3600,
            session_duration: 3600,
            pit_speed_limit: 80,
            game_paused: false,
            is_spectating: self.player_car_index == 255,
            spectator_car_index: 255,
            sli_pro_native_support: false,
            marshal_zones: Default::default(),
            safety_car_status: 0,
            network_game: false,
            weather_forecast: Default::default(),
        }))
    }

    pub fn lap_data(&mut self, sample: LapSample) -> Packet {
        let car = CarLapData {
            last_lap_time_ms: sample.last_lap_time_ms,
            current_lap_time_ms: sample.current_lap_time_ms,
            sector1_time_ms_part: (sample.sector1_time_ms % 60_000) as u16,
            sector1_time_minutes_part: (sample.sector1_time_ms / 60_000) as u8,
            sector2_time_ms_part: (sample.sector2_time_ms % 60_000) as u16,
            sector2_time_minutes_part: (sample.sector2_time_ms / 60_000) as u8,
            delta_to_car_in_front_ms_part: 0,
            delta_to_car_in_front_minutes_part: 0,
            delta_to_race_leader_ms_part: 0,
            delta_to_race_leader_minutes_part: 0,
            lap_distance: sample.lap_distance,
            total_distance: sample.lap_distance
                + sample.lap_num.saturating_sub(1) as f32 * self.track_length as f32,
            safety_car_delta: 0.0,
            car_position: sample.car_position,
            current_lap_num: sample.lap_num,
            pit_status: 0,
            num_pit_stops: 0,
            sector: sample.sector,
            current_lap_invalid: sample.invalid,
            penalties: 0,
            total_warnings: 0,
            corner_cutting_warnings: 0,
            num_unserved_drive_through_pens: 0,
            num_unserved_stop_go_pens: 0,
            grid_position: sample.car_position,
            driver_status: 1,
            result_status: 2,
            pit_lane_timer_active: false,
            pit_lane_time_in_lane_ms: 0,
            pit_stop_timer_ms: 0,
            pit_stop_should_serve_pen: false,
            speed_trap_fastest_speed: 0.0,
            speed_trap_fastest_lap: 255,
        };
        self.packet(PacketVariant::LapData(LapData {
            cars: vec![car; NUM_CARS],
            time_trial_pb_car_index: 255,
            time_trial_rival_car_index: 255,
        }))
    }

    pub fn car_telemetry(&mut self, speed_kph: u16, gear: i8) -> Packet {
        let car = CarTelemetry {
            speed: speed_kph,
            throttle: if speed_kph > 0 { 1.0 } else { 0.0 },
            steer: 0.0,
            brake: 0.0,
            clutch: 0,
            gear,
            engine_rpm: 10_500,
            drs: false,
            rev_lights_percent: 60,
            rev_lights_bit_value: 0,
            brakes_temperature: [450; 4],
            tyres_surface_temperature: [92; 4],
            tyres_inner_temperature: [98; 4],
            engine_temperature: 105,
            tyres_pressure: [22.5; 4],
            surface_type: [0; 4],
        };
        self.packet(PacketVariant::CarTelemetry(CarTelemetryData {
            cars: vec![car; NUM_CARS],
            mfd_panel_index: 255,
            mfd_panel_index_secondary_player: 255,
            suggested_gear: 0,
        }))
    }

    pub fn car_status(&mut self) -> Packet {
        let car = CarStatus {
            traction_control: 0,
            anti_lock_brakes: false,
            fuel_mix: 1,
            front_brake_bias: 56,
            pit_limiter_status: false,
            fuel_in_tank: 20.0,
            fuel_capacity: 110.0,
            fuel_remaining_laps: 4.5,
            max_rpm: 13_000,
            idle_rpm: 4_000,
            max_gears: 8,
            drs_allowed: false,
            drs_activation_distance: 0,
            actual_tyre_compound: 18,
            visual_tyre_compound: self.visual_compound,
            tyres_age_laps: 2,
            vehicle_fia_flags: 0,
            engine_power_ice: 0.0,
            engine_power_mguk: 0.0,
            ers_store_energy: 4_000_000.0,
            ers_deploy_mode: 1,
            ers_harvested_this_lap_mguk: 0.0,
            ers_harvested_this_lap_mguh: 0.0,
            ers_deployed_this_lap: 0.0,
            network_paused: false,
        };
        self.packet(PacketVariant::CarStatus(CarStatusData {
            cars: vec![car; NUM_CARS],
        }))
    }

    pub fn car_damage(&mut self) -> Packet {
        let blisters = match self.format {
            ProtocolVersion::F1_24 => None,
            ProtocolVersion::F1_25 => Some([3, 3, 1, 1]),
        };
        let car = CarDamage {
            tyres_wear: [8.5, 8.0, 6.5, 6.0],
            tyres_damage: [0; 4],
            brakes_damage: [0; 4],
            front_left_wing_damage: 0,
            front_right_wing_damage: 0,
            rear_wing_damage: 0,
            floor_damage: 0,
            diffuser_damage: 0,
            sidepod_damage: 0,
            drs_fault: false,
            ers_fault: false,
            gear_box_damage: 4,
            engine_damage: 3,
            engine_mguh_wear: 5,
            engine_es_wear: 5,
            engine_ce_wear: 5,
            engine_ice_wear: 5,
            engine_mguk_wear: 5,
            engine_tc_wear: 5,
            engine_blown: false,
            engine_seized: false,
            tyre_blisters: blisters,
        };
        self.packet(PacketVariant::CarDamage(CarDamageData {
            cars: vec![car; NUM_CARS],
        }))
    }

    pub fn event(&mut self, code: EventCode) -> Packet {
        self.packet(PacketVariant::Event(EventData {
            code,
            details: EventDetails::None,
        }))
    }

    /// A full run: session start, then `samples_per_lap` lap, telemetry and status packets per lap,
    /// spaced `interval` apart. The script ends just after the last lap is completed.
    ///
    /// At most [`MAX_SCRIPT_LAPS`] laps are scripted.
    pub fn script(
        &mut self,
        laps: &[LapPlan],
        samples_per_lap: usize,
        interval: Duration,
    ) -> Vec<TimedPacket> {
        let samples_per_lap = samples_per_lap.max(1);
        let laps = &laps[..laps.len().min(MAX_SCRIPT_LAPS)];
        let mut offset = Duration::from_secs(0);
        let mut out = vec![];

        self.session_time = 0.0;
        for packet in vec![
            self.session(),
            self.event(EventCode::SESSION_STARTED),
            self.car_status(),
        ] {
            out.push(TimedPacket { offset, packet });
        }

        let mut last_lap_time_ms = 0;
        for (index, plan) in laps.iter().enumerate() {
            let lap_num = index as u8 + 1;
            for sample in 0..samples_per_lap {
                offset += interval;
                self.session_time = offset.as_secs_f32();
                let progress = sample as f32 / samples_per_lap as f32;
                let sector = (progress * 3.0) as u8;
                let lap = self.lap_data(LapSample {
                    lap_num,
                    invalid: plan.invalid && sample + 1 == samples_per_lap,
                    last_lap_time_ms,
                    current_lap_time_ms: (plan.lap_time_ms as f32 * progress) as u32,
                    lap_distance: progress * self.track_length as f32,
                    sector,
                    sector1_time_ms: if sector >= 1 { plan.lap_time_ms / 3 } else { 0 },
                    sector2_time_ms: if sector >= 2 { plan.lap_time_ms / 3 } else { 0 },
                    car_position: 1,
                });
                let speed = 180 + (progress * 140.0) as u16;
                let telemetry = self.car_telemetry(speed, 5 + sector as i8);
                out.push(TimedPacket {
                    offset,
                    packet: lap,
                });
                out.push(TimedPacket {
                    offset,
                    packet: telemetry,
                });
            }
            last_lap_time_ms = plan.lap_time_ms;
        }

        // Crossing the line after the final lap closes it
        offset += interval;
        self.session_time = offset.as_secs_f32();
        let closing = self.lap_data(LapSample {
            lap_num: laps.len() as u8 + 1,
            last_lap_time_ms,
            car_position: 1,
            ..LapSample::default()
        });
        out.push(TimedPacket {
            offset,
            packet: closing,
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[test]
    fn generated_packets_decode() {
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 99).with_player_car_index(4);
        for packet in [
            rig.session(),
            rig.lap_data(LapSample::default()),
            rig.car_telemetry(300, 8),
            rig.car_status(),
            rig.car_damage(),
            rig.event(EventCode::CHEQUERED_FLAG),
        ]
        .iter()
        {
            let bytes = packet.to_bytes().unwrap();
            assert_eq!(decode(&bytes).as_ref(), Ok(packet));
        }
    }

    #[test]
    fn frames_and_uid_advance() {
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 1);
        let first = rig.session();
        rig.set_session_uid(2);
        let second = rig.session();
        assert_eq!(second.header.frame_identifier, first.header.frame_identifier + 1);
        assert_eq!(second.header.session_uid, 2);
    }

    #[test]
    fn script_closes_every_lap() {
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 1);
        let laps = [
            LapPlan {
                lap_time_ms: 90_000,
                invalid: false,
            },
            LapPlan {
                lap_time_ms: 91_000,
                invalid: true,
            },
        ];
        let script = rig.script(&laps, 10, Duration::from_millis(100));

        assert_eq!(script.len(), 3 + 2 * 10 * 2 + 1);
        assert!(script.windows(2).all(|w| w[0].offset <= w[1].offset));
        match &script.last().map(|p| &p.packet.data) {
            Some(PacketVariant::LapData(data)) => {
                assert_eq!(data.cars[0].current_lap_num, 3);
                assert_eq!(data.cars[0].last_lap_time_ms, 91_000);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn long_scripts_stop_at_the_last_lap_number() {
        let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 1);
        let laps = vec![
            LapPlan {
                lap_time_ms: 60_000,
                invalid: false,
            };
            300
        ];
        let script = rig.script(&laps, 1, Duration::from_millis(10));

        assert_eq!(script.len(), 3 + MAX_SCRIPT_LAPS * 2 + 1);
        match &script.last().map(|p| &p.packet.data) {
            Some(PacketVariant::LapData(data)) => assert_eq!(data.cars[0].current_lap_num, u8::MAX),
            other => panic!("Unexpected packet {:?}", other),
        }
    }
}
