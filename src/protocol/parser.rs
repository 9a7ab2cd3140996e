use nom::bytes::complete::take;
use nom::combinator::{cond, map};
use nom::error::context;
use nom::multi::count;
use nom::number::complete::{le_f32, le_f64, le_i16, le_i8, le_u16, le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;
use nom_supreme::error::ErrorTree;
use nom_supreme::final_parser::{final_parser, ByteOffset};
use tinyvec::ArrayVec;

use crate::protocol::f1_enum::EventCode;
use crate::protocol::inbound::*;
use crate::protocol::registry::{
    Layout, MAX_HISTORY_LAPS, MAX_LAP_POSITIONS, MAX_TYRE_STINTS, NUM_FORECAST_SAMPLES,
    NUM_MARSHAL_ZONES, NUM_TYRE_SETS, SESSION_SETTINGS_WIDTH,
};
use crate::protocol::{DecodeError, NUM_CARS};

pub(crate) type Res<T, U> = IResult<T, U, ErrorTree<T>>;

pub(crate) fn header(input: &[u8]) -> Res<&[u8], RawHeader> {
    context(
        "header",
        tuple((
            le_u16, le_u8, le_u8, le_u8, le_u8, le_u8, le_u64, le_f32, le_u32, le_u32, le_u8,
            le_u8,
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            RawHeader {
                packet_format: res.0,
                game_year: res.1,
                game_major_version: res.2,
                game_minor_version: res.3,
                packet_version: res.4,
                packet_id: res.5,
                session_uid: res.6,
                session_time: res.7,
                frame_identifier: res.8,
                overall_frame_identifier: res.9,
                player_car_index: res.10,
                secondary_player_car_index: res.11,
            },
        )
    })
}

/// Parse a body which has already been cut to exactly `layout.body_size()` bytes.
pub(crate) fn body(layout: &Layout, input: &[u8]) -> Result<PacketVariant, DecodeError> {
    final_parser(|i| layout.parse_body(i))(input).map_err(|e: ErrorTree<ByteOffset>| {
        DecodeError::Malformed {
            kind: layout.kind,
            detail: format!("{:?}", e),
        }
    })
}

fn boolean(input: &[u8]) -> Res<&[u8], bool> {
    context("boolean", map(le_u8, |i: u8| i != 0))(input)
}

fn f32x3(input: &[u8]) -> Res<&[u8], [f32; 3]> {
    map(tuple((le_f32, le_f32, le_f32)), |(a, b, c)| [a, b, c])(input)
}

fn f32x4(input: &[u8]) -> Res<&[u8], [f32; 4]> {
    map(tuple((le_f32, le_f32, le_f32, le_f32)), |(a, b, c, d)| {
        [a, b, c, d]
    })(input)
}

fn i16x3(input: &[u8]) -> Res<&[u8], [i16; 3]> {
    map(tuple((le_i16, le_i16, le_i16)), |(a, b, c)| [a, b, c])(input)
}

fn u16x4(input: &[u8]) -> Res<&[u8], [u16; 4]> {
    map(tuple((le_u16, le_u16, le_u16, le_u16)), |(a, b, c, d)| {
        [a, b, c, d]
    })(input)
}

fn u8x4(input: &[u8]) -> Res<&[u8], [u8; 4]> {
    map(tuple((le_u8, le_u8, le_u8, le_u8)), |(a, b, c, d)| [a, b, c, d])(input)
}

fn u8x8(input: &[u8]) -> Res<&[u8], [u8; 8]> {
    context("u8x8", map(take(8usize), |b: &[u8]| {
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        out
    }))(input)
}

// Names are null terminated UTF-8 in a fixed width field, the width depends on the format
fn fixed_string(width: usize, input: &[u8]) -> Res<&[u8], String> {
    context(
        "fixed_string",
        map(take(width), |raw: &[u8]| {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }),
    )(input)
}

// A count byte followed by a fixed number of slots, of which only `count` are meaningful
fn bounded_slots<'a, O, A, F>(
    slots: usize,
    used: usize,
    mut item: F,
) -> impl FnMut(&'a [u8]) -> Res<&'a [u8], ArrayVec<A>>
where
    A: tinyvec::Array<Item = O>,
    F: FnMut(&'a [u8]) -> Res<&'a [u8], O>,
{
    move |mut input: &'a [u8]| {
        let mut out = ArrayVec::new();
        for slot in 0..slots {
            let (next_input, value) = item(input)?;
            if slot < used && out.len() < out.capacity() {
                out.push(value);
            }
            input = next_input;
        }
        Ok((input, out))
    }
}

fn per_car<'a, O, F>(layout: &Layout, item: F) -> impl FnMut(&'a [u8]) -> Res<&'a [u8], Vec<O>>
where
    F: FnMut(&'a [u8]) -> Res<&'a [u8], O>,
{
    count(item, layout.entry.map_or(NUM_CARS, |e| e.count))
}

fn car_motion(input: &[u8]) -> Res<&[u8], CarMotion> {
    context(
        "car_motion",
        tuple((
            f32x3, f32x3, i16x3, i16x3, le_f32, le_f32, le_f32, le_f32, le_f32, le_f32,
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            CarMotion {
                world_position: res.0,
                world_velocity: res.1,
                world_forward_dir: res.2,
                world_right_dir: res.3,
                g_force_lateral: res.4,
                g_force_longitudinal: res.5,
                g_force_vertical: res.6,
                yaw: res.7,
                pitch: res.8,
                roll: res.9,
            },
        )
    })
}

pub(crate) fn motion<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "motion",
        map(per_car(layout, car_motion), |cars| {
            PacketVariant::Motion(MotionData { cars })
        }),
    )(input)
}

fn marshal_zone(input: &[u8]) -> Res<&[u8], MarshalZone> {
    map(tuple((le_f32, le_i8)), |(zone_start, zone_flag)| MarshalZone {
        zone_start,
        zone_flag,
    })(input)
}

fn forecast_sample(input: &[u8]) -> Res<&[u8], WeatherForecastSample> {
    map(
        tuple((le_u8, le_u8, le_u8, le_i8, le_i8, le_i8, le_i8, le_u8)),
        |res| WeatherForecastSample {
            session_type: res.0,
            time_offset: res.1,
            weather: res.2,
            track_temperature: res.3,
            track_temperature_change: res.4,
            air_temperature: res.5,
            air_temperature_change: res.6,
            rain_percentage: res.7,
        },
    )(input)
}

pub(crate) fn session<'a>(_layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    let (input, res) = context(
        "session",
        tuple((
            le_u8, le_i8, le_i8, le_u8, le_u16, le_u8, le_i8, le_u8, le_u16, le_u16, le_u8,
            boolean, boolean, le_u8, boolean, le_u8,
        )),
    )(input)?;
    let num_marshal_zones = res.15 as usize;
    let (input, marshal_zones) = context(
        "marshal_zones",
        bounded_slots(NUM_MARSHAL_ZONES, num_marshal_zones, marshal_zone),
    )(input)?;
    let (input, (safety_car_status, network_game, num_samples)) =
        tuple((le_u8, boolean, le_u8))(input)?;
    let (input, weather_forecast) = context(
        "weather_forecast",
        bounded_slots(NUM_FORECAST_SAMPLES, num_samples as usize, forecast_sample),
    )(input)?;
    let (input, _settings) = take(SESSION_SETTINGS_WIDTH)(input)?;

    Ok((
        input,
        PacketVariant::Session(SessionData {
            weather: res.0,
            track_temperature: res.1,
            air_temperature: res.2,
            total_laps: res.3,
            track_length: res.4,
            session_type: res.5,
            track_id: res.6,
            formula: res.7,
            session_time_left: res.8,
            session_duration: res.9,
            pit_speed_limit: res.10,
            game_paused: res.11,
            is_spectating: res.12,
            spectator_car_index: res.13,
            sli_pro_native_support: res.14,
            marshal_zones,
            safety_car_status,
            network_game,
            weather_forecast,
        }),
    ))
}

fn car_lap_data(input: &[u8]) -> Res<&[u8], CarLapData> {
    context(
        "car_lap_data",
        tuple((
            tuple((
                le_u32, le_u32, le_u16, le_u8, le_u16, le_u8, le_u16, le_u8, le_u16, le_u8,
                le_f32, le_f32, le_f32,
            )),
            tuple((
                le_u8, le_u8, le_u8, le_u8, le_u8, boolean, le_u8, le_u8, le_u8, le_u8, le_u8,
                le_u8, le_u8, le_u8, boolean, le_u16, le_u16, boolean, le_f32, le_u8,
            )),
        )),
    )(input)
    .map(|(next_input, (timing, state))| {
        (
            next_input,
            CarLapData {
                last_lap_time_ms: timing.0,
                current_lap_time_ms: timing.1,
                sector1_time_ms_part: timing.2,
                sector1_time_minutes_part: timing.3,
                sector2_time_ms_part: timing.4,
                sector2_time_minutes_part: timing.5,
                delta_to_car_in_front_ms_part: timing.6,
                delta_to_car_in_front_minutes_part: timing.7,
                delta_to_race_leader_ms_part: timing.8,
                delta_to_race_leader_minutes_part: timing.9,
                lap_distance: timing.10,
                total_distance: timing.11,
                safety_car_delta: timing.12,
                car_position: state.0,
                current_lap_num: state.1,
                pit_status: state.2,
                num_pit_stops: state.3,
                sector: state.4,
                current_lap_invalid: state.5,
                penalties: state.6,
                total_warnings: state.7,
                corner_cutting_warnings: state.8,
                num_unserved_drive_through_pens: state.9,
                num_unserved_stop_go_pens: state.10,
                grid_position: state.11,
                driver_status: state.12,
                result_status: state.13,
                pit_lane_timer_active: state.14,
                pit_lane_time_in_lane_ms: state.15,
                pit_stop_timer_ms: state.16,
                pit_stop_should_serve_pen: state.17,
                speed_trap_fastest_speed: state.18,
                speed_trap_fastest_lap: state.19,
            },
        )
    })
}

pub(crate) fn lap_data<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "lap_data",
        tuple((per_car(layout, car_lap_data), le_u8, le_u8)),
    )(input)
    .map(|(next_input, (cars, pb, rival))| {
        (
            next_input,
            PacketVariant::LapData(LapData {
                cars,
                time_trial_pb_car_index: pb,
                time_trial_rival_car_index: rival,
            }),
        )
    })
}

fn event_details(code: EventCode, input: &[u8]) -> Res<&[u8], EventDetails> {
    let (rest, details) = match code {
        EventCode::FASTEST_LAP => map(tuple((le_u8, le_f32)), |(vehicle_index, lap_time)| {
            EventDetails::FastestLap {
                vehicle_index,
                lap_time,
            }
        })(input)?,
        EventCode::RETIREMENT => map(tuple((le_u8, le_u8)), |(vehicle_index, reason)| {
            EventDetails::Retirement {
                vehicle_index,
                reason,
            }
        })(input)?,
        EventCode::TEAM_MATE_IN_PITS
        | EventCode::RACE_WINNER
        | EventCode::DRIVE_THROUGH_SERVED => map(le_u8, |vehicle_index| {
            EventDetails::Vehicle { vehicle_index }
        })(input)?,
        EventCode::PENALTY => map(
            tuple((le_u8, le_u8, le_u8, le_u8, le_u8, le_u8, le_u8)),
            |res| EventDetails::Penalty {
                penalty_type: res.0,
                infringement_type: res.1,
                vehicle_index: res.2,
                other_vehicle_index: res.3,
                time: res.4,
                lap_num: res.5,
                places_gained: res.6,
            },
        )(input)?,
        EventCode::SPEED_TRAP => map(
            tuple((le_u8, le_f32, boolean, boolean, le_u8, le_f32)),
            |res| EventDetails::SpeedTrap {
                vehicle_index: res.0,
                speed: res.1,
                is_overall_fastest_in_session: res.2,
                is_driver_fastest_in_session: res.3,
                fastest_vehicle_index_in_session: res.4,
                fastest_speed_in_session: res.5,
            },
        )(input)?,
        EventCode::START_LIGHTS => map(le_u8, |num_lights| EventDetails::StartLights {
            num_lights,
        })(input)?,
        EventCode::FLASHBACK => map(tuple((le_u32, le_f32)), |(frame_identifier, session_time)| {
            EventDetails::Flashback {
                frame_identifier,
                session_time,
            }
        })(input)?,
        EventCode::BUTTONS => map(le_u32, |status| EventDetails::Buttons { status })(input)?,
        EventCode::OVERTAKE => map(tuple((le_u8, le_u8)), |(overtaking, overtaken)| {
            EventDetails::Overtake {
                overtaking_vehicle_index: overtaking,
                being_overtaken_vehicle_index: overtaken,
            }
        })(input)?,
        EventCode::COLLISION => map(tuple((le_u8, le_u8)), |(vehicle1, vehicle2)| {
            EventDetails::Collision {
                vehicle1_index: vehicle1,
                vehicle2_index: vehicle2,
            }
        })(input)?,
        EventCode::SESSION_STARTED
        | EventCode::SESSION_ENDED
        | EventCode::DRS_ENABLED
        | EventCode::DRS_DISABLED
        | EventCode::CHEQUERED_FLAG
        | EventCode::LIGHTS_OUT
        | EventCode::RED_FLAG => (input, EventDetails::None),
        _ => map(take(12usize), |raw: &[u8]| {
            let mut bytes = [0u8; 12];
            bytes.copy_from_slice(raw);
            EventDetails::Raw(bytes)
        })(input)?,
    };
    // The details union is always 12 bytes wide, skip whatever the variant didn't use
    let used = input.len() - rest.len();
    let (rest, _) = take(12 - used)(rest)?;
    Ok((rest, details))
}

pub(crate) fn event<'a>(_layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    let (input, code) = context(
        "event_code",
        map(take(4usize), |raw: &[u8]| {
            let mut code = [0u8; 4];
            code.copy_from_slice(raw);
            EventCode(code)
        }),
    )(input)?;
    let (input, details) = context("event_details", |i| event_details(code, i))(input)?;
    Ok((input, PacketVariant::Event(EventData { code, details })))
}

fn livery_colours(input: &[u8]) -> Res<&[u8], LiveryColours> {
    let colour = |i| {
        map(tuple((le_u8, le_u8, le_u8)), |(red, green, blue)| {
            LiveryColour { red, green, blue }
        })(i)
    };
    context(
        "livery_colours",
        map(
            tuple((le_u8, colour, colour, colour, colour)),
            |(num_colours, a, b, c, d)| LiveryColours {
                num_colours,
                colours: [a, b, c, d],
            },
        ),
    )(input)
}

fn participant<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], Participant> {
    let name_width = layout.width_of("name");
    context(
        "participant",
        tuple((
            boolean,
            le_u8,
            le_u8,
            le_u8,
            boolean,
            le_u8,
            le_u8,
            move |i| fixed_string(name_width, i),
            le_u8,
            boolean,
            le_u16,
            le_u8,
            cond(layout.entry_has_tail(), livery_colours),
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            Participant {
                ai_controlled: res.0,
                driver_id: res.1,
                network_id: res.2,
                team_id: res.3,
                my_team: res.4,
                race_number: res.5,
                nationality: res.6,
                name: res.7,
                your_telemetry: res.8,
                show_online_names: res.9,
                tech_level: res.10,
                platform: res.11,
                livery: res.12,
            },
        )
    })
}

pub(crate) fn participants<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "participants",
        tuple((le_u8, per_car(layout, |i| participant(layout, i)))),
    )(input)
    .map(|(next_input, (num_active_cars, participants))| {
        (
            next_input,
            PacketVariant::Participants(ParticipantsData {
                num_active_cars,
                participants,
            }),
        )
    })
}

fn car_setup(input: &[u8]) -> Res<&[u8], CarSetup> {
    context(
        "car_setup",
        tuple((
            le_u8, le_u8, le_u8, le_u8, le_f32, le_f32, le_f32, le_f32, le_u8, le_u8, le_u8,
            le_u8, le_u8, le_u8, le_u8, le_u8, le_u8, f32x4, le_u8, le_f32,
        )),
    )(input)
    .map(|(next_input, res)| {
        let [rear_left, rear_right, front_left, front_right] = res.17;
        (
            next_input,
            CarSetup {
                front_wing: res.0,
                rear_wing: res.1,
                on_throttle: res.2,
                off_throttle: res.3,
                front_camber: res.4,
                rear_camber: res.5,
                front_toe: res.6,
                rear_toe: res.7,
                front_suspension: res.8,
                rear_suspension: res.9,
                front_anti_roll_bar: res.10,
                rear_anti_roll_bar: res.11,
                front_suspension_height: res.12,
                rear_suspension_height: res.13,
                brake_pressure: res.14,
                brake_bias: res.15,
                engine_braking: res.16,
                rear_left_tyre_pressure: rear_left,
                rear_right_tyre_pressure: rear_right,
                front_left_tyre_pressure: front_left,
                front_right_tyre_pressure: front_right,
                ballast: res.18,
                fuel_load: res.19,
            },
        )
    })
}

pub(crate) fn car_setups<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context("car_setups", tuple((per_car(layout, car_setup), le_f32)))(input).map(
        |(next_input, (cars, next_front_wing_value))| {
            (
                next_input,
                PacketVariant::CarSetups(CarSetupsData {
                    cars,
                    next_front_wing_value,
                }),
            )
        },
    )
}

fn car_telemetry(input: &[u8]) -> Res<&[u8], CarTelemetry> {
    context(
        "car_telemetry",
        tuple((
            le_u16, le_f32, le_f32, le_f32, le_u8, le_i8, le_u16, boolean, le_u8, le_u16, u16x4,
            u8x4, u8x4, le_u16, f32x4, u8x4,
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            CarTelemetry {
                speed: res.0,
                throttle: res.1,
                steer: res.2,
                brake: res.3,
                clutch: res.4,
                gear: res.5,
                engine_rpm: res.6,
                drs: res.7,
                rev_lights_percent: res.8,
                rev_lights_bit_value: res.9,
                brakes_temperature: res.10,
                tyres_surface_temperature: res.11,
                tyres_inner_temperature: res.12,
                engine_temperature: res.13,
                tyres_pressure: res.14,
                surface_type: res.15,
            },
        )
    })
}

pub(crate) fn car_telemetry_packet<'a>(
    layout: &Layout,
    input: &'a [u8],
) -> Res<&'a [u8], PacketVariant> {
    context(
        "car_telemetry_packet",
        tuple((per_car(layout, car_telemetry), le_u8, le_u8, le_i8)),
    )(input)
    .map(|(next_input, (cars, mfd, mfd_secondary, suggested_gear))| {
        (
            next_input,
            PacketVariant::CarTelemetry(CarTelemetryData {
                cars,
                mfd_panel_index: mfd,
                mfd_panel_index_secondary_player: mfd_secondary,
                suggested_gear,
            }),
        )
    })
}

fn car_status_entry(input: &[u8]) -> Res<&[u8], CarStatus> {
    context(
        "car_status",
        tuple((
            tuple((
                le_u8, boolean, le_u8, le_u8, boolean, le_f32, le_f32, le_f32, le_u16, le_u16,
                le_u8, boolean, le_u16,
            )),
            tuple((
                le_u8, le_u8, le_u8, le_i8, le_f32, le_f32, le_f32, le_u8, le_f32, le_f32,
                le_f32, boolean,
            )),
        )),
    )(input)
    .map(|(next_input, (a, b))| {
        (
            next_input,
            CarStatus {
                traction_control: a.0,
                anti_lock_brakes: a.1,
                fuel_mix: a.2,
                front_brake_bias: a.3,
                pit_limiter_status: a.4,
                fuel_in_tank: a.5,
                fuel_capacity: a.6,
                fuel_remaining_laps: a.7,
                max_rpm: a.8,
                idle_rpm: a.9,
                max_gears: a.10,
                drs_allowed: a.11,
                drs_activation_distance: a.12,
                actual_tyre_compound: b.0,
                visual_tyre_compound: b.1,
                tyres_age_laps: b.2,
                vehicle_fia_flags: b.3,
                engine_power_ice: b.4,
                engine_power_mguk: b.5,
                ers_store_energy: b.6,
                ers_deploy_mode: b.7,
                ers_harvested_this_lap_mguk: b.8,
                ers_harvested_this_lap_mguh: b.9,
                ers_deployed_this_lap: b.10,
                network_paused: b.11,
            },
        )
    })
}

pub(crate) fn car_status<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "car_status_packet",
        map(per_car(layout, car_status_entry), |cars| {
            PacketVariant::CarStatus(CarStatusData { cars })
        }),
    )(input)
}

fn classification<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], FinalClassification> {
    context(
        "final_classification",
        tuple((
            le_u8,
            le_u8,
            le_u8,
            le_u8,
            le_u8,
            le_u8,
            le_u32,
            le_f64,
            le_u8,
            le_u8,
            le_u8,
            u8x8,
            u8x8,
            u8x8,
            cond(layout.entry_has_tail(), le_u8),
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            FinalClassification {
                position: res.0,
                num_laps: res.1,
                grid_position: res.2,
                points: res.3,
                num_pit_stops: res.4,
                result_status: res.5,
                best_lap_time_ms: res.6,
                total_race_time: res.7,
                penalties_time: res.8,
                num_penalties: res.9,
                num_tyre_stints: res.10,
                tyre_stints_actual: res.11,
                tyre_stints_visual: res.12,
                tyre_stints_end_laps: res.13,
                result_reason: res.14,
            },
        )
    })
}

pub(crate) fn final_classification<'a>(
    layout: &Layout,
    input: &'a [u8],
) -> Res<&'a [u8], PacketVariant> {
    context(
        "final_classification_packet",
        tuple((le_u8, per_car(layout, |i| classification(layout, i)))),
    )(input)
    .map(|(next_input, (num_cars, cars))| {
        (
            next_input,
            PacketVariant::FinalClassification(FinalClassificationData { num_cars, cars }),
        )
    })
}

fn lobby_player<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], LobbyPlayer> {
    let name_width = layout.width_of("name");
    context(
        "lobby_player",
        tuple((
            boolean,
            le_u8,
            le_u8,
            le_u8,
            move |i| fixed_string(name_width, i),
            le_u8,
            le_u8,
            boolean,
            le_u16,
            le_u8,
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            LobbyPlayer {
                ai_controlled: res.0,
                team_id: res.1,
                nationality: res.2,
                platform: res.3,
                name: res.4,
                car_number: res.5,
                your_telemetry: res.6,
                show_online_names: res.7,
                tech_level: res.8,
                ready_status: res.9,
            },
        )
    })
}

pub(crate) fn lobby_info<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "lobby_info",
        tuple((le_u8, per_car(layout, |i| lobby_player(layout, i)))),
    )(input)
    .map(|(next_input, (num_players, players))| {
        (
            next_input,
            PacketVariant::LobbyInfo(LobbyInfoData {
                num_players,
                players,
            }),
        )
    })
}

fn car_damage_entry<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], CarDamage> {
    context(
        "car_damage",
        tuple((
            f32x4,
            u8x4,
            u8x4,
            tuple((
                le_u8, le_u8, le_u8, le_u8, le_u8, le_u8, boolean, boolean, le_u8, le_u8, le_u8,
                le_u8, le_u8, le_u8, le_u8, le_u8, boolean, boolean,
            )),
            cond(layout.entry_has_tail(), u8x4),
        )),
    )(input)
    .map(|(next_input, (tyres_wear, tyres_damage, brakes_damage, c, tyre_blisters))| {
        (
            next_input,
            CarDamage {
                tyres_wear,
                tyres_damage,
                brakes_damage,
                front_left_wing_damage: c.0,
                front_right_wing_damage: c.1,
                rear_wing_damage: c.2,
                floor_damage: c.3,
                diffuser_damage: c.4,
                sidepod_damage: c.5,
                drs_fault: c.6,
                ers_fault: c.7,
                gear_box_damage: c.8,
                engine_damage: c.9,
                engine_mguh_wear: c.10,
                engine_es_wear: c.11,
                engine_ce_wear: c.12,
                engine_ice_wear: c.13,
                engine_mguk_wear: c.14,
                engine_tc_wear: c.15,
                engine_blown: c.16,
                engine_seized: c.17,
                tyre_blisters,
            },
        )
    })
}

pub(crate) fn car_damage<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "car_damage_packet",
        map(per_car(layout, |i| car_damage_entry(layout, i)), |cars| {
            PacketVariant::CarDamage(CarDamageData { cars })
        }),
    )(input)
}

fn lap_history(input: &[u8]) -> Res<&[u8], LapHistory> {
    map(
        tuple((le_u32, le_u16, le_u8, le_u16, le_u8, le_u16, le_u8, le_u8)),
        |res| LapHistory {
            lap_time_ms: res.0,
            sector1_time_ms_part: res.1,
            sector1_time_minutes_part: res.2,
            sector2_time_ms_part: res.3,
            sector2_time_minutes_part: res.4,
            sector3_time_ms_part: res.5,
            sector3_time_minutes_part: res.6,
            valid_flags: res.7,
        },
    )(input)
}

fn tyre_stint(input: &[u8]) -> Res<&[u8], TyreStintHistory> {
    map(tuple((le_u8, le_u8, le_u8)), |(end_lap, actual, visual)| {
        TyreStintHistory {
            end_lap,
            tyre_actual_compound: actual,
            tyre_visual_compound: visual,
        }
    })(input)
}

pub(crate) fn session_history<'a>(
    _layout: &Layout,
    input: &'a [u8],
) -> Res<&'a [u8], PacketVariant> {
    let (input, res) = context(
        "session_history",
        tuple((le_u8, le_u8, le_u8, le_u8, le_u8, le_u8, le_u8)),
    )(input)?;
    let (input, mut laps) = context("lap_history", count(lap_history, MAX_HISTORY_LAPS))(input)?;
    laps.truncate(res.1 as usize);
    let (input, tyre_stints) = context(
        "tyre_stints",
        bounded_slots(MAX_TYRE_STINTS, res.2 as usize, tyre_stint),
    )(input)?;

    Ok((
        input,
        PacketVariant::SessionHistory(SessionHistoryData {
            car_index: res.0,
            num_laps: res.1,
            num_tyre_stints: res.2,
            best_lap_time_lap_num: res.3,
            best_sector1_lap_num: res.4,
            best_sector2_lap_num: res.5,
            best_sector3_lap_num: res.6,
            laps,
            tyre_stints,
        }),
    ))
}

fn tyre_set(input: &[u8]) -> Res<&[u8], TyreSet> {
    map(
        tuple((le_u8, le_u8, le_u8, boolean, le_u8, le_u8, le_u8, le_i16, boolean)),
        |res| TyreSet {
            actual_tyre_compound: res.0,
            visual_tyre_compound: res.1,
            wear: res.2,
            available: res.3,
            recommended_session: res.4,
            life_span: res.5,
            usable_life: res.6,
            lap_delta_time_ms: res.7,
            fitted: res.8,
        },
    )(input)
}

pub(crate) fn tyre_sets<'a>(_layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "tyre_sets",
        tuple((le_u8, count(tyre_set, NUM_TYRE_SETS), le_u8)),
    )(input)
    .map(|(next_input, (car_index, sets, fitted_index))| {
        (
            next_input,
            PacketVariant::TyreSets(TyreSetsData {
                car_index,
                sets,
                fitted_index,
            }),
        )
    })
}

fn motion_ex_tail(input: &[u8]) -> Res<&[u8], MotionExTail> {
    map(
        tuple((le_f32, f32x4, f32x4)),
        |(chassis_pitch, wheel_camber, wheel_camber_gain)| MotionExTail {
            chassis_pitch,
            wheel_camber,
            wheel_camber_gain,
        },
    )(input)
}

pub(crate) fn motion_ex<'a>(layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "motion_ex",
        tuple((
            f32x4,
            f32x4,
            f32x4,
            f32x4,
            f32x4,
            f32x4,
            f32x4,
            f32x4,
            le_f32,
            f32x3,
            f32x3,
            f32x3,
            le_f32,
            f32x4,
            le_f32,
            le_f32,
            le_f32,
            le_f32,
            le_f32,
            cond(layout.has_tail(), motion_ex_tail),
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            PacketVariant::MotionEx(MotionExData {
                suspension_position: res.0,
                suspension_velocity: res.1,
                suspension_acceleration: res.2,
                wheel_speed: res.3,
                wheel_slip_ratio: res.4,
                wheel_slip_angle: res.5,
                wheel_lat_force: res.6,
                wheel_long_force: res.7,
                height_of_cog_above_ground: res.8,
                local_velocity: res.9,
                angular_velocity: res.10,
                angular_acceleration: res.11,
                front_wheels_angle: res.12,
                wheel_vert_force: res.13,
                front_aero_height: res.14,
                rear_aero_height: res.15,
                front_roll_angle: res.16,
                rear_roll_angle: res.17,
                chassis_yaw: res.18,
                extended: res.19,
            }),
        )
    })
}

fn time_trial_set(input: &[u8]) -> Res<&[u8], TimeTrialDataSet> {
    context(
        "time_trial_set",
        tuple((
            le_u8, le_u8, le_u32, le_u32, le_u32, le_u32, le_u8, le_u8, le_u8, le_u8, le_u8,
            boolean,
        )),
    )(input)
    .map(|(next_input, res)| {
        (
            next_input,
            TimeTrialDataSet {
                car_index: res.0,
                team_id: res.1,
                lap_time_ms: res.2,
                sector1_time_ms: res.3,
                sector2_time_ms: res.4,
                sector3_time_ms: res.5,
                traction_control: res.6,
                gearbox_assist: res.7,
                anti_lock_brakes: res.8,
                equal_car_performance: res.9,
                custom_setup: res.10,
                valid: res.11,
            },
        )
    })
}

pub(crate) fn time_trial<'a>(_layout: &Layout, input: &'a [u8]) -> Res<&'a [u8], PacketVariant> {
    context(
        "time_trial",
        tuple((time_trial_set, time_trial_set, time_trial_set)),
    )(input)
    .map(|(next_input, (player_session_best, personal_best, rival))| {
        (
            next_input,
            PacketVariant::TimeTrial(TimeTrialData {
                player_session_best,
                personal_best,
                rival,
            }),
        )
    })
}

fn lap_position_row(input: &[u8]) -> Res<&[u8], [u8; NUM_CARS]> {
    let (rest, raw) = take(NUM_CARS)(input)?;
    let mut row = [0u8; NUM_CARS];
    row.copy_from_slice(raw);
    Ok((rest, row))
}

pub(crate) fn lap_positions<'a>(
    _layout: &Layout,
    input: &'a [u8],
) -> Res<&'a [u8], PacketVariant> {
    let (input, (num_laps, lap_start)) = context("lap_positions", tuple((le_u8, le_u8)))(input)?;
    let (input, mut positions) =
        context("positions", count(lap_position_row, MAX_LAP_POSITIONS))(input)?;
    positions.truncate(num_laps as usize);
    Ok((
        input,
        PacketVariant::LapPositions(LapPositionsData {
            num_laps,
            lap_start,
            positions,
        }),
    ))
}
