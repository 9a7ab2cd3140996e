use std::fmt::{Debug, Display, Formatter};

/// Names indexed by the session packet's `trackId`.
const TRACK_NAMES: [&str; 33] = [
    "Melbourne",
    "Paul Ricard",
    "Shanghai",
    "Sakhir (Bahrain)",
    "Catalunya",
    "Monaco",
    "Montreal",
    "Silverstone",
    "Hockenheim",
    "Hungaroring",
    "Spa",
    "Monza",
    "Singapore",
    "Suzuka",
    "Abu Dhabi",
    "Texas",
    "Brazil",
    "Austria",
    "Sochi",
    "Mexico",
    "Baku (Azerbaijan)",
    "Sakhir Short",
    "Silverstone Short",
    "Texas Short",
    "Suzuka Short",
    "Hanoi",
    "Zandvoort",
    "Imola",
    "Portimao",
    "Jeddah",
    "Miami",
    "Las Vegas",
    "Losail",
];

pub const UNKNOWN: &str = "Unknown";

pub fn track_name(track_id: i8) -> &'static str {
    if track_id < 0 {
        return UNKNOWN;
    }
    TRACK_NAMES
        .get(track_id as usize)
        .copied()
        .unwrap_or(UNKNOWN)
}

pub fn session_type_name(session_type: u8) -> &'static str {
    match session_type {
        1 => "Practice 1",
        2 => "Practice 2",
        3 => "Practice 3",
        4 => "Short Practice",
        5 => "Q1",
        6 => "Q2",
        7 => "Q3",
        8 => "Short Qualifying",
        9 => "One-Shot Q",
        10 => "Sprint Shootout 1",
        11 => "Sprint Shootout 2",
        12 => "Sprint Shootout 3",
        13 => "Short Sprint Shootout",
        14 => "One-Shot Sprint Shootout",
        15 => "Sprint",
        16 => "Sprint 2",
        17 => "Race",
        18 => "Race 2",
        19 => "Race 3",
        20 => "Time Trial",
        _ => UNKNOWN,
    }
}

/// Name of an `actualTyreCompound` value, the underlying Pirelli compound.
pub fn actual_compound_name(compound: u8) -> &'static str {
    match compound {
        16 => "C5",
        17 => "C4",
        18 => "C3",
        19 => "C2",
        20 => "C1",
        21 => "C0",
        22 => "C6",
        7 => "Intermediate",
        8 => "Wet",
        9 => "Dry (classic)",
        10 => "Wet (classic)",
        11 => "Super Soft",
        12 => "Soft (F2)",
        13 => "Medium (F2)",
        14 => "Hard (F2)",
        15 => "Wet (F2)",
        _ => UNKNOWN,
    }
}

/// Name of a `visualTyreCompound` value, the compound as shown on the sidewall.
pub fn visual_compound_name(compound: u8) -> &'static str {
    match compound {
        16 => "Soft",
        17 => "Medium",
        18 => "Hard",
        7 => "Intermediate",
        8 => "Wet",
        19 => "Super Soft (F2)",
        20 => "Soft (F2)",
        21 => "Medium (F2)",
        22 => "Hard (F2)",
        15 => "Wet (F2)",
        _ => UNKNOWN,
    }
}

pub fn result_status_name(status: u8) -> &'static str {
    match status {
        0 => "Invalid",
        1 => "Inactive",
        2 => "Active",
        3 => "Finished",
        4 => "Did not finish",
        5 => "Disqualified",
        6 => "Not classified",
        7 => "Retired",
        _ => UNKNOWN,
    }
}

/// Four character code identifying an event packet.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct EventCode(pub [u8; 4]);

impl EventCode {
    pub const SESSION_STARTED: EventCode = EventCode(*b"SSTA");
    pub const SESSION_ENDED: EventCode = EventCode(*b"SEND");
    pub const FASTEST_LAP: EventCode = EventCode(*b"FTLP");
    pub const RETIREMENT: EventCode = EventCode(*b"RTMT");
    pub const DRS_ENABLED: EventCode = EventCode(*b"DRSE");
    pub const DRS_DISABLED: EventCode = EventCode(*b"DRSD");
    pub const TEAM_MATE_IN_PITS: EventCode = EventCode(*b"TMPT");
    pub const CHEQUERED_FLAG: EventCode = EventCode(*b"CHQF");
    pub const RACE_WINNER: EventCode = EventCode(*b"RCWN");
    pub const PENALTY: EventCode = EventCode(*b"PENA");
    pub const SPEED_TRAP: EventCode = EventCode(*b"SPTP");
    pub const START_LIGHTS: EventCode = EventCode(*b"STLG");
    pub const LIGHTS_OUT: EventCode = EventCode(*b"LGOT");
    pub const DRIVE_THROUGH_SERVED: EventCode = EventCode(*b"DTSV");
    pub const STOP_GO_SERVED: EventCode = EventCode(*b"SGSV");
    pub const FLASHBACK: EventCode = EventCode(*b"FLBK");
    pub const BUTTONS: EventCode = EventCode(*b"BUTN");
    pub const RED_FLAG: EventCode = EventCode(*b"RDFL");
    pub const OVERTAKE: EventCode = EventCode(*b"OVTK");
    pub const SAFETY_CAR: EventCode = EventCode(*b"SCAR");
    pub const COLLISION: EventCode = EventCode(*b"COLL");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    pub fn description(&self) -> &'static str {
        match *self {
            EventCode::SESSION_STARTED => "Session started",
            EventCode::SESSION_ENDED => "Session ended",
            EventCode::FASTEST_LAP => "Fastest lap",
            EventCode::RETIREMENT => "Retirement",
            EventCode::DRS_ENABLED => "DRS enabled",
            EventCode::DRS_DISABLED => "DRS disabled",
            EventCode::TEAM_MATE_IN_PITS => "Team mate in pits",
            EventCode::CHEQUERED_FLAG => "Chequered flag",
            EventCode::RACE_WINNER => "Race winner",
            EventCode::PENALTY => "Penalty issued",
            EventCode::SPEED_TRAP => "Speed trap triggered",
            EventCode::START_LIGHTS => "Start lights",
            EventCode::LIGHTS_OUT => "Lights out",
            EventCode::DRIVE_THROUGH_SERVED => "Drive through served",
            EventCode::STOP_GO_SERVED => "Stop go served",
            EventCode::FLASHBACK => "Flashback",
            EventCode::BUTTONS => "Button status",
            EventCode::RED_FLAG => "Red flag",
            EventCode::OVERTAKE => "Overtake",
            EventCode::SAFETY_CAR => "Safety car",
            EventCode::COLLISION => "Collision",
            _ => UNKNOWN,
        }
    }
}

impl Display for EventCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for EventCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventCode({})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_lookup() {
        assert_eq!(track_name(0), "Melbourne");
        assert_eq!(track_name(11), "Monza");
        assert_eq!(track_name(32), "Losail");
        assert_eq!(track_name(-1), UNKNOWN);
        assert_eq!(track_name(100), UNKNOWN);
    }

    #[test]
    fn compound_lookup() {
        assert_eq!(actual_compound_name(16), "C5");
        assert_eq!(actual_compound_name(21), "C0");
        assert_eq!(visual_compound_name(17), "Medium");
        assert_eq!(visual_compound_name(7), "Intermediate");
        assert_eq!(visual_compound_name(0), UNKNOWN);
    }

    #[test]
    fn event_codes() {
        assert_eq!(EventCode(*b"SSTA"), EventCode::SESSION_STARTED);
        assert_eq!(EventCode::FLASHBACK.to_string(), "FLBK");
        assert_eq!(EventCode(*b"ZZZZ").description(), UNKNOWN);
        assert_eq!(EventCode([0xff, 0, 0, 0]).as_str(), "????");
    }
}
