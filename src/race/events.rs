//! Race Events
//!
//! Notifications produced while a race runs. They are collected per tick
//! and handed to the caller (HUD, sound, scripting, soccer scoring); the
//! race itself never reads them back.

use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use super::kart::KartId;

/// Race event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaceEventData {
    /// Kart started a new lap
    LapCompleted {
        /// Laps finished so far
        finished_laps: i32,
    },

    /// Kart started its last lap
    FinalLap,

    /// Kart set the fastest lap of the race
    NewFastestLap {
        /// Lap time in ticks
        ticks: u32,
        /// Lap time in seconds
        seconds: f32,
        /// Name of the kart
        holder: String,
    },

    /// Kart finished the race
    KartFinished {
        /// Race time in seconds
        time: f32,
        /// Final rank
        rank: u8,
    },

    /// Kart was knocked out
    KartEliminated {
        /// Final rank
        rank: u8,
    },

    /// Kart started or stopped driving the wrong way
    WrongWay {
        /// Warning shown
        active: bool,
    },

    /// Goal line crossed
    GoalScored {
        /// Check structure index
        check: usize,
        /// Goal of the first team
        first_goal: bool,
    },

    /// Cannon entry crossed
    CannonLaunch {
        /// Check structure index
        check: usize,
        /// Left end of the target line
        target_left: Vec3,
        /// Right end of the target line
        target_right: Vec3,
        /// Flight speed
        speed: f32,
    },

    /// Scripted trigger hit
    ScriptTrigger {
        /// Check structure index
        check: usize,
        /// Action name
        action: String,
    },

    /// Every kart finished or was eliminated
    RaceEnded {
        /// Race duration in ticks
        duration_ticks: u32,
    },
}

/// A race event with timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    /// Tick when the event occurred
    pub tick: u32,

    /// Kart involved, if any
    pub kart: Option<KartId>,

    /// Event data
    pub data: RaceEventData,
}

impl RaceEvent {
    /// Event about one kart.
    pub fn for_kart(tick: u32, kart: KartId, data: RaceEventData) -> Self {
        Self { tick, kart: Some(kart), data }
    }

    /// Race-wide event.
    pub fn race(tick: u32, data: RaceEventData) -> Self {
        Self { tick, kart: None, data }
    }

    /// Serialize to JSON (for logs and replays).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        let event = RaceEvent::for_kart(120, KartId(2), RaceEventData::FinalLap);
        let json = event.to_json();
        assert!(json.contains("\"final_lap\""));
        assert!(json.contains("\"tick\":120"));

        let back: RaceEvent = serde_json::from_str(&json).expect("parses");
        assert_eq!(back, event);
    }

    #[test]
    fn test_race_event_has_no_kart() {
        let event = RaceEvent::race(10, RaceEventData::RaceEnded { duration_ticks: 10 });
        assert_eq!(event.kart, None);
    }
}
