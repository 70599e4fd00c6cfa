//! Race Logic
//!
//! Kart identity, progress tracking (laps, distance, ranks, estimates)
//! and the per-tick session that drives them.

pub mod events;
pub mod kart;
pub mod progress;
pub mod session;

pub use events::{RaceEvent, RaceEventData};
pub use kart::{Kart, KartFrame, KartId, KartState};
pub use progress::{
    KartProgressInfo, RaceConfig, RaceProgressTracker,
    MAX_ESTIMATED_FINISH_TIME, NO_FASTEST_LAP,
};
pub use session::{RaceSession, SessionConfig, SessionError, SessionRole, TickResult};
