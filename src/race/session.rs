//! Race Session
//!
//! Ties the drive graph, the check structures and the progress tracker
//! into one per-tick step. A session runs either as the authority, which
//! detects crossings itself and emits replication messages, or as a
//! replica, which takes crossing results from the authority and only
//! recomputes what follows from kart positions.
//!
//! ## Tick order
//!
//! 1. Store the kart poses reported by physics
//! 2. Project every kart onto the drive graph
//! 3. Refresh overall distances
//! 4. Authority: run the check structures. Replica: apply inbound messages
//! 5. Rank, estimate, wrong-way

use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::checks::{CheckKind, CheckManager, CheckTrigger, Crossing};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::vec3::{Transform, Vec3};
use crate::network::protocol::{
    CheckLineEvent, KartFinishedEvent, ReplicationError, ReplicationMessage,
};
use crate::network::replication::{ProgressSnapshot, SNAPSHOT_VERSION};
use crate::track::{DriveGraph, StartGridConfig, Track, TrackSector};
use super::events::{RaceEvent, RaceEventData};
use super::kart::{Kart, KartFrame, KartId, KartState};
use super::progress::{KartProgressInfo, RaceConfig, RaceProgressTracker};

/// Karts a session can hold; ranks and wire ids are single bytes.
pub const MAX_KARTS: usize = u8::MAX as usize;

/// Which side of the replication link a session is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Detects crossings and sends results
    Authority,
    /// Applies results received from the authority
    Replica,
}

/// Session configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Race rules
    pub race: RaceConfig,
    /// Starting grid layout
    pub grid: StartGridConfig,
}

/// Session errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No karts given
    #[error("Race needs at least one kart")]
    NoKarts,

    /// More karts than fit the wire format
    #[error("Too many karts: {0} (max {MAX_KARTS})")]
    TooManyKarts(usize),

    /// Kart ids must match their position in the kart list
    #[error("Kart at index {index} has id {id}")]
    KartIdMismatch {
        /// Position in the list
        index: usize,
        /// Id it carries
        id: KartId,
    },

    /// Wrong number of frames for a tick
    #[error("Expected {expected} kart frames, got {got}")]
    FrameCountMismatch {
        /// Kart count
        expected: usize,
        /// Frames given
        got: usize,
    },
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick that was run
    pub tick: u32,
    /// Race events generated this tick
    pub events: Vec<RaceEvent>,
    /// Messages to send to the other side
    pub outgoing: Vec<ReplicationMessage>,
    /// Inbound messages that could not be applied
    pub rejected: Vec<ReplicationError>,
    /// Replica lost sync and asked for a snapshot
    pub needs_snapshot: bool,
    /// Every kart finished or was eliminated
    pub race_over: bool,
}

/// One race on one track.
pub struct RaceSession {
    role: SessionRole,
    config: SessionConfig,
    track_name: String,
    graph: Arc<DriveGraph>,
    checks: CheckManager,
    tracker: RaceProgressTracker,
    transforms: Vec<Transform>,
    race_over_reported: bool,
}

impl RaceSession {
    /// Set up a race: place the karts on the starting grid, arm the check
    /// structures and rank everyone by grid position.
    pub fn new(
        role: SessionRole,
        track: &Track,
        karts: Vec<Kart>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        if karts.is_empty() {
            return Err(SessionError::NoKarts);
        }
        if karts.len() > MAX_KARTS {
            return Err(SessionError::TooManyKarts(karts.len()));
        }
        if let Some((index, kart)) = karts.iter().enumerate().find(|(i, k)| k.id.index() != *i) {
            return Err(SessionError::KartIdMismatch { index, id: kart.id });
        }

        let n = karts.len();
        let graph = Arc::clone(&track.graph);
        let transforms = graph.set_default_start_positions(n, &config.grid);

        let mut checks = track.checks.clone();
        checks.reset(n);

        let mut tracker = RaceProgressTracker::new(config.race.clone(), karts);
        tracker.reset(&graph, &checks, &transforms);

        info!(
            "Race session on '{}' as {:?}: {} karts, {} check structures",
            track.name,
            role,
            n,
            checks.num_structures()
        );

        Ok(Self {
            role,
            config,
            track_name: track.name.clone(),
            graph,
            checks,
            tracker,
            transforms,
            race_over_reported: false,
        })
    }

    /// Run one tick with the poses physics produced for it.
    pub fn tick(
        &mut self,
        frames: &[KartFrame],
        inbound: &[ReplicationMessage],
    ) -> Result<TickResult, SessionError> {
        let n = self.num_karts();
        if frames.len() != n {
            return Err(SessionError::FrameCountMismatch { expected: n, got: frames.len() });
        }

        self.tracker.advance_tick();
        let mut result = TickResult { tick: self.tracker.tick(), ..Default::default() };

        // 1. Poses and eliminations
        let previous = std::mem::replace(
            &mut self.transforms,
            frames.iter().map(|f| f.transform).collect(),
        );
        for (k, frame) in frames.iter().enumerate() {
            if frame.eliminated {
                self.tracker.eliminate_kart(KartId(k as u8));
            }
        }

        // 2. Sectors
        self.tracker.update_sectors(&self.graph, &self.transforms);

        // 3. Overall distances
        self.tracker.refresh_overall_distances(&self.checks);

        // 4. Crossings
        match self.role {
            SessionRole::Authority => {
                self.detect_crossings(&previous, &mut result.outgoing);
                for message in inbound {
                    match message {
                        ReplicationMessage::SnapshotRequest => {
                            info!("Snapshot requested at tick {}", result.tick);
                            result.outgoing.push(ReplicationMessage::Snapshot(Box::new(self.build_snapshot())));
                        }
                        other => warn!("Authority ignores inbound {}", message_name(other)),
                    }
                }
            }
            SessionRole::Replica => {
                for message in inbound {
                    if let Err(e) = self.apply_message(message) {
                        warn!("Rejected replication message at tick {}: {}", result.tick, e);
                        result.rejected.push(e);
                        result.needs_snapshot = true;
                    }
                }
                self.tracker.settle_finishers();
                if result.needs_snapshot {
                    result.outgoing.push(ReplicationMessage::SnapshotRequest);
                }
            }
        }

        // Crossings may have re-armed or cleared the lap line
        self.tracker.refresh_overall_distances(&self.checks);

        // 5. Ranks, estimates, wrong way
        self.tracker.update_race_position();
        self.tracker.estimate_finish_times();
        self.tracker.update_wrong_way(&self.graph, &previous, &self.transforms);

        self.report_race_end();
        result.race_over = self.tracker.is_race_over();
        result.events = self.tracker.take_events();
        Ok(result)
    }

    // =========================================================================
    // AUTHORITY
    // =========================================================================

    fn detect_crossings(&mut self, previous: &[Transform], outgoing: &mut Vec<ReplicationMessage>) {
        let lap_length = self.graph.lap_length();
        let crossings: Vec<Option<Crossing>> = (0..self.num_karts())
            .map(|k| {
                let kart = KartId(k as u8);
                if self.tracker.info(kart).state == KartState::Eliminated {
                    return None;
                }
                let sector = self.tracker.sector(kart);
                Some(Crossing {
                    prev: previous[k].origin,
                    curr: self.transforms[k].origin,
                    prev_distance: sector.previous_distance_from_start(),
                    curr_distance: sector.distance_from_start(),
                    lap_length,
                })
            })
            .collect();

        let was_racing = self.racing_flags();
        for trigger in self.checks.update(&crossings) {
            self.handle_trigger(trigger, outgoing);
        }
        self.tracker.settle_finishers();
        outgoing.extend(self.finish_messages(&was_racing));
    }

    fn handle_trigger(&mut self, trigger: CheckTrigger, outgoing: &mut Vec<ReplicationMessage>) {
        let kart = KartId(trigger.kart as u8);
        let tick = self.tracker.tick();
        let structure = self.checks.structure(trigger.check);

        if structure.is_checkline() {
            self.tracker.set_last_triggered_checkline(kart, Some(trigger.check));
        }

        match structure.kind().clone() {
            CheckKind::NewLap => self.tracker.new_lap(kart, &self.checks),
            CheckKind::Activate | CheckKind::Toggle => {}
            CheckKind::Goal { first_goal } => self.tracker.push_event(RaceEvent::for_kart(
                tick,
                kart,
                RaceEventData::GoalScored { check: trigger.check, first_goal },
            )),
            CheckKind::Cannon { target_left, target_right, speed } => {
                self.tracker.push_event(RaceEvent::for_kart(
                    tick,
                    kart,
                    RaceEventData::CannonLaunch { check: trigger.check, target_left, target_right, speed },
                ))
            }
            CheckKind::Trigger { action } => self.tracker.push_event(RaceEvent::for_kart(
                tick,
                kart,
                RaceEventData::ScriptTrigger { check: trigger.check, action },
            )),
        }

        outgoing.push(ReplicationMessage::CheckLine(self.check_line_event(kart)));
    }

    fn racing_flags(&self) -> Vec<bool> {
        self.tracker.infos().iter().map(KartProgressInfo::is_racing).collect()
    }

    /// `KartFinished` for every kart that was racing and has finished since,
    /// in rank order.
    fn finish_messages(&self, was_racing: &[bool]) -> Vec<ReplicationMessage> {
        let mut finished: Vec<KartId> = (0..self.num_karts())
            .map(|k| KartId(k as u8))
            .filter(|&k| was_racing[k.index()] && self.tracker.info(k).state == KartState::Finished)
            .collect();
        finished.sort_by_key(|&k| self.tracker.info(k).rank);

        finished
            .into_iter()
            .map(|kart| {
                ReplicationMessage::KartFinished(KartFinishedEvent {
                    kart,
                    finish_time: self.tracker.info(kart).finish_time,
                })
            })
            .collect()
    }

    /// State of `kart` as sent after each of its crossings.
    pub fn check_line_event(&self, kart: KartId) -> CheckLineEvent {
        CheckLineEvent {
            kart,
            finished_laps: self.tracker.get_lap(kart),
            last_triggered_checkline: self.tracker.sector(kart).last_triggered_checkline(),
            fastest_lap_ticks: self.tracker.fastest_lap_ticks(),
            fastest_lap_holder: self.tracker.fastest_lap_holder().to_string(),
            check_states: self.checks.kart_states(kart.index()),
        }
    }

    /// End the race now. Every racing kart finishes at its estimated time.
    pub fn terminate_race(&mut self) -> TickResult {
        let was_racing = self.racing_flags();
        self.tracker.terminate_race();

        let mut result = TickResult { tick: self.tracker.tick(), ..Default::default() };
        if self.role == SessionRole::Authority {
            result.outgoing = self.finish_messages(&was_racing);
        }

        self.report_race_end();
        result.race_over = self.tracker.is_race_over();
        result.events = self.tracker.take_events();
        result
    }

    fn report_race_end(&mut self) {
        if !self.race_over_reported && self.tracker.is_race_over() {
            self.race_over_reported = true;
            let tick = self.tracker.tick();
            info!("Race on '{}' over at tick {}", self.track_name, tick);
            self.tracker.push_event(RaceEvent::race(tick, RaceEventData::RaceEnded { duration_ticks: tick }));
        }
    }

    // =========================================================================
    // REPLICA
    // =========================================================================

    /// Apply one message from the authority.
    pub fn apply_message(&mut self, message: &ReplicationMessage) -> Result<(), ReplicationError> {
        match message {
            ReplicationMessage::CheckLine(event) => self.apply_check_line(event),
            ReplicationMessage::KartFinished(event) => {
                let kart = self.known_kart(event.kart)?;
                self.tracker.finish_kart(kart, event.finish_time);
                Ok(())
            }
            ReplicationMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            ReplicationMessage::SnapshotRequest => Ok(()),
        }
    }

    fn apply_check_line(&mut self, event: &CheckLineEvent) -> Result<(), ReplicationError> {
        let kart = self.known_kart(event.kart)?;
        let expected = self.checks.num_structures();
        if event.check_states.len() != expected {
            return Err(ReplicationError::CheckCountMismatch { got: event.check_states.len(), expected });
        }

        // Check bits first: the lap count refresh depends on them
        self.checks.set_kart_states(kart.index(), &event.check_states);
        self.tracker.set_last_triggered_checkline(kart, event.last_triggered_checkline);
        self.tracker.apply_lap_count(kart, event.finished_laps, &self.checks);
        self.tracker
            .apply_fastest_lap(kart, event.fastest_lap_ticks, &event.fastest_lap_holder);

        debug!("Applied check line event for {}: laps {}", kart, event.finished_laps);
        Ok(())
    }

    fn known_kart(&self, kart: KartId) -> Result<KartId, ReplicationError> {
        if kart.index() < self.num_karts() {
            Ok(kart)
        } else {
            Err(ReplicationError::UnknownKart(kart.0))
        }
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Capture the complete progress state.
    pub fn build_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            version: SNAPSHOT_VERSION,
            tick: self.tracker.tick(),
            fastest_lap_ticks: self.tracker.fastest_lap_ticks(),
            fastest_lap_holder: self.tracker.fastest_lap_holder().to_string(),
            distance_increase: self.tracker.distance_increase(),
            transforms: self.transforms.clone(),
            karts: self.tracker.infos().to_vec(),
            sectors: self.tracker.sectors().to_vec(),
            check_active: self.checks.active_matrix(),
        }
    }

    /// Replace the complete progress state. Nothing changes when the
    /// snapshot does not fit this race.
    pub fn apply_snapshot(&mut self, snapshot: &ProgressSnapshot) -> Result<(), ReplicationError> {
        if let Err(e) = snapshot.validate(self.num_karts(), self.checks.num_structures()) {
            debug!("Snapshot does not fit this race: {}", snapshot.to_json());
            return Err(e);
        }

        self.transforms = snapshot.transforms.clone();
        self.checks.set_active_matrix(&snapshot.check_active);
        self.tracker.restore(
            snapshot.tick,
            (snapshot.fastest_lap_ticks, snapshot.fastest_lap_holder.clone()),
            snapshot.distance_increase,
            snapshot.karts.clone(),
            snapshot.sectors.clone(),
        );
        self.race_over_reported = self.tracker.is_race_over();

        info!("Applied snapshot at tick {}", snapshot.tick);
        Ok(())
    }

    // =========================================================================
    // RESCUE
    // =========================================================================

    /// Put `kart` back on the track; returns the pose to teleport it to.
    pub fn rescue_kart(&mut self, kart: KartId) -> Transform {
        let transform = self.tracker.rescue_kart(kart, &self.graph, &self.checks);
        self.transforms[kart.index()] = transform;
        transform
    }

    // =========================================================================
    // STATE HASH
    // =========================================================================

    /// Hash of the complete progress state. Equal on the authority and a
    /// replica that is in sync.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tracker.tick(), self.num_karts(), |hasher| {
            for t in &self.transforms {
                hasher.update_transform(t);
            }
            self.tracker.hash_into(hasher);
            for row in self.checks.active_matrix() {
                for active in row {
                    hasher.update_bool(active);
                }
            }
        })
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Authority or replica.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current tick.
    pub fn current_tick(&self) -> u32 {
        self.tracker.tick()
    }

    /// Number of karts.
    pub fn num_karts(&self) -> usize {
        self.tracker.num_karts()
    }

    /// Drive graph.
    pub fn graph(&self) -> &DriveGraph {
        &self.graph
    }

    /// Check structures.
    pub fn checks(&self) -> &CheckManager {
        &self.checks
    }

    /// Progress tracker.
    pub fn tracker(&self) -> &RaceProgressTracker {
        &self.tracker
    }

    /// Last pose of every kart (the starting grid before the first tick).
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Progress of one kart.
    pub fn info(&self, kart: KartId) -> &KartProgressInfo {
        self.tracker.info(kart)
    }

    /// Track sector of one kart.
    pub fn sector(&self, kart: KartId) -> &TrackSector {
        self.tracker.sector(kart)
    }

    /// Pose to put a kart at when rescued onto `node`.
    pub fn get_rescue_transform(&self, node: usize) -> Transform {
        self.graph.get_rescue_transform(node)
    }

    /// First check line crossed by `from -> to`, heights ignored.
    pub fn get_checkline_triggering(&self, from: Vec3, to: Vec3) -> Option<usize> {
        self.checks.get_checkline_triggering(from, to)
    }

    /// Every kart finished or was eliminated.
    pub fn is_race_over(&self) -> bool {
        self.tracker.is_race_over()
    }
}

fn message_name(message: &ReplicationMessage) -> &'static str {
    match message {
        ReplicationMessage::CheckLine(_) => "check_line",
        ReplicationMessage::KartFinished(_) => "kart_finished",
        ReplicationMessage::Snapshot(_) => "snapshot",
        ReplicationMessage::SnapshotRequest => "snapshot_request",
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckShape, CheckStructure};
    use crate::track::drive_graph::{square_loop_specs, GraphConfig};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn square_track() -> Track {
        let graph = DriveGraph::load(&square_loop_specs(10.0, 4.0), None, &GraphConfig::default())
            .expect("square loads");
        Track::from_parts("square".into(), graph, None)
    }

    fn karts(n: usize) -> Vec<Kart> {
        (0..n).map(|i| Kart::new(i as u8, format!("kart{}", i), i as u8)).collect()
    }

    fn session(role: SessionRole, n: usize) -> RaceSession {
        RaceSession::new(role, &square_track(), karts(n), SessionConfig::default()).expect("session")
    }

    fn one_lap_session(role: SessionRole, n: usize) -> RaceSession {
        let config = SessionConfig {
            race: RaceConfig { num_laps: 1, ..RaceConfig::default() },
            ..SessionConfig::default()
        };
        RaceSession::new(role, &square_track(), karts(n), config).expect("session")
    }

    /// Square with the lap line 3 m into node 0 and a gate on node 2.
    fn offset_line_track() -> Track {
        let graph = DriveGraph::load(&square_loop_specs(10.0, 4.0), None, &GraphConfig::default())
            .expect("square loads");
        let checks = CheckManager::new(vec![
            CheckStructure::new(
                CheckKind::NewLap,
                CheckShape::line(Vec3::new(3.0, 0.0, -3.0), Vec3::new(3.0, 0.0, 3.0), false),
            ),
            CheckStructure::new(
                CheckKind::Activate,
                CheckShape::line(Vec3::new(10.0, 0.0, 7.0), Vec3::new(10.0, 0.0, 13.0), false),
            )
            .with_dependents(vec![0]),
        ])
        .expect("checks");
        Track::from_parts("square-offset".into(), graph, Some(checks))
    }

    fn at(x: f32, z: f32) -> KartFrame {
        KartFrame::racing(Transform::new(Vec3::new(x, 0.0, z), 0.0))
    }

    /// One lap of the square plus a bit, starting just behind the line.
    const LAP_PATH: [(f32, f32); 10] = [
        (-1.0, 0.5),
        (1.0, 0.0),
        (5.0, 0.0),
        (9.0, 2.0),
        (11.0, 6.0),
        (11.0, 9.0),
        (5.0, 10.0),
        (-0.5, 5.0),
        (-1.0, 2.0),
        (3.0, 0.0),
    ];

    fn forward_messages(outgoing: &[ReplicationMessage]) -> Vec<ReplicationMessage> {
        outgoing
            .iter()
            .map(|m| {
                let bytes = m.to_bytes().expect("encodes");
                ReplicationMessage::from_bytes(&bytes).expect("decodes")
            })
            .collect()
    }

    #[test]
    fn test_new_validates_karts() {
        let track = square_track();
        assert!(matches!(
            RaceSession::new(SessionRole::Authority, &track, vec![], SessionConfig::default()),
            Err(SessionError::NoKarts)
        ));

        let bad = vec![Kart::new(1, "a", 0)];
        assert!(matches!(
            RaceSession::new(SessionRole::Authority, &track, bad, SessionConfig::default()),
            Err(SessionError::KartIdMismatch { index: 0, .. })
        ));

        let mut s = session(SessionRole::Authority, 2);
        assert!(matches!(
            s.tick(&[at(0.0, 0.0)], &[]),
            Err(SessionError::FrameCountMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_lap_around_square() {
        let mut s = session(SessionRole::Authority, 1);
        let kart = KartId(0);
        let mut distances = Vec::new();
        let mut laps = Vec::new();

        for &(x, z) in &LAP_PATH {
            s.tick(&[at(x, z)], &[]).expect("tick");
            distances.push(s.info(kart).overall_distance);
            laps.push(s.info(kart).finished_laps);
        }

        assert!((distances[0] + 0.5).abs() < 1e-4);
        assert_eq!(laps[0], -1);
        assert_eq!(laps[1], 0);
        assert!(distances[1].abs() < 1e-4);
        assert!((distances[6] - 25.0).abs() < 1e-4);
        assert!((distances[7] - 35.0).abs() < 1e-4);
        assert!((distances[8] - 38.0).abs() < 1e-4);
        assert_eq!(laps[9], 1);
        assert!((distances[9] - 43.0).abs() < 1e-4);

        for pair in distances.windows(2) {
            assert!(pair[1] >= pair[0], "distance went backwards: {:?}", distances);
        }
    }

    #[test]
    fn test_reverse_over_line_does_not_count() {
        let mut s = session(SessionRole::Authority, 1);
        let kart = KartId(0);

        s.tick(&[at(-1.0, 0.5)], &[]).expect("tick");
        s.tick(&[at(1.0, 0.0)], &[]).expect("tick");
        assert_eq!(s.info(kart).finished_laps, 0);

        s.tick(&[at(-1.0, 0.5)], &[]).expect("tick");
        assert_eq!(s.info(kart).finished_laps, 0);
        assert!((s.info(kart).overall_distance + 0.5).abs() < 1e-4);

        let result = s.tick(&[at(1.0, 0.0)], &[]).expect("tick");
        assert_eq!(s.info(kart).finished_laps, 0);
        assert!(result.outgoing.is_empty());
    }

    #[test]
    fn test_authority_emits_check_line_events() {
        let mut s = session(SessionRole::Authority, 1);
        s.tick(&[at(-1.0, 0.5)], &[]).expect("tick");
        let result = s.tick(&[at(1.0, 0.0)], &[]).expect("tick");

        assert_eq!(result.outgoing.len(), 1);
        let ReplicationMessage::CheckLine(event) = &result.outgoing[0] else {
            panic!("expected a check line event, got {:?}", result.outgoing);
        };
        assert_eq!(event.kart, KartId(0));
        assert_eq!(event.finished_laps, 0);
        assert_eq!(event.last_triggered_checkline, Some(0));
        assert_eq!(event.check_states, vec![false, true]);
    }

    #[test]
    fn test_replica_matches_authority() {
        let mut authority = session(SessionRole::Authority, 2);
        let mut replica = session(SessionRole::Replica, 2);
        assert_eq!(authority.compute_hash(), replica.compute_hash());

        let mut inbound = Vec::new();
        for lap in 0..3 {
            for (i, &(x, z)) in LAP_PATH.iter().enumerate() {
                if lap > 0 && i < 2 {
                    continue;
                }
                let frames = [at(x, z), at(x - 0.5, z)];
                let a = authority.tick(&frames, &[]).expect("authority tick");
                let r = replica.tick(&frames, &inbound).expect("replica tick");
                assert!(r.rejected.is_empty(), "{:?}", r.rejected);
                assert!(!r.needs_snapshot);
                inbound = forward_messages(&a.outgoing);
            }
        }
        // Deliver the last batch
        let frames = [at(3.0, 0.0), at(2.5, 0.0)];
        authority.tick(&frames, &[]).expect("authority tick");
        replica.tick(&frames, &inbound).expect("replica tick");

        // The replica runs one message batch behind; compare after
        // delivering everything and with identical poses.
        let final_frames = [at(4.0, 0.0), at(3.5, 0.0)];
        let a = authority.tick(&final_frames, &[]).expect("authority tick");
        replica.tick(&final_frames, &forward_messages(&a.outgoing)).expect("replica tick");

        for k in 0..2 {
            let kart = KartId(k);
            assert_eq!(authority.info(kart).finished_laps, replica.info(kart).finished_laps);
            assert_eq!(authority.info(kart).rank, replica.info(kart).rank);
        }
        assert_eq!(authority.tracker().get_fastest_lap(), replica.tracker().get_fastest_lap());
    }

    #[test]
    fn test_lockstep_hash_equality() {
        let mut authority = session(SessionRole::Authority, 1);
        let mut replica = session(SessionRole::Replica, 1);

        for &(x, z) in &LAP_PATH {
            let frames = [at(x, z)];
            let a = authority.tick(&frames, &[]).expect("authority tick");
            // Messages delivered within the same tick
            replica.tick(&frames, &forward_messages(&a.outgoing)).expect("replica tick");
            assert_eq!(authority.compute_hash(), replica.compute_hash(), "tick {}", a.tick);
        }
        assert_eq!(replica.info(KartId(0)).finished_laps, 1);
    }

    #[test]
    fn test_check_count_mismatch_requests_snapshot() {
        let mut authority = session(SessionRole::Authority, 1);
        let mut replica = session(SessionRole::Replica, 1);

        let bogus = ReplicationMessage::CheckLine(CheckLineEvent {
            kart: KartId(0),
            finished_laps: 0,
            last_triggered_checkline: Some(0),
            fastest_lap_ticks: u32::MAX,
            fastest_lap_holder: String::new(),
            check_states: vec![true; 5],
        });
        let frames = [at(-1.0, 0.5)];
        authority.tick(&frames, &[]).expect("authority tick");
        let r = replica.tick(&frames, &[bogus]).expect("replica tick");
        assert!(r.needs_snapshot);
        assert!(matches!(r.rejected[0], ReplicationError::CheckCountMismatch { got: 5, expected: 2 }));
        assert_eq!(r.outgoing, vec![ReplicationMessage::SnapshotRequest]);
        // Nothing was applied
        assert_eq!(replica.info(KartId(0)).finished_laps, -1);

        // Authority answers with a snapshot
        let frames = [at(1.0, 0.0)];
        let a = authority.tick(&frames, &r.outgoing).expect("authority tick");
        let snapshot = a
            .outgoing
            .iter()
            .find(|m| matches!(m, ReplicationMessage::Snapshot(_)))
            .cloned()
            .expect("snapshot sent");
        let mut inbound: Vec<ReplicationMessage> = a
            .outgoing
            .iter()
            .filter(|m| !matches!(m, ReplicationMessage::Snapshot(_)))
            .cloned()
            .collect();
        inbound.push(snapshot);

        let r = replica.tick(&frames, &forward_messages(&inbound)).expect("replica tick");
        assert!(r.rejected.is_empty());
        assert_eq!(authority.compute_hash(), replica.compute_hash());
    }

    #[test]
    fn test_unknown_kart_rejected() {
        let mut replica = session(SessionRole::Replica, 1);
        let msg = ReplicationMessage::KartFinished(KartFinishedEvent { kart: KartId(9), finish_time: 1.0 });
        let r = replica.tick(&[at(-1.0, 0.5)], &[msg]).expect("tick");
        assert!(matches!(r.rejected[0], ReplicationError::UnknownKart(9)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut s = session(SessionRole::Authority, 2);
        for &(x, z) in LAP_PATH.iter().take(5) {
            s.tick(&[at(x, z), at(x - 1.0, z)], &[]).expect("tick");
        }
        let snapshot = s.build_snapshot();
        let bytes = ReplicationMessage::Snapshot(Box::new(snapshot.clone())).to_bytes().expect("encodes");

        let mut other = session(SessionRole::Replica, 2);
        let ReplicationMessage::Snapshot(decoded) = ReplicationMessage::from_bytes(&bytes).expect("decodes") else {
            panic!("expected snapshot");
        };
        other.apply_snapshot(&decoded).expect("applies");
        assert_eq!(other.build_snapshot(), snapshot);
        assert_eq!(other.compute_hash(), s.compute_hash());

        // Wrong kart count leaves the state alone
        let mut small = session(SessionRole::Replica, 1);
        let before = small.compute_hash();
        assert!(small.apply_snapshot(&snapshot).is_err());
        assert_eq!(small.compute_hash(), before);
    }

    #[test]
    fn test_race_finishes() {
        let track = square_track();
        let config = SessionConfig {
            race: RaceConfig { num_laps: 1, ..RaceConfig::default() },
            ..SessionConfig::default()
        };
        let mut s = RaceSession::new(SessionRole::Authority, &track, karts(1), config).expect("session");

        let results: Vec<TickResult> = LAP_PATH
            .iter()
            .map(|&(x, z)| s.tick(&[at(x, z)], &[]).expect("tick"))
            .collect();
        let last = results.last().expect("ticks ran");
        assert!(last.race_over);
        assert_eq!(s.info(KartId(0)).state, KartState::Finished);
        assert_eq!(s.info(KartId(0)).rank, 1);
        assert!(last.outgoing.iter().any(|m| matches!(m, ReplicationMessage::KartFinished(_))));
        assert!(last.events.iter().any(|e| matches!(e.data, RaceEventData::KartFinished { rank: 1, .. })));
        assert!(last.events.iter().any(|e| matches!(e.data, RaceEventData::RaceEnded { .. })));

        // Reported once
        let again = s.tick(&[at(5.0, 0.0)], &[]).expect("tick");
        assert!(!again.events.iter().any(|e| matches!(e.data, RaceEventData::RaceEnded { .. })));
    }

    #[test]
    fn test_terminate_race() {
        let mut s = session(SessionRole::Authority, 3);
        s.tick(&[at(-1.0, 0.5), at(-1.0, 1.0), at(-1.0, 1.5)], &[]).expect("tick");
        s.tick(&[at(1.0, 0.0), at(-1.0, 0.9), at(-1.0, 1.4)], &[]).expect("tick");

        let result = s.terminate_race();
        assert!(result.race_over);
        assert_eq!(result.outgoing.len(), 3);
        assert_eq!(s.info(KartId(0)).rank, 1);
    }

    #[test]
    fn test_terminate_race_replicates_ranks() {
        let mut authority = session(SessionRole::Authority, 2);
        let mut replica = session(SessionRole::Replica, 2);

        // Kart 1 crosses the line and pulls ahead, kart 0 waits behind it
        let ticks = [
            [at(-1.0, 0.5), at(1.0, 3.8)],
            [at(-1.0, 0.5), at(-1.0, 3.8)],
            [at(-1.0, 0.5), at(1.0, 0.0)],
            [at(-1.0, 0.5), at(5.0, 0.0)],
        ];
        for frames in &ticks {
            let result = authority.tick(frames, &[]).expect("authority tick");
            replica.tick(frames, &forward_messages(&result.outgoing)).expect("replica tick");
        }
        assert_eq!(authority.info(KartId(1)).rank, 1);

        let result = authority.terminate_race();
        let kart_order: Vec<KartId> = result
            .outgoing
            .iter()
            .filter_map(|m| match m {
                ReplicationMessage::KartFinished(e) => Some(e.kart),
                _ => None,
            })
            .collect();
        assert_eq!(kart_order, vec![KartId(1), KartId(0)]);

        let applied = replica
            .tick(&ticks[3], &forward_messages(&result.outgoing))
            .expect("replica tick");
        assert!(applied.rejected.is_empty());

        for k in [KartId(0), KartId(1)] {
            assert_eq!(replica.info(k).state, KartState::Finished);
            assert_eq!(replica.info(k).rank, authority.info(k).rank, "rank of {}", k);
            assert_eq!(
                replica.info(k).finish_time.to_bits(),
                authority.info(k).finish_time.to_bits()
            );
        }
        assert_eq!(authority.info(KartId(1)).rank, 1);
        assert_eq!(authority.info(KartId(0)).rank, 2);
    }

    #[test]
    fn test_same_tick_finish_ordered_by_crossing_time() {
        let mut authority = one_lap_session(SessionRole::Authority, 2);
        let mut replica = one_lap_session(SessionRole::Replica, 2);

        // Kart 1 joins kart 0 behind the line, both drive the same lap and
        // kart 1 is half a metre ahead on the last two ticks
        let mut ticks = vec![
            vec![at(-1.0, 0.5), at(1.0, 3.8)],
            vec![at(-1.0, 0.5), at(-1.0, 3.8)],
        ];
        for &(x, z) in &LAP_PATH[1..8] {
            ticks.push(vec![at(x, z), at(x, z)]);
        }
        ticks.push(vec![at(-1.0, 2.0), at(-1.0, 1.5)]);
        ticks.push(vec![at(3.0, 0.0), at(3.5, 0.0)]);

        let results: Vec<TickResult> = ticks
            .iter()
            .map(|frames| {
                let result = authority.tick(frames, &[]).expect("authority tick");
                let applied = replica.tick(frames, &forward_messages(&result.outgoing)).expect("replica tick");
                assert!(applied.rejected.is_empty());
                assert_eq!(authority.compute_hash(), replica.compute_hash());
                result
            })
            .collect();
        let last = results.last().expect("ticks ran");
        assert!(last.race_over);

        let (first, second) = (authority.info(KartId(1)), authority.info(KartId(0)));
        assert!(first.finish_time < second.finish_time);
        assert!(first.overall_distance > second.overall_distance);
        assert_eq!(first.rank, 1);
        assert_eq!(second.rank, 2);
        assert_eq!(replica.info(KartId(1)).rank, 1);
        assert_eq!(replica.info(KartId(0)).rank, 2);

        let finish_events: Vec<(Option<KartId>, u8)> = last
            .events
            .iter()
            .filter_map(|e| match e.data {
                RaceEventData::KartFinished { rank, .. } => Some((e.kart, rank)),
                _ => None,
            })
            .collect();
        assert_eq!(finish_events, vec![(Some(KartId(1)), 1), (Some(KartId(0)), 2)]);
    }

    #[test]
    fn test_lap_line_inside_start_node() {
        let track = offset_line_track();
        let mut s = RaceSession::new(SessionRole::Authority, &track, karts(1), SessionConfig::default())
            .expect("session");
        let kart = KartId(0);
        assert!((s.info(kart).overall_distance + 2.25).abs() < 1e-4);

        let mut step = |x: f32, z: f32| {
            s.tick(&[at(x, z)], &[]).expect("tick");
            (s.info(kart).finished_laps, s.info(kart).overall_distance)
        };
        let close = |(laps, d): (i32, f32), want_laps: i32, want: f32| {
            assert_eq!(laps, want_laps);
            assert!((d - want).abs() < 1e-4, "distance {} want {}", d, want);
        };

        // Past the node boundary but short of the line: shifted up a lap
        close(step(-1.0, 0.5), -1, -0.5);
        close(step(2.0, -1.0), -1, 2.0);
        // Over the line
        close(step(4.0, -1.0), 0, 4.0);
        // Back over the line, then back over the node boundary: shifted down
        close(step(2.0, -1.0), 0, 2.0);
        close(step(-1.0, 0.5), 0, -0.5);
        // Forward again does not count a second time
        close(step(2.0, -1.0), 0, 2.0);
        close(step(4.0, -1.0), 0, 4.0);
    }

    #[test]
    fn test_elimination_from_frames() {
        let mut s = session(SessionRole::Authority, 3);
        let mut frames = vec![at(-1.0, 0.5), at(-1.0, 1.0), at(-1.0, 1.5)];
        frames[0].eliminated = true;
        let result = s.tick(&frames, &[]).expect("tick");
        assert_eq!(s.info(KartId(0)).state, KartState::Eliminated);
        assert_eq!(s.info(KartId(0)).rank, 3);
        assert!(result.events.iter().any(|e| e.kart == Some(KartId(0))));
    }

    #[test]
    fn test_rescue_updates_pose() {
        let mut s = session(SessionRole::Authority, 1);
        s.tick(&[at(5.0, 0.0)], &[]).expect("tick");
        let t = s.rescue_kart(KartId(0));
        assert_eq!(s.transforms()[0], t);
        assert_eq!(s.sector(KartId(0)).current_node(), Some(s.tracker().get_rescue_position_index(KartId(0))));
    }

    #[test]
    fn test_random_drive_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 4;
        let mut s = session(SessionRole::Authority, n);
        let mut positions: Vec<Vec3> = s.transforms().iter().map(|t| t.origin).collect();

        for _ in 0..500 {
            let frames: Vec<KartFrame> = positions
                .iter_mut()
                .map(|p| {
                    p.x = (p.x + rng.gen_range(-0.5..0.5)).clamp(-2.0, 12.0);
                    p.z = (p.z + rng.gen_range(-0.5..0.5)).clamp(-2.0, 12.0);
                    KartFrame::racing(Transform::new(*p, 0.0))
                })
                .collect();
            s.tick(&frames, &[]).expect("tick");

            let mut ranks: Vec<u8> = (0..n).map(|k| s.info(KartId(k as u8)).rank).collect();
            ranks.sort_unstable();
            assert_eq!(ranks, (1..=n as u8).collect::<Vec<u8>>());

            for k in 0..n {
                let info = s.info(KartId(k as u8));
                assert!(info.estimated_finish_time.is_finite());
                assert!(info.finished_laps >= -1);
            }
        }
    }
}
