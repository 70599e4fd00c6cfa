//! Race Progress Tracker
//!
//! Turns kart positions into race standing: laps, overall distance,
//! ranks, finish times and finish estimates.
//!
//! ## Overall distance
//!
//! `finished_laps * lap_length + distance_down_track`, where the distance
//! down the track is measured from the start node. Karts start on the grid
//! with `finished_laps == -1`; crossing the lap line the first time makes
//! it 0. When the lap line does not sit exactly on the start node's lower
//! edge, the distance is shifted by one lap length in the gap between the
//! two so the overall distance stays continuous.
//!
//! ## Ranking
//!
//! Ranks of racing karts are recomputed every tick. Finished and
//! eliminated karts keep the rank they had when they left the race:
//! finishers take the next rank from the top, eliminated karts the next
//! rank from the bottom.

use std::f32::consts::PI;

use serde::{Serialize, Deserialize};
use tracing::{error, info};

use crate::checks::{CheckManager, CheckShape};
use crate::core::hash::StateHasher;
use crate::core::vec3::{normalize_angle, Transform, Vec3};
use crate::track::{DriveGraph, TrackSector};
use super::events::{RaceEvent, RaceEventData};
use super::kart::{Kart, KartId, KartState};

/// Estimates beyond this many seconds are replaced by a rank-based value.
pub const MAX_ESTIMATED_FINISH_TIME: f32 = 59.0 * 60.0;

/// Average speeds below this are treated as standing still.
pub const MIN_AVERAGE_SPEED: f32 = 0.01;

/// A kart that crossed the lap line and is found in this last fraction of
/// the lap has reversed back over it.
pub const LAP_LINE_REVERSE_FRACTION: f32 = 0.75;

/// Fastest lap value meaning "no lap completed yet".
pub const NO_FASTEST_LAP: u32 = u32::MAX;

// =============================================================================
// CONFIG
// =============================================================================

/// Race rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Laps to finish
    pub num_laps: u8,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Heading difference from the track bearing counted as wrong way
    pub wrong_way_angle_deg: f32,
    /// Ticks of wrong-way driving before the warning is raised
    pub wrong_way_delay_ticks: u32,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            num_laps: 3,
            tick_rate: crate::TICK_RATE,
            wrong_way_angle_deg: 120.0,
            wrong_way_delay_ticks: crate::TICK_RATE,
        }
    }
}

impl RaceConfig {
    /// Seconds per tick.
    pub fn tick_duration(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Seconds at `tick`.
    pub fn tick_to_time(&self, tick: u32) -> f32 {
        tick as f32 / self.tick_rate.max(1) as f32
    }
}

// =============================================================================
// KART PROGRESS
// =============================================================================

/// Progress of one kart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KartProgressInfo {
    /// Laps completed; -1 until the lap line is crossed from the grid
    pub finished_laps: i32,
    /// `finished_laps * lap_length + distance down the track`
    pub overall_distance: f32,
    /// Tick of the last lap count change
    pub tick_at_last_lap: u32,
    /// Tick the current lap started
    pub lap_start_tick: u32,
    /// Estimated race time in seconds
    pub estimated_finish_time: f32,
    /// Race time in seconds, once finished
    pub finish_time: f32,
    /// Racing, finished or eliminated
    pub state: KartState,
    /// Rank, 1 is the leader
    pub rank: u8,
    /// Consecutive ticks spent driving the wrong way
    pub wrong_way_ticks: u32,
    /// Wrong-way warning raised
    pub wrong_way: bool,
}

impl Default for KartProgressInfo {
    fn default() -> Self {
        Self {
            finished_laps: -1,
            overall_distance: 0.0,
            tick_at_last_lap: 0,
            lap_start_tick: 0,
            estimated_finish_time: 0.0,
            finish_time: 0.0,
            state: KartState::Racing,
            rank: 0,
            wrong_way_ticks: 0,
            wrong_way: false,
        }
    }
}

impl KartProgressInfo {
    /// Still racing.
    #[inline]
    pub fn is_racing(&self) -> bool {
        self.state == KartState::Racing
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_i32(self.finished_laps);
        hasher.update_f32(self.overall_distance);
        hasher.update_u32(self.tick_at_last_lap);
        hasher.update_u32(self.lap_start_tick);
        hasher.update_f32(self.estimated_finish_time);
        hasher.update_f32(self.finish_time);
        hasher.update_u8(self.state as u8);
        hasher.update_u8(self.rank);
        hasher.update_u32(self.wrong_way_ticks);
        hasher.update_bool(self.wrong_way);
    }
}

// =============================================================================
// TRACKER
// =============================================================================

/// Progress of every kart in a race.
#[derive(Clone, Debug)]
pub struct RaceProgressTracker {
    config: RaceConfig,
    karts: Vec<Kart>,
    infos: Vec<KartProgressInfo>,
    sectors: Vec<TrackSector>,
    lap_length: f32,
    lap_line: Option<usize>,
    lap_line_offset: f32,
    distance_increase: f32,
    fastest_lap_ticks: u32,
    fastest_lap_holder: String,
    tick: u32,
    pending_finishers: Vec<usize>,
    events: Vec<RaceEvent>,
}

impl RaceProgressTracker {
    /// Tracker for `karts`; call [`reset`](Self::reset) before use.
    pub fn new(config: RaceConfig, karts: Vec<Kart>) -> Self {
        let n = karts.len();
        Self {
            config,
            karts,
            infos: vec![KartProgressInfo::default(); n],
            sectors: vec![TrackSector::new(); n],
            lap_length: 0.0,
            lap_line: None,
            lap_line_offset: 0.0,
            distance_increase: 1.0,
            fastest_lap_ticks: NO_FASTEST_LAP,
            fastest_lap_holder: String::new(),
            tick: 0,
            pending_finishers: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Start a race with the karts at `transforms`.
    pub fn reset(&mut self, graph: &DriveGraph, checks: &CheckManager, transforms: &[Transform]) {
        self.tick = 0;
        self.lap_length = graph.lap_length();
        self.lap_line = checks.lap_line_index();
        self.lap_line_offset = lap_line_offset(graph, checks);
        self.fastest_lap_ticks = NO_FASTEST_LAP;
        self.fastest_lap_holder.clear();
        self.pending_finishers.clear();
        self.events.clear();

        for (k, info) in self.infos.iter_mut().enumerate() {
            *info = KartProgressInfo::default();
            self.sectors[k].reset();
            if let Some(t) = transforms.get(k) {
                self.sectors[k].update(graph, t.origin);
            }
        }
        self.refresh_overall_distances(checks);

        // Karts behind the line have a negative distance; the estimator's
        // average speed must not see that.
        self.distance_increase = self
            .infos
            .iter()
            .map(|i| -i.overall_distance)
            .fold(1.0f32, f32::max);

        self.update_race_position();
        self.estimate_finish_times();

        info!(
            "Race reset: {} karts, {} laps, lap length {:.2}, lap line offset {:.2}",
            self.karts.len(),
            self.config.num_laps,
            self.lap_length,
            self.lap_line_offset
        );
    }

    /// Advance the race clock by one tick.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    // =========================================================================
    // PER-TICK UPDATES
    // =========================================================================

    /// Project every non-eliminated kart onto the track.
    pub fn update_sectors(&mut self, graph: &DriveGraph, transforms: &[Transform]) {
        for (k, t) in transforms.iter().enumerate().take(self.infos.len()) {
            if self.infos[k].state != KartState::Eliminated {
                self.sectors[k].update(graph, t.origin);
            }
        }
    }

    /// Recompute the overall distance of every racing kart.
    pub fn refresh_overall_distances(&mut self, checks: &CheckManager) {
        for k in 0..self.infos.len() {
            if self.infos[k].is_racing() {
                self.refresh_overall_distance(k, checks);
            }
        }
    }

    fn refresh_overall_distance(&mut self, k: usize, checks: &CheckManager) {
        let distance = self.track_distance(k, checks);
        let info = &mut self.infos[k];
        info.overall_distance = info.finished_laps as f32 * self.lap_length + distance;
    }

    /// Distance down the track, shifted by a lap in the gap between the
    /// lap line and the start node's lower edge.
    fn track_distance(&self, k: usize, checks: &CheckManager) -> f32 {
        let sector = &self.sectors[k];
        let raw = sector.distance_from_start();
        let Some(lap_line) = self.lap_line else {
            return raw;
        };

        if checks.is_lap_line_active(k) {
            // Lap line lies after the node boundary and is not crossed yet
            if self.lap_line_offset > 0.0 && raw < self.lap_line_offset {
                return raw + self.lap_length;
            }
        } else if sector.last_triggered_checkline() == Some(lap_line)
            && raw > LAP_LINE_REVERSE_FRACTION * self.lap_length
        {
            // Crossed the line but still (or again) before the node boundary
            return raw - self.lap_length;
        }
        raw
    }

    /// Record the last check line `kart` crossed.
    pub fn set_last_triggered_checkline(&mut self, kart: KartId, check: Option<usize>) {
        if let Some(sector) = self.sectors.get_mut(kart.index()) {
            sector.set_last_triggered_checkline(check);
        }
    }

    /// `kart` crossed an armed lap line.
    pub fn new_lap(&mut self, kart: KartId, checks: &CheckManager) {
        let k = kart.index();
        if k >= self.infos.len() || !self.infos[k].is_racing() {
            return;
        }
        let num_laps = self.config.num_laps as i32;

        if self.infos[k].finished_laps + 1 <= num_laps {
            self.infos[k].tick_at_last_lap = self.tick;
            self.infos[k].finished_laps += 1;
            self.refresh_overall_distance(k, checks);
            self.push_lap_events(kart);
        }

        if self.infos[k].finished_laps >= num_laps {
            let time = self.interpolated_finish_time(k);
            self.finish_kart(kart, time);
        }

        let ticks_per_lap = if self.infos[k].finished_laps == 1 {
            self.tick
        } else {
            self.tick.saturating_sub(self.infos[k].lap_start_tick)
        };
        if self.infos[k].finished_laps > 0 && ticks_per_lap < self.fastest_lap_ticks {
            let holder = self.karts[k].name.clone();
            self.set_fastest_lap(kart, ticks_per_lap, holder);
        }

        self.infos[k].lap_start_tick = self.tick;
    }

    fn push_lap_events(&mut self, kart: KartId) {
        let num_laps = self.config.num_laps as i32;
        let laps = self.infos[kart.index()].finished_laps;
        if laps + 1 == num_laps && num_laps > 1 {
            self.push_event(RaceEvent::for_kart(self.tick, kart, RaceEventData::FinalLap));
        } else if laps > 0 && laps < num_laps {
            self.push_event(RaceEvent::for_kart(
                self.tick,
                kart,
                RaceEventData::LapCompleted { finished_laps: laps },
            ));
        }
    }

    fn set_fastest_lap(&mut self, kart: KartId, ticks: u32, holder: String) {
        self.fastest_lap_ticks = ticks;
        self.fastest_lap_holder = holder.clone();
        let seconds = self.config.tick_to_time(ticks);
        info!("New fastest lap {:.3}s by {}", seconds, holder);
        self.push_event(RaceEvent::for_kart(
            self.tick,
            kart,
            RaceEventData::NewFastestLap { ticks, seconds, holder },
        ));
    }

    /// Crossing time between the previous and the current tick, in
    /// proportion to the distance covered on either side of the line.
    fn interpolated_finish_time(&self, k: usize) -> f32 {
        let sector = &self.sectors[k];
        let after = sector.distance_from_start();
        let before = self.lap_length - sector.previous_distance_from_start();
        let proportion = after / (before + after);
        let proportion = if proportion.is_finite() {
            proportion.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let now = self.time();
        let prev_time = self.config.tick_to_time(self.tick.saturating_sub(1));
        prev_time * proportion + now * (1.0 - proportion)
    }

    /// Finish `kart` at `time` seconds. The rank is frozen by the next
    /// [`settle_finishers`](Self::settle_finishers).
    pub fn finish_kart(&mut self, kart: KartId, time: f32) {
        let k = kart.index();
        if k >= self.infos.len() || !self.infos[k].is_racing() {
            return;
        }

        let info = &mut self.infos[k];
        info.state = KartState::Finished;
        info.finish_time = time;
        info.estimated_finish_time = time;
        info.wrong_way = false;
        info.wrong_way_ticks = 0;
        self.pending_finishers.push(k);
    }

    /// Freeze the ranks of karts finished since the last call, taking the
    /// next free ranks from the top. Karts finishing in the same tick are
    /// ordered by finish time, then distance, then grid index.
    pub fn settle_finishers(&mut self) {
        if self.pending_finishers.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.pending_finishers);
        pending.sort_by(|&a, &b| {
            let (ia, ib) = (&self.infos[a], &self.infos[b]);
            ia.finish_time
                .total_cmp(&ib.finish_time)
                .then(ib.overall_distance.total_cmp(&ia.overall_distance))
                .then((self.karts[a].grid_index, a).cmp(&(self.karts[b].grid_index, b)))
        });

        let settled = self.infos.iter().filter(|i| i.state == KartState::Finished).count() - pending.len();
        for (offset, k) in pending.into_iter().enumerate() {
            let rank = (settled + offset + 1) as u8;
            let time = self.infos[k].finish_time;
            self.infos[k].rank = rank;

            info!("{} finished at {:.3}s, rank {}", self.karts[k].name, time, rank);
            self.push_event(RaceEvent::for_kart(
                self.tick,
                KartId(k as u8),
                RaceEventData::KartFinished { time, rank },
            ));
        }
    }

    /// Knock `kart` out. Its rank is the number of karts still in the race.
    pub fn eliminate_kart(&mut self, kart: KartId) {
        let k = kart.index();
        if k >= self.infos.len() || !self.infos[k].is_racing() {
            return;
        }
        let rank = self.infos.iter().filter(|i| i.state != KartState::Eliminated).count() as u8;

        let info = &mut self.infos[k];
        info.state = KartState::Eliminated;
        info.rank = rank;
        info.wrong_way = false;

        info!("{} eliminated, rank {}", self.karts[k].name, rank);
        self.push_event(RaceEvent::for_kart(self.tick, kart, RaceEventData::KartEliminated { rank }));
    }

    /// End the race early: every racing kart finishes at its estimated
    /// time, leader first.
    pub fn terminate_race(&mut self) {
        self.update_race_position();
        self.estimate_finish_times();

        for k in self.racing_by_rank() {
            let time = self.infos[k].estimated_finish_time;
            self.finish_kart(KartId(k as u8), time);
        }
        self.update_race_position();
    }

    /// Every kart finished or was eliminated.
    pub fn is_race_over(&self) -> bool {
        self.infos.iter().all(|i| !i.is_racing())
    }

    // =========================================================================
    // RANKING
    // =========================================================================

    /// Settle pending finishers, then recompute the rank of every racing
    /// kart.
    ///
    /// A kart is ahead when it finished, has a greater overall distance,
    /// or has the same distance and a lower grid index. Eliminated karts
    /// are ignored. If the result is not a permutation of `1..=n` the
    /// previous ranks are kept.
    pub fn update_race_position(&mut self) {
        self.settle_finishers();
        let n = self.infos.len();
        let mut ranks: Vec<u8> = self.infos.iter().map(|i| i.rank).collect();

        for i in 0..n {
            if !self.infos[i].is_racing() {
                continue;
            }
            let mine = self.infos[i].overall_distance;
            let my_grid = (self.karts[i].grid_index, i);

            let mut position = 1u8;
            for j in 0..n {
                if j == i {
                    continue;
                }
                let other = &self.infos[j];
                let ahead = match other.state {
                    KartState::Eliminated => false,
                    KartState::Finished => true,
                    KartState::Racing => {
                        other.overall_distance > mine
                            || (other.overall_distance == mine
                                && (self.karts[j].grid_index, j) < my_grid)
                    }
                };
                if ahead {
                    position += 1;
                }
            }
            ranks[i] = position;
        }

        let mut seen = vec![false; n + 1];
        let valid = ranks.iter().all(|&r| {
            let r = r as usize;
            if r == 0 || r > n || seen[r] {
                false
            } else {
                seen[r] = true;
                true
            }
        });

        if !valid {
            error!("Invalid ranking at tick {}: {:?}", self.tick, ranks);
            for (k, info) in self.infos.iter().enumerate() {
                error!(
                    "  {} grid {}: {}",
                    self.karts[k].name,
                    self.karts[k].grid_index,
                    serde_json::to_string(info).unwrap_or_default()
                );
            }
            debug_assert!(valid, "duplicate or missing rank");
            return;
        }

        for (info, rank) in self.infos.iter_mut().zip(ranks) {
            info.rank = rank;
        }
    }

    fn racing_by_rank(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.infos.len())
            .filter(|&k| self.infos[k].is_racing())
            .collect();
        order.sort_by_key(|&k| self.infos[k].rank);
        order
    }

    // =========================================================================
    // FINISH ESTIMATES
    // =========================================================================

    /// Estimated race time for `kart` from its average speed so far.
    pub fn estimate_finish_time_for_kart(&self, kart: KartId) -> f32 {
        let info = &self.infos[kart.index()];
        let rank = info.rank as f32;
        let now = self.time();
        let full_distance = self.config.num_laps as f32 * self.lap_length;
        let distance = info.overall_distance;

        if now <= 0.0 {
            return MAX_ESTIMATED_FINISH_TIME + rank;
        }
        if distance > full_distance {
            return now + rank;
        }

        let average_speed = (distance + self.distance_increase) / now;
        if !(average_speed >= MIN_AVERAGE_SPEED) {
            return MAX_ESTIMATED_FINISH_TIME + rank;
        }

        let estimate = now + (full_distance - distance) / average_speed;
        if estimate > MAX_ESTIMATED_FINISH_TIME || !estimate.is_finite() {
            MAX_ESTIMATED_FINISH_TIME + rank
        } else {
            estimate
        }
    }

    /// Estimate every racing kart. Estimates grow strictly with rank.
    pub fn estimate_finish_times(&mut self) {
        let step = self.config.tick_duration();
        let mut previous: Option<f32> = None;

        for k in self.racing_by_rank() {
            let mut estimate = self.estimate_finish_time_for_kart(KartId(k as u8));
            if let Some(p) = previous {
                if estimate <= p {
                    estimate = p + step;
                }
            }
            self.infos[k].estimated_finish_time = estimate;
            previous = Some(estimate);
        }
    }

    // =========================================================================
    // WRONG WAY
    // =========================================================================

    /// Raise or clear the wrong-way warning of every racing kart.
    pub fn update_wrong_way(&mut self, graph: &DriveGraph, previous: &[Transform], current: &[Transform]) {
        let limit = self.config.wrong_way_angle_deg * PI / 180.0;

        for k in 0..self.infos.len() {
            if !self.infos[k].is_racing() {
                continue;
            }
            let (Some(prev), Some(curr)) = (previous.get(k), current.get(k)) else {
                continue;
            };
            let Some(node) = self.sectors[k].current_node() else {
                continue;
            };
            let node = graph.node(node);
            if node.successors().is_empty() {
                continue;
            }

            let off = normalize_angle(curr.heading - node.angle_to_successor(0)).abs();
            let moving = (curr.origin - prev.origin).dot(curr.forward()) > 0.0;

            let info = &mut self.infos[k];
            if off > limit && moving {
                info.wrong_way_ticks = info.wrong_way_ticks.saturating_add(1);
            } else {
                info.wrong_way_ticks = 0;
            }

            let wrong_way = info.wrong_way_ticks > self.config.wrong_way_delay_ticks;
            if wrong_way != info.wrong_way {
                info.wrong_way = wrong_way;
                self.push_event(RaceEvent::for_kart(
                    self.tick,
                    KartId(k as u8),
                    RaceEventData::WrongWay { active: wrong_way },
                ));
            }
        }
    }

    // =========================================================================
    // RESCUE
    // =========================================================================

    /// Put `kart` back on its last valid node and return the pose to
    /// teleport it to.
    pub fn rescue_kart(&mut self, kart: KartId, graph: &DriveGraph, checks: &CheckManager) -> Transform {
        let k = kart.index();
        let node = self.sectors[k].rescue_node();
        self.sectors[k].rescue(graph, node);
        if self.infos[k].is_racing() {
            self.refresh_overall_distance(k, checks);
        }
        graph.get_rescue_transform(node)
    }

    // =========================================================================
    // REPLICATION
    // =========================================================================

    /// Take a lap count from the authority.
    pub fn apply_lap_count(&mut self, kart: KartId, laps: i32, checks: &CheckManager) {
        let k = kart.index();
        if k >= self.infos.len() || !self.infos[k].is_racing() {
            return;
        }
        let increased = laps > self.infos[k].finished_laps;
        self.infos[k].finished_laps = laps;
        if increased {
            self.infos[k].tick_at_last_lap = self.tick;
            self.infos[k].lap_start_tick = self.tick;
        }
        self.refresh_overall_distance(k, checks);
        if increased {
            self.push_lap_events(kart);
        }
    }

    /// Take the fastest lap from the authority.
    pub fn apply_fastest_lap(&mut self, kart: KartId, ticks: u32, holder: &str) {
        if ticks == self.fastest_lap_ticks && holder == self.fastest_lap_holder {
            return;
        }
        if ticks == NO_FASTEST_LAP {
            self.fastest_lap_ticks = NO_FASTEST_LAP;
            self.fastest_lap_holder.clear();
        } else {
            self.set_fastest_lap(kart, ticks, holder.to_string());
        }
    }

    /// Overwrite the complete progress state (snapshot).
    pub(crate) fn restore(
        &mut self,
        tick: u32,
        fastest_lap: (u32, String),
        distance_increase: f32,
        infos: Vec<KartProgressInfo>,
        sectors: Vec<TrackSector>,
    ) {
        self.tick = tick;
        self.fastest_lap_ticks = fastest_lap.0;
        self.fastest_lap_holder = fastest_lap.1;
        self.distance_increase = distance_increase;
        self.infos = infos;
        self.sectors = sectors;
        self.pending_finishers.clear();
    }

    /// Feed the complete progress state into `hasher`.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.tick);
        hasher.update_u32(self.fastest_lap_ticks);
        hasher.update_str(&self.fastest_lap_holder);
        hasher.update_f32(self.distance_increase);
        for (info, sector) in self.infos.iter().zip(&self.sectors) {
            info.hash_into(hasher);
            hasher.update_opt_index(sector.current_node());
            hasher.update_opt_index(sector.last_valid_node());
            hasher.update_bool(sector.is_on_road());
            hasher.update_f32(sector.distance_to_center());
            hasher.update_f32(sector.distance_from_start());
            hasher.update_opt_index(sector.last_triggered_checkline());
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    pub(crate) fn push_event(&mut self, event: RaceEvent) {
        self.events.push(event);
    }

    /// Drain events produced since the last call.
    pub fn take_events(&mut self) -> Vec<RaceEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current tick.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Race time in seconds.
    pub fn time(&self) -> f32 {
        self.config.tick_to_time(self.tick)
    }

    /// Race rules.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Number of karts.
    pub fn num_karts(&self) -> usize {
        self.karts.len()
    }

    /// Kart table.
    pub fn karts(&self) -> &[Kart] {
        &self.karts
    }

    /// Progress of one kart.
    pub fn info(&self, kart: KartId) -> &KartProgressInfo {
        &self.infos[kart.index()]
    }

    /// Progress of every kart.
    pub fn infos(&self) -> &[KartProgressInfo] {
        &self.infos
    }

    /// Track sector of one kart.
    pub fn sector(&self, kart: KartId) -> &TrackSector {
        &self.sectors[kart.index()]
    }

    /// Track sectors of every kart.
    pub fn sectors(&self) -> &[TrackSector] {
        &self.sectors
    }

    /// Distance from the start node along the track.
    pub fn get_distance_down_track(&self, kart: KartId) -> f32 {
        self.sectors[kart.index()].distance_from_start()
    }

    /// Signed distance to the centre line (right positive).
    pub fn get_distance_to_center(&self, kart: KartId) -> f32 {
        self.sectors[kart.index()].distance_to_center()
    }

    /// Laps completed.
    pub fn get_lap(&self, kart: KartId) -> i32 {
        self.infos[kart.index()].finished_laps
    }

    /// Overall distance.
    pub fn get_overall_distance(&self, kart: KartId) -> f32 {
        self.infos[kart.index()].overall_distance
    }

    /// Estimated race time in seconds.
    pub fn get_estimated_finish_time(&self, kart: KartId) -> f32 {
        self.infos[kart.index()].estimated_finish_time
    }

    /// Node to rescue the kart to.
    pub fn get_rescue_position_index(&self, kart: KartId) -> usize {
        self.sectors[kart.index()].rescue_node()
    }

    /// Rank, 1 is the leader.
    pub fn get_rank(&self, kart: KartId) -> u8 {
        self.infos[kart.index()].rank
    }

    /// Fastest lap in ticks and its holder.
    pub fn get_fastest_lap(&self) -> Option<(u32, &str)> {
        (self.fastest_lap_ticks != NO_FASTEST_LAP)
            .then(|| (self.fastest_lap_ticks, self.fastest_lap_holder.as_str()))
    }

    /// Fastest lap in ticks, [`NO_FASTEST_LAP`] when none.
    pub fn fastest_lap_ticks(&self) -> u32 {
        self.fastest_lap_ticks
    }

    /// Fastest lap holder, empty when none.
    pub fn fastest_lap_holder(&self) -> &str {
        &self.fastest_lap_holder
    }

    /// Offset added to every distance by the estimator.
    pub fn distance_increase(&self) -> f32 {
        self.distance_increase
    }
}

/// Distance of the lap line's midpoint down the track, in
/// `(-lap_length / 2, lap_length / 2]`. Zero without a line-shaped lap line.
fn lap_line_offset(graph: &DriveGraph, checks: &CheckManager) -> f32 {
    let Some(index) = checks.lap_line_index() else {
        return 0.0;
    };
    let CheckShape::Line { segment, min_height, .. } = checks.structure(index).shape() else {
        return 0.0;
    };

    let mid = (segment.start + segment.end) * 0.5;
    let mut sector = TrackSector::new();
    sector.update(graph, Vec3::new(mid.x, *min_height, mid.y));

    let distance = sector.distance_from_start();
    let lap_length = graph.lap_length();
    if distance > lap_length * 0.5 {
        distance - lap_length
    } else {
        distance
    }
}

// =============================================================================
// TESTS
// =============================================================================
