//! Race Progress Demo Server
//!
//! Runs an authority and a replica of the same race on a ring track as
//! two tasks. Kart poses come from a simple scripted driver; the
//! authority's replication messages travel to the replica as bytes, and
//! the state hashes of both sides are compared every tick.

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use race_progress::{
    core::hash::StateHash,
    race::RaceEventData,
    track::GraphConfig,
    Kart, KartFrame, ReplicationMessage, RaceSession, SessionConfig, SessionRole, Track,
    Transform, Vec3, TICK_RATE, VERSION,
};

/// Upper bound on the demo length (3 minutes).
const MAX_TICKS: u32 = 3 * 60 * TICK_RATE;

const RING_SEGMENTS: usize = 32;
const RING_RADIUS: f32 = 40.0;
const RING_WIDTH: f32 = 8.0;

/// One tick worth of input for the replica.
struct TickPacket {
    frames: Vec<KartFrame>,
    messages: Vec<Vec<u8>>,
}

/// Drives a kart around the ring at a constant speed.
struct ScriptedDriver {
    angle: f32,
    radius: f32,
    speed: f32,
}

impl ScriptedDriver {
    fn starting_at(origin: Vec3, speed: f32) -> Self {
        Self {
            angle: origin.z.atan2(origin.x),
            radius: (origin.x * origin.x + origin.z * origin.z).sqrt(),
            speed,
        }
    }

    fn step(&mut self, dt: f32) -> KartFrame {
        self.angle += self.speed * dt / self.radius;
        let (sin, cos) = self.angle.sin_cos();
        let origin = Vec3::new(self.radius * cos, 0.0, self.radius * sin);
        let heading = Vec3::new(-sin, 0.0, cos).heading();
        KartFrame::racing(Transform::new(origin, heading))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Race Progress Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    let track = Track::ring(RING_SEGMENTS, RING_RADIUS, RING_WIDTH, &GraphConfig::default())?;
    let karts: Vec<Kart> = ["tux", "gnu", "beastie", "wilber"]
        .iter()
        .enumerate()
        .map(|(i, name)| Kart::new(i as u8, *name, i as u8))
        .collect();
    let config = SessionConfig::default();

    let (tx, rx) = mpsc::channel::<TickPacket>(256);
    let replica = tokio::spawn(run_replica(track.clone(), karts.clone(), config.clone(), rx));

    let authority_hashes = run_authority(&track, karts, config, tx).await?;
    let replica_hashes = replica.await.context("Replica task panicked")??;

    info!("=== Verifying Replication ===");
    let mismatches = authority_hashes
        .iter()
        .zip(&replica_hashes)
        .filter(|(a, r)| a != r)
        .count();

    if let (Some(a), Some(r)) = (authority_hashes.last(), replica_hashes.last()) {
        info!("Authority State Hash: {}", hex::encode(a));
        info!("Replica State Hash:   {}", hex::encode(r));
    }

    if mismatches == 0 && authority_hashes.len() == replica_hashes.len() {
        info!("REPLICATION VERIFIED: {} ticks, hashes match", authority_hashes.len());
    } else {
        warn!("REPLICATION FAILURE: {} of {} ticks differ", mismatches, authority_hashes.len());
    }

    Ok(())
}

async fn run_authority(
    track: &Track,
    karts: Vec<Kart>,
    config: SessionConfig,
    tx: mpsc::Sender<TickPacket>,
) -> anyhow::Result<Vec<StateHash>> {
    let dt = config.race.tick_duration();
    let mut session = RaceSession::new(SessionRole::Authority, track, karts, config)?;

    let mut drivers: Vec<ScriptedDriver> = session
        .transforms()
        .iter()
        .enumerate()
        .map(|(k, t)| ScriptedDriver::starting_at(t.origin, 22.0 - 1.5 * k as f32))
        .collect();

    let mut hashes = Vec::new();
    info!("=== Starting Demo Race ===");

    while session.current_tick() < MAX_TICKS {
        let frames: Vec<KartFrame> = drivers.iter_mut().map(|d| d.step(dt)).collect();
        let result = session.tick(&frames, &[])?;

        for event in &result.events {
            let name = event
                .kart
                .map(|k| session.tracker().karts()[k.index()].name.as_str())
                .unwrap_or("race");
            match &event.data {
                RaceEventData::LapCompleted { finished_laps } => {
                    info!("Tick {}: {} completed lap {}", event.tick, name, finished_laps)
                }
                RaceEventData::FinalLap => info!("Tick {}: {} on the final lap", event.tick, name),
                RaceEventData::NewFastestLap { seconds, .. } => {
                    info!("Tick {}: {} set the fastest lap, {:.3}s", event.tick, name, seconds)
                }
                RaceEventData::KartFinished { time, rank } => {
                    info!("Tick {}: {} finished #{} in {:.3}s", event.tick, name, rank, time)
                }
                _ => {}
            }
        }

        let messages = result
            .outgoing
            .iter()
            .map(ReplicationMessage::to_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        tx.send(TickPacket { frames, messages })
            .await
            .context("Replica channel closed")?;
        hashes.push(session.compute_hash());

        if result.race_over {
            break;
        }
    }

    info!("=== Race Results ===");
    for kart in session.tracker().karts() {
        let info = session.info(kart.id);
        info!(
            "#{}: {} - laps {}, time {:.3}s",
            info.rank, kart.name, info.finished_laps, info.finish_time
        );
    }
    if let Some((ticks, holder)) = session.tracker().get_fastest_lap() {
        info!("Fastest lap: {} in {:.3}s", holder, session.config().race.tick_to_time(ticks));
    }

    Ok(hashes)
}

async fn run_replica(
    track: Track,
    karts: Vec<Kart>,
    config: SessionConfig,
    mut rx: mpsc::Receiver<TickPacket>,
) -> anyhow::Result<Vec<StateHash>> {
    let mut session = RaceSession::new(SessionRole::Replica, &track, karts, config)?;
    let mut hashes = Vec::new();

    while let Some(packet) = rx.recv().await {
        let mut inbound = Vec::with_capacity(packet.messages.len());
        for bytes in &packet.messages {
            match ReplicationMessage::from_bytes(bytes) {
                Ok(message) => inbound.push(message),
                Err(e) => warn!("Dropping undecodable message: {}", e),
            }
        }

        let result = session.tick(&packet.frames, &inbound)?;
        if result.needs_snapshot {
            warn!("Replica out of sync at tick {}", result.tick);
        }
        hashes.push(session.compute_hash());
    }

    Ok(hashes)
}
