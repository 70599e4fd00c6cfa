//! Replication Messages
//!
//! Messages from the authority to replicas and back. Incremental events
//! use a compact hand-written big-endian layout; full snapshots are
//! serialized with bincode.
//!
//! ## Check-line event
//!
//! ```text
//! u8   tag (MSG_CHECK_LINE)
//! u8   kart id
//! i8   finished laps
//! i8   last triggered check line (-1 = none)
//! u32  fastest lap ticks (u32::MAX = none)
//! u8   holder name length, then that many UTF-8 bytes
//! u8   structure count, then one byte (0 / 1) per structure
//! ```

use crate::race::kart::KartId;
use super::replication::ProgressSnapshot;

/// Check-line event tag.
pub const MSG_CHECK_LINE: u8 = 1;
/// Kart-finished event tag.
pub const MSG_KART_FINISHED: u8 = 2;
/// Full snapshot tag.
pub const MSG_SNAPSHOT: u8 = 3;
/// Snapshot request tag.
pub const MSG_SNAPSHOT_REQUEST: u8 = 4;

// =============================================================================
// ERRORS
// =============================================================================

/// Replication failures. Every one of them is answered with a snapshot
/// request.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Message ended early.
    #[error("Message truncated: {needed} more bytes needed")]
    Truncated {
        /// Missing byte count
        needed: usize,
    },

    /// Unknown message tag.
    #[error("Unknown message tag {0}")]
    UnknownMessage(u8),

    /// Structure count differs from the local track.
    #[error("Check structure count mismatch: got {got}, expected {expected}")]
    CheckCountMismatch {
        /// Count in the message
        got: usize,
        /// Local count
        expected: usize,
    },

    /// Kart count differs from the local race.
    #[error("Kart count mismatch: got {got}, expected {expected}")]
    KartCountMismatch {
        /// Count in the message
        got: usize,
        /// Local count
        expected: usize,
    },

    /// Kart id outside the race.
    #[error("Unknown kart {0}")]
    UnknownKart(u8),

    /// Holder name is not UTF-8.
    #[error("Invalid holder name: {0}")]
    InvalidName(#[from] std::string::FromUtf8Error),

    /// Byte sequence that cannot be a valid message, or a value that does
    /// not fit the layout.
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    /// Snapshot (de)serialization failed.
    #[error("Snapshot encoding failed: {0}")]
    Snapshot(#[from] bincode::Error),

    /// Snapshot from an incompatible version.
    #[error("Snapshot version {got}, expected {expected}")]
    VersionMismatch {
        /// Version in the snapshot
        got: u8,
        /// Local version
        expected: u8,
    },
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A kart crossed a check structure on the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckLineEvent {
    /// Kart that crossed
    pub kart: KartId,
    /// Laps completed after the crossing
    pub finished_laps: i32,
    /// Last check line crossed
    pub last_triggered_checkline: Option<usize>,
    /// Race fastest lap in ticks
    pub fastest_lap_ticks: u32,
    /// Race fastest lap holder
    pub fastest_lap_holder: String,
    /// Active bit of every structure for this kart
    pub check_states: Vec<bool>,
}

/// A kart finished on the authority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KartFinishedEvent {
    /// Kart that finished
    pub kart: KartId,
    /// Race time in seconds
    pub finish_time: f32,
}

/// Message between authority and replica.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationMessage {
    /// Incremental check-line update (authority to replica)
    CheckLine(CheckLineEvent),
    /// Kart finished (authority to replica)
    KartFinished(KartFinishedEvent),
    /// Complete state (authority to replica)
    Snapshot(Box<ProgressSnapshot>),
    /// Replica lost sync (replica to authority)
    SnapshotRequest,
}

impl ReplicationMessage {
    /// Encode for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplicationError> {
        let mut out = Vec::new();
        match self {
            ReplicationMessage::CheckLine(e) => {
                out.push(MSG_CHECK_LINE);
                out.push(e.kart.0);
                out.push(to_i8(e.finished_laps as i64, "lap count")? as u8);
                let last = e.last_triggered_checkline.map_or(-1, |c| c as i64);
                out.push(to_i8(last, "check line index")? as u8);
                out.extend_from_slice(&e.fastest_lap_ticks.to_be_bytes());

                let name = e.fastest_lap_holder.as_bytes();
                let len = u8::try_from(name.len()).map_err(|_| ReplicationError::Malformed("holder name too long"))?;
                out.push(len);
                out.extend_from_slice(name);

                let count = u8::try_from(e.check_states.len())
                    .map_err(|_| ReplicationError::Malformed("too many check structures"))?;
                out.push(count);
                out.extend(e.check_states.iter().map(|&b| b as u8));
            }
            ReplicationMessage::KartFinished(e) => {
                out.push(MSG_KART_FINISHED);
                out.push(e.kart.0);
                out.extend_from_slice(&e.finish_time.to_bits().to_be_bytes());
            }
            ReplicationMessage::Snapshot(s) => {
                out.push(MSG_SNAPSHOT);
                out.extend_from_slice(&s.to_bytes()?);
            }
            ReplicationMessage::SnapshotRequest => out.push(MSG_SNAPSHOT_REQUEST),
        }
        Ok(out)
    }

    /// Decode from the wire. The whole buffer must be consumed.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReplicationError> {
        let mut r = ByteReader::new(data);
        let message = match r.u8()? {
            MSG_CHECK_LINE => {
                let kart = KartId(r.u8()?);
                let finished_laps = r.i8()? as i32;
                let last = r.i8()?;
                let last_triggered_checkline = if last < 0 { None } else { Some(last as usize) };
                let fastest_lap_ticks = r.u32()?;
                let len = r.u8()? as usize;
                let fastest_lap_holder = String::from_utf8(r.take(len)?.to_vec())?;
                let count = r.u8()? as usize;
                let check_states = r
                    .take(count)?
                    .iter()
                    .map(|&b| match b {
                        0 => Ok(false),
                        1 => Ok(true),
                        _ => Err(ReplicationError::Malformed("check state byte")),
                    })
                    .collect::<Result<Vec<bool>, _>>()?;
                ReplicationMessage::CheckLine(CheckLineEvent {
                    kart,
                    finished_laps,
                    last_triggered_checkline,
                    fastest_lap_ticks,
                    fastest_lap_holder,
                    check_states,
                })
            }
            MSG_KART_FINISHED => {
                let kart = KartId(r.u8()?);
                let finish_time = f32::from_bits(r.u32()?);
                ReplicationMessage::KartFinished(KartFinishedEvent { kart, finish_time })
            }
            MSG_SNAPSHOT => {
                let rest = r.take(r.remaining())?;
                ReplicationMessage::Snapshot(Box::new(ProgressSnapshot::from_bytes(rest)?))
            }
            MSG_SNAPSHOT_REQUEST => ReplicationMessage::SnapshotRequest,
            tag => return Err(ReplicationError::UnknownMessage(tag)),
        };

        if r.remaining() != 0 {
            return Err(ReplicationError::Malformed("trailing bytes"));
        }
        Ok(message)
    }
}

fn to_i8(value: i64, what: &'static str) -> Result<i8, ReplicationError> {
    i8::try_from(value).map_err(|_| ReplicationError::Malformed(what))
}

/// Cursor over a received buffer.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReplicationError> {
        if self.remaining() < n {
            return Err(ReplicationError::Truncated { needed: n - self.remaining() });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ReplicationError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, ReplicationError> {
        Ok(self.u8()? as i8)
    }

    fn u32(&mut self) -> Result<u32, ReplicationError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// =============================================================================
// TESTS
// =============================================================================
