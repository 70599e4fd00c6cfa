//! Track model.
//!
//! The drive graph built from the track's quads, per-kart track sectors
//! and the JSON track description loader.

pub mod drive_node;
pub mod drive_graph;
pub mod sector;
pub mod loader;

pub use drive_node::{DriveNode, NodeSpec, TravelDirection, Direction, DirectionData};
pub use drive_graph::{DriveGraph, EdgeSpec, GraphConfig, StartGridConfig, TrackLoadError};
pub use sector::TrackSector;
pub use loader::{Track, TrackDescription};
