//! Check structures.
//!
//! Lap lines, activation gates and other trigger volumes, with the
//! per-kart active bits that decide which of them can fire.

pub mod structure;
pub mod manager;

pub use structure::{CheckKind, CheckShape, CheckStructure, Crossing};
pub use manager::{CheckManager, CheckTrigger};
