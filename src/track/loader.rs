//! Track Description Loader
//!
//! Reads a track from JSON: the quads that make up the drive graph, an
//! optional edge list, optional height testing bounds and the check
//! structures.
//!
//! ```text
//! {
//!   "name": "strip",
//!   "quads": [
//!     { "p0": [-2, 0, 0], "p1": [2, 0, 0], "p2": [2, 0, 10], "p3": [-2, 0, 10] },
//!     { "p0": "0:3", "p1": "0:2", "p2": [2, 0, 20], "p3": [-2, 0, 20] }
//!   ],
//!   "graph": [ { "type": "edge-loop", "from": 0, "to": 1 } ],
//!   "checks": [ { "type": "check-line", "kind": "new-lap", "p1": [-3, 0, 0], "p2": [3, 0, 0] } ]
//! }
//! ```
//!
//! A corner may be given as `"n:p"`, meaning corner `p` of quad `n`.
//! Malformed quads, edges and unknown check types are skipped with a
//! warning; later indices shift accordingly.

use std::f32::consts::PI;
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::checks::{CheckKind, CheckManager, CheckShape, CheckStructure};
use crate::core::vec3::Vec3;
use super::drive_graph::{DriveGraph, EdgeSpec, GraphConfig, TrackLoadError};
use super::drive_node::{NodeSpec, TravelDirection};

const KNOWN_CHECK_TYPES: &[&str] = &[
    "check-line",
    "check-lap",
    "check-sphere",
    "goal",
    "cannon",
    "check-trigger",
];

// =============================================================================
// DESCRIPTION
// =============================================================================

/// Raw JSON track description. Entries are kept as JSON values so each
/// one can be validated on its own.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackDescription {
    /// Track name
    pub name: String,
    /// Node quads
    pub quads: Vec<serde_json::Value>,
    /// Height band override
    pub height_testing: Option<HeightTesting>,
    /// Edge list; default successors when absent
    pub graph: Option<Vec<serde_json::Value>>,
    /// Check structures
    pub checks: Vec<serde_json::Value>,
}

/// Height band around quads that still counts as on the quad.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightTesting {
    /// Below the lowest corner
    pub min: f32,
    /// Above the highest corner
    pub max: f32,
}

/// A corner: literal coordinates or a reference to another quad's corner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointSpec {
    /// `[x, y, z]`
    Coords([f32; 3]),
    /// `"quad:corner"`
    Reference(String),
}

#[derive(Clone, Debug, Deserialize)]
struct QuadSpec {
    p0: PointSpec,
    p1: PointSpec,
    p2: PointSpec,
    p3: PointSpec,
    #[serde(default)]
    invisible: bool,
    #[serde(default)]
    ai_ignore: bool,
    #[serde(default)]
    direction: TravelDirection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum GateKind {
    NewLap,
    Activate,
    Toggle,
}

impl From<GateKind> for CheckKind {
    fn from(kind: GateKind) -> Self {
        match kind {
            GateKind::NewLap => CheckKind::NewLap,
            GateKind::Activate => CheckKind::Activate,
            GateKind::Toggle => CheckKind::Toggle,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CheckLinks {
    #[serde(default)]
    other_ids: Vec<usize>,
    #[serde(default)]
    same_group: Vec<usize>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    ignore_height: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum CheckSpec {
    CheckLine {
        kind: GateKind,
        p1: [f32; 3],
        p2: [f32; 3],
        #[serde(flatten)]
        links: CheckLinks,
    },
    CheckLap {
        #[serde(flatten)]
        links: CheckLinks,
    },
    CheckSphere {
        kind: GateKind,
        center: [f32; 3],
        radius: f32,
        #[serde(flatten)]
        links: CheckLinks,
    },
    Goal {
        p1: [f32; 3],
        p2: [f32; 3],
        #[serde(default, rename = "first-goal")]
        first_goal: bool,
        #[serde(flatten)]
        links: CheckLinks,
    },
    Cannon {
        p1: [f32; 3],
        p2: [f32; 3],
        #[serde(rename = "target-p1")]
        target_p1: [f32; 3],
        #[serde(rename = "target-p2")]
        target_p2: [f32; 3],
        speed: f32,
        #[serde(flatten)]
        links: CheckLinks,
    },
    CheckTrigger {
        center: [f32; 3],
        radius: f32,
        action: String,
        #[serde(flatten)]
        links: CheckLinks,
    },
}

fn vec3(p: [f32; 3]) -> Vec3 {
    Vec3::new(p[0], p[1], p[2])
}

impl CheckSpec {
    fn into_structure(self) -> CheckStructure {
        let (kind, shape, links) = match self {
            CheckSpec::CheckLine { kind, p1, p2, links } => {
                let shape = CheckShape::line(vec3(p1), vec3(p2), links.ignore_height);
                (kind.into(), shape, links)
            }
            CheckSpec::CheckLap { links } => (CheckKind::NewLap, CheckShape::Lap, links),
            CheckSpec::CheckSphere { kind, center, radius, links } => {
                (kind.into(), CheckShape::sphere(vec3(center), radius), links)
            }
            CheckSpec::Goal { p1, p2, first_goal, links } => {
                let shape = CheckShape::line(vec3(p1), vec3(p2), links.ignore_height);
                (CheckKind::Goal { first_goal }, shape, links)
            }
            CheckSpec::Cannon { p1, p2, target_p1, target_p2, speed, links } => {
                let shape = CheckShape::line(vec3(p1), vec3(p2), links.ignore_height);
                let kind = CheckKind::Cannon {
                    target_left: vec3(target_p1),
                    target_right: vec3(target_p2),
                    speed,
                };
                (kind, shape, links)
            }
            CheckSpec::CheckTrigger { center, radius, action, links } => {
                (CheckKind::Trigger { action }, CheckShape::sphere(vec3(center), radius), links)
            }
        };

        CheckStructure::new(kind, shape)
            .with_dependents(links.other_ids)
            .with_same_group(links.same_group)
            .with_active_at_reset(links.active)
    }
}

// =============================================================================
// PARSING
// =============================================================================

impl TrackDescription {
    /// Parse the JSON text of a track description.
    pub fn from_json(json: &str) -> Result<Self, TrackLoadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Node specs for every well-formed quad.
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        let mut specs: Vec<NodeSpec> = Vec::with_capacity(self.quads.len());

        for (index, value) in self.quads.iter().enumerate() {
            let quad: QuadSpec = match serde_json::from_value(value.clone()) {
                Ok(q) => q,
                Err(e) => {
                    warn!("Quad {} is malformed ({}), skipped", index, e);
                    continue;
                }
            };

            let corners = [&quad.p0, &quad.p1, &quad.p2, &quad.p3]
                .into_iter()
                .map(|p| resolve_point(p, &specs))
                .collect::<Result<Vec<Vec3>, String>>();

            match corners {
                Ok(c) => specs.push(NodeSpec {
                    corners: [c[0], c[1], c[2], c[3]],
                    invisible: quad.invisible,
                    ai_ignore: quad.ai_ignore,
                    direction: quad.direction,
                }),
                Err(reason) => warn!("Quad {}: {}, skipped", index, reason),
            }
        }

        specs
    }

    /// Edge list, or `None` when the description has no graph section.
    pub fn edge_specs(&self) -> Option<Vec<EdgeSpec>> {
        let entries = self.graph.as_ref()?;
        let edges = entries
            .iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value.clone()) {
                Ok(edge) => Some(edge),
                Err(e) => {
                    warn!("Unknown graph entry {} ({}), ignored", index, e);
                    None
                }
            })
            .collect();
        Some(edges)
    }

    /// Check structures in file order. Unknown types are skipped.
    pub fn check_structures(&self) -> Result<Vec<CheckStructure>, TrackLoadError> {
        let mut structures = Vec::with_capacity(self.checks.len());

        for (index, value) in self.checks.iter().enumerate() {
            let ty = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
            if !KNOWN_CHECK_TYPES.contains(&ty) {
                warn!("Unknown check structure '{}' at {}, ignored", ty, index);
                continue;
            }
            let spec: CheckSpec = serde_json::from_value(value.clone())
                .map_err(|e| TrackLoadError::InvalidCheck { index, reason: e.to_string() })?;
            structures.push(spec.into_structure());
        }

        Ok(structures)
    }

    /// Graph config with the description's height band applied.
    pub fn graph_config(&self, base: &GraphConfig) -> GraphConfig {
        let mut config = base.clone();
        if let Some(h) = self.height_testing {
            config.min_height_testing = h.min;
            config.max_height_testing = h.max;
        }
        config
    }
}

fn resolve_point(point: &PointSpec, earlier: &[NodeSpec]) -> Result<Vec3, String> {
    match point {
        PointSpec::Coords(p) => Ok(vec3(*p)),
        PointSpec::Reference(r) => {
            let (quad, corner) = r
                .split_once(':')
                .ok_or_else(|| format!("bad corner reference '{}'", r))?;
            let quad: usize = quad.trim().parse().map_err(|_| format!("bad quad in '{}'", r))?;
            let corner: usize = corner.trim().parse().map_err(|_| format!("bad corner in '{}'", r))?;
            match earlier.get(quad) {
                Some(spec) if corner < 4 => Ok(spec.corners[corner]),
                _ => Err(format!("reference '{}' does not name an earlier quad corner", r)),
            }
        }
    }
}

// =============================================================================
// TRACK
// =============================================================================

/// A loaded track: the shared drive graph and the check structures.
#[derive(Clone, Debug)]
pub struct Track {
    /// Track name
    pub name: String,
    /// Immutable drive graph
    pub graph: Arc<DriveGraph>,
    /// Check structures (template; each session clones and resets them)
    pub checks: CheckManager,
}

impl Track {
    /// Load a track from JSON text.
    pub fn from_json(json: &str, config: &GraphConfig) -> Result<Self, TrackLoadError> {
        let description = TrackDescription::from_json(json)?;
        Self::from_description(&description, config)
    }

    /// Build a track from a parsed description.
    pub fn from_description(
        description: &TrackDescription,
        config: &GraphConfig,
    ) -> Result<Self, TrackLoadError> {
        let specs = description.node_specs();
        let edges = description.edge_specs();
        let graph = DriveGraph::load(&specs, edges.as_deref(), &description.graph_config(config))?;

        let structures = description.check_structures()?;
        let checks = if structures.is_empty() {
            None
        } else {
            Some(CheckManager::new(structures)?)
        };

        let track = Self::from_parts(description.name.clone(), graph, checks);
        info!(
            "Track '{}' loaded: {} nodes, {} check structures",
            track.name,
            track.graph.num_nodes(),
            track.checks.num_structures()
        );
        Ok(track)
    }

    /// Combine a graph with check structures (default ones when `None`)
    /// and record the check-line requirement of every node.
    pub fn from_parts(name: String, mut graph: DriveGraph, checks: Option<CheckManager>) -> Self {
        let checks = checks.unwrap_or_else(|| {
            info!("No check structures, using the default lap line");
            CheckManager::default_for_graph(&graph)
        });
        graph.compute_checkline_requirements(checks.lap_line_index(), |from, to| {
            checks.get_checkline_triggering(from, to)
        });

        Self { name, graph: Arc::new(graph), checks }
    }

    /// Circular track of `segments` quads around the origin, driven
    /// counter-clockwise seen from above, with default checks.
    pub fn ring(segments: usize, radius: f32, width: f32, config: &GraphConfig) -> Result<Self, TrackLoadError> {
        let graph = DriveGraph::load(&ring_specs(segments, radius, width), None, config)?;
        Ok(Self::from_parts(format!("ring-{}", segments), graph, None))
    }
}

/// Quads of a ring track. Node `i` starts at angle `2 PI i / segments`;
/// corner `p0` is on the outside.
pub fn ring_specs(segments: usize, radius: f32, width: f32) -> Vec<NodeSpec> {
    let h = width * 0.5;
    let point = |i: usize| {
        let angle = 2.0 * PI * (i % segments.max(1)) as f32 / segments.max(1) as f32;
        let outward = Vec3::new(angle.cos(), 0.0, angle.sin());
        (outward * radius, outward)
    };

    (0..segments)
        .map(|i| {
            let (a, out_a) = point(i);
            let (b, out_b) = point(i + 1);
            NodeSpec::new([a + out_a * h, a - out_a * h, b - out_b * h, b + out_b * h])
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
