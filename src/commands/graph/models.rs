use geo::{Coord, LineString, Polygon};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FeatureId(pub i64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObstacleId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellId {
    pub col: i32,
    pub row: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FeatureKind {
    Lake,
    River,
    Stream,
    Reservoir,
    Canal,
    Other,
}

impl FeatureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKind::Lake => "lake",
            FeatureKind::River => "river",
            FeatureKind::Stream => "stream",
            FeatureKind::Reservoir => "reservoir",
            FeatureKind::Canal => "canal",
            FeatureKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> FeatureKind {
        match s {
            "lake" => FeatureKind::Lake,
            "river" => FeatureKind::River,
            "stream" => FeatureKind::Stream,
            "reservoir" => FeatureKind::Reservoir,
            "canal" => FeatureKind::Canal,
            _ => FeatureKind::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FeatureGeometry {
    Polygon(Polygon<f64>),
    Polyline(LineString<f64>),
}

#[derive(Clone, Debug)]
pub struct WaterFeature {
    pub id: FeatureId,
    pub kind: FeatureKind,
    pub name: Option<String>,
    pub geometry: FeatureGeometry,
}

/// Merged, simplified, clipped water polygon. Created once by the resolver
/// and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct WaterObstacle {
    pub id: ObstacleId,
    pub polygon: Polygon<f64>,
    pub area: f64,
    pub min_crossability: f64,
    pub source_features: Vec<FeatureId>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CellClass {
    Land,
    Boundary,
    WaterWithLand,
    Water,
}

impl CellClass {
    pub fn as_str(self) -> &'static str {
        match self {
            CellClass::Land => "land",
            CellClass::Boundary => "boundary",
            CellClass::WaterWithLand => "water_with_land",
            CellClass::Water => "water",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HexCell {
    pub id: CellId,
    pub center: Coord<f64>,
    pub polygon: Polygon<f64>,
    pub class: CellClass,
}

/// Land-only fragment inside a WaterWithLand cell.
#[derive(Clone, Debug)]
pub struct LandPortion {
    pub cell_id: CellId,
    pub index: usize,
    pub polygon: Polygon<f64>,
    pub area: f64,
    pub anchor: Coord<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeKind {
    Land,
    Boundary,
    LandPortion,
    WaterBoundary,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Land => "land",
            NodeKind::Boundary => "boundary",
            NodeKind::LandPortion => "land_portion",
            NodeKind::WaterBoundary => "water_boundary",
        }
    }

    pub fn parse(s: &str) -> Option<NodeKind> {
        match s {
            "land" => Some(NodeKind::Land),
            "boundary" => Some(NodeKind::Boundary),
            "land_portion" => Some(NodeKind::LandPortion),
            "water_boundary" => Some(NodeKind::WaterBoundary),
            _ => None,
        }
    }
}

/// Graph node. `obstacle`, `ring`, `arc_pos` and `tangent` are populated for
/// water-boundary nodes only: `ring` is 0 for the obstacle's exterior ring
/// and counts hole shorelines from 1, `arc_pos` is the normalized position
/// along that ring and `tangent` the local boundary direction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub x: f64,
    pub y: f64,
    pub obstacle: Option<ObstacleId>,
    pub ring: Option<usize>,
    pub arc_pos: Option<f64>,
    pub tangent: Option<[f64; 2]>,
}

impl Node {
    pub fn position(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EdgeKind {
    LandLand,
    LandBoundary,
    BoundaryBoundary,
    BoundaryWater,
    WaterPerimeter,
    Repair,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::LandLand => "land_land",
            EdgeKind::LandBoundary => "land_boundary",
            EdgeKind::BoundaryBoundary => "boundary_boundary",
            EdgeKind::BoundaryWater => "boundary_water",
            EdgeKind::WaterPerimeter => "water_perimeter",
            EdgeKind::Repair => "repair",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeKind> {
        match s {
            "land_land" => Some(EdgeKind::LandLand),
            "land_boundary" => Some(EdgeKind::LandBoundary),
            "boundary_boundary" => Some(EdgeKind::BoundaryBoundary),
            "boundary_water" => Some(EdgeKind::BoundaryWater),
            "water_perimeter" => Some(EdgeKind::WaterPerimeter),
            "repair" => Some(EdgeKind::Repair),
            _ => None,
        }
    }
}

/// Undirected edge stored once with ordered endpoint ids.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub length: f64,
    pub cost: f64,
    pub kind: EdgeKind,
    pub is_repair: bool,
}

impl Edge {
    /// Canonicalizes endpoint order so the reverse duplicate cannot exist.
    pub fn canonical(a: NodeId, b: NodeId, length: f64, cost: f64, kind: EdgeKind) -> Edge {
        let (source, target) = if a <= b { (a, b) } else { (b, a) };
        Edge {
            source,
            target,
            length,
            cost,
            kind,
            is_repair: kind == EdgeKind::Repair,
        }
    }

    pub fn key(&self) -> (NodeId, NodeId) {
        (self.source, self.target)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Per-stage counters surfaced to logging and persisted as `diag_*` meta rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiagnosticsReport {
    pub features_loaded: usize,
    pub features_dropped: usize,
    pub obstacles: usize,
    pub obstacles_dropped_oversized: usize,
    pub cells_land: usize,
    pub cells_boundary: usize,
    pub cells_water_with_land: usize,
    pub cells_water: usize,
    pub portions_kept: usize,
    pub portions_dropped: usize,
    pub nodes_land: usize,
    pub nodes_boundary: usize,
    pub nodes_land_portion: usize,
    pub nodes_water_boundary: usize,
    pub edges_land_land: usize,
    pub edges_land_boundary: usize,
    pub edges_boundary_boundary: usize,
    pub edges_boundary_water: usize,
    pub edges_water_perimeter: usize,
    pub edges_repair: usize,
    pub connectivity_pre_pct: f64,
    pub connectivity_post_pct: f64,
}

impl DiagnosticsReport {
    pub fn node_total(&self) -> usize {
        self.nodes_land + self.nodes_boundary + self.nodes_land_portion + self.nodes_water_boundary
    }

    pub fn edge_total(&self) -> usize {
        self.edges_land_land
            + self.edges_land_boundary
            + self.edges_boundary_boundary
            + self.edges_boundary_water
            + self.edges_water_perimeter
            + self.edges_repair
    }

    pub fn meta_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("diag_features_loaded", self.features_loaded.to_string()),
            ("diag_features_dropped", self.features_dropped.to_string()),
            ("diag_obstacles", self.obstacles.to_string()),
            (
                "diag_obstacles_dropped_oversized",
                self.obstacles_dropped_oversized.to_string(),
            ),
            ("diag_cells_land", self.cells_land.to_string()),
            ("diag_cells_boundary", self.cells_boundary.to_string()),
            ("diag_cells_water_with_land", self.cells_water_with_land.to_string()),
            ("diag_cells_water", self.cells_water.to_string()),
            ("diag_portions_kept", self.portions_kept.to_string()),
            ("diag_portions_dropped", self.portions_dropped.to_string()),
            ("diag_nodes_land", self.nodes_land.to_string()),
            ("diag_nodes_boundary", self.nodes_boundary.to_string()),
            ("diag_nodes_land_portion", self.nodes_land_portion.to_string()),
            ("diag_nodes_water_boundary", self.nodes_water_boundary.to_string()),
            ("diag_edges_land_land", self.edges_land_land.to_string()),
            ("diag_edges_land_boundary", self.edges_land_boundary.to_string()),
            ("diag_edges_boundary_boundary", self.edges_boundary_boundary.to_string()),
            ("diag_edges_boundary_water", self.edges_boundary_water.to_string()),
            ("diag_edges_water_perimeter", self.edges_water_perimeter.to_string()),
            ("diag_edges_repair", self.edges_repair.to_string()),
            (
                "diag_connectivity_pre_pct",
                format!("{:.2}", self.connectivity_pre_pct),
            ),
            (
                "diag_connectivity_post_pct",
                format!("{:.2}", self.connectivity_post_pct),
            ),
        ]
    }
}
