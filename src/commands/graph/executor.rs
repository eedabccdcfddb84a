use anyhow::{anyhow, Result};

use super::assembler;
use super::config::GraphParams;
use super::connectivity;
use super::edge_builder;
use super::geometry::ObstacleIndex;
use super::grid_classifier::{self, ClassifyOutput};
use super::land_portions::{self, PortionOutput};
use super::models::{
    DiagnosticsReport, Edge, EdgeKind, Graph, Node, NodeKind, WaterFeature, WaterObstacle,
};
use super::node_generator;
use super::obstacle_resolver::{self, ResolveOutput};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Resolve,
    Classify,
    Portions,
    Nodes,
    Edges,
    Repair,
    Assemble,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Classify => "classify",
            Stage::Portions => "portions",
            Stage::Nodes => "nodes",
            Stage::Edges => "edges",
            Stage::Repair => "repair",
            Stage::Assemble => "assemble",
        }
    }

    pub fn all() -> &'static [Stage] {
        &[
            Stage::Resolve,
            Stage::Classify,
            Stage::Portions,
            Stage::Nodes,
            Stage::Edges,
            Stage::Repair,
            Stage::Assemble,
        ]
    }
}

fn banner(stage: Stage) {
    let total = Stage::all().len();
    let pos = Stage::all().iter().position(|s| *s == stage).unwrap_or(0) + 1;
    log::info!("stage {}/{}: {}", pos, total, stage.name());
}

/// Everything a build produces. Obstacles ride along so callers can persist
/// the set the graph's nodes refer to.
pub struct PipelineOutput {
    pub graph: Graph,
    pub diagnostics: DiagnosticsReport,
    pub obstacles: Vec<WaterObstacle>,
}

/// Runs every stage in order over in-memory artifacts. Each stage consumes
/// only finished outputs of the stages before it and never sees a later
/// stage's data, so a failed run leaves nothing half-written.
///
/// `undecodable` is the count of feature rows the loader had to skip; it is
/// folded into the dropped-feature diagnostics so the report covers the
/// whole input set, not just what survived decoding.
pub fn run_pipeline(
    features: &[WaterFeature],
    undecodable: usize,
    params: &GraphParams,
    extent: Option<(f64, f64, f64, f64)>,
) -> Result<PipelineOutput> {
    let mut diag = DiagnosticsReport::default();
    diag.features_loaded = features.len() + undecodable;
    diag.features_dropped = undecodable;

    banner(Stage::Resolve);
    let resolved = obstacle_resolver::resolve_obstacles(features, params, extent)?;
    validate_resolve(&resolved)?;
    diag.features_dropped += resolved.stats.features_dropped;
    diag.obstacles = resolved.stats.obstacles_out;
    diag.obstacles_dropped_oversized = resolved.stats.obstacles_dropped_oversized;

    let index = ObstacleIndex::build(&resolved.obstacles);

    banner(Stage::Classify);
    let classified = grid_classifier::classify_grid(&index, resolved.envelope, params)?;
    validate_classify(&classified)?;
    diag.cells_land = classified.stats.cells_land;
    diag.cells_boundary = classified.stats.cells_boundary;
    diag.cells_water_with_land = classified.stats.cells_water_with_land;
    diag.cells_water = classified.stats.cells_water;

    banner(Stage::Portions);
    let portions = land_portions::extract_land_portions(&classified.cells, &index, params)?;
    validate_portions(&portions, params)?;
    diag.portions_kept = portions.stats.portions_kept;
    diag.portions_dropped = portions.stats.portions_dropped;

    banner(Stage::Nodes);
    let node_out =
        node_generator::generate_nodes(&classified.grid, &classified.cells, &portions.portions, &index, params)?;
    validate_nodes(&node_out.nodes)?;

    banner(Stage::Edges);
    let edge_out = edge_builder::build_edges(&node_out.nodes, &index, params)?;
    validate_edges(&edge_out.edges)?;

    banner(Stage::Repair);
    let repaired = connectivity::repair_connectivity(&node_out.nodes, edge_out.edges, params)?;
    diag.connectivity_pre_pct = repaired.stats.pre_pct;
    diag.connectivity_post_pct = repaired.stats.post_pct;

    // Kind counters come from the final artifacts rather than stage stats;
    // the assembler cross-checks the totals against what it receives.
    tally_node_kinds(&mut diag, &node_out.nodes);
    tally_edge_kinds(&mut diag, &repaired.edges);

    banner(Stage::Assemble);
    let (graph, diagnostics) = assembler::assemble_graph(node_out.nodes, repaired.edges, diag)?;
    Ok(PipelineOutput {
        graph,
        diagnostics,
        obstacles: resolved.obstacles,
    })
}

fn validate_resolve(out: &ResolveOutput) -> Result<()> {
    if out.envelope.min().x >= out.envelope.max().x || out.envelope.min().y >= out.envelope.max().y {
        return Err(anyhow!("validate_resolve: degenerate envelope"));
    }
    let mut prev = 0u64;
    for ob in &out.obstacles {
        if ob.id.0 <= prev {
            return Err(anyhow!("validate_resolve: obstacle ids not ascending at {}", ob.id.0));
        }
        prev = ob.id.0;
        if ob.area <= 0.0 || !ob.area.is_finite() {
            return Err(anyhow!("validate_resolve: obstacle {} has area {}", ob.id.0, ob.area));
        }
        if !(0.0..=1.0).contains(&ob.min_crossability) {
            return Err(anyhow!(
                "validate_resolve: obstacle {} crossability {} outside [0,1]",
                ob.id.0,
                ob.min_crossability
            ));
        }
        if ob.source_features.is_empty() {
            return Err(anyhow!("validate_resolve: obstacle {} has no source features", ob.id.0));
        }
    }
    Ok(())
}

fn validate_classify(out: &ClassifyOutput) -> Result<()> {
    if out.cells.is_empty() {
        return Err(anyhow!("validate_classify: grid produced no cells"));
    }
    let s = &out.stats;
    let sum = s.cells_land + s.cells_boundary + s.cells_water_with_land + s.cells_water;
    if sum != out.cells.len() || s.cells_total != out.cells.len() {
        return Err(anyhow!(
            "validate_classify: class counts {} do not partition {} cells",
            sum,
            out.cells.len()
        ));
    }
    Ok(())
}

fn validate_portions(out: &PortionOutput, params: &GraphParams) -> Result<()> {
    for p in &out.portions {
        if p.area < params.min_portion_area {
            return Err(anyhow!(
                "validate_portions: kept fragment below minimum area ({} < {})",
                p.area,
                params.min_portion_area
            ));
        }
        if !p.anchor.x.is_finite() || !p.anchor.y.is_finite() {
            return Err(anyhow!("validate_portions: non-finite anchor in cell {:?}", p.cell_id));
        }
    }
    Ok(())
}

fn validate_nodes(nodes: &[Node]) -> Result<()> {
    if nodes.is_empty() {
        return Err(anyhow!("validate_nodes: no nodes generated"));
    }
    for (i, node) in nodes.iter().enumerate() {
        if node.id.0 != i as u64 {
            return Err(anyhow!("validate_nodes: id gap at position {} (id {})", i, node.id.0));
        }
        match node.kind {
            NodeKind::WaterBoundary => {
                if node.obstacle.is_none() || node.ring.is_none() || node.arc_pos.is_none() {
                    return Err(anyhow!("validate_nodes: water node {} missing perimeter fields", node.id.0));
                }
            }
            _ => {
                if node.obstacle.is_some() {
                    return Err(anyhow!("validate_nodes: land-side node {} carries an obstacle", node.id.0));
                }
            }
        }
    }
    Ok(())
}

fn validate_edges(edges: &[Edge]) -> Result<()> {
    for e in edges {
        if e.source >= e.target {
            return Err(anyhow!(
                "validate_edges: edge ({}, {}) not canonical",
                e.source.0,
                e.target.0
            ));
        }
        if !e.cost.is_finite() || e.cost <= 0.0 {
            return Err(anyhow!(
                "validate_edges: edge ({}, {}) has cost {}",
                e.source.0,
                e.target.0,
                e.cost
            ));
        }
    }
    Ok(())
}

fn tally_node_kinds(diag: &mut DiagnosticsReport, nodes: &[Node]) {
    for node in nodes {
        match node.kind {
            NodeKind::Land => diag.nodes_land += 1,
            NodeKind::Boundary => diag.nodes_boundary += 1,
            NodeKind::LandPortion => diag.nodes_land_portion += 1,
            NodeKind::WaterBoundary => diag.nodes_water_boundary += 1,
        }
    }
}

fn tally_edge_kinds(diag: &mut DiagnosticsReport, edges: &[Edge]) {
    for edge in edges {
        match edge.kind {
            EdgeKind::LandLand => diag.edges_land_land += 1,
            EdgeKind::LandBoundary => diag.edges_land_boundary += 1,
            EdgeKind::BoundaryBoundary => diag.edges_boundary_boundary += 1,
            EdgeKind::BoundaryWater => diag.edges_boundary_water += 1,
            EdgeKind::WaterPerimeter => diag.edges_water_perimeter += 1,
            EdgeKind::Repair => diag.edges_repair += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::graph::models::{FeatureGeometry, FeatureId, FeatureKind};
    use geo::{Coord, Polygon};
    use std::collections::{HashMap, HashSet, VecDeque};

    fn lake(id: i64, minx: f64, miny: f64, size: f64) -> WaterFeature {
        WaterFeature {
            id: FeatureId(id),
            kind: FeatureKind::Lake,
            name: None,
            geometry: FeatureGeometry::Polygon(Polygon::new(
                vec![
                    Coord { x: minx, y: miny },
                    Coord { x: minx + size, y: miny },
                    Coord { x: minx + size, y: miny + size },
                    Coord { x: minx, y: miny + size },
                    Coord { x: minx, y: miny },
                ]
                .into(),
                vec![],
            )),
        }
    }

    fn reaches_all(graph: &Graph) -> bool {
        let mut adj: HashMap<u64, Vec<u64>> = HashMap::new();
        for e in &graph.edges {
            adj.entry(e.source.0).or_default().push(e.target.0);
            adj.entry(e.target.0).or_default().push(e.source.0);
        }
        let Some(first) = graph.nodes.first() else {
            return false;
        };
        let mut seen: HashSet<u64> = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(first.id.0);
        queue.push_back(first.id.0);
        while let Some(v) = queue.pop_front() {
            for &n in adj.get(&v).map(|v| v.as_slice()).unwrap_or(&[]) {
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        seen.len() == graph.nodes.len()
    }

    #[test]
    fn pipeline_builds_connected_graph_over_single_lake() -> Result<()> {
        let features = vec![lake(1, 0.0, 0.0, 400.0)];
        let params = GraphParams::default();

        let out = run_pipeline(&features, 0, &params, None)?;
        let (graph, diag) = (&out.graph, &out.diagnostics);

        assert!(!graph.nodes.is_empty());
        assert!(!graph.edges.is_empty());
        assert_eq!(out.obstacles.len(), 1);
        assert_eq!(diag.features_loaded, 1);
        assert_eq!(diag.obstacles, 1);
        assert_eq!(diag.node_total(), graph.nodes.len());
        assert_eq!(diag.edge_total(), graph.edges.len());
        // Repair stage guarantees full reachability.
        assert_eq!(diag.connectivity_post_pct, 100.0);
        assert!(reaches_all(graph));
        // A lake this size must produce shore work for every node family
        // except LandPortion, which depends on fragment geometry.
        assert!(diag.nodes_land > 0);
        assert!(diag.nodes_boundary > 0);
        assert!(diag.nodes_water_boundary > 0);
        Ok(())
    }

    #[test]
    fn pipeline_counts_undecodable_rows_as_dropped() -> Result<()> {
        let features = vec![lake(3, 0.0, 0.0, 400.0)];
        let params = GraphParams::default();

        let out = run_pipeline(&features, 2, &params, None)?;

        assert_eq!(out.diagnostics.features_loaded, 3);
        assert!(out.diagnostics.features_dropped >= 2);
        Ok(())
    }

    #[test]
    fn pipeline_rejects_empty_input() {
        let params = GraphParams::default();
        let err = run_pipeline(&[], 0, &params, None);
        assert!(err.is_err());
    }

    #[test]
    fn pipeline_is_deterministic_across_runs() -> Result<()> {
        let features = vec![lake(1, 0.0, 0.0, 400.0), lake(2, 900.0, 150.0, 300.0)];
        let params = GraphParams::default();

        let a = run_pipeline(&features, 0, &params, None)?.graph;
        let b = run_pipeline(&features, 0, &params, None)?.graph;

        assert_eq!(a.nodes.len(), b.nodes.len());
        assert_eq!(a.edges.len(), b.edges.len());
        for (x, y) in a.nodes.iter().zip(&b.nodes) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.x.to_bits(), y.x.to_bits());
            assert_eq!(x.y.to_bits(), y.y.to_bits());
        }
        for (x, y) in a.edges.iter().zip(&b.edges) {
            assert_eq!(x.key(), y.key());
            assert_eq!(x.cost.to_bits(), y.cost.to_bits());
        }
        Ok(())
    }

    #[test]
    fn stage_order_is_fixed() {
        let all = Stage::all();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0], Stage::Resolve);
        assert_eq!(all[6], Stage::Assemble);
        assert_eq!(Stage::Repair.name(), "repair");
    }
}
