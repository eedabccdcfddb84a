use anyhow::Result;
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::{BTreeSet, HashMap};

use super::config::GraphParams;
use super::geometry::{dist, ObstacleIndex};
use super::models::{Edge, EdgeKind, Node, NodeKind, ObstacleId};

/// Floor applied to edge lengths so costs stay strictly positive even for
/// coincident endpoints.
const MIN_EDGE_LEN: f64 = 1e-9;

/// Cost assigned to edges over water with zero crossability. Finite so the
/// edge stays visible to analysis tools, large enough that routing never
/// picks it.
pub const UNCROSSABLE_COST: f64 = 1e12;

#[derive(Clone, Debug, Default)]
pub struct EdgeStats {
    pub edges_land_land: usize,
    pub edges_land_boundary: usize,
    pub edges_boundary_boundary: usize,
    pub edges_boundary_water: usize,
    pub edges_water_perimeter: usize,
    pub rejected_crossing: usize,
    pub sector_pruned: usize,
}

pub struct EdgeOutput {
    pub edges: Vec<Edge>,
    pub stats: EdgeStats,
}

fn is_land_side(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Land | NodeKind::Boundary | NodeKind::LandPortion)
}

fn is_boundary_side(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Boundary | NodeKind::LandPortion)
}

/// Edge class and distance limit for a land-side pair. LandPortion nodes act
/// as boundary nodes here: they are shore interfaces, not open land.
fn land_pair_rule(a: NodeKind, b: NodeKind, params: &GraphParams) -> Option<(EdgeKind, f64)> {
    match (a, b) {
        (NodeKind::Land, NodeKind::Land) => Some((EdgeKind::LandLand, params.max_len_land_land)),
        (NodeKind::Land, k) | (k, NodeKind::Land) if is_boundary_side(k) => {
            Some((EdgeKind::LandBoundary, params.max_len_land_boundary))
        }
        (a, b) if is_boundary_side(a) && is_boundary_side(b) => {
            Some((EdgeKind::BoundaryBoundary, params.max_len_boundary_boundary))
        }
        _ => None,
    }
}

fn land_cost(len: f64, params: &GraphParams) -> f64 {
    len.max(MIN_EDGE_LEN) / params.land_speed
}

fn water_cost(len: f64, crossability: f64, params: &GraphParams) -> f64 {
    if crossability <= 0.0 {
        UNCROSSABLE_COST
    } else {
        len.max(MIN_EDGE_LEN) / (params.water_speed * crossability)
    }
}

/// Builds the full edge set: distance joins between land-side nodes, scored
/// sector connections from boundary nodes into the water, and perimeter
/// chains along each obstacle. Output is canonical (source < target) and
/// sorted by endpoint ids.
pub fn build_edges(nodes: &[Node], index: &ObstacleIndex, params: &GraphParams) -> Result<EdgeOutput> {
    let tree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
        nodes
            .iter()
            .enumerate()
            .map(|(idx, n)| GeomWithData::new([n.x, n.y], idx))
            .collect(),
    );
    let crossability: HashMap<ObstacleId, f64> = index
        .obstacles()
        .iter()
        .map(|ob| (ob.id, ob.min_crossability))
        .collect();

    let max_land = params
        .max_len_land_land
        .max(params.max_len_land_boundary)
        .max(params.max_len_boundary_boundary);

    // Land-side distance joins. Each unordered pair is visited once from its
    // lower-indexed endpoint.
    let land_parts: Vec<(Vec<Edge>, usize)> = nodes
        .par_iter()
        .enumerate()
        .filter(|(_, n)| is_land_side(n.kind))
        .map(|(a_idx, a)| {
            let mut edges = Vec::new();
            let mut rejected = 0usize;
            let mut hits: Vec<usize> = tree
                .locate_within_distance([a.x, a.y], max_land * max_land)
                .map(|item| item.data)
                .filter(|&b_idx| b_idx > a_idx && is_land_side(nodes[b_idx].kind))
                .collect();
            hits.sort_unstable();
            for b_idx in hits {
                let b = &nodes[b_idx];
                let Some((kind, limit)) = land_pair_rule(a.kind, b.kind, params) else {
                    continue;
                };
                let len = dist(a.position(), b.position());
                if len > limit {
                    continue;
                }
                if index.segment_crosses_interior(a.position(), b.position(), None) {
                    rejected += 1;
                    continue;
                }
                edges.push(Edge::canonical(a.id, b.id, len, land_cost(len, params), kind));
            }
            (edges, rejected)
        })
        .collect();

    // Spread penalty input: for every water node, its two nearest
    // boundary-side nodes. The second entry takes over when the nearest one
    // is the node currently being scored.
    let boundary_tree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
        nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| is_boundary_side(n.kind))
            .map(|(idx, n)| GeomWithData::new([n.x, n.y], idx))
            .collect(),
    );
    let nearest_boundaries: HashMap<usize, Vec<(f64, usize)>> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == NodeKind::WaterBoundary)
        .map(|(w_idx, w)| {
            let two: Vec<(f64, usize)> = boundary_tree
                .nearest_neighbor_iter(&[w.x, w.y])
                .take(2)
                .map(|item| (dist(w.position(), nodes[item.data].position()), item.data))
                .collect();
            (w_idx, two)
        })
        .collect();

    let sector_count = params.sector_count.max(1);
    let sector_width = 2.0 * std::f64::consts::PI / sector_count as f64;
    let max_bw = params.max_len_boundary_water;

    let water_parts: Vec<(Vec<Edge>, usize, usize)> = nodes
        .par_iter()
        .enumerate()
        .filter(|(_, n)| is_boundary_side(n.kind))
        .map(|(a_idx, a)| {
            let mut rejected = 0usize;
            let mut hits: Vec<usize> = tree
                .locate_within_distance([a.x, a.y], max_bw * max_bw)
                .map(|item| item.data)
                .filter(|&w_idx| nodes[w_idx].kind == NodeKind::WaterBoundary)
                .collect();
            hits.sort_unstable();

            let mut sectors: Vec<Vec<(f64, u64, usize, f64)>> = vec![Vec::new(); sector_count];
            for w_idx in hits {
                let w = &nodes[w_idx];
                let len = dist(a.position(), w.position());
                if len > max_bw {
                    continue;
                }
                if index.segment_crosses_interior(a.position(), w.position(), None) {
                    rejected += 1;
                    continue;
                }
                let score = score_candidate(a_idx, a, w_idx, w, len, &nearest_boundaries, params);
                let angle = (w.y - a.y).atan2(w.x - a.x).rem_euclid(2.0 * std::f64::consts::PI);
                let sector = ((angle / sector_width) as usize).min(sector_count - 1);
                sectors[sector].push((score, w.id.0, w_idx, len));
            }

            let mut edges = Vec::new();
            let mut pruned = 0usize;
            for bucket in &mut sectors {
                bucket.sort_by(|x, y| {
                    x.0.partial_cmp(&y.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(x.1.cmp(&y.1))
                });
                if bucket.len() > params.max_per_sector {
                    pruned += bucket.len() - params.max_per_sector;
                }
                for &(_, _, w_idx, len) in bucket.iter().take(params.max_per_sector) {
                    let w = &nodes[w_idx];
                    let cross = w
                        .obstacle
                        .and_then(|ob| crossability.get(&ob).copied())
                        .unwrap_or(0.0);
                    edges.push(Edge::canonical(
                        a.id,
                        w.id,
                        len,
                        water_cost(len, cross, params),
                        EdgeKind::BoundaryWater,
                    ));
                }
            }
            (edges, rejected, pruned)
        })
        .collect();

    // Perimeter chains: consecutive water nodes along each obstacle ring,
    // wrapping at the seam. Hole shorelines chain separately from the
    // exterior. A chord may cut through its own obstacle but not through a
    // different one.
    let mut groups: Vec<(ObstacleId, usize, Vec<usize>)> = Vec::new();
    for (idx, n) in nodes.iter().enumerate() {
        if n.kind != NodeKind::WaterBoundary {
            continue;
        }
        let Some(ob) = n.obstacle else { continue };
        let ring = n.ring.unwrap_or(0);
        match groups.last_mut() {
            Some((last_ob, last_ring, members)) if *last_ob == ob && *last_ring == ring => {
                members.push(idx)
            }
            _ => groups.push((ob, ring, vec![idx])),
        }
    }

    let mut perimeter_edges: Vec<Edge> = Vec::new();
    let mut perimeter_rejected = 0usize;
    let links = params.perimeter_links.clamp(1, 2);
    for (ob, _, members) in &groups {
        let n = members.len();
        if n < 2 {
            continue;
        }
        let cross = crossability.get(ob).copied().unwrap_or(0.0);
        let mut seen: BTreeSet<(u64, u64)> = BTreeSet::new();
        for i in 0..n {
            for step in 1..=links {
                // Second-neighbor links only make sense on longer chains.
                if step == 2 && n <= 3 {
                    continue;
                }
                let j = (i + step) % n;
                if i == j {
                    continue;
                }
                let a = &nodes[members[i]];
                let b = &nodes[members[j]];
                let key = (a.id.0.min(b.id.0), a.id.0.max(b.id.0));
                if !seen.insert(key) {
                    continue;
                }
                if index.segment_crosses_interior(a.position(), b.position(), Some(*ob)) {
                    perimeter_rejected += 1;
                    continue;
                }
                let len = dist(a.position(), b.position());
                perimeter_edges.push(Edge::canonical(
                    a.id,
                    b.id,
                    len,
                    water_cost(len, cross, params),
                    EdgeKind::WaterPerimeter,
                ));
            }
        }
    }

    let mut stats = EdgeStats::default();
    let mut edges: Vec<Edge> = Vec::new();
    for (part, rejected) in land_parts {
        stats.rejected_crossing += rejected;
        edges.extend(part);
    }
    for (part, rejected, pruned) in water_parts {
        stats.rejected_crossing += rejected;
        stats.sector_pruned += pruned;
        edges.extend(part);
    }
    stats.rejected_crossing += perimeter_rejected;
    edges.extend(perimeter_edges);

    edges.sort_by_key(|e| e.key());
    for e in &edges {
        match e.kind {
            EdgeKind::LandLand => stats.edges_land_land += 1,
            EdgeKind::LandBoundary => stats.edges_land_boundary += 1,
            EdgeKind::BoundaryBoundary => stats.edges_boundary_boundary += 1,
            EdgeKind::BoundaryWater => stats.edges_boundary_water += 1,
            EdgeKind::WaterPerimeter => stats.edges_water_perimeter += 1,
            EdgeKind::Repair => {}
        }
    }

    println!(
        "edges: {} land_land, {} land_boundary, {} boundary_boundary, {} boundary_water, {} water_perimeter ({} crossing rejections, {} sector pruned)",
        stats.edges_land_land,
        stats.edges_land_boundary,
        stats.edges_boundary_boundary,
        stats.edges_boundary_water,
        stats.edges_water_perimeter,
        stats.rejected_crossing,
        stats.sector_pruned
    );

    Ok(EdgeOutput { edges, stats })
}

/// Weighted score of one boundary -> water candidate; lower wins. Terms:
/// normalized distance, deviation from a perpendicular shore crossing, a
/// clustering penalty when the water node already sits close to a different
/// boundary node, and a small id-based tie break.
fn score_candidate(
    a_idx: usize,
    a: &Node,
    w_idx: usize,
    w: &Node,
    len: f64,
    nearest_boundaries: &HashMap<usize, Vec<(f64, usize)>>,
    params: &GraphParams,
) -> f64 {
    let dist_term = params.weight_distance * len / params.max_len_boundary_water.max(MIN_EDGE_LEN);

    let perp_term = match w.tangent {
        Some(t) if len > MIN_EDGE_LEN => {
            let ux = (w.x - a.x) / len;
            let uy = (w.y - a.y) / len;
            params.weight_perpendicular * (ux * t[0] + uy * t[1]).abs()
        }
        _ => 0.0,
    };

    let spread_term = {
        let other = nearest_boundaries.get(&w_idx).and_then(|two| {
            two.iter().find(|(_, b_idx)| *b_idx != a_idx).map(|(d, _)| *d)
        });
        match other {
            Some(d) => params.weight_spread / (1.0 + d),
            None => 0.0,
        }
    };

    let tie_term = params.weight_tie_break * ((w.id.0 % 1000) as f64 / 1000.0);

    dist_term + perp_term + spread_term + tie_term
}
