use anyhow::{bail, Result};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::{HashMap, HashSet, VecDeque};

use super::config::GraphParams;
use super::geometry::dist;
use super::models::{Edge, EdgeKind, Node, NodeId};

#[derive(Clone, Debug, Default)]
pub struct RepairStats {
    pub reachable_initial: usize,
    pub unreachable_initial: usize,
    pub repair_edges: usize,
    pub pre_pct: f64,
    pub post_pct: f64,
}

pub struct RepairOutput {
    pub edges: Vec<Edge>,
    pub stats: RepairStats,
}

/// Makes the graph fully reachable. One BFS partitions the nodes, then every
/// unreachable node gets a single repair edge to its nearest node from the
/// initial reachable set. Attaching only to initially reachable nodes keeps
/// repaired nodes from chaining onto each other, so one round always
/// converges; a second BFS re-verifies that.
pub fn repair_connectivity(
    nodes: &[Node],
    edges: Vec<Edge>,
    params: &GraphParams,
) -> Result<RepairOutput> {
    if edges.is_empty() {
        bail!("repair: graph has zero edges, nothing to repair against");
    }

    let seed = edges.iter().map(|e| e.source).min().unwrap_or(NodeId(0));
    let visited = bfs(&edges, seed);

    let mut stats = RepairStats::default();
    stats.reachable_initial = visited.len();
    stats.unreachable_initial = nodes.len() - visited.len();
    stats.pre_pct = 100.0 * visited.len() as f64 / nodes.len().max(1) as f64;

    let mut all_edges = edges;
    if stats.unreachable_initial > 0 {
        let reachable_tree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
            nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| visited.contains(&n.id))
                .map(|(idx, n)| GeomWithData::new([n.x, n.y], idx))
                .collect(),
        );
        // Node slice order is ascending id order.
        for u in nodes.iter().filter(|n| !visited.contains(&n.id)) {
            let Some(nearest) = reachable_tree.nearest_neighbor(&[u.x, u.y]) else {
                bail!("repair: reachable set is empty");
            };
            let target = &nodes[nearest.data];
            let len = dist(u.position(), target.position());
            let cost = (len.max(1e-9) / params.land_speed) * params.repair_cost_multiplier;
            all_edges.push(Edge::canonical(u.id, target.id, len, cost, EdgeKind::Repair));
            stats.repair_edges += 1;
        }
    }

    let verified = bfs(&all_edges, seed);
    if verified.len() != nodes.len() {
        bail!(
            "repair: verification left {} of {} nodes unreachable",
            nodes.len() - verified.len(),
            nodes.len()
        );
    }
    stats.post_pct = 100.0 * verified.len() as f64 / nodes.len().max(1) as f64;

    all_edges.sort_by_key(|e| e.key());

    println!(
        "repair: {:.2}% reachable before, {:.2}% after ({} repair edges)",
        stats.pre_pct, stats.post_pct, stats.repair_edges
    );

    Ok(RepairOutput {
        edges: all_edges,
        stats,
    })
}

fn bfs(edges: &[Edge], seed: NodeId) -> HashSet<NodeId> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for e in edges {
        adjacency.entry(e.source).or_default().push(e.target);
        adjacency.entry(e.target).or_default().push(e.source);
    }
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    visited.insert(seed);
    queue.push_back(seed);
    while let Some(current) = queue.pop_front() {
        if let Some(neighbors) = adjacency.get(&current) {
            for &n in neighbors {
                if visited.insert(n) {
                    queue.push_back(n);
                }
            }
        }
    }
    visited
}
