use anyhow::{anyhow, Result};
use std::collections::HashSet;

use super::models::{DiagnosticsReport, Edge, Graph, Node, NodeId};

/// Final validation pass. Everything the earlier stages promise is checked
/// once more before the graph leaves the pipeline: ids ascending, endpoints
/// resolvable, edges canonical and unique, costs positive and finite, and
/// the diagnostics counters in agreement with the artifact.
pub fn assemble_graph(
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    diagnostics: DiagnosticsReport,
) -> Result<(Graph, DiagnosticsReport)> {
    if nodes.is_empty() {
        return Err(anyhow!("assemble: node set is empty"));
    }

    let mut ids: HashSet<NodeId> = HashSet::with_capacity(nodes.len());
    let mut previous: Option<NodeId> = None;
    for node in &nodes {
        if let Some(p) = previous {
            if node.id <= p {
                return Err(anyhow!(
                    "assemble: node ids not strictly ascending at {}",
                    node.id.0
                ));
            }
        }
        if !node.x.is_finite() || !node.y.is_finite() {
            return Err(anyhow!("assemble: node {} has non-finite position", node.id.0));
        }
        ids.insert(node.id);
        previous = Some(node.id);
    }

    let mut seen: HashSet<(u64, u64)> = HashSet::with_capacity(edges.len());
    for edge in &edges {
        if edge.source >= edge.target {
            return Err(anyhow!(
                "assemble: edge {}-{} is not canonical",
                edge.source.0,
                edge.target.0
            ));
        }
        if !ids.contains(&edge.source) || !ids.contains(&edge.target) {
            return Err(anyhow!(
                "assemble: edge {}-{} references a missing node",
                edge.source.0,
                edge.target.0
            ));
        }
        if !seen.insert((edge.source.0, edge.target.0)) {
            return Err(anyhow!(
                "assemble: duplicate edge {}-{}",
                edge.source.0,
                edge.target.0
            ));
        }
        if !edge.cost.is_finite() || edge.cost <= 0.0 {
            return Err(anyhow!(
                "assemble: edge {}-{} has invalid cost {}",
                edge.source.0,
                edge.target.0,
                edge.cost
            ));
        }
        if !edge.length.is_finite() || edge.length < 0.0 {
            return Err(anyhow!(
                "assemble: edge {}-{} has invalid length {}",
                edge.source.0,
                edge.target.0,
                edge.length
            ));
        }
    }

    if diagnostics.node_total() != nodes.len() {
        return Err(anyhow!(
            "assemble: diagnostics count {} nodes, artifact has {}",
            diagnostics.node_total(),
            nodes.len()
        ));
    }
    if diagnostics.edge_total() != edges.len() {
        return Err(anyhow!(
            "assemble: diagnostics count {} edges, artifact has {}",
            diagnostics.edge_total(),
            edges.len()
        ));
    }

    println!(
        "assemble: graph ready with {} nodes, {} edges",
        nodes.len(),
        edges.len()
    );

    Ok((Graph { nodes, edges }, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::graph::models::{EdgeKind, NodeKind};

    fn node(id: u64, x: f64) -> Node {
        Node {
            id: NodeId(id),
            kind: NodeKind::Land,
            x,
            y: 0.0,
            obstacle: None,
            ring: None,
            arc_pos: None,
            tangent: None,
        }
    }

    fn diag(nodes: usize, edges: usize) -> DiagnosticsReport {
        let mut d = DiagnosticsReport::default();
        d.nodes_land = nodes;
        d.edges_land_land = edges;
        d
    }

    #[test]
    fn valid_graph_passes() -> Result<()> {
        let nodes = vec![node(0, 0.0), node(1, 50.0)];
        let edges = vec![Edge::canonical(NodeId(0), NodeId(1), 50.0, 35.7, EdgeKind::LandLand)];
        let (graph, d) = assemble_graph(nodes, edges, diag(2, 1))?;
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(d.node_total(), 2);
        Ok(())
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let nodes = vec![node(0, 0.0), node(1, 50.0)];
        let edges = vec![Edge::canonical(NodeId(0), NodeId(9), 50.0, 35.7, EdgeKind::LandLand)];
        assert!(assemble_graph(nodes, edges, diag(2, 1)).is_err());
    }

    #[test]
    fn duplicate_edges_are_rejected() {
        let nodes = vec![node(0, 0.0), node(1, 50.0)];
        let edges = vec![
            Edge::canonical(NodeId(0), NodeId(1), 50.0, 35.7, EdgeKind::LandLand),
            Edge::canonical(NodeId(1), NodeId(0), 50.0, 35.7, EdgeKind::LandBoundary),
        ];
        assert!(assemble_graph(nodes, edges, diag(2, 2)).is_err());
    }

    #[test]
    fn non_positive_costs_are_rejected() {
        let nodes = vec![node(0, 0.0), node(1, 50.0)];
        let edges = vec![Edge::canonical(NodeId(0), NodeId(1), 50.0, 0.0, EdgeKind::LandLand)];
        assert!(assemble_graph(nodes, edges, diag(2, 1)).is_err());
    }

    #[test]
    fn mismatched_diagnostics_are_rejected() {
        let nodes = vec![node(0, 0.0), node(1, 50.0)];
        let edges = vec![Edge::canonical(NodeId(0), NodeId(1), 50.0, 35.7, EdgeKind::LandLand)];
        assert!(assemble_graph(nodes, edges, diag(5, 1)).is_err());
    }

    #[test]
    fn empty_node_set_is_rejected() {
        assert!(assemble_graph(Vec::new(), Vec::new(), diag(0, 0)).is_err());
    }
}
