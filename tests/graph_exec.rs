use anyhow::Result;
use rusqlite::Connection;
use tempfile::NamedTempFile;

use watergraph_builder::commands::graph::config::GraphParams;
use watergraph_builder::commands::graph::db;
use watergraph_builder::commands::graph::executor;
use watergraph_builder::commands::graph::models::NodeKind;

fn seed_minimal_world(features: &mut Connection) -> Result<()> {
    watergraph_builder::db::create_tables(features)?;

    // One lake and one stream far enough apart to stay separate obstacles
    features.execute(
        "INSERT INTO water_features(feature_id, feature_type, name, geometry) VALUES (1, 'lake', 'mirror lake', ?1)",
        [r#"{"kind":"polygon","coords":[[0.0,0.0],[400.0,0.0],[400.0,400.0],[0.0,400.0]]}"#],
    )?;
    features.execute(
        "INSERT INTO water_features(feature_id, feature_type, name, geometry) VALUES (2, 'stream', NULL, ?1)",
        [r#"{"kind":"polyline","coords":[[900.0,0.0],[950.0,200.0],[1000.0,400.0]]}"#],
    )?;
    Ok(())
}

#[test]
fn pipeline_runs_and_persists() -> Result<()> {
    let features_dbf = NamedTempFile::new().unwrap();
    let out_dbf = NamedTempFile::new().unwrap();
    let mut features_conn = Connection::open(features_dbf.path())?;
    seed_minimal_world(&mut features_conn)?;

    let mut out = db::open_rw(out_dbf.path())?;
    db::ensure_schema(&mut out)?;
    assert!(!db::graph_present(&out)?);

    let params = db::load_graph_params(&out)?;
    let (features, undecodable) = db::load_features(&features_conn, None)?;
    assert_eq!(features.len(), 2);
    assert_eq!(undecodable, 0);

    let result = executor::run_pipeline(&features, undecodable, &params, None)?;
    assert_eq!(result.obstacles.len(), 2);
    db::write_obstacles(&mut out, &result.obstacles)?;
    db::write_graph(&mut out, &result.graph, &result.diagnostics)?;

    assert!(db::graph_present(&out)?);

    let (node_counts, edge_counts) = db::graph_kind_counts(&out)?;
    let nodes_total: i64 = node_counts.iter().map(|(_, c)| c).sum();
    let edges_total: i64 = edge_counts.iter().map(|(_, c)| c).sum();
    assert_eq!(nodes_total as usize, result.graph.nodes.len());
    assert_eq!(edges_total as usize, result.graph.edges.len());
    assert!(node_counts.iter().any(|(k, _)| k == "water_boundary"));

    let diag = db::read_diagnostics(&out)?;
    assert!(diag.iter().any(|(k, v)| k == "diag_obstacles" && v == "2"));
    assert!(diag
        .iter()
        .any(|(k, v)| k == "diag_connectivity_post_pct" && v == "100.00"));
    Ok(())
}

#[test]
fn rebuild_replaces_previous_graph() -> Result<()> {
    let features_dbf = NamedTempFile::new().unwrap();
    let out_dbf = NamedTempFile::new().unwrap();
    let mut features_conn = Connection::open(features_dbf.path())?;
    seed_minimal_world(&mut features_conn)?;

    let mut out = db::open_rw(out_dbf.path())?;
    db::ensure_schema(&mut out)?;
    let params = db::load_graph_params(&out)?;
    let (features, undecodable) = db::load_features(&features_conn, None)?;

    let first = executor::run_pipeline(&features, undecodable, &params, None)?;
    db::write_obstacles(&mut out, &first.obstacles)?;
    db::write_graph(&mut out, &first.graph, &first.diagnostics)?;

    // A second build over the same input must land on the same persisted
    // state, not accumulate rows.
    let second = executor::run_pipeline(&features, undecodable, &params, None)?;
    db::write_obstacles(&mut out, &second.obstacles)?;
    db::write_graph(&mut out, &second.graph, &second.diagnostics)?;

    let node_rows: i64 = out.query_row("SELECT COUNT(*) FROM graph_nodes", [], |r| r.get(0))?;
    let edge_rows: i64 = out.query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))?;
    assert_eq!(node_rows as usize, first.graph.nodes.len());
    assert_eq!(edge_rows as usize, first.graph.edges.len());
    Ok(())
}

#[test]
fn extent_filter_narrows_the_build() -> Result<()> {
    let features_dbf = NamedTempFile::new().unwrap();
    let mut features_conn = Connection::open(features_dbf.path())?;
    seed_minimal_world(&mut features_conn)?;

    // Window over the lake only; the stream sits outside.
    let extent = Some((-200.0, -200.0, 600.0, 600.0));
    let (features, _) = db::load_features(&features_conn, extent)?;
    assert_eq!(features.len(), 1);

    let params = GraphParams::default();
    let result = executor::run_pipeline(&features, 0, &params, extent)?;
    assert_eq!(result.obstacles.len(), 1);

    // Obstacle outlines are clipped to the extent, so shore nodes stay inside
    // it; land-side nodes may overhang by the grid's cover margin.
    let margin = 4.0 * params.hex_spacing;
    for node in &result.graph.nodes {
        let (lo_x, lo_y, hi_x, hi_y) = (-200.0, -200.0, 600.0, 600.0);
        if node.kind == NodeKind::WaterBoundary {
            assert!(node.x >= lo_x - 1e-6 && node.x <= hi_x + 1e-6, "shore x {}", node.x);
            assert!(node.y >= lo_y - 1e-6 && node.y <= hi_y + 1e-6, "shore y {}", node.y);
        } else {
            assert!(node.x >= lo_x - margin && node.x <= hi_x + margin);
            assert!(node.y >= lo_y - margin && node.y <= hi_y + margin);
        }
    }
    Ok(())
}
