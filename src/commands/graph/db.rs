use anyhow::Result;
use geo::BoundingRect;
use log::warn;
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use super::config::GraphParams;
use super::geometry::{decode_feature_geometry, encode_polygon_geometry};
use super::models::{
    DiagnosticsReport, FeatureGeometry, FeatureId, FeatureKind, Graph, WaterFeature, WaterObstacle,
};

pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    // Queue behind an active writer instead of failing immediately.
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(conn)
}

pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    // WAL keeps the stats command readable while a build is writing.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Creates the schema and seeds the default tuning rows. Seeding uses
/// INSERT OR IGNORE so operator overrides survive re-running init.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    crate::db::create_tables(conn)?;
    let defaults = GraphParams::default();
    with_tx(conn, |tx| {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO graph_meta (key, value) VALUES (?1, ?2)")?;
        for (key, value) in defaults.meta_rows() {
            stmt.execute(params![key, value])?;
        }
        Ok(())
    })
}

pub fn with_tx<T, F: FnOnce(&Transaction) -> Result<T>>(conn: &mut Connection, f: F) -> Result<T> {
    // Reserved lock taken at BEGIN rather than at the first write.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Loads water features ordered by id. Rows whose geometry column fails to
/// decode are dropped with a warning; the second return value counts them.
/// When `extent` is set, features whose bounding box misses it are skipped.
pub fn load_features(
    conn: &Connection,
    extent: Option<(f64, f64, f64, f64)>,
) -> Result<(Vec<WaterFeature>, usize)> {
    let mut stmt = conn.prepare(
        "SELECT feature_id, feature_type, name, geometry FROM water_features ORDER BY feature_id",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let kind: String = row.get(1)?;
        let name: Option<String> = row.get(2)?;
        let geometry: String = row.get(3)?;
        Ok((id, kind, name, geometry))
    })?;

    let mut features = Vec::new();
    let mut undecodable = 0usize;
    for row in rows {
        let (id, kind, name, geometry) = row?;
        let geometry = match decode_feature_geometry(&geometry) {
            Ok(g) => g,
            Err(e) => {
                warn!("feature {}: dropping undecodable geometry: {}", id, e);
                undecodable += 1;
                continue;
            }
        };
        if let Some((min_x, min_y, max_x, max_y)) = extent {
            let bounds = match &geometry {
                FeatureGeometry::Polygon(p) => p.bounding_rect(),
                FeatureGeometry::Polyline(l) => l.bounding_rect(),
            };
            let overlaps = bounds.map_or(false, |r| {
                r.min().x <= max_x && r.max().x >= min_x && r.min().y <= max_y && r.max().y >= min_y
            });
            if !overlaps {
                continue;
            }
        }
        features.push(WaterFeature {
            id: FeatureId(id),
            kind: FeatureKind::parse(&kind),
            name,
            geometry,
        });
    }
    Ok((features, undecodable))
}

/// Replaces the persisted obstacle set. The table is debug output; the
/// pipeline itself hands obstacles between stages in memory.
pub fn write_obstacles(conn: &mut Connection, obstacles: &[WaterObstacle]) -> Result<usize> {
    with_tx(conn, |tx| {
        tx.execute("DELETE FROM water_obstacles", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO water_obstacles (obstacle_id, min_crossability, area, source_feature_ids, geometry)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for ob in obstacles {
            let sources: Vec<i64> = ob.source_features.iter().map(|f| f.0).collect();
            stmt.execute(params![
                ob.id.0 as i64,
                ob.min_crossability,
                ob.area,
                serde_json::to_string(&sources)?,
                encode_polygon_geometry(&ob.polygon)?,
            ])?;
        }
        Ok(obstacles.len())
    })
}

/// Replaces the persisted graph and upserts the diagnostics rows.
pub fn write_graph(
    conn: &mut Connection,
    graph: &Graph,
    diagnostics: &DiagnosticsReport,
) -> Result<()> {
    with_tx(conn, |tx| {
        tx.execute("DELETE FROM graph_edges", [])?;
        tx.execute("DELETE FROM graph_nodes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_nodes (node_id, kind, x, y, obstacle_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for node in &graph.nodes {
                stmt.execute(params![
                    node.id.0 as i64,
                    node.kind.as_str(),
                    node.x,
                    node.y,
                    node.obstacle.map(|o| o.0 as i64),
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_edges (source_id, target_id, length, cost, kind, is_repair)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for edge in &graph.edges {
                stmt.execute(params![
                    edge.source.0 as i64,
                    edge.target.0 as i64,
                    edge.length,
                    edge.cost,
                    edge.kind.as_str(),
                    edge.is_repair as i64,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            )?;
            for (key, value) in diagnostics.meta_rows() {
                stmt.execute(params![key, value])?;
            }
        }
        Ok(())
    })
}

/// Reads the tuning rows from `graph_meta` over the code defaults.
pub fn load_graph_params(conn: &Connection) -> Result<GraphParams> {
    let mut params = GraphParams::default();
    let mut stmt = conn.prepare("SELECT key, value FROM graph_meta ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok((key, value))
    })?;
    let mut applied = 0usize;
    for row in rows {
        let (key, value) = row?;
        if params.apply_meta(&key, &value) {
            applied += 1;
        }
    }
    log::info!("params: {} values read from graph_meta", applied);
    Ok(params)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// True when a previous build already produced edges; used to skip a
/// rebuild unless forced.
pub fn graph_present(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "graph_edges")? {
        return Ok(false);
    }
    let edges: i64 = conn.query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))?;
    Ok(edges > 0)
}

/// Diagnostics rows written by the last build, sorted by key.
pub fn read_diagnostics(conn: &Connection) -> Result<Vec<(String, String)>> {
    if !table_exists(conn, "graph_meta")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare("SELECT key, value FROM graph_meta WHERE key LIKE 'diag_%' ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok((key, value))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Node and edge counts grouped by kind, for the stats command.
pub fn graph_kind_counts(conn: &Connection) -> Result<(Vec<(String, i64)>, Vec<(String, i64)>)> {
    let mut nodes = Vec::new();
    if table_exists(conn, "graph_nodes")? {
        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM graph_nodes GROUP BY kind ORDER BY kind")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            nodes.push(row?);
        }
    }
    let mut edges = Vec::new();
    if table_exists(conn, "graph_edges")? {
        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM graph_edges GROUP BY kind ORDER BY kind")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            edges.push(row?);
        }
    }
    Ok((nodes, edges))
}
