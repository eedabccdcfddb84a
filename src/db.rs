use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub fn create_tables(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let features_columns: BTreeSet<&'static str> =
        ["feature_id", "feature_type", "name", "geometry"].into_iter().collect();
    let obstacles_columns: BTreeSet<&'static str> = [
        "obstacle_id", "min_crossability", "area", "source_feature_ids", "geometry",
    ]
    .into_iter()
    .collect();

    if table_exists(conn, "water_features")? && !table_has_columns(conn, "water_features", &features_columns)? {
        conn.execute("DROP TABLE water_features", [])?;
    }
    if table_exists(conn, "water_obstacles")? && !table_has_columns(conn, "water_obstacles", &obstacles_columns)? {
        conn.execute("DROP TABLE water_obstacles", [])?;
    }

    if graph_edges_requires_migration(conn)? {
        conn.execute_batch(
            r#"
            CREATE TABLE graph_edges_new (
              source_id INTEGER NOT NULL REFERENCES graph_nodes(node_id),
              target_id INTEGER NOT NULL REFERENCES graph_nodes(node_id),
              length    REAL NOT NULL,
              cost      REAL NOT NULL,
              kind      TEXT NOT NULL,
              is_repair INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (source_id, target_id)
            );
            INSERT INTO graph_edges_new (source_id, target_id, length, cost, kind, is_repair)
            SELECT source_id, target_id, length, cost, kind,
                   CASE WHEN kind = 'repair' THEN 1 ELSE 0 END
            FROM graph_edges;
            DROP TABLE graph_edges;
            ALTER TABLE graph_edges_new RENAME TO graph_edges;
        "#,
        )?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS water_features (
            feature_id   INTEGER PRIMARY KEY,
            feature_type TEXT NOT NULL,
            name         TEXT,
            geometry     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS water_obstacles (
            obstacle_id        INTEGER PRIMARY KEY,
            min_crossability   REAL NOT NULL,
            area               REAL NOT NULL,
            source_feature_ids TEXT NOT NULL,
            geometry           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS graph_nodes (
            node_id     INTEGER PRIMARY KEY,
            kind        TEXT NOT NULL,
            x           REAL NOT NULL,
            y           REAL NOT NULL,
            obstacle_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS graph_edges (
            source_id INTEGER NOT NULL REFERENCES graph_nodes(node_id),
            target_id INTEGER NOT NULL REFERENCES graph_nodes(node_id),
            length    REAL NOT NULL,
            cost      REAL NOT NULL,
            kind      TEXT NOT NULL,
            is_repair INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (source_id, target_id)
        );

        CREATE TABLE IF NOT EXISTS graph_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_water_features_type ON water_features(feature_type);
        CREATE INDEX IF NOT EXISTS idx_graph_nodes_kind ON graph_nodes(kind);
        CREATE INDEX IF NOT EXISTS idx_graph_nodes_xy ON graph_nodes(x, y);
        CREATE INDEX IF NOT EXISTS idx_graph_nodes_obstacle ON graph_nodes(obstacle_id) WHERE obstacle_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);
        CREATE INDEX IF NOT EXISTS idx_graph_edges_kind ON graph_edges(kind);
    "#,
    )?;

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let hits: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(hits > 0)
}

fn table_has_columns(conn: &Connection, table: &str, required: &BTreeSet<&str>) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let present: BTreeSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(required.iter().all(|c| present.contains(*c)))
}

fn graph_edges_requires_migration(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "graph_edges")? {
        return Ok(false);
    }
    // Early builds stored edges without the is_repair column and without a
    // composite primary key; both force a rebuild of the table.
    let mut stmt = conn.prepare("PRAGMA table_info(graph_edges)")?;
    let mut rows = stmt.query([])?;
    let mut has_is_repair = false;
    let mut pk_cols = 0i64;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let pk: i64 = row.get(5)?;
        if name == "is_repair" {
            has_is_repair = true;
        }
        if pk > 0 {
            pk_cols += 1;
        }
    }
    Ok(!has_is_repair || pk_cols < 2)
}
