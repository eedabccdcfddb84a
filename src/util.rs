use std::path::PathBuf;

pub const FEATURES_DB_FILE: &str = "water_features.db";
pub const GRAPH_DB_FILE: &str = "watergraph.db";

pub fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Default (features_db, graph_db) locations next to the manifest.
pub fn default_paths() -> (PathBuf, PathBuf) {
    let root = repo_root();
    (root.join(FEATURES_DB_FILE), root.join(GRAPH_DB_FILE))
}
