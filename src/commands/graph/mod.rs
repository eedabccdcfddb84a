use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod logging;
pub mod db;
pub mod models;
pub mod geometry;
pub mod hex_grid;
pub mod obstacle_resolver;
pub mod grid_classifier;
pub mod land_portions;
pub mod node_generator;
pub mod edge_builder;
pub mod connectivity;
pub mod assembler;
pub mod executor;

#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// Source SQLite DB containing water features (default: repo_root/water_features.db or WATERGRAPH_FEATURES_DB)
    #[arg(long = "features-db")]
    pub features_db: Option<PathBuf>,
    /// Output SQLite DB for graph artifacts (default: repo_root/watergraph.db or WATERGRAPH_OUT_DB)
    #[arg(long = "out-db")]
    pub out_db: Option<PathBuf>,
    /// Working extent filter: min_x,min_y,max_x,max_y
    #[arg(long = "extent")]
    pub extent: Option<String>,
    /// Worker thread count for the rayon pool
    #[arg(long = "threads")]
    pub threads: Option<usize>,
    /// Compute everything but skip all writes
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Log level (trace|debug|info|warn|error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GraphCommand {
    /// Run the full pipeline and persist graph, obstacles and diagnostics
    #[command(name = "build")]
    Build {
        /// Rebuild even if the output DB already holds a graph
        #[arg(long)]
        force: bool,
    },
    /// Run only the obstacle resolver and persist the obstacle set
    #[command(name = "resolve")]
    Resolve,
    /// Print persisted diagnostics and per-kind counts
    #[command(name = "stats")]
    Stats,
    /// Create the output schema and seed default parameters
    #[command(name = "init")]
    Init,
}

pub fn cmd_graph(common: CommonOpts, sub: GraphCommand) -> Result<()> {
    // CLI flags fill the config first; environment values override them.
    let mut cfg = config::Config::default();
    cfg.features_db = common.features_db.clone();
    cfg.out_db = common.out_db.clone();
    cfg.extent = common.extent.as_deref().and_then(config::parse_extent);
    cfg.threads = common.threads;
    cfg.dry_run = common.dry_run;
    cfg.log_level = common.log_level.clone();
    let env_cfg = config::Config::from_env_defaults();
    if env_cfg.features_db.is_some() { cfg.features_db = env_cfg.features_db; }
    if env_cfg.out_db.is_some() { cfg.out_db = env_cfg.out_db; }
    if env_cfg.extent.is_some() { cfg.extent = env_cfg.extent; }
    if env_cfg.threads.is_some() { cfg.threads = env_cfg.threads; }
    if env_cfg.dry_run { cfg.dry_run = true; }
    if env_cfg.log_level.is_some() { cfg.log_level = env_cfg.log_level; }

    logging::init(cfg.log_level.as_deref());
    if let Some(n) = cfg.threads {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    }

    let (def_features, def_out) = crate::util::default_paths();
    let features_path = cfg.features_db.clone().unwrap_or(def_features);
    let out_path = cfg.out_db.clone().unwrap_or(def_out);

    match sub {
        GraphCommand::Init => {
            let mut out = db::open_rw(&out_path)
                .with_context(|| format!("open output DB {}", out_path.display()))?;
            db::ensure_schema(&mut out)?;
            println!("schema ready at {}", out_path.display());
            Ok(())
        }
        GraphCommand::Resolve => {
            let features_conn = db::open_ro(&features_path)
                .with_context(|| format!("open features DB {}", features_path.display()))?;
            let mut out = db::open_rw(&out_path)
                .with_context(|| format!("open output DB {}", out_path.display()))?;
            db::ensure_schema(&mut out)?;
            let params = db::load_graph_params(&out)?;
            let (features, undecodable) = db::load_features(&features_conn, cfg.extent)?;
            if undecodable > 0 {
                log::warn!("{} feature rows skipped as undecodable", undecodable);
            }
            let resolved = obstacle_resolver::resolve_obstacles(&features, &params, cfg.extent)?;
            if cfg.dry_run {
                println!("dry run: {} obstacles resolved, skipping writes", resolved.obstacles.len());
                return Ok(());
            }
            let written = db::write_obstacles(&mut out, &resolved.obstacles)?;
            println!("resolve: wrote {} obstacles to {}", written, out_path.display());
            Ok(())
        }
        GraphCommand::Build { force } => {
            let features_conn = db::open_ro(&features_path)
                .with_context(|| format!("open features DB {}", features_path.display()))?;
            let mut out = db::open_rw(&out_path)
                .with_context(|| format!("open output DB {}", out_path.display()))?;
            db::ensure_schema(&mut out)?;
            if !force && db::graph_present(&out)? {
                println!(
                    "graph already present in {}; pass --force to rebuild",
                    out_path.display()
                );
                return Ok(());
            }
            let params = db::load_graph_params(&out)?;
            let (features, undecodable) = db::load_features(&features_conn, cfg.extent)?;
            let result = executor::run_pipeline(&features, undecodable, &params, cfg.extent)?;
            if cfg.dry_run {
                println!(
                    "dry run: {} nodes, {} edges computed, skipping writes",
                    result.graph.nodes.len(),
                    result.graph.edges.len()
                );
                return Ok(());
            }
            db::write_obstacles(&mut out, &result.obstacles)?;
            db::write_graph(&mut out, &result.graph, &result.diagnostics)?;
            println!(
                "build: wrote {} nodes, {} edges to {}",
                result.graph.nodes.len(),
                result.graph.edges.len(),
                out_path.display()
            );
            Ok(())
        }
        GraphCommand::Stats => {
            let conn = db::open_ro(&out_path)
                .with_context(|| format!("open output DB {}", out_path.display()))?;
            let rows = db::read_diagnostics(&conn)?;
            if rows.is_empty() {
                println!("no diagnostics recorded; run build first");
                return Ok(());
            }
            for (key, value) in rows {
                println!("{} = {}", key, value);
            }
            let (nodes, edges) = db::graph_kind_counts(&conn)?;
            for (kind, count) in nodes {
                println!("nodes[{}] = {}", kind, count);
            }
            for (kind, count) in edges {
                println!("edges[{}] = {}", kind, count);
            }
            Ok(())
        }
    }
}
