use std::{env, path::PathBuf};

use super::models::FeatureKind;

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub features_db: Option<PathBuf>,
    pub out_db: Option<PathBuf>,
    pub extent: Option<(f64, f64, f64, f64)>,
    pub threads: Option<usize>,
    pub dry_run: bool,
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_env_defaults() -> Self {
        let features_db = env::var("WATERGRAPH_FEATURES_DB").ok().map(PathBuf::from);
        let out_db = env::var("WATERGRAPH_OUT_DB").ok().map(PathBuf::from);
        let extent = env::var("WATERGRAPH_EXTENT").ok().and_then(|s| parse_extent(&s));
        let threads = env::var("WATERGRAPH_THREADS").ok().and_then(|s| s.parse::<usize>().ok());
        let dry_run = env::var("WATERGRAPH_DRY_RUN").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let log_level = env::var("WATERGRAPH_LOG_LEVEL").ok();
        Self { features_db, out_db, extent, threads, dry_run, log_level }
    }
}

pub fn parse_extent(input: &str) -> Option<(f64, f64, f64, f64)> {
    // format: min_x,min_y,max_x,max_y
    let parts: Vec<&str> = input.split(',').collect();
    if parts.len() != 4 { return None; }
    let min_x = parts[0].trim().parse::<f64>().ok()?;
    let min_y = parts[1].trim().parse::<f64>().ok()?;
    let max_x = parts[2].trim().parse::<f64>().ok()?;
    let max_y = parts[3].trim().parse::<f64>().ok()?;
    if !(min_x < max_x && min_y < max_y) { return None; }
    Some((min_x, min_y, max_x, max_y))
}

/// Tuning knobs for the build. Code defaults below; any value can be
/// overridden through a row in `graph_meta` before running the build.
#[derive(Clone, Debug)]
pub struct GraphParams {
    pub buffer_lake: f64,
    pub buffer_river: f64,
    pub buffer_stream: f64,
    pub buffer_reservoir: f64,
    pub buffer_canal: f64,
    pub buffer_default: f64,
    pub cross_lake: f64,
    pub cross_river: f64,
    pub cross_stream: f64,
    pub cross_reservoir: f64,
    pub cross_canal: f64,
    pub cross_default: f64,
    pub simplify_tolerance: f64,
    pub max_obstacle_area: f64,
    pub hex_spacing: f64,
    pub min_portion_area: f64,
    pub boundary_node_spacing: f64,
    pub node_dedupe_tolerance: f64,
    pub max_len_land_land: f64,
    pub max_len_land_boundary: f64,
    pub max_len_boundary_boundary: f64,
    pub max_len_boundary_water: f64,
    pub max_len_water_water: f64,
    pub land_speed: f64,
    pub water_speed: f64,
    pub sector_count: usize,
    pub max_per_sector: usize,
    pub perimeter_links: usize,
    pub weight_distance: f64,
    pub weight_perpendicular: f64,
    pub weight_spread: f64,
    pub weight_tie_break: f64,
    pub repair_cost_multiplier: f64,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            buffer_lake: 100.0,
            buffer_river: 75.0,
            buffer_stream: 30.0,
            buffer_reservoir: 100.0,
            buffer_canal: 75.0,
            buffer_default: 50.0,
            cross_lake: 0.5,
            cross_river: 0.4,
            cross_stream: 0.8,
            cross_reservoir: 0.5,
            cross_canal: 0.6,
            cross_default: 0.5,
            simplify_tolerance: 5.0,
            max_obstacle_area: 50_000_000.0,
            hex_spacing: 200.0,
            min_portion_area: 5.0,
            boundary_node_spacing: 50.0,
            node_dedupe_tolerance: 10.0,
            max_len_land_land: 250.0,
            max_len_land_boundary: 250.0,
            max_len_boundary_boundary: 300.0,
            max_len_boundary_water: 300.0,
            max_len_water_water: 400.0,
            land_speed: 1.4,
            water_speed: 0.9,
            sector_count: 8,
            max_per_sector: 2,
            perimeter_links: 1,
            weight_distance: 1.0,
            weight_perpendicular: 0.6,
            weight_spread: 0.4,
            weight_tie_break: 0.001,
            repair_cost_multiplier: 2.0,
        }
    }
}

impl GraphParams {
    pub fn buffer_for(&self, kind: FeatureKind) -> f64 {
        match kind {
            FeatureKind::Lake => self.buffer_lake,
            FeatureKind::River => self.buffer_river,
            FeatureKind::Stream => self.buffer_stream,
            FeatureKind::Reservoir => self.buffer_reservoir,
            FeatureKind::Canal => self.buffer_canal,
            FeatureKind::Other => self.buffer_default,
        }
    }

    pub fn crossability_for(&self, kind: FeatureKind) -> f64 {
        match kind {
            FeatureKind::Lake => self.cross_lake,
            FeatureKind::River => self.cross_river,
            FeatureKind::Stream => self.cross_stream,
            FeatureKind::Reservoir => self.cross_reservoir,
            FeatureKind::Canal => self.cross_canal,
            FeatureKind::Other => self.cross_default,
        }
    }

    /// Key/value rows used to seed `graph_meta`. `apply_meta` must accept
    /// every key listed here.
    pub fn meta_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("buffer_lake", self.buffer_lake.to_string()),
            ("buffer_river", self.buffer_river.to_string()),
            ("buffer_stream", self.buffer_stream.to_string()),
            ("buffer_reservoir", self.buffer_reservoir.to_string()),
            ("buffer_canal", self.buffer_canal.to_string()),
            ("buffer_default", self.buffer_default.to_string()),
            ("cross_lake", self.cross_lake.to_string()),
            ("cross_river", self.cross_river.to_string()),
            ("cross_stream", self.cross_stream.to_string()),
            ("cross_reservoir", self.cross_reservoir.to_string()),
            ("cross_canal", self.cross_canal.to_string()),
            ("cross_default", self.cross_default.to_string()),
            ("simplify_tolerance", self.simplify_tolerance.to_string()),
            ("max_obstacle_area", self.max_obstacle_area.to_string()),
            ("hex_spacing", self.hex_spacing.to_string()),
            ("min_portion_area", self.min_portion_area.to_string()),
            ("boundary_node_spacing", self.boundary_node_spacing.to_string()),
            ("node_dedupe_tolerance", self.node_dedupe_tolerance.to_string()),
            ("max_len_land_land", self.max_len_land_land.to_string()),
            ("max_len_land_boundary", self.max_len_land_boundary.to_string()),
            ("max_len_boundary_boundary", self.max_len_boundary_boundary.to_string()),
            ("max_len_boundary_water", self.max_len_boundary_water.to_string()),
            ("max_len_water_water", self.max_len_water_water.to_string()),
            ("land_speed", self.land_speed.to_string()),
            ("water_speed", self.water_speed.to_string()),
            ("sector_count", self.sector_count.to_string()),
            ("max_per_sector", self.max_per_sector.to_string()),
            ("perimeter_links", self.perimeter_links.to_string()),
            ("weight_distance", self.weight_distance.to_string()),
            ("weight_perpendicular", self.weight_perpendicular.to_string()),
            ("weight_spread", self.weight_spread.to_string()),
            ("weight_tie_break", self.weight_tie_break.to_string()),
            ("repair_cost_multiplier", self.repair_cost_multiplier.to_string()),
        ]
    }

    /// Applies one `graph_meta` override. Unknown keys are left for the
    /// diagnostics rows and return false; unparsable or out-of-range values
    /// keep the default. Distances, areas and speeds must be positive,
    /// tolerances and weights non-negative, crossabilities inside [0, 1].
    pub fn apply_meta(&mut self, key: &str, value: &str) -> bool {
        fn pos(v: &str) -> Option<f64> {
            v.trim().parse::<f64>().ok().filter(|x| x.is_finite() && *x > 0.0)
        }
        fn nonneg(v: &str) -> Option<f64> {
            v.trim().parse::<f64>().ok().filter(|x| x.is_finite() && *x >= 0.0)
        }
        fn unit(v: &str) -> Option<f64> {
            v.trim().parse::<f64>().ok().filter(|x| (0.0..=1.0).contains(x))
        }
        fn u(v: &str) -> Option<usize> {
            v.trim().parse::<usize>().ok()
        }
        match key {
            "buffer_lake" => if let Some(x) = pos(value) { self.buffer_lake = x; },
            "buffer_river" => if let Some(x) = pos(value) { self.buffer_river = x; },
            "buffer_stream" => if let Some(x) = pos(value) { self.buffer_stream = x; },
            "buffer_reservoir" => if let Some(x) = pos(value) { self.buffer_reservoir = x; },
            "buffer_canal" => if let Some(x) = pos(value) { self.buffer_canal = x; },
            "buffer_default" => if let Some(x) = pos(value) { self.buffer_default = x; },
            "cross_lake" => if let Some(x) = unit(value) { self.cross_lake = x; },
            "cross_river" => if let Some(x) = unit(value) { self.cross_river = x; },
            "cross_stream" => if let Some(x) = unit(value) { self.cross_stream = x; },
            "cross_reservoir" => if let Some(x) = unit(value) { self.cross_reservoir = x; },
            "cross_canal" => if let Some(x) = unit(value) { self.cross_canal = x; },
            "cross_default" => if let Some(x) = unit(value) { self.cross_default = x; },
            "simplify_tolerance" => if let Some(x) = nonneg(value) { self.simplify_tolerance = x; },
            "max_obstacle_area" => if let Some(x) = pos(value) { self.max_obstacle_area = x; },
            "hex_spacing" => if let Some(x) = pos(value) { self.hex_spacing = x; },
            "min_portion_area" => if let Some(x) = nonneg(value) { self.min_portion_area = x; },
            "boundary_node_spacing" => if let Some(x) = pos(value) { self.boundary_node_spacing = x; },
            "node_dedupe_tolerance" => if let Some(x) = nonneg(value) { self.node_dedupe_tolerance = x; },
            "max_len_land_land" => if let Some(x) = pos(value) { self.max_len_land_land = x; },
            "max_len_land_boundary" => if let Some(x) = pos(value) { self.max_len_land_boundary = x; },
            "max_len_boundary_boundary" => if let Some(x) = pos(value) { self.max_len_boundary_boundary = x; },
            "max_len_boundary_water" => if let Some(x) = pos(value) { self.max_len_boundary_water = x; },
            "max_len_water_water" => if let Some(x) = pos(value) { self.max_len_water_water = x; },
            "land_speed" => if let Some(x) = pos(value) { self.land_speed = x; },
            "water_speed" => if let Some(x) = pos(value) { self.water_speed = x; },
            "sector_count" => if let Some(x) = u(value) { self.sector_count = x.max(1); },
            "max_per_sector" => if let Some(x) = u(value) { self.max_per_sector = x.max(1); },
            "perimeter_links" => if let Some(x) = u(value) { self.perimeter_links = x.clamp(1, 2); },
            "weight_distance" => if let Some(x) = nonneg(value) { self.weight_distance = x; },
            "weight_perpendicular" => if let Some(x) = nonneg(value) { self.weight_perpendicular = x; },
            "weight_spread" => if let Some(x) = nonneg(value) { self.weight_spread = x; },
            "weight_tie_break" => if let Some(x) = nonneg(value) { self.weight_tie_break = x; },
            "repair_cost_multiplier" => if let Some(x) = pos(value) { self.repair_cost_multiplier = x; },
            _ => return false,
        }
        true
    }
}
