use anyhow::Result;
use geo::{Area, BooleanOps, BoundingRect, Centroid, Coord, InteriorPoint, MultiPolygon, Polygon};
use rayon::prelude::*;

use super::config::GraphParams;
use super::geometry::ObstacleIndex;
use super::models::{CellClass, HexCell, LandPortion};

#[derive(Clone, Debug, Default)]
pub struct PortionStats {
    pub cells_processed: usize,
    pub portions_kept: usize,
    pub portions_dropped: usize,
}

pub struct PortionOutput {
    pub portions: Vec<LandPortion>,
    pub stats: PortionStats,
}

/// Cuts the land remainder out of every WaterWithLand cell and keeps the
/// fragments large enough to stand on. Fragment indices are assigned after
/// a bounding-box sort so reruns produce identical identities.
pub fn extract_land_portions(
    cells: &[HexCell],
    index: &ObstacleIndex,
    params: &GraphParams,
) -> Result<PortionOutput> {
    let targets: Vec<&HexCell> = cells
        .iter()
        .filter(|c| c.class == CellClass::WaterWithLand)
        .collect();

    let per_cell: Vec<(Vec<LandPortion>, usize)> = targets
        .par_iter()
        .map(|cell| portions_for_cell(cell, index, params))
        .collect();

    let mut stats = PortionStats::default();
    stats.cells_processed = targets.len();
    let mut portions = Vec::new();
    for (kept, dropped) in per_cell {
        stats.portions_kept += kept.len();
        stats.portions_dropped += dropped;
        portions.extend(kept);
    }

    println!(
        "portions: {} water_with_land cells -> {} fragments kept, {} dropped",
        stats.cells_processed, stats.portions_kept, stats.portions_dropped
    );

    Ok(PortionOutput { portions, stats })
}

fn portions_for_cell(
    cell: &HexCell,
    index: &ObstacleIndex,
    params: &GraphParams,
) -> (Vec<LandPortion>, usize) {
    let mut land = MultiPolygon::new(vec![cell.polygon.clone()]);
    for idx in index.intersecting(&cell.polygon) {
        land = land.difference(&MultiPolygon::new(vec![index.obstacles()[idx].polygon.clone()]));
    }

    let mut parts: Vec<Polygon<f64>> = land.0;
    parts.sort_by(|a, b| {
        let ra = a.bounding_rect().map(|r| (r.min().x, r.min().y));
        let rb = b.bounding_rect().map(|r| (r.min().x, r.min().y));
        ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for polygon in parts {
        let area = polygon.unsigned_area();
        if area < params.min_portion_area {
            dropped += 1;
            continue;
        }
        let anchor = anchor_point(&polygon);
        kept.push(LandPortion {
            cell_id: cell.id,
            index: kept.len(),
            polygon,
            area,
            anchor,
        });
    }
    (kept, dropped)
}

/// A point guaranteed to lie on the fragment, used for node placement.
pub fn anchor_point(polygon: &Polygon<f64>) -> Coord<f64> {
    if let Some(p) = polygon.interior_point() {
        return Coord { x: p.x(), y: p.y() };
    }
    if let Some(p) = polygon.centroid() {
        return Coord { x: p.x(), y: p.y() };
    }
    polygon
        .exterior()
        .0
        .first()
        .copied()
        .unwrap_or(Coord { x: 0.0, y: 0.0 })
}
