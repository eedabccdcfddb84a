use anyhow::Result;
use geo::{Area, BooleanOps, MultiPolygon, Rect};
use rayon::prelude::*;

use super::config::GraphParams;
use super::geometry::ObstacleIndex;
use super::hex_grid::HexGrid;
use super::models::{CellClass, CellId, HexCell};

#[derive(Clone, Debug, Default)]
pub struct ClassifyStats {
    pub cells_total: usize,
    pub cells_land: usize,
    pub cells_boundary: usize,
    pub cells_water_with_land: usize,
    pub cells_water: usize,
}

pub struct ClassifyOutput {
    pub grid: HexGrid,
    pub cells: Vec<HexCell>,
    pub stats: ClassifyStats,
}

/// Tiles the envelope with hexagonal cells and classifies each one against
/// the obstacle set. Classification of a cell reads only the immutable
/// obstacle index, so cells are processed in parallel; output order follows
/// the grid's column-major id order.
pub fn classify_grid(
    index: &ObstacleIndex,
    envelope: Rect<f64>,
    params: &GraphParams,
) -> Result<ClassifyOutput> {
    let grid = HexGrid::cover(envelope, params.hex_spacing);
    let ids = grid.cell_ids();

    let cells: Vec<HexCell> = ids
        .par_iter()
        .map(|&id| classify_cell(&grid, id, index, params))
        .collect();

    let mut stats = ClassifyStats::default();
    stats.cells_total = cells.len();
    for cell in &cells {
        match cell.class {
            CellClass::Land => stats.cells_land += 1,
            CellClass::Boundary => stats.cells_boundary += 1,
            CellClass::WaterWithLand => stats.cells_water_with_land += 1,
            CellClass::Water => stats.cells_water += 1,
        }
    }

    println!(
        "classify: {} cells ({} land, {} boundary, {} water_with_land, {} water)",
        stats.cells_total,
        stats.cells_land,
        stats.cells_boundary,
        stats.cells_water_with_land,
        stats.cells_water
    );

    Ok(ClassifyOutput { grid, cells, stats })
}

/// Pure per-cell classification:
/// - no intersecting obstacle -> Land
/// - remaining land area below the portion threshold -> Water
/// - otherwise Boundary when the cell center sits on land, WaterWithLand
///   when it sits inside an obstacle.
fn classify_cell(grid: &HexGrid, id: CellId, index: &ObstacleIndex, params: &GraphParams) -> HexCell {
    let center = grid.center(id);
    let polygon = grid.polygon(id);

    let candidates = index.intersecting(&polygon);
    let class = if candidates.is_empty() {
        CellClass::Land
    } else {
        // Obstacles can overlap again after per-component simplification, so
        // the land remainder is cut by successive differences rather than
        // summed per-obstacle intersections.
        let mut land = MultiPolygon::new(vec![polygon.clone()]);
        for idx in candidates {
            land = land.difference(&MultiPolygon::new(vec![
                index.obstacles()[idx].polygon.clone(),
            ]));
            if land.0.is_empty() {
                break;
            }
        }
        let land_remaining = land.unsigned_area();
        if land_remaining <= params.min_portion_area {
            CellClass::Water
        } else if index.point_in_water(center).is_some() {
            CellClass::WaterWithLand
        } else {
            CellClass::Boundary
        }
    };

    HexCell {
        id,
        center,
        polygon,
        class,
    }
}
