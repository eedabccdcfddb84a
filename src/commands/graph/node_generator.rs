use anyhow::Result;
use geo::{Area, BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

use super::config::GraphParams;
use super::geometry::{closest_ring_sample, dist, sample_ring, ObstacleIndex, RingSample};
use super::hex_grid::HexGrid;
use super::land_portions::anchor_point;
use super::models::{CellClass, CellId, HexCell, LandPortion, Node, NodeId, NodeKind};

#[derive(Clone, Debug, Default)]
pub struct NodeStats {
    pub nodes_land: usize,
    pub nodes_boundary: usize,
    pub nodes_land_portion: usize,
    pub nodes_water_boundary: usize,
    pub water_samples_deduped: usize,
}

pub struct NodeOutput {
    pub nodes: Vec<Node>,
    pub stats: NodeStats,
}

/// Emits the node set in four fixed blocks: Land nodes by cell id, Boundary
/// nodes by cell id, LandPortion nodes by cell id and fragment index, then
/// WaterBoundary nodes by obstacle id, ring and arc position. Sequential ids
/// over that order stay stable between runs.
pub fn generate_nodes(
    grid: &HexGrid,
    cells: &[HexCell],
    portions: &[LandPortion],
    index: &ObstacleIndex,
    params: &GraphParams,
) -> Result<NodeOutput> {
    let mut stats = NodeStats::default();
    let mut nodes: Vec<Node> = Vec::new();
    let mut next = 0u64;
    let mut push = |nodes: &mut Vec<Node>, kind, pos: Coord<f64>, obstacle, ring, arc_pos, tangent| {
        nodes.push(Node {
            id: NodeId(next),
            kind,
            x: pos.x,
            y: pos.y,
            obstacle,
            ring,
            arc_pos,
            tangent,
        });
        next += 1;
    };

    for cell in cells.iter().filter(|c| c.class == CellClass::Land) {
        push(&mut nodes, NodeKind::Land, cell.center, None, None, None, None);
        stats.nodes_land += 1;
    }

    for cell in cells.iter().filter(|c| c.class == CellClass::Boundary) {
        let pos = if index.point_in_water(cell.center).is_none() {
            cell.center
        } else {
            boundary_land_anchor(&cell.polygon, index).unwrap_or(cell.center)
        };
        push(&mut nodes, NodeKind::Boundary, pos, None, None, None, None);
        stats.nodes_boundary += 1;
    }

    for portion in portions {
        push(&mut nodes, NodeKind::LandPortion, portion.anchor, None, None, None, None);
        stats.nodes_land_portion += 1;
    }

    // WaterBoundary candidates come from every ring of an obstacle: the
    // exterior shoreline and any hole shorelines around enclosed land. Even
    // samples survive only inside Boundary cells; each WaterWithLand cell
    // adds one shore point on whichever ring passes closest. Candidates
    // collapse within the dedupe tolerance per ring.
    let class_by_cell: HashMap<CellId, CellClass> =
        cells.iter().map(|c| (c.id, c.class)).collect();
    let mut wwl_by_obstacle: BTreeMap<usize, Vec<Coord<f64>>> = BTreeMap::new();
    for cell in cells.iter().filter(|c| c.class == CellClass::WaterWithLand) {
        for idx in index.intersecting(&cell.polygon) {
            wwl_by_obstacle.entry(idx).or_default().push(cell.center);
        }
    }

    let per_obstacle: Vec<(Vec<(usize, Vec<RingSample>)>, usize)> = index
        .obstacles()
        .par_iter()
        .enumerate()
        .map(|(idx, ob)| {
            let rings: Vec<&LineString<f64>> = std::iter::once(ob.polygon.exterior())
                .chain(ob.polygon.interiors().iter())
                .collect();

            let mut wwl_by_ring: Vec<Vec<RingSample>> = vec![Vec::new(); rings.len()];
            if let Some(centers) = wwl_by_obstacle.get(&idx) {
                for &center in centers {
                    let mut best: Option<(f64, usize, RingSample)> = None;
                    for (ri, ring) in rings.iter().enumerate() {
                        if let Some(s) = closest_ring_sample(ring, center) {
                            let d = dist(s.point, center);
                            if best.as_ref().map_or(true, |(bd, _, _)| d < *bd) {
                                best = Some((d, ri, s));
                            }
                        }
                    }
                    if let Some((_, ri, s)) = best {
                        wwl_by_ring[ri].push(s);
                    }
                }
            }

            let mut kept_rings: Vec<(usize, Vec<RingSample>)> = Vec::new();
            let mut deduped = 0usize;
            for (ri, ring) in rings.iter().enumerate() {
                let mut candidates: Vec<RingSample> =
                    sample_ring(ring, params.boundary_node_spacing)
                        .into_iter()
                        .filter(|s| {
                            class_by_cell.get(&grid.cell_at(s.point)) == Some(&CellClass::Boundary)
                        })
                        .collect();
                candidates.extend(wwl_by_ring[ri].iter().copied());
                candidates.sort_by(|a, b| {
                    a.arc_pos
                        .partial_cmp(&b.arc_pos)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let raw = candidates.len();
                let mut kept: Vec<RingSample> = Vec::new();
                for s in candidates {
                    if kept
                        .last()
                        .map_or(true, |k| dist(k.point, s.point) > params.node_dedupe_tolerance)
                    {
                        kept.push(s);
                    }
                }
                // Each ring wraps: the last sample can collide with the first.
                if kept.len() >= 2 {
                    let first = kept[0].point;
                    let last = kept[kept.len() - 1].point;
                    if dist(first, last) <= params.node_dedupe_tolerance {
                        kept.pop();
                    }
                }
                deduped += raw - kept.len();
                if !kept.is_empty() {
                    kept_rings.push((ri, kept));
                }
            }
            (kept_rings, deduped)
        })
        .collect();

    for (idx, (rings, deduped)) in per_obstacle.into_iter().enumerate() {
        stats.water_samples_deduped += deduped;
        let obstacle_id = index.obstacles()[idx].id;
        for (ri, samples) in rings {
            for s in samples {
                push(
                    &mut nodes,
                    NodeKind::WaterBoundary,
                    s.point,
                    Some(obstacle_id),
                    Some(ri),
                    Some(s.arc_pos),
                    Some(s.tangent),
                );
                stats.nodes_water_boundary += 1;
            }
        }
    }

    println!(
        "nodes: {} land, {} boundary, {} portion, {} water ({} water samples deduped)",
        stats.nodes_land,
        stats.nodes_boundary,
        stats.nodes_land_portion,
        stats.nodes_water_boundary,
        stats.water_samples_deduped
    );

    Ok(NodeOutput { nodes, stats })
}

/// Largest land fragment of a boundary cell, for placement when the cell
/// center happens to fall inside an obstacle.
fn boundary_land_anchor(polygon: &Polygon<f64>, index: &ObstacleIndex) -> Option<Coord<f64>> {
    let mut land = MultiPolygon::new(vec![polygon.clone()]);
    for idx in index.intersecting(polygon) {
        land = land.difference(&MultiPolygon::new(vec![index.obstacles()[idx].polygon.clone()]));
    }
    land.0
        .iter()
        .max_by(|a, b| {
            a.unsigned_area()
                .partial_cmp(&b.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(anchor_point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::graph::grid_classifier::classify_grid;
    use crate::commands::graph::land_portions::extract_land_portions;
    use crate::commands::graph::models::{FeatureId, ObstacleId, WaterObstacle};
    use geo::Rect;

    fn square_obstacle(id: u64, minx: f64, miny: f64, size: f64) -> WaterObstacle {
        let polygon = Polygon::new(
            vec![
                Coord { x: minx, y: miny },
                Coord { x: minx + size, y: miny },
                Coord { x: minx + size, y: miny + size },
                Coord { x: minx, y: miny + size },
                Coord { x: minx, y: miny },
            ]
            .into(),
            vec![],
        );
        WaterObstacle {
            id: ObstacleId(id),
            area: size * size,
            polygon,
            min_crossability: 0.5,
            source_features: vec![FeatureId(id as i64)],
        }
    }

    fn lake_world(
        params: &GraphParams,
    ) -> Result<(HexGrid, Vec<HexCell>, Vec<LandPortion>, Vec<WaterObstacle>)> {
        let obstacles = vec![square_obstacle(1, 0.0, 0.0, 600.0)];
        let envelope = Rect::new(Coord { x: -500.0, y: -500.0 }, Coord { x: 1100.0, y: 1100.0 });
        let index = ObstacleIndex::build(&obstacles);
        let classified = classify_grid(&index, envelope, params)?;
        let portions = extract_land_portions(&classified.cells, &index, params)?;
        Ok((classified.grid, classified.cells, portions.portions, obstacles))
    }

    #[test]
    fn ids_are_sequential_in_kind_blocks() -> Result<()> {
        let mut params = GraphParams::default();
        params.hex_spacing = 100.0;
        let (grid, cells, portions, obstacles) = lake_world(&params)?;
        let index = ObstacleIndex::build(&obstacles);
        let out = generate_nodes(&grid, &cells, &portions, &index, &params)?;

        for (i, node) in out.nodes.iter().enumerate() {
            assert_eq!(node.id, NodeId(i as u64));
        }
        let boundary_start = out.stats.nodes_land;
        let portion_start = boundary_start + out.stats.nodes_boundary;
        let water_start = portion_start + out.stats.nodes_land_portion;
        for (i, node) in out.nodes.iter().enumerate() {
            let expected = if i < boundary_start {
                NodeKind::Land
            } else if i < portion_start {
                NodeKind::Boundary
            } else if i < water_start {
                NodeKind::LandPortion
            } else {
                NodeKind::WaterBoundary
            };
            assert_eq!(node.kind, expected, "node {}", i);
        }
        assert!(out.stats.nodes_land > 0);
        assert!(out.stats.nodes_boundary > 0);
        assert!(out.stats.nodes_water_boundary > 0);
        Ok(())
    }

    #[test]
    fn boundary_nodes_sit_on_land_and_water_nodes_carry_ring_data() -> Result<()> {
        let mut params = GraphParams::default();
        params.hex_spacing = 100.0;
        let (grid, cells, portions, obstacles) = lake_world(&params)?;
        let index = ObstacleIndex::build(&obstacles);
        let out = generate_nodes(&grid, &cells, &portions, &index, &params)?;

        for node in &out.nodes {
            match node.kind {
                NodeKind::WaterBoundary => {
                    assert_eq!(node.obstacle, Some(ObstacleId(1)));
                    assert_eq!(node.ring, Some(0));
                    let arc = node.arc_pos.unwrap();
                    assert!((0.0..1.0).contains(&arc));
                    let t = node.tangent.unwrap();
                    approx::assert_relative_eq!(t[0].hypot(t[1]), 1.0, max_relative = 1e-9);
                }
                _ => {
                    assert!(index.point_in_water(node.position()).is_none());
                    assert_eq!(node.obstacle, None);
                    assert_eq!(node.ring, None);
                    assert_eq!(node.arc_pos, None);
                }
            }
        }

        // Water nodes follow ascending arc order within the obstacle block.
        let arcs: Vec<f64> = out
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::WaterBoundary)
            .map(|n| n.arc_pos.unwrap())
            .collect();
        for w in arcs.windows(2) {
            assert!(w[0] < w[1]);
        }
        Ok(())
    }

    #[test]
    fn wider_dedupe_tolerance_collapses_samples() -> Result<()> {
        let mut base = GraphParams::default();
        base.hex_spacing = 100.0;
        let (grid, cells, portions, obstacles) = lake_world(&base)?;
        let index = ObstacleIndex::build(&obstacles);

        let small = generate_nodes(&grid, &cells, &portions, &index, &base)?;
        let mut wide = base.clone();
        wide.node_dedupe_tolerance = 60.0;
        let collapsed = generate_nodes(&grid, &cells, &portions, &index, &wide)?;

        assert!(collapsed.stats.water_samples_deduped > 0);
        assert!(collapsed.stats.nodes_water_boundary < small.stats.nodes_water_boundary);
        Ok(())
    }

    #[test]
    fn hole_shorelines_get_their_own_water_nodes() -> Result<()> {
        // A lake with an island: the hole ring is a shoreline of its own and
        // carries water nodes parameterized along the hole.
        let outer = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 600.0, y: 0.0 },
            Coord { x: 600.0, y: 600.0 },
            Coord { x: 0.0, y: 600.0 },
            Coord { x: 0.0, y: 0.0 },
        ];
        let island = vec![
            Coord { x: 200.0, y: 200.0 },
            Coord { x: 200.0, y: 400.0 },
            Coord { x: 400.0, y: 400.0 },
            Coord { x: 400.0, y: 200.0 },
            Coord { x: 200.0, y: 200.0 },
        ];
        let polygon = Polygon::new(outer.into(), vec![island.into()]);
        let obstacles = vec![WaterObstacle {
            id: ObstacleId(1),
            area: polygon.unsigned_area(),
            polygon,
            min_crossability: 0.5,
            source_features: vec![FeatureId(1)],
        }];
        let mut params = GraphParams::default();
        params.hex_spacing = 100.0;
        let envelope = Rect::new(Coord { x: -500.0, y: -500.0 }, Coord { x: 1100.0, y: 1100.0 });
        let index = ObstacleIndex::build(&obstacles);
        let classified = classify_grid(&index, envelope, &params)?;
        let portions = extract_land_portions(&classified.cells, &index, &params)?;
        let out = generate_nodes(
            &classified.grid,
            &classified.cells,
            &portions.portions,
            &index,
            &params,
        )?;

        let hole_nodes: Vec<&Node> = out
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::WaterBoundary && n.ring == Some(1))
            .collect();
        assert!(!hole_nodes.is_empty(), "island shoreline produced no nodes");
        for n in &hole_nodes {
            // Every hole-ring node sits on the island outline.
            let on_vertical = ((n.x - 200.0).abs() < 1e-6 || (n.x - 400.0).abs() < 1e-6)
                && n.y > 200.0 - 1e-6
                && n.y < 400.0 + 1e-6;
            let on_horizontal = ((n.y - 200.0).abs() < 1e-6 || (n.y - 400.0).abs() < 1e-6)
                && n.x > 200.0 - 1e-6
                && n.x < 400.0 + 1e-6;
            assert!(
                on_vertical || on_horizontal,
                "node at ({}, {}) off the island outline",
                n.x,
                n.y
            );
        }

        // Ring blocks stay contiguous, arcs ascend inside each ring.
        let water: Vec<&Node> = out
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::WaterBoundary)
            .collect();
        for pair in water.windows(2) {
            assert!(pair[0].ring <= pair[1].ring);
            if pair[0].ring == pair[1].ring {
                assert!(pair[0].arc_pos < pair[1].arc_pos);
            }
        }
        Ok(())
    }

    #[test]
    fn water_with_land_cells_contribute_shore_points() -> Result<()> {
        // The grid origin sits at the envelope minimum, so with the envelope
        // anchored at x=0 the column-0 cell centers fall on x=0, inside this
        // thin strip. Those cells classify WaterWithLand with land on both
        // sides.
        let strip = Polygon::new(
            vec![
                Coord { x: -5.0, y: -500.0 },
                Coord { x: 5.0, y: -500.0 },
                Coord { x: 5.0, y: 500.0 },
                Coord { x: -5.0, y: 500.0 },
                Coord { x: -5.0, y: -500.0 },
            ]
            .into(),
            vec![],
        );
        let obstacles = vec![WaterObstacle {
            id: ObstacleId(1),
            area: strip.unsigned_area(),
            polygon: strip,
            min_crossability: 0.5,
            source_features: vec![FeatureId(1)],
        }];
        let mut params = GraphParams::default();
        params.hex_spacing = 100.0;
        let envelope = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 400.0, y: 400.0 });
        let index = ObstacleIndex::build(&obstacles);
        let classified = classify_grid(&index, envelope, &params)?;
        let wwl = classified
            .cells
            .iter()
            .filter(|c| c.class == CellClass::WaterWithLand)
            .count();
        assert!(wwl > 0, "expected the strip to produce WaterWithLand cells");

        let portions = extract_land_portions(&classified.cells, &index, &params)?;
        let out = generate_nodes(
            &classified.grid,
            &classified.cells,
            &portions.portions,
            &index,
            &params,
        )?;
        assert!(out.stats.nodes_water_boundary > 0);
        assert_eq!(out.stats.nodes_land_portion, 2 * wwl);
        // Every point of the strip ring has |x| <= 5, shore samples included.
        for node in out.nodes.iter().filter(|n| n.kind == NodeKind::WaterBoundary) {
            assert!(node.x.abs() <= 5.0 + 1e-6, "shore point x={}", node.x);
        }
        Ok(())
    }
}
