use anyhow::{bail, Result};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Rect, SimplifyVwPreserve};
use log::warn;
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::collections::BTreeMap;

use super::config::GraphParams;
use super::geometry::{buffer_geometry, clip_rect, expand_rect, feature_bounds, sanitize_geometry, union_all};
use super::models::{FeatureId, ObstacleId, WaterFeature, WaterObstacle};

#[derive(Clone, Debug, Default)]
pub struct ResolveStats {
    pub features_in: usize,
    pub features_dropped: usize,
    pub merge_groups: usize,
    pub obstacles_out: usize,
    pub obstacles_dropped_oversized: usize,
}

/// Obstacles plus the working envelope every later stage operates in.
pub struct ResolveOutput {
    pub obstacles: Vec<WaterObstacle>,
    pub envelope: Rect<f64>,
    pub stats: ResolveStats,
}

struct BufferedFeature {
    feature: FeatureId,
    crossability: f64,
    shape: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

/// Buffers every feature by its per-type radius, merges buffers that touch,
/// simplifies the merged outlines and clips them to the working envelope.
pub fn resolve_obstacles(
    features: &[WaterFeature],
    params: &GraphParams,
    extent: Option<(f64, f64, f64, f64)>,
) -> Result<ResolveOutput> {
    if features.is_empty() {
        bail!("resolve: empty input set, nothing to build a graph from");
    }

    let max_buffer = [
        params.buffer_lake,
        params.buffer_river,
        params.buffer_stream,
        params.buffer_reservoir,
        params.buffer_canal,
        params.buffer_default,
    ]
    .into_iter()
    .fold(0.0f64, f64::max);

    let Some(bounds) = feature_bounds(features) else {
        bail!("resolve: no feature has usable coordinates");
    };
    let mut envelope = expand_rect(bounds, max_buffer + params.hex_spacing);
    if let Some((min_x, min_y, max_x, max_y)) = extent {
        let wanted = Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        );
        envelope = match clip_rect(envelope, wanted) {
            Some(r) => r,
            None => bail!("resolve: extent excludes every loaded feature"),
        };
    }

    let mut stats = ResolveStats::default();
    stats.features_in = features.len();

    // Sanitize and buffer in parallel; order of results follows input order.
    let buffered: Vec<Option<BufferedFeature>> = features
        .par_iter()
        .map(|f| {
            let clean = sanitize_geometry(&f.geometry)?;
            let shape = buffer_geometry(&clean, params.buffer_for(f.kind))?;
            let bounds = shape.bounding_rect()?;
            Some(BufferedFeature {
                feature: f.id,
                crossability: params.crossability_for(f.kind),
                shape,
                bounds,
            })
        })
        .collect();

    let mut kept: Vec<BufferedFeature> = Vec::with_capacity(buffered.len());
    for (f, b) in features.iter().zip(buffered) {
        match b {
            Some(b) => kept.push(b),
            None => {
                warn!("feature {}: dropping unrepairable geometry", f.id.0);
                stats.features_dropped += 1;
            }
        }
    }

    // Touch-based merge: union-find over pairs whose buffers intersect.
    let boxes: Vec<GeomWithData<Rectangle<[f64; 2]>, usize>> = kept
        .iter()
        .enumerate()
        .map(|(idx, b)| {
            GeomWithData::new(
                Rectangle::from_corners(
                    [b.bounds.min().x, b.bounds.min().y],
                    [b.bounds.max().x, b.bounds.max().y],
                ),
                idx,
            )
        })
        .collect();
    let tree = RTree::bulk_load(boxes);

    let mut uf = UnionFind::<usize>::new(kept.len());
    for (i, b) in kept.iter().enumerate() {
        let envelope_i = AABB::from_corners(
            [b.bounds.min().x, b.bounds.min().y],
            [b.bounds.max().x, b.bounds.max().y],
        );
        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&envelope_i)
            .map(|item| item.data)
            .filter(|&j| j > i)
            .collect();
        candidates.sort_unstable();
        for j in candidates {
            if b.shape.intersects(&kept[j].shape) {
                uf.union(i, j);
            }
        }
    }

    // Group by component; members stay in ascending input order.
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..kept.len() {
        groups.entry(uf.find_mut(i)).or_default().push(i);
    }
    let mut components: Vec<Vec<usize>> = groups.into_values().collect();
    // Deterministic order: by lowest member feature id.
    components.sort_by_key(|c| kept[c[0]].feature);
    stats.merge_groups = components.len();

    let envelope_poly = MultiPolygon::new(vec![envelope.to_polygon()]);
    let mut obstacles: Vec<WaterObstacle> = Vec::new();
    let mut next_id = 1u64;
    for members in components {
        let shapes: Vec<MultiPolygon<f64>> =
            members.iter().map(|&i| kept[i].shape.clone()).collect();
        let merged = union_all(shapes)
            .simplify_vw_preserve(params.simplify_tolerance)
            .intersection(&envelope_poly);

        let total_area: f64 = merged.0.iter().map(|p| geo::Area::unsigned_area(p)).sum();
        if total_area <= 1e-9 {
            continue;
        }
        if total_area > params.max_obstacle_area {
            let sources: Vec<i64> = members.iter().map(|&i| kept[i].feature.0).collect();
            warn!(
                "obstacle from features {:?}: area {:.0} exceeds limit {:.0}, dropping",
                sources, total_area, params.max_obstacle_area
            );
            stats.obstacles_dropped_oversized += 1;
            continue;
        }

        let min_crossability = members
            .iter()
            .map(|&i| kept[i].crossability)
            .fold(f64::INFINITY, f64::min);
        let mut source_features: Vec<FeatureId> =
            members.iter().map(|&i| kept[i].feature).collect();
        source_features.sort_unstable();

        // A merged group can clip into several parts; keep part order stable.
        let mut parts: Vec<geo::Polygon<f64>> = merged.0;
        parts.sort_by(|a, b| {
            let ra = a.bounding_rect().map(|r| (r.min().x, r.min().y));
            let rb = b.bounding_rect().map(|r| (r.min().x, r.min().y));
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
        });
        for polygon in parts {
            let area = geo::Area::unsigned_area(&polygon);
            if area <= 1e-9 {
                continue;
            }
            obstacles.push(WaterObstacle {
                id: ObstacleId(next_id),
                polygon,
                area,
                min_crossability,
                source_features: source_features.clone(),
            });
            next_id += 1;
        }
    }
    stats.obstacles_out = obstacles.len();

    println!(
        "resolve: {} features -> {} obstacles ({} merge groups, {} dropped, {} oversized)",
        stats.features_in,
        stats.obstacles_out,
        stats.merge_groups,
        stats.features_dropped,
        stats.obstacles_dropped_oversized
    );

    Ok(ResolveOutput {
        obstacles,
        envelope,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::graph::models::{FeatureGeometry, FeatureKind};
    use geo::{Coord, Polygon};

    fn lake(id: i64, minx: f64, miny: f64, size: f64) -> WaterFeature {
        WaterFeature {
            id: FeatureId(id),
            kind: FeatureKind::Lake,
            name: None,
            geometry: FeatureGeometry::Polygon(Polygon::new(
                vec![
                    Coord { x: minx, y: miny },
                    Coord { x: minx + size, y: miny },
                    Coord { x: minx + size, y: miny + size },
                    Coord { x: minx, y: miny + size },
                    Coord { x: minx, y: miny },
                ]
                .into(),
                vec![],
            )),
        }
    }

    #[test]
    fn empty_input_is_fatal() {
        let params = GraphParams::default();
        assert!(resolve_obstacles(&[], &params, None).is_err());
    }

    #[test]
    fn touching_buffers_merge_into_one_obstacle() -> Result<()> {
        let params = GraphParams::default();
        // Two 100 unit buffers bridge the 150 unit gap; the third lake is
        // far enough away to stay separate.
        let features = vec![
            lake(1, 0.0, 0.0, 100.0),
            lake(2, 250.0, 0.0, 100.0),
            lake(3, 5000.0, 0.0, 100.0),
        ];
        let out = resolve_obstacles(&features, &params, None)?;
        assert_eq!(out.stats.merge_groups, 2);
        assert_eq!(out.obstacles.len(), 2);
        assert_eq!(
            out.obstacles[0].source_features,
            vec![FeatureId(1), FeatureId(2)]
        );
        assert_eq!(out.obstacles[1].source_features, vec![FeatureId(3)]);
        assert_eq!(out.obstacles[0].min_crossability, params.cross_lake);
        Ok(())
    }

    #[test]
    fn disjoint_buffers_stay_separate() -> Result<()> {
        let params = GraphParams::default();
        // Gap of 300 between squares; two 100 unit buffers leave 100 clear.
        let features = vec![lake(1, 0.0, 0.0, 100.0), lake(2, 400.0, 0.0, 100.0)];
        let out = resolve_obstacles(&features, &params, None)?;
        assert_eq!(out.obstacles.len(), 2);
        assert_eq!(out.obstacles[0].id, ObstacleId(1));
        assert_eq!(out.obstacles[1].id, ObstacleId(2));
        Ok(())
    }

    #[test]
    fn unrepairable_features_are_dropped() -> Result<()> {
        let params = GraphParams::default();
        let bad = WaterFeature {
            id: FeatureId(7),
            kind: FeatureKind::Stream,
            name: None,
            geometry: FeatureGeometry::Polyline(
                vec![Coord { x: 0.0, y: 0.0 }, Coord { x: f64::NAN, y: 1.0 }].into(),
            ),
        };
        let out = resolve_obstacles(&[lake(1, 0.0, 0.0, 100.0), bad], &params, None)?;
        assert_eq!(out.stats.features_dropped, 1);
        assert_eq!(out.obstacles.len(), 1);
        Ok(())
    }

    #[test]
    fn oversized_obstacles_are_dropped_with_count() -> Result<()> {
        let mut params = GraphParams::default();
        params.max_obstacle_area = 10.0;
        let out = resolve_obstacles(&[lake(1, 0.0, 0.0, 100.0)], &params, None)?;
        assert_eq!(out.stats.obstacles_dropped_oversized, 1);
        assert!(out.obstacles.is_empty());
        Ok(())
    }

    #[test]
    fn extent_clips_the_obstacle_and_envelope() -> Result<()> {
        let params = GraphParams::default();
        let extent = Some((0.0, 0.0, 150.0, 150.0));
        let out = resolve_obstacles(&[lake(1, 0.0, 0.0, 100.0)], &params, extent)?;
        assert_eq!(out.envelope.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(out.envelope.max(), Coord { x: 150.0, y: 150.0 });
        assert_eq!(out.obstacles.len(), 1);
        for c in &out.obstacles[0].polygon.exterior().0 {
            assert!(c.x >= -1e-6 && c.x <= 150.0 + 1e-6);
            assert!(c.y >= -1e-6 && c.y <= 150.0 + 1e-6);
        }
        // The buffered lake covers the whole clipped window.
        approx::assert_relative_eq!(out.obstacles[0].area, 22_500.0, max_relative = 1e-3);
        Ok(())
    }

    #[test]
    fn repeated_runs_are_bit_identical() -> Result<()> {
        let params = GraphParams::default();
        let features = vec![
            lake(1, 0.0, 0.0, 100.0),
            lake(2, 250.0, 40.0, 80.0),
            lake(3, 900.0, 900.0, 60.0),
        ];
        let a = resolve_obstacles(&features, &params, None)?;
        let b = resolve_obstacles(&features, &params, None)?;
        assert_eq!(a.obstacles.len(), b.obstacles.len());
        for (x, y) in a.obstacles.iter().zip(&b.obstacles) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.source_features, y.source_features);
            assert_eq!(x.area.to_bits(), y.area.to_bits());
        }
        Ok(())
    }
}
