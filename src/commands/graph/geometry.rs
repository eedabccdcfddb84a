//! Geometry helpers shared by the pipeline stages: the feature-store JSON
//! codec, dilation buffers built from per-segment capsules, ring sampling
//! with arc positions, and the read-only obstacle index used for
//! point-in-water and segment-crossing tests.

use anyhow::{anyhow, Context, Result};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{
    BooleanOps, BoundingRect, Closest, ClosestPoint, Contains, Coord, Intersects, Line,
    LineString, MultiPolygon, Point, Polygon, Rect,
};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use super::models::{FeatureGeometry, ObstacleId, WaterFeature, WaterObstacle};

/// Segments used to approximate each semicircular buffer end cap.
const CAP_ARC_STEPS: usize = 8;

pub fn dist(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

pub fn midpoint(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }
}

fn unit(from: Coord<f64>, to: Coord<f64>) -> Option<[f64; 2]> {
    let len = dist(from, to);
    if len <= f64::EPSILON {
        None
    } else {
        Some([(to.x - from.x) / len, (to.y - from.y) / len])
    }
}

// ---- Feature store codec ----

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum GeometryJson {
    Polygon { coords: Vec<[f64; 2]> },
    Polyline { coords: Vec<[f64; 2]> },
}

pub fn decode_feature_geometry(text: &str) -> Result<FeatureGeometry> {
    let parsed: GeometryJson =
        serde_json::from_str(text).context("invalid feature geometry JSON")?;
    match parsed {
        GeometryJson::Polygon { coords } => {
            let ring: Vec<Coord<f64>> =
                coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect();
            Ok(FeatureGeometry::Polygon(Polygon::new(ring.into(), vec![])))
        }
        GeometryJson::Polyline { coords } => {
            let line: Vec<Coord<f64>> =
                coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect();
            Ok(FeatureGeometry::Polyline(line.into()))
        }
    }
}

pub fn encode_polygon_geometry(polygon: &Polygon<f64>) -> Result<String> {
    #[derive(Serialize)]
    struct PolygonJson {
        exterior: Vec<[f64; 2]>,
        holes: Vec<Vec<[f64; 2]>>,
    }
    let ring_coords = |ring: &LineString<f64>| ring.0.iter().map(|c| [c.x, c.y]).collect();
    let body = PolygonJson {
        exterior: ring_coords(polygon.exterior()),
        holes: polygon.interiors().iter().map(ring_coords).collect(),
    };
    serde_json::to_string(&body).map_err(|e| anyhow!("encode obstacle geometry: {}", e))
}

// ---- Input repair ----

/// Drops non-finite coordinates and collapsed duplicates; returns None when
/// the geometry cannot be reduced to something usable (the caller drops the
/// feature with a warning).
pub fn sanitize_geometry(geometry: &FeatureGeometry) -> Option<FeatureGeometry> {
    match geometry {
        FeatureGeometry::Polygon(p) => {
            let ring = dedupe_coords(&p.exterior().0)?;
            // A ring needs three distinct vertices; the closing point is
            // re-added by Polygon::new.
            let mut open = ring.clone();
            if open.len() >= 2 && dist(open[0], *open.last()?) <= f64::EPSILON {
                open.pop();
            }
            if open.len() < 3 {
                return None;
            }
            Some(FeatureGeometry::Polygon(Polygon::new(open.into(), vec![])))
        }
        FeatureGeometry::Polyline(l) => {
            let pts = dedupe_coords(&l.0)?;
            if pts.len() < 2 {
                return None;
            }
            Some(FeatureGeometry::Polyline(pts.into()))
        }
    }
}

fn dedupe_coords(coords: &[Coord<f64>]) -> Option<Vec<Coord<f64>>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for c in coords {
        if !c.x.is_finite() || !c.y.is_finite() {
            return None;
        }
        if out.last().map_or(true, |p| dist(*p, *c) > f64::EPSILON) {
            out.push(*c);
        }
    }
    Some(out)
}

// ---- Buffering ----

/// Dilates a feature by `radius`: the union of the original area (for
/// polygons) with a capsule swept along every boundary segment. This is the
/// exact Minkowski dilation up to the polygonal approximation of the end
/// caps.
pub fn buffer_geometry(geometry: &FeatureGeometry, radius: f64) -> Option<MultiPolygon<f64>> {
    let mut pieces: Vec<MultiPolygon<f64>> = Vec::new();
    match geometry {
        FeatureGeometry::Polygon(p) => {
            pieces.push(MultiPolygon::new(vec![p.clone()]));
            if radius > 0.0 {
                for line in p.exterior().lines() {
                    pieces.push(MultiPolygon::new(vec![capsule(line.start, line.end, radius)]));
                }
                for hole in p.interiors() {
                    for line in hole.lines() {
                        pieces
                            .push(MultiPolygon::new(vec![capsule(line.start, line.end, radius)]));
                    }
                }
            }
        }
        FeatureGeometry::Polyline(l) => {
            if radius <= 0.0 {
                return None;
            }
            for line in l.lines() {
                pieces.push(MultiPolygon::new(vec![capsule(line.start, line.end, radius)]));
            }
        }
    }
    let merged = union_all(pieces);
    if merged.0.is_empty() {
        None
    } else {
        Some(merged)
    }
}

pub fn union_all(parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut acc = MultiPolygon::new(vec![]);
    for p in parts {
        acc = acc.union(&p);
    }
    acc
}

fn capsule(a: Coord<f64>, b: Coord<f64>, r: f64) -> Polygon<f64> {
    let Some(u) = unit(a, b) else {
        return circle(a, r);
    };
    let phi = u[1].atan2(u[0]);
    let at = |center: Coord<f64>, angle: f64| Coord {
        x: center.x + r * angle.cos(),
        y: center.y + r * angle.sin(),
    };
    let half = std::f64::consts::PI;
    let step = half / CAP_ARC_STEPS as f64;
    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(2 * CAP_ARC_STEPS + 4);
    // Left offset side a -> b, then a semicircle around b, the right offset
    // side back, and a semicircle around a.
    ring.push(at(a, phi + half / 2.0));
    ring.push(at(b, phi + half / 2.0));
    for k in 1..=CAP_ARC_STEPS {
        ring.push(at(b, phi + half / 2.0 - k as f64 * step));
    }
    ring.push(at(a, phi - half / 2.0));
    // Stop one step short; Polygon::new closes the ring onto the first point.
    for k in 1..CAP_ARC_STEPS {
        ring.push(at(a, phi - half / 2.0 - k as f64 * step));
    }
    Polygon::new(ring.into(), vec![])
}

fn circle(c: Coord<f64>, r: f64) -> Polygon<f64> {
    let steps = 2 * CAP_ARC_STEPS;
    let mut ring = Vec::with_capacity(steps + 1);
    for k in 0..steps {
        let angle = 2.0 * std::f64::consts::PI * k as f64 / steps as f64;
        ring.push(Coord {
            x: c.x + r * angle.cos(),
            y: c.y + r * angle.sin(),
        });
    }
    Polygon::new(ring.into(), vec![])
}

// ---- Envelope helpers ----

pub fn feature_bounds(features: &[WaterFeature]) -> Option<Rect<f64>> {
    let mut acc: Option<Rect<f64>> = None;
    for f in features {
        let r = match &f.geometry {
            FeatureGeometry::Polygon(p) => p.bounding_rect(),
            FeatureGeometry::Polyline(l) => l.bounding_rect(),
        };
        if let Some(r) = r {
            acc = Some(match acc {
                None => r,
                Some(prev) => merge_rects(prev, r),
            });
        }
    }
    acc
}

pub fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

pub fn expand_rect(r: Rect<f64>, margin: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: r.min().x - margin,
            y: r.min().y - margin,
        },
        Coord {
            x: r.max().x + margin,
            y: r.max().y + margin,
        },
    )
}

pub fn clip_rect(a: Rect<f64>, b: Rect<f64>) -> Option<Rect<f64>> {
    let min = Coord {
        x: a.min().x.max(b.min().x),
        y: a.min().y.max(b.min().y),
    };
    let max = Coord {
        x: a.max().x.min(b.max().x),
        y: a.max().y.min(b.max().y),
    };
    if min.x < max.x && min.y < max.y {
        Some(Rect::new(min, max))
    } else {
        None
    }
}

// ---- Ring sampling ----

#[derive(Copy, Clone, Debug)]
pub struct RingSample {
    pub point: Coord<f64>,
    /// Normalized arc-length position in [0, 1).
    pub arc_pos: f64,
    pub tangent: [f64; 2],
}

pub fn ring_length(ring: &LineString<f64>) -> f64 {
    ring.lines().map(|l| l.dx().hypot(l.dy())).sum()
}

/// Evenly spaced samples along a closed ring. The requested spacing is
/// adjusted to divide the ring length exactly, which keeps the seam at
/// arc position 0 free of a short leftover gap.
pub fn sample_ring(ring: &LineString<f64>, spacing: f64) -> Vec<RingSample> {
    let total = ring_length(ring);
    if total <= f64::EPSILON || spacing <= 0.0 {
        return Vec::new();
    }
    let n = ((total / spacing).round() as usize).max(3);
    let step = total / n as f64;

    let mut samples = Vec::with_capacity(n);
    let mut lines: Vec<(Line<f64>, f64, f64)> = Vec::new();
    let mut cum = 0.0;
    for l in ring.lines() {
        let len = l.dx().hypot(l.dy());
        if len > f64::EPSILON {
            lines.push((l, cum, len));
        }
        cum += len;
    }
    if lines.is_empty() {
        return Vec::new();
    }

    let mut li = 0usize;
    for i in 0..n {
        let s = i as f64 * step;
        while li + 1 < lines.len() && lines[li].1 + lines[li].2 < s {
            li += 1;
        }
        let (line, start, len) = lines[li];
        let frac = ((s - start) / len).clamp(0.0, 1.0);
        let point = Coord {
            x: line.start.x + frac * line.dx(),
            y: line.start.y + frac * line.dy(),
        };
        let tangent = unit(line.start, line.end).unwrap_or([1.0, 0.0]);
        samples.push(RingSample {
            point,
            arc_pos: s / total,
            tangent,
        });
    }
    samples
}

/// The closest ring point to `p`, with its arc position and local tangent.
pub fn closest_ring_sample(ring: &LineString<f64>, p: Coord<f64>) -> Option<RingSample> {
    let total = ring_length(ring);
    if total <= f64::EPSILON {
        return None;
    }
    let query = Point::from(p);
    let mut best: Option<(f64, RingSample)> = None;
    let mut cum = 0.0;
    for l in ring.lines() {
        let len = l.dx().hypot(l.dy());
        if len <= f64::EPSILON {
            continue;
        }
        let closest = match l.closest_point(&query) {
            Closest::SinglePoint(q) | Closest::Intersection(q) => q,
            Closest::Indeterminate => {
                cum += len;
                continue;
            }
        };
        let c = Coord {
            x: closest.x(),
            y: closest.y(),
        };
        let d = dist(p, c);
        let arc = (cum + dist(l.start, c)) / total;
        let candidate = RingSample {
            point: c,
            arc_pos: arc % 1.0,
            tangent: unit(l.start, l.end).unwrap_or([1.0, 0.0]),
        };
        let better = match &best {
            None => true,
            Some((bd, bs)) => d < *bd - f64::EPSILON || (d <= *bd + f64::EPSILON && arc < bs.arc_pos),
        };
        if better {
            best = Some((d, candidate));
        }
        cum += len;
    }
    best.map(|(_, s)| s)
}

// ---- Obstacle index ----

type BoxItem = GeomWithData<Rectangle<[f64; 2]>, usize>;
type SegItem = GeomWithData<rstar::primitives::Line<[f64; 2]>, usize>;

/// Read-only spatial index over the resolved obstacle set, built once per
/// stage. Candidate lookups go through obstacle bounding boxes; crossing
/// tests additionally consult an R-tree of boundary segments.
pub struct ObstacleIndex<'a> {
    obstacles: &'a [WaterObstacle],
    boxes: RTree<BoxItem>,
    segments: RTree<SegItem>,
}

impl<'a> ObstacleIndex<'a> {
    pub fn build(obstacles: &'a [WaterObstacle]) -> ObstacleIndex<'a> {
        let mut boxes: Vec<BoxItem> = Vec::with_capacity(obstacles.len());
        let mut segments: Vec<SegItem> = Vec::new();
        for (idx, ob) in obstacles.iter().enumerate() {
            if let Some(r) = ob.polygon.bounding_rect() {
                boxes.push(GeomWithData::new(
                    Rectangle::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
                    idx,
                ));
            }
            for ring in std::iter::once(ob.polygon.exterior()).chain(ob.polygon.interiors()) {
                for l in ring.lines() {
                    segments.push(GeomWithData::new(
                        rstar::primitives::Line::new(
                            [l.start.x, l.start.y],
                            [l.end.x, l.end.y],
                        ),
                        idx,
                    ));
                }
            }
        }
        ObstacleIndex {
            obstacles,
            boxes: RTree::bulk_load(boxes),
            segments: RTree::bulk_load(segments),
        }
    }

    pub fn obstacles(&self) -> &'a [WaterObstacle] {
        self.obstacles
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Obstacle indices whose bounding box intersects `rect`, ascending.
    pub fn candidates_in_rect(&self, rect: Rect<f64>) -> Vec<usize> {
        let envelope = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );
        let mut ids: Vec<usize> = self
            .boxes
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.data)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Obstacle indices whose polygon actually intersects `poly`, ascending.
    pub fn intersecting(&self, poly: &Polygon<f64>) -> Vec<usize> {
        let Some(rect) = poly.bounding_rect() else {
            return Vec::new();
        };
        self.candidates_in_rect(rect)
            .into_iter()
            .filter(|&idx| self.obstacles[idx].polygon.intersects(poly))
            .collect()
    }

    /// Index of an obstacle whose interior strictly contains `p`.
    pub fn point_in_water(&self, p: Coord<f64>) -> Option<usize> {
        self.point_in_obstacle(p, None)
    }

    fn point_in_obstacle(&self, p: Coord<f64>, skip: Option<ObstacleId>) -> Option<usize> {
        let probe = AABB::from_point([p.x, p.y]);
        let mut hits: Vec<usize> = self
            .boxes
            .locate_in_envelope_intersecting(&probe)
            .map(|item| item.data)
            .collect();
        hits.sort_unstable();
        hits.into_iter().find(|&idx| {
            Some(self.obstacles[idx].id) != skip
                && self.obstacles[idx].polygon.contains(&Point::from(p))
        })
    }

    /// True when the straight segment a-b passes through an obstacle's
    /// interior. Boundary contact (an endpoint on a ring, or running along
    /// it) does not count. `skip` exempts one obstacle, used by perimeter
    /// edges that legitimately chord across their own obstacle.
    pub fn segment_crosses_interior(
        &self,
        a: Coord<f64>,
        b: Coord<f64>,
        skip: Option<ObstacleId>,
    ) -> bool {
        for q in [a, midpoint(a, b), b] {
            if self.point_in_obstacle(q, skip).is_some() {
                return true;
            }
        }
        let seg = Line::new(a, b);
        let envelope = AABB::from_corners(
            [a.x.min(b.x), a.y.min(b.y)],
            [a.x.max(b.x), a.y.max(b.y)],
        );
        for item in self.segments.locate_in_envelope_intersecting(&envelope) {
            if Some(self.obstacles[item.data].id) == skip {
                continue;
            }
            let boundary = Line::new(
                Coord {
                    x: item.geom().from[0],
                    y: item.geom().from[1],
                },
                Coord {
                    x: item.geom().to[0],
                    y: item.geom().to[1],
                },
            );
            if let Some(LineIntersection::SinglePoint { is_proper: true, .. }) =
                line_intersection(seg, boundary)
            {
                return true;
            }
        }
        false
    }
}
