use geo::{Coord, Polygon, Rect};

use super::models::CellId;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Flat-top hexagonal tiling of a rectangular envelope. `spacing` is the
/// distance between adjacent cell centers; all six neighbors of a cell sit at
/// exactly that distance, so the tiling has no gaps or overlaps.
#[derive(Clone, Debug)]
pub struct HexGrid {
    origin: Coord<f64>,
    radius: f64,
    cols: i32,
    rows: i32,
}

impl HexGrid {
    /// Grid whose cells jointly cover `envelope`, with one extra ring so the
    /// envelope edge is never left uncovered by rounding.
    pub fn cover(envelope: Rect<f64>, spacing: f64) -> HexGrid {
        let radius = spacing / SQRT_3;
        let col_step = 1.5 * radius;
        let row_step = SQRT_3 * radius;
        let width = envelope.max().x - envelope.min().x;
        let height = envelope.max().y - envelope.min().y;
        let cols = (width / col_step).ceil() as i32 + 2;
        let rows = (height / row_step).ceil() as i32 + 2;
        HexGrid {
            origin: envelope.min(),
            radius,
            cols,
            rows,
        }
    }

    pub fn center(&self, id: CellId) -> Coord<f64> {
        let x = self.origin.x + id.col as f64 * 1.5 * self.radius;
        let offset = if id.col.rem_euclid(2) == 1 {
            SQRT_3 * self.radius / 2.0
        } else {
            0.0
        };
        let y = self.origin.y + id.row as f64 * SQRT_3 * self.radius + offset;
        Coord { x, y }
    }

    pub fn polygon(&self, id: CellId) -> Polygon<f64> {
        let c = self.center(id);
        let r = self.radius;
        let mut ring = Vec::with_capacity(7);
        for k in 0..6 {
            let angle = std::f64::consts::FRAC_PI_3 * k as f64;
            ring.push(Coord {
                x: c.x + r * angle.cos(),
                y: c.y + r * angle.sin(),
            });
        }
        ring.push(ring[0]);
        Polygon::new(ring.into(), vec![])
    }

    /// All cell ids in deterministic column-major order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        let mut ids = Vec::with_capacity((self.cols as usize + 1) * (self.rows as usize + 1));
        for col in -1..=self.cols {
            for row in -1..=self.rows {
                ids.push(CellId { col, row });
            }
        }
        ids
    }

    /// Cell owning `p`. Hex cells are the Voronoi regions of their centers,
    /// so the nearest candidate center wins.
    pub fn cell_at(&self, p: Coord<f64>) -> CellId {
        let col_guess = ((p.x - self.origin.x) / (1.5 * self.radius)).round() as i32;
        let row_step = SQRT_3 * self.radius;
        let mut best = CellId { col: col_guess, row: 0 };
        let mut best_d2 = f64::INFINITY;
        for col in (col_guess - 1)..=(col_guess + 1) {
            let offset = if col.rem_euclid(2) == 1 { row_step / 2.0 } else { 0.0 };
            let row_guess = ((p.y - self.origin.y - offset) / row_step).round() as i32;
            for row in (row_guess - 1)..=(row_guess + 1) {
                let id = CellId { col, row };
                let c = self.center(id);
                let d2 = (p.x - c.x).powi(2) + (p.y - c.y).powi(2);
                if d2 < best_d2 {
                    best_d2 = d2;
                    best = id;
                }
            }
        }
        best
    }
}
