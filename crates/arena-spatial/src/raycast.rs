//! Ray queries against the [`SpatialIndex`].
//!
//! A [`Ray`] walks the grid cells along a segment (reusing the exact walk the
//! index rasterizes with) and yields every non-empty cell together with the
//! distance at which the ray enters it.  [`RayCaster`] wraps the two query
//! shapes the simulator needs:
//!
//! - **point-to-point**: a fixed segment, used for collision checks and
//!   line-of-sight tests;
//! - **point-to-bearing-range**: an origin, a bearing, and a maximum range,
//!   used for every range-sensor beam.
//!
//! The caster knows nothing about agents.  Callers pass a predicate
//! `(caster, candidate) -> bool`; the first occupant along the ray for which
//! it returns `true` is the hit.
//!
//! # Example
//!
//! ```rust
//! use arena_spatial::{RayCaster, SpatialIndex};
//! use arena_types::{AgentId, Line};
//!
//! let me = AgentId::new(0, 0);
//! let wall = AgentId::new(1, 0);
//! let mut index = SpatialIndex::new(10.0, 10.0, 10.0).unwrap();
//! index.insert_line(&Line::new(6.05, 0.0, 6.05, 10.0), wall);
//!
//! let hit = RayCaster::new(&index)
//!     .point_to_bearing_range(me, (1.0, 5.0), 0.0, 8.0, |a, b| a != b)
//!     .unwrap();
//! assert_eq!(hit.owner, wall);
//! assert!((hit.range - 5.0).abs() < 1e-6);
//! ```

use arena_types::{AgentId, Line};

use crate::grid::{LineCells, SpatialIndex};

/// The first qualifying occupant along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub owner: AgentId,
    /// World point where the ray enters the hit cell.
    pub x: f64,
    pub y: f64,
    /// Distance from the ray origin to `(x, y)`.
    pub range: f64,
}

/// One non-empty cell along a ray.
#[derive(Debug, Clone, Copy)]
pub struct RaySample<'a> {
    pub cx: usize,
    pub cy: usize,
    /// Distance from the ray origin at which the ray enters this cell.
    pub range: f64,
    pub occupants: &'a [AgentId],
}

/// Iterator over the occupied cells along a segment, nearest first.
///
/// Borrows the index for its lifetime, so the grid cannot change under a
/// query in progress.
#[derive(Debug, Clone)]
pub struct Ray<'a> {
    index: &'a SpatialIndex,
    cells: LineCells,
    origin: (f64, f64),
    // Unit direction and segment length in metres.
    dir: (f64, f64),
    length: f64,
}

impl<'a> Ray<'a> {
    fn new(index: &'a SpatialIndex, line: Line) -> Self {
        let length = line.length();
        let dir = if length > 0.0 {
            ((line.x2 - line.x1) / length, (line.y2 - line.y1) / length)
        } else {
            (0.0, 0.0)
        };
        Self {
            index,
            cells: index.line_cells(&line),
            origin: (line.x1, line.y1),
            dir,
            length,
        }
    }

    /// A ray that visits nothing.
    fn empty(index: &'a SpatialIndex) -> Self {
        Self::new(index, Line::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN))
    }

    /// Total length of the ray in metres.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Walk until an occupant satisfies `pred(caster, candidate)`.
    ///
    /// Within one cell candidates are tried in the cell's insertion order.
    pub fn first_match<F>(mut self, caster: AgentId, mut pred: F) -> Option<Hit>
    where
        F: FnMut(AgentId, AgentId) -> bool,
    {
        while let Some(sample) = self.next() {
            if let Some(&owner) = sample.occupants.iter().find(|&&c| pred(caster, c)) {
                let (x, y) = self.point_at(sample.range);
                return Some(Hit {
                    owner,
                    x,
                    y,
                    range: sample.range,
                });
            }
        }
        None
    }

    fn point_at(&self, range: f64) -> (f64, f64) {
        (
            self.origin.0 + self.dir.0 * range,
            self.origin.1 + self.dir.1 * range,
        )
    }
}

impl<'a> Iterator for Ray<'a> {
    type Item = RaySample<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for (cx, cy, t) in self.cells.by_ref() {
            let occupants = self.index.occupants_in(cx, cy);
            if !occupants.is_empty() {
                return Some(RaySample {
                    cx,
                    cy,
                    range: t * self.length,
                    occupants,
                });
            }
        }
        None
    }
}

/// Builds rays over a borrowed index.
#[derive(Debug, Clone, Copy)]
pub struct RayCaster<'a> {
    index: &'a SpatialIndex,
}

impl<'a> RayCaster<'a> {
    pub fn new(index: &'a SpatialIndex) -> Self {
        Self { index }
    }

    /// Ray along the segment `from → to`.
    pub fn ray_between(&self, from: (f64, f64), to: (f64, f64)) -> Ray<'a> {
        Ray::new(self.index, Line::new(from.0, from.1, to.0, to.1))
    }

    /// Ray from `origin` along `bearing` (radians, world frame) out to
    /// `max_range` metres.  A non-positive or non-finite range visits
    /// nothing.
    pub fn ray_along(&self, origin: (f64, f64), bearing: f64, max_range: f64) -> Ray<'a> {
        if !(max_range.is_finite() && max_range > 0.0 && bearing.is_finite()) {
            return Ray::empty(self.index);
        }
        let to = (
            origin.0 + max_range * bearing.cos(),
            origin.1 + max_range * bearing.sin(),
        );
        self.ray_between(origin, to)
    }

    /// First occupant on the segment `from → to` accepted by `pred`.
    pub fn point_to_point<F>(
        &self,
        caster: AgentId,
        from: (f64, f64),
        to: (f64, f64),
        pred: F,
    ) -> Option<Hit>
    where
        F: FnMut(AgentId, AgentId) -> bool,
    {
        self.ray_between(from, to).first_match(caster, pred)
    }

    /// First occupant within `max_range` of `origin` along `bearing`
    /// accepted by `pred`.
    pub fn point_to_bearing_range<F>(
        &self,
        caster: AgentId,
        origin: (f64, f64),
        bearing: f64,
        max_range: f64,
        pred: F,
    ) -> Option<Hit>
    where
        F: FnMut(AgentId, AgentId) -> bool,
    {
        self.ray_along(origin, bearing, max_range)
            .first_match(caster, pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn id(i: u32) -> AgentId {
        AgentId::new(i, 0)
    }

    /// Axis-aligned box outline centred on `(x, y)`.
    fn square(x: f64, y: f64, size: f64) -> Vec<Line> {
        let h = size / 2.0;
        vec![
            Line::new(x - h, y - h, x + h, y - h),
            Line::new(x + h, y - h, x + h, y + h),
            Line::new(x + h, y + h, x - h, y + h),
            Line::new(x - h, y + h, x - h, y - h),
        ]
    }

    /// Two 1 m boxes 5 m apart on a 20 × 10 m world at 10 cells/m.
    fn corridor() -> SpatialIndex {
        let mut index = SpatialIndex::new(20.0, 10.0, 10.0).unwrap();
        index.insert_lines(&square(5.0, 5.0, 1.0), id(0));
        index.insert_lines(&square(10.0, 5.0, 1.0), id(1));
        index
    }

    // ── Scenarios ───────────────────────────────────────────────────────────

    #[test]
    fn corridor_hit_reports_near_edge() {
        let index = corridor();
        let hit = RayCaster::new(&index)
            .point_to_bearing_range(id(0), (5.0, 5.0), 0.0, 10.0, |me, c| me != c)
            .expect("B must be hit");
        assert_eq!(hit.owner, id(1));
        assert!((hit.range - 4.5).abs() < 1e-6, "range={}", hit.range);
        assert!((hit.x - 9.5).abs() < 1e-6 && (hit.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn self_ray_skips_own_outline() {
        let index = corridor();
        // Without exclusion the first occupant is A's own right edge.
        let naive = RayCaster::new(&index)
            .point_to_bearing_range(id(0), (5.0, 5.0), 0.0, 10.0, |_, _| true)
            .unwrap();
        assert_eq!(naive.owner, id(0));

        let hit = RayCaster::new(&index)
            .point_to_bearing_range(id(0), (5.0, 5.0), 0.0, 10.0, |me, c| me != c)
            .unwrap();
        assert_ne!(hit.owner, id(0));
    }

    #[test]
    fn ray_leaving_grid_returns_none() {
        let index = corridor();
        let caster = RayCaster::new(&index);
        let pred = |me: AgentId, c: AgentId| me != c;
        assert!(caster.point_to_bearing_range(id(0), (5.0, 5.0), PI, 50.0, pred).is_none());
        assert!(caster.point_to_bearing_range(id(0), (5.0, 5.0), FRAC_PI_2, 50.0, pred).is_none());
        assert!(caster.point_to_bearing_range(id(0), (-3.0, -3.0), PI, 5.0, pred).is_none());
    }

    #[test]
    fn short_range_stops_before_target() {
        let index = corridor();
        let hit = RayCaster::new(&index).point_to_bearing_range(
            id(0),
            (5.0, 5.0),
            0.0,
            4.0,
            |me, c| me != c,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn degenerate_ranges_visit_nothing() {
        let index = corridor();
        let caster = RayCaster::new(&index);
        assert!(caster.point_to_bearing_range(id(9), (5.0, 5.0), 0.0, 0.0, |_, _| true).is_none());
        assert!(caster.point_to_bearing_range(id(9), (5.0, 5.0), f64::NAN, 3.0, |_, _| true).is_none());
        assert!(caster.point_to_bearing_range(id(9), (5.0, 5.0), 0.0, f64::INFINITY, |_, _| true).is_none());
    }

    // ── Predicates ──────────────────────────────────────────────────────────

    #[test]
    fn predicate_filters_candidates() {
        let mut index = corridor();
        index.insert_lines(&square(15.0, 5.0, 1.0), id(2));
        let visible: HashSet<AgentId> = [id(2)].into_iter().collect();

        let hit = RayCaster::new(&index)
            .point_to_bearing_range(id(0), (5.0, 5.0), 0.0, 14.0, |me, c| {
                me != c && visible.contains(&c)
            })
            .unwrap();
        assert_eq!(hit.owner, id(2));
        assert!((hit.range - 9.5).abs() < 1e-6, "range={}", hit.range);
    }

    #[test]
    fn point_to_point_respects_endpoint() {
        let index = corridor();
        let caster = RayCaster::new(&index);
        let pred = |me: AgentId, c: AgentId| me != c;
        assert!(caster.point_to_point(id(0), (6.0, 5.0), (9.0, 5.0), pred).is_none());
        let hit = caster.point_to_point(id(0), (6.0, 5.0), (9.8, 5.0), pred).unwrap();
        assert_eq!(hit.owner, id(1));
        assert!((hit.range - 3.5).abs() < 1e-6, "range={}", hit.range);
    }

    #[test]
    fn nothing_is_hit_past_a_fractional_world_edge() {
        let mut index = SpatialIndex::new(10.05, 5.0, 10.0).unwrap();
        index.insert_line(&Line::new(10.07, 1.0, 10.07, 2.0), id(1));
        let caster = RayCaster::new(&index);
        assert!(caster.point_to_point(id(0), (9.0, 1.5), (11.0, 1.5), |_, _| true).is_none());
        assert!(index.occupants_at(10.07, 1.5).is_empty());
    }

    #[test]
    fn ray_yields_occupied_cells_in_order() {
        let index = corridor();
        let samples: Vec<_> = RayCaster::new(&index).ray_along((0.5, 5.0), 0.0, 19.0).collect();
        let owners: Vec<AgentId> = samples.iter().flat_map(|s| s.occupants.iter().copied()).collect();
        assert_eq!(owners, vec![id(0), id(0), id(1), id(1)]);
        assert!(samples.windows(2).all(|w| w[0].range < w[1].range));
    }
}
