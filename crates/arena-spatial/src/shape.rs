//! Agent outlines.
//!
//! A [`Shape`] is a set of line segments normalized into the unit square
//! `[0, 1] × [0, 1]`.  It carries no size of its own: [`footprint`] scales it
//! by the agent's [`Geometry`], centres it on the agent origin, applies the
//! geometry offset, then the agent's global pose.
//!
//! [`footprint`] is the only code path that produces global segments for the
//! index.  Whatever was inserted for an agent is stored and later removed
//! verbatim, so insertion and removal can never disagree.

use arena_types::{Geometry, Line, Outline, Pose, Rect, SimError};

/// Extents below this are treated as zero when normalizing.
const EPSILON: f64 = 1e-12;

/// An outline normalized into the unit square.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    lines: Vec<Line>,
}

impl Shape {
    /// The unit rectangle, the default outline of every agent.
    pub fn unit_rect() -> Self {
        Self {
            lines: vec![
                Line::new(0.0, 0.0, 1.0, 0.0),
                Line::new(1.0, 0.0, 1.0, 1.0),
                Line::new(1.0, 1.0, 0.0, 1.0),
                Line::new(0.0, 1.0, 0.0, 0.0),
            ],
        }
    }

    /// Normalize an arbitrary segment set so its bounding box fills the unit
    /// square.  An axis with zero extent (e.g. a single straight wall) is
    /// centred on 0.5.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DegenerateGeometry`] for an empty set, non-finite
    /// coordinates, zero-length segments, or a set with no extent at all.
    pub fn from_lines(lines: &[Line]) -> Result<Self, SimError> {
        if lines.is_empty() {
            return Err(SimError::DegenerateGeometry("outline has no segments".into()));
        }
        let (mut minx, mut miny) = (f64::INFINITY, f64::INFINITY);
        let (mut maxx, mut maxy) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (i, l) in lines.iter().enumerate() {
            if !l.is_finite() {
                return Err(SimError::DegenerateGeometry(format!(
                    "segment {i} has non-finite coordinates"
                )));
            }
            if l.length() < EPSILON {
                return Err(SimError::DegenerateGeometry(format!(
                    "segment {i} has zero length"
                )));
            }
            minx = minx.min(l.x1).min(l.x2);
            miny = miny.min(l.y1).min(l.y2);
            maxx = maxx.max(l.x1).max(l.x2);
            maxy = maxy.max(l.y1).max(l.y2);
        }

        let scalex = maxx - minx;
        let scaley = maxy - miny;
        let nx = |x: f64| if scalex < EPSILON { 0.5 } else { (x - minx) / scalex };
        let ny = |y: f64| if scaley < EPSILON { 0.5 } else { (y - miny) / scaley };

        Ok(Self {
            lines: lines
                .iter()
                .map(|l| Line::new(nx(l.x1), ny(l.y1), nx(l.x2), ny(l.y2)))
                .collect(),
        })
    }

    /// Outline made of the four edges of every rectangle.
    pub fn from_rects(rects: &[Rect]) -> Result<Self, SimError> {
        let mut lines = Vec::with_capacity(rects.len() * 4);
        for (i, r) in rects.iter().enumerate() {
            if !(r.w > 0.0 && r.h > 0.0) {
                return Err(SimError::DegenerateGeometry(format!(
                    "rectangle {i} has non-positive size {}×{}",
                    r.w, r.h
                )));
            }
            let (x0, y0, x1, y1) = (r.x, r.y, r.x + r.w, r.y + r.h);
            lines.push(Line::new(x0, y0, x1, y0));
            lines.push(Line::new(x1, y0, x1, y1));
            lines.push(Line::new(x1, y1, x0, y1));
            lines.push(Line::new(x0, y1, x0, y0));
        }
        Self::from_lines(&lines)
    }

    /// Build the normalized shape described by `outline`.
    pub fn from_outline(outline: &Outline) -> Result<Self, SimError> {
        match outline {
            Outline::Rectangle => Ok(Self::unit_rect()),
            Outline::Lines(lines) => Self::from_lines(lines),
            Outline::Rects(rects) => Self::from_rects(rects),
        }
    }

    /// The normalized segments.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for Shape {
    fn default() -> Self {
        Self::unit_rect()
    }
}

/// Global segments of `shape` for an agent with `geometry` at world pose
/// `global`.
///
/// # Errors
///
/// - [`SimError::DegenerateGeometry`] when the size is not strictly positive
///   and finite.
/// - [`SimError::NonFinitePose`] when the pose, offset, or any resulting
///   coordinate is non-finite.
pub fn footprint(shape: &Shape, geometry: &Geometry, global: &Pose) -> Result<Vec<Line>, SimError> {
    let size = geometry.size;
    if !(size.x.is_finite() && size.y.is_finite() && size.x > 0.0 && size.y > 0.0) {
        return Err(SimError::DegenerateGeometry(format!(
            "size must be positive, got {}×{}",
            size.x, size.y
        )));
    }
    let frame = global.compose(geometry.pose);
    if !frame.is_finite() {
        return Err(SimError::NonFinitePose {
            context: "footprint".into(),
            x: frame.x,
            y: frame.y,
            a: frame.a,
        });
    }

    let place = |x: f64, y: f64| frame.transform_point((x - 0.5) * size.x, (y - 0.5) * size.y);
    let lines: Vec<Line> = shape
        .lines
        .iter()
        .map(|l| {
            let (x1, y1) = place(l.x1, l.y1);
            let (x2, y2) = place(l.x2, l.y2);
            Line::new(x1, y1, x2, y2)
        })
        .collect();

    match lines.iter().find(|l| !l.is_finite()) {
        Some(bad) => Err(SimError::NonFinitePose {
            context: "footprint segment".into(),
            x: bad.x1,
            y: bad.y1,
            a: frame.a,
        }),
        None => Ok(lines),
    }
}
