//! Uniform occupancy grid over the bounded world.
//!
//! The world rectangle `[0, width) × [0, height)` (metres) is divided into
//! square cells of side `1 / resolution`.  Each [`Cell`] holds the handles of
//! the agents whose global outline passes through it, at most once per
//! owner.  Cells are stored in one flat vector indexed by `cy * cols + cx`;
//! an empty cell holds no heap allocation.
//!
//! Segments are rasterized by [`LineCells`], an exact cell walk: every cell
//! the segment passes through is visited once, in order along the segment.
//! The same walk drives insertion, removal, and ray casting, so what a ray
//! sees is exactly what was drawn.
//!
//! Nothing in this module fails at query time.  Coordinates outside the grid
//! are clipped or ignored; non-finite segments rasterize to nothing.

use std::collections::{HashMap, HashSet};

use arena_types::{AgentId, Line, SimError};
use tracing::debug;

/// Upper bound on the number of cells a single index may allocate.
const MAX_CELLS: usize = 1 << 26;

// ────────────────────────────────────────────────────────────────────────────
// Cell
// ────────────────────────────────────────────────────────────────────────────

/// One grid square and the owners currently drawn through it.
///
/// Occupants are kept in insertion order.  Ray casts that find several
/// qualifying occupants in one cell report the earliest inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    occupants: Vec<AgentId>,
}

impl Cell {
    pub fn occupants(&self) -> &[AgentId] {
        &self.occupants
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn contains(&self, owner: AgentId) -> bool {
        self.occupants.contains(&owner)
    }

    /// True when this cell currently holds a heap allocation.
    pub fn is_allocated(&self) -> bool {
        self.occupants.capacity() > 0
    }

    fn insert(&mut self, owner: AgentId) -> bool {
        if self.contains(owner) {
            return false;
        }
        self.occupants.push(owner);
        true
    }

    fn remove(&mut self, owner: AgentId) -> bool {
        let Some(pos) = self.occupants.iter().position(|&o| o == owner) else {
            return false;
        };
        self.occupants.remove(pos);
        if self.occupants.is_empty() {
            // Release the buffer so sparse worlds stay small.
            self.occupants = Vec::new();
        }
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LineCells
// ────────────────────────────────────────────────────────────────────────────

/// Iterator over the grid cells a segment passes through.
///
/// Yields `(cx, cy, t)` where `t ∈ [0, 1]` is the segment parameter at which
/// the walk enters the cell (`t0` for the first cell, which is where the
/// segment enters the grid after clipping).  Multiplying `t` by the segment
/// length gives the distance from the segment start.
///
/// The walk clips the segment to the grid first, then steps one cell at a
/// time across the nearest vertical or horizontal cell boundary.  It visits
/// at most `|Δcx| + |Δcy| + 1` cells and never leaves the grid.
#[derive(Debug, Clone)]
pub struct LineCells {
    // Segment start and delta, in grid units.
    gx: f64,
    gy: f64,
    dx: f64,
    dy: f64,
    cx: i64,
    cy: i64,
    end: (i64, i64),
    step_x: i64,
    step_y: i64,
    t: f64,
    t_end: f64,
    cols: i64,
    rows: i64,
    remaining: usize,
}

impl LineCells {
    /// Walk `line` over a `width × height` metre grid at `resolution` cells
    /// per metre.  The walk is clipped to the metric bounds, so a partial last
    /// column or row is only entered up to `width` or `height`.
    pub fn new(line: &Line, resolution: f64, width: f64, height: f64) -> Self {
        let cols = (width * resolution).ceil().max(0.0) as usize;
        let rows = (height * resolution).ceil().max(0.0) as usize;
        let mut walk = Self {
            gx: 0.0,
            gy: 0.0,
            dx: 0.0,
            dy: 0.0,
            cx: 0,
            cy: 0,
            end: (0, 0),
            step_x: 0,
            step_y: 0,
            t: 0.0,
            t_end: 0.0,
            cols: cols as i64,
            rows: rows as i64,
            remaining: 0,
        };
        if cols == 0 || rows == 0 || !line.is_finite() || !resolution.is_finite() {
            return walk;
        }

        walk.gx = line.x1 * resolution;
        walk.gy = line.y1 * resolution;
        walk.dx = (line.x2 - line.x1) * resolution;
        walk.dy = (line.y2 - line.y1) * resolution;

        let (w, h) = (width * resolution, height * resolution);
        let Some((t0, t1)) = clip(walk.gx, walk.gy, walk.dx, walk.dy, w, h) else {
            return walk;
        };

        let cell = |g: f64, d: f64, t: f64, n: i64| ((g + d * t).floor() as i64).clamp(0, n - 1);
        walk.cx = cell(walk.gx, walk.dx, t0, walk.cols);
        walk.cy = cell(walk.gy, walk.dy, t0, walk.rows);
        walk.end = (
            cell(walk.gx, walk.dx, t1, walk.cols),
            cell(walk.gy, walk.dy, t1, walk.rows),
        );
        walk.step_x = sign(walk.dx);
        walk.step_y = sign(walk.dy);
        walk.t = t0;
        walk.t_end = t1;
        walk.remaining = ((walk.end.0 - walk.cx).unsigned_abs()
            + (walk.end.1 - walk.cy).unsigned_abs()) as usize
            + 1;
        walk
    }

    /// Parameter at which the walk leaves the current cell along one axis.
    fn exit_t(g: f64, d: f64, c: i64, step: i64) -> f64 {
        match step {
            0 => f64::INFINITY,
            s if s > 0 => ((c + 1) as f64 - g) / d,
            _ => (c as f64 - g) / d,
        }
    }
}

impl Iterator for LineCells {
    type Item = (usize, usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = (self.cx as usize, self.cy as usize, self.t);

        if (self.cx, self.cy) == self.end {
            self.remaining = 0;
            return Some(current);
        }

        let tx = Self::exit_t(self.gx, self.dx, self.cx, self.step_x);
        let ty = Self::exit_t(self.gy, self.dy, self.cy, self.step_y);
        let t_next = if tx <= ty {
            self.cx += self.step_x;
            tx
        } else {
            self.cy += self.step_y;
            ty
        };
        self.t = self.t.max(t_next);

        let outside =
            self.cx < 0 || self.cy < 0 || self.cx >= self.cols || self.cy >= self.rows;
        if outside || t_next > self.t_end {
            self.remaining = 0;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

fn sign(v: f64) -> i64 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Liang–Barsky clip of `g + d·t, t ∈ [0, 1]` against `[0, w] × [0, h]`.
/// Returns the parameter interval inside the grid, or `None` when the segment
/// misses it (or only grazes a corner).
fn clip(gx: f64, gy: f64, dx: f64, dy: f64, w: f64, h: f64) -> Option<(f64, f64)> {
    // Axis-parallel segments lying on the far edge are outside the half-open
    // grid.
    if (dx == 0.0 && gx >= w) || (dy == 0.0 && gy >= h) {
        return None;
    }
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [(-dx, gx), (dx, w - gx), (-dy, gy), (dy, h - gy)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let moving = dx != 0.0 || dy != 0.0;
    if t0 > t1 || (moving && t0 == t1) {
        return None;
    }
    Some((t0, t1))
}

// ────────────────────────────────────────────────────────────────────────────
// SpatialIndex
// ────────────────────────────────────────────────────────────────────────────

/// Cell → occupant-set map with rasterized segment insert/remove.
///
/// Besides the cells, the index journals which cells each owner was last
/// inserted into, so [`SpatialIndex::remove_owner_everywhere`] costs
/// O(footprint) instead of a full grid scan.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    width: f64,
    height: f64,
    resolution: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Cell>,
    touched: HashMap<AgentId, HashSet<usize>>,
}

impl SpatialIndex {
    /// Allocate an empty index covering `width × height` metres at
    /// `resolution` cells per metre.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidConfig`] when a dimension is not strictly positive
    /// and finite, or the grid would exceed the cell limit.
    pub fn new(width: f64, height: f64, resolution: f64) -> Result<Self, SimError> {
        let (cols, rows) = grid_dims(width, height, resolution)?;
        debug!(width, height, resolution, cols, rows, "spatial index created");
        Ok(Self {
            width,
            height,
            resolution,
            cols,
            rows,
            cells: vec![Cell::default(); cols * rows],
            touched: HashMap::new(),
        })
    }

    /// Reallocate at new bounds and resolution.  Every occupant is dropped;
    /// the caller must remap all live agents afterwards.
    pub fn resize(&mut self, width: f64, height: f64, resolution: f64) -> Result<(), SimError> {
        let (cols, rows) = grid_dims(width, height, resolution)?;
        debug!(width, height, resolution, cols, rows, "spatial index resized");
        self.width = width;
        self.height = height;
        self.resolution = resolution;
        self.cols = cols;
        self.rows = rows;
        self.cells = vec![Cell::default(); cols * rows];
        self.touched.clear();
        Ok(())
    }

    /// Drop every occupant, keeping the dimensions.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = Cell::default());
        self.touched.clear();
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Cell coordinates of a world point, or `None` outside
    /// `[0, width) × [0, height)`.
    pub fn cell_coord(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x >= 0.0 && y >= 0.0 && x < self.width && y < self.height) {
            // Also rejects NaN.
            return None;
        }
        let cx = (x * self.resolution).floor() as usize;
        let cy = (y * self.resolution).floor() as usize;
        (cx < self.cols && cy < self.rows).then_some((cx, cy))
    }

    /// The cell at grid coordinates `(cx, cy)`, if in range.
    pub fn cell(&self, cx: usize, cy: usize) -> Option<&Cell> {
        if cx < self.cols && cy < self.rows {
            self.cells.get(cy * self.cols + cx)
        } else {
            None
        }
    }

    /// Owners drawn through the cell containing `(x, y)`.  Empty outside the
    /// grid.
    pub fn occupants_at(&self, x: f64, y: f64) -> &[AgentId] {
        self.cell_coord(x, y)
            .and_then(|(cx, cy)| self.cell(cx, cy))
            .map(Cell::occupants)
            .unwrap_or(&[])
    }

    /// Owners drawn through grid cell `(cx, cy)`.  Empty when out of range.
    pub fn occupants_in(&self, cx: usize, cy: usize) -> &[AgentId] {
        self.cell(cx, cy).map(Cell::occupants).unwrap_or(&[])
    }

    /// The cells `line` rasterizes through on this grid.
    pub fn line_cells(&self, line: &Line) -> LineCells {
        LineCells::new(line, self.resolution, self.width, self.height)
    }

    /// Grid coordinates of every cell currently holding `owner`, sorted.
    pub fn footprint_cells(&self, owner: AgentId) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = self
            .touched
            .get(&owner)
            .map(|set| set.iter().map(|&i| (i % self.cols, i / self.cols)).collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// Every non-empty cell with its occupants, in row-major order.
    pub fn occupied_cells(&self) -> impl Iterator<Item = ((usize, usize), &[AgentId])> + '_ {
        self.cells.iter().enumerate().filter(|(_, c)| !c.is_empty()).map(|(i, c)| {
            ((i % self.cols, i / self.cols), c.occupants())
        })
    }

    /// Number of cells currently holding a heap allocation.
    pub fn allocated_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_allocated()).count()
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Add `owner` to every cell `line` passes through.  Cells already
    /// holding `owner` are left unchanged, so inserting the same segment
    /// twice is the same as inserting it once.
    pub fn insert_line(&mut self, line: &Line, owner: AgentId) {
        for (cx, cy, _) in self.line_cells(line) {
            let i = cy * self.cols + cx;
            if self.cells[i].insert(owner) {
                self.touched.entry(owner).or_default().insert(i);
            }
        }
    }

    /// Remove `owner` from every cell `line` passes through.  Cells that do
    /// not hold `owner` are left unchanged.
    pub fn remove_line(&mut self, line: &Line, owner: AgentId) {
        for (cx, cy, _) in self.line_cells(line) {
            let i = cy * self.cols + cx;
            if self.cells[i].remove(owner) {
                self.forget(owner, i);
            }
        }
    }

    pub fn insert_lines(&mut self, lines: &[Line], owner: AgentId) {
        for line in lines {
            self.insert_line(line, owner);
        }
    }

    pub fn remove_lines(&mut self, lines: &[Line], owner: AgentId) {
        for line in lines {
            self.remove_line(line, owner);
        }
    }

    /// Remove `owner` from every cell it is recorded in.  Returns the number
    /// of cells cleared.
    pub fn remove_owner_everywhere(&mut self, owner: AgentId) -> usize {
        let Some(set) = self.touched.remove(&owner) else {
            return 0;
        };
        let mut cleared = 0;
        for i in set {
            if let Some(cell) = self.cells.get_mut(i)
                && cell.remove(owner)
            {
                cleared += 1;
            }
        }
        cleared
    }

    fn forget(&mut self, owner: AgentId, i: usize) {
        if let Some(set) = self.touched.get_mut(&owner) {
            set.remove(&i);
            if set.is_empty() {
                self.touched.remove(&owner);
            }
        }
    }
}

fn grid_dims(width: f64, height: f64, resolution: f64) -> Result<(usize, usize), SimError> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !(valid(width) && valid(height) && valid(resolution)) {
        return Err(SimError::InvalidConfig(format!(
            "world must have positive finite size and resolution, got {width}×{height} @ {resolution}"
        )));
    }
    let cols = (width * resolution).ceil();
    let rows = (height * resolution).ceil();
    if cols * rows > MAX_CELLS as f64 {
        return Err(SimError::InvalidConfig(format!(
            "grid of {cols}×{rows} cells exceeds the limit of {MAX_CELLS}"
        )));
    }
    Ok((cols as usize, rows as usize))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
