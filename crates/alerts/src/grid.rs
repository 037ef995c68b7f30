//! Spatial suppression grid.
//!
//! The frame is divided into an N x N grid. Once an alert fires in a cell,
//! the cell stays active until its reset deadline; any violation mapped into
//! an active cell pushes the deadline out again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ppewatch_model::{BBox, GridCell};

/// Suppression state for one camera's frame.
#[derive(Debug, Clone)]
pub struct SuppressionGrid {
    size: u32,
    frame_width: u32,
    frame_height: u32,
    reset_after: Duration,
    /// Reset deadline per active cell.
    deadlines: HashMap<GridCell, Instant>,
}

impl SuppressionGrid {
    pub fn new(size: u32, frame_width: u32, frame_height: u32, reset_after: Duration) -> Self {
        Self {
            size: size.max(1),
            frame_width,
            frame_height,
            reset_after,
            deadlines: HashMap::new(),
        }
    }

    /// Cell containing the centre of `bbox`.
    pub fn cell_for(&self, bbox: &BBox) -> GridCell {
        let (cx, cy) = bbox.center();
        GridCell {
            x: axis_cell(cx, self.frame_width, self.size),
            y: axis_cell(cy, self.frame_height, self.size),
        }
    }

    pub fn is_active(&self, cell: GridCell, now: Instant) -> bool {
        self.deadlines
            .get(&cell)
            .is_some_and(|deadline| now < *deadline)
    }

    /// Start suppressing `cell` from `now`.
    pub fn activate(&mut self, cell: GridCell, now: Instant) {
        self.deadlines.insert(cell, now + self.reset_after);
    }

    /// Push the deadline of an active cell out to `now + reset_after`.
    ///
    /// Returns `false` (and does nothing) if the cell is not active.
    pub fn renew(&mut self, cell: GridCell, now: Instant) -> bool {
        if !self.is_active(cell, now) {
            return false;
        }
        self.deadlines.insert(cell, now + self.reset_after);
        true
    }

    /// Drop cells whose deadline has passed.
    pub fn expire(&mut self, now: Instant) {
        self.deadlines.retain(|_, deadline| now < *deadline);
    }

    /// Active cells, sorted.
    pub fn active_cells(&self, now: Instant) -> Vec<GridCell> {
        let mut cells: Vec<GridCell> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now < **deadline)
            .map(|(cell, _)| *cell)
            .collect();
        cells.sort();
        cells
    }
}

fn axis_cell(coord: f32, extent: u32, size: u32) -> u32 {
    if extent == 0 || !coord.is_finite() || coord <= 0.0 {
        return 0;
    }
    let cell_extent = extent as f32 / size as f32;
    ((coord / cell_extent).floor() as u32).min(size - 1)
}
