//! Text selection over the grid's scrollback-inclusive row storage.
//!
//! Points are addressed by absolute row index (`0` is the oldest row still
//! retained, growing toward the bottom of `Grid::rows`) rather than
//! screen-relative row, so a selection anchored in the scrollback survives
//! scrolling without having to be re-anchored on every frame.

use super::grid::Grid;

/// A single endpoint of a selection: an absolute row index plus a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScreenPoint {
    pub row: usize,
    pub col: u16,
}

impl ScreenPoint {
    pub fn new(row: usize, col: u16) -> Self {
        Self { row, col }
    }
}

/// A selection spans `[start, end]` inclusive once normalized, and is either
/// linear (wraps row to row like reading text) or rectangular (a column
/// range repeated across every row, block-select style).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: ScreenPoint,
    pub end: ScreenPoint,
    pub rectangular: bool,
}

impl Selection {
    pub fn new(anchor: ScreenPoint, head: ScreenPoint, rectangular: bool) -> Self {
        Self {
            start: anchor,
            end: head,
            rectangular,
        }
    }

    /// `start`/`end` ordered so `start <= end`, regardless of which end the
    /// drag started from.
    fn normalized(&self) -> (ScreenPoint, ScreenPoint) {
        if self.start <= self.end {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        }
    }

    /// Whether any part of `row` falls within this selection.
    pub fn contains_row(&self, row: usize) -> bool {
        let (start, end) = self.normalized();
        row >= start.row && row <= end.row
    }

    /// The inclusive column range selected within `row`, or `None` if the
    /// row isn't part of the selection. `cols` is the grid width, needed to
    /// bound linear selections on rows between the start and end row.
    fn column_range_for_row(&self, row: usize, cols: u16) -> Option<(u16, u16)> {
        let (start, end) = self.normalized();
        if row < start.row || row > end.row {
            return None;
        }

        if self.rectangular {
            let (lo, hi) = if start.col <= end.col {
                (start.col, end.col)
            } else {
                (end.col, start.col)
            };
            return Some((lo, hi));
        }

        let last_col = cols.saturating_sub(1);
        let row_start = if row == start.row { start.col } else { 0 };
        let row_end = if row == end.row { end.col } else { last_col };
        Some((row_start, row_end))
    }

    /// Extract the selected text from `grid`. Rectangular selections join
    /// rows with a newline unconditionally; linear selections only insert a
    /// newline between rows that weren't joined by a wrap flag, and trim
    /// trailing whitespace from each extracted row the way a terminal's
    /// "copy selection" action conventionally does.
    pub fn extract_text(&self, grid: &Grid) -> String {
        let (start, end) = self.normalized();
        let mut out = String::new();
        let mut prev_row_wrapped = false;

        for row_idx in start.row..=end.row.min(grid.rows.len().saturating_sub(1)) {
            let Some((col_start, col_end)) = self.column_range_for_row(row_idx, grid.cols) else {
                continue;
            };
            let Some(row) = grid.rows.get(row_idx) else {
                continue;
            };

            let mut line = String::new();
            let col_end = col_end.min(grid.cols.saturating_sub(1));
            for col in col_start..=col_end {
                if let Some(cell) = row.cells.get(col as usize) {
                    if cell.flags.contains(super::grid::CellFlags::WIDE_SPACER) {
                        continue;
                    }
                    line.push(cell.c);
                }
            }
            let trimmed = line.trim_end();

            if !out.is_empty() && !(!self.rectangular && prev_row_wrapped) {
                out.push('\n');
            }
            out.push_str(trimmed);

            prev_row_wrapped = row
                .cells
                .last()
                .map(|c| c.flags.contains(super::grid::CellFlags::WRAP))
                .unwrap_or(false);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::color::Color;
    use crate::terminal::grid::{Cell, CellFlags};

    fn fill_row(grid: &mut Grid, row: u16, text: &str) {
        for (col, c) in text.chars().enumerate() {
            grid.set_cell(
                row,
                col as u16,
                Cell {
                    c,
                    fg: Color::Default,
                    bg: Color::Default,
                    ..Default::default()
                },
            );
        }
    }

    #[test]
    fn linear_selection_joins_hard_newline_rows_with_newline() {
        let mut grid = Grid::new(3, 10);
        fill_row(&mut grid, 0, "hello");
        fill_row(&mut grid, 1, "world");

        let offset = grid.rows.len() - grid.visible_rows as usize;
        let sel = Selection::new(
            ScreenPoint::new(offset, 0),
            ScreenPoint::new(offset + 1, 4),
            false,
        );
        assert_eq!(sel.extract_text(&grid), "hello\nworld");
    }

    #[test]
    fn linear_selection_joins_soft_wrapped_rows_without_newline() {
        let mut grid = Grid::new(3, 10);
        fill_row(&mut grid, 0, "hello");
        fill_row(&mut grid, 1, "world");
        grid.visible_row_mut(0).cells[9].flags |= CellFlags::WRAP;

        let offset = grid.rows.len() - grid.visible_rows as usize;
        let sel = Selection::new(
            ScreenPoint::new(offset, 0),
            ScreenPoint::new(offset + 1, 4),
            false,
        );
        assert_eq!(sel.extract_text(&grid), "helloworld");
    }

    #[test]
    fn rectangular_selection_takes_column_slice_per_row() {
        let mut grid = Grid::new(3, 10);
        fill_row(&mut grid, 0, "abcdef");
        fill_row(&mut grid, 1, "ghijkl");

        let offset = grid.rows.len() - grid.visible_rows as usize;
        let sel = Selection::new(
            ScreenPoint::new(offset, 1),
            ScreenPoint::new(offset + 1, 3),
            true,
        );
        assert_eq!(sel.extract_text(&grid), "bcd\nhij");
    }

    #[test]
    fn contains_row_respects_normalization_regardless_of_drag_direction() {
        let sel = Selection::new(ScreenPoint::new(5, 0), ScreenPoint::new(2, 0), false);
        assert!(sel.contains_row(3));
        assert!(!sel.contains_row(6));
    }
}
