//! Per-frame conversion of a [`Grid`] into GPU cell records, with a row
//! cache keyed by `(selection, active-screen-id, row-id)` so unchanged rows
//! skip re-shaping entirely (§3 "Row Cache Entry", §4.6).
//!
//! Glyph shaping and atlas placement are an external collaborator — this
//! module has no font or GPU backend of its own. Callers supply a
//! [`GlyphShaper`]; the builder only decides *which* records a cell needs
//! and *where* they land in the grid.

use std::collections::{HashMap, VecDeque};

use super::frame::{CursorRender, TerminalEvent};
use crate::terminal::color::{Color, Palette};
use crate::terminal::cursor::CellAttrs;
use crate::terminal::grid::{Cell, CellFlags, Grid};
use crate::terminal::selection::Selection;

/// Discriminates what a [`GpuCellRecord`] draws. Per §4.6, a single grid
/// cell may contribute one record of each of these in the same frame
/// (background, glyph, underline, strikethrough) plus a cursor overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellMode {
    Background = 0,
    Glyph = 1,
    ColorEmojiGlyph = 2,
    Underline = 3,
    Strikethrough = 4,
    CursorBlock = 5,
    CursorHollow = 6,
    CursorBar = 7,
}

/// A complete render frame handed to the in-process consumer: the raw GPU
/// cell records plus the cursor overlay and any state-change events that
/// accumulated since the last frame (§4.6, §6).
#[derive(Debug, Clone)]
pub struct GpuFrame {
    /// Monotonic sequence for frame ordering (newer frames have larger values).
    pub frame_seq: u64,
    /// Monotonic resize generation. Increments on each terminal resize.
    pub resize_epoch: u64,
    /// GPU-ready draw records for this frame's visible rows.
    pub records: Vec<GpuCellRecord>,
    /// Current cursor state.
    pub cursor: CursorRender,
    /// Terminal events (block changes, title, mode switches) since the last frame.
    pub events: Vec<TerminalEvent>,
    /// Canonical visible row count for this frame.
    pub visible_rows: u16,
    /// Canonical visible column count for this frame.
    pub visible_cols: u16,
}

/// A single GPU-ready draw record. Fixed layout so it can be written
/// straight into a vertex/instance buffer without further translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuCellRecord {
    pub grid_col: u16,
    pub grid_row: u16,
    pub glyph_atlas_x: u32,
    pub glyph_atlas_y: u32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    pub glyph_offset_x: i32,
    pub glyph_offset_y: i32,
    pub fg: [u8; 4],
    pub bg: [u8; 4],
    pub mode: CellMode,
    pub grid_width: u8,
}

/// Atlas placement for a single shaped glyph, as produced by an external
/// shaper/atlas collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub atlas_x: u32,
    pub atlas_y: u32,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub is_color_emoji: bool,
}

/// Shapes a single character into an atlas-backed glyph. Implementations
/// own the font and atlas; this trait only exposes what the cell builder
/// needs to place a record. `None` means the character has no visible
/// glyph (e.g. a space).
pub trait GlyphShaper: Send {
    fn shape(&mut self, c: char) -> Option<ShapedGlyph>;

    /// Whether the atlas changed since the last call and needs a GPU
    /// re-upload. Implementations that upload eagerly can always return
    /// `false`.
    fn atlas_dirty(&mut self) -> bool {
        false
    }
}

/// Key identifying a cached row's computed records: the column range (if
/// any) the current selection covers on this row, the owning screen
/// (primary/alternate), and the row's stable [`Booid`](crate::ids::Booid).
type CacheKey = (Option<(u16, u16)>, u8, u64);

const MIN_CACHE_CAPACITY: usize = 80;

struct CacheEntry {
    records: Vec<GpuCellRecord>,
}

/// Per-frame row-cache and GPU record emitter (§4.6).
pub struct CellBuilder {
    cache: HashMap<CacheKey, CacheEntry>,
    lru: VecDeque<CacheKey>,
    capacity: usize,
    cols: u16,
    rows: u16,
}

impl CellBuilder {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            cache: HashMap::new(),
            lru: VecDeque::new(),
            capacity: Self::capacity_for(rows),
            cols,
            rows,
        }
    }

    fn capacity_for(rows: u16) -> usize {
        (rows as usize * 10).max(MIN_CACHE_CAPACITY)
    }

    /// Resize the shaper buffer and row cache. Per §4.6 the cache is keyed
    /// by row id, not geometry, but a resize changes every row's on-screen
    /// width, so previously cached records would need re-shaping anyway —
    /// simplest and safest is to drop the cache outright.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.rows = rows;
        self.cols = cols;
        self.capacity = Self::capacity_for(rows);
        self.cache.clear();
        self.lru.clear();
    }

    fn touch(&mut self, key: CacheKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
        while self.lru.len() > self.capacity {
            if let Some(evicted) = self.lru.pop_front() {
                self.cache.remove(&evicted);
            }
        }
    }

    /// Required capacity for the flat per-frame record buffer: worst case
    /// every cell emits background + glyph + underline + strikethrough,
    /// plus one cursor record (§4.6 step 1).
    pub fn worst_case_capacity(rows: u16, cols: u16) -> usize {
        rows as usize * cols as usize * 3 + 1
    }

    /// Build this frame's GPU cell records for the visible rows of `grid`.
    ///
    /// `screen_id` distinguishes primary (`0`) from alternate (`1`) so a
    /// switch between them can't collide on row ids. `viewport_at_bottom`
    /// gates whether the cursor record is emitted at all (§4.6 step 5).
    pub fn build_frame(
        &mut self,
        grid: &mut Grid,
        screen_id: u8,
        selection: Option<&Selection>,
        cursor: &CursorRender,
        cursor_on_wide_cell: bool,
        viewport_at_bottom: bool,
        palette: &Palette,
        default_fg: (u8, u8, u8),
        default_bg: (u8, u8, u8),
        shaper: &mut dyn GlyphShaper,
    ) -> Vec<GpuCellRecord> {
        self.build_frame_at(
            grid,
            screen_id,
            0,
            selection,
            cursor,
            cursor_on_wide_cell,
            viewport_at_bottom,
            palette,
            default_fg,
            default_bg,
            shaper,
        )
    }

    /// Like [`Self::build_frame`] but reads the visible window starting
    /// `scroll_offset` lines above the live bottom, for when `scroll_viewport`
    /// has scrolled the screen back into history (§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn build_frame_at(
        &mut self,
        grid: &mut Grid,
        screen_id: u8,
        scroll_offset: u16,
        selection: Option<&Selection>,
        cursor: &CursorRender,
        cursor_on_wide_cell: bool,
        viewport_at_bottom: bool,
        palette: &Palette,
        default_fg: (u8, u8, u8),
        default_bg: (u8, u8, u8),
        shaper: &mut dyn GlyphShaper,
    ) -> Vec<GpuCellRecord> {
        let mut out = Vec::with_capacity(Self::worst_case_capacity(self.rows, self.cols));

        let live_start = grid.rows.len().saturating_sub(self.rows as usize);
        let visible_start = live_start.saturating_sub(scroll_offset as usize);
        for screen_row in 0..self.rows {
            let abs_row = visible_start + screen_row as usize;
            let Some(row) = grid.rows.get_mut(abs_row) else {
                continue;
            };

            let sel_range = selection.and_then(|s| selection_range_for_row(s, abs_row, self.cols));
            let key: CacheKey = (sel_range, screen_id, row.id.as_u64());

            if !row.dirty {
                if let Some(entry) = self.cache.get(&key) {
                    for record in &entry.records {
                        let mut record = *record;
                        record.grid_row = screen_row;
                        out.push(record);
                    }
                    self.touch(key);
                    continue;
                }
            }

            let mut records = Vec::with_capacity(self.cols as usize * 3);
            for (col, cell) in row.cells.iter().enumerate() {
                if cell.flags.contains(CellFlags::WIDE_SPACER) {
                    continue;
                }
                let in_selection = sel_range
                    .map(|(lo, hi)| col as u16 >= lo && col as u16 <= hi)
                    .unwrap_or(false);
                emit_cell_records(
                    &mut records,
                    cell,
                    col as u16,
                    screen_row,
                    in_selection,
                    palette,
                    default_fg,
                    default_bg,
                    shaper,
                );
            }

            out.extend(records.iter().copied());
            self.cache.insert(key, CacheEntry { records });
            self.touch(key);
            // The row has now been fully re-shaped into the cache; clear its
            // dirty flag so an unchanged row hits the cache next frame (§4.6).
            row.dirty = false;
        }

        if cursor.visible && viewport_at_bottom {
            let mode = match cursor.shape.as_str() {
                "underline" => CellMode::CursorBar,
                "bar" => CellMode::CursorBar,
                "hollow" => CellMode::CursorHollow,
                _ => CellMode::CursorBlock,
            };
            let grid_width = if cursor_on_wide_cell { 2 } else { 1 };
            out.push(GpuCellRecord {
                grid_col: cursor.col,
                grid_row: cursor.row,
                glyph_atlas_x: 0,
                glyph_atlas_y: 0,
                glyph_width: 0,
                glyph_height: 0,
                glyph_offset_x: 0,
                glyph_offset_y: 0,
                fg: [255, 255, 255, 255],
                bg: [255, 255, 255, 255],
                mode,
                grid_width,
            });
        }

        out
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_cell_records(
    out: &mut Vec<GpuCellRecord>,
    cell: &Cell,
    col: u16,
    row: u16,
    in_selection: bool,
    palette: &Palette,
    default_fg: (u8, u8, u8),
    default_bg: (u8, u8, u8),
    shaper: &mut dyn GlyphShaper,
) {
    let grid_width = if cell.flags.contains(CellFlags::WIDE_CHAR) {
        2
    } else {
        1
    };

    let (mut fg, mut bg) = cell_colors(cell, palette, default_fg, default_bg);

    if in_selection {
        // Swap to (default fg, default bg) per §4.6's selection color rule.
        fg = rgba(default_fg, 255);
        bg = rgba(default_bg, 255);
    } else if cell.attrs.contains(CellAttrs::REVERSE) {
        let cell_fg = resolve(cell.fg, palette, default_fg);
        let cell_bg = resolve(cell.bg, palette, default_bg);
        fg = rgba(cell_bg, 255);
        bg = rgba(cell_fg, 255);
    }

    if cell.attrs.contains(CellAttrs::DIM) {
        fg[3] = ((fg[3] as u16 * 175) / 255) as u8;
    }

    let has_bg = in_selection
        || cell.attrs.contains(CellAttrs::REVERSE)
        || !matches!(cell.bg, Color::Default);
    if has_bg {
        out.push(GpuCellRecord {
            grid_col: col,
            grid_row: row,
            glyph_atlas_x: 0,
            glyph_atlas_y: 0,
            glyph_width: 0,
            glyph_height: 0,
            glyph_offset_x: 0,
            glyph_offset_y: 0,
            fg,
            bg,
            mode: CellMode::Background,
            grid_width,
        });
    }

    if cell.c != ' ' && !cell.attrs.contains(CellAttrs::HIDDEN) {
        if let Some(glyph) = shaper.shape(cell.c) {
            out.push(GpuCellRecord {
                grid_col: col,
                grid_row: row,
                glyph_atlas_x: glyph.atlas_x,
                glyph_atlas_y: glyph.atlas_y,
                glyph_width: glyph.width,
                glyph_height: glyph.height,
                glyph_offset_x: glyph.offset_x,
                glyph_offset_y: glyph.offset_y,
                fg,
                bg,
                mode: if glyph.is_color_emoji {
                    CellMode::ColorEmojiGlyph
                } else {
                    CellMode::Glyph
                },
                grid_width,
            });
        }
    }

    if cell.attrs.contains(CellAttrs::UNDERLINE) {
        out.push(GpuCellRecord {
            grid_col: col,
            grid_row: row,
            glyph_atlas_x: 0,
            glyph_atlas_y: 0,
            glyph_width: 0,
            glyph_height: 0,
            glyph_offset_x: 0,
            glyph_offset_y: 0,
            fg,
            bg,
            mode: CellMode::Underline,
            grid_width,
        });
    }

    if cell.attrs.contains(CellAttrs::STRIKETHROUGH) {
        out.push(GpuCellRecord {
            grid_col: col,
            grid_row: row,
            glyph_atlas_x: 0,
            glyph_atlas_y: 0,
            glyph_width: 0,
            glyph_height: 0,
            glyph_offset_x: 0,
            glyph_offset_y: 0,
            fg,
            bg,
            mode: CellMode::Strikethrough,
            grid_width,
        });
    }
}

fn cell_colors(
    cell: &Cell,
    palette: &Palette,
    default_fg: (u8, u8, u8),
    default_bg: (u8, u8, u8),
) -> ([u8; 4], [u8; 4]) {
    let fg = resolve(cell.fg, palette, default_fg);
    let bg = resolve(cell.bg, palette, default_bg);
    (rgba(fg, 255), rgba(bg, 255))
}

fn resolve(color: Color, palette: &Palette, default: (u8, u8, u8)) -> (u8, u8, u8) {
    match color {
        Color::Default => default,
        Color::Indexed(i) => palette.get(i),
        Color::Rgb(r, g, b) => (r, g, b),
    }
}

fn rgba(rgb: (u8, u8, u8), a: u8) -> [u8; 4] {
    [rgb.0, rgb.1, rgb.2, a]
}

fn selection_range_for_row(selection: &Selection, row: usize, cols: u16) -> Option<(u16, u16)> {
    let (start, end) = if selection.start <= selection.end {
        (selection.start, selection.end)
    } else {
        (selection.end, selection.start)
    };
    if row < start.row || row > end.row {
        return None;
    }
    if selection.rectangular {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::color::Color;
    use crate::terminal::selection::ScreenPoint;

    struct NoGlyphs;
    impl GlyphShaper for NoGlyphs {
        fn shape(&mut self, _c: char) -> Option<ShapedGlyph> {
            None
        }
    }

    struct StubShaper;
    impl GlyphShaper for StubShaper {
        fn shape(&mut self, _c: char) -> Option<ShapedGlyph> {
            Some(ShapedGlyph {
                atlas_x: 1,
                atlas_y: 2,
                width: 8,
                height: 16,
                offset_x: 0,
                offset_y: 0,
                is_color_emoji: false,
            })
        }
    }

    fn cursor(row: u16, col: u16, visible: bool) -> CursorRender {
        CursorRender {
            row,
            col,
            visible,
            shape: "block".to_string(),
        }
    }

    #[test]
    fn capacity_floor_is_eighty() {
        let builder = CellBuilder::new(4, 80);
        assert_eq!(builder.capacity, 80);
    }

    #[test]
    fn capacity_scales_with_rows() {
        let builder = CellBuilder::new(50, 80);
        assert_eq!(builder.capacity, 500);
    }

    #[test]
    fn unchanged_row_hits_cache_on_second_frame() {
        let mut grid = Grid::new(2, 10);
        grid.set_cell(
            0,
            0,
            Cell {
                c: 'x',
                fg: Color::Default,
                bg: Color::Default,
                ..Default::default()
            },
        );
        let palette = Palette::default();
        let mut builder = CellBuilder::new(grid.visible_rows, grid.cols);
        let cur = cursor(0, 0, false);

        let first = builder.build_frame(
            &mut grid,
            0,
            None,
            &cur,
            false,
            true,
            &palette,
            (255, 255, 255),
            (0, 0, 0),
            &mut StubShaper,
        );
        assert!(!first.is_empty());

        // The builder clears the row's dirty flag itself after caching it.
        let second = builder.build_frame(
            &mut grid,
            0,
            None,
            &cur,
            false,
            true,
            &palette,
            (255, 255, 255),
            (0, 0, 0),
            &mut NoGlyphs,
        );
        // Same records despite the shaper this time returning nothing —
        // proof the cache, not the shaper, produced them.
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn selection_swaps_to_default_colors() {
        let mut grid = Grid::new(1, 5);
        grid.set_cell(
            0,
            0,
            Cell {
                c: 'x',
                fg: Color::Rgb(10, 10, 10),
                bg: Color::Rgb(20, 20, 20),
                ..Default::default()
            },
        );
        let palette = Palette::default();
        let mut builder = CellBuilder::new(grid.visible_rows, grid.cols);
        let offset = grid.rows.len() - grid.visible_rows as usize;
        let sel = Selection::new(
            ScreenPoint::new(offset, 0),
            ScreenPoint::new(offset, 0),
            false,
        );
        let cur = cursor(0, 0, false);

        let records = builder.build_frame(
            &mut grid,
            0,
            Some(&sel),
            &cur,
            false,
            true,
            &palette,
            (255, 255, 255),
            (0, 0, 0),
            &mut NoGlyphs,
        );
        let bg_record = records
            .iter()
            .find(|r| r.mode == CellMode::Background)
            .expect("selection forces a background record");
        assert_eq!(bg_record.fg, [255, 255, 255, 255]);
        assert_eq!(bg_record.bg, [0, 0, 0, 255]);
    }

    #[test]
    fn cursor_record_omitted_when_not_visible() {
        let mut grid = Grid::new(1, 5);
        let palette = Palette::default();
        let mut builder = CellBuilder::new(grid.visible_rows, grid.cols);
        let cur = cursor(0, 0, false);

        let records = builder.build_frame(
            &mut grid,
            0,
            None,
            &cur,
            false,
            true,
            &palette,
            (255, 255, 255),
            (0, 0, 0),
            &mut NoGlyphs,
        );
        assert!(!records
            .iter()
            .any(|r| matches!(r.mode, CellMode::CursorBlock | CellMode::CursorBar | CellMode::CursorHollow)));
    }
}
