use std::collections::VecDeque;

use bitflags::bitflags;

use super::color::Color;
use super::cursor::CellAttrs;
use crate::ids::{Booid, BooidGenerator};

/// Row-level semantic-prompt annotation driven by OSC 133 (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMarker {
    #[default]
    None,
    Prompt,
    PromptContinuation,
    Input,
    Command,
}

bitflags! {
    /// Per-cell flags for wide character tracking and line wrapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct CellFlags: u8 {
        /// This cell holds a wide (2-column) character
        const WIDE_CHAR   = 1 << 0;
        /// This cell is the trailing spacer of a wide character
        const WIDE_SPACER = 1 << 1;
        /// Line wrapped at this position
        const WRAP        = 1 << 2;
        /// DECSCA-protected: selective erase (DECSED/DECSEL) skips this cell.
        const PROTECTED   = 1 << 3;
    }
}

/// A single terminal cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub c: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: CellAttrs,
    pub flags: CellFlags,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            c: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: CellAttrs::empty(),
            flags: CellFlags::empty(),
        }
    }
}

impl Cell {
    /// Create a spacer cell for the trailing half of a wide character.
    pub fn wide_spacer() -> Self {
        Self {
            c: ' ',
            flags: CellFlags::WIDE_SPACER,
            ..Default::default()
        }
    }

    /// Reset cell to default blank state.
    pub fn clear(&mut self) {
        self.c = ' ';
        self.fg = Color::Default;
        self.bg = Color::Default;
        self.attrs = CellAttrs::empty();
        self.flags = CellFlags::empty();
    }

    /// Erase cell using the cursor's current background color (per ECMA-48).
    pub fn erase(&mut self, bg: Color) {
        self.c = ' ';
        self.fg = Color::Default;
        self.bg = bg;
        self.attrs = CellAttrs::empty();
        self.flags = CellFlags::empty();
    }
}

/// A single row in the terminal grid.
///
/// `id` is assigned once, at allocation, and never changes for the lifetime
/// of this row's storage — it does not change when the row scrolls into or
/// out of the visible area. This is what makes it usable as a row-cache key
/// (§3, §4.6): a row that hasn't been mutated since the last frame keeps the
/// same id, so the cell builder can recognize "nothing changed here" even
/// after the row's screen-relative position moved.
#[derive(Debug, Clone)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub dirty: bool,
    pub id: Booid,
    pub prompt: PromptMarker,
    /// Hint that the shell will redraw this prompt line itself on resize
    /// rather than relying on the core's reflow (set by shell integration).
    pub shell_redraws_prompt: bool,
}

impl Row {
    pub fn new(cols: u16, id: Booid) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            dirty: true,
            id,
            prompt: PromptMarker::None,
            shell_redraws_prompt: false,
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.dirty = true;
    }

    /// Erase all cells using the given background color (per ECMA-48).
    /// `respect_protected` is set by the DECSED/DECSEL selective-erase
    /// variants (§4.3 `erase_display`/`erase_line`'s `protected` argument),
    /// which skip cells carrying [`CellFlags::PROTECTED`] (DECSCA).
    pub fn erase_with_bg(&mut self, bg: Color, respect_protected: bool) {
        for cell in &mut self.cells {
            if respect_protected && cell.flags.contains(CellFlags::PROTECTED) {
                continue;
            }
            cell.erase(bg);
        }
        self.dirty = true;
    }

    /// Convert this row's visible cells to plain text, joining wide-spacer
    /// cells into their owning glyph and trimming nothing (callers trim).
    pub fn to_text(&self) -> String {
        self.cells
            .iter()
            .filter(|c| !c.flags.contains(CellFlags::WIDE_SPACER))
            .map(|c| c.c)
            .collect()
    }

    pub fn resize(&mut self, cols: u16) {
        let new_len = cols as usize;
        if self.cells.len() != new_len {
            self.cells.resize(new_len, Cell::default());
            self.dirty = true;
        }
    }

}

/// The terminal grid holding visible rows and scrollback history.
pub struct Grid {
    /// All rows: scrollback + visible. The visible area is the last `visible_rows` entries.
    pub rows: VecDeque<Row>,
    pub cols: u16,
    pub visible_rows: u16,
    pub scrollback_limit: usize,
    /// Assigns row ids at allocation time. Each `Grid` (primary and
    /// alternate) gets its own generator so ids stay monotonic within a
    /// single screen's row storage.
    ids: BooidGenerator,
}

impl Grid {
    pub fn new(visible_rows: u16, cols: u16) -> Self {
        Self::with_generator(visible_rows, cols, BooidGenerator::with_hostname_machine_id())
    }

    pub fn with_generator(visible_rows: u16, cols: u16, ids: BooidGenerator) -> Self {
        let mut rows = VecDeque::with_capacity(visible_rows as usize);
        for _ in 0..visible_rows {
            rows.push_back(Row::new(cols, ids.next()));
        }
        Self {
            rows,
            cols,
            visible_rows,
            scrollback_limit: 10_000,
            ids,
        }
    }

    fn new_row(&self) -> Row {
        Row::new(self.cols, self.ids.next())
    }

    /// Get the offset where the visible area starts.
    fn visible_offset(&self) -> usize {
        self.rows.len().saturating_sub(self.visible_rows as usize)
    }

    /// Get a reference to a visible row by its screen-relative index (0 = top of screen).
    #[allow(dead_code)]
    pub fn visible_row(&self, row: u16) -> &Row {
        let idx = self.visible_offset() + row as usize;
        &self.rows[idx]
    }

    /// Get a mutable reference to a visible row.
    pub fn visible_row_mut(&mut self, row: u16) -> &mut Row {
        let idx = self.visible_offset() + row as usize;
        &mut self.rows[idx]
    }

    /// Write a cell at the given screen-relative position.
    pub fn set_cell(&mut self, row: u16, col: u16, cell: Cell) {
        if col < self.cols && row < self.visible_rows {
            let r = self.visible_row_mut(row);
            r.cells[col as usize] = cell;
            r.dirty = true;
        }
    }

    /// Clear a cell to default at the given screen-relative position.
    #[allow(dead_code)]
    pub fn clear_cell(&mut self, row: u16, col: u16) {
        if col < self.cols && row < self.visible_rows {
            let r = self.visible_row_mut(row);
            r.cells[col as usize].clear();
            r.dirty = true;
        }
    }

    /// Scroll the region [top, bottom] up by one line.
    /// The top line moves into scrollback (if top == 0), and a blank line is inserted at bottom.
    /// Returns `true` if a line actually moved into scrollback (top == 0), which callers use to
    /// advance their global-row accounting.
    pub fn scroll_up(&mut self, top: u16, bottom: u16) -> bool {
        let offset = self.visible_offset();
        let top_idx = offset + top as usize;
        let bottom_idx = offset + bottom as usize;

        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return false;
        }

        let pushed_to_scrollback = top == 0;

        if pushed_to_scrollback {
            // Top line goes into scrollback; insert a new blank at the bottom position
            let new_row = self.new_row();
            self.rows.insert(bottom_idx + 1, new_row);

            // Trim scrollback if over limit
            while self.rows.len() > self.visible_rows as usize + self.scrollback_limit {
                self.rows.pop_front();
            }
        } else {
            // Remove the top line of the scroll region and insert blank at bottom
            self.rows.remove(top_idx);
            let new_row = self.new_row();
            self.rows.insert(bottom_idx, new_row);
        }

        // Mark visible rows as dirty
        for i in top..=bottom {
            self.visible_row_mut(i).dirty = true;
        }

        pushed_to_scrollback
    }

    /// Scroll the region [top, bottom] down by one line.
    /// The bottom line is discarded and a blank line is inserted at top.
    pub fn scroll_down(&mut self, top: u16, bottom: u16) {
        let offset = self.visible_offset();
        let top_idx = offset + top as usize;
        let bottom_idx = offset + bottom as usize;

        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return;
        }

        self.rows.remove(bottom_idx);
        let new_row = self.new_row();
        self.rows.insert(top_idx, new_row);

        for i in top..=bottom {
            self.visible_row_mut(i).dirty = true;
        }
    }

    /// Resize the grid to new dimensions. Existing content is preserved where possible.
    /// When shrinking, excess rows become scrollback (appropriate for the main grid).
    /// After the resize commit, mark the full visible viewport dirty so the
    /// first post-resize frame is coherent.
    pub fn resize(&mut self, new_rows: u16, new_cols: u16) {
        if new_cols != self.cols {
            self.reflow(new_cols);
        }

        let current_visible = self.visible_rows as usize;
        let new_visible = new_rows as usize;

        if new_visible > current_visible {
            // Need more visible rows. Pull from scrollback or create new blank rows.
            // New rows are created with dirty=true by Row::new().
            let needed = new_visible - current_visible;
            for _ in 0..needed {
                let id = self.ids.next();
                self.rows.push_back(Row::new(new_cols, id));
            }
        }
        // If shrinking, we don't remove rows - they become scrollback

        self.visible_rows = new_rows;
        self.cols = new_cols;
        self.mark_all_dirty();
    }

    /// Re-wrap every row's content at `new_cols`, preserving the logical
    /// lines that soft-wrapped under the old column count (§4.3
    /// "Scrollback"). Rows are grouped into wrapped runs — a maximal
    /// sequence ending each row but the last in `CellFlags::WRAP` on its
    /// final cell — concatenated, re-chunked at `new_cols`, and re-flagged.
    /// Row identity is not preserved across a reflow (content moves between
    /// rows), so every resulting row gets a fresh id and is marked dirty.
    fn reflow(&mut self, new_cols: u16) {
        let old_rows: Vec<Row> = self.rows.drain(..).collect();
        let mut new_rows: VecDeque<Row> = VecDeque::with_capacity(old_rows.len());

        let mut i = 0;
        while i < old_rows.len() {
            let prompt = old_rows[i].prompt;
            let shell_redraws_prompt = old_rows[i].shell_redraws_prompt;

            let mut run_cells: Vec<Cell> = Vec::new();
            let mut j = i;
            loop {
                let row = &old_rows[j];
                let wraps = row
                    .cells
                    .last()
                    .map(|c| c.flags.contains(CellFlags::WRAP))
                    .unwrap_or(false);
                for cell in &row.cells {
                    let mut cell = cell.clone();
                    cell.flags.remove(CellFlags::WRAP);
                    run_cells.push(cell);
                }
                if !wraps || j + 1 >= old_rows.len() {
                    break;
                }
                j += 1;
            }
            i = j + 1;

            // Drop unused trailing padding from the run's last (non-wrapped)
            // row so a short line doesn't grow an extra blank continuation
            // row once re-chunked.
            while run_cells.len() > new_cols as usize
                && run_cells
                    .last()
                    .map(|c| c.c == ' ' && c.bg == Color::Default && c.flags.is_empty())
                    .unwrap_or(false)
            {
                run_cells.pop();
            }

            if run_cells.is_empty() {
                let id = self.ids.next();
                let mut row = Row::new(new_cols, id);
                row.prompt = prompt;
                row.shell_redraws_prompt = shell_redraws_prompt;
                new_rows.push_back(row);
                continue;
            }

            let mut chunks: Vec<Vec<Cell>> =
                run_cells.chunks(new_cols as usize).map(|c| c.to_vec()).collect();
            let chunk_count = chunks.len();
            for (idx, chunk) in chunks.iter_mut().enumerate() {
                chunk.resize(new_cols as usize, Cell::default());
                if idx + 1 < chunk_count {
                    if let Some(last) = chunk.last_mut() {
                        last.flags |= CellFlags::WRAP;
                    }
                }
                let id = self.ids.next();
                let mut row = Row {
                    cells: std::mem::take(chunk),
                    dirty: true,
                    id,
                    prompt: PromptMarker::None,
                    shell_redraws_prompt: false,
                };
                if idx == 0 {
                    row.prompt = prompt;
                    row.shell_redraws_prompt = shell_redraws_prompt;
                }
                new_rows.push_back(row);
            }
        }

        self.rows = new_rows;
    }

    /// Resize for the alternate screen buffer.
    /// Alt-screen content is disposable: TUIs always repaint from scratch on
    /// SIGWINCH. We clear the grid entirely and let the child redraw into a
    /// fresh buffer at the new dimensions, matching xterm/Alacritty behavior.
    pub fn resize_no_scrollback(&mut self, new_rows: u16, new_cols: u16) {
        self.rows.clear();
        for _ in 0..new_rows as usize {
            let id = self.ids.next();
            self.rows.push_back(Row::new(new_cols, id));
        }
        self.visible_rows = new_rows;
        self.cols = new_cols;
        self.mark_all_dirty();
    }

    /// Whether any visible row needs re-shaping by the cell builder this frame.
    pub fn any_dirty(&self) -> bool {
        let offset = self.visible_offset();
        (0..self.visible_rows as usize).any(|i| {
            self.rows
                .get(offset + i)
                .map(|r| r.dirty)
                .unwrap_or(false)
        })
    }

    /// CSI 3J (xterm ED 3): drop everything above the visible viewport,
    /// discarding scrollback entirely. Does not touch visible content.
    pub fn clear_scrollback(&mut self) {
        let offset = self.visible_offset();
        for _ in 0..offset {
            self.rows.pop_front();
        }
    }

    /// Mark all visible rows as dirty (for full redraws).
    pub fn mark_all_dirty(&mut self) {
        let offset = self.visible_offset();
        for i in 0..self.visible_rows as usize {
            if offset + i < self.rows.len() {
                self.rows[offset + i].dirty = true;
            }
        }
    }

    /// Get the total number of lines including scrollback.
    #[allow(dead_code)]
    pub fn total_lines(&self) -> usize {
        self.rows.len()
    }

    /// Get the number of scrollback lines above the visible area.
    #[allow(dead_code)]
    pub fn scrollback_len(&self) -> usize {
        self.visible_offset()
    }

    /// Erase cells in a row from start_col to end_col (exclusive),
    /// filling with the given background color (per ECMA-48). `respect_protected`
    /// is the DECSED/DECSEL selective-erase flag (§4.3); when set, cells
    /// carrying [`CellFlags::PROTECTED`] are left untouched.
    pub fn erase_cells(
        &mut self,
        row: u16,
        start_col: u16,
        end_col: u16,
        bg: Color,
        respect_protected: bool,
    ) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let start = start_col as usize;
        let end = (end_col as usize).min(r.cells.len());
        for i in start..end {
            if respect_protected && r.cells[i].flags.contains(CellFlags::PROTECTED) {
                continue;
            }
            r.cells[i].erase(bg);
        }
        r.dirty = true;
    }

    /// Insert blank cells at position, shifting existing cells right.
    pub fn insert_cells(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let col = col as usize;
        let count = count as usize;
        let len = r.cells.len();

        for _ in 0..count.min(len - col) {
            r.cells.pop();
            r.cells.insert(col, Cell::default());
        }
        r.dirty = true;
    }

    /// Delete cells at position, shifting remaining cells left.
    pub fn delete_cells(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let col = col as usize;
        let count = count as usize;

        let to_remove = count.min(r.cells.len().saturating_sub(col));
        for _ in 0..to_remove {
            if col < r.cells.len() {
                r.cells.remove(col);
                r.cells.push(Cell::default());
            }
        }
        r.dirty = true;
    }
}
