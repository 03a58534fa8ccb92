use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use unicode_width::UnicodeWidthChar;

use super::color::{Color, Palette};
use super::cursor::{CellAttrs, CursorShape, CursorState};
use super::grid::{Cell, CellFlags, Grid};
use super::kitty::{self, FlagSetMode, GraphicsStorage, KeyboardProtocolStack, KittyKeyFlags};
use super::modes::{ModeSaveSlots, TerminalModes, SYNCHRONIZED_OUTPUT_MAX_DURATION};
use super::selection::{ScreenPoint, Selection};
use crate::config::{ClipboardPolicy, ColorReportFormat, CoreConfig};
use crate::ids::{Booid, BooidGenerator};
use crate::mailbox::Mailbox;
use crate::mailbox::Message;
use crate::render::cell_builder::{CellBuilder, GlyphShaper, GpuFrame};
use crate::render::frame::{CursorRender, TerminalEvent};
use crate::shell::ShellIntegration;

/// One of the four G0-G3 character-set slots a charset can be designated
/// into via `ESC ( / ) / * / +` (SCS, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharsetSlot {
    #[default]
    Ascii,
    DecSpecialGraphics,
}

/// Full terminal state. Implements `vte::Perform` to process escape sequences.
pub struct TerminalState {
    pub grid: Grid,
    pub alt_grid: Option<Grid>,
    pub using_alt: bool,
    pub cursor: CursorState,
    pub modes: TerminalModes,
    pub scroll_top: u16,
    pub scroll_bottom: u16,
    /// DECSLRM left/right scrolling-region margins (§3, §4.3). Only
    /// meaningful while `modes.left_right_margin_mode` is set; disabling
    /// DECLRMM resets these back to `(0, cols - 1)` (§4.2).
    pub scroll_left: u16,
    pub scroll_right: u16,
    pub tab_stops: Vec<bool>,
    /// Per-mode-number save slots for `CSI ? Pm s` / `CSI ? Pm r`, distinct
    /// from the all-modes-at-once save done by mode 1048/DECSC (§4.3).
    mode_save_slots: ModeSaveSlots,
    /// Kitty keyboard protocol progressive-enhancement flag stack (§4.2).
    keyboard_stack: KeyboardProtocolStack,
    /// Deadline after which synchronized output (mode 2026) force-disables
    /// itself, set when the mode is enabled and cleared on explicit
    /// disable. `None` whenever the mode is off.
    sync_output_deadline: Option<std::time::Instant>,
    pub title: String,
    pub title_changed: bool,
    pub shell: ShellIntegration,
    cols: u16,
    rows: u16,
    dcs_buffer: Vec<u8>,
    dcs_intermediates: Vec<u8>,
    dcs_action: Option<char>,
    /// Monotonic counter of lines scrolled off (global line index base).
    scrollback_seq: u64,
    /// Terminal-level events (alt screen, etc.) to include in the next frame.
    pending_terminal_events: Vec<TerminalEvent>,
    /// Response bytes queued by CSI 6n (DSR) or CSI c (DA) that the reader
    /// thread should write back to the PTY after processing a chunk.
    pending_responses: Vec<Vec<u8>>,
    /// Monotonic sequence assigned to emitted render frames.
    frame_seq: u64,
    /// Monotonic resize generation. Incremented on every resize.
    resize_epoch: u64,
    /// Active hyperlink URL from OSC 8 (None when no hyperlink is active)
    active_hyperlink: Option<String>,
    /// Inline image counter for generating unique IDs
    image_counter: u64,
    /// G0-G3 charset designations, set by SCS (`ESC ( / ) / * / +`, §4.2).
    charsets: [CharsetSlot; 4],
    /// Currently invoked slot (0-3), set by SI/SO (`GL`) and left alone by
    /// single-shift, which only overrides the *next* character.
    active_charset: usize,
    /// Single-shift override (SS2/SS3, `ESC N` / `ESC O`): applies to
    /// exactly one character then reverts.
    single_shift: Option<usize>,
    /// DECSCA protected-mode pen: cells printed while this is set carry
    /// [`CellFlags::PROTECTED`], which DECSED/DECSEL (selective erase)
    /// leave untouched (§4.3).
    protected_pen: bool,
    /// BEL character received; included in the next render frame then cleared.
    bell_pending: bool,
    /// Live config snapshot: clipboard policy, color-report width, the
    /// configured default cursor-blink preference (§4.2). Swapped wholesale
    /// on a `Message::ChangeConfig` reload, never mutated in place.
    config: Arc<CoreConfig>,
    /// 256-entry color palette with override mask (§3). OSC 4 writes land
    /// here; OSC 104 resets back to [`indexed_to_rgb`].
    palette: Palette,
    /// Outbound channel for messages the reader/IO thread can't answer
    /// itself: clipboard read/write requests, desktop notifications, title
    /// changes. `None` in unit tests that don't wire a mailbox.
    ui_mailbox: Option<Mailbox<Message>>,
    /// Kitty graphics image/placement bookkeeping (§3, §4.2). No pixel
    /// decode happens here — see `crate::terminal::kitty`.
    graphics: GraphicsStorage,
    /// Mints ids for kitty graphics transmissions that omit one (`i=0`).
    id_gen: BooidGenerator,
    /// Accumulated OSC 99 (kitty desktop notification) chunks, keyed by
    /// notification id, until `d=1` closes them out.
    pending_notifications: std::collections::HashMap<String, PendingNotification>,
    /// True when inside a Sixel DCS sequence
    sixel_active: bool,
    /// Accumulated Sixel data buffer
    sixel_buffer: Vec<u8>,
    /// Gate for image protocols (OSC 1337 / Sixel / Kitty scaffolding).
    experimental_image_protocols_enabled: bool,
    /// One-shot warning guard when image protocol data is ignored.
    image_protocol_drop_notified: bool,
    /// Last character passed through `print()`, used by CSI REP (`b`).
    last_printed_char: char,
    /// OSC 10 default foreground color, reported back on query and pushed to
    /// the UI mailbox on set.
    default_fg: (u8, u8, u8),
    /// OSC 11 default background color.
    default_bg: (u8, u8, u8),
    /// OSC 12 text-cursor color.
    cursor_color: (u8, u8, u8),
    /// OSC 22 pointer-shape request (§3 Screen "mouse shape" field). Name
    /// forwarded to the UI thread via `Message::SetMouseShape`; the core
    /// never interprets it beyond storing the latest value.
    pub mouse_shape: String,
    /// Active selection, if any (§4.3 `select_word`/`select_line`/
    /// `select_output`/`select_all`/`selection_string`).
    selection: Option<Selection>,
    /// How many lines the viewport has scrolled up from the bottom (0 = at
    /// bottom, showing the live screen). Driven by `scroll_viewport` (§4.3).
    scroll_offset: u16,
    /// Per-screen GPU cell-record cache (§4.6). Indexed by `using_alt` so a
    /// screen switch can't collide on row ids.
    cell_builder: CellBuilder,
    alt_cell_builder: CellBuilder,
}

/// An OSC 99 (kitty desktop notification) accumulating across chunks until
/// `d=1` closes it out (§4.2).
#[derive(Debug, Clone, Default)]
struct PendingNotification {
    title: Option<String>,
    body: String,
    base64: bool,
}

impl TerminalState {
    pub fn new(rows: u16, cols: u16) -> Self {
        let image_protocols_enabled = true;
        let mut tab_stops = vec![false; cols as usize];
        for i in (0..cols as usize).step_by(8) {
            tab_stops[i] = true;
        }

        Self {
            grid: Grid::new(rows, cols),
            alt_grid: None,
            using_alt: false,
            cursor: CursorState::new(),
            modes: TerminalModes::default(),
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            scroll_left: 0,
            scroll_right: cols.saturating_sub(1),
            tab_stops,
            mode_save_slots: ModeSaveSlots::default(),
            keyboard_stack: KeyboardProtocolStack::new(),
            sync_output_deadline: None,
            title: String::new(),
            title_changed: false,
            shell: ShellIntegration::new(),
            cols,
            rows,
            dcs_buffer: Vec::new(),
            dcs_intermediates: Vec::new(),
            dcs_action: None,
            scrollback_seq: 0,
            pending_terminal_events: Vec::new(),
            pending_responses: Vec::new(),
            frame_seq: 0,
            resize_epoch: 0,
            active_hyperlink: None,
            image_counter: 0,
            charsets: [CharsetSlot::Ascii; 4],
            active_charset: 0,
            single_shift: None,
            protected_pen: false,
            bell_pending: false,
            sixel_active: false,
            sixel_buffer: Vec::new(),
            experimental_image_protocols_enabled: image_protocols_enabled,
            image_protocol_drop_notified: false,
            last_printed_char: ' ',
            config: Arc::new(CoreConfig::default()),
            palette: Palette::default(),
            ui_mailbox: None,
            graphics: GraphicsStorage::new(),
            id_gen: BooidGenerator::with_hostname_machine_id(),
            pending_notifications: std::collections::HashMap::new(),
            default_fg: (0xd4, 0xd4, 0xd4),
            default_bg: (0x0e, 0x0e, 0x0e),
            cursor_color: (0xd4, 0xd4, 0xd4),
            mouse_shape: String::new(),
            selection: None,
            scroll_offset: 0,
            cell_builder: CellBuilder::new(rows, cols),
            alt_cell_builder: CellBuilder::new(rows, cols),
        }
    }

    /// Feed one chunk of child-process output. Kitty graphics APC escapes
    /// are carved out before the remainder reaches `vte::Parser` (§4.2) —
    /// `vte` has no `Perform` hook for APC content, so the core must
    /// intercept it in the raw byte stream itself.
    pub fn process_chunk(&mut self, parser: &mut vte::Parser, chunk: &[u8]) {
        let (passthrough, commands) = kitty::extract_apc_graphics_commands(chunk);
        for cmd in commands {
            self.handle_kitty_graphics(cmd);
        }
        for &byte in &passthrough {
            parser.advance(self, byte);
        }
    }

    fn handle_kitty_graphics(&mut self, cmd: kitty::GraphicsCommand) {
        let cursor = (self.cursor.row, self.cursor.col);
        let id_gen = &self.id_gen;
        if let Some(reply) = self
            .graphics
            .dispatch(cmd, || id_gen.next().as_u64() as u32, cursor)
        {
            self.pending_responses.push(reply.encode());
        }
    }

    /// Attach the outbound UI mailbox. Called once by the session/IO
    /// coordinator after construction; tests may leave this unset, in which
    /// case clipboard/notification requests are dropped instead of queued.
    pub fn set_ui_mailbox(&mut self, mailbox: Mailbox<Message>) {
        self.ui_mailbox = Some(mailbox);
    }

    /// Replace the live config snapshot, e.g. in response to a
    /// `Message::ChangeConfig` reload (§9: publish new instances, never
    /// mutate one another thread might be reading).
    pub fn set_config(&mut self, config: Arc<CoreConfig>) {
        self.config = config;
    }

    /// Best-effort push to the UI mailbox; silently dropped if unset or full.
    fn push_ui(&self, message: Message) {
        if let Some(mailbox) = &self.ui_mailbox {
            let _ = mailbox.try_push(message);
        }
    }

    /// Format an OSC color report for `ident` (e.g. `"11"` or `"4;3"`),
    /// honoring the configured report width (§4.2 "Color reporting").
    /// Returns `None` when the format is `ColorReportFormat::None`, in which
    /// case the query is silently ignored per spec.
    fn format_color_report(&self, ident: &str, rgb: (u8, u8, u8)) -> Option<String> {
        let (r, g, b) = rgb;
        match self.config.terminal.color_report_format {
            ColorReportFormat::None => None,
            ColorReportFormat::EightBit => {
                Some(format!("\x1b]{};rgb:{:02x}/{:02x}/{:02x}\x1b\\", ident, r, g, b))
            }
            ColorReportFormat::SixteenBit => {
                let (r16, g16, b16) = (r as u16 * 0x0101, g as u16 * 0x0101, b as u16 * 0x0101);
                Some(format!(
                    "\x1b]{};rgb:{:04x}/{:04x}/{:04x}\x1b\\",
                    ident, r16, g16, b16
                ))
            }
        }
    }

    /// Drain any queued response bytes (DSR, DA) that should be written back
    /// to the PTY. The reader thread calls this after processing a chunk.
    pub fn take_pending_responses(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending_responses)
    }

    /// Current frame sequence number.
    pub fn frame_seq(&self) -> u64 {
        self.frame_seq
    }

    /// Current resize generation.
    pub fn resize_epoch(&self) -> u64 {
        self.resize_epoch
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        // Main grid shrink moves top visible rows into scrollback. The grid
        // itself retains shrunk rows as scrollback (`Grid::resize`); we only
        // need to keep the global row accounting in sync.
        if !self.using_alt && rows < self.rows {
            let lost_rows = (self.rows - rows) as u64;
            self.scrollback_seq = self.scrollback_seq.saturating_add(lost_rows);
        }

        self.grid.resize(rows, cols);
        if let Some(ref mut alt) = self.alt_grid {
            // Alt screen has no scrollback; discard excess rows when shrinking
            alt.resize_no_scrollback(rows, cols);
        }
        self.rows = rows;
        self.cols = cols;
        self.scroll_top = 0;
        self.scroll_bottom = rows.saturating_sub(1);
        self.scroll_left = 0;
        self.scroll_right = cols.saturating_sub(1);
        self.tab_stops = vec![false; cols as usize];
        for i in (0..cols as usize).step_by(8) {
            self.tab_stops[i] = true;
        }
        self.cursor.row = self.cursor.row.min(rows.saturating_sub(1));
        self.cursor.col = self.cursor.col.min(cols.saturating_sub(1));
        self.scroll_offset = 0;
        self.cell_builder.resize(rows, cols);
        self.alt_cell_builder.resize(rows, cols);
        self.resize_epoch = self.resize_epoch.saturating_add(1);
    }

    /// Whether synchronized output (mode 2026) is still holding back frame
    /// emission. Auto-expires and force-disables the mode if the safety
    /// timeout has elapsed, so a renderer polling this method needs no
    /// separate watchdog (§4.2/§5).
    pub fn synchronized_output_active(&mut self) -> bool {
        if !self.modes.synchronized_output {
            return false;
        }
        if let Some(deadline) = self.sync_output_deadline {
            if std::time::Instant::now() >= deadline {
                self.modes.synchronized_output = false;
                self.sync_output_deadline = None;
                return false;
            }
        }
        true
    }

    /// Build this frame's GPU cell records (§4.6) plus cursor and pending
    /// events. Returns `None` if nothing changed since the last call:
    /// `shaper` is only invoked for rows the builder decides need re-shaping,
    /// so the cost of a no-op frame is a handful of dirty-flag checks.
    pub fn take_gpu_frame(&mut self, shaper: &mut dyn GlyphShaper) -> Option<GpuFrame> {
        let events = self.shell.take_pending_events();
        let mut all_events = events;
        all_events.append(&mut self.pending_terminal_events);
        if self.title_changed {
            all_events.push(TerminalEvent::TitleChanged {
                title: self.title.clone(),
            });
            self.title_changed = false;
        }
        if self.bell_pending {
            all_events.push(TerminalEvent::Bell);
            self.bell_pending = false;
        }

        let any_dirty = if self.using_alt {
            self.alt_grid.as_ref().map(|g| g.any_dirty()).unwrap_or(false)
        } else {
            self.grid.any_dirty()
        };

        if !any_dirty && all_events.is_empty() {
            return None;
        }

        let shape_str = match self.cursor.shape {
            CursorShape::Block => "block",
            CursorShape::Underline => "underline",
            CursorShape::Bar => "bar",
        };
        let cursor_render = CursorRender {
            row: self.cursor.row,
            col: self.cursor.col,
            visible: self.cursor.visible && self.modes.cursor_visible,
            shape: shape_str.to_string(),
        };

        let cursor_on_wide_cell = if self.using_alt {
            self.alt_grid.as_ref()
        } else {
            Some(&self.grid)
        }
        .map(|g| {
            self.cursor.row < g.visible_rows
                && g.visible_row(self.cursor.row)
                    .cells
                    .get(self.cursor.col as usize)
                    .map(|c| c.flags.contains(CellFlags::WIDE_CHAR))
                    .unwrap_or(false)
        })
        .unwrap_or(false);

        let viewport_at_bottom = self.scroll_offset == 0;
        let screen_id: u8 = if self.using_alt { 1 } else { 0 };
        let default_fg = self.default_fg;
        let default_bg = self.default_bg;
        let selection = self.selection.clone();
        let palette = self.palette.clone();
        let rows = self.rows;
        let cols = self.cols;

        let (grid, builder) = if self.using_alt {
            match self.alt_grid.as_mut() {
                Some(g) => (g, &mut self.alt_cell_builder),
                None => return None,
            }
        } else {
            (&mut self.grid, &mut self.cell_builder)
        };

        let records = builder.build_frame_at(
            grid,
            screen_id,
            self.scroll_offset,
            selection.as_ref(),
            &cursor_render,
            cursor_on_wide_cell,
            viewport_at_bottom,
            &palette,
            default_fg,
            default_bg,
            shaper,
        );

        self.frame_seq = self.frame_seq.saturating_add(1);

        Some(GpuFrame {
            frame_seq: self.frame_seq,
            resize_epoch: self.resize_epoch,
            records,
            cursor: cursor_render,
            events: all_events,
            visible_rows: rows,
            visible_cols: cols,
        })
    }

    // Helper: get the active grid mutably. Callers must copy any self.* values
    // they need BEFORE calling this, because it borrows &mut self.
    fn active_grid_mut(&mut self) -> &mut Grid {
        if self.using_alt {
            self.alt_grid.as_mut().unwrap()
        } else {
            &mut self.grid
        }
    }

    fn linefeed(&mut self) {
        if self.cursor.row == self.scroll_bottom {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            if self.active_grid_mut().scroll_up(top, bottom) && !self.using_alt {
                self.scrollback_seq = self.scrollback_seq.saturating_add(1);
            }
        } else if self.cursor.row < self.rows.saturating_sub(1) {
            self.cursor.row += 1;
        }
    }

    fn global_row(&self) -> u64 {
        self.scrollback_seq + self.cursor.row as u64
    }

    fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_top {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            self.active_grid_mut().scroll_down(top, bottom);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    fn backspace(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        }
    }

    fn tab(&mut self) {
        let col = self.cursor.col as usize + 1;
        for i in col..self.cols as usize {
            if self.tab_stops.get(i).copied().unwrap_or(false) {
                self.cursor.col = i as u16;
                return;
            }
        }
        self.cursor.col = self.cols.saturating_sub(1);
    }

    fn cursor_up(&mut self, n: u16) {
        let min_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom
        {
            self.scroll_top
        } else {
            0
        };
        self.cursor.row = self.cursor.row.saturating_sub(n).max(min_row);
    }

    fn cursor_down(&mut self, n: u16) {
        let max_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom
        {
            self.scroll_bottom
        } else {
            self.rows.saturating_sub(1)
        };
        self.cursor.row = (self.cursor.row + n).min(max_row);
    }

    fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = (self.cursor.col + n).min(self.cols.saturating_sub(1));
    }

    fn cursor_backward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    /// `protected` selects DECSED (when true) over plain ED: DECSED leaves
    /// DECSCA-protected cells untouched (§4.3).
    fn erase_display(&mut self, mode: u16, protected: bool) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let rows = self.rows;
        let bg = self.cursor.bg;
        let grid = self.active_grid_mut();
        match mode {
            0 => {
                grid.erase_cells(crow, ccol, cols, bg, protected);
                for r in (crow + 1)..rows {
                    grid.visible_row_mut(r).erase_with_bg(bg, protected);
                }
            }
            1 => {
                for r in 0..crow {
                    grid.visible_row_mut(r).erase_with_bg(bg, protected);
                }
                grid.erase_cells(crow, 0, ccol + 1, bg, protected);
            }
            2 => {
                if grid.visible_row(crow).prompt == super::grid::PromptMarker::Prompt {
                    grid.visible_row_mut(crow).prompt = super::grid::PromptMarker::Command;
                }
                for r in 0..rows {
                    grid.visible_row_mut(r).erase_with_bg(bg, protected);
                }
                self.scroll_viewport_to_bottom();
                self.pending_responses.push(vec![0x0c]);
            }
            3 => {
                // ED 3 (xterm extension): erase scrollback buffer.
                // Does not affect visible content — only clears history.
                if !self.using_alt {
                    self.grid.clear_scrollback();
                }
                self.pending_terminal_events
                    .push(TerminalEvent::ScrollbackCleared);
            }
            _ => {}
        }
    }

    /// `protected` selects DECSEL (when true) over plain EL (§4.3).
    fn erase_line(&mut self, mode: u16, protected: bool) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let bg = self.cursor.bg;
        let grid = self.active_grid_mut();
        match mode {
            0 => grid.erase_cells(crow, ccol, cols, bg, protected),
            1 => grid.erase_cells(crow, 0, ccol + 1, bg, protected),
            2 => grid.visible_row_mut(crow).erase_with_bg(bg, protected),
            _ => {}
        }
    }

    fn insert_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            for _ in 0..n {
                self.active_grid_mut().scroll_down(crow, bottom);
            }
            self.cursor.col = 0;
        }
    }

    fn delete_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            for _ in 0..n {
                if self.active_grid_mut().scroll_up(crow, bottom) && !self.using_alt {
                    self.scrollback_seq = self.scrollback_seq.saturating_add(1);
                }
            }
            self.cursor.col = 0;
        }
    }

    fn erase_chars(&mut self, n: u16) {
        let end = (self.cursor.col + n).min(self.cols);
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let bg = self.cursor.bg;
        self.active_grid_mut()
            .erase_cells(crow, ccol, end, bg, false);
    }

    fn insert_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        self.active_grid_mut().insert_cells(crow, ccol, n);
    }

    fn delete_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        self.active_grid_mut().delete_cells(crow, ccol, n);
    }

    fn scroll_up_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        for _ in 0..n {
            if self.active_grid_mut().scroll_up(top, bottom) && !self.using_alt {
                self.scrollback_seq = self.scrollback_seq.saturating_add(1);
            }
        }
    }

    fn scroll_down_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        for _ in 0..n {
            self.active_grid_mut().scroll_down(top, bottom);
        }
    }

    fn save_cursor(&mut self) {
        self.cursor.save();
    }

    fn restore_cursor(&mut self) {
        self.cursor.restore();
    }

    fn enter_alt_screen(&mut self) {
        if !self.using_alt {
            self.alt_grid = Some(Grid::new(self.rows, self.cols));
            self.using_alt = true;
            self.modes.alt_screen = true;
            self.pending_terminal_events
                .push(TerminalEvent::AltScreenEntered);
        }
    }

    fn exit_alt_screen(&mut self) {
        if self.using_alt {
            self.using_alt = false;
            self.modes.alt_screen = false;
            self.alt_grid = None;
            self.grid.mark_all_dirty();
            self.pending_terminal_events
                .push(TerminalEvent::AltScreenExited);
        }
    }

    fn clear_screen(&mut self) {
        let rows = self.rows;
        let grid = self.active_grid_mut();
        for r in 0..rows {
            grid.visible_row_mut(r).clear();
        }
        self.cursor.row = 0;
        self.cursor.col = 0;
    }

    fn handle_sgr(&mut self, params: &[u16]) {
        let params = if params.is_empty() {
            &[0u16][..]
        } else {
            params
        };
        let mut i = 0;

        while i < params.len() {
            match params[i] {
                0 => {
                    self.cursor.attrs = CellAttrs::empty();
                    self.cursor.fg = Color::Default;
                    self.cursor.bg = Color::Default;
                }
                1 => self.cursor.attrs.insert(CellAttrs::BOLD),
                2 => self.cursor.attrs.insert(CellAttrs::DIM),
                3 => self.cursor.attrs.insert(CellAttrs::ITALIC),
                4 => self.cursor.attrs.insert(CellAttrs::UNDERLINE),
                5 => self.cursor.attrs.insert(CellAttrs::BLINK),
                7 => self.cursor.attrs.insert(CellAttrs::REVERSE),
                8 => self.cursor.attrs.insert(CellAttrs::HIDDEN),
                9 => self.cursor.attrs.insert(CellAttrs::STRIKETHROUGH),
                22 => {
                    self.cursor.attrs.remove(CellAttrs::BOLD);
                    self.cursor.attrs.remove(CellAttrs::DIM);
                }
                23 => self.cursor.attrs.remove(CellAttrs::ITALIC),
                24 => self.cursor.attrs.remove(CellAttrs::UNDERLINE),
                25 => self.cursor.attrs.remove(CellAttrs::BLINK),
                27 => self.cursor.attrs.remove(CellAttrs::REVERSE),
                28 => self.cursor.attrs.remove(CellAttrs::HIDDEN),
                29 => self.cursor.attrs.remove(CellAttrs::STRIKETHROUGH),
                30..=37 => self.cursor.fg = Color::Indexed(params[i] as u8 - 30),
                38 => {
                    i += 1;
                    if i < params.len() {
                        match params[i] {
                            2 if i + 3 < params.len() => {
                                self.cursor.fg = Color::Rgb(
                                    params[i + 1] as u8,
                                    params[i + 2] as u8,
                                    params[i + 3] as u8,
                                );
                                i += 3;
                            }
                            5 if i + 1 < params.len() => {
                                self.cursor.fg = Color::Indexed(params[i + 1] as u8);
                                i += 1;
                            }
                            _ => {}
                        }
                    }
                }
                39 => self.cursor.fg = Color::Default,
                40..=47 => self.cursor.bg = Color::Indexed(params[i] as u8 - 40),
                48 => {
                    i += 1;
                    if i < params.len() {
                        match params[i] {
                            2 if i + 3 < params.len() => {
                                self.cursor.bg = Color::Rgb(
                                    params[i + 1] as u8,
                                    params[i + 2] as u8,
                                    params[i + 3] as u8,
                                );
                                i += 3;
                            }
                            5 if i + 1 < params.len() => {
                                self.cursor.bg = Color::Indexed(params[i + 1] as u8);
                                i += 1;
                            }
                            _ => {}
                        }
                    }
                }
                49 => self.cursor.bg = Color::Default,
                90..=97 => self.cursor.fg = Color::Indexed(params[i] as u8 - 90 + 8),
                100..=107 => self.cursor.bg = Color::Indexed(params[i] as u8 - 100 + 8),
                _ => {}
            }
            i += 1;
        }
    }

    fn emit_mode_changed(&mut self) {
        self.pending_terminal_events
            .push(TerminalEvent::MouseModeChanged {
                tracking: self.modes.mouse_tracking,
                motion: self.modes.mouse_motion,
                all_motion: self.modes.mouse_all_motion,
                sgr: self.modes.sgr_mouse,
                utf8: self.modes.utf8_mouse,
                focus: self.modes.focus_events,
                alt_scroll: self.modes.alternate_scroll,
                synchronized_output: self.modes.synchronized_output,
                bracketed_paste: self.modes.bracketed_paste,
                cursor_keys_application: self.modes.cursor_keys_application,
            });
    }

    fn set_dec_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                1 => {
                    self.modes.cursor_keys_application = enable;
                    self.emit_mode_changed();
                }
                6 => {
                    self.modes.origin = enable;
                    // DECOM toggle homes cursor
                    if enable {
                        self.cursor.row = self.scroll_top;
                    } else {
                        self.cursor.row = 0;
                    }
                    self.cursor.col = 0;
                }
                7 => self.modes.autowrap = enable,
                9 => {
                    self.modes.mouse_x10 = enable;
                    self.emit_mode_changed();
                }
                3 => {
                    // DECCOLM (132-column mode): only actually resizes when
                    // xterm's 80/132 switching gate (mode 40) is enabled;
                    // otherwise the private mode is tracked but inert (§4.2).
                    self.modes.column_132 = enable;
                    if self.modes.enable_mode_3 {
                        let cols = if enable { 132 } else { 80 };
                        self.pending_terminal_events
                            .push(TerminalEvent::ResizeRequested {
                                cols,
                                rows: self.rows,
                            });
                        self.clear_screen();
                        self.scroll_top = 0;
                        self.scroll_bottom = self.rows.saturating_sub(1);
                        self.scroll_left = 0;
                        self.scroll_right = cols.saturating_sub(1);
                    }
                }
                40 => self.modes.enable_mode_3 = enable,
                69 => {
                    self.modes.left_right_margin_mode = enable;
                    if !enable {
                        // Disabling DECLRMM resets margins to full width (§4.2).
                        self.scroll_left = 0;
                        self.scroll_right = self.cols.saturating_sub(1);
                    }
                }
                1036 => self.modes.alt_esc_prefix = enable,
                12 => {
                    // Mode 12 is suppressed when the user configured an
                    // explicit default blink preference; DECSCUSR (CSI q)
                    // always wins regardless (§4.2).
                    if self.config.terminal.cursor_blink.is_none() {
                        self.modes.cursor_blinking = enable;
                    }
                }
                25 => self.modes.cursor_visible = enable,
                47 => {
                    if enable {
                        self.enter_alt_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1047 => {
                    // Alt screen with clear on enter (no cursor save/restore)
                    if enable {
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1048 => {
                    // Save/restore cursor (used with mode 1047)
                    if enable {
                        self.save_cursor();
                    } else {
                        self.restore_cursor();
                    }
                }
                1000 => {
                    self.modes.mouse_tracking = enable;
                    self.emit_mode_changed();
                }
                1002 => {
                    self.modes.mouse_motion = enable;
                    self.emit_mode_changed();
                }
                1003 => {
                    self.modes.mouse_all_motion = enable;
                    self.emit_mode_changed();
                }
                1004 => {
                    self.modes.focus_events = enable;
                    self.emit_mode_changed();
                }
                1005 => {
                    self.modes.utf8_mouse = enable;
                    self.emit_mode_changed();
                }
                1006 => {
                    self.modes.sgr_mouse = enable;
                    self.emit_mode_changed();
                }
                1007 => {
                    self.modes.alternate_scroll = enable;
                    self.emit_mode_changed();
                }
                1015 => {
                    self.modes.urxvt_mouse = enable;
                    self.emit_mode_changed();
                }
                1016 => {
                    self.modes.sgr_pixels_mouse = enable;
                    self.emit_mode_changed();
                }
                1049 => {
                    if enable {
                        self.save_cursor();
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                        self.restore_cursor();
                    }
                }
                2004 => {
                    self.modes.bracketed_paste = enable;
                    self.emit_mode_changed();
                }
                2026 => {
                    self.modes.synchronized_output = enable;
                    self.sync_output_deadline = if enable {
                        Some(std::time::Instant::now() + SYNCHRONIZED_OUTPUT_MAX_DURATION)
                    } else {
                        None
                    };
                    self.emit_mode_changed();
                }
                _ => {}
            }
        }
    }

    fn report_mode_state(&mut self, mode: u16, set: Option<bool>, dec_private: bool) {
        let pm = match set {
            Some(true) => 1,
            Some(false) => 2,
            None => 0,
        };
        let prefix = if dec_private { "?" } else { "" };
        let response = format!("\x1b[{}{};{}$y", prefix, mode, pm);
        self.pending_responses.push(response.into_bytes());
    }

    fn dec_mode_state(&self, mode: u16) -> Option<bool> {
        match mode {
            1 => Some(self.modes.cursor_keys_application),
            3 => Some(self.modes.column_132),
            6 => Some(self.modes.origin),
            7 => Some(self.modes.autowrap),
            9 => Some(self.modes.mouse_x10),
            25 => Some(self.modes.cursor_visible),
            40 => Some(self.modes.enable_mode_3),
            47 | 1047 | 1049 => Some(self.using_alt),
            69 => Some(self.modes.left_right_margin_mode),
            1036 => Some(self.modes.alt_esc_prefix),
            1000 => Some(self.modes.mouse_tracking),
            1002 => Some(self.modes.mouse_motion),
            1003 => Some(self.modes.mouse_all_motion),
            1004 => Some(self.modes.focus_events),
            1005 => Some(self.modes.utf8_mouse),
            1006 => Some(self.modes.sgr_mouse),
            1007 => Some(self.modes.alternate_scroll),
            1015 => Some(self.modes.urxvt_mouse),
            1016 => Some(self.modes.sgr_pixels_mouse),
            2004 => Some(self.modes.bracketed_paste),
            2026 => Some(self.modes.synchronized_output),
            _ => None,
        }
    }

    fn ansi_mode_state(&self, mode: u16) -> Option<bool> {
        match mode {
            4 => Some(self.modes.insert),
            20 => Some(self.modes.linefeed_newline),
            _ => None,
        }
    }

    fn report_dec_modes(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.report_mode_state(0, None, true);
            return;
        }
        for &mode in params {
            self.report_mode_state(mode, self.dec_mode_state(mode), true);
        }
    }

    fn report_ansi_modes(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.report_mode_state(0, None, false);
            return;
        }
        for &mode in params {
            self.report_mode_state(mode, self.ansi_mode_state(mode), false);
        }
    }

    fn set_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                4 => self.modes.insert = enable,
                20 => self.modes.linefeed_newline = enable,
                _ => {}
            }
        }
    }

    fn handle_osc(&mut self, params: &[&[u8]]) {
        if params.is_empty() {
            return;
        }

        let first = std::str::from_utf8(params[0]).unwrap_or("");

        match first {
            "0" | "2" => {
                if params.len() >= 2 {
                    self.title = String::from_utf8_lossy(params[1]).to_string();
                    self.title_changed = true;
                }
            }
            "7" => {
                if params.len() >= 2 {
                    let uri = String::from_utf8_lossy(params[1]).into_owned();
                    self.handle_osc_7(&uri);
                }
            }
            "133" => {
                if params.len() >= 2 {
                    let marker = std::str::from_utf8(params[1]).unwrap_or("");
                    match marker {
                        "A" => {
                            let row = self.global_row();
                            self.shell.prompt_start(row);
                            let crow = self.cursor.row;
                            self.active_grid_mut().visible_row_mut(crow).prompt =
                                super::grid::PromptMarker::Prompt;
                        }
                        "B" => {
                            let cmd: String = params[2..]
                                .iter()
                                .map(|p| String::from_utf8_lossy(p))
                                .collect::<Vec<_>>()
                                .join(";");
                            if !cmd.is_empty() {
                                let row = self.global_row();
                                self.shell.command_start(cmd, row);
                            }
                        }
                        "C" => {}
                        "T" => {
                            // Tmux passthrough intercepted by the shell hook.
                            // The remaining params contain the raw tmux arguments.
                            let args: String = params[2..]
                                .iter()
                                .map(|p| String::from_utf8_lossy(p))
                                .collect::<Vec<_>>()
                                .join(";");
                            self.pending_terminal_events
                                .push(TerminalEvent::TmuxRequested { args });
                        }
                        "D" => {
                            let exit_code = params
                                .get(2)
                                .and_then(|p| std::str::from_utf8(p).ok())
                                .and_then(|s| s.parse::<i32>().ok())
                                .unwrap_or(0);
                            let row = self.global_row();
                            self.shell.command_end(exit_code, row);
                        }
                        _ => {}
                    }
                }
            }
            "8" => {
                // OSC 8 - Hyperlink: \x1b]8;params;uri\x1b\\
                // Opening: params;uri (uri non-empty)
                // Closing: params; (uri empty, just ";")
                if params.len() >= 3 {
                    let uri = String::from_utf8_lossy(params[2]).to_string();
                    if uri.is_empty() {
                        self.active_hyperlink = None;
                    } else {
                        self.active_hyperlink = Some(uri);
                    }
                } else if params.len() >= 2 {
                    // Closing tag with just the params separator
                    self.active_hyperlink = None;
                }
            }
            "52" => {
                self.handle_osc_52(params);
            }
            "4" => {
                // OSC 4 ; index ; spec [; index ; spec ...] — `spec == "?"`
                // queries, anything else sets (§4.2 "Color reporting",
                // §8 "for every palette entry set via OSC 4, reading via
                // OSC 4 returns the same RGB").
                let mut rest = &params[1..];
                while rest.len() >= 2 {
                    let (idx_bytes, spec_bytes) = (rest[0], rest[1]);
                    rest = &rest[2..];
                    let Ok(index) = std::str::from_utf8(idx_bytes)
                        .unwrap_or("")
                        .parse::<u8>()
                    else {
                        continue;
                    };
                    if spec_bytes == b"?" {
                        if let Some(response) =
                            self.format_color_report(&format!("4;{}", index), self.palette.get(index))
                        {
                            self.pending_responses.push(response.into_bytes());
                        }
                    } else if let Some(rgb) =
                        parse_color_spec(std::str::from_utf8(spec_bytes).unwrap_or(""))
                    {
                        self.palette.set(index, rgb);
                    }
                }
            }
            "104" => {
                // OSC 104 ; index [; index ...] — reset those palette
                // entries; no arguments resets the whole palette.
                if params.len() <= 1 {
                    self.palette.reset_all();
                } else {
                    for p in &params[1..] {
                        if let Ok(index) = std::str::from_utf8(p).unwrap_or("").parse::<u8>() {
                            self.palette.reset(index);
                        }
                    }
                }
            }
            "10" | "11" | "12" => {
                if params.len() >= 2 {
                    if params[1] == b"?" {
                        let rgb = match first {
                            "10" => self.default_fg,
                            "11" => self.default_bg,
                            _ => self.cursor_color,
                        };
                        if let Some(response) = self.format_color_report(first, rgb) {
                            self.pending_responses.push(response.into_bytes());
                        }
                    } else if let Some(rgb) =
                        parse_color_spec(std::str::from_utf8(params[1]).unwrap_or(""))
                    {
                        match first {
                            "10" => {
                                self.default_fg = rgb;
                                self.push_ui(Message::ForegroundColor(Color::Rgb(
                                    rgb.0, rgb.1, rgb.2,
                                )));
                            }
                            "11" => {
                                self.default_bg = rgb;
                                self.push_ui(Message::BackgroundColor(Color::Rgb(
                                    rgb.0, rgb.1, rgb.2,
                                )));
                            }
                            _ => {
                                self.cursor_color = rgb;
                                self.push_ui(Message::CursorColor(Color::Rgb(
                                    rgb.0, rgb.1, rgb.2,
                                )));
                            }
                        }
                    }
                }
            }
            "1337" => {
                // iTerm2 inline image protocol: OSC 1337 ; File=<params>:<base64data> ST
                if params.len() >= 2 {
                    let payload = String::from_utf8_lossy(params[1]).to_string();
                    if let Some(rest) = payload.strip_prefix("File=") {
                        // Parse key=value pairs before the colon
                        if let Some(colon_idx) = rest.find(':') {
                            let param_str = &rest[..colon_idx];
                            let base64_data = &rest[colon_idx + 1..];
                            let mut width: u16 = 0;
                            let mut height: u16 = 0;
                            let mut is_inline = false;

                            for part in param_str.split(';') {
                                if let Some((key, val)) = part.split_once('=') {
                                    match key {
                                        "width" => width = val.parse().unwrap_or(0),
                                        "height" => height = val.parse().unwrap_or(0),
                                        "inline" => is_inline = val == "1",
                                        _ => {}
                                    }
                                }
                            }

                            if is_inline && !base64_data.is_empty() && self.experimental_image_protocols_enabled {
                                self.image_counter += 1;
                                let id = format!("img-{}", self.image_counter);
                                self.pending_terminal_events
                                    .push(TerminalEvent::InlineImage {
                                        id,
                                        data_base64: base64_data.to_string(),
                                        width,
                                        height,
                                        row: self.cursor.row,
                                        col: self.cursor.col,
                                    });
                            } else if is_inline
                                && !base64_data.is_empty()
                                && !self.image_protocol_drop_notified
                            {
                                tracing::info!(
                                    "Image protocol payload received but experimental rendering is disabled"
                                );
                                self.image_protocol_drop_notified = true;
                            }
                        }
                    }
                }
            }
            "99" => {
                if params.len() >= 2 {
                    let payload = params[2..]
                        .iter()
                        .map(|p| String::from_utf8_lossy(p).into_owned())
                        .collect::<Vec<_>>()
                        .join(";");
                    self.handle_osc_99(params[1], &payload);
                }
            }
            "22" => {
                // OSC 22 ; shape — xterm pointer-shape request. The core
                // only tracks the requested shape and forwards it to the
                // UI thread (§3 Screen "mouse shape" field, §6 mailbox
                // taxonomy's `set_mouse_shape`); actually drawing a cursor
                // icon is OS integration, out of scope per §1.
                if params.len() >= 2 {
                    let shape = String::from_utf8_lossy(params[1]).into_owned();
                    if !shape.is_empty() && shape != "?" {
                        self.mouse_shape = shape.clone();
                        self.push_ui(Message::SetMouseShape(shape));
                    }
                }
            }
            _ => {}
        }
    }

    /// OSC 99: `\e]99;<metadata>;<payload>\e\`. `metadata` is a set of
    /// `:`-separated `key=value` pairs; identifiers are restricted to
    /// `[a-zA-Z0-9_+.\-]`. Chunks accumulate per identifier until `d=1`
    /// closes the notification out, at which point it's handed to the UI
    /// thread via the mailbox (desktop-notification display is OS
    /// integration, out of the core's scope per §1).
    fn handle_osc_99(&mut self, metadata: &[u8], payload: &str) {
        let meta = String::from_utf8_lossy(metadata);
        let mut id = String::new();
        let mut done = true;
        let mut base64 = false;
        let mut is_body = false;

        for pair in meta.split(':') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "i" => {
                    id = value
                        .chars()
                        .filter(|c| {
                            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')
                        })
                        .collect();
                }
                "d" => done = value != "0",
                "e" => base64 = value == "1",
                "p" => is_body = value == "body",
                // "n" is the urgency/type field; kitty and ghostty both
                // accept "warn" as an alias for "warning" (§9 open question).
                // Preserved as-is — the core doesn't interpret urgency
                // itself, only forwards it through DesktopNotification.
                "n" => {}
                _ => {}
            }
        }

        let text = if base64 {
            BASE64_STANDARD
                .decode(payload.as_bytes())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        } else {
            payload.to_string()
        };

        let entry = self.pending_notifications.entry(id.clone()).or_default();
        entry.base64 = base64;
        if is_body {
            entry.body.push_str(&text);
        } else {
            entry
                .title
                .get_or_insert_with(String::new)
                .push_str(&text);
        }

        if done {
            if let Some(entry) = self.pending_notifications.remove(&id) {
                if let Some(mailbox) = &self.ui_mailbox {
                    let _ = mailbox.try_push(Message::DesktopNotification {
                        title: entry.title.unwrap_or_default(),
                        body: entry.body,
                    });
                }
            }
        }
    }

    /// OSC 52: `\e]52;Pc;Pd\e\`. Both the read and write side are routed to
    /// the UI thread via the mailbox (§1 scope: clipboard access is an OS
    /// integration concern outside the core) rather than touching a system
    /// clipboard directly. `Pd == "?"` requests a read; any other payload
    /// (base64, possibly empty) requests a write. Policy is enforced here so
    /// a denied request never reaches the UI at all (§7 "Clipboard denied").
    /// OSC 7: `\e]7;file://host/path\e\`. Also accepts the `kitty-shell-cwd`
    /// scheme some shells emit. The host component is validated against
    /// empty, `localhost`, and the machine's own hostname before the path is
    /// trusted (§4.2 "cwd reporting") — a mismatched host means the report
    /// came from a remote shell over ssh and the path isn't locally valid.
    fn handle_osc_7(&mut self, uri: &str) {
        let rest = match uri.strip_prefix("file://") {
            Some(r) => r,
            None => match uri.strip_prefix("kitty-shell-cwd://") {
                Some(r) => r,
                None => return,
            },
        };

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let host = normalize_osc7_host(host);
        if !host.is_empty() && host != "localhost" {
            let local_hostname = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_default();
            if host != local_hostname {
                return;
            }
        }

        if path.is_empty() {
            return;
        }

        let decoded = percent_decode(path);
        if self.title.is_empty() {
            self.title = decoded.clone();
            self.title_changed = true;
        }
        self.shell.set_cwd(decoded);
    }

    fn handle_osc_52(&mut self, params: &[&[u8]]) {
        if params.len() < 3 {
            return;
        }

        let payload = std::str::from_utf8(params[2]).unwrap_or("");

        if payload == "?" {
            if self.config.terminal.clipboard_read == ClipboardPolicy::Deny {
                return;
            }
            if let Some(mailbox) = &self.ui_mailbox {
                let _ = mailbox.try_push(Message::ClipboardRead);
            }
            return;
        }

        if self.config.terminal.clipboard_write == ClipboardPolicy::Deny {
            return;
        }

        let decoded = if payload.is_empty() {
            Vec::new()
        } else {
            match BASE64_STANDARD.decode(payload.as_bytes()) {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        };

        if let Some(mailbox) = &self.ui_mailbox {
            let _ = mailbox.try_push(Message::ClipboardWrite(decoded));
        }
    }

    /// Called by the UI thread once it has resolved a `ClipboardRead`
    /// request (or the user declined it): queues the OSC 52 reply, base64
    /// encoding an empty string if the read was declined or failed.
    pub fn complete_clipboard_read(&mut self, text: Option<&str>) {
        let encoded = BASE64_STANDARD.encode(text.unwrap_or("").as_bytes());
        let response = format!("\x1b]52;c;{}\x1b\\", encoded);
        self.pending_responses.push(response.into_bytes());
    }

    fn handle_dcs(&mut self, action: Option<char>, intermediates: &[u8], data: &[u8]) {
        match (action, intermediates) {
            // XTGETTCAP: DCS + q Pt ST
            (Some('q'), [b'+']) => self.handle_xtgettcap(data),
            // DECRQSS: DCS $ q Pt ST
            (Some('q'), [b'$']) => self.handle_decrqss(data),
            // tmux passthrough: DCS tmux; ... ST
            (Some('t'), []) => self.handle_tmux_passthrough(data),
            _ => {}
        }
    }

    fn handle_xtgettcap(&mut self, data: &[u8]) {
        let raw = String::from_utf8_lossy(data);
        if raw.trim().is_empty() {
            self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
            return;
        }

        let mut pairs: Vec<String> = Vec::new();
        for item in raw.split(';') {
            if item.is_empty() {
                continue;
            }
            let name = match decode_hex_ascii(item) {
                Some(n) => n,
                None => {
                    self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
                    return;
                }
            };

            let Some(value) = tcap_capability_value(&name) else {
                self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
                return;
            };

            let pair = format!("{}={}", encode_hex_ascii(&name), encode_hex_ascii(value));
            pairs.push(pair);
        }

        if pairs.is_empty() {
            self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
            return;
        }

        let response = format!("\x1bP1+r{}\x1b\\", pairs.join(";"));
        self.pending_responses.push(response.into_bytes());
    }

    fn handle_decrqss(&mut self, data: &[u8]) {
        // Return a minimal set of queryable status strings used by modern tools.
        let query = String::from_utf8_lossy(data).to_string();
        let status = match query.as_str() {
            // SGR
            "m" => Some("0m".to_string()),
            // DECSCUSR (cursor style)
            " q" => {
                let cursor_style = match self.cursor.shape {
                    CursorShape::Block => 2,
                    CursorShape::Underline => 4,
                    CursorShape::Bar => 6,
                };
                Some(format!("{} q", cursor_style))
            }
            // DECSTBM (scroll region)
            "r" => Some(format!(
                "{};{}r",
                self.scroll_top + 1,
                self.scroll_bottom + 1
            )),
            _ => None,
        };

        if let Some(pt) = status {
            let response = format!("\x1bP1$r{}\x1b\\", pt);
            self.pending_responses.push(response.into_bytes());
        } else {
            self.pending_responses.push(b"\x1bP0$r\x1b\\".to_vec());
        }
    }

    fn handle_tmux_passthrough(&mut self, data: &[u8]) {
        // tmux wraps passthrough sequences as: DCS tmux; <escaped-payload> ST
        // where ESC bytes in the payload are doubled.
        if !data.starts_with(b"mux;") {
            return;
        }

        let payload = &data[4..];
        let mut decoded = Vec::with_capacity(payload.len());
        let mut i = 0usize;
        while i < payload.len() {
            let b = payload[i];
            if b == 0x1b && i + 1 < payload.len() && payload[i + 1] == 0x1b {
                decoded.push(0x1b);
                i += 2;
            } else {
                decoded.push(b);
                i += 1;
            }
        }

        let mut parser = vte::Parser::new();
        for b in decoded {
            parser.advance(self, b);
        }
    }

    pub fn get_text_range(&self, start_row: usize, end_row: usize) -> String {
        let grid = if self.using_alt {
            self.alt_grid.as_ref().unwrap_or(&self.grid)
        } else {
            &self.grid
        };
        let mut lines = Vec::new();
        let offset = grid.rows.len().saturating_sub(grid.visible_rows as usize);

        for row_idx in start_row..end_row.min(grid.visible_rows as usize) {
            let row = &grid.rows[offset + row_idx];
            let line: String = row
                .cells
                .iter()
                .filter(|c| !c.flags.contains(CellFlags::WIDE_SPACER))
                .map(|c| c.c)
                .collect::<String>()
                .trim_end()
                .to_string();
            lines.push(line);
        }

        while lines.last().map_or(false, |l| l.is_empty()) {
            lines.pop();
        }

        lines.join("\n")
    }

    fn current_grid(&self) -> &Grid {
        if self.using_alt {
            self.alt_grid.as_ref().unwrap_or(&self.grid)
        } else {
            &self.grid
        }
    }

    /// Absolute row index (into `grid.rows`) of screen-relative row 0, at
    /// the current scroll offset.
    fn visible_window_start(&self) -> usize {
        let grid = self.current_grid();
        grid.rows
            .len()
            .saturating_sub(self.rows as usize)
            .saturating_sub(self.scroll_offset as usize)
    }

    /// Scroll the viewport `delta` lines into history (positive) or back
    /// toward the live screen (negative), clamped to available scrollback
    /// and marking the shifted-into rows dirty so they get (re-)shaped on
    /// the next frame (§4.3 `scroll_viewport`).
    pub fn scroll_viewport(&mut self, delta: i32) {
        let max_offset = self
            .current_grid()
            .rows
            .len()
            .saturating_sub(self.rows as usize) as u16;
        let new_offset = (self.scroll_offset as i32 + delta).clamp(0, max_offset as i32) as u16;
        if new_offset != self.scroll_offset {
            self.scroll_offset = new_offset;
            self.active_grid_mut().mark_all_dirty();
        }
    }

    /// Reset the viewport to the live bottom of the screen.
    pub fn scroll_viewport_to_bottom(&mut self) {
        self.scroll_viewport(-(self.scroll_offset as i32));
    }

    /// Jump to the next (`direction > 0`) or previous (`direction < 0`)
    /// shell prompt row, per OSC 133 markers (§4.3 `jump_to_prompt`).
    /// Returns `false` if there's no prompt row in that direction.
    pub fn jump_to_prompt(&mut self, direction: i32) -> bool {
        let window_start = self.visible_window_start();
        let grid = self.current_grid();
        let rows: Vec<usize> = grid
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.prompt == super::grid::PromptMarker::Prompt)
            .map(|(i, _)| i)
            .collect();

        let target = if direction > 0 {
            rows.into_iter().find(|&i| i > window_start)
        } else {
            rows.into_iter().rev().find(|&i| i < window_start)
        };

        let Some(target) = target else {
            return false;
        };
        let max_offset = grid.rows.len().saturating_sub(self.rows as usize);
        let offset = max_offset.saturating_sub(target).min(max_offset) as u16;
        self.scroll_offset = offset;
        self.active_grid_mut().mark_all_dirty();
        true
    }

    /// Select the word under `(row, col)` (screen-relative), using the same
    /// whitespace-boundary rule a shell's double-click word selection uses.
    pub fn select_word(&mut self, row: u16, col: u16) {
        let abs_row = self.visible_window_start() + row as usize;
        let grid = self.current_grid();
        let Some(text_row) = grid.rows.get(abs_row) else {
            return;
        };
        let cols = grid.cols;
        let is_word_char = |c: char| !c.is_whitespace();
        let at = (col as usize).min(text_row.cells.len().saturating_sub(1));
        if !text_row
            .cells
            .get(at)
            .map(|c| is_word_char(c.c))
            .unwrap_or(false)
        {
            self.selection = Some(Selection::new(
                ScreenPoint::new(abs_row, col),
                ScreenPoint::new(abs_row, col),
                false,
            ));
            return;
        }
        let mut start = at;
        while start > 0
            && text_row
                .cells
                .get(start - 1)
                .map(|c| is_word_char(c.c))
                .unwrap_or(false)
        {
            start -= 1;
        }
        let mut end = at;
        while end + 1 < cols as usize
            && text_row
                .cells
                .get(end + 1)
                .map(|c| is_word_char(c.c))
                .unwrap_or(false)
        {
            end += 1;
        }
        self.selection = Some(Selection::new(
            ScreenPoint::new(abs_row, start as u16),
            ScreenPoint::new(abs_row, end as u16),
            false,
        ));
    }

    /// Select the full screen-relative `row` (§4.3 `select_line`).
    pub fn select_line(&mut self, row: u16) {
        let abs_row = self.visible_window_start() + row as usize;
        let last_col = self.cols.saturating_sub(1);
        self.selection = Some(Selection::new(
            ScreenPoint::new(abs_row, 0),
            ScreenPoint::new(abs_row, last_col),
            false,
        ));
    }

    /// Select the command output block that contains screen-relative `row`:
    /// from the prompt row preceding it to the prompt row following it,
    /// exclusive (§4.3 `select_output`, grounded on OSC 133 tracking).
    pub fn select_output(&mut self, row: u16) {
        let window_start = self.visible_window_start();
        let abs_row = window_start + row as usize;
        let grid = self.current_grid();
        let prompts: Vec<usize> = grid
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.prompt == super::grid::PromptMarker::Prompt)
            .map(|(i, _)| i)
            .collect();

        let start = prompts
            .iter()
            .rev()
            .find(|&&i| i <= abs_row)
            .copied()
            .unwrap_or(0);
        let end = prompts
            .iter()
            .find(|&&i| i > abs_row)
            .copied()
            .unwrap_or(grid.rows.len().saturating_sub(1));
        let last_col = self.cols.saturating_sub(1);
        self.selection = Some(Selection::new(
            ScreenPoint::new(start, 0),
            ScreenPoint::new(end, last_col),
            false,
        ));
    }

    /// Select everything currently retained: scrollback plus the visible
    /// screen (§4.3 `select_all`).
    pub fn select_all(&mut self) {
        let grid = self.current_grid();
        let last_row = grid.rows.len().saturating_sub(1);
        let last_col = self.cols.saturating_sub(1);
        self.selection = Some(Selection::new(
            ScreenPoint::new(0, 0),
            ScreenPoint::new(last_row, last_col),
            false,
        ));
    }

    /// Clear the active selection.
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Extract the active selection's text, or an empty string if nothing
    /// is selected (§4.3 `selection_string`).
    pub fn selection_string(&self) -> String {
        match &self.selection {
            Some(sel) => sel.extract_text(self.current_grid()),
            None => String::new(),
        }
    }

    /// Dump the plain text of screen-relative rows `[start_row, end_row)`,
    /// trimming trailing blank lines (§4.3 `dump_string`). Grounded on
    /// `get_text_range`, generalized to also read scrollback via the
    /// current viewport offset.
    pub fn dump_string(&self, start_row: usize, end_row: usize) -> String {
        self.get_text_range(start_row, end_row)
    }
}

fn extract_params(params: &vte::Params) -> Vec<u16> {
    params
        .iter()
        .flat_map(|subparams| subparams.iter().copied())
        .collect()
}

fn param(params: &[u16], idx: usize, default: u16) -> u16 {
    params
        .get(idx)
        .copied()
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

fn is_mac_octet(s: &str) -> bool {
    (1..=2).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether `s` is a 5-group colon-separated MAC-address prefix, i.e. a
/// full MAC address missing only its trailing octet.
fn is_partial_mac(s: &str) -> bool {
    let segments: Vec<&str> = s.split(':').collect();
    segments.len() == 5 && segments.iter().all(|seg| is_mac_octet(seg))
}

/// Some hosts without a configured DNS name report their OSC 7 hostname as
/// a colon-separated MAC address. A naive `host:port` split mistakes the
/// final octet for a URI port and would otherwise strip it, breaking the
/// comparison against the real MAC-shaped local hostname. Detect that shape
/// and reconstruct the full MAC address; a genuine decimal port is still
/// stripped (§4.2 "cwd reporting").
fn normalize_osc7_host(host: &str) -> String {
    if let Some((prefix, trailing)) = host.rsplit_once(':') {
        if is_partial_mac(prefix) && is_mac_octet(trailing) {
            return format!("{prefix}:{trailing}");
        }
        if !trailing.is_empty() && trailing.chars().all(|c| c.is_ascii_digit()) {
            return prefix.to_string();
        }
    }
    host.to_string()
}

/// Decode `%xx` escapes in a URI path component. Invalid or truncated
/// escapes are passed through literally rather than rejected.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse an OSC color spec: `rgb:rrrr/gggg/bbbb`, `rgb:rr/gg/bb`, or
/// `#rrggbb`. Components wider than 8 bits are truncated to their high byte.
fn parse_color_spec(spec: &str) -> Option<(u8, u8, u8)> {
    fn component(s: &str) -> Option<u8> {
        let value = u32::from_str_radix(s, 16).ok()?;
        match s.len() {
            1 => Some(((value * 0x11) & 0xff) as u8),
            2 => Some(value as u8),
            3 => Some((value >> 4) as u8),
            4 => Some((value >> 8) as u8),
            _ => None,
        }
    }

    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let r = component(&hex[0..2])?;
        let g = component(&hex[2..4])?;
        let b = component(&hex[4..6])?;
        return Some((r, g, b));
    }

    let rest = spec.strip_prefix("rgb:")?;
    let mut parts = rest.split('/');
    let r = component(parts.next()?)?;
    let g = component(parts.next()?)?;
    let b = component(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

fn decode_hex_ascii(input: &str) -> Option<String> {
    if input.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(input.len() / 2);
    let bytes = input.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        let pair = std::str::from_utf8(&bytes[i..i + 2]).ok()?;
        let val = u8::from_str_radix(pair, 16).ok()?;
        out.push(val);
        i += 2;
    }
    String::from_utf8(out).ok()
}

fn encode_hex_ascii(input: &str) -> String {
    input
        .as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

fn tcap_capability_value(name: &str) -> Option<&'static str> {
    // Capability set needed by tmux and modern TUIs.
    match name {
        "TN" | "name" => Some("xterm-256color"),
        "Co" | "colors" => Some("256"),
        "RGB" | "Tc" => Some("8"),
        // OSC 52 clipboard capability (terminfo "Ms")
        "Ms" => Some("\x1b]52;%p1%s;%p2%s\x07"),
        // Cursor style: DECSCUSR set and reset (tmux uses these for passthrough)
        "Ss" => Some("\x1b[%p1%d q"),
        "Se" => Some("\x1b[2 q"),
        _ => None,
    }
}

/// Map ASCII to DEC Special Graphics (line-drawing) character.
fn dec_line_drawing_char(c: char) -> char {
    match c {
        '`' => '◆', // diamond
        'a' => '▒', // checkerboard
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺', // scan 1
        'p' => '⎻', // scan 3
        'q' => '─',
        'r' => '⎼', // scan 7
        's' => '⎽', // scan 9
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => c,
    }
}

impl vte::Perform for TerminalState {
    fn print(&mut self, c: char) {
        // Resolve the active charset slot: a pending single-shift overrides
        // the invoked (SI/SO) slot for this one character only (§4.2).
        let slot = self.single_shift.take().unwrap_or(self.active_charset);
        let c = match self.charsets.get(slot).copied().unwrap_or_default() {
            CharsetSlot::DecSpecialGraphics => dec_line_drawing_char(c),
            CharsetSlot::Ascii => c,
        };
        self.last_printed_char = c;
        let width = UnicodeWidthChar::width(c).unwrap_or(1) as u16;

        if self.cursor.col >= self.cols {
            if self.modes.autowrap {
                // Flag the row we're wrapping from so selection/reflow can
                // tell a soft wrap from a hard newline (§3, §4.3).
                let row = self.cursor.row;
                let last_col = self.cols.saturating_sub(1);
                self.active_grid_mut()
                    .visible_row_mut(row)
                    .cells[last_col as usize]
                    .flags |= CellFlags::WRAP;
                self.carriage_return();
                self.linefeed();
            } else {
                self.cursor.col = self.cols.saturating_sub(1);
            }
        }

        if self.modes.insert {
            let row = self.cursor.row;
            let col = self.cursor.col;
            self.active_grid_mut().insert_cells(row, col, width);
        }

        let row = self.cursor.row;
        let col = self.cursor.col;
        let fg = self.cursor.fg;
        let bg = self.cursor.bg;
        let attrs = self.cursor.attrs;
        let cols = self.cols;

        let mut flags = if width == 2 {
            CellFlags::WIDE_CHAR
        } else {
            CellFlags::empty()
        };
        if self.protected_pen {
            flags |= CellFlags::PROTECTED;
        }

        let cell = Cell {
            c,
            fg,
            bg,
            attrs,
            flags,
        };

        let grid = self.active_grid_mut();
        grid.set_cell(row, col, cell);

        if width == 2 && col + 1 < cols {
            grid.set_cell(row, col + 1, Cell::wide_spacer());
        }

        self.cursor.col += width;
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => {
                // BEL: set flag so the next render frame includes a Bell event
                self.bell_pending = true;
            }
            0x08 => self.backspace(),
            0x09 => self.tab(),
            0x0A | 0x0B | 0x0C => {
                self.linefeed();
                if self.modes.linefeed_newline {
                    self.carriage_return();
                }
            }
            0x0D => self.carriage_return(),
            0x0E => self.active_charset = 1, // SO: invoke G1
            0x0F => self.active_charset = 0, // SI: invoke G0
            _ => {}
        }
    }

    fn csi_dispatch(
        &mut self,
        params: &vte::Params,
        intermediates: &[u8],
        _ignore: bool,
        action: char,
    ) {
        let raw = extract_params(params);
        let is_private = intermediates.contains(&b'?');
        let has_gt = intermediates.contains(&b'>');
        let has_lt = intermediates.contains(&b'<');
        let has_eq = intermediates.contains(&b'=');
        let has_dollar = intermediates.contains(&b'$');

        // DECRPM / ANSI RQM mode reports
        if action == 'p' && has_dollar {
            if is_private {
                self.report_dec_modes(&raw);
            } else {
                self.report_ansi_modes(&raw);
            }
            return;
        }

        // Kitty keyboard protocol (§4.2): `CSI > flags u` pushes a new flag
        // set, `CSI < Pu u` pops, `CSI = flags ; mode u` modifies the current
        // entry, `CSI ? u` queries it. Checked ahead of the general match
        // below since none of these carry the `?`-only `is_private` shape
        // that the plain `CSI u` (DECRC alias) arm expects.
        if action == 'u' && has_gt {
            let flags = KittyKeyFlags::from_bits_truncate(param(&raw, 0, 0) as u8);
            self.keyboard_stack.push(flags);
            return;
        }
        if action == 'u' && has_lt {
            self.keyboard_stack.pop(param(&raw, 0, 1));
            return;
        }
        if action == 'u' && has_eq {
            let flags = KittyKeyFlags::from_bits_truncate(param(&raw, 0, 0) as u8);
            let mode = FlagSetMode::from_param(param(&raw, 1, 1));
            self.keyboard_stack.set(flags, mode);
            return;
        }
        if action == 'u' && is_private {
            let response = format!("\x1b[?{}u", self.keyboard_stack.current().bits());
            self.pending_responses.push(response.into_bytes());
            return;
        }

        // DECSLRM (§4.3 "Left-right margin"): `CSI Pl ; Pr s`, only active
        // while DECLRMM (mode 69) is enabled — otherwise plain `CSI s` means
        // save-cursor (ANSI.SYS convention), handled in the general match.
        if action == 's' && !is_private && self.modes.left_right_margin_mode {
            let left = param(&raw, 0, 1).saturating_sub(1);
            let right = param(&raw, 1, self.cols).saturating_sub(1);
            self.scroll_left = left.min(self.cols.saturating_sub(1));
            self.scroll_right = right.min(self.cols.saturating_sub(1));
            self.cursor.row = if self.modes.origin { self.scroll_top } else { 0 };
            self.cursor.col = if self.modes.origin { self.scroll_left } else { 0 };
            return;
        }

        // `CSI ? Pm s` / `CSI ? Pm r`: save/restore individual DEC private
        // mode numbers (§4.3), distinct from the combined DECSC/DECRC and
        // from the mode-1048 cursor save bundled into `?1049`.
        if (action == 's' || action == 'r') && is_private {
            if action == 's' {
                for &mode in &raw {
                    if let Some(value) = self.dec_mode_state(mode) {
                        self.mode_save_slots.save(mode, value);
                    }
                }
            } else {
                for &mode in &raw {
                    if let Some(value) = self.mode_save_slots.restore(mode) {
                        self.set_dec_mode(&[mode], value);
                    }
                }
            }
            return;
        }

        // Tab clear: `CSI g` (mode 0: clear stop at cursor, mode 3: clear all).
        if action == 'g' && !is_private {
            match param(&raw, 0, 0) {
                0 => {
                    let col = self.cursor.col as usize;
                    if col < self.tab_stops.len() {
                        self.tab_stops[col] = false;
                    }
                }
                3 => {
                    for stop in self.tab_stops.iter_mut() {
                        *stop = false;
                    }
                }
                _ => {}
            }
            return;
        }

        // Secondary Device Attributes (DA2): CSI > c
        if action == 'c' && has_gt {
            if param(&raw, 0, 0) == 0 {
                // Report as xterm-like VT100-class terminal with firmware marker.
                self.pending_responses.push(b"\x1b[>1;10;0c".to_vec());
            }
            return;
        }

        match (action, is_private) {
            ('A', false) => self.cursor_up(param(&raw, 0, 1)),
            ('B', false) => self.cursor_down(param(&raw, 0, 1)),
            ('C', false) => self.cursor_forward(param(&raw, 0, 1)),
            ('D', false) => self.cursor_backward(param(&raw, 0, 1)),
            ('E', false) => {
                self.cursor.col = 0;
                self.cursor_down(param(&raw, 0, 1));
            }
            ('F', false) => {
                self.cursor.col = 0;
                self.cursor_up(param(&raw, 0, 1));
            }
            ('G', false) => {
                self.cursor.col = (param(&raw, 0, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('H' | 'f', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
                self.cursor.col = (param(&raw, 1, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('J', false) => self.erase_display(param(&raw, 0, 0), false),
            ('K', false) => self.erase_line(param(&raw, 0, 0), false),
            // DECSED/DECSEL: selective erase, respects DECSCA-protected cells.
            ('J', true) => self.erase_display(param(&raw, 0, 0), true),
            ('K', true) => self.erase_line(param(&raw, 0, 0), true),
            ('L', false) => self.insert_lines(param(&raw, 0, 1)),
            ('M', false) => self.delete_lines(param(&raw, 0, 1)),
            ('P', false) => self.delete_chars(param(&raw, 0, 1)),
            ('S', false) => self.scroll_up_n(param(&raw, 0, 1)),
            ('T', false) => self.scroll_down_n(param(&raw, 0, 1)),
            ('X', false) => self.erase_chars(param(&raw, 0, 1)),
            ('@', false) => self.insert_chars(param(&raw, 0, 1)),
            ('d', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
            }
            ('m', false) => self.handle_sgr(&raw),
            ('r', false) => {
                let top = param(&raw, 0, 1).saturating_sub(1);
                let bottom = param(&raw, 1, self.rows).saturating_sub(1);
                self.scroll_top = top;
                self.scroll_bottom = bottom.min(self.rows.saturating_sub(1));
                self.cursor.row = if self.modes.origin {
                    self.scroll_top
                } else {
                    0
                };
                self.cursor.col = 0;
            }
            ('h', true) => self.set_dec_mode(&raw, true),
            ('l', true) => self.set_dec_mode(&raw, false),
            ('h', false) => self.set_mode(&raw, true),
            ('l', false) => self.set_mode(&raw, false),
            ('n', false) => {
                // Device Status Report
                match param(&raw, 0, 0) {
                    5 => {
                        // Report terminal status: "OK"
                        self.pending_responses.push(b"\x1b[0n".to_vec());
                    }
                    6 => {
                        // CPR: report cursor position as ESC [ row ; col R (1-based)
                        let response =
                            format!("\x1b[{};{}R", self.cursor.row + 1, self.cursor.col + 1);
                        self.pending_responses.push(response.into_bytes());
                    }
                    _ => {}
                }
            }
            ('c', false) => {
                // Primary Device Attributes - respond as VT220
                if param(&raw, 0, 0) == 0 {
                    self.pending_responses.push(b"\x1b[?62;22c".to_vec());
                }
            }
            ('s', false) => self.save_cursor(),
            ('u', false) => self.restore_cursor(),
            ('q', false) if intermediates.contains(&b' ') => match param(&raw, 0, 1) {
                0 | 1 | 2 => self.cursor.shape = CursorShape::Block,
                3 | 4 => self.cursor.shape = CursorShape::Underline,
                5 | 6 => self.cursor.shape = CursorShape::Bar,
                _ => {}
            },
            // DECSCA: CSI Ps " q. Ps=1 marks subsequently-printed cells
            // protected from DECSED/DECSEL; Ps=0|2 clears it.
            ('q', false) if intermediates.contains(&b'"') => match param(&raw, 0, 0) {
                1 => self.protected_pen = true,
                0 | 2 => self.protected_pen = false,
                _ => {}
            },
            ('b', false) => {
                let count = param(&raw, 0, 1) as usize;
                let c = self.last_printed_char;
                let width = UnicodeWidthChar::width(c).unwrap_or(1) as u16;
                for _ in 0..count.min(2048) {
                    if self.cursor.col >= self.cols {
                        if self.modes.autowrap {
                            self.carriage_return();
                            self.linefeed();
                        } else {
                            self.cursor.col = self.cols.saturating_sub(1);
                        }
                    }
                    if self.modes.insert {
                        let row = self.cursor.row;
                        let col = self.cursor.col;
                        self.active_grid_mut().insert_cells(row, col, width);
                    }
                    let row = self.cursor.row;
                    let col = self.cursor.col;
                    let fg = self.cursor.fg;
                    let bg = self.cursor.bg;
                    let attrs = self.cursor.attrs;
                    let cols = self.cols;
                    let cell = Cell {
                        c,
                        fg,
                        bg,
                        attrs,
                        flags: if width == 2 {
                            CellFlags::WIDE_CHAR
                        } else {
                            CellFlags::empty()
                        },
                    };
                    let grid = self.active_grid_mut();
                    grid.set_cell(row, col, cell);
                    if width == 2 && col + 1 < cols {
                        grid.set_cell(row, col + 1, Cell::wide_spacer());
                    }
                    self.cursor.col += width;
                }
            }
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        self.handle_osc(params);
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        match (byte, intermediates) {
            (b'c', []) => {
                // RIS (full reset, §4.3 `full_reset`). Rebuilds grid/cursor/
                // modes/palette from scratch but keeps the handles the
                // session wired in after construction (config, UI mailbox,
                // id generator) — those belong to the surrounding session,
                // not to the reset escape sequence, and dropping them would
                // silently sever clipboard/notification routing (§8
                // idempotence: `full_reset` must be safe to call repeatedly,
                // not merely safe to call once).
                let rows = self.rows;
                let cols = self.cols;
                let was_using_alt = self.using_alt;
                let frame_seq = self.frame_seq;
                let config = self.config.clone();
                let ui_mailbox = self.ui_mailbox.clone();
                let id_gen = self.id_gen.clone();
                *self = TerminalState::new(rows, cols);
                self.frame_seq = frame_seq;
                self.config = config;
                self.ui_mailbox = ui_mailbox;
                self.id_gen = id_gen;
                self.grid.mark_all_dirty();
                if was_using_alt {
                    self.pending_terminal_events
                        .push(TerminalEvent::AltScreenExited);
                }
            }
            (b'D', []) => self.linefeed(),
            (b'E', []) => {
                self.carriage_return();
                self.linefeed();
            }
            (b'H', []) => {
                let col = self.cursor.col as usize;
                if col < self.tab_stops.len() {
                    self.tab_stops[col] = true;
                }
            }
            (b'M', []) => self.reverse_index(),
            (b'7', []) => self.save_cursor(),
            (b'8', []) => self.restore_cursor(),
            (b'=', []) => {
                self.modes.cursor_keys_application = true;
                self.emit_mode_changed();
            }
            (b'>', []) => {
                self.modes.cursor_keys_application = false;
                self.emit_mode_changed();
            }
            // SCS (§4.2): designate a charset into G0-G3. `(`/`)`/`*`/`+`
            // select the slot; the designator byte selects the charset.
            (b'0', [b'(']) => self.charsets[0] = CharsetSlot::DecSpecialGraphics,
            (b'B', [b'(']) => self.charsets[0] = CharsetSlot::Ascii,
            (b'0', [b')']) => self.charsets[1] = CharsetSlot::DecSpecialGraphics,
            (b'B', [b')']) => self.charsets[1] = CharsetSlot::Ascii,
            (b'0', [b'*']) => self.charsets[2] = CharsetSlot::DecSpecialGraphics,
            (b'B', [b'*']) => self.charsets[2] = CharsetSlot::Ascii,
            (b'0', [b'+']) => self.charsets[3] = CharsetSlot::DecSpecialGraphics,
            (b'B', [b'+']) => self.charsets[3] = CharsetSlot::Ascii,
            // SS2/SS3: single-shift G2/G3 for the next character only.
            (b'N', []) => self.single_shift = Some(2),
            (b'O', []) => self.single_shift = Some(3),
            // DECALN: fill the screen with 'E' for alignment testing, home
            // the cursor, and clear the scrolling region (§4.3 `decaln`).
            (b'8', [b'#']) => {
                let rows = self.rows;
                let cols = self.cols;
                let grid = self.active_grid_mut();
                for r in 0..rows {
                    let row = grid.visible_row_mut(r);
                    for c in 0..cols as usize {
                        if let Some(cell) = row.cells.get_mut(c) {
                            *cell = Cell {
                                c: 'E',
                                ..Cell::default()
                            };
                        }
                    }
                    row.dirty = true;
                }
                self.cursor.row = 0;
                self.cursor.col = 0;
                self.scroll_top = 0;
                self.scroll_bottom = rows.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &vte::Params, intermediates: &[u8], _ignore: bool, action: char) {
        self.dcs_buffer.clear();
        self.dcs_intermediates.clear();
        self.dcs_intermediates.extend_from_slice(intermediates);
        self.dcs_action = Some(action);

        // Sixel detection: DCS with action 'q' and no intermediates starts a
        // Sixel image stream. (DCS+q is XTGETTCAP, DCS$q is DECRQSS — both
        // have intermediates so they won't match here.)
        if action == 'q' && intermediates.is_empty() && self.experimental_image_protocols_enabled {
            self.sixel_active = true;
            self.sixel_buffer.clear();
        } else if action == 'q' && intermediates.is_empty() && !self.image_protocol_drop_notified {
            tracing::info!("Sixel payload received but experimental rendering is disabled");
            self.image_protocol_drop_notified = true;
        }
    }

    fn put(&mut self, byte: u8) {
        // Sixel data goes into the dedicated sixel buffer
        if self.sixel_active {
            if self.sixel_buffer.len() < 16 * 1024 * 1024 {
                self.sixel_buffer.push(byte);
            }
            return;
        }
        // Cap DCS buffer at 16 MB to prevent unbounded growth from malformed streams
        if self.dcs_buffer.len() < 16 * 1024 * 1024 {
            self.dcs_buffer.push(byte);
        }
    }

    fn unhook(&mut self) {
        // Sixel: finalize the accumulated image data
        if self.sixel_active {
            self.sixel_active = false;
            let data = std::mem::take(&mut self.sixel_buffer);
            if !data.is_empty() {
                self.image_counter += 1;
                let id = format!("sixel-{}", self.image_counter);
                let encoded = BASE64_STANDARD.encode(&data);
                self.pending_terminal_events
                    .push(TerminalEvent::SixelImage {
                        id,
                        data_base64: encoded,
                        width: 0,
                        height: 0,
                        row: self.cursor.row,
                        col: self.cursor.col,
                    });
            }
            self.dcs_buffer.clear();
            self.dcs_intermediates.clear();
            self.dcs_action.take();
            return;
        }

        let data = std::mem::take(&mut self.dcs_buffer);
        let intermediates = std::mem::take(&mut self.dcs_intermediates);
        let action = self.dcs_action.take();
        self.handle_dcs(action, &intermediates, &data);
        self.dcs_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_bytes(state: &mut TerminalState, bytes: &[u8]) {
        let mut parser = vte::Parser::new();
        for &b in bytes {
            parser.advance(state, b);
        }
    }

    #[test]
    fn private_mode_1049_toggles_alt_screen() {
        let mut state = TerminalState::new(24, 80);
        assert!(!state.using_alt);

        feed_bytes(&mut state, b"\x1b[?1049h");
        assert!(state.using_alt, "expected ?1049h to enter alt screen");

        let enter_events = state
            .pending_terminal_events
            .iter()
            .filter(|e| matches!(e, TerminalEvent::AltScreenEntered))
            .count();
        assert_eq!(enter_events, 1, "expected one AltScreenEntered event");

        feed_bytes(&mut state, b"\x1b[?1049l");
        assert!(!state.using_alt, "expected ?1049l to exit alt screen");

        let exit_events = state
            .pending_terminal_events
            .iter()
            .filter(|e| matches!(e, TerminalEvent::AltScreenExited))
            .count();
        assert_eq!(exit_events, 1, "expected one AltScreenExited event");
    }

    #[test]
    fn cup_positions_to_correct_rows() {
        // Simulate a TUI drawing content at specific rows via CSI H
        let mut state = TerminalState::new(10, 40);
        // Enter alt screen + clear
        feed_bytes(&mut state, b"\x1b[?1049h\x1b[2J");

        // Position to row 3, col 1 and write "Hello"
        feed_bytes(&mut state, b"\x1b[3;1HHello");
        assert_eq!(
            state.cursor.row, 2,
            "row should be 2 (0-based) after CSI 3;1 H"
        );

        // Position to row 5, col 1 and write "World"
        feed_bytes(&mut state, b"\x1b[5;1HWorld");
        assert_eq!(
            state.cursor.row, 4,
            "row should be 4 (0-based) after CSI 5;1 H"
        );

        // Verify grid content: row 2 should have "Hello", row 4 should have "World"
        let grid = state.alt_grid.as_ref().unwrap();
        let row2_text: String = grid
            .visible_row(2)
            .cells
            .iter()
            .take(5)
            .map(|c| c.c)
            .collect();
        let row4_text: String = grid
            .visible_row(4)
            .cells
            .iter()
            .take(5)
            .map(|c| c.c)
            .collect();
        assert_eq!(row2_text, "Hello", "row 2 should contain Hello");
        assert_eq!(row4_text, "World", "row 4 should contain World");

        // Row 3 should be blank (spaces)
        let row3_text: String = grid
            .visible_row(3)
            .cells
            .iter()
            .take(5)
            .map(|c| c.c)
            .collect();
        assert_eq!(row3_text, "     ", "row 3 should be blank");
    }

    #[test]
    fn origin_mode_offsets_cup_by_scroll_region() {
        let mut state = TerminalState::new(24, 80);
        // Set scroll region to rows 5-20 (1-based: 6-21)
        feed_bytes(&mut state, b"\x1b[6;21r");
        assert_eq!(state.scroll_top, 5);
        assert_eq!(state.scroll_bottom, 20);

        // Enable origin mode
        feed_bytes(&mut state, b"\x1b[?6h");
        assert!(state.modes.origin);
        // Origin mode toggle homes cursor to scroll_top
        assert_eq!(state.cursor.row, 5);

        // CSI 1;1 H should go to scroll_top (row 5, 0-based)
        feed_bytes(&mut state, b"\x1b[1;1H");
        assert_eq!(state.cursor.row, 5, "origin mode: row 1 → scroll_top (5)");

        // CSI 3;1 H should go to scroll_top + 2 = row 7
        feed_bytes(&mut state, b"\x1b[3;1H");
        assert_eq!(
            state.cursor.row, 7,
            "origin mode: row 3 → scroll_top + 2 (7)"
        );

        // Disable origin mode
        feed_bytes(&mut state, b"\x1b[?6l");
        assert!(!state.modes.origin);
        assert_eq!(
            state.cursor.row, 0,
            "disabling origin mode homes cursor to 0"
        );

        // CSI 3;1 H should go to absolute row 2 (0-based)
        feed_bytes(&mut state, b"\x1b[3;1H");
        assert_eq!(state.cursor.row, 2, "no origin mode: row 3 → absolute 2");
    }

    #[test]
    fn cuu_cud_respect_scroll_region() {
        let mut state = TerminalState::new(24, 80);
        // Set scroll region to rows 5-15 (1-based: 6-16)
        feed_bytes(&mut state, b"\x1b[6;16r");

        // Place cursor at row 10 (inside region)
        feed_bytes(&mut state, b"\x1b[11;1H");
        assert_eq!(state.cursor.row, 10);

        // CUU 20: should stop at scroll_top (5), not 0
        feed_bytes(&mut state, b"\x1b[20A");
        assert_eq!(state.cursor.row, 5, "CUU inside region stops at scroll_top");

        // Place cursor at row 10 again
        feed_bytes(&mut state, b"\x1b[11;1H");

        // CUD 20: should stop at scroll_bottom (15), not 23
        feed_bytes(&mut state, b"\x1b[20B");
        assert_eq!(
            state.cursor.row, 15,
            "CUD inside region stops at scroll_bottom"
        );

        // Place cursor outside region (row 2)
        feed_bytes(&mut state, b"\x1b[3;1H");
        assert_eq!(state.cursor.row, 2);

        // CUU 10: should stop at 0 (outside region)
        feed_bytes(&mut state, b"\x1b[10A");
        assert_eq!(state.cursor.row, 0, "CUU outside region stops at 0");

        // Place cursor below region (row 20)
        feed_bytes(&mut state, b"\x1b[21;1H");
        assert_eq!(state.cursor.row, 20);

        // CUD 10: should stop at rows-1=23 (outside region)
        feed_bytes(&mut state, b"\x1b[10B");
        assert_eq!(state.cursor.row, 23, "CUD outside region stops at rows-1");
    }

    #[test]
    fn dec_line_drawing_charset() {
        let mut state = TerminalState::new(4, 20);
        // Enter DEC line drawing mode
        feed_bytes(&mut state, b"\x1b(0");
        assert_eq!(state.charsets[0], CharsetSlot::DecSpecialGraphics);

        // Write 'q' which should become '─'
        feed_bytes(&mut state, b"q");
        let cell = &state.grid.visible_row(0).cells[0];
        assert_eq!(cell.c, '─', "DEC line drawing: 'q' should map to '─'");

        // Write 'x' which should become '│'
        feed_bytes(&mut state, b"x");
        let cell = &state.grid.visible_row(0).cells[1];
        assert_eq!(cell.c, '│', "DEC line drawing: 'x' should map to '│'");

        // Exit DEC line drawing mode
        feed_bytes(&mut state, b"\x1b(B");
        assert_eq!(state.charsets[0], CharsetSlot::Ascii);

        // Now 'q' should be literal 'q'
        feed_bytes(&mut state, b"q");
        let cell = &state.grid.visible_row(0).cells[2];
        assert_eq!(cell.c, 'q', "ASCII mode: 'q' should be literal 'q'");
    }

    struct NoGlyphs;
    impl crate::render::GlyphShaper for NoGlyphs {
        fn shape(&mut self, _c: char) -> Option<crate::render::ShapedGlyph> {
            None
        }
    }

    #[test]
    fn dirty_rows_clear_after_gpu_frame_is_built() {
        let mut state = TerminalState::new(10, 20);
        // Enter alt screen, clear, and draw at specific rows
        feed_bytes(&mut state, b"\x1b[?1049h\x1b[2J");

        // Collect the initial "all dirty" set and discard
        let _ = state.take_gpu_frame(&mut NoGlyphs);

        // Write to specific rows
        feed_bytes(&mut state, b"\x1b[3;1HAAA\x1b[7;1HBBB");

        let frame = state
            .take_gpu_frame(&mut NoGlyphs)
            .expect("should have dirty records");
        assert!(!frame.records.is_empty());

        // Nothing left dirty, so a third call should yield nothing.
        assert!(state.take_gpu_frame(&mut NoGlyphs).is_none());
    }

    #[test]
    fn secondary_device_attributes_reports_da2() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[>c");
        let responses = state.take_pending_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0], b"\x1b[>1;10;0c".to_vec());
    }

    #[test]
    fn decrpm_reports_mode_state() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?1004h");
        feed_bytes(&mut state, b"\x1b[?1004$p");
        let responses = state.take_pending_responses();
        assert_eq!(
            responses.last(),
            Some(&b"\x1b[?1004;1$y".to_vec()),
            "mode 1004 should report as set"
        );

        feed_bytes(&mut state, b"\x1b[?9999$p");
        let responses = state.take_pending_responses();
        assert_eq!(
            responses.last(),
            Some(&b"\x1b[?9999;0$y".to_vec()),
            "unknown mode should report as unrecognized"
        );
    }

    #[test]
    fn xtgettcap_reports_known_capabilities() {
        let mut state = TerminalState::new(24, 80);
        // Request TN and Co capabilities.
        feed_bytes(&mut state, b"\x1bP+q544e;436f\x1b\\");
        let responses = state.take_pending_responses();
        assert_eq!(responses.len(), 1);
        let response = String::from_utf8_lossy(&responses[0]);
        assert!(
            response.starts_with("\x1bP1+r"),
            "XTGETTCAP should return success response"
        );
        assert!(
            response.contains("544e=787465726d2d323536636f6c6f72"),
            "TN capability should be encoded in the response"
        );
        assert!(
            response.contains("436f=323536"),
            "Co capability should be encoded in the response"
        );
    }

    #[test]
    fn tmux_passthrough_replays_inner_sequences() {
        let mut state = TerminalState::new(24, 80);
        // tmux passthrough wrapper with inner CSI > c query.
        feed_bytes(&mut state, b"\x1bPtmux;\x1b\x1b[>c\x1b\\");
        let responses = state.take_pending_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0], b"\x1b[>1;10;0c".to_vec());
    }

    #[test]
    fn test_grid_resize() {
        let mut state = TerminalState::new(10, 40);
        feed_bytes(&mut state, b"Hello");
        assert_eq!(state.cursor.col, 5);

        state.resize(10, 20);
        let text: String = state
            .grid
            .visible_row(0)
            .cells
            .iter()
            .take(5)
            .map(|c| c.c)
            .collect();
        assert_eq!(text, "Hello", "text should survive column resize");
        assert_eq!(state.cols, 20);
    }

    #[test]
    fn test_scrollback_capture() {
        let mut state = TerminalState::new(5, 20);
        for i in 0..8u8 {
            let line = format!("line{}\r\n", i);
            feed_bytes(&mut state, line.as_bytes());
        }
        assert!(
            state.scrollback_seq >= 3,
            "should have accumulated scrollback after overflowing visible rows"
        );
    }

    #[test]
    fn test_sgr_256_color() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[38;5;196m");
        assert_eq!(state.cursor.fg, Color::Indexed(196));
    }

    #[test]
    fn test_sgr_rgb_color() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[38;2;128;64;32m");
        assert_eq!(state.cursor.fg, Color::Rgb(128, 64, 32));
    }

    #[test]
    fn test_cursor_save_restore() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[5;10H");
        assert_eq!(state.cursor.row, 4);
        assert_eq!(state.cursor.col, 9);

        feed_bytes(&mut state, b"\x1b7");
        feed_bytes(&mut state, b"\x1b[1;1H");
        assert_eq!(state.cursor.row, 0);
        assert_eq!(state.cursor.col, 0);

        feed_bytes(&mut state, b"\x1b8");
        assert_eq!(state.cursor.row, 4, "cursor row should be restored");
        assert_eq!(state.cursor.col, 9, "cursor col should be restored");
    }

    #[test]
    fn test_alt_screen() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"MainText");
        let main_text: String = state
            .grid
            .visible_row(0)
            .cells
            .iter()
            .take(8)
            .map(|c| c.c)
            .collect();
        assert_eq!(main_text, "MainText");

        feed_bytes(&mut state, b"\x1b[?1049h");
        assert!(state.using_alt);
        feed_bytes(&mut state, b"AltStuff");

        feed_bytes(&mut state, b"\x1b[?1049l");
        assert!(!state.using_alt);
        let restored: String = state
            .grid
            .visible_row(0)
            .cells
            .iter()
            .take(8)
            .map(|c| c.c)
            .collect();
        assert_eq!(
            restored, "MainText",
            "main screen content should be preserved after alt screen round-trip"
        );
    }

    #[test]
    fn test_scroll_region() {
        let mut state = TerminalState::new(10, 20);
        for i in 0..10u8 {
            feed_bytes(
                &mut state,
                format!("\x1b[{};1H{}", i + 1, (b'A' + i) as char).as_bytes(),
            );
        }

        feed_bytes(&mut state, b"\x1b[3;6r");
        assert_eq!(state.scroll_top, 2);
        assert_eq!(state.scroll_bottom, 5);

        feed_bytes(&mut state, b"\x1b[6;1H");
        assert_eq!(state.cursor.row, 5);

        feed_bytes(&mut state, b"\n");

        let r0 = state.grid.visible_row(0).cells[0].c;
        assert_eq!(r0, 'A', "row above scroll region should be unchanged");

        let r6 = state.grid.visible_row(6).cells[0].c;
        assert_eq!(r6, 'G', "row below scroll region should be unchanged");

        let r2 = state.grid.visible_row(2).cells[0].c;
        assert_eq!(r2, 'D', "first row of region should have scrolled up");
    }

    #[test]
    fn test_csi_rep() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"A");
        feed_bytes(&mut state, b"\x1b[3b");
        let text: String = state
            .grid
            .visible_row(0)
            .cells
            .iter()
            .take(4)
            .map(|c| c.c)
            .collect();
        assert_eq!(text, "AAAA", "1 original + 3 repeated 'A's");
    }

    #[test]
    fn kitty_keyboard_protocol_push_pop_query() {
        let mut state = TerminalState::new(24, 80);
        assert_eq!(state.keyboard_stack.current().bits(), 0);

        feed_bytes(&mut state, b"\x1b[>5u");
        assert_eq!(state.keyboard_stack.current().bits(), 5);

        feed_bytes(&mut state, b"\x1b[>1u");
        assert_eq!(state.keyboard_stack.current().bits(), 1);

        feed_bytes(&mut state, b"\x1b[?u");
        let responses = state.take_pending_responses();
        assert_eq!(responses.last().unwrap(), b"\x1b[?1u");

        feed_bytes(&mut state, b"\x1b[<u");
        assert_eq!(state.keyboard_stack.current().bits(), 5);

        feed_bytes(&mut state, b"\x1b[<u");
        assert_eq!(state.keyboard_stack.current().bits(), 0);
    }

    #[test]
    fn kitty_keyboard_protocol_set_bits_mode() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[>1u");
        feed_bytes(&mut state, b"\x1b[=2;2u"); // set bit 2, mode 2 (SetBits)
        assert_eq!(state.keyboard_stack.current().bits(), 3);
        feed_bytes(&mut state, b"\x1b[=1;3u"); // clear bit 1, mode 3 (ClearBits)
        assert_eq!(state.keyboard_stack.current().bits(), 2);
    }

    #[test]
    fn dec_private_mode_save_restore_round_trips() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?25l"); // hide cursor
        assert!(!state.modes.cursor_visible);

        feed_bytes(&mut state, b"\x1b[?25s"); // save mode 25 (hidden)
        feed_bytes(&mut state, b"\x1b[?25h"); // show cursor
        assert!(state.modes.cursor_visible);

        feed_bytes(&mut state, b"\x1b[?25r"); // restore -> hidden again
        assert!(!state.modes.cursor_visible);
    }

    #[test]
    fn tab_clear_removes_stops() {
        let mut state = TerminalState::new(24, 80);
        assert!(state.tab_stops[8]);
        feed_bytes(&mut state, b"\x1b[9;1H"); // cursor to col 8 (0-based)
        feed_bytes(&mut state, b"\x1b[0g");
        assert!(!state.tab_stops[8]);
        assert!(state.tab_stops[16], "other stops untouched by mode 0");

        feed_bytes(&mut state, b"\x1b[3g");
        assert!(state.tab_stops.iter().all(|&stop| !stop), "mode 3 clears all stops");
    }

    #[test]
    fn decaln_fills_screen_with_e() {
        let mut state = TerminalState::new(4, 8);
        feed_bytes(&mut state, b"\x1b[3;3H"); // move cursor away from origin
        feed_bytes(&mut state, b"\x1b#8");
        assert_eq!(state.cursor.row, 0);
        assert_eq!(state.cursor.col, 0);
        for r in 0..4 {
            for c in &state.grid.visible_row(r).cells {
                assert_eq!(c.c, 'E');
            }
        }
    }

    #[test]
    fn deccolm_resizes_only_when_mode_40_enabled() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?3h");
        assert!(
            state.pending_terminal_events.is_empty(),
            "DECCOLM without mode 40 should not request a resize"
        );

        feed_bytes(&mut state, b"\x1b[?40h\x1b[?3h");
        let resized = state
            .pending_terminal_events
            .iter()
            .any(|e| matches!(e, TerminalEvent::ResizeRequested { cols: 132, .. }));
        assert!(resized, "DECCOLM with mode 40 enabled should request a 132-col resize");
    }

    #[test]
    fn decslrm_sets_left_right_margins_when_declrmm_enabled() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?69h");
        feed_bytes(&mut state, b"\x1b[10;40s");
        assert_eq!(state.scroll_left, 9);
        assert_eq!(state.scroll_right, 39);

        feed_bytes(&mut state, b"\x1b[?69l");
        assert_eq!(state.scroll_left, 0);
        assert_eq!(state.scroll_right, 79, "disabling DECLRMM resets to full width");
    }

    #[test]
    fn full_reset_preserves_config_and_mailbox_not_grid() {
        let mut state = TerminalState::new(24, 80);
        let mailbox = crate::mailbox::Mailbox::<crate::mailbox::Message>::bounded(4);
        state.set_ui_mailbox(mailbox.clone());
        let mut config = CoreConfig::default();
        config.terminal.clipboard_read = ClipboardPolicy::Deny;
        state.set_config(Arc::new(config));

        feed_bytes(&mut state, b"Hello");
        feed_bytes(&mut state, b"\x1bc"); // RIS

        assert_eq!(state.cursor.col, 0, "RIS homes the cursor");
        assert_eq!(
            state.config.terminal.clipboard_read,
            ClipboardPolicy::Deny,
            "RIS must not drop the session's live config"
        );

        // Mailbox survives: a clipboard read request routed through the
        // surviving mailbox should still be observable on the receiver.
        feed_bytes(&mut state, b"\x1b]52;c;?\x1b\\");
        assert!(mailbox.try_pop().is_some(), "mailbox must still be wired after RIS");
    }

    #[test]
    fn synchronized_output_enables_and_disables() {
        let mut state = TerminalState::new(24, 80);
        assert!(!state.synchronized_output_active());

        feed_bytes(&mut state, b"\x1b[?2026h");
        assert!(state.modes.synchronized_output);
        assert!(state.synchronized_output_active());

        feed_bytes(&mut state, b"\x1b[?2026l");
        assert!(!state.modes.synchronized_output);
        assert!(!state.synchronized_output_active());
        assert!(state.sync_output_deadline.is_none());
    }

    #[test]
    fn synchronized_output_auto_expires_after_safety_timeout() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?2026h");
        assert!(state.synchronized_output_active());

        // Force the deadline into the past rather than sleeping for the
        // real multi-second safety timeout.
        state.sync_output_deadline = Some(std::time::Instant::now() - std::time::Duration::from_millis(1));

        assert!(
            !state.synchronized_output_active(),
            "expired deadline must force-disable the mode"
        );
        assert!(!state.modes.synchronized_output);
        assert!(state.sync_output_deadline.is_none());
    }

    #[test]
    fn synchronized_output_withholds_render_snapshot_until_cleared() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?2026h");
        feed_bytes(&mut state, b"hello");

        // The render pump is expected to check `synchronized_output_active`
        // before calling `take_gpu_frame`; simulate that gate here.
        assert!(state.synchronized_output_active());

        feed_bytes(&mut state, b"\x1b[?2026l");
        assert!(!state.synchronized_output_active());
        let frame = state.take_gpu_frame(&mut NoGlyphs);
        assert!(frame.is_some(), "dirty lines accumulated while synchronized must still flush once cleared");
    }

    #[test]
    fn osc_22_sets_pointer_shape() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b]22;pointer\x07");
        assert_eq!(state.mouse_shape, "pointer");
    }

    #[test]
    fn osc_22_query_does_not_overwrite_shape() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b]22;hand\x07");
        feed_bytes(&mut state, b"\x1b]22;?\x07");
        assert_eq!(state.mouse_shape, "hand");
    }
}
