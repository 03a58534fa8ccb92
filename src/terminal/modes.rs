/// Maximum duration synchronized output (mode 2026) is allowed to hold back
/// frame emission before the IO side force-disables it and flushes whatever
/// backlog has accumulated. Prevents a misbehaving application that enables
/// the mode and never disables it from freezing the display indefinitely
/// (§4.2/§5). xterm and other implementations use timeouts in the low
/// single-digit seconds; two seconds is chosen here as a value generous
/// enough for a legitimate bulk redraw but short enough to bound a hang.
pub const SYNCHRONIZED_OUTPUT_MAX_DURATION: std::time::Duration = std::time::Duration::from_secs(2);

/// Terminal mode flags tracking various DEC and ANSI modes (§3, §4.2, §4.3).
///
/// Each DEC private mode also has an independent save/restore slot
/// (`CSI ? Pm s` / `CSI ? Pm r` save and restore one mode number at a time,
/// not a single combined snapshot), tracked separately in [`ModeSaveSlots`].
#[derive(Debug, Clone)]
pub struct TerminalModes {
    /// DECCKM: cursor key mode (application vs normal)
    pub cursor_keys_application: bool,
    /// DECKPAM/DECKPNM: keypad application mode
    pub keypad_application: bool,
    /// DECOM: origin mode
    pub origin: bool,
    /// DECAWM: auto-wrap mode
    pub autowrap: bool,
    /// DECTCEM: text cursor visible
    pub cursor_visible: bool,
    /// DECSCNM: reverse video (swap default fg/bg for the whole screen)
    pub reverse_video: bool,
    /// Cursor blinking (mode 12); gated in the stream handler by a
    /// configured default-blink preference (§4.2) before taking effect.
    pub cursor_blinking: bool,
    /// Mouse tracking, press/release (mode 1000)
    pub mouse_tracking: bool,
    /// X10 mouse mode (mode 9): press-only, no modifiers
    pub mouse_x10: bool,
    /// Mouse motion tracking while a button is held (mode 1002)
    pub mouse_motion: bool,
    /// Mouse all-motion tracking (mode 1003)
    pub mouse_all_motion: bool,
    /// SGR mouse reporting format (mode 1006)
    pub sgr_mouse: bool,
    /// UTF-8 mouse reporting format (mode 1005)
    pub utf8_mouse: bool,
    /// urxvt mouse reporting format (mode 1015)
    pub urxvt_mouse: bool,
    /// SGR-pixels mouse reporting format (mode 1016)
    pub sgr_pixels_mouse: bool,
    /// Alternate scroll mode (mode 1007)
    pub alternate_scroll: bool,
    /// Bracketed paste mode (mode 2004)
    pub bracketed_paste: bool,
    /// Synchronized output mode (mode 2026)
    pub synchronized_output: bool,
    /// Focus events (mode 1004)
    pub focus_events: bool,
    /// Alternate screen active
    pub alt_screen: bool,
    /// Insert mode (IRM)
    pub insert: bool,
    /// Line feed / new line mode (LNM)
    pub linefeed_newline: bool,
    /// DECCOLM (mode 3): 132-column mode. Toggling this triggers a resize
    /// in the stream handler (§4.2).
    pub column_132: bool,
    /// xterm's "allow 80/132 column switching" gate (mode 40). DECCOLM only
    /// resizes the screen when this is enabled.
    pub enable_mode_3: bool,
    /// Modify-other-keys level 2 (xterm's `modifyOtherKeys` resource)
    pub modify_other_keys: bool,
    /// DECARM: autorepeat
    pub autorepeat: bool,
    /// Keyboard action mode (DECKBUM — disables keyboard input)
    pub disable_keyboard: bool,
    /// Alt sends ESC prefix for meta-key encoding (mode 1036/xterm
    /// `altSendsEscape`)
    pub alt_esc_prefix: bool,
    /// Reverse colors (xterm mode 1048's sibling; kept distinct from
    /// `reverse_video`/DECSCNM per §4.3's mode list)
    pub reverse_colors: bool,
    /// DECLRMM (mode 69): left/right margin mode enabled. Disabling it
    /// resets margins to `(0, cols - 1)` (§4.2).
    pub left_right_margin_mode: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            cursor_keys_application: false,
            keypad_application: false,
            origin: false,
            autowrap: true,
            cursor_visible: true,
            reverse_video: false,
            cursor_blinking: true,
            mouse_tracking: false,
            mouse_x10: false,
            mouse_motion: false,
            mouse_all_motion: false,
            sgr_mouse: false,
            utf8_mouse: false,
            urxvt_mouse: false,
            sgr_pixels_mouse: false,
            alternate_scroll: false,
            bracketed_paste: false,
            synchronized_output: false,
            focus_events: false,
            alt_screen: false,
            insert: false,
            linefeed_newline: false,
            column_132: false,
            enable_mode_3: false,
            modify_other_keys: false,
            autorepeat: true,
            disable_keyboard: false,
            alt_esc_prefix: false,
            reverse_colors: false,
            left_right_margin_mode: false,
        }
    }
}

/// Independent save/restore slots for DEC private modes (`CSI ? Pm s` /
/// `CSI ? Pm r`), keyed by mode number. A mode not yet saved restores to
/// `None` (xterm leaves the mode untouched in that case).
#[derive(Debug, Clone, Default)]
pub struct ModeSaveSlots {
    saved: std::collections::HashMap<u16, bool>,
}

impl ModeSaveSlots {
    pub fn save(&mut self, mode: u16, value: bool) {
        self.saved.insert(mode, value);
    }

    pub fn restore(&self, mode: u16) -> Option<bool> {
        self.saved.get(&mode).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_restore_round_trips_per_mode() {
        let mut slots = ModeSaveSlots::default();
        slots.save(1049, true);
        slots.save(2004, false);
        assert_eq!(slots.restore(1049), Some(true));
        assert_eq!(slots.restore(2004), Some(false));
        assert_eq!(slots.restore(25), None);
    }
}
