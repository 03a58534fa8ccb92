//! Mouse event encoding into wire-protocol bytes (§4.2, §6).
//!
//! Decoding a raw OS mouse event into a button/kind/modifier triple happens
//! on the UI thread (§4.5); this module only does the terminal-protocol
//! encoding step once the event-granularity and reporting-format mode have
//! selected what (if anything) gets written back to the child. Grounded on
//! the SGR/X10/urxvt button-code formula (base button + modifier bits +
//! motion/scroll flags), the same formula xterm and every VT superset use.

use super::modes::TerminalModes;

/// Which button (if any) a mouse event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    /// Motion with no button held (only reported in "any" event mode).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Press,
    Release,
    Motion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseModifiers {
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

impl MouseModifiers {
    fn bits(self) -> u16 {
        let mut b = 0u16;
        if self.shift {
            b |= 0b0000_0100;
        }
        if self.alt {
            b |= 0b0000_1000;
        }
        if self.ctrl {
            b |= 0b0001_0000;
        }
        b
    }
}

/// Event-granularity mode, derived from DEC private modes 9/1000/1002/1003
/// (§4.2 — "updates two orthogonal fields `mouse_event` and `mouse_format`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventMode {
    Off,
    /// Mode 9: press-only, no release, no modifiers.
    X10,
    /// Mode 1000: press and release.
    Normal,
    /// Mode 1002: press, release, and motion while a button is held.
    Button,
    /// Mode 1003: press, release, and all motion.
    Any,
}

/// Reporting format, derived from DEC private modes 1005/1006/1015/1016.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseFormat {
    X10,
    Utf8,
    Sgr,
    Urxvt,
    SgrPixels,
}

/// Reads the active event mode off `TerminalModes`. Later-numbered modes
/// take precedence when more than one is set, matching xterm (mode 1003
/// implies 1002 implies 1000 implies 9).
pub fn event_mode(modes: &TerminalModes) -> MouseEventMode {
    if modes.mouse_all_motion {
        MouseEventMode::Any
    } else if modes.mouse_motion {
        MouseEventMode::Button
    } else if modes.mouse_tracking {
        MouseEventMode::Normal
    } else if modes.mouse_x10 {
        MouseEventMode::X10
    } else {
        MouseEventMode::Off
    }
}

/// Reads the active reporting format off `TerminalModes`. SGR-pixels takes
/// precedence over SGR, which takes precedence over urxvt, then UTF-8, then
/// legacy X10 — each later mode is strictly more capable.
pub fn format(modes: &TerminalModes) -> MouseFormat {
    if modes.sgr_pixels_mouse {
        MouseFormat::SgrPixels
    } else if modes.sgr_mouse {
        MouseFormat::Sgr
    } else if modes.urxvt_mouse {
        MouseFormat::Urxvt
    } else if modes.utf8_mouse {
        MouseFormat::Utf8
    } else {
        MouseFormat::X10
    }
}

fn base_button_code(button: MouseButton) -> u16 {
    match button {
        MouseButton::Left | MouseButton::None => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
        MouseButton::ScrollUp => 64,
        MouseButton::ScrollDown => 65,
        MouseButton::ScrollLeft => 66,
        MouseButton::ScrollRight => 67,
    }
}

fn is_scroll(button: MouseButton) -> bool {
    matches!(
        button,
        MouseButton::ScrollUp | MouseButton::ScrollDown | MouseButton::ScrollLeft | MouseButton::ScrollRight
    )
}

/// Whether this event should be reported at all, given the active event
/// mode. `col`/`row`/`px`/`py` are 1-based terminal coordinates and pixel
/// coordinates respectively.
fn should_report(event_mode: MouseEventMode, button: MouseButton, kind: MouseEventKind) -> bool {
    match event_mode {
        MouseEventMode::Off => false,
        MouseEventMode::X10 => kind == MouseEventKind::Press && !is_scroll(button) || is_scroll(button),
        MouseEventMode::Normal => kind != MouseEventKind::Motion || is_scroll(button),
        MouseEventMode::Button => {
            kind != MouseEventKind::Motion || is_scroll(button) || button != MouseButton::None
        }
        MouseEventMode::Any => true,
    }
}

/// Encodes a single mouse event into wire bytes per the active event mode
/// and reporting format, or `None` if the event mode suppresses it (e.g.
/// plain motion under "normal" mode, which only reports press/release).
///
/// `col`/`row` are 1-based grid coordinates; `px`/`py` are 1-based pixel
/// coordinates, used only by the SGR-pixels format.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    modes: &TerminalModes,
    button: MouseButton,
    kind: MouseEventKind,
    mods: MouseModifiers,
    col: u32,
    row: u32,
    px: u32,
    py: u32,
) -> Option<Vec<u8>> {
    let ev_mode = event_mode(modes);
    if !should_report(ev_mode, button, kind) {
        return None;
    }
    let fmt = format(modes);

    let mut code = base_button_code(button);
    if ev_mode != MouseEventMode::X10 {
        code |= mods.bits();
    }
    if kind == MouseEventKind::Motion && !is_scroll(button) {
        code |= 0b0010_0000;
    }

    match fmt {
        MouseFormat::Sgr | MouseFormat::SgrPixels => {
            let (x, y) = if fmt == MouseFormat::SgrPixels { (px, py) } else { (col, row) };
            let final_byte = if kind == MouseEventKind::Release && !is_scroll(button) { 'm' } else { 'M' };
            Some(format!("\x1b[<{code};{x};{y}{final_byte}").into_bytes())
        }
        MouseFormat::Urxvt => {
            let button_code = if kind == MouseEventKind::Release && !is_scroll(button) {
                3 | (code & !0b11)
            } else {
                code
            };
            Some(format!("\x1b[{};{col};{row}M", button_code + 32).into_bytes())
        }
        MouseFormat::Utf8 => {
            let button_code = if kind == MouseEventKind::Release && !is_scroll(button) {
                3 | (code & !0b11)
            } else {
                code
            };
            let mut out = b"\x1b[M".to_vec();
            out.push((button_code + 32) as u8);
            push_utf8_coord(&mut out, col);
            push_utf8_coord(&mut out, row);
            Some(out)
        }
        MouseFormat::X10 => {
            let button_code = if kind == MouseEventKind::Release && !is_scroll(button) {
                3 | (code & !0b11)
            } else {
                code
            };
            if col > 223 || row > 223 {
                // Legacy X10 coordinates saturate at 255-32; xterm drops the
                // report entirely rather than encode a corrupt byte.
                return None;
            }
            let mut out = b"\x1b[M".to_vec();
            out.push((button_code + 32) as u8);
            out.push((col + 32) as u8);
            out.push((row + 32) as u8);
            Some(out)
        }
    }
}

/// X10-UTF8 format (mode 1005) encodes coordinates above 95 as a UTF-8
/// sequence instead of a raw byte, extending the legacy 223-column cap.
fn push_utf8_coord(out: &mut Vec<u8>, coord: u32) {
    let value = coord + 32;
    if let Some(c) = char::from_u32(value) {
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    } else {
        out.push(b'?');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sgr_modes() -> TerminalModes {
        let mut m = TerminalModes::default();
        m.mouse_tracking = true;
        m.sgr_mouse = true;
        m
    }

    #[test]
    fn sgr_left_press_matches_spec_scenario() {
        let modes = sgr_modes();
        let bytes = encode(
            &modes,
            MouseButton::Left,
            MouseEventKind::Press,
            MouseModifiers::default(),
            6,
            3,
            0,
            0,
        )
        .unwrap();
        assert_eq!(bytes, b"\x1b[<0;6;3M");
    }

    #[test]
    fn sgr_release_uses_lowercase_m() {
        let modes = sgr_modes();
        let bytes = encode(
            &modes,
            MouseButton::Left,
            MouseEventKind::Release,
            MouseModifiers::default(),
            6,
            3,
            0,
            0,
        )
        .unwrap();
        assert_eq!(bytes, b"\x1b[<0;6;3m");
    }

    #[test]
    fn sgr_scroll_up_uses_button_64() {
        let modes = sgr_modes();
        let bytes = encode(
            &modes,
            MouseButton::ScrollUp,
            MouseEventKind::Press,
            MouseModifiers::default(),
            1,
            1,
            0,
            0,
        )
        .unwrap();
        assert_eq!(bytes, b"\x1b[<64;1;1M");
    }

    #[test]
    fn normal_mode_suppresses_plain_motion() {
        let mut modes = TerminalModes::default();
        modes.mouse_tracking = true;
        modes.sgr_mouse = true;
        let result = encode(
            &modes,
            MouseButton::None,
            MouseEventKind::Motion,
            MouseModifiers::default(),
            1,
            1,
            0,
            0,
        );
        assert!(result.is_none());
    }

    #[test]
    fn any_motion_mode_reports_plain_motion() {
        let mut modes = TerminalModes::default();
        modes.mouse_all_motion = true;
        modes.sgr_mouse = true;
        let result = encode(
            &modes,
            MouseButton::None,
            MouseEventKind::Motion,
            MouseModifiers::default(),
            1,
            1,
            0,
            0,
        );
        assert!(result.is_some());
    }

    #[test]
    fn off_mode_reports_nothing() {
        let modes = TerminalModes::default();
        let result = encode(
            &modes,
            MouseButton::Left,
            MouseEventKind::Press,
            MouseModifiers::default(),
            1,
            1,
            0,
            0,
        );
        assert!(result.is_none());
    }

    #[test]
    fn x10_legacy_format_adds_32_offset() {
        let mut modes = TerminalModes::default();
        modes.mouse_tracking = true;
        let bytes = encode(
            &modes,
            MouseButton::Left,
            MouseEventKind::Press,
            MouseModifiers::default(),
            6,
            3,
            0,
            0,
        )
        .unwrap();
        assert_eq!(bytes, vec![0x1b, b'[', b'M', 0 + 32, 6 + 32, 3 + 32]);
    }

    #[test]
    fn shift_modifier_sets_bit_in_sgr_format() {
        let modes = sgr_modes();
        let bytes = encode(
            &modes,
            MouseButton::Left,
            MouseEventKind::Press,
            MouseModifiers { shift: true, alt: false, ctrl: false },
            1,
            1,
            0,
            0,
        )
        .unwrap();
        assert_eq!(bytes, b"\x1b[<4;1;1M");
    }
}
