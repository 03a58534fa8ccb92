/// Terminal color representation supporting 16-color, 256-color, and truecolor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Default for Color {
    fn default() -> Self {
        Color::Default
    }
}

/// A screen's 256-entry color palette plus a mask of user-overridden
/// entries (§3: "a 256-entry color palette and mask of user-overridden
/// palette entries, default palette"). Indices 0-15 are the ANSI/bright-ANSI
/// colors; 16-231 are the color cube; 232-255 are the grayscale ramp.
/// OSC 4 overrides individual entries; OSC 104 resets one or all of them
/// back to [`indexed_to_rgb`]'s default.
#[derive(Debug, Clone)]
pub struct Palette {
    entries: [(u8, u8, u8); 256],
    overridden: [bool; 256],
}

impl Palette {
    pub fn get(&self, index: u8) -> (u8, u8, u8) {
        self.entries[index as usize]
    }

    pub fn set(&mut self, index: u8, rgb: (u8, u8, u8)) {
        self.entries[index as usize] = rgb;
        self.overridden[index as usize] = true;
    }

    pub fn is_overridden(&self, index: u8) -> bool {
        self.overridden[index as usize]
    }

    /// OSC 104 with an explicit index list: reset just those entries.
    pub fn reset(&mut self, index: u8) {
        self.entries[index as usize] = indexed_to_rgb(index);
        self.overridden[index as usize] = false;
    }

    /// OSC 104 with no arguments: reset the whole palette.
    pub fn reset_all(&mut self) {
        *self = Self::default();
    }
}

impl Default for Palette {
    fn default() -> Self {
        let mut entries = [(0u8, 0u8, 0u8); 256];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = indexed_to_rgb(i as u8);
        }
        Self {
            entries,
            overridden: [false; 256],
        }
    }
}

/// Convert a 256-color index to an RGB tuple for the frontend.
/// The first 16 are the standard ANSI colors (theme-dependent),
/// 16-231 are a 6x6x6 color cube, 232-255 are a grayscale ramp.
#[allow(dead_code)]
pub fn indexed_to_rgb(index: u8) -> (u8, u8, u8) {
    match index {
        // Standard ANSI colors (Tokyo Night — matches frontend ANSI_COLORS)
        0 => (0x15, 0x16, 0x1e),   // black
        1 => (0xf7, 0x76, 0x8e),   // red
        2 => (0x9e, 0xce, 0x6a),   // green
        3 => (0xe0, 0xaf, 0x68),   // yellow
        4 => (0x7a, 0xa2, 0xf7),   // blue
        5 => (0xbb, 0x9a, 0xf7),   // magenta
        6 => (0x7d, 0xcf, 0xff),   // cyan
        7 => (0xa9, 0xb1, 0xd6),   // white
        8 => (0x41, 0x48, 0x68),   // bright black
        9 => (0xff, 0x9e, 0x9e),   // bright red
        10 => (0xb9, 0xf2, 0x7c),  // bright green
        11 => (0xff, 0x9e, 0x64),  // bright yellow
        12 => (0x82, 0xaa, 0xff),  // bright blue
        13 => (0xd4, 0xb0, 0xff),  // bright magenta
        14 => (0xa9, 0xe1, 0xff),  // bright cyan
        15 => (0xc0, 0xca, 0xf5),  // bright white
        // 6x6x6 color cube
        16..=231 => {
            let idx = index - 16;
            let r = idx / 36;
            let g = (idx % 36) / 6;
            let b = idx % 6;
            let to_val = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
            (to_val(r), to_val(g), to_val(b))
        }
        // Grayscale ramp
        232..=255 => {
            let v = 8 + 10 * (index - 232);
            (v, v, v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_defaults_match_indexed_to_rgb() {
        let palette = Palette::default();
        assert_eq!(palette.get(1), indexed_to_rgb(1));
        assert!(!palette.is_overridden(1));
    }

    #[test]
    fn set_marks_overridden_and_reset_restores_default() {
        let mut palette = Palette::default();
        palette.set(1, (1, 2, 3));
        assert_eq!(palette.get(1), (1, 2, 3));
        assert!(palette.is_overridden(1));

        palette.reset(1);
        assert_eq!(palette.get(1), indexed_to_rgb(1));
        assert!(!palette.is_overridden(1));
    }

    #[test]
    fn reset_all_clears_every_override() {
        let mut palette = Palette::default();
        palette.set(5, (9, 9, 9));
        palette.set(200, (8, 8, 8));
        palette.reset_all();
        assert!(!palette.is_overridden(5));
        assert!(!palette.is_overridden(200));
    }
}
