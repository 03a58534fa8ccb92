//! Plain-text search over a grid's full row storage (scrollback included).
//!
//! Grounded on the linear scrollback scan used by terminal vterm
//! implementations for "find in scrollback" features — no fuzzy matching,
//! no regex, just a case-sensitive or case-insensitive substring search
//! against each row's rendered text.

use super::grid::Grid;
use super::selection::ScreenPoint;

/// A single match: the row it was found in and the half-open column range
/// `[start_col, end_col)` it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub row: usize,
    pub start_col: u16,
    pub end_col: u16,
}

impl SearchMatch {
    pub fn start_point(&self) -> ScreenPoint {
        ScreenPoint::new(self.row, self.start_col)
    }

    pub fn end_point(&self) -> ScreenPoint {
        ScreenPoint::new(self.row, self.end_col.saturating_sub(1))
    }
}

/// Searches a grid's entire row list (scrollback plus the visible area) for
/// occurrences of a needle string, row by row.
pub struct PageListSearch<'a> {
    grid: &'a Grid,
}

impl<'a> PageListSearch<'a> {
    pub fn new(grid: &'a Grid) -> Self {
        Self { grid }
    }

    /// Find every match of `needle` across the whole grid. Matches that
    /// would span a line wrap (i.e. cross a row boundary) are not found —
    /// each row is searched independently, matching how most terminals
    /// implement scrollback search.
    pub fn find_all(&self, needle: &str, case_sensitive: bool) -> Vec<SearchMatch> {
        if needle.is_empty() {
            return Vec::new();
        }

        let needle_cmp = if case_sensitive {
            needle.to_string()
        } else {
            needle.to_lowercase()
        };

        let mut matches = Vec::new();
        for (row_idx, row) in self.grid.rows.iter().enumerate() {
            let line: String = row.cells.iter().map(|c| c.c).collect();
            let haystack = if case_sensitive {
                line.clone()
            } else {
                line.to_lowercase()
            };

            let needle_len_chars = needle_cmp.chars().count();
            let haystack_chars: Vec<char> = haystack.chars().collect();
            if haystack_chars.len() < needle_len_chars {
                continue;
            }

            let needle_chars: Vec<char> = needle_cmp.chars().collect();
            for start in 0..=(haystack_chars.len() - needle_len_chars) {
                if haystack_chars[start..start + needle_len_chars] == needle_chars[..] {
                    matches.push(SearchMatch {
                        row: row_idx,
                        start_col: start as u16,
                        end_col: (start + needle_len_chars) as u16,
                    });
                }
            }
        }
        matches
    }

    /// The first match at or after `from` in reading order (row then
    /// column), wrapping back to the top if nothing is found below it.
    pub fn find_next(&self, needle: &str, case_sensitive: bool, from: ScreenPoint) -> Option<SearchMatch> {
        let all = self.find_all(needle, case_sensitive);
        all.iter()
            .find(|m| (m.row, m.start_col) >= (from.row, from.col))
            .or_else(|| all.first())
            .copied()
    }

    /// The first match at or before `from` in reading order, wrapping to
    /// the bottom if nothing is found above it.
    pub fn find_previous(&self, needle: &str, case_sensitive: bool, from: ScreenPoint) -> Option<SearchMatch> {
        let all = self.find_all(needle, case_sensitive);
        all.iter()
            .rev()
            .find(|m| (m.row, m.start_col) <= (from.row, from.col))
            .or_else(|| all.last())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::color::Color;
    use crate::terminal::grid::Cell;

    fn grid_with_rows(lines: &[&str], cols: u16) -> Grid {
        let mut grid = Grid::new(lines.len() as u16, cols);
        for (row_idx, line) in lines.iter().enumerate() {
            for (col, c) in line.chars().enumerate() {
                grid.set_cell(
                    row_idx as u16,
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
        grid
    }

    #[test]
    fn finds_all_occurrences_case_sensitive() {
        let grid = grid_with_rows(&["foo bar foo", "nothing here"], 20);
        let search = PageListSearch::new(&grid);
        let matches = search.find_all("foo", true);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].start_col, 0);
        assert_eq!(matches[1].start_col, 8);
    }

    #[test]
    fn case_insensitive_search_matches_mixed_case() {
        let grid = grid_with_rows(&["Hello WORLD"], 20);
        let search = PageListSearch::new(&grid);
        let matches = search.find_all("world", false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start_col, 6);
    }

    #[test]
    fn find_next_wraps_to_top() {
        let grid = grid_with_rows(&["match here", "nothing", "no match"], 20);
        let search = PageListSearch::new(&grid);
        let offset = grid.rows.len() - grid.visible_rows as usize;
        let from = ScreenPoint::new(offset + 2, 5);
        let found = search.find_next("match", true, from).unwrap();
        assert_eq!(found.row, offset);
    }

    /// Deterministic xorshift PRNG, seeded, so the scrollback-search
    /// scenario (§8 scenario 8) reproduces identically on every run without
    /// pulling in the `rand` crate for a single test.
    struct Xorshift(u64);

    impl Xorshift {
        fn next_u64(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn next_char(&mut self) -> char {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz ";
            ALPHABET[(self.next_u64() % ALPHABET.len() as u64) as usize] as char
        }
    }

    #[test]
    fn scrollback_search_finds_exact_needle_count_across_256_pages() {
        const PAGES: usize = 256;
        const COLS: u16 = 80;
        const NEEDLE_COPIES: usize = 17;
        let needle = "ghost";

        let mut rng = Xorshift(0x5eed_cafe_1234_5678);
        let id_gen = crate::ids::BooidGenerator::with_hostname_machine_id();
        let mut grid = Grid::new(24, COLS);
        grid.rows.clear();
        for _ in 0..PAGES {
            let mut text: String = (0..COLS as usize).map(|_| rng.next_char()).collect();
            grid.rows.push_back(Row::new(COLS, id_gen.next()));
            for (col, c) in text.drain(..).enumerate() {
                grid.rows.back_mut().unwrap().cells[col].c = c;
            }
        }
        // Inject the needle at deterministic, non-overlapping positions.
        let inject_rows: Vec<usize> = (0..NEEDLE_COPIES).map(|i| (i * 11) % PAGES).collect();
        for &row_idx in &inject_rows {
            let row = &mut grid.rows[row_idx];
            for (i, c) in needle.chars().enumerate() {
                row.cells[i].c = c;
            }
        }

        let search = PageListSearch::new(&grid);
        let matches = search.find_all(needle, true);
        assert_eq!(matches.len(), NEEDLE_COPIES);
    }
}
