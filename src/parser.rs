//! Thin wrapper around `vte::Parser` adding a fast path for runs of
//! printable bytes in the ground state, where `vte` would otherwise dispatch
//! one `Perform::print` call per byte through its full state-transition
//! machinery.

use vte::{Params, Parser as VteParser, Perform};

/// Bytes that move the state machine out of the ground state: ESC and the
/// C1 introducers for DCS, SOS, CSI, OSC, PM, and APC.
const SEQUENCE_INTRODUCERS: [u8; 7] = [0x1B, 0x90, 0x98, 0x9B, 0x9D, 0x9E, 0x9F];

/// Wraps `vte::Parser`, exposing `advance` for single bytes (escape
/// sequences, control codes) and `feed_slice` for bulk throughput on the
/// common case: a shell dumping a line of plain text.
///
/// `feed_slice` tracks ground-state itself: it scans ahead for runs of
/// printable ASCII and calls `Perform::print` directly, skipping `vte`'s
/// state dispatch for each byte in the run. It leaves ground on any
/// sequence-introducer byte and only resumes the fast path once `vte`
/// reports (via `csi_dispatch`/`esc_dispatch`/`osc_dispatch`/`unhook`) that
/// the sequence has completed. If that signal never arrives (SOS/PM/APC
/// have no completion callback in `vte::Perform`), every remaining byte
/// just falls back to the slow, always-correct per-byte path — the tracking
/// only ever gates the optimization, never correctness.
pub struct Parser {
    inner: VteParser,
    ground: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            inner: VteParser::new(),
            ground: true,
        }
    }

    /// Feed a single byte through the state machine.
    pub fn advance<P: Perform>(&mut self, performer: &mut P, byte: u8) {
        self.advance_tracked(performer, byte);
    }

    /// Feed a slice through the state machine, taking a fast path for runs
    /// of printable ASCII bytes while in the ground state.
    pub fn feed_slice<P: Perform>(&mut self, performer: &mut P, bytes: &[u8]) {
        let mut i = 0;
        while i < bytes.len() {
            if self.ground {
                let start = i;
                while i < bytes.len() && self.ground && matches!(bytes[i], 0x20..=0x7E) {
                    performer.print(bytes[i] as char);
                    i += 1;
                }
                if i > start {
                    continue;
                }
            }
            self.advance_tracked(performer, bytes[i]);
            i += 1;
        }
    }

    fn advance_tracked<P: Perform>(&mut self, performer: &mut P, byte: u8) {
        if SEQUENCE_INTRODUCERS.contains(&byte) {
            self.ground = false;
        }
        let mut tracker = GroundTracker {
            inner: performer,
            ground: &mut self.ground,
        };
        self.inner.advance(&mut tracker, byte);
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Delegates every `Perform` callback to the wrapped performer, flipping
/// `ground` back to `true` on the callbacks that `vte` only invokes once a
/// sequence has fully resolved back to the ground state.
struct GroundTracker<'a, P> {
    inner: &'a mut P,
    ground: &'a mut bool,
}

impl<'a, P: Perform> Perform for GroundTracker<'a, P> {
    fn print(&mut self, c: char) {
        self.inner.print(c);
    }

    fn execute(&mut self, byte: u8) {
        self.inner.execute(byte);
    }

    fn hook(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        self.inner.hook(params, intermediates, ignore, action);
    }

    fn put(&mut self, byte: u8) {
        self.inner.put(byte);
    }

    fn unhook(&mut self) {
        self.inner.unhook();
        *self.ground = true;
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], bell_terminated: bool) {
        self.inner.osc_dispatch(params, bell_terminated);
        *self.ground = true;
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        self.inner.csi_dispatch(params, intermediates, ignore, action);
        *self.ground = true;
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        self.inner.esc_dispatch(intermediates, ignore, byte);
        *self.ground = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        chars: Vec<char>,
        csi_finals: Vec<char>,
    }

    impl vte::Perform for Collector {
        fn print(&mut self, c: char) {
            self.chars.push(c);
        }

        fn csi_dispatch(&mut self, _: &vte::Params, _: &[u8], _: bool, action: char) {
            self.csi_finals.push(action);
        }
    }

    #[test]
    fn feed_slice_prints_plain_text() {
        let mut parser = Parser::new();
        let mut collector = Collector::default();
        parser.feed_slice(&mut collector, b"hello");
        assert_eq!(collector.chars, vec!['h', 'e', 'l', 'l', 'o']);
    }

    #[test]
    fn feed_slice_handles_escape_sequences_mixed_with_text() {
        let mut parser = Parser::new();
        let mut collector = Collector::default();
        parser.feed_slice(&mut collector, b"hi\x1b[1;2Hbye");
        assert_eq!(
            collector.chars,
            vec!['h', 'i', 'b', 'y', 'e']
        );
        assert_eq!(collector.csi_finals, vec!['H']);
    }

    #[test]
    fn feed_slice_resumes_fast_path_after_csi_completes() {
        let mut parser = Parser::new();
        let mut collector = Collector::default();
        // Two back-to-back CSI sequences separated by plain text; the
        // second one only parses correctly if `ground` was restored after
        // the first's `csi_dispatch` fired.
        parser.feed_slice(&mut collector, b"\x1b[1mred\x1b[0mreset");
        assert_eq!(collector.csi_finals, vec!['m', 'm']);
        assert_eq!(
            collector.chars,
            "redreset".chars().collect::<Vec<_>>()
        );
    }

    #[test]
    fn advance_handles_escape_sequences_byte_by_byte() {
        let mut parser = Parser::new();
        let mut collector = Collector::default();
        for &byte in b"\x1b[1;2H" {
            parser.advance(&mut collector, byte);
        }
        assert_eq!(collector.csi_finals, vec!['H']);
    }
}
