//! Kitty keyboard protocol flag stack and kitty graphics protocol command
//! parsing. Graphics handling here is bookkeeping only — commands are
//! decoded into a structured form and image bytes are kept (base64-decoded)
//! for the caller to hand to the renderer; no pixel format is decoded here.
//!
//! `vte` never calls back into `Perform` for APC strings (`ESC _ ... ST`) —
//! its state table swallows `SosPmApcString` content with no hook, unlike
//! DCS. Kitty graphics escapes are therefore carved out of the raw byte
//! stream *before* the rest reaches `vte::Parser`; see
//! [`extract_apc_graphics_commands`], called from the PTY reader thread.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bitflags::bitflags;

bitflags! {
    /// Kitty keyboard protocol progressive-enhancement flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KittyKeyFlags: u8 {
        const DISAMBIGUATE_ESCAPE_CODES     = 1 << 0;
        const REPORT_EVENT_TYPES            = 1 << 1;
        const REPORT_ALTERNATE_KEYS         = 1 << 2;
        const REPORT_ALL_KEYS_AS_ESCAPE_CODES = 1 << 3;
        const REPORT_ASSOCIATED_TEXT        = 1 << 4;
    }
}

/// How `CSI = flags ; mode u` should combine `flags` with the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSetMode {
    /// mode 1 (default): replace the current entry's flags outright.
    Replace,
    /// mode 2: set the given bits, leaving others untouched.
    SetBits,
    /// mode 3: clear the given bits, leaving others untouched.
    ClearBits,
}

impl FlagSetMode {
    pub fn from_param(p: u16) -> Self {
        match p {
            2 => FlagSetMode::SetBits,
            3 => FlagSetMode::ClearBits,
            _ => FlagSetMode::Replace,
        }
    }
}

/// A push/pop stack of progressive-enhancement flag sets, one entry pushed
/// per application that opts in (`CSI > flags u`), so a nested program
/// (editor inside tmux inside a shell) can restore the outer program's
/// flags on exit (`CSI < Pu`) without having to remember them itself.
#[derive(Debug, Clone)]
pub struct KeyboardProtocolStack {
    stack: Vec<KittyKeyFlags>,
}

/// Real terminals bound the stack depth to stop a runaway program from
/// growing it unboundedly; kitty itself caps at 8 entries.
const MAX_STACK_DEPTH: usize = 8;

impl KeyboardProtocolStack {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// The effective flags: empty (legacy mode) until something is pushed.
    pub fn current(&self) -> KittyKeyFlags {
        self.stack.last().copied().unwrap_or(KittyKeyFlags::empty())
    }

    /// `CSI > flags u` — push a new entry. Drops the oldest entry if the
    /// stack is already at capacity, matching kitty's own overflow behavior.
    pub fn push(&mut self, flags: KittyKeyFlags) {
        if self.stack.len() >= MAX_STACK_DEPTH {
            self.stack.remove(0);
        }
        self.stack.push(flags);
    }

    /// `CSI < Pu` — pop `count` entries (default 1). Popping more entries
    /// than exist just empties the stack.
    pub fn pop(&mut self, count: u16) {
        let count = count.max(1) as usize;
        let new_len = self.stack.len().saturating_sub(count);
        self.stack.truncate(new_len);
    }

    /// `CSI = flags ; mode u` — modify the current (or a newly pushed, if
    /// the stack is empty) entry's flags per `mode`.
    pub fn set(&mut self, flags: KittyKeyFlags, mode: FlagSetMode) {
        let current = self.current();
        let updated = match mode {
            FlagSetMode::Replace => flags,
            FlagSetMode::SetBits => current | flags,
            FlagSetMode::ClearBits => current & !flags,
        };
        if let Some(top) = self.stack.last_mut() {
            *top = updated;
        } else {
            self.stack.push(updated);
        }
    }
}

impl Default for KeyboardProtocolStack {
    fn default() -> Self {
        Self::new()
    }
}

/// The action requested by a kitty graphics control stream (`a=` key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsAction {
    Transmit,
    TransmitAndDisplay,
    Display,
    Delete,
    Query,
}

/// A decoded kitty graphics command: the control-data keys plus the
/// (already base64-decoded) payload, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsCommand {
    pub action: GraphicsAction,
    pub image_id: Option<u32>,
    pub placement_id: Option<u32>,
    pub format: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quiet: u8,
    /// `m=1`: more chunks of this image's payload follow. `m=0` (default):
    /// this chunk completes the transmission.
    pub more: bool,
    pub payload: Vec<u8>,
}

impl GraphicsCommand {
    fn parse(control: &str, payload_b64: &str) -> Option<Self> {
        let mut action = GraphicsAction::Transmit;
        let mut image_id = None;
        let mut placement_id = None;
        let mut format = None;
        let mut width = None;
        let mut height = None;
        let mut quiet = 0u8;
        let mut more = false;

        for pair in control.split(',') {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            match key {
                "a" => {
                    action = match value {
                        "t" => GraphicsAction::Transmit,
                        "T" => GraphicsAction::TransmitAndDisplay,
                        "p" => GraphicsAction::Display,
                        "d" => GraphicsAction::Delete,
                        "q" => GraphicsAction::Query,
                        _ => GraphicsAction::Transmit,
                    }
                }
                "i" => image_id = value.parse().ok(),
                "p" => placement_id = value.parse().ok(),
                "f" => format = value.parse().ok(),
                "s" => width = value.parse().ok(),
                "v" => height = value.parse().ok(),
                "q" => quiet = value.parse().unwrap_or(0),
                "m" => more = value == "1",
                _ => {}
            }
        }

        let payload = if payload_b64.is_empty() {
            Vec::new()
        } else {
            BASE64_STANDARD.decode(payload_b64).ok()?
        };

        Some(Self {
            action,
            image_id,
            placement_id,
            format,
            width,
            height,
            quiet,
            more,
            payload,
        })
    }
}

/// A fully received (or still-accumulating) image's pixel payload. Stored
/// verbatim — decoding the pixel format is an external collaborator's job
/// (§1 Non-goals: "graphical image protocol rendering beyond storage
/// bookkeeping").
#[derive(Debug, Clone)]
pub struct Image {
    pub id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A multi-chunk transmission in progress (`m=1` on at least one chunk).
#[derive(Debug, Clone)]
struct LoadingImage {
    id: u32,
    format: u32,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Where an [`Image`] is drawn: a reference to the image plus the grid
/// position the display command requested.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub image_id: u32,
    pub placement_id: u32,
    pub row: u16,
    pub col: u16,
}

/// A reply the caller should write back to the child, per kitty's
/// `\x1b_G<key>=<value>,...;<message>\x1b\` acknowledgement format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsReply {
    pub image_id: u32,
    pub message: String,
}

impl GraphicsReply {
    fn ok(image_id: u32) -> Self {
        Self {
            image_id,
            message: "OK".to_string(),
        }
    }

    fn error(image_id: u32, message: &str) -> Self {
        Self {
            image_id,
            message: message.to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("\x1b_Gi={};{}\x1b\\", self.image_id, self.message).into_bytes()
    }
}

/// Per-Screen kitty graphics bookkeeping (§3 "image storage"): completed
/// images keyed by id, active placements, and at most one in-flight
/// multi-chunk transmission at a time (kitty itself serializes chunked
/// transmissions the same way).
#[derive(Debug, Clone, Default)]
pub struct GraphicsStorage {
    images: HashMap<u32, Image>,
    placements: Vec<Placement>,
    loading: Option<LoadingImage>,
}

impl GraphicsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self, id: u32) -> Option<&Image> {
        self.images.get(&id)
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Dispatch a decoded command. `fresh_id` is called to mint an id when
    /// the command omits one (`i=0` or absent); `cursor` positions a display
    /// command that doesn't specify an explicit `(row, col)` via a
    /// placement, which this bookkeeping-only layer always takes from the
    /// current cursor since real placement geometry is the renderer's job.
    /// Returns a reply to write back unless `quiet` suppresses it (`q=1`
    /// suppresses success replies, `q=2` suppresses all replies).
    pub fn dispatch(
        &mut self,
        cmd: GraphicsCommand,
        fresh_id: impl Fn() -> u32,
        cursor: (u16, u16),
    ) -> Option<GraphicsReply> {
        let (cursor_row, cursor_col) = cursor;
        let reply = match cmd.action {
            GraphicsAction::Query => {
                let id = cmd.image_id.unwrap_or_else(&fresh_id);
                Some(GraphicsReply::ok(id))
            }
            GraphicsAction::Delete => {
                if let Some(id) = cmd.image_id {
                    self.images.remove(&id);
                    self.placements.retain(|p| p.image_id != id);
                } else {
                    self.images.clear();
                    self.placements.clear();
                }
                None
            }
            GraphicsAction::Transmit | GraphicsAction::TransmitAndDisplay => {
                let id = cmd.image_id.unwrap_or_else(&fresh_id);

                if let Some(loading) = &mut self.loading {
                    if loading.id == id {
                        loading.data.extend_from_slice(&cmd.payload);
                        if cmd.more {
                            return None;
                        }
                        let loading = self.loading.take().unwrap();
                        self.images.insert(
                            id,
                            Image {
                                id,
                                format: loading.format,
                                width: loading.width,
                                height: loading.height,
                                data: loading.data,
                            },
                        );
                    }
                } else if cmd.more {
                    self.loading = Some(LoadingImage {
                        id,
                        format: cmd.format.unwrap_or(32),
                        width: cmd.width.unwrap_or(0),
                        height: cmd.height.unwrap_or(0),
                        data: cmd.payload.clone(),
                    });
                    return None;
                } else {
                    self.images.insert(
                        id,
                        Image {
                            id,
                            format: cmd.format.unwrap_or(32),
                            width: cmd.width.unwrap_or(0),
                            height: cmd.height.unwrap_or(0),
                            data: cmd.payload.clone(),
                        },
                    );
                }

                if cmd.action == GraphicsAction::TransmitAndDisplay {
                    if self.images.contains_key(&id) {
                        self.placements.push(Placement {
                            image_id: id,
                            placement_id: cmd.placement_id.unwrap_or(0),
                            row: cursor_row,
                            col: cursor_col,
                        });
                        Some(GraphicsReply::ok(id))
                    } else {
                        Some(GraphicsReply::error(id, "ENOENT:transmission incomplete"))
                    }
                } else {
                    Some(GraphicsReply::ok(id))
                }
            }
            GraphicsAction::Display => {
                let id = match cmd.image_id {
                    Some(id) => id,
                    None => return None,
                };
                if self.images.contains_key(&id) {
                    self.placements.push(Placement {
                        image_id: id,
                        placement_id: cmd.placement_id.unwrap_or(0),
                        row: cursor_row,
                        col: cursor_col,
                    });
                    Some(GraphicsReply::ok(id))
                } else {
                    Some(GraphicsReply::error(id, "ENOENT:no such image"))
                }
            }
        };

        match cmd.quiet {
            0 => reply,
            1 => reply.filter(|r| r.message != "OK"),
            _ => None,
        }
    }
}

/// Scan `data` for kitty graphics APC escapes (`ESC _ G <control>[;<payload>]
/// ESC \`), returning the bytes with those spans removed (so the remainder
/// can still be fed to the normal VT parser) alongside the decoded commands
/// found, in stream order.
pub fn extract_apc_graphics_commands(data: &[u8]) -> (Vec<u8>, Vec<GraphicsCommand>) {
    let mut passthrough = Vec::with_capacity(data.len());
    let mut commands = Vec::new();
    let mut i = 0;

    while i < data.len() {
        if data[i] == 0x1b && data.get(i + 1) == Some(&b'_') && data.get(i + 2) == Some(&b'G') {
            let start = i + 3;
            if let Some(end) = find_st(data, start) {
                let body = &data[start..end];
                if let Ok(text) = std::str::from_utf8(body) {
                    let mut split = text.splitn(2, ';');
                    let control = split.next().unwrap_or("");
                    let payload = split.next().unwrap_or("");
                    if let Some(cmd) = GraphicsCommand::parse(control, payload) {
                        commands.push(cmd);
                    }
                }
                i = end + terminator_len(data, end);
                continue;
            }
        }
        passthrough.push(data[i]);
        i += 1;
    }

    (passthrough, commands)
}

/// Find the index of the string terminator starting the search at `from`:
/// either `ESC \` (0x1b 0x5c) or the single-byte C1 ST (0x9c).
fn find_st(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < data.len() {
        if data[i] == 0x9c {
            return Some(i);
        }
        if data[i] == 0x1b && data.get(i + 1) == Some(&b'\\') {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn terminator_len(data: &[u8], terminator_start: usize) -> usize {
    if data.get(terminator_start) == Some(&0x9c) {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_stack_push_query_pop() {
        let mut stack = KeyboardProtocolStack::new();
        assert_eq!(stack.current(), KittyKeyFlags::empty());

        stack.push(KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES);
        assert_eq!(stack.current(), KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES);

        stack.push(KittyKeyFlags::REPORT_EVENT_TYPES);
        assert_eq!(stack.current(), KittyKeyFlags::REPORT_EVENT_TYPES);

        stack.pop(1);
        assert_eq!(stack.current(), KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES);

        stack.pop(10);
        assert_eq!(stack.current(), KittyKeyFlags::empty());
    }

    #[test]
    fn keyboard_stack_set_bits_modes() {
        let mut stack = KeyboardProtocolStack::new();
        stack.push(KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES);
        stack.set(KittyKeyFlags::REPORT_EVENT_TYPES, FlagSetMode::SetBits);
        assert!(stack.current().contains(KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES));
        assert!(stack.current().contains(KittyKeyFlags::REPORT_EVENT_TYPES));

        stack.set(KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES, FlagSetMode::ClearBits);
        assert!(!stack.current().contains(KittyKeyFlags::DISAMBIGUATE_ESCAPE_CODES));
    }

    #[test]
    fn stack_overflow_drops_oldest_entry() {
        let mut stack = KeyboardProtocolStack::new();
        for _ in 0..(MAX_STACK_DEPTH + 3) {
            stack.push(KittyKeyFlags::REPORT_EVENT_TYPES);
        }
        assert_eq!(stack.stack.len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn extract_transmit_and_display_command() {
        let payload_b64 = BASE64_STANDARD.encode(b"pixeldata");
        let mut stream = Vec::new();
        stream.extend_from_slice(b"before");
        stream.extend_from_slice(b"\x1b_G");
        stream.extend_from_slice(format!("a=T,f=32,s=2,v=2,i=7;{}", payload_b64).as_bytes());
        stream.extend_from_slice(b"\x1b\\");
        stream.extend_from_slice(b"after");

        let (passthrough, commands) = extract_apc_graphics_commands(&stream);
        assert_eq!(passthrough, b"beforeafter");
        assert_eq!(commands.len(), 1);
        let cmd = &commands[0];
        assert_eq!(cmd.action, GraphicsAction::TransmitAndDisplay);
        assert_eq!(cmd.image_id, Some(7));
        assert_eq!(cmd.format, Some(32));
        assert_eq!(cmd.payload, b"pixeldata");
    }

    #[test]
    fn passthrough_preserves_non_graphics_escapes() {
        let stream = b"\x1b[31mred\x1b[0m".to_vec();
        let (passthrough, commands) = extract_apc_graphics_commands(&stream);
        assert_eq!(passthrough, stream);
        assert!(commands.is_empty());
    }

    #[test]
    fn transmit_and_display_creates_placement() {
        let mut storage = GraphicsStorage::new();
        let cmd = GraphicsCommand::parse("a=T,i=9,f=32,s=2,v=2", "aGVsbG8=").unwrap();
        let reply = storage.dispatch(cmd, || 9, (3, 4));
        assert_eq!(reply, Some(GraphicsReply::ok(9)));
        assert!(storage.image(9).is_some());
        assert_eq!(storage.placements().len(), 1);
        assert_eq!(storage.placements()[0].row, 3);
        assert_eq!(storage.placements()[0].col, 4);
    }

    #[test]
    fn display_without_prior_transmit_is_an_error() {
        let mut storage = GraphicsStorage::new();
        let cmd = GraphicsCommand::parse("a=p,i=42", "").unwrap();
        let reply = storage.dispatch(cmd, || 42, (0, 0));
        assert_eq!(reply.unwrap().message, "ENOENT:no such image");
    }

    #[test]
    fn multi_chunk_transmission_accumulates_until_final_chunk() {
        let mut storage = GraphicsStorage::new();
        let first = GraphicsCommand::parse("a=t,i=5,m=1", "aGVs").unwrap();
        assert_eq!(storage.dispatch(first, || 5, (0, 0)), None);
        assert!(storage.image(5).is_none());

        let last = GraphicsCommand::parse("a=t,i=5,m=0", "bG8=").unwrap();
        let reply = storage.dispatch(last, || 5, (0, 0));
        assert_eq!(reply, Some(GraphicsReply::ok(5)));
        assert_eq!(storage.image(5).unwrap().data, b"hello");
    }

    #[test]
    fn delete_removes_image_and_its_placements() {
        let mut storage = GraphicsStorage::new();
        let cmd = GraphicsCommand::parse("a=T,i=1", "eA==").unwrap();
        storage.dispatch(cmd, || 1, (0, 0));
        assert!(storage.image(1).is_some());

        let delete = GraphicsCommand::parse("a=d,i=1", "").unwrap();
        storage.dispatch(delete, || 1, (0, 0));
        assert!(storage.image(1).is_none());
        assert!(storage.placements().is_empty());
    }

    #[test]
    fn quiet_one_suppresses_success_but_not_errors() {
        let mut storage = GraphicsStorage::new();
        let cmd = GraphicsCommand::parse("a=p,i=7,q=1", "").unwrap();
        let reply = storage.dispatch(cmd, || 7, (0, 0));
        assert!(reply.is_some(), "errors still report under q=1");

        let transmit = GraphicsCommand::parse("a=t,i=8,q=1", "eA==").unwrap();
        let reply = storage.dispatch(transmit, || 8, (0, 0));
        assert_eq!(reply, None, "success suppressed under q=1");
    }
}
