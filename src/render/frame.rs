use serde::Serialize;

/// Cursor rendering information handed to the in-process consumer.
#[derive(Debug, Clone, Serialize)]
pub struct CursorRender {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
    pub shape: String,
}

/// Events emitted alongside render frames for state changes.
#[allow(dead_code)]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TerminalEvent {
    /// A new command block has started (prompt is being shown)
    BlockStarted {
        id: String,
        cwd: String,
        /// Global cursor row at the time of the event
        global_row: u64,
    },
    /// The command within a block has been identified
    BlockCommand {
        id: String,
        command: String,
        /// Global cursor row at the time of the event
        global_row: u64,
    },
    /// A command block has completed execution
    BlockCompleted {
        id: String,
        exit_code: i32,
        /// Global cursor row at the time of the event
        global_row: u64,
    },
    /// Terminal title changed (via OSC 0 or OSC 2)
    TitleChanged { title: String },
    /// Entered alternate screen buffer (e.g. vim, less)
    AltScreenEntered,
    /// Exited alternate screen buffer
    AltScreenExited,
    /// Bell character received
    Bell,
    /// Working directory changed
    CwdChanged { path: String },
    /// Mouse mode flags changed
    MouseModeChanged {
        tracking: bool,
        motion: bool,
        all_motion: bool,
        sgr: bool,
        utf8: bool,
        focus: bool,
        alt_scroll: bool,
        synchronized_output: bool,
        bracketed_paste: bool,
        cursor_keys_application: bool,
    },
    /// Scrollback buffer was cleared (CSI 3J)
    ScrollbackCleared,
    /// OSC 133;T tmux DCS passthrough line, unwrapped from its tmux framing
    /// and handed to the caller to interpret (§10 supplemented feature).
    TmuxRequested { args: String },
    /// DECCOLM (132-column mode) requested a resize. The core does not own
    /// the PTY/window size itself (§1) — the IO coordinator is expected to
    /// resize the PTY and call `TerminalState::resize` in response.
    ResizeRequested { cols: u16, rows: u16 },
    /// Inline image data (iTerm2 OSC 1337 protocol)
    InlineImage {
        id: String,
        data_base64: String,
        width: u16,
        height: u16,
        row: u16,
        col: u16,
    },
    /// Sixel image data (experimental; only emitted when
    /// VTCORE_ENABLE_EXPERIMENTAL_IMAGE_PROTOCOLS=1).
    SixelImage {
        id: String,
        data_base64: String,
        width: u32,
        height: u32,
        row: u16,
        col: u16,
    },
    /// Kitty graphics protocol image (experimental scaffold).
    KittyImage {
        id: String,
        action: String,
        data_base64: String,
        width: u32,
        height: u32,
        row: u16,
        col: u16,
        image_id: u32,
        placement_id: u32,
    },
}
