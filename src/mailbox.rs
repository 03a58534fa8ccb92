//! Mailboxes decouple the UI, IO, and renderer threads (§4.5/§5). Each
//! mailbox is a bounded or unbounded `crossbeam_channel`; pushes are
//! normally non-blocking, with an explicit blocking fallback used only at
//! the one call site (`message_writer`, see `terminal::state`) that needs
//! backpressure without holding the renderer-state mutex across the send.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;

use crate::config::CoreConfig;
use crate::terminal::color::Color;

/// Tag distinguishing how a `WriteAlloc` buffer was sourced, mirroring the
/// teacher's split between borrowed static replies (DA/DSR canned strings)
/// and heap-owned buffers (decoded clipboard payloads, DECRQSS responses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocTag {
    /// Built by formatting a response string at dispatch time.
    Formatted,
    /// Decoded from a base64 OSC payload.
    Decoded,
}

/// The message taxonomy in SPEC_FULL.md §6, shared by the UI→IO,
/// UI→renderer, and IO→UI mailboxes. Not every variant is meaningful on
/// every mailbox; callers only construct the ones relevant to the channel
/// they're pushing into.
#[derive(Debug, Clone)]
pub enum Message {
    /// Up to a few dozen bytes, inlined to avoid a heap allocation for the
    /// common case (single keypress, short escape reply).
    WriteSmall(Vec<u8>),
    /// A borrowed `'static` slice — canned DA/DSR replies that live in a
    /// `const` table.
    WriteStable(&'static [u8]),
    /// A heap-owned buffer, e.g. a decoded OSC 52 clipboard write.
    WriteAlloc { data: Vec<u8>, tag: AllocTag },
    Resize { rows: u16, cols: u16 },
    ChangeConfig(std::sync::Arc<CoreConfig>),
    Inspector(bool),
    ResetCursorBlink,
    ForegroundColor(Color),
    BackgroundColor(Color),
    CursorColor(Color),
    SetTitle(String),
    SetMouseShape(String),
    /// UI is asked to read the system clipboard and reply with the text.
    ClipboardRead,
    /// UI is asked to write `data` to the system clipboard, subject to the
    /// configured `clipboard-write` policy.
    ClipboardWrite(Vec<u8>),
    DesktopNotification { title: String, body: String },
    ChildExited { exit_code: Option<i32> },
    Close,
}

impl Message {
    pub fn write_small(data: Vec<u8>) -> Self {
        Message::WriteSmall(data)
    }

    pub fn write_stable(data: &'static [u8]) -> Self {
        Message::WriteStable(data)
    }

    pub fn write_alloc(data: Vec<u8>, tag: AllocTag) -> Self {
        Message::WriteAlloc { data, tag }
    }
}

/// A single mailbox: an MPMC channel plus the push discipline §5 calls for
/// (non-blocking by default, blocking fallback only when a caller has
/// already released whatever lock it was holding).
#[derive(Clone)]
pub struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Mailbox<T> {
    /// Bounded mailbox. `capacity` should be generous enough that a burst of
    /// ordinary traffic never blocks the non-blocking path.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Non-blocking push. Returns the message back on contention (channel
    /// full) or disconnection so the caller can decide: drop it, or fall
    /// back to `push_blocking` after releasing any lock it holds.
    pub fn try_push(&self, msg: T) -> Result<(), T> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(m)) => Err(m),
            Err(TrySendError::Disconnected(m)) => Err(m),
        }
    }

    /// Blocking push. Callers MUST NOT hold the renderer-state mutex while
    /// calling this — see `message_writer`'s release-push-reacquire dance.
    pub fn push_blocking(&self, msg: T) {
        let _ = self.tx.send(msg);
    }

    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(m) => Some(m),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything currently queued without blocking. Used by the IO
    /// thread's writer-mailbox drainer and the UI thread's event pump.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(m) = self.try_pop() {
            out.push(m);
        }
        out
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(m) => Some(m),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_push_then_drain_preserves_fifo_order() {
        let mbox: Mailbox<u32> = Mailbox::unbounded();
        for i in 0..10 {
            mbox.try_push(i).unwrap();
        }
        assert_eq!(mbox.drain(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_mailbox_returns_message_when_full() {
        let mbox: Mailbox<u32> = Mailbox::bounded(1);
        mbox.try_push(1).unwrap();
        let err = mbox.try_push(2);
        assert_eq!(err, Err(2));
    }
}
