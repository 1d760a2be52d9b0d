//! Keyboard-wedge input buffer.
//!
//! A wedge scanner types the tag identifier into whatever field has focus,
//! one character at a time, sometimes followed by Enter or Tab and sometimes
//! not at all. [`WedgeBuffer`] models that focused field: it keeps the
//! normalized contents, suppresses keystrokes past the EPC length, and
//! tracks when a full buffer should be committed.
//!
//! The buffer never commits anything itself. It reports a pending deadline
//! (for scanners that send no terminator) or a [`KeyOutcome::Commit`] (for
//! Enter/Tab), and the owner calls its single commit routine in both cases.

use std::time::{Duration, Instant};

use crate::epc::{normalize, Epc, EPC_LEN};

/// A key event delivered to the focused scan field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character.
    Char(char),
    /// Enter / Return.
    Enter,
    /// Tab.
    Tab,
    /// Backspace.
    Backspace,
    /// Forward delete.
    Delete,
}

impl Key {
    /// Whether this key terminates a scan.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Enter | Self::Tab)
    }
}

/// What happened to the buffer after a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The buffer contents were (possibly) edited.
    Edited,
    /// The keystroke was swallowed because the buffer is already full.
    Suppressed,
    /// A terminator was pressed: any pending commit was cancelled and the
    /// owner should attempt a commit now.
    Commit,
}

/// The normalized contents of the focused scan field.
#[derive(Debug, Clone)]
pub struct WedgeBuffer {
    text: String,
    debounce: Duration,
    commit_at: Option<Instant>,
}

impl WedgeBuffer {
    /// Create an empty buffer that waits `debounce` after the buffer fills
    /// before a commit becomes due.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            text: String::with_capacity(EPC_LEN),
            debounce,
            commit_at: None,
        }
    }

    /// Current normalized contents.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the buffer holds a complete EPC.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.text.len() == EPC_LEN
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The configured debounce delay.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// When the scheduled commit becomes due, if one is scheduled.
    #[must_use]
    pub fn pending_commit(&self) -> Option<Instant> {
        self.commit_at
    }

    /// Whether a scheduled commit is due at `now`.
    #[must_use]
    pub fn is_commit_due(&self, now: Instant) -> bool {
        self.commit_at.is_some_and(|at| now >= at)
    }

    /// Handle an input-change event carrying the raw field value.
    ///
    /// The value is normalized; a full buffer (re)schedules a commit for
    /// `now + debounce`, anything shorter cancels a scheduled one.
    pub fn on_input(&mut self, raw: &str, now: Instant) {
        self.text = normalize(raw);
        self.commit_at = self.is_complete().then(|| now + self.debounce);
    }

    /// Handle a key event.
    pub fn on_key(&mut self, key: Key, now: Instant) -> KeyOutcome {
        match key {
            Key::Enter | Key::Tab => {
                self.commit_at = None;
                KeyOutcome::Commit
            }
            Key::Char(_) if self.is_complete() => KeyOutcome::Suppressed,
            Key::Char(c) => {
                let mut raw = self.text.clone();
                raw.push(c);
                self.on_input(&raw, now);
                KeyOutcome::Edited
            }
            Key::Backspace => {
                let mut raw = self.text.clone();
                raw.pop();
                self.on_input(&raw, now);
                KeyOutcome::Edited
            }
            // The caret sits at the end of the field, so forward delete has
            // nothing to remove.
            Key::Delete => KeyOutcome::Edited,
        }
    }

    /// Take the buffered EPC if the buffer is complete.
    ///
    /// Returns `None` and leaves the buffer untouched when it is not exactly
    /// [`EPC_LEN`] characters long. On success the buffer is cleared.
    pub fn take(&mut self) -> Option<Epc> {
        let epc = Epc::from_normalized(&self.text)?;
        self.clear();
        Some(epc)
    }

    /// Clear the buffer and cancel any scheduled commit.
    pub fn clear(&mut self) {
        self.text.clear();
        self.commit_at = None;
    }
}

impl Default for WedgeBuffer {
    fn default() -> Self {
        Self::new(Duration::from_millis(40))
    }
}
