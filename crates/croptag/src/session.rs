//! Scan sessions.
//!
//! A [`ScanSession`] is the in-memory list of bag tags accumulated while the
//! scan modal is open. It owns the focused input buffer, decides whether a
//! complete buffer is appended (capacity, scanner echo, in-session
//! duplicates), and keeps the serialized list that the registration form
//! submits.
//!
//! Time is passed in explicitly so the gate can be driven by a real clock, a
//! paused test clock, or a replayed log.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::epc::Epc;
use crate::wedge::{Key, KeyOutcome, WedgeBuffer};

/// Default delay between a buffer filling up and its automatic commit.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(40);

/// Default window in which a repeat of the last accepted tag is treated as a
/// scanner echo.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_millis(1200);

/// Timing knobs for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Delay before a full buffer without a terminator is committed.
    pub debounce: Duration,
    /// Repeats of the last accepted tag inside this window are dropped
    /// silently. Zero disables echo suppression.
    pub duplicate_window: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

/// Why a complete candidate was not appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The session already holds the expected number of bags.
    CapacityReached {
        /// How many tags the session holds.
        scanned: usize,
    },
    /// Same tag as the previous acceptance, inside the echo window.
    Echo(Epc),
    /// The tag is already in the session.
    Duplicate(Epc),
}

impl Rejection {
    /// The operator-facing message, or `None` for silent rejections.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::CapacityReached { scanned } => Some(format!("Already scanned {scanned} bags")),
            Self::Echo(_) => None,
            Self::Duplicate(_) => Some("EPC already scanned".to_string()),
        }
    }
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The buffer did not hold a complete EPC; nothing happened.
    NotReady,
    /// The tag was appended.
    Accepted {
        /// The appended tag.
        epc: Epc,
        /// Session size after the append.
        count: usize,
        /// Whether this append reached the expected count.
        completed: bool,
    },
    /// The tag was refused and the buffer cleared.
    Rejected(Rejection),
}

impl CommitOutcome {
    /// Whether the tag list changed.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The notice to surface to the operator, if any.
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        match self {
            Self::NotReady => None,
            Self::Accepted {
                count,
                completed: true,
                ..
            } => Some(Notice::success(format!(
                "All {count} bags scanned. Scanning stopped."
            ))),
            Self::Accepted { .. } => None,
            Self::Rejected(rejection) => rejection.message().map(Notice::warning),
        }
    }
}

/// Severity of an operator notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Neutral information.
    Info,
    /// Something completed.
    Success,
    /// A scan was refused; scanning continues.
    Warning,
    /// An operation failed.
    Error,
}

/// A transient message shown next to the scan list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Message text.
    pub text: String,
}

impl Notice {
    /// An informational notice.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    /// A success notice.
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    /// A warning notice.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    /// An error notice.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Something that shows a session to the operator.
///
/// `render` is called after every change to the tag list; `notify` for each
/// transient message.
pub trait ScanView {
    /// Redraw the tag list and the scanned-count label.
    fn render(&mut self, session: &ScanSession);

    /// Show a transient message.
    fn notify(&mut self, notice: &Notice);
}

/// The tags accumulated while one scan modal is open.
#[derive(Debug, Clone)]
pub struct ScanSession {
    epcs: Vec<Epc>,
    expected_count: u32,
    scanning: bool,
    last_accepted: Option<(Epc, Instant)>,
    input: WedgeBuffer,
    duplicate_window: Duration,
    serialized: String,
}

impl ScanSession {
    /// Open a new session with scanning enabled.
    ///
    /// `expected_count` is the operator-entered number of bags; zero means
    /// unlimited.
    #[must_use]
    pub fn open(expected_count: u32, settings: ScanSettings) -> Self {
        debug!(expected_count, "Opening scan session");
        Self {
            epcs: Vec::new(),
            expected_count,
            scanning: true,
            last_accepted: None,
            input: WedgeBuffer::new(settings.debounce),
            duplicate_window: settings.duplicate_window,
            serialized: "[]".to_string(),
        }
    }

    /// The accepted tags in scan order.
    #[must_use]
    pub fn epcs(&self) -> &[Epc] {
        &self.epcs
    }

    /// Number of accepted tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.epcs.len()
    }

    /// Whether no tag has been accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epcs.is_empty()
    }

    /// Expected number of bags; zero means unlimited.
    #[must_use]
    pub fn expected_count(&self) -> u32 {
        self.expected_count
    }

    /// Change the expected number of bags.
    ///
    /// A count at or below the number already scanned stops scanning. Tags
    /// beyond the new count are kept; see [`ScanSession::excess`].
    pub fn set_expected_count(&mut self, expected_count: u32) {
        debug!(expected_count, "Expected bag count changed");
        self.expected_count = expected_count;
        if self.scanning && self.is_full() {
            self.stop();
            info!(
                count = self.epcs.len(),
                expected_count, "Expected bag count reached, scanning stopped"
            );
        }
    }

    /// How many tags the session holds beyond the expected count.
    #[must_use]
    pub fn excess(&self) -> usize {
        if self.expected_count == 0 {
            return 0;
        }
        self.epcs.len().saturating_sub(self.expected_count as usize)
    }

    /// Whether the input channel accepts characters.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Whether the expected count is set and has been reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.expected_count > 0 && self.epcs.len() >= self.expected_count as usize
    }

    /// Stop accepting input. Clears the input buffer.
    pub fn stop(&mut self) {
        self.scanning = false;
        self.input.clear();
        debug!(count = self.epcs.len(), "Scanning stopped");
    }

    /// Resume accepting input.
    ///
    /// Returns `false` and stays stopped when the session is already full.
    pub fn resume(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.scanning = true;
        debug!(count = self.epcs.len(), "Scanning resumed");
        true
    }

    /// The focused input buffer.
    #[must_use]
    pub fn input(&self) -> &WedgeBuffer {
        &self.input
    }

    /// The JSON array of accepted tags, as submitted with the form.
    #[must_use]
    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    /// The scanned-count label, e.g. `Scanned: 2 / 3`.
    #[must_use]
    pub fn count_label(&self) -> String {
        if self.expected_count > 0 {
            format!("Scanned: {} / {}", self.epcs.len(), self.expected_count)
        } else {
            format!("Scanned: {}", self.epcs.len())
        }
    }

    /// Handle an input-change event carrying the raw field value.
    ///
    /// Ignored while scanning is stopped.
    pub fn handle_input(&mut self, raw: &str, now: Instant) {
        if self.scanning {
            self.input.on_input(raw, now);
        }
    }

    /// Handle a key event on the focused field.
    ///
    /// Returns the commit outcome when the key was a terminator, `None`
    /// otherwise (and always `None` while scanning is stopped).
    pub fn handle_key(&mut self, key: Key, now: Instant) -> Option<CommitOutcome> {
        if !self.scanning {
            return None;
        }
        match self.input.on_key(key, now) {
            KeyOutcome::Commit => Some(self.try_commit(now)),
            KeyOutcome::Suppressed => {
                trace!(?key, "Keystroke suppressed, buffer full");
                None
            }
            KeyOutcome::Edited => None,
        }
    }

    /// When a debounced commit is due, if one is scheduled.
    #[must_use]
    pub fn pending_commit(&self) -> Option<Instant> {
        if self.scanning {
            self.input.pending_commit()
        } else {
            None
        }
    }

    /// Run the debounced commit if it is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<CommitOutcome> {
        (self.scanning && self.input.is_commit_due(now)).then(|| self.try_commit(now))
    }

    /// Attempt to commit the input buffer.
    ///
    /// This is the single commit routine behind both the debounce timer and
    /// Enter/Tab, and it is safe to call repeatedly: a buffer that is not
    /// exactly one EPC long is left alone and [`CommitOutcome::NotReady`] is
    /// returned.
    pub fn try_commit(&mut self, now: Instant) -> CommitOutcome {
        match self.input.take() {
            Some(candidate) => self.admit(candidate, now),
            None => CommitOutcome::NotReady,
        }
    }

    /// Run a complete candidate through the capacity, echo and duplicate
    /// checks, appending it on success.
    pub fn admit(&mut self, candidate: Epc, now: Instant) -> CommitOutcome {
        if self.is_full() {
            debug!(epc = %candidate, scanned = self.epcs.len(), "Rejected: capacity reached");
            return CommitOutcome::Rejected(Rejection::CapacityReached {
                scanned: self.epcs.len(),
            });
        }

        if let Some((last, at)) = &self.last_accepted {
            if *last == candidate && now.saturating_duration_since(*at) < self.duplicate_window {
                trace!(epc = %candidate, "Dropped scanner echo");
                return CommitOutcome::Rejected(Rejection::Echo(candidate));
            }
        }

        if self.epcs.contains(&candidate) {
            debug!(epc = %candidate, "Rejected: already in session");
            return CommitOutcome::Rejected(Rejection::Duplicate(candidate));
        }

        self.epcs.push(candidate.clone());
        self.last_accepted = Some((candidate.clone(), now));
        self.reserialize();

        let count = self.epcs.len();
        let completed = self.is_full();
        if completed {
            self.scanning = false;
            info!(count, "Expected bag count reached, scanning stopped");
        } else {
            debug!(epc = %candidate, count, "Accepted tag");
        }

        CommitOutcome::Accepted {
            epc: candidate,
            count,
            completed,
        }
    }

    /// Remove the tag at `index` (zero-based), keeping the order of the rest.
    pub fn remove(&mut self, index: usize) -> Option<Epc> {
        if index >= self.epcs.len() {
            return None;
        }
        let removed = self.epcs.remove(index);
        self.forget_echo(&removed);
        self.reserialize();
        debug!(epc = %removed, count = self.epcs.len(), "Removed tag");
        Some(removed)
    }

    /// Remove a specific tag, keeping the order of the rest.
    pub fn remove_epc(&mut self, epc: &Epc) -> bool {
        match self.epcs.iter().position(|e| e == epc) {
            Some(index) => self.remove(index).is_some(),
            None => false,
        }
    }

    /// A removed tag may be rescanned at once.
    fn forget_echo(&mut self, removed: &Epc) {
        if self
            .last_accepted
            .as_ref()
            .is_some_and(|(last, _)| last == removed)
        {
            self.last_accepted = None;
        }
    }

    fn reserialize(&mut self) {
        // A list of hex strings always serializes.
        let json = serde_json::to_string(&self.epcs);
        debug_assert!(json.is_ok(), "tag list failed to serialize");
        if let Ok(json) = json {
            self.serialized = json;
        }
    }
}
