//! The scan modal's event loop.
//!
//! A [`ScanController`] owns a [`ScanSession`] and a [`ScanView`]. It reads
//! [`InputEvent`]s from a channel, feeds them to the session, fires the
//! debounced commit when its deadline passes, and redraws the view whenever
//! the tag list changes. The loop ends when the operator submits or closes
//! the modal; the session is kept so a failed submission can re-enter it.
//!
//! While a registration is in flight, [`ScanController::submit`] keeps
//! reading the channel: further submits are refused and everything else is
//! held back until the request completes.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::registration::{
    Receipt, RegistrationBackend, RegistrationRequest, SubmitError, Submitter,
};
use crate::session::{CommitOutcome, Notice, ScanSession, ScanView};
use crate::wedge::Key;

/// Something the operator (or the scanner) did while the modal is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key on the focused field.
    Key(Key),
    /// The field value changed (paste or programmatic set).
    Input(String),
    /// Remove the tag at this zero-based position.
    Remove(usize),
    /// Stop accepting input.
    Stop,
    /// Resume accepting input.
    Resume,
    /// Change the expected bag count.
    SetExpected(u32),
    /// Redraw the list.
    List,
    /// Submit the registration form.
    Submit,
    /// Close the modal.
    Close,
}

/// Why [`ScanController::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The operator asked to submit.
    Submit,
    /// The operator closed the modal or the input ended.
    Closed,
}

/// Drives a scan session from an event channel.
#[derive(Debug)]
pub struct ScanController<V> {
    session: ScanSession,
    view: V,
    held: VecDeque<InputEvent>,
}

impl<V: ScanView> ScanController<V> {
    /// Pair a session with a view.
    pub fn new(session: ScanSession, view: V) -> Self {
        Self {
            session,
            view,
            held: VecDeque::new(),
        }
    }

    /// The session being driven.
    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// The view.
    pub fn view(&self) -> &V {
        &self.view
    }

    /// Split into session and view.
    pub fn into_parts(self) -> (ScanSession, V) {
        (self.session, self.view)
    }

    /// Redraw the view.
    pub fn render(&mut self) {
        self.view.render(&self.session);
    }

    /// Show a notice through the view.
    pub fn notify(&mut self, notice: &Notice) {
        self.view.notify(notice);
    }

    /// Process events until the operator submits or closes.
    ///
    /// A dropped sender counts as a close.
    pub async fn run(&mut self, events: &mut mpsc::Receiver<InputEvent>) -> ExitReason {
        while let Some(event) = self.held.pop_front() {
            if let Some(exit) = self.handle(event, now()) {
                return exit;
            }
        }

        loop {
            let deadline = self.session.pending_commit();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Input channel closed");
                        return ExitReason::Closed;
                    };
                    if let Some(exit) = self.handle(event, now()) {
                        return exit;
                    }
                }
                () = wait_until(deadline) => {
                    if let Some(outcome) = self.session.poll(now()) {
                        trace!("Debounced commit fired");
                        self.apply(&outcome);
                    }
                }
            }
        }
    }

    /// Apply one event at `now`.
    ///
    /// Returns the exit reason for [`InputEvent::Submit`] and
    /// [`InputEvent::Close`], `None` for everything else.
    pub fn handle(&mut self, event: InputEvent, now: Instant) -> Option<ExitReason> {
        match event {
            InputEvent::Key(key) => {
                if let Some(outcome) = self.session.handle_key(key, now) {
                    self.apply(&outcome);
                }
            }
            InputEvent::Input(raw) => self.session.handle_input(&raw, now),
            InputEvent::Remove(index) => match self.session.remove(index) {
                Some(epc) => {
                    self.render();
                    self.notify(&Notice::info(format!("Removed {}", epc.short())));
                }
                None => self.notify(&Notice::warning(format!("No tag at position {}", index + 1))),
            },
            InputEvent::Stop => {
                self.session.stop();
                self.notify(&Notice::info("Scanning stopped."));
            }
            InputEvent::Resume => {
                if self.session.resume() {
                    self.notify(&Notice::info("Scanning resumed."));
                } else {
                    self.notify(&Notice::warning(format!(
                        "Already scanned {} bags",
                        self.session.len()
                    )));
                }
            }
            InputEvent::SetExpected(count) => {
                self.session.set_expected_count(count);
                self.render();
                let excess = self.session.excess();
                if excess > 0 {
                    self.notify(&Notice::warning(format!(
                        "Scanned {} bags but only {count} expected. Remove {excess} to continue.",
                        self.session.len()
                    )));
                } else if self.session.is_full() {
                    self.notify(&Notice::success(format!(
                        "All {count} bags scanned. Scanning stopped."
                    )));
                }
            }
            InputEvent::List => self.render(),
            InputEvent::Submit => return Some(ExitReason::Submit),
            InputEvent::Close => return Some(ExitReason::Closed),
        }
        None
    }

    /// Send a registration while still listening to the operator.
    ///
    /// A submit that arrives before the request completes is refused with
    /// the in-flight notice. Other events are held and replayed by the next
    /// [`ScanController::run`], so edits never race the request.
    pub async fn submit<B: RegistrationBackend>(
        &mut self,
        submitter: &Submitter<B>,
        request: &RegistrationRequest,
        events: &mut mpsc::Receiver<InputEvent>,
    ) -> Result<Receipt, SubmitError> {
        let send = submitter.send(request);
        tokio::pin!(send);
        let mut listening = true;

        loop {
            tokio::select! {
                result = &mut send => return result,
                event = events.recv(), if listening => match event {
                    Some(InputEvent::Submit) => {
                        debug!("Submit refused, registration in flight");
                        self.notify(&SubmitError::InFlight.notice());
                    }
                    Some(event) => self.held.push_back(event),
                    None => listening = false,
                },
            }
        }
    }

    fn apply(&mut self, outcome: &CommitOutcome) {
        if outcome.is_accepted() {
            self.render();
        }
        if let Some(notice) = outcome.notice() {
            self.notify(&notice);
        }
    }
}

/// The current time on tokio's clock, so paused test clocks apply.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
