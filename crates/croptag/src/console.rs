//! Terminal front-end for the scan modal.
//!
//! A keyboard-wedge reader types the tag and presses Enter, so each line read
//! from stdin is replayed as one keystroke per character followed by
//! [`Key::Enter`]. Lines starting with `:` are operator commands.

use std::io::Write;

use thiserror::Error;

use crate::scanner::InputEvent;
use crate::session::{Notice, NoticeLevel, ScanSession, ScanView};
use crate::wedge::Key;

/// Help text for the operator commands.
pub const COMMAND_HELP: &str = "\
Commands:
  :list        show the scanned tags
  :rm N        remove tag number N
  :stop        stop scanning
  :resume      resume scanning
  :total N     change the expected bag count (0 = unlimited)
  :submit      register the batch
  :quit        close without registering";

/// An operator command that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// Not a known command.
    #[error("unknown command ':{0}' (try :help)")]
    UnknownCommand(String),

    /// The command needs an argument.
    #[error(":{command} needs a number")]
    MissingArgument {
        /// Command name.
        command: &'static str,
    },

    /// The argument is not a usable number.
    #[error("':{command}' expects a number, got '{value}'")]
    InvalidNumber {
        /// Command name.
        command: &'static str,
        /// What was given.
        value: String,
    },

    /// The operator asked for help.
    #[error("{}", COMMAND_HELP)]
    Help,
}

/// Turn one line of terminal input into events.
///
/// # Errors
///
/// Returns a [`LineError`] for malformed `:` commands (and for `:help`, whose
/// message is the command list).
pub fn parse_line(line: &str) -> Result<Vec<InputEvent>, LineError> {
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(command) = line.trim_start().strip_prefix(':') else {
        let mut events: Vec<InputEvent> = line
            .chars()
            .map(|c| match c {
                '\t' => InputEvent::Key(Key::Tab),
                c => InputEvent::Key(Key::Char(c)),
            })
            .collect();
        events.push(InputEvent::Key(Key::Enter));
        return Ok(events);
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    let event = match name {
        "list" | "ls" => InputEvent::List,
        "rm" | "remove" => {
            let position = number("rm", arg)?;
            if position == 0 {
                return Err(LineError::InvalidNumber {
                    command: "rm",
                    value: "0".to_string(),
                });
            }
            InputEvent::Remove(position - 1)
        }
        "stop" => InputEvent::Stop,
        "resume" => InputEvent::Resume,
        "total" => {
            let count = number("total", arg)?;
            let count = u32::try_from(count).map_err(|_| LineError::InvalidNumber {
                command: "total",
                value: count.to_string(),
            })?;
            InputEvent::SetExpected(count)
        }
        "submit" => InputEvent::Submit,
        "quit" | "q" | "close" => InputEvent::Close,
        "help" | "h" => return Err(LineError::Help),
        other => return Err(LineError::UnknownCommand(other.to_string())),
    };
    Ok(vec![event])
}

fn number(command: &'static str, arg: Option<&str>) -> Result<usize, LineError> {
    let value = arg.ok_or(LineError::MissingArgument { command })?;
    value.parse().map_err(|_| LineError::InvalidNumber {
        command,
        value: value.to_string(),
    })
}

/// Draws the scan list on a writer (stdout in the binary).
#[derive(Debug)]
pub struct ConsoleView<W> {
    out: W,
}

impl ConsoleView<std::io::Stdout> {
    /// A view on standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleView<W> {
    /// A view on any writer.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// The underlying writer.
    pub fn writer(&self) -> &W {
        &self.out
    }

    fn write_render(&mut self, session: &ScanSession) -> std::io::Result<()> {
        writeln!(self.out)?;
        if session.is_empty() {
            writeln!(self.out, "  (no tags scanned)")?;
        }
        for (i, epc) in session.epcs().iter().enumerate() {
            writeln!(self.out, "  {:>3}. {epc}", i + 1)?;
        }
        let state = if session.is_scanning() { "" } else { " (stopped)" };
        writeln!(self.out, "{}{state}", session.count_label())?;
        self.out.flush()
    }
}

impl<W: Write> ScanView for ConsoleView<W> {
    fn render(&mut self, session: &ScanSession) {
        if let Err(e) = self.write_render(session) {
            tracing::warn!(error = %e, "Failed to draw scan list");
        }
    }

    fn notify(&mut self, notice: &Notice) {
        let tag = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => " ok ",
            NoticeLevel::Warning => "warn",
            NoticeLevel::Error => "FAIL",
        };
        let written = writeln!(self.out, "[{tag}] {notice}").and_then(|()| self.out.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "Failed to show notice");
        }
    }
}
