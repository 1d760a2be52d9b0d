//! `croptag` - RFID bag scanning and batch registration for crop packing stations
//!
//! A keyboard-wedge RFID reader types each bag's EPC into a focused field.
//! This library turns that keystroke stream into a clean, de-duplicated,
//! capacity-bounded list of tags, and registers the list together with the
//! batch form at the marketplace backend.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod console;
pub mod epc;
pub mod error;
pub mod logging;
pub mod registration;
pub mod scanner;
pub mod session;
pub mod storage;
pub mod wedge;

pub use config::Config;
pub use epc::{normalize, Epc, EpcError, EPC_LEN};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use registration::{
    HttpBackend, Operator, RegistrationBackend, RegistrationForm, RegistrationRequest,
    Submitter, SubmitError,
};
pub use scanner::{ExitReason, InputEvent, ScanController};
pub use session::{CommitOutcome, Notice, Rejection, ScanSession, ScanSettings, ScanView};
pub use storage::{RegistrationRecord, RegistrationStatus, Storage, StorageStats};
pub use wedge::{Key, WedgeBuffer};
