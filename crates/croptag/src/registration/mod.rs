//! Batch registration.
//!
//! Once a session holds every bag of a packaging batch, the form fields and
//! the ordered tag list are validated together and sent to the backend as a
//! single request. A [`Submitter`] guarantees that at most one request is in
//! flight at a time and never touches the session, so a failed attempt can be
//! retried without rescanning.

pub mod http;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::epc::Epc;
use crate::session::{Notice, ScanSession};

pub use http::HttpBackend;

/// Date format used by the form fields and on the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shown when the backend gives no message of its own.
pub const GENERIC_FAILURE: &str = "Registration failed. Please try again.";

/// Shown on success when the backend gives no message of its own.
pub const GENERIC_SUCCESS: &str = "Bags registered successfully.";

/// Reasons the form cannot be submitted yet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormError {
    /// A required field is empty.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A date field is not `YYYY-MM-DD`.
    #[error("{field} must be a date (YYYY-MM-DD), got {value:?}")]
    InvalidDate {
        /// Field label.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A numeric field is not a valid number.
    #[error("{field} must be {expected}, got {value:?}")]
    InvalidNumber {
        /// Field label.
        field: &'static str,
        /// What kind of number was expected.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The expiry date precedes the packaging date.
    #[error("expiry date {expiry} is before packaging date {packaging}")]
    ExpiryBeforePackaging {
        /// Packaging date.
        packaging: NaiveDate,
        /// Expiry date.
        expiry: NaiveDate,
    },

    /// No tag has been scanned.
    #[error("scan at least one bag before registering")]
    NoEpcs,

    /// The number of scanned tags differs from the bag count.
    #[error("please scan exactly {required} bags (currently {scanned})")]
    CountMismatch {
        /// Bags expected.
        required: u32,
        /// Bags scanned.
        scanned: usize,
    },
}

/// Who is registering, attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// Station or browser session identifier.
    pub session_id: String,
    /// Logged-in user, when known.
    pub user_id: Option<String>,
}

impl Operator {
    /// Build an operator, generating a session id when none is configured.
    #[must_use]
    pub fn new(session_id: Option<String>, user_id: Option<String>) -> Self {
        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(generate_session_id);
        Self {
            session_id,
            user_id: user_id.filter(|s| !s.trim().is_empty()),
        }
    }
}

fn generate_session_id() -> String {
    format!(
        "croptag-{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}

/// The registration form fields as entered by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationForm {
    /// Crop identifier.
    pub crop_id: String,
    /// Crop display name (optional).
    pub crop_name: String,
    /// Packaging date, `YYYY-MM-DD`.
    pub packaging_date: String,
    /// Expiry date, `YYYY-MM-DD`.
    pub expiry_date: String,
    /// Capacity of each bag (e.g. kilograms).
    pub bag_capacity: String,
    /// Number of bags in the batch.
    pub total_bags: String,
}

impl RegistrationForm {
    /// The bag count as a number, if it parses.
    ///
    /// Used to size a scan session before the form is complete.
    #[must_use]
    pub fn expected_count(&self) -> Option<u32> {
        self.total_bags.trim().parse().ok()
    }

    /// Validate the form against a session and build the request.
    ///
    /// # Errors
    ///
    /// Returns the first [`FormError`] found: missing fields in form order,
    /// then malformed values, then an empty or incomplete tag list.
    pub fn validate(
        &self,
        operator: &Operator,
        session: &ScanSession,
    ) -> Result<RegistrationRequest, FormError> {
        let crop_id = required(&self.crop_id, "crop id")?;
        let packaging_raw = required(&self.packaging_date, "packaging date")?;
        let expiry_raw = required(&self.expiry_date, "expiry date")?;
        let capacity_raw = required(&self.bag_capacity, "bag capacity")?;
        let total_raw = required(&self.total_bags, "total bags")?;

        let packaging_date = parse_date(packaging_raw, "packaging date")?;
        let expiry_date = parse_date(expiry_raw, "expiry date")?;
        if expiry_date < packaging_date {
            return Err(FormError::ExpiryBeforePackaging {
                packaging: packaging_date,
                expiry: expiry_date,
            });
        }

        let bag_capacity = capacity_raw
            .parse::<f64>()
            .ok()
            .filter(|c| c.is_finite() && *c > 0.0)
            .ok_or_else(|| FormError::InvalidNumber {
                field: "bag capacity",
                expected: "a positive number",
                value: capacity_raw.to_string(),
            })?;

        let total_bags = total_raw
            .parse::<u32>()
            .map_err(|_| FormError::InvalidNumber {
                field: "total bags",
                expected: "a whole number",
                value: total_raw.to_string(),
            })?;

        if session.is_empty() {
            return Err(FormError::NoEpcs);
        }

        if total_bags > 0 && session.len() != total_bags as usize {
            return Err(FormError::CountMismatch {
                required: total_bags,
                scanned: session.len(),
            });
        }

        let crop_name = self.crop_name.trim();
        Ok(RegistrationRequest {
            session_id: operator.session_id.clone(),
            user_id: operator.user_id.clone(),
            crop_id: crop_id.to_string(),
            crop_name: (!crop_name.is_empty()).then(|| crop_name.to_string()),
            packaging_date,
            expiry_date,
            bag_capacity,
            total_bags,
            epcs: session.epcs().to_vec(),
        })
    }
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, FormError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(FormError::Missing(field))
    } else {
        Ok(trimmed)
    }
}

fn parse_date(value: &str, field: &'static str) -> Result<NaiveDate, FormError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| FormError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// The registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Station or browser session identifier.
    pub session_id: String,
    /// Logged-in user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Crop identifier.
    pub crop_id: String,
    /// Crop display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_name: Option<String>,
    /// Packaging date.
    pub packaging_date: NaiveDate,
    /// Expiry date.
    pub expiry_date: NaiveDate,
    /// Capacity of each bag.
    pub bag_capacity: f64,
    /// Number of bags in the batch.
    pub total_bags: u32,
    /// Tags in scan order.
    pub epcs: Vec<Epc>,
}

impl RegistrationRequest {
    /// BLAKE3 fingerprint of the ordered tag list.
    #[must_use]
    pub fn batch_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for epc in &self.epcs {
            hasher.update(epc.as_str().as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// The backend's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Whether the batch was registered.
    #[serde(default, alias = "success")]
    pub ok: bool,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Failures talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The server answered with a non-success status.
    #[error("server returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, if any.
        message: Option<String>,
    },

    /// A success status with a body that is not a registration response.
    #[error("unexpected response body: {0}")]
    InvalidBody(String),

    /// The request never got an answer.
    #[error("request failed: {0}")]
    Transport(String),
}

/// The registration endpoint.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    /// Send one registration request.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on transport failure or a non-success
    /// HTTP status. An `ok: false` body is returned as `Ok`.
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, BackendError>;
}

/// Why a submission did not register the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    /// The form or session is incomplete.
    #[error(transparent)]
    Invalid(#[from] FormError),

    /// A submission is already in flight.
    #[error("a registration is already in progress")]
    InFlight,

    /// The backend refused the batch.
    #[error("registration rejected: {message}")]
    Rejected {
        /// Message to show.
        message: String,
    },

    /// The backend could not be reached.
    #[error("registration failed: {message}")]
    Transport {
        /// Message to show.
        message: String,
    },
}

impl SubmitError {
    /// The inline message for the operator.
    #[must_use]
    pub fn notice(&self) -> Notice {
        match self {
            Self::Invalid(err) => Notice::warning(capitalize(&err.to_string())),
            Self::InFlight => Notice::info("Registration already in progress."),
            Self::Rejected { message } | Self::Transport { message } => Notice::error(message),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Confirmation of a registered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Message to show.
    pub message: String,
    /// Number of bags registered.
    pub bags: usize,
}

impl Receipt {
    /// The confirmation notice.
    #[must_use]
    pub fn notice(&self) -> Notice {
        Notice::success(&self.message)
    }
}

/// Sends registrations, one at a time.
///
/// The in-flight flag plays the part of the disabled submit button: it is set
/// for the duration of a call and cleared when the call completes, whatever
/// the outcome.
#[derive(Debug)]
pub struct Submitter<B> {
    backend: B,
    in_flight: AtomicBool,
}

impl<B: RegistrationBackend> Submitter<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Validate the form against the session and send it.
    ///
    /// The session is only read; it is never modified here.
    ///
    /// # Errors
    ///
    /// See [`SubmitError`].
    pub async fn submit(
        &self,
        form: &RegistrationForm,
        operator: &Operator,
        session: &ScanSession,
    ) -> Result<Receipt, SubmitError> {
        let request = form.validate(operator, session)?;
        self.send(&request).await
    }

    /// Send an already-validated request.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::InFlight`] if another call has not completed,
    /// [`SubmitError::Rejected`] for a non-success status or `ok: false`, and
    /// [`SubmitError::Transport`] when the backend could not be reached.
    pub async fn send(&self, request: &RegistrationRequest) -> Result<Receipt, SubmitError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Submission ignored, another is in flight");
            return Err(SubmitError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        info!(
            crop_id = %request.crop_id,
            bags = request.epcs.len(),
            "Submitting registration"
        );

        match self.backend.register(request).await {
            Ok(response) if response.ok => {
                let message = non_empty(response.message).unwrap_or_else(|| GENERIC_SUCCESS.to_string());
                info!(bags = request.epcs.len(), "Registration accepted");
                Ok(Receipt {
                    message,
                    bags: request.epcs.len(),
                })
            }
            Ok(response) => {
                warn!(reason = ?response.message, "Registration refused by server");
                Err(SubmitError::Rejected {
                    message: non_empty(response.message).unwrap_or_else(|| GENERIC_FAILURE.to_string()),
                })
            }
            Err(BackendError::Status { status, message }) => {
                warn!(status, reason = ?message, "Registration failed with HTTP error");
                Err(SubmitError::Rejected {
                    message: non_empty(message).unwrap_or_else(|| GENERIC_FAILURE.to_string()),
                })
            }
            Err(err) => {
                warn!(error = %err, "Registration request failed");
                Err(SubmitError::Transport {
                    message: GENERIC_FAILURE.to_string(),
                })
            }
        }
    }
}

fn non_empty(message: Option<String>) -> Option<String> {
    message.filter(|m| !m.trim().is_empty())
}

/// Clears the in-flight flag when the call completes.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
