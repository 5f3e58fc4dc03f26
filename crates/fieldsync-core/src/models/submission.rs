//! Queued submission model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

use super::photo::{PhotoStatus, QueuedPhoto};

/// Client-generated identifier for a submission, using UUID v7 (time-sortable)
///
/// Also serves as the idempotency key for the remote create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a queued submission.
///
/// Legal edges: `pending -> syncing`, `failed -> syncing`,
/// `syncing -> synced`, `syncing -> failed`. `synced` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SubmissionStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Syncing, Self::Synced, Self::Failed];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Failed, Self::Syncing)
                | (Self::Syncing, Self::Synced | Self::Failed)
        )
    }

    /// States that may legally precede `next`.
    pub fn predecessors(next: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!("unknown submission status '{other}'"))),
        }
    }
}

/// GPS fix recorded at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in metres, when the device reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl GpsCoordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::Validation(format!(
                "latitude {} is out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::Validation(format!(
                "longitude {} is out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Infringement details captured in the field.
///
/// The sync engine passes this through to the server untouched once it
/// has been validated at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub vehicle_registration: String,
    pub offence_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_licence: Option<String>,
    /// Free-text location description
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GpsCoordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SubmissionPayload {
    /// Create a payload with the required fields.
    pub fn new(
        vehicle_registration: impl Into<String>,
        offence_code: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            vehicle_registration: vehicle_registration.into(),
            offence_code: offence_code.into(),
            driver_licence: None,
            location: location.into(),
            coordinates: None,
            notes: None,
        }
    }

    #[must_use]
    pub fn with_driver_licence(mut self, licence: impl Into<String>) -> Self {
        self.driver_licence = Some(licence.into());
        self
    }

    #[must_use]
    pub const fn with_coordinates(mut self, coordinates: GpsCoordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Trim all text fields and reject payloads missing required values.
    pub fn normalized(self) -> Result<Self> {
        let vehicle_registration = required(self.vehicle_registration, "vehicle registration")?;
        let offence_code = required(self.offence_code, "offence code")?;
        let location = required(self.location, "location")?;

        if let Some(coordinates) = &self.coordinates {
            coordinates.validate()?;
        }

        Ok(Self {
            vehicle_registration: vehicle_registration.to_uppercase(),
            offence_code,
            driver_licence: normalize_text_option(self.driver_licence),
            location,
            coordinates: self.coordinates,
            notes: normalize_text_option(self.notes),
        })
    }
}

fn required(value: String, field: &str) -> Result<String> {
    normalize_text_option(Some(value))
        .ok_or_else(|| Error::Validation(format!("{field} is required")))
}

/// One locally captured infringement awaiting or undergoing delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub local_id: LocalId,
    /// Assigned once, on the first successful remote create
    pub server_id: Option<String>,
    /// Human-facing record number returned alongside `server_id`
    pub record_number: Option<String>,
    pub payload: SubmissionPayload,
    pub photos: Vec<QueuedPhoto>,
    pub status: SubmissionStatus,
    /// Total attempts ever started; never reset
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Cleared when the last failure was permanent
    pub retryable: bool,
    /// Earliest time (Unix ms) an automatic retry may start
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
}

impl QueuedSubmission {
    /// Whether an automatic drain at `now` should attempt this item.
    pub fn is_due(&self, now: i64, max_attempts: u32) -> bool {
        match self.status {
            SubmissionStatus::Pending => true,
            SubmissionStatus::Failed => {
                self.retryable
                    && self.attempts < max_attempts
                    && self.next_attempt_at.map_or(true, |at| at <= now)
            }
            SubmissionStatus::Syncing | SubmissionStatus::Synced => false,
        }
    }

    /// Photos that still need to be uploaded, in capture order.
    pub fn photos_to_upload(&self) -> impl Iterator<Item = &QueuedPhoto> {
        self.photos
            .iter()
            .filter(|photo| photo.status != PhotoStatus::Uploaded)
    }
}
