use crate::{availability::SlotSettings, error::ValidationError};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

pub const MINUTES_PER_DAY: i32 = 24 * 60;

lazy_static! {
    static ref TIME_OF_DAY: Regex = Regex::new(r"^([01][0-9]|2[0-3]):([0-5][0-9])$").unwrap();
}

/// Parses "HH:MM" into minutes since midnight.
pub fn parse_time_of_day(value: &str) -> Result<i32, ValidationError> {
    let captures = TIME_OF_DAY
        .captures(value.trim())
        .ok_or_else(|| ValidationError::MalformedTime(value.into()))?;

    let hours: i32 = captures[1]
        .parse()
        .map_err(|_| ValidationError::MalformedTime(value.into()))?;
    let minutes: i32 = captures[2]
        .parse()
        .map_err(|_| ValidationError::MalformedTime(value.into()))?;
    Ok(hours * 60 + minutes)
}

/// Like [`parse_time_of_day`] but also accepts "24:00", so a day can close
/// at midnight.
pub fn parse_closing_time(value: &str) -> Result<i32, ValidationError> {
    match value.trim() {
        "24:00" => Ok(MINUTES_PER_DAY),
        _ => parse_time_of_day(value),
    }
}

pub fn format_time_of_day(minutes: i32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Blocked,
    Free,
}

impl AppointmentStatus {
    /// Cancelled appointments are kept for history but release their time.
    pub fn occupies_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    /// Status a freshly created appointment may start in.
    pub fn is_initial(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Blocked
        )
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Blocked, Cancelled)
                | (Free, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Blocked => "blocked",
            AppointmentStatus::Free => "free",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "blocked" => Ok(AppointmentStatus::Blocked),
            "free" => Ok(AppointmentStatus::Free),
            other => Err(format!("Unknown appointment status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    pub id: Uuid,
    pub name: String,
    pub settings: SlotSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEstablishment {
    pub name: String,
    pub settings: SlotSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    pub display_role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfessional {
    pub establishment_id: Uuid,
    pub name: String,
    pub display_role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    /// Older catalog entries may lack a duration.
    pub duration_minutes: Option<i32>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewService {
    pub establishment_id: Uuid,
    pub name: String,
    pub duration_minutes: Option<i32>,
    pub price_cents: i64,
}

impl NewService {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.duration_minutes {
            Some(duration) if duration <= 0 => Err(ValidationError::InvalidDuration(duration)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub professional_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    /// `None` for records written without a resolved duration.
    pub duration_minutes: Option<i32>,
    pub date: NaiveDate,
    pub start_minutes: i32,
    pub status: AppointmentStatus,
    pub customer_name: String,
    pub notes: String,
}

/// Appointment ready to be committed. The duration is always resolved here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub establishment_id: Uuid,
    pub professional_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub duration_minutes: i32,
    pub date: NaiveDate,
    pub start_minutes: i32,
    pub status: AppointmentStatus,
    pub customer_name: String,
    pub notes: String,
}

impl NewAppointment {
    pub fn into_appointment(self, id: Uuid) -> Appointment {
        Appointment {
            id,
            establishment_id: self.establishment_id,
            professional_id: self.professional_id,
            service_id: self.service_id,
            service_name: self.service_name,
            duration_minutes: Some(self.duration_minutes),
            date: self.date,
            start_minutes: self.start_minutes,
            status: self.status,
            customer_name: self.customer_name,
            notes: self.notes,
        }
    }
}
