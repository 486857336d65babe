//! Slot availability for a single professional on a single day.
//!
//! All times are minutes since midnight in the establishment's local time.
//! Intervals are half-open, so an appointment ending at 10:00 does not block
//! one starting at 10:00.

use crate::{
    error::ValidationError,
    types::{Appointment, MINUTES_PER_DAY},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OPENING_MINUTES: i32 = 8 * 60;
pub const DEFAULT_CLOSING_MINUTES: i32 = 20 * 60;
pub const DEFAULT_GRANULARITY_MINUTES: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingWindow {
    pub start_minutes: i32,
    pub end_minutes: i32,
}

impl Default for OperatingWindow {
    /// 08:00 to 20:00
    fn default() -> Self {
        Self {
            start_minutes: DEFAULT_OPENING_MINUTES,
            end_minutes: DEFAULT_CLOSING_MINUTES,
        }
    }
}

impl OperatingWindow {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start_minutes < 0
            || self.end_minutes > MINUTES_PER_DAY
            || self.end_minutes <= self.start_minutes
        {
            return Err(ValidationError::InvalidWindow {
                start: self.start_minutes,
                end: self.end_minutes,
            });
        }
        Ok(())
    }

    pub fn fits(&self, start: i32, duration: i32) -> bool {
        start >= self.start_minutes && end_of(start, duration) <= i64::from(self.end_minutes)
    }
}

/// Per establishment slot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSettings {
    pub window: OperatingWindow,
    pub granularity_minutes: i32,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            window: OperatingWindow::default(),
            granularity_minutes: DEFAULT_GRANULARITY_MINUTES,
        }
    }
}

impl SlotSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.window.validate()?;
        validate_granularity(self.granularity_minutes)
    }

    /// Duration assumed for any appointment or service without one.
    pub fn fallback_duration(&self) -> i32 {
        self.granularity_minutes
    }

    pub fn check_fits_window(&self, start: i32, duration: i32) -> Result<bool, ValidationError> {
        self.validate()?;
        validate_duration(duration)?;
        validate_start(start)?;
        Ok(self.window.fits(start, duration))
    }
}

/// Time occupied by an existing, non-cancelled appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start_minutes: i32,
    pub duration_minutes: i32,
}

impl BusyInterval {
    pub fn new(start_minutes: i32, duration_minutes: i32) -> Self {
        Self {
            start_minutes,
            duration_minutes,
        }
    }

    /// Returns `None` for appointments that no longer occupy their slot.
    ///
    /// The duration comes from the appointment itself, then from its service,
    /// then from `fallback_duration`. It is never zero.
    pub fn from_appointment(
        appointment: &Appointment,
        service_duration: Option<i32>,
        fallback_duration: i32,
    ) -> Option<Self> {
        if !appointment.status.occupies_slot() {
            return None;
        }
        Some(Self::new(
            appointment.start_minutes,
            appointment
                .duration_minutes
                .or(service_duration)
                .unwrap_or(fallback_duration),
        ))
    }

    /// May lie past midnight, or past `i32::MAX` for absurd durations.
    pub fn end_minutes(&self) -> i64 {
        end_of(self.start_minutes, self.duration_minutes)
    }

    pub fn overlaps(&self, start: i32, duration: i32) -> bool {
        i64::from(start) < self.end_minutes()
            && end_of(start, duration) > i64::from(self.start_minutes)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_start(self.start_minutes)?;
        validate_duration(self.duration_minutes)
    }
}

/// Outcome of an availability query. Without a service there is no duration
/// to test against, which is not the same as "nothing is free".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Slots(Vec<i32>),
    NeedsService,
}

/// End of `[start, start + duration)`, widened so large durations cannot wrap.
fn end_of(start: i32, duration: i32) -> i64 {
    i64::from(start) + i64::from(duration)
}

fn validate_granularity(granularity: i32) -> Result<(), ValidationError> {
    if granularity <= 0 {
        return Err(ValidationError::InvalidGranularity(granularity));
    }
    Ok(())
}

fn validate_duration(duration: i32) -> Result<(), ValidationError> {
    if duration <= 0 {
        return Err(ValidationError::InvalidDuration(duration));
    }
    Ok(())
}

fn validate_start(start: i32) -> Result<(), ValidationError> {
    if !(0..MINUTES_PER_DAY).contains(&start) {
        return Err(ValidationError::MalformedAppointment(start));
    }
    Ok(())
}

fn validate_existing(existing: &[BusyInterval]) -> Result<(), ValidationError> {
    existing.iter().try_for_each(BusyInterval::validate)
}

fn collides(start: i32, duration: i32, existing: &[BusyInterval]) -> bool {
    existing.iter().any(|busy| busy.overlaps(start, duration))
}

/// Start times, ascending, at which `candidate_duration` minutes fit inside
/// the window without touching any of `existing`.
pub fn compute_available_slots(
    window: OperatingWindow,
    granularity_minutes: i32,
    candidate_duration_minutes: i32,
    existing: &[BusyInterval],
) -> Result<Vec<i32>, ValidationError> {
    window.validate()?;
    validate_granularity(granularity_minutes)?;
    validate_duration(candidate_duration_minutes)?;
    validate_existing(existing)?;

    let slots = (window.start_minutes..window.end_minutes)
        .step_by(granularity_minutes as usize)
        .take_while(|start| window.fits(*start, candidate_duration_minutes))
        .filter(|start| !collides(*start, candidate_duration_minutes, existing))
        .collect();
    Ok(slots)
}

pub fn is_slot_available(
    candidate_start: i32,
    candidate_duration_minutes: i32,
    existing: &[BusyInterval],
) -> Result<bool, ValidationError> {
    validate_start(candidate_start)?;
    validate_duration(candidate_duration_minutes)?;
    validate_existing(existing)?;

    Ok(!collides(candidate_start, candidate_duration_minutes, existing))
}

pub fn availability(
    settings: &SlotSettings,
    candidate_duration_minutes: Option<i32>,
    existing: &[BusyInterval],
) -> Result<Availability, ValidationError> {
    settings.validate()?;
    let Some(duration) = candidate_duration_minutes else {
        return Ok(Availability::NeedsService);
    };

    compute_available_slots(
        settings.window,
        settings.granularity_minutes,
        duration,
        existing,
    )
    .map(Availability::Slots)
}
