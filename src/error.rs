use crate::types::AppointmentStatus;
use uuid::Uuid;

/// Rejected input to the slot engine. The engine never does I/O, so this is
/// the only way it can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Operating window {start}..{end} is empty or outside the day")]
    InvalidWindow { start: i32, end: i32 },

    #[error("Slot granularity must be positive, got {0}")]
    InvalidGranularity(i32),

    #[error("Duration must be positive, got {0}")]
    InvalidDuration(i32),

    #[error("Appointment start {0} is outside of the day")]
    MalformedAppointment(i32),

    #[error("Malformed time of day {0:?}, expected HH:MM")]
    MalformedTime(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A service or an explicit duration is required")]
    NeedsService,

    #[error("Requested time overlaps an existing appointment")]
    SlotTaken,

    #[error("Appointment at {start} for {duration} minutes does not fit into the operating window")]
    OutsideOperatingWindow { start: i32, duration: i32 },

    #[error("Appointments can't be created with status {0}")]
    InvalidInitialStatus(AppointmentStatus),

    #[error("Status can't change from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}
