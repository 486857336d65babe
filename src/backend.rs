use crate::{
    availability::SlotSettings,
    error::BookingError,
    types::{
        Appointment, AppointmentStatus, Establishment, NewAppointment, NewEstablishment,
        NewProfessional, NewService, Professional, Service,
    },
};
use chrono::NaiveDate;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

/// Persistent store behind the booking flow.
///
/// `book_appointment` must check for overlaps and insert in one atomic step.
/// Availability computed from an earlier read is only advisory.
pub trait AppointmentBackend: Clone + Send + Sync + 'static {
    fn establishment(&self, id: Uuid) -> Result<Establishment, BookingError>;
    fn add_establishment(&self, establishment: NewEstablishment)
        -> Result<Establishment, BookingError>;

    fn professionals(&self, establishment_id: Uuid) -> Result<Vec<Professional>, BookingError>;
    fn professional(&self, id: Uuid) -> Result<Professional, BookingError>;
    fn add_professional(&self, professional: NewProfessional)
        -> Result<Professional, BookingError>;

    fn services(&self, establishment_id: Uuid) -> Result<Vec<Service>, BookingError>;
    fn service(&self, id: Uuid) -> Result<Service, BookingError>;
    fn add_service(&self, service: NewService) -> Result<Service, BookingError>;

    /// All appointments of a professional on a date, cancelled ones included.
    fn appointments(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, BookingError>;
    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError>;
    fn book_appointment(
        &self,
        appointment: NewAppointment,
        settings: &SlotSettings,
    ) -> Result<Appointment, BookingError>;
    fn change_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError>;

    /// Every appointment, ordered by date and start, re-sent after each change.
    fn appointment_stream(&self) -> WatchStream<Vec<Appointment>>;
}
