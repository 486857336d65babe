//! Booking flow on top of an [`AppointmentBackend`]: availability queries for
//! the booking wizard and the commit of a chosen slot.

use crate::{
    availability::{availability, Availability, BusyInterval, SlotSettings},
    backend::AppointmentBackend,
    error::BookingError,
    types::{
        Appointment, AppointmentStatus, Establishment, NewAppointment, NewEstablishment,
        NewProfessional, NewService, Professional, Service,
    },
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub professional_id: Uuid,
    pub service_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_minutes: i32,
    /// Overrides the service duration. Required for blocks without a service.
    pub duration_minutes: Option<i32>,
    pub status: AppointmentStatus,
    pub customer_name: String,
    pub notes: String,
}

fn settings_for<T: AppointmentBackend>(
    backend: &T,
    professional: &Professional,
) -> Result<SlotSettings, BookingError> {
    Ok(backend.establishment(professional.establishment_id)?.settings)
}

fn service_for<T: AppointmentBackend>(
    backend: &T,
    professional: &Professional,
    service_id: Uuid,
) -> Result<Service, BookingError> {
    let service = backend.service(service_id)?;
    if service.establishment_id != professional.establishment_id {
        return Err(BookingError::not_found("Service", service_id));
    }
    Ok(service)
}

/// Duration of a linked service, or `None` if it has none or is gone.
fn linked_service_duration<T: AppointmentBackend>(
    backend: &T,
    appointment: &Appointment,
) -> Result<Option<i32>, BookingError> {
    if appointment.duration_minutes.is_some() {
        return Ok(None);
    }
    let Some(service_id) = appointment.service_id else {
        return Ok(None);
    };
    match backend.service(service_id) {
        Ok(service) => Ok(service.duration_minutes),
        Err(BookingError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn busy_intervals<T: AppointmentBackend>(
    backend: &T,
    professional_id: Uuid,
    date: NaiveDate,
    settings: &SlotSettings,
) -> Result<Vec<BusyInterval>, BookingError> {
    let mut busy = vec![];
    for appointment in backend.appointments(professional_id, date)? {
        let service_duration = linked_service_duration(backend, &appointment)?;
        busy.extend(BusyInterval::from_appointment(
            &appointment,
            service_duration,
            settings.fallback_duration(),
        ));
    }
    Ok(busy)
}

/// Free start times of a professional on `date` for the given service.
/// Without a service the result is [`Availability::NeedsService`].
pub fn available_slots<T: AppointmentBackend>(
    backend: &T,
    professional_id: Uuid,
    date: NaiveDate,
    service_id: Option<Uuid>,
) -> Result<(SlotSettings, Availability), BookingError> {
    let professional = backend.professional(professional_id)?;
    let settings = settings_for(backend, &professional)?;

    let duration = match service_id {
        Some(service_id) => Some(
            service_for(backend, &professional, service_id)?
                .duration_minutes
                .unwrap_or(settings.fallback_duration()),
        ),
        None => None,
    };

    let busy = busy_intervals(backend, professional_id, date, &settings)?;
    let availability = availability(&settings, duration, &busy)?;
    Ok((settings, availability))
}

/// Validates a booking request and commits it. The backend re-checks for
/// overlaps while inserting, so a slot taken since the last availability
/// query is rejected with [`BookingError::SlotTaken`].
pub fn book<T: AppointmentBackend>(
    backend: &T,
    request: BookingRequest,
) -> Result<Appointment, BookingError> {
    if !request.status.is_initial() {
        return Err(BookingError::InvalidInitialStatus(request.status));
    }

    let professional = backend.professional(request.professional_id)?;
    let settings = settings_for(backend, &professional)?;
    let service = request
        .service_id
        .map(|service_id| service_for(backend, &professional, service_id))
        .transpose()?;

    let duration = match (request.duration_minutes, &service) {
        (Some(duration), _) => duration,
        (None, Some(service)) => service
            .duration_minutes
            .unwrap_or(settings.fallback_duration()),
        (None, None) => return Err(BookingError::NeedsService),
    };

    if !settings.check_fits_window(request.start_minutes, duration)? {
        return Err(BookingError::OutsideOperatingWindow {
            start: request.start_minutes,
            duration,
        });
    }

    let appointment = backend.book_appointment(
        NewAppointment {
            establishment_id: professional.establishment_id,
            professional_id: professional.id,
            service_id: service.as_ref().map(|service| service.id),
            service_name: service.map(|service| service.name).unwrap_or_default(),
            duration_minutes: duration,
            date: request.date,
            start_minutes: request.start_minutes,
            status: request.status,
            customer_name: request.customer_name,
            notes: request.notes,
        },
        &settings,
    )?;

    info!(
        id = %appointment.id,
        professional_id = %appointment.professional_id,
        date = %appointment.date,
        start = appointment.start_minutes,
        duration,
        status = %appointment.status,
        "Appointment booked"
    );
    Ok(appointment)
}

pub fn change_status<T: AppointmentBackend>(
    backend: &T,
    id: Uuid,
    status: AppointmentStatus,
) -> Result<Appointment, BookingError> {
    let appointment = backend.change_status(id, status)?;
    info!(%id, %status, "Appointment status changed");
    Ok(appointment)
}

/// Creates a sample establishment with one professional and a small catalog
/// so a fresh in-memory instance has something to book against.
pub fn seed_demo<T: AppointmentBackend>(
    backend: &T,
    settings: SlotSettings,
) -> Result<Establishment, BookingError> {
    let establishment = backend.add_establishment(NewEstablishment {
        name: "Demo Salon".into(),
        settings,
    })?;
    let professional = backend.add_professional(NewProfessional {
        establishment_id: establishment.id,
        name: "Carla".into(),
        display_role: "Hairdresser".into(),
    })?;
    for (name, duration_minutes, price_cents) in [
        ("Haircut", Some(30), 4500),
        ("Coloring", Some(120), 18000),
        ("Blow dry", None, 5000),
    ] {
        backend.add_service(NewService {
            establishment_id: establishment.id,
            name: name.into(),
            duration_minutes,
            price_cents,
        })?;
    }
    info!(
        establishment = %establishment.id,
        professional = %professional.id,
        "Demo data seeded"
    );
    Ok(establishment)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::ValidationError,
        local_appointments::LocalAppointments,
        testutils::{new_appointment, seed, Seeded},
    };

    fn request(seeded: &Seeded, service_id: Option<Uuid>, start_minutes: i32) -> BookingRequest {
        BookingRequest {
            professional_id: seeded.professional.id,
            service_id,
            date: seeded.date,
            start_minutes,
            duration_minutes: None,
            status: AppointmentStatus::Pending,
            customer_name: "Ana".into(),
            notes: String::new(),
        }
    }

    fn slots(availability: Availability) -> Vec<i32> {
        match availability {
            Availability::Slots(slots) => slots,
            Availability::NeedsService => panic!("expected slots"),
        }
    }

    #[test]
    fn test_empty_day_offers_whole_window() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let (settings, availability) = available_slots(
            &backend,
            seeded.professional.id,
            seeded.date,
            Some(seeded.haircut.id),
        )
        .unwrap();
        assert_eq!(settings, seeded.settings);

        let slots = slots(availability);
        assert_eq!(slots.len(), 24);
        assert_eq!(slots.first(), Some(&480));
        assert_eq!(slots.last(), Some(&1170));
    }

    #[test]
    fn test_without_service_needs_service() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let (_, availability) =
            available_slots(&backend, seeded.professional.id, seeded.date, None).unwrap();
        assert_eq!(availability, Availability::NeedsService);

        let err = book(&backend, request(&seeded, None, 540)).unwrap_err();
        assert_eq!(err, BookingError::NeedsService);
    }

    #[test]
    fn test_booking_removes_slots() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let appointment = book(&backend, request(&seeded, Some(seeded.coloring.id), 540)).unwrap();
        assert_eq!(appointment.duration_minutes, Some(120));
        assert_eq!(appointment.service_name, "Coloração");

        let (_, availability) = available_slots(
            &backend,
            seeded.professional.id,
            seeded.date,
            Some(seeded.haircut.id),
        )
        .unwrap();
        let slots = slots(availability);
        assert!(slots.contains(&510));
        for taken in [540, 570, 600, 630] {
            assert!(!slots.contains(&taken), "{taken} should be taken");
        }
        assert!(slots.contains(&660));
    }

    #[test]
    fn test_double_booking_is_rejected() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        book(&backend, request(&seeded, Some(seeded.haircut.id), 600)).unwrap();
        let err = book(&backend, request(&seeded, Some(seeded.haircut.id), 600)).unwrap_err();
        assert_eq!(err, BookingError::SlotTaken);
    }

    #[test]
    fn test_service_without_duration_uses_granularity() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let appointment = book(&backend, request(&seeded, Some(seeded.blow_dry.id), 600)).unwrap();
        assert_eq!(appointment.duration_minutes, Some(seeded.settings.granularity_minutes));
    }

    #[test]
    fn test_owner_can_block_time_off_grid() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let block = BookingRequest {
            duration_minutes: Some(50),
            status: AppointmentStatus::Blocked,
            customer_name: String::new(),
            notes: "Almoço".into(),
            ..request(&seeded, None, 725)
        };
        let appointment = book(&backend, block).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Blocked);
        assert_eq!(appointment.service_name, "");

        let (_, availability) = available_slots(
            &backend,
            seeded.professional.id,
            seeded.date,
            Some(seeded.haircut.id),
        )
        .unwrap();
        let slots = slots(availability);
        assert!(slots.contains(&690));
        assert!(!slots.contains(&720));
        assert!(!slots.contains(&750));
        assert!(slots.contains(&780));
    }

    #[test]
    fn test_booking_outside_window_is_rejected() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let err = book(&backend, request(&seeded, Some(seeded.haircut.id), 1185)).unwrap_err();
        assert_eq!(
            err,
            BookingError::OutsideOperatingWindow {
                start: 1185,
                duration: 30
            }
        );

        let err = book(&backend, request(&seeded, Some(seeded.haircut.id), 1440)).unwrap_err();
        assert_eq!(
            err,
            BookingError::Validation(ValidationError::MalformedAppointment(1440))
        );

        let negative = BookingRequest {
            duration_minutes: Some(-10),
            ..request(&seeded, Some(seeded.haircut.id), 600)
        };
        assert_eq!(
            book(&backend, negative).unwrap_err(),
            BookingError::Validation(ValidationError::InvalidDuration(-10))
        );
    }

    #[test]
    fn test_invalid_initial_status() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let completed = BookingRequest {
            status: AppointmentStatus::Completed,
            ..request(&seeded, Some(seeded.haircut.id), 600)
        };
        assert_eq!(
            book(&backend, completed).unwrap_err(),
            BookingError::InvalidInitialStatus(AppointmentStatus::Completed)
        );
    }

    #[test]
    fn test_service_of_other_establishment_is_not_found() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);
        let other = seed(&backend);

        let err = book(&backend, request(&seeded, Some(other.haircut.id), 600)).unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "Service", .. }));
    }

    #[test]
    fn test_existing_duration_comes_from_service_or_fallback() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);
        let stored = |service_id: Option<Uuid>, start_minutes: i32| Appointment {
            service_id,
            duration_minutes: None,
            ..new_appointment(&seeded, start_minutes, 30).into_appointment(Uuid::new_v4())
        };

        // The linked service is 120 minutes long.
        backend.insert_unchecked(stored(Some(seeded.coloring.id), 540));
        // The linked service no longer exists, the granularity applies.
        backend.insert_unchecked(stored(Some(Uuid::new_v4()), 900));

        let (_, availability) = available_slots(
            &backend,
            seeded.professional.id,
            seeded.date,
            Some(seeded.haircut.id),
        )
        .unwrap();
        let slots = slots(availability);
        assert!(slots.contains(&510));
        assert!(!slots.contains(&630));
        assert!(slots.contains(&660));
        assert!(slots.contains(&870));
        assert!(!slots.contains(&900));
        assert!(slots.contains(&930));
    }

    #[test]
    fn test_cancelled_appointment_releases_slot() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);

        let booked = book(&backend, request(&seeded, Some(seeded.haircut.id), 600)).unwrap();
        change_status(&backend, booked.id, AppointmentStatus::Cancelled).unwrap();

        book(&backend, request(&seeded, Some(seeded.haircut.id), 600)).unwrap();
        assert_eq!(
            backend
                .appointments(seeded.professional.id, seeded.date)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_longer_service_in_catalog() {
        let backend = LocalAppointments::default();
        let seeded = seed(&backend);
        let grooming = backend
            .add_service(NewService {
                establishment_id: seeded.establishment.id,
                name: "Tosa completa".into(),
                duration_minutes: Some(90),
                price_cents: 12000,
            })
            .unwrap();

        let (_, availability) = available_slots(
            &backend,
            seeded.professional.id,
            seeded.date,
            Some(grooming.id),
        )
        .unwrap();
        let slots = slots(availability);
        assert_eq!(slots.last(), Some(&1110));
    }

    #[test]
    fn test_seed_demo() {
        let backend = LocalAppointments::default();
        let establishment = seed_demo(&backend, SlotSettings::default()).unwrap();
        let professionals = backend.professionals(establishment.id).unwrap();
        assert_eq!(professionals.len(), 1);
        assert_eq!(backend.services(establishment.id).unwrap().len(), 3);

        let date = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        let (_, availability) =
            available_slots(&backend, professionals[0].id, date, None).unwrap();
        assert_eq!(availability, Availability::NeedsService);
    }
}
