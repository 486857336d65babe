use crate::{
    availability::{is_slot_available, BusyInterval, SlotSettings},
    backend::AppointmentBackend,
    error::BookingError,
    types::{
        Appointment, AppointmentStatus, Establishment, NewAppointment, NewEstablishment,
        NewProfessional, NewService, Professional, Service,
    },
};
use chrono::NaiveDate;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Store {
    establishments: HashMap<Uuid, Establishment>,
    professionals: HashMap<Uuid, Professional>,
    services: HashMap<Uuid, Service>,
    appointments: HashMap<Uuid, Appointment>,
}

impl Store {
    fn busy_intervals(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        fallback_duration: i32,
    ) -> Vec<BusyInterval> {
        self.appointments
            .values()
            .filter(|appointment| {
                appointment.professional_id == professional_id && appointment.date == date
            })
            .filter_map(|appointment| {
                let service_duration = appointment
                    .service_id
                    .and_then(|id| self.services.get(&id))
                    .and_then(|service| service.duration_minutes);
                BusyInterval::from_appointment(appointment, service_duration, fallback_duration)
            })
            .collect()
    }

    fn sorted_appointments(&self) -> Vec<Appointment> {
        let mut appointments: Vec<Appointment> = self.appointments.values().cloned().collect();
        appointments.sort_unstable_by_key(|appointment| {
            (appointment.date, appointment.start_minutes)
        });
        appointments
    }
}

/// In-memory backend, used when no database is configured. Everything is
/// lost on restart.
#[derive(Debug, Clone)]
pub struct LocalAppointments {
    store: Arc<Mutex<Store>>,
    sender: Sender<Vec<Appointment>>,
}

impl Default for LocalAppointments {
    fn default() -> Self {
        let (sender, _) = watch::channel(vec![]);
        Self {
            store: Arc::new(Mutex::default()),
            sender,
        }
    }
}

impl LocalAppointments {
    fn store(&self) -> Result<MutexGuard<'_, Store>, BookingError> {
        self.store.lock().map_err(|err| {
            error!(%err, "Appointment store is poisoned");
            BookingError::Backend("Appointment store is unavailable".into())
        })
    }

    /// Stores an appointment as is, bypassing the overlap check.
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, appointment: Appointment) {
        self.store
            .lock()
            .unwrap()
            .appointments
            .insert(appointment.id, appointment);
    }

    fn send_appointments(&self, appointments: Vec<Appointment>) {
        self.sender.send_replace(appointments);
    }
}

impl AppointmentBackend for LocalAppointments {
    fn establishment(&self, id: Uuid) -> Result<Establishment, BookingError> {
        self.store()?
            .establishments
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("Establishment", id))
    }

    fn add_establishment(
        &self,
        establishment: NewEstablishment,
    ) -> Result<Establishment, BookingError> {
        establishment.settings.validate()?;
        let establishment = Establishment {
            id: Uuid::new_v4(),
            name: establishment.name,
            settings: establishment.settings,
        };
        self.store()?
            .establishments
            .insert(establishment.id, establishment.clone());
        Ok(establishment)
    }

    fn professionals(&self, establishment_id: Uuid) -> Result<Vec<Professional>, BookingError> {
        let mut professionals: Vec<Professional> = self
            .store()?
            .professionals
            .values()
            .filter(|professional| professional.establishment_id == establishment_id)
            .cloned()
            .collect();
        professionals.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(professionals)
    }

    fn professional(&self, id: Uuid) -> Result<Professional, BookingError> {
        self.store()?
            .professionals
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("Professional", id))
    }

    fn add_professional(
        &self,
        professional: NewProfessional,
    ) -> Result<Professional, BookingError> {
        let mut store = self.store()?;
        if !store
            .establishments
            .contains_key(&professional.establishment_id)
        {
            return Err(BookingError::not_found(
                "Establishment",
                professional.establishment_id,
            ));
        }
        let professional = Professional {
            id: Uuid::new_v4(),
            establishment_id: professional.establishment_id,
            name: professional.name,
            display_role: professional.display_role,
        };
        store
            .professionals
            .insert(professional.id, professional.clone());
        Ok(professional)
    }

    fn services(&self, establishment_id: Uuid) -> Result<Vec<Service>, BookingError> {
        let mut services: Vec<Service> = self
            .store()?
            .services
            .values()
            .filter(|service| service.establishment_id == establishment_id)
            .cloned()
            .collect();
        services.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    fn service(&self, id: Uuid) -> Result<Service, BookingError> {
        self.store()?
            .services
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("Service", id))
    }

    fn add_service(&self, service: NewService) -> Result<Service, BookingError> {
        service.validate()?;
        let mut store = self.store()?;
        if !store.establishments.contains_key(&service.establishment_id) {
            return Err(BookingError::not_found(
                "Establishment",
                service.establishment_id,
            ));
        }
        let service = Service {
            id: Uuid::new_v4(),
            establishment_id: service.establishment_id,
            name: service.name,
            duration_minutes: service.duration_minutes,
            price_cents: service.price_cents,
        };
        store.services.insert(service.id, service.clone());
        Ok(service)
    }

    fn appointments(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, BookingError> {
        let appointments = self
            .store()?
            .sorted_appointments()
            .into_iter()
            .filter(|appointment| {
                appointment.professional_id == professional_id && appointment.date == date
            })
            .collect();
        Ok(appointments)
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError> {
        self.store()?
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("Appointment", id))
    }

    fn book_appointment(
        &self,
        appointment: NewAppointment,
        settings: &SlotSettings,
    ) -> Result<Appointment, BookingError> {
        let (appointment, snapshot) = {
            let mut store = self.store()?;
            if !store
                .professionals
                .contains_key(&appointment.professional_id)
            {
                return Err(BookingError::not_found(
                    "Professional",
                    appointment.professional_id,
                ));
            }

            let busy = store.busy_intervals(
                appointment.professional_id,
                appointment.date,
                settings.fallback_duration(),
            );
            if !is_slot_available(
                appointment.start_minutes,
                appointment.duration_minutes,
                &busy,
            )? {
                debug!(
                    professional_id = %appointment.professional_id,
                    date = %appointment.date,
                    start = appointment.start_minutes,
                    "Requested slot is already taken"
                );
                return Err(BookingError::SlotTaken);
            }

            let appointment = appointment.into_appointment(Uuid::new_v4());
            store
                .appointments
                .insert(appointment.id, appointment.clone());
            (appointment, store.sorted_appointments())
        };
        self.send_appointments(snapshot);
        Ok(appointment)
    }

    fn change_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let (appointment, snapshot) = {
            let mut store = self.store()?;
            let appointment = store
                .appointments
                .get_mut(&id)
                .ok_or_else(|| BookingError::not_found("Appointment", id))?;
            if !appointment.status.can_transition_to(status) {
                return Err(BookingError::InvalidTransition {
                    from: appointment.status,
                    to: status,
                });
            }
            appointment.status = status;
            let appointment = appointment.clone();
            (appointment, store.sorted_appointments())
        };
        self.send_appointments(snapshot);
        Ok(appointment)
    }

    fn appointment_stream(&self) -> WatchStream<Vec<Appointment>> {
        let stream = WatchStream::new(self.sender.subscribe());
        match self.store() {
            Ok(store) => self.send_appointments(store.sorted_appointments()),
            Err(err) => error!(%err, "Failed to send current appointments"),
        }
        stream
    }
}
