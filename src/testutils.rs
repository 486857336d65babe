use crate::{
    availability::SlotSettings,
    backend::AppointmentBackend,
    error::BookingError,
    local_appointments::LocalAppointments,
    types::{
        Appointment, AppointmentStatus, Establishment, NewAppointment, NewEstablishment,
        NewProfessional, NewService, Professional, Service,
    },
};
use chrono::NaiveDate;
use futures::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

pub struct Seeded {
    pub establishment: Establishment,
    pub settings: SlotSettings,
    pub professional: Professional,
    /// 30 minutes
    pub haircut: Service,
    /// 120 minutes
    pub coloring: Service,
    /// No duration in the catalog
    pub blow_dry: Service,
    pub date: NaiveDate,
}

pub fn seed<T: AppointmentBackend>(backend: &T) -> Seeded {
    let establishment = backend
        .add_establishment(NewEstablishment {
            name: "Salão da Carla".into(),
            settings: SlotSettings::default(),
        })
        .unwrap();
    let professional = backend
        .add_professional(NewProfessional {
            establishment_id: establishment.id,
            name: "Carla".into(),
            display_role: "Cabeleireira".into(),
        })
        .unwrap();
    let add_service = |name: &str, duration_minutes: Option<i32>, price_cents: i64| {
        backend
            .add_service(NewService {
                establishment_id: establishment.id,
                name: name.into(),
                duration_minutes,
                price_cents,
            })
            .unwrap()
    };
    let haircut = add_service("Corte", Some(30), 4500);
    let coloring = add_service("Coloração", Some(120), 18000);
    let blow_dry = add_service("Escova", None, 5000);

    Seeded {
        settings: establishment.settings,
        establishment,
        professional,
        haircut,
        coloring,
        blow_dry,
        date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
    }
}

pub fn new_appointment(
    seeded: &Seeded,
    start_minutes: i32,
    duration_minutes: i32,
) -> NewAppointment {
    NewAppointment {
        establishment_id: seeded.establishment.id,
        professional_id: seeded.professional.id,
        service_id: Some(seeded.haircut.id),
        service_name: seeded.haircut.name.clone(),
        duration_minutes,
        date: seeded.date,
        start_minutes,
        status: AppointmentStatus::Pending,
        customer_name: "Ana".into(),
        notes: String::new(),
    }
}

pub async fn read_from_appointment_stream(
    stream: &mut WatchStream<Vec<Appointment>>,
) -> Vec<Appointment> {
    timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("no appointment update within a second")
        .expect("appointment stream closed")
}

pub struct MockAppointmentBackendInner {
    pub success: AtomicBool,
    pub calls_to_appointments: AtomicU64,
    pub calls_to_book_appointment: AtomicU64,
    pub calls_to_change_status: AtomicU64,
    pub calls_to_add_establishment: AtomicU64,
    pub calls_to_add_professional: AtomicU64,
    pub calls_to_add_service: AtomicU64,
    pub local: LocalAppointments,
}

/// Counts calls and delegates to an in-memory backend. Writes fail while
/// `success` is false.
#[derive(Clone)]
pub struct MockAppointmentBackend(pub Arc<MockAppointmentBackendInner>);

impl MockAppointmentBackendInner {
    fn new() -> Self {
        Self {
            success: AtomicBool::new(true),
            calls_to_appointments: AtomicU64::default(),
            calls_to_book_appointment: AtomicU64::default(),
            calls_to_change_status: AtomicU64::default(),
            calls_to_add_establishment: AtomicU64::default(),
            calls_to_add_professional: AtomicU64::default(),
            calls_to_add_service: AtomicU64::default(),
            local: LocalAppointments::default(),
        }
    }
}

impl MockAppointmentBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockAppointmentBackendInner::new()))
    }

    fn result(&self) -> Result<(), BookingError> {
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(BookingError::Backend("Supposed to fail".into())),
        }
    }
}

impl AppointmentBackend for MockAppointmentBackend {
    fn establishment(&self, id: Uuid) -> Result<Establishment, BookingError> {
        self.0.local.establishment(id)
    }

    fn add_establishment(
        &self,
        establishment: NewEstablishment,
    ) -> Result<Establishment, BookingError> {
        self.0
            .calls_to_add_establishment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.local.add_establishment(establishment)
    }

    fn professionals(&self, establishment_id: Uuid) -> Result<Vec<Professional>, BookingError> {
        self.0.local.professionals(establishment_id)
    }

    fn professional(&self, id: Uuid) -> Result<Professional, BookingError> {
        self.0.local.professional(id)
    }

    fn add_professional(
        &self,
        professional: NewProfessional,
    ) -> Result<Professional, BookingError> {
        self.0
            .calls_to_add_professional
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.local.add_professional(professional)
    }

    fn services(&self, establishment_id: Uuid) -> Result<Vec<Service>, BookingError> {
        self.0.local.services(establishment_id)
    }

    fn service(&self, id: Uuid) -> Result<Service, BookingError> {
        self.0.local.service(id)
    }

    fn add_service(&self, service: NewService) -> Result<Service, BookingError> {
        self.0.calls_to_add_service.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.local.add_service(service)
    }

    fn appointments(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, BookingError> {
        self.0.calls_to_appointments.fetch_add(1, Ordering::SeqCst);
        self.0.local.appointments(professional_id, date)
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError> {
        self.0.local.appointment(id)
    }

    fn book_appointment(
        &self,
        appointment: NewAppointment,
        settings: &SlotSettings,
    ) -> Result<Appointment, BookingError> {
        self.0
            .calls_to_book_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.local.book_appointment(appointment, settings)
    }

    fn change_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        self.0.calls_to_change_status.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.local.change_status(id, status)
    }

    fn appointment_stream(&self) -> WatchStream<Vec<Appointment>> {
        self.0.local.appointment_stream()
    }
}
