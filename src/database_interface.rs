use crate::availability::{is_slot_available, BusyInterval, OperatingWindow, SlotSettings};
use crate::backend::AppointmentBackend;
use crate::error::BookingError;
use crate::schema::{appointments, establishments, professionals, services};
use crate::types::{
    Appointment, AppointmentStatus, Establishment, NewAppointment, NewEstablishment,
    NewProfessional, NewService, Professional, Service,
};
use chrono::NaiveDate;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{
    Connection, ConnectionError, ExpressionMethods, Insertable, NullableExpressionMethods,
    OptionalExtension, PgConnection, QueryDsl, Queryable, RunQueryDsl, Selectable,
    SelectableHelper,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

const NO_OVERLAP_CONSTRAINT: &str = "appointments_no_overlap";
const SERIALIZATION_RETRIES: usize = 3;

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = establishments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct EstablishmentRow {
    id: Uuid,
    name: String,
    opening_minutes: i32,
    closing_minutes: i32,
    granularity_minutes: i32,
}

impl From<EstablishmentRow> for Establishment {
    fn from(row: EstablishmentRow) -> Self {
        Establishment {
            id: row.id,
            name: row.name,
            settings: SlotSettings {
                window: OperatingWindow {
                    start_minutes: row.opening_minutes,
                    end_minutes: row.closing_minutes,
                },
                granularity_minutes: row.granularity_minutes,
            },
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = professionals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ProfessionalRow {
    id: Uuid,
    establishment_id: Uuid,
    name: String,
    display_role: String,
}

impl From<ProfessionalRow> for Professional {
    fn from(row: ProfessionalRow) -> Self {
        Professional {
            id: row.id,
            establishment_id: row.establishment_id,
            name: row.name,
            display_role: row.display_role,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = services)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ServiceRow {
    id: Uuid,
    establishment_id: Uuid,
    name: String,
    duration_minutes: Option<i32>,
    price_cents: i64,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            establishment_id: row.establishment_id,
            name: row.name,
            duration_minutes: row.duration_minutes,
            price_cents: row.price_cents,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AppointmentRow {
    id: Uuid,
    establishment_id: Uuid,
    professional_id: Uuid,
    service_id: Option<Uuid>,
    service_name: String,
    duration_minutes: Option<i32>,
    date: NaiveDate,
    start_minutes: i32,
    status: String,
    customer_name: String,
    notes: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = BookingError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            establishment_id: row.establishment_id,
            professional_id: row.professional_id,
            service_id: row.service_id,
            service_name: row.service_name,
            duration_minutes: row.duration_minutes,
            date: row.date,
            start_minutes: row.start_minutes,
            status: row.status.parse().map_err(BookingError::Backend)?,
            customer_name: row.customer_name,
            notes: row.notes,
        })
    }
}

impl From<Appointment> for AppointmentRow {
    fn from(appointment: Appointment) -> Self {
        AppointmentRow {
            id: appointment.id,
            establishment_id: appointment.establishment_id,
            professional_id: appointment.professional_id,
            service_id: appointment.service_id,
            service_name: appointment.service_name,
            duration_minutes: appointment.duration_minutes,
            date: appointment.date,
            start_minutes: appointment.start_minutes,
            status: appointment.status.to_string(),
            customer_name: appointment.customer_name,
            notes: appointment.notes,
        }
    }
}

impl From<DieselError> for BookingError {
    fn from(err: DieselError) -> Self {
        if let DieselError::DatabaseError(_, info) = &err {
            if info.constraint_name() == Some(NO_OVERLAP_CONSTRAINT) {
                return BookingError::SlotTaken;
            }
        }
        error!(%err, "Database query failed");
        BookingError::Backend(err.to_string())
    }
}

/// Outcome of a single booking transaction attempt.
enum BookingAttemptError {
    Rejected(BookingError),
    Database(DieselError),
}

impl From<DieselError> for BookingAttemptError {
    fn from(err: DieselError) -> Self {
        BookingAttemptError::Database(err)
    }
}

impl From<BookingError> for BookingAttemptError {
    fn from(err: BookingError) -> Self {
        BookingAttemptError::Rejected(err)
    }
}

/// Error to report for a failed booking attempt, or `None` to run it again.
/// Only serialization failures are retried, and running out of retries is a
/// backend error since no overlap was found.
fn failed_attempt(attempt: usize, err: BookingAttemptError) -> Option<BookingError> {
    match err {
        BookingAttemptError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::SerializationFailure,
            _,
        )) => {
            if attempt >= SERIALIZATION_RETRIES {
                warn!(attempt, "Booking kept conflicting with concurrent writers");
                return Some(BookingError::Backend(
                    "Booking did not settle, try again".into(),
                ));
            }
            debug!(attempt, "Serialization failure while booking, retrying");
            None
        }
        BookingAttemptError::Database(err) => Some(err.into()),
        BookingAttemptError::Rejected(err) => Some(err),
    }
}

fn missing_establishment(err: DieselError, establishment_id: Uuid) -> BookingError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
            BookingError::not_found("Establishment", establishment_id)
        }
        other => other.into(),
    }
}

#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
    sender: Sender<Vec<Appointment>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        let (sender, _) = watch::channel(vec![]);
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sender,
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BookingError> {
        self.connection.lock().map_err(|err| {
            error!(%err, "Database connection is poisoned");
            BookingError::Backend("Database connection is unavailable".into())
        })
    }

    fn load_appointments(&self) -> Result<Vec<Appointment>, BookingError> {
        let rows = appointments::table
            .order((appointments::date, appointments::start_minutes))
            .select(AppointmentRow::as_select())
            .load(&mut *self.connection()?)?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    /// Runs after a commit, so a failed reload is logged and never returned.
    fn send_appointments(&self) {
        match self.load_appointments() {
            Ok(appointments) => {
                self.sender.send_replace(appointments);
            }
            Err(err) => error!(%err, "Failed to send current appointments"),
        }
    }

    /// Overlap check and insert in one serializable transaction. The
    /// exclusion constraint catches anything that slips past the check.
    fn try_book(
        connection: &mut PgConnection,
        appointment: &NewAppointment,
        settings: &SlotSettings,
    ) -> Result<Appointment, BookingAttemptError> {
        connection
            .build_transaction()
            .serializable()
            .run(|connection| {
                let existing: Vec<(AppointmentRow, Option<i32>)> = appointments::table
                    .left_join(services::table)
                    .filter(appointments::professional_id.eq(appointment.professional_id))
                    .filter(appointments::date.eq(appointment.date))
                    .filter(appointments::status.ne(AppointmentStatus::Cancelled.as_str()))
                    .select((
                        AppointmentRow::as_select(),
                        services::duration_minutes.nullable(),
                    ))
                    .load(connection)?;

                let mut busy = vec![];
                for (row, service_duration) in existing {
                    let existing = Appointment::try_from(row)?;
                    busy.extend(BusyInterval::from_appointment(
                        &existing,
                        service_duration,
                        settings.fallback_duration(),
                    ));
                }

                let free = is_slot_available(
                    appointment.start_minutes,
                    appointment.duration_minutes,
                    &busy,
                )
                .map_err(BookingError::from)?;
                if !free {
                    return Err(BookingError::SlotTaken.into());
                }

                let booked = appointment.clone().into_appointment(Uuid::new_v4());
                diesel::insert_into(appointments::table)
                    .values(AppointmentRow::from(booked.clone()))
                    .execute(connection)
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                            BookingError::not_found("Professional", appointment.professional_id)
                                .into()
                        }
                        other => BookingAttemptError::Database(other),
                    })?;
                Ok(booked)
            })
    }

    #[cfg(test)]
    fn remove_all(&self) {
        let mut connection = self.connection().unwrap();
        diesel::delete(appointments::table)
            .execute(&mut *connection)
            .unwrap();
        diesel::delete(services::table)
            .execute(&mut *connection)
            .unwrap();
        diesel::delete(professionals::table)
            .execute(&mut *connection)
            .unwrap();
        diesel::delete(establishments::table)
            .execute(&mut *connection)
            .unwrap();
    }
}

impl AppointmentBackend for DatabaseInterface {
    fn establishment(&self, id: Uuid) -> Result<Establishment, BookingError> {
        establishments::table
            .find(id)
            .select(EstablishmentRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .map(Establishment::from)
            .ok_or_else(|| BookingError::not_found("Establishment", id))
    }

    fn add_establishment(
        &self,
        establishment: NewEstablishment,
    ) -> Result<Establishment, BookingError> {
        establishment.settings.validate()?;
        let row = EstablishmentRow {
            id: Uuid::new_v4(),
            name: establishment.name,
            opening_minutes: establishment.settings.window.start_minutes,
            closing_minutes: establishment.settings.window.end_minutes,
            granularity_minutes: establishment.settings.granularity_minutes,
        };
        let row = diesel::insert_into(establishments::table)
            .values(&row)
            .returning(EstablishmentRow::as_returning())
            .get_result(&mut *self.connection()?)?;
        Ok(row.into())
    }

    fn professionals(&self, establishment_id: Uuid) -> Result<Vec<Professional>, BookingError> {
        let rows = professionals::table
            .filter(professionals::establishment_id.eq(establishment_id))
            .order(professionals::name)
            .select(ProfessionalRow::as_select())
            .load(&mut *self.connection()?)?;
        Ok(rows.into_iter().map(Professional::from).collect())
    }

    fn professional(&self, id: Uuid) -> Result<Professional, BookingError> {
        professionals::table
            .find(id)
            .select(ProfessionalRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .map(Professional::from)
            .ok_or_else(|| BookingError::not_found("Professional", id))
    }

    fn add_professional(
        &self,
        professional: NewProfessional,
    ) -> Result<Professional, BookingError> {
        let establishment_id = professional.establishment_id;
        let row = ProfessionalRow {
            id: Uuid::new_v4(),
            establishment_id,
            name: professional.name,
            display_role: professional.display_role,
        };
        let row = diesel::insert_into(professionals::table)
            .values(&row)
            .returning(ProfessionalRow::as_returning())
            .get_result(&mut *self.connection()?)
            .map_err(|err| missing_establishment(err, establishment_id))?;
        Ok(row.into())
    }

    fn services(&self, establishment_id: Uuid) -> Result<Vec<Service>, BookingError> {
        let rows = services::table
            .filter(services::establishment_id.eq(establishment_id))
            .order(services::name)
            .select(ServiceRow::as_select())
            .load(&mut *self.connection()?)?;
        Ok(rows.into_iter().map(Service::from).collect())
    }

    fn service(&self, id: Uuid) -> Result<Service, BookingError> {
        services::table
            .find(id)
            .select(ServiceRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .map(Service::from)
            .ok_or_else(|| BookingError::not_found("Service", id))
    }

    fn add_service(&self, service: NewService) -> Result<Service, BookingError> {
        service.validate()?;
        let establishment_id = service.establishment_id;
        let row = ServiceRow {
            id: Uuid::new_v4(),
            establishment_id,
            name: service.name,
            duration_minutes: service.duration_minutes,
            price_cents: service.price_cents,
        };
        let row = diesel::insert_into(services::table)
            .values(&row)
            .returning(ServiceRow::as_returning())
            .get_result(&mut *self.connection()?)
            .map_err(|err| missing_establishment(err, establishment_id))?;
        Ok(row.into())
    }

    fn appointments(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, BookingError> {
        let rows = appointments::table
            .filter(appointments::professional_id.eq(professional_id))
            .filter(appointments::date.eq(date))
            .order(appointments::start_minutes)
            .select(AppointmentRow::as_select())
            .load(&mut *self.connection()?)?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError> {
        appointments::table
            .find(id)
            .select(AppointmentRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .ok_or_else(|| BookingError::not_found("Appointment", id))
            .and_then(Appointment::try_from)
    }

    fn book_appointment(
        &self,
        appointment: NewAppointment,
        settings: &SlotSettings,
    ) -> Result<Appointment, BookingError> {
        let booked = {
            let mut connection = self.connection()?;
            let mut attempt = 1;
            loop {
                match Self::try_book(&mut connection, &appointment, settings) {
                    Ok(booked) => break booked,
                    Err(err) => match failed_attempt(attempt, err) {
                        Some(err) => return Err(err),
                        None => attempt += 1,
                    },
                }
            }
        };
        self.send_appointments();
        Ok(booked)
    }

    fn change_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let appointment = {
            let mut connection = self.connection()?;
            connection.transaction(|connection| {
                let current: Appointment = appointments::table
                    .find(id)
                    .select(AppointmentRow::as_select())
                    .for_update()
                    .first(connection)
                    .optional()?
                    .ok_or_else(|| BookingError::not_found("Appointment", id))
                    .and_then(Appointment::try_from)?;
                if !current.status.can_transition_to(status) {
                    return Err(BookingError::InvalidTransition {
                        from: current.status,
                        to: status,
                    });
                }

                diesel::update(appointments::table.find(id))
                    .set(appointments::status.eq(status.as_str()))
                    .execute(connection)?;
                Ok(Appointment { status, ..current })
            })?
        };
        self.send_appointments();
        Ok(appointment)
    }

    fn appointment_stream(&self) -> WatchStream<Vec<Appointment>> {
        let stream = WatchStream::new(self.sender.subscribe());
        self.send_appointments();
        stream
    }
}
