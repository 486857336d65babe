use crate::availability::{Availability, OperatingWindow, SlotSettings};
use crate::backend::AppointmentBackend;
use crate::booking::{self, BookingRequest};
use crate::configuration::Configuration;
use crate::error::{BookingError, ValidationError};
use crate::types::{
    format_time_of_day, parse_closing_time, parse_time_of_day, Appointment, AppointmentStatus,
    Establishment, NewEstablishment, NewProfessional, NewService, Professional, Service,
};
use axum::extract::{Path, Query, Request};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct AppState<T: AppointmentBackend, C: Configuration> {
    pub backend: T,
    pub configuration: C,
}

#[derive(Debug)]
pub enum ApiError {
    Booking(BookingError),
    InvalidRequest(String),
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Booking(err.into())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::InvalidRequest(message) => {
                return (StatusCode::UNPROCESSABLE_ENTITY, message).into_response()
            }
            ApiError::Booking(err) => err,
        };
        let status = match &err {
            BookingError::Validation(_)
            | BookingError::NeedsService
            | BookingError::OutsideOperatingWindow { .. }
            | BookingError::InvalidInitialStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::SlotTaken | BookingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::Backend(_) => {
                error!(%err, "Request failed in backend");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, err.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotsQuery {
    professional_id: Uuid,
    date: NaiveDate,
    service_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SlotView {
    start_minutes: i32,
    time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotsResponse {
    needs_service: bool,
    opening: String,
    closing: String,
    granularity_minutes: i32,
    slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct BookRequest {
    professional_id: Uuid,
    service_id: Uuid,
    date: NaiveDate,
    /// HH:MM
    start: String,
    #[validate(length(min = 1, max = 120))]
    customer_name: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    notes: String,
}

/// Appointment entered by the owner, including blocked time.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ManualAppointmentRequest {
    professional_id: Uuid,
    service_id: Option<Uuid>,
    date: NaiveDate,
    start: String,
    #[validate(range(min = 1, max = 1440))]
    duration_minutes: Option<i32>,
    status: AppointmentStatus,
    #[serde(default)]
    #[validate(length(max = 120))]
    customer_name: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusRequest {
    status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppointmentsQuery {
    professional_id: Uuid,
    date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct AddEstablishmentRequest {
    #[validate(length(min = 1, max = 120))]
    name: String,
    opening: Option<String>,
    closing: Option<String>,
    granularity_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct AddProfessionalRequest {
    establishment_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    name: String,
    #[serde(default)]
    #[validate(length(max = 60))]
    display_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct AddServiceRequest {
    establishment_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    name: String,
    #[validate(range(min = 1, max = 1440))]
    duration_minutes: Option<i32>,
    #[validate(range(min = 0))]
    price_cents: i64,
}

pub fn create_app<T: AppointmentBackend, C: Configuration>(
    backend: T,
    configuration: C,
) -> Router {
    let state = AppState {
        backend,
        configuration,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/establishments/:id", get(get_establishment::<T, C>))
        .route("/establishments/:id/services", get(get_services::<T, C>))
        .route(
            "/establishments/:id/professionals",
            get(get_professionals::<T, C>),
        )
        .route("/slots", get(get_slots::<T, C>))
        .route("/book", post(book_appointment::<T, C>));

    let admin = Router::new()
        .route("/establishments", post(add_establishment::<T, C>))
        .route("/professionals", post(add_professional::<T, C>))
        .route("/services", post(add_service::<T, C>))
        .route(
            "/appointments",
            get(get_appointments::<T, C>).post(add_appointment::<T, C>),
        )
        .route("/appointments/stream", get(appointment_events::<T, C>))
        .route("/appointments/:id", get(get_appointment::<T, C>))
        .route("/appointments/:id/status", post(change_status::<T, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<T, C>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn admin_auth<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    match request.headers().get("x-admin-password") {
        Some(auth_header) => {
            if auth_header.to_str().unwrap_or("") != state.configuration.password() {
                return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
            }
        }
        None => return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string())),
    }
    Ok(next.run(request).await)
}

async fn get_establishment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Establishment>, ApiError> {
    Ok(Json(state.backend.establishment(id)?))
}

async fn get_services<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Service>>, ApiError> {
    state.backend.establishment(id)?;
    Ok(Json(state.backend.services(id)?))
}

async fn get_professionals<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Professional>>, ApiError> {
    state.backend.establishment(id)?;
    Ok(Json(state.backend.professionals(id)?))
}

fn slots_response(settings: SlotSettings, availability: Availability) -> SlotsResponse {
    let (needs_service, slots) = match availability {
        Availability::Slots(slots) => (false, slots),
        Availability::NeedsService => (true, vec![]),
    };
    SlotsResponse {
        needs_service,
        opening: format_time_of_day(settings.window.start_minutes),
        closing: format_time_of_day(settings.window.end_minutes),
        granularity_minutes: settings.granularity_minutes,
        slots: slots
            .into_iter()
            .map(|start_minutes| SlotView {
                start_minutes,
                time: format_time_of_day(start_minutes),
            })
            .collect(),
    }
}

async fn get_slots<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let (settings, availability) = booking::available_slots(
        &state.backend,
        query.professional_id,
        query.date,
        query.service_id,
    )?;
    Ok(Json(slots_response(settings, availability)))
}

async fn book_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<BookRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    request.validate()?;
    let appointment = booking::book(
        &state.backend,
        BookingRequest {
            professional_id: request.professional_id,
            service_id: Some(request.service_id),
            date: request.date,
            start_minutes: parse_time_of_day(&request.start)?,
            duration_minutes: None,
            status: AppointmentStatus::Pending,
            customer_name: request.customer_name,
            notes: request.notes,
        },
    )?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn add_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<ManualAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    request.validate()?;
    let appointment = booking::book(
        &state.backend,
        BookingRequest {
            professional_id: request.professional_id,
            service_id: request.service_id,
            date: request.date,
            start_minutes: parse_time_of_day(&request.start)?,
            duration_minutes: request.duration_minutes,
            status: request.status,
            customer_name: request.customer_name,
            notes: request.notes,
        },
    )?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn get_appointments<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    Ok(Json(
        state
            .backend
            .appointments(query.professional_id, query.date)?,
    ))
}

async fn get_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(state.backend.appointment(id)?))
}

async fn appointment_events<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .backend
        .appointment_stream()
        .map(|appointments| Event::default().json_data(appointments));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn change_status<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(booking::change_status(
        &state.backend,
        id,
        request.status,
    )?))
}

async fn add_establishment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<AddEstablishmentRequest>,
) -> Result<(StatusCode, Json<Establishment>), ApiError> {
    request.validate()?;
    let defaults = state.configuration.default_slot_settings();
    let settings = SlotSettings {
        window: OperatingWindow {
            start_minutes: match &request.opening {
                Some(opening) => parse_time_of_day(opening)?,
                None => defaults.window.start_minutes,
            },
            end_minutes: match &request.closing {
                Some(closing) => parse_closing_time(closing)?,
                None => defaults.window.end_minutes,
            },
        },
        granularity_minutes: request
            .granularity_minutes
            .unwrap_or(defaults.granularity_minutes),
    };
    let establishment = state.backend.add_establishment(NewEstablishment {
        name: request.name,
        settings,
    })?;
    Ok((StatusCode::CREATED, Json(establishment)))
}

async fn add_professional<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<AddProfessionalRequest>,
) -> Result<(StatusCode, Json<Professional>), ApiError> {
    request.validate()?;
    let professional = state.backend.add_professional(NewProfessional {
        establishment_id: request.establishment_id,
        name: request.name,
        display_role: request.display_role,
    })?;
    Ok((StatusCode::CREATED, Json(professional)))
}

async fn add_service<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<AddServiceRequest>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    request.validate()?;
    let service = state.backend.add_service(NewService {
        establishment_id: request.establishment_id,
        name: request.name,
        duration_minutes: request.duration_minutes,
        price_cents: request.price_cents,
    })?;
    Ok((StatusCode::CREATED, Json(service)))
}
