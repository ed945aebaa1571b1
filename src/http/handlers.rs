use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ulid::Ulid;

use super::dto::*;
use super::error::AppError;
use super::state::AppState;
use crate::engine::{
    now_ms, AvailabilityQuery, BookingRequest, CommitOutcome, Engine, ExceptionRequest, WaitlistRequest,
};
use crate::model::*;

pub type HandlerResult<T> = Result<Json<T>, AppError>;

/// An existing company; unknown ids are 404 and leave nothing behind.
async fn engine(state: &AppState, company: Ulid) -> Result<Arc<Engine>, AppError> {
    Ok(state.tenants.get(company).await?)
}

/// Settings writes are what bring a company into existence.
async fn engine_or_create(state: &AppState, company: Ulid) -> Result<Arc<Engine>, AppError> {
    Ok(state.tenants.get_or_create(company).await?)
}

/// `success` for a commit, 409 for conflicts and unconfirmed warnings.
fn outcome_response(outcome: CommitOutcome, success: StatusCode) -> Response {
    let status = match outcome {
        CommitOutcome::Committed { .. } => success,
        _ => StatusCode::CONFLICT,
    };
    (status, Json(OutcomeResponse::from(outcome))).into_response()
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".into() })
}

// ── Queries ──────────────────────────────────────────────

/// GET /v1/{company}/availability?service_id&date&professional_id
pub async fn list_availability(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> HandlerResult<AvailabilityResponse> {
    let Path(company) = path?;
    let Query(params) = params?;
    let query = AvailabilityQuery {
        service_id: params.service_id,
        date: params.date,
        professional_id: params.professional_id,
    };
    let availability = engine(&state, company).await?.list_availability(&query, now_ms()).await?;
    Ok(Json(AvailabilityResponse {
        slots: availability.slots.into_iter().filter_map(ms_to_utc).collect(),
        warnings: availability.warnings,
    }))
}

/// GET /v1/{company}/hours?date
pub async fn display_hours(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    params: Result<Query<HoursParams>, QueryRejection>,
) -> HandlerResult<HoursResponse> {
    let Path(company) = path?;
    let Query(params) = params?;
    let day = engine(&state, company).await?.display_hours(params.date).await?;
    Ok(Json(day.into()))
}

// ── Bookings ─────────────────────────────────────────────

/// POST /v1/{company}/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(company) = path?;
    let Json(body) = body?;
    let req = BookingRequest {
        service_id: body.service_id,
        client_id: body.client_id,
        span: span_of(body.start, body.end)?,
        professional_id: body.professional_id,
        recurrence: body.recurrence.map(|r| RecurrenceRule {
            kind: r.kind,
            series_end_date: r.series_end_date,
        }),
        status: body.status.unwrap_or(BookingStatus::Confirmed),
        payment_status: body.payment_status,
        acknowledge_warnings: body.acknowledge_warnings,
    };
    let outcome = engine(&state, company).await?.create_booking(req, now_ms()).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

/// GET /v1/{company}/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> HandlerResult<BookingDto> {
    let Path((company, id)) = path?;
    let booking = engine(&state, company).await?.get_booking(id).await?;
    Ok(Json(booking.into()))
}

/// PUT /v1/{company}/bookings/{id}/status
pub async fn set_booking_status(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> HandlerResult<BookingDto> {
    let Path((company, id)) = path?;
    let Json(body) = body?;
    let booking = engine(&state, company).await?.set_booking_status(id, body.status).await?;
    Ok(Json(booking.into()))
}

/// DELETE /v1/{company}/bookings/{id}
pub async fn cancel_booking(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> HandlerResult<BookingDto> {
    let Path((company, id)) = path?;
    let booking = engine(&state, company).await?.cancel_booking(id).await?;
    Ok(Json(booking.into()))
}

/// POST /v1/{company}/bookings/{id}/reschedule
pub async fn reschedule_booking(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<RescheduleRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path((company, id)) = path?;
    let Json(body) = body?;
    let span = span_of(body.start, body.end)?;
    let outcome = engine(&state, company).await?
        .reschedule_booking(id, span, body.acknowledge_warnings, now_ms())
        .await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

// ── Waitlist ─────────────────────────────────────────────

/// POST /v1/{company}/waitlist
pub async fn join_waitlist(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<JoinWaitlistRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WaitlistEntryDto>), AppError> {
    let Path(company) = path?;
    let Json(body) = body?;
    let req = WaitlistRequest {
        client_id: body.client_id,
        service_id: body.service_id,
        span: span_of(body.start, body.end)?,
        professional_id: body.professional_id,
    };
    let entry = engine(&state, company).await?.join_waitlist(req).await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// POST /v1/{company}/waitlist/{id}/promote
pub async fn promote_waitlist(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> Result<Response, AppError> {
    let Path((company, id)) = path?;
    let outcome = engine(&state, company).await?.promote_waitlist(id, now_ms()).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

// ── Settings ─────────────────────────────────────────────

/// PUT /v1/{company}/settings
pub async fn update_settings(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path(company) = path?;
    let Json(body) = body?;
    engine_or_create(&state, company).await?
        .update_settings(CompanySettings {
            timezone: body.timezone,
            slot_step_minutes: body.slot_step_minutes,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/{company}/services/{id}
pub async fn upsert_service(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<ServiceRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path((company, id)) = path?;
    let Json(body) = body?;
    engine_or_create(&state, company).await?.upsert_service(body.into_service(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/{company}/services/{id}
pub async fn remove_service(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path((company, id)) = path?;
    engine(&state, company).await?.remove_service(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/{company}/resources/{id}
pub async fn upsert_resource(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<ResourceRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path((company, id)) = path?;
    let Json(body) = body?;
    engine_or_create(&state, company).await?
        .upsert_resource(Resource {
            id,
            resource_type: body.resource_type,
            is_active: body.is_active,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/{company}/schedules/company
pub async fn replace_company_schedule(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path(company) = path?;
    let Json(body) = body?;
    let blocks = body.into_blocks(Owner::Company)?;
    engine_or_create(&state, company).await?.replace_schedule(Owner::Company, blocks).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/{company}/schedules/professionals/{id}
pub async fn replace_professional_schedule(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path((company, professional)) = path?;
    let Json(body) = body?;
    let owner = Owner::Professional(professional);
    let blocks = body.into_blocks(owner)?;
    engine_or_create(&state, company).await?.replace_schedule(owner, blocks).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/{company}/exceptions
pub async fn add_exception(
    State(state): State<AppState>,
    path: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<ExceptionRequestDto>, JsonRejection>,
) -> Result<(StatusCode, Json<ExceptionDto>), AppError> {
    let Path(company) = path?;
    let Json(body) = body?;
    let exception = engine_or_create(&state, company).await?
        .add_exception(ExceptionRequest {
            professional_id: body.professional_id,
            span: span_of(body.start, body.end)?,
            reason: body.reason,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(exception.into())))
}

/// DELETE /v1/{company}/exceptions/{id}
pub async fn remove_exception(
    State(state): State<AppState>,
    path: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path((company, id)) = path?;
    engine(&state, company).await?.remove_exception(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
