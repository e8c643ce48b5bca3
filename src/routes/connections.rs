use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::authorize_patient_access;
use crate::{
    accounts::normalize_email,
    auth::AuthenticatedUser,
    connections::{self, AssignedPatient, ConnectionStatus, Decision, RequestView},
    doctors::DoctorSummary,
    error::{AppError, AppResult},
    models::{ConnectionRequest, RequestStatus, Role},
    state::AppState,
    utils::time::{to_iso, to_iso_opt},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestPayload {
    pub doctor_email: String,
    pub message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvePayload {
    pub decision: Decision,
    pub rejection_message: Option<String>,
}

#[derive(Deserialize)]
pub struct RequestListQuery {
    pub status: Option<RequestStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub id: Uuid,
    pub patient_email: String,
    pub doctor_email: String,
    pub message: String,
    pub request_date: String,
    pub status: RequestStatus,
    pub rejection_message: Option<String>,
    pub resolved_at: Option<String>,
}

impl From<ConnectionRequest> for RequestResponse {
    fn from(request: ConnectionRequest) -> Self {
        Self {
            id: request.id,
            patient_email: request.patient_email,
            doctor_email: request.doctor_email,
            message: request.message,
            request_date: to_iso(request.request_date),
            status: request.status,
            rejection_message: request.rejection_message,
            resolved_at: to_iso_opt(request.resolved_at),
        }
    }
}

#[derive(Serialize)]
pub struct AssignedDoctorResponse {
    pub doctor: Option<DoctorSummary>,
}

pub async fn send_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SendRequestPayload>,
) -> AppResult<(StatusCode, Json<RequestResponse>)> {
    user.require_role(&[Role::Patient])?;
    let doctor_email = normalize_email(&payload.doctor_email);
    if doctor_email.is_empty() {
        return Err(AppError::bad_request("doctorEmail is required"));
    }

    let mut conn = state.db()?;
    let request =
        connections::submit_request(&mut conn, &user.email, &doctor_email, &payload.message)?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

pub async fn connection_status(
    State(state): State<AppState>,
    Path(email): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<ConnectionStatus>> {
    let patient_email = normalize_email(&email);
    let mut conn = state.db()?;
    authorize_patient_access(&mut conn, &user, &patient_email)?;
    Ok(Json(connections::connection_status(&mut conn, &patient_email)?))
}

pub async fn assigned_doctor(
    State(state): State<AppState>,
    Path(email): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<AssignedDoctorResponse>> {
    let patient_email = normalize_email(&email);
    let mut conn = state.db()?;
    authorize_patient_access(&mut conn, &user, &patient_email)?;
    let doctor = connections::assigned_doctor(&mut conn, &patient_email)?;
    Ok(Json(AssignedDoctorResponse { doctor }))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<RequestView>>> {
    user.require_role(&[Role::Doctor])?;
    let mut conn = state.db()?;
    Ok(Json(connections::list_doctor_requests(
        &mut conn,
        &user.email,
        query.status,
    )?))
}

pub async fn resolve_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<ResolvePayload>,
) -> AppResult<Json<RequestResponse>> {
    user.require_role(&[Role::Doctor])?;
    let mut conn = state.db()?;
    let request = connections::resolve_request(
        &mut conn,
        request_id,
        payload.decision,
        &user.email,
        payload.rejection_message.as_deref(),
    )?;
    Ok(Json(request.into()))
}

pub async fn list_patients(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AssignedPatient>>> {
    user.require_role(&[Role::Doctor])?;
    let mut conn = state.db()?;
    Ok(Json(connections::assigned_patients(&mut conn, &user.email)?))
}
