use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    accounts::{self, DoctorProfile, Registration},
    auth::AuthenticatedUser,
    doctors::{self, DoctorSummary},
    error::{AppError, AppResult},
    models::{AuthProvider, Role, User},
    schema::users,
    state::AppState,
    utils::time::to_iso,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub auth_provider: AuthProvider,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            auth_provider: user.auth_provider,
            created_at: to_iso(user.created_at),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDoctorRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub experience_years: Option<i32>,
    pub education: Option<String>,
    pub license_number: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;
    let rows: Vec<User> = users::table
        .order(users::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDoctorRequest>,
) -> AppResult<(StatusCode, Json<DoctorSummary>)> {
    user.require_role(&[Role::Admin])?;
    if payload.experience_years.is_some_and(|years| years < 0) {
        return Err(AppError::bad_request("experienceYears must not be negative"));
    }

    let mut conn = state.db()?;
    let doctor = accounts::register_doctor(
        &mut conn,
        Registration {
            name: &payload.name,
            email: &payload.email,
            password: Some(&payload.password),
            role: Role::Doctor,
        },
        DoctorProfile {
            specialization: payload.specialization,
            phone: payload.phone,
            experience_years: payload.experience_years,
            education: payload.education,
            license_number: payload.license_number,
        },
    )?;

    let summary = doctors::load_doctor_summary(&mut conn, &doctor.email)?
        .ok_or_else(|| AppError::internal("provisioned doctor vanished"))?;
    Ok((StatusCode::CREATED, Json(summary)))
}
