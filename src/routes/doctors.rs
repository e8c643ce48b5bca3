use axum::{extract::State, Json};

use crate::{
    auth::AuthenticatedUser,
    doctors::{self, DoctorSummary},
    error::AppResult,
    state::AppState,
};

pub async fn list_doctors(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<DoctorSummary>>> {
    let mut conn = state.db()?;
    Ok(Json(doctors::list_doctor_summaries(&mut conn)?))
}
