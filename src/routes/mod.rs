use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use diesel::PgConnection;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Role,
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod connections;
pub mod doctors;
pub mod health;
pub mod profile;
pub mod reports;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Owner, admin, or the patient's assigned doctor.
pub(crate) fn authorize_patient_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    patient_email: &str,
) -> AppResult<()> {
    if user.email == patient_email || user.is_admin() {
        return Ok(());
    }
    if user.role == Role::Doctor
        && crate::connections::is_assigned_doctor(conn, patient_email, &user.email)?
    {
        return Ok(());
    }
    Err(AppError::forbidden(
        "not allowed to access this patient's records",
    ))
}

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let public_auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/doctor-login", post(auth::doctor_login))
        .route("/google", post(auth::external_login));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/delete-account", delete(auth::delete_account))
        .route(
            "/profile",
            get(profile::get_profile).patch(profile::update_profile),
        )
        .route("/upload-report", post(reports::upload_report))
        .route("/reports", get(reports::list_report_summaries))
        .route("/all-reports", get(reports::list_reports))
        .route("/my-latest-report", get(reports::latest_report))
        .route("/report/:file_id", get(reports::get_report))
        .route("/download-report/:file_id", get(reports::download_report))
        .route("/delete-report/:file_id", delete(reports::delete_report))
        .route(
            "/doctor/reports/:file_id/comment",
            post(reports::comment_on_report),
        )
        .route("/send-request", post(connections::send_request))
        .route(
            "/patient/connection-status/:email",
            get(connections::connection_status),
        )
        .route("/assigned-doctor/:email", get(connections::assigned_doctor))
        .route("/doctor/requests", get(connections::list_requests))
        .route(
            "/doctor/requests/:id/resolve",
            post(connections::resolve_request),
        )
        .route("/doctor/patients", get(connections::list_patients))
        .route("/doctors", get(doctors::list_doctors))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/doctors", post(admin::create_doctor))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(state.clone()));

    Router::new()
        .merge(protected_routes)
        .nest("/auth", public_auth_routes)
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
