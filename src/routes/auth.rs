use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    accounts::{self, AccountError, Registration},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{AuthProvider, Role, User},
    state::AppState,
};

#[derive(Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ExternalIdentityRequest {
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct DeleteAccountRequest {
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub message: String,
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn token_response(state: &AppState, user: &User, message: &str) -> AppResult<TokenResponse> {
    let token = state.jwt.issue_token(user.id, &user.email)?;
    Ok(TokenResponse {
        message: message.to_string(),
        token,
        token_type: "Bearer",
        expires_in: state.jwt.expires_in_seconds(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
    })
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let mut conn = state.db()?;
    let user = accounts::register(
        &mut conn,
        Registration {
            name: &payload.name,
            email: &payload.email,
            password: Some(&payload.password),
            role: Role::Patient,
        },
    )?;

    let response = token_response(&state, &user, "account created")?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let mut conn = state.db()?;
    let user = accounts::authenticate(&mut conn, &payload.email, &payload.password)?;
    info!(user_id = %user.id, "login succeeded");
    Ok(Json(token_response(&state, &user, "login successful")?))
}

pub async fn doctor_login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let mut conn = state.db()?;
    let user = match accounts::authenticate(&mut conn, &payload.email, &payload.password) {
        Ok(user) if user.role == Role::Doctor => user,
        Ok(_) | Err(AccountError::UserNotFound) | Err(AccountError::InvalidCredentials) => {
            return Err(AppError::unauthenticated("invalid doctor credentials"));
        }
        Err(err) => return Err(err.into()),
    };
    info!(user_id = %user.id, "doctor login succeeded");
    Ok(Json(token_response(&state, &user, "login successful")?))
}

/// Sign-in for identities already verified by the upstream provider.
pub async fn external_login(
    State(state): State<AppState>,
    Json(payload): Json<ExternalIdentityRequest>,
) -> AppResult<Json<TokenResponse>> {
    let mut conn = state.db()?;
    let user = match accounts::find_by_email(&mut conn, &payload.email) {
        Ok(user) if user.auth_provider == AuthProvider::External => user,
        Ok(_) => {
            return Err(AppError::conflict(
                "this email is registered with a password; sign in with it instead",
            ))
        }
        Err(AccountError::UserNotFound) => accounts::register(
            &mut conn,
            Registration {
                name: &payload.name,
                email: &payload.email,
                password: None,
                role: Role::Patient,
            },
        )?,
        Err(err) => return Err(err.into()),
    };
    Ok(Json(token_response(&state, &user, "login successful")?))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    accounts::change_password(
        &mut conn,
        user.user_id,
        &payload.current_password,
        &payload.new_password,
    )?;
    Ok(Json(MessageResponse {
        message: "password updated".into(),
    }))
}

pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DeleteAccountRequest>,
) -> AppResult<Json<MessageResponse>> {
    if accounts::normalize_email(&payload.email) != user.email {
        return Err(AppError::forbidden("you can only delete your own account"));
    }

    let mut conn = state.db()?;
    let report = accounts::delete_account(&mut conn, &user.email, &payload.password)?;
    drop(conn);

    for key in &report.removed_files {
        if let Err(err) = state.storage.delete_object(key).await {
            warn!(error = %err, key = %key, "failed to remove report file after account deletion");
        }
    }

    let failed = report.failed_steps();
    if !failed.is_empty() {
        warn!(
            email = %report.email,
            failed = ?failed.iter().map(|step| step.as_str()).collect::<Vec<_>>(),
            "account deleted with incomplete cascade"
        );
    }

    Ok(Json(MessageResponse {
        message: "account deleted".into(),
    }))
}
