use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::authorize_patient_access;
use crate::{
    accounts::normalize_email,
    analysis::analyze_or_degrade,
    auth::AuthenticatedUser,
    connections,
    error::{AppError, AppResult},
    models::{NewReport, Report, Role},
    schema::reports,
    state::AppState,
    storage::sanitize_file_name,
    utils::time::{to_iso, to_iso_opt},
};

pub const ALLOWED_CONTENT_TYPES: &[&str] = &["application/pdf", "image/jpeg", "image/png", "image/jpg"];

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentPayload {
    pub comment: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub report_id: Uuid,
    pub ai_summary: Value,
    #[serde(rename = "testResults")]
    pub test_results: Value,
}

#[derive(Serialize)]
pub struct ReportSummary {
    pub file_id: Uuid,
    pub file_name: String,
    pub uploaded_at: String,
    pub severity: Option<String>,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub file_id: Uuid,
    pub user_email: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub ai_summary: Value,
    #[serde(rename = "testResults")]
    pub test_results: Value,
    pub doctor_comment: Option<String>,
    pub comment_date: Option<String>,
    pub uploaded_at: String,
}

/// List responses keep the `{"reports": [...]}` envelope clients expect.
#[derive(Serialize)]
pub struct ReportList<T> {
    pub reports: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestReportResponse {
    pub latest_report: ReportResponse,
}

impl From<Report> for ReportResponse {
    fn from(report: Report) -> Self {
        Self {
            file_id: report.file_id,
            user_email: report.user_email,
            file_name: report.file_name,
            content_type: report.content_type,
            size_bytes: report.size_bytes,
            checksum: report.checksum,
            ai_summary: report.ai_summary,
            test_results: report.test_results,
            doctor_comment: report.doctor_comment,
            comment_date: to_iso_opt(report.comment_date),
            uploaded_at: to_iso(report.uploaded_at),
        }
    }
}

fn summarize(report: Report) -> ReportSummary {
    let severity = report
        .ai_summary
        .get("severity")
        .and_then(Value::as_str)
        .map(str::to_owned);
    ReportSummary {
        file_id: report.file_id,
        file_name: report.file_name,
        uploaded_at: to_iso(report.uploaded_at),
        severity,
    }
}

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

fn resolve_content_type(declared: Option<&str>, file_name: &str) -> Option<String> {
    declared
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "application/octet-stream")
        .or_else(|| {
            mime_guess::from_path(file_name)
                .first()
                .map(|mime| mime.essence_str().to_owned())
        })
}

fn target_email(user: &AuthenticatedUser, query: &OwnerQuery) -> String {
    query
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty())
        .unwrap_or_else(|| user.email.clone())
}

fn load_readable_report(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    file_id: Uuid,
) -> AppResult<Report> {
    let report: Report = reports::table
        .find(file_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("report not found"))?;
    authorize_patient_access(conn, user, &report.user_email)?;
    Ok(report)
}

pub async fn upload_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    user.require_role(&[Role::Patient])?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut declared_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        original_name = field.file_name().map(str::to_owned);
        declared_type = field.content_type().map(str::to_owned);
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file_bytes = Some(data.to_vec());
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file must not be empty"));
    }
    if file_bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::bad_request(format!(
            "file exceeds the {} byte limit",
            state.config.max_upload_bytes
        )));
    }

    let original_name = original_name.unwrap_or_default();
    let content_type = resolve_content_type(declared_type.as_deref(), &original_name)
        .filter(|value| ALLOWED_CONTENT_TYPES.contains(&value.as_str()))
        .ok_or_else(|| AppError::bad_request("only PDF, JPEG and PNG reports are accepted"))?;

    let file_id = Uuid::new_v4();
    let file_name = sanitize_file_name(&original_name);
    let storage_key = format!("{file_id}/{file_name}");
    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let size_bytes = file_bytes.len() as i64;

    state
        .storage
        .put_object(&storage_key, file_bytes.clone())
        .await
        .map_err(|err| AppError::internal(format!("failed to store report: {err}")))?;

    let outcome = analyze_or_degrade(
        state.analyzer.as_ref(),
        &file_name,
        Some(&content_type),
        file_bytes,
    )
    .await;

    let new_report = NewReport {
        file_id,
        user_email: user.email.clone(),
        file_name: file_name.clone(),
        file_path: storage_key.clone(),
        content_type: Some(content_type),
        size_bytes,
        checksum,
        embedding_path: outcome.embedding_path.clone(),
        ai_summary: outcome.ai_summary.clone(),
        test_results: outcome.test_results.clone(),
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(reports::table)
            .values(&new_report)
            .execute(&mut conn)
            .map_err(AppError::from)
    });
    if let Err(err) = inserted {
        if let Err(cleanup) = state.storage.delete_object(&storage_key).await {
            warn!(error = %cleanup, file_id = %file_id, "failed to remove file of unsaved report");
        }
        return Err(err);
    }

    info!(
        file_id = %file_id,
        user_email = %user.email,
        size_bytes,
        degraded = outcome.is_degraded(),
        "report uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "report uploaded".into(),
            report_id: file_id,
            ai_summary: outcome.ai_summary,
            test_results: outcome.test_results,
        }),
    ))
}

pub async fn list_report_summaries(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReportList<ReportSummary>>> {
    let owner = target_email(&user, &query);
    let mut conn = state.db()?;
    authorize_patient_access(&mut conn, &user, &owner)?;

    let rows: Vec<Report> = reports::table
        .filter(reports::user_email.eq(&owner))
        .order(reports::uploaded_at.desc())
        .load(&mut conn)?;
    Ok(Json(ReportList {
        reports: rows.into_iter().map(summarize).collect(),
    }))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReportList<ReportResponse>>> {
    let owner = target_email(&user, &query);
    let mut conn = state.db()?;
    authorize_patient_access(&mut conn, &user, &owner)?;

    let rows: Vec<Report> = reports::table
        .filter(reports::user_email.eq(&owner))
        .order(reports::uploaded_at.desc())
        .load(&mut conn)?;
    Ok(Json(ReportList {
        reports: rows.into_iter().map(ReportResponse::from).collect(),
    }))
}

pub async fn latest_report(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<LatestReportResponse>> {
    let owner = target_email(&user, &query);
    let mut conn = state.db()?;
    authorize_patient_access(&mut conn, &user, &owner)?;

    let latest: Option<Report> = reports::table
        .filter(reports::user_email.eq(&owner))
        .order(reports::uploaded_at.desc())
        .first(&mut conn)
        .optional()?;
    latest
        .map(|report| {
            Json(LatestReportResponse {
                latest_report: report.into(),
            })
        })
        .ok_or_else(|| AppError::not_found_with("no reports uploaded yet"))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReportResponse>> {
    let mut conn = state.db()?;
    let report = load_readable_report(&mut conn, &user, file_id)?;
    Ok(Json(report.into()))
}

pub async fn download_report(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let report = {
        let mut conn = state.db()?;
        load_readable_report(&mut conn, &user, file_id)?
    };

    let bytes = state
        .storage
        .get_object(&report.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read report file: {err}")))?
        .ok_or_else(|| {
            warn!(file_id = %file_id, path = %report.file_path, "report file missing from storage");
            AppError::not_found_with("report file not found")
        })?;

    let content_type = report
        .content_type
        .clone()
        .or_else(|| resolve_content_type(None, &report.file_name))
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let content_type = HeaderValue::from_str(&content_type)
        .map_err(|err| AppError::internal(format!("invalid content type: {err}")))?;
    let disposition = HeaderValue::from_str(&attachment_content_disposition(&report.file_name))
        .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

pub async fn delete_report(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let file_path = {
        let mut conn = state.db()?;
        let report: Report = reports::table
            .find(file_id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_with("report not found"))?;
        if report.user_email != user.email && !user.is_admin() {
            return Err(AppError::forbidden("only the owner can delete this report"));
        }
        diesel::delete(reports::table.find(file_id)).execute(&mut conn)?;
        report.file_path
    };

    if let Err(err) = state.storage.delete_object(&file_path).await {
        warn!(error = %err, file_id = %file_id, "failed to remove report file");
    }
    info!(file_id = %file_id, "report deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn comment_on_report(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CommentPayload>,
) -> AppResult<Json<ReportResponse>> {
    user.require_role(&[Role::Doctor])?;
    let comment = payload.comment.trim();
    if comment.is_empty() {
        return Err(AppError::bad_request("comment must not be empty"));
    }

    let mut conn = state.db()?;
    let report: Report = reports::table
        .find(file_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("report not found"))?;
    if !connections::is_assigned_doctor(&mut conn, &report.user_email, &user.email)? {
        return Err(AppError::forbidden(
            "only the patient's assigned doctor can comment",
        ));
    }

    let updated: Report = diesel::update(reports::table.find(file_id))
        .set((
            reports::doctor_comment.eq(Some(comment)),
            reports::comment_date.eq(Some(Utc::now().naive_utc())),
        ))
        .get_result(&mut conn)?;
    Ok(Json(updated.into()))
}
