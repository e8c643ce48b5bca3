use axum::{extract::State, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Profile,
    schema::profiles,
    state::AppState,
    utils::json::{classify_nullable, classify_string_list, NullableValue},
    utils::time::to_iso,
};

const UNIT_PREFERENCES: &[&str] = &["metric", "imperial"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub address: Option<String>,
    pub medical_conditions: Value,
    pub allergies: Value,
    pub medications: Value,
    pub unit_preference: String,
    pub updated_at: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            email: profile.email,
            name: profile.name,
            phone: profile.phone,
            date_of_birth: profile.date_of_birth,
            gender: profile.gender,
            blood_type: profile.blood_type,
            height: profile.height,
            weight: profile.weight,
            address: profile.address,
            medical_conditions: profile.medical_conditions,
            allergies: profile.allergies,
            medications: profile.medications,
            unit_preference: profile.unit_preference,
            updated_at: to_iso(profile.updated_at),
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = profiles)]
struct ProfileChangeset {
    name: Option<String>,
    phone: Option<Option<String>>,
    date_of_birth: Option<Option<String>>,
    gender: Option<Option<String>>,
    blood_type: Option<Option<String>>,
    height: Option<Option<String>>,
    weight: Option<Option<String>>,
    address: Option<Option<String>>,
    medical_conditions: Option<Value>,
    allergies: Option<Value>,
    medications: Option<Value>,
    unit_preference: Option<String>,
    updated_at: Option<chrono::NaiveDateTime>,
}

fn nullable_text(body: &Map<String, Value>, key: &str) -> AppResult<Option<Option<String>>> {
    match classify_nullable(body.get(key)).map_err(|err| AppError::bad_request(format!("{key}: {err}")))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Ok(Some(None)),
        NullableValue::String(value) => {
            let trimmed = value.trim();
            Ok(Some((!trimmed.is_empty()).then(|| trimmed.to_owned())))
        }
    }
}

fn string_list(body: &Map<String, Value>, key: &str) -> AppResult<Option<Value>> {
    classify_string_list(body.get(key)).map_err(|err| AppError::bad_request(format!("{key}: {err}")))
}

fn parse_changeset(body: &Map<String, Value>) -> AppResult<ProfileChangeset> {
    let name = match classify_nullable(body.get("name"))
        .map_err(|err| AppError::bad_request(format!("name: {err}")))?
    {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("name cannot be null")),
        NullableValue::String(value) if value.trim().is_empty() => {
            return Err(AppError::bad_request("name cannot be empty"))
        }
        NullableValue::String(value) => Some(value.trim().to_owned()),
    };

    let unit_preference = match body.get("unitPreference") {
        None => None,
        Some(Value::String(value)) if UNIT_PREFERENCES.contains(&value.as_str()) => {
            Some(value.clone())
        }
        Some(_) => {
            return Err(AppError::bad_request(
                "unitPreference must be \"metric\" or \"imperial\"",
            ))
        }
    };

    Ok(ProfileChangeset {
        name,
        phone: nullable_text(body, "phone")?,
        date_of_birth: nullable_text(body, "dateOfBirth")?,
        gender: nullable_text(body, "gender")?,
        blood_type: nullable_text(body, "bloodType")?,
        height: nullable_text(body, "height")?,
        weight: nullable_text(body, "weight")?,
        address: nullable_text(body, "address")?,
        medical_conditions: string_list(body, "medicalConditions")?,
        allergies: string_list(body, "allergies")?,
        medications: string_list(body, "medications")?,
        unit_preference,
        updated_at: Some(Utc::now().naive_utc()),
    })
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let profile: Profile = profiles::table
        .find(&user.email)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("profile not found"))?;
    Ok(Json(profile.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ProfileResponse>> {
    let body = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;
    let changes = parse_changeset(body)?;

    let mut conn = state.db()?;
    let updated: Option<Profile> = diesel::update(profiles::table.find(&user.email))
        .set(&changes)
        .get_result(&mut conn)
        .optional()?;
    let profile = updated.ok_or_else(|| AppError::not_found_with("profile not found"))?;
    Ok(Json(profile.into()))
}
