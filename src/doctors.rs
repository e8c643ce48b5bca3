use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::{pg::PgConnection, prelude::*};
use serde::Serialize;
use tracing::warn;

use crate::models::{DoctorDetails, Role, User};
use crate::schema::{doctor_details, users};
use crate::utils::time::to_iso;

pub const DEFAULT_NAME: &str = "Doctor";
pub const DEFAULT_SPECIALIZATION: &str = "General Practice";
pub const DEFAULT_PHONE: &str = "Not provided";
pub const DEFAULT_EDUCATION: &str = "MBBS";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoctorSummary {
    pub email: String,
    pub name: String,
    pub specialization: String,
    pub phone: String,
    pub experience_years: Option<i32>,
    pub education: String,
    pub license_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Details,
    Name,
    Specialization,
    Phone,
    Education,
}

impl MissingField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::Name => "name",
            Self::Specialization => "specialization",
            Self::Phone => "phone",
            Self::Education => "education",
        }
    }
}

#[derive(Debug)]
pub struct FilledDoctor {
    pub summary: DoctorSummary,
    pub warnings: Vec<MissingField>,
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Builds the directory entry; every default applied is reported in `warnings`.
pub fn fill_defaults(user: &User, details: Option<&DoctorDetails>) -> FilledDoctor {
    let mut warnings = Vec::new();
    if details.is_none() {
        warnings.push(MissingField::Details);
    }

    let mut take = |value: Option<&str>, field: MissingField, default: &str| {
        present(value).unwrap_or_else(|| {
            warnings.push(field);
            default.to_owned()
        })
    };

    let name = take(Some(user.name.as_str()), MissingField::Name, DEFAULT_NAME);
    let specialization = take(
        details.and_then(|d| d.specialization.as_deref()),
        MissingField::Specialization,
        DEFAULT_SPECIALIZATION,
    );
    let phone = take(
        details.and_then(|d| d.phone.as_deref()),
        MissingField::Phone,
        DEFAULT_PHONE,
    );
    let education = take(
        details.and_then(|d| d.education.as_deref()),
        MissingField::Education,
        DEFAULT_EDUCATION,
    );

    FilledDoctor {
        summary: DoctorSummary {
            email: user.email.clone(),
            name,
            specialization,
            phone,
            experience_years: details.and_then(|d| d.experience_years),
            education,
            license_number: details.and_then(|d| present(d.license_number.as_deref())),
            assigned_date: None,
        },
        warnings,
    }
}

fn summarize(user: &User, details: Option<&DoctorDetails>) -> DoctorSummary {
    let filled = fill_defaults(user, details);
    if !filled.warnings.is_empty() {
        let fields: Vec<&str> = filled.warnings.iter().map(|f| f.as_str()).collect();
        warn!(doctor_email = %user.email, missing = ?fields, "doctor record incomplete, defaults applied");
    }
    filled.summary
}

pub fn find_doctor(conn: &mut PgConnection, email: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email.eq(email))
        .filter(users::role.eq(Role::Doctor))
        .first(conn)
        .optional()
}

pub fn load_doctor_summary(
    conn: &mut PgConnection,
    email: &str,
) -> QueryResult<Option<DoctorSummary>> {
    let Some(user) = find_doctor(conn, email)? else {
        return Ok(None);
    };
    let details: Option<DoctorDetails> = doctor_details::table
        .find(&user.email)
        .first(conn)
        .optional()?;
    Ok(Some(summarize(&user, details.as_ref())))
}

pub fn list_doctor_summaries(conn: &mut PgConnection) -> QueryResult<Vec<DoctorSummary>> {
    let doctors: Vec<User> = users::table
        .filter(users::role.eq(Role::Doctor))
        .order(users::name.asc())
        .load(conn)?;
    let emails: Vec<String> = doctors.iter().map(|d| d.email.clone()).collect();
    let details: HashMap<String, DoctorDetails> = doctor_details::table
        .filter(doctor_details::email.eq_any(emails))
        .load::<DoctorDetails>(conn)?
        .into_iter()
        .map(|row| (row.email.clone(), row))
        .collect();

    Ok(doctors
        .iter()
        .map(|doctor| summarize(doctor, details.get(&doctor.email)))
        .collect())
}

pub fn with_assigned_date(mut summary: DoctorSummary, assigned: NaiveDateTime) -> DoctorSummary {
    summary.assigned_date = Some(to_iso(assigned));
    summary
}
