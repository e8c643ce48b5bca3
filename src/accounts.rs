//! Account provisioning and removal.
//!
//! Deletion is not one transaction: every dependent entity is
//! removed by its own step, failures are logged and recorded, and the user row
//! goes last. Only that final delete can fail the operation.

use diesel::{
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password;
use crate::error::AppError;
use crate::models::{AuthProvider, NewDoctorDetails, NewProfile, NewUser, Role, User};
use crate::schema::{assigned_doctors, connection_requests, doctor_details, profiles, reports, users};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Invalid(String),
    #[error("user not found")]
    UserNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("account is managed by an external identity provider")]
    ExternalAccount,
    #[error("password hashing failed: {0}")]
    Hashing(#[source] anyhow::Error),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

impl From<AccountError> for AppError {
    fn from(value: AccountError) -> Self {
        match value {
            AccountError::Invalid(_) | AccountError::ExternalAccount => {
                AppError::bad_request(value.to_string())
            }
            AccountError::UserNotFound => AppError::not_found_with(value.to_string()),
            AccountError::InvalidCredentials => AppError::unauthenticated(value.to_string()),
            AccountError::EmailTaken => AppError::conflict(value.to_string()),
            AccountError::Hashing(err) => AppError::internal(err),
            AccountError::Database(err) => AppError::from(err),
        }
    }
}

pub type AccountResult<T> = Result<T, AccountError>;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Credentials for a new account; `password` is `None` for external sign-in.
#[derive(Debug)]
pub struct Registration<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: Option<&'a str>,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct DoctorProfile {
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub experience_years: Option<i32>,
    pub education: Option<String>,
    pub license_number: Option<String>,
}

fn validate(registration: &Registration<'_>) -> AccountResult<(String, String)> {
    let name = registration.name.trim();
    if name.is_empty() {
        return Err(AccountError::Invalid("name is required".into()));
    }
    let email = normalize_email(registration.email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AccountError::Invalid("a valid email is required".into()));
    }
    if let Some(password) = registration.password {
        validate_password(password)?;
    }
    Ok((name.to_owned(), email))
}

pub fn validate_password(password: &str) -> AccountResult<()> {
    if password.chars().count() < password::MIN_PASSWORD_LENGTH {
        return Err(AccountError::Invalid(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn insert_user(conn: &mut PgConnection, new_user: &NewUser) -> AccountResult<User> {
    match diesel::insert_into(users::table)
        .values(new_user)
        .get_result(conn)
    {
        Ok(user) => Ok(user),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(AccountError::EmailTaken)
        }
        Err(err) => Err(err.into()),
    }
}

/// Creates the user and, for patients, the 1:1 profile in one transaction.
pub fn register(conn: &mut PgConnection, registration: Registration<'_>) -> AccountResult<User> {
    let (name, email) = validate(&registration)?;
    let (password_hash, auth_provider) = match registration.password {
        Some(password) => (
            Some(password::hash_password(password).map_err(AccountError::Hashing)?),
            AuthProvider::Local,
        ),
        None => (None, AuthProvider::External),
    };

    let new_user = NewUser {
        id: Uuid::new_v4(),
        name: name.clone(),
        email: email.clone(),
        password_hash,
        role: registration.role,
        auth_provider,
    };

    let user = conn.transaction(|conn| {
        let user = insert_user(conn, &new_user)?;
        if user.role == Role::Patient {
            diesel::insert_into(profiles::table)
                .values(&NewProfile { email, name })
                .execute(conn)?;
        }
        Ok::<_, AccountError>(user)
    })?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "account created");
    Ok(user)
}

pub fn register_doctor(
    conn: &mut PgConnection,
    registration: Registration<'_>,
    profile: DoctorProfile,
) -> AccountResult<User> {
    let registration = Registration {
        role: Role::Doctor,
        ..registration
    };
    let (name, email) = validate(&registration)?;
    let password_hash = match registration.password {
        Some(password) => Some(password::hash_password(password).map_err(AccountError::Hashing)?),
        None => None,
    };

    conn.transaction(|conn| {
        let user = insert_user(
            conn,
            &NewUser {
                id: Uuid::new_v4(),
                name,
                email: email.clone(),
                auth_provider: if password_hash.is_some() {
                    AuthProvider::Local
                } else {
                    AuthProvider::External
                },
                password_hash,
                role: Role::Doctor,
            },
        )?;
        diesel::insert_into(doctor_details::table)
            .values(&NewDoctorDetails {
                email,
                specialization: profile.specialization,
                phone: profile.phone,
                experience_years: profile.experience_years,
                education: profile.education,
                license_number: profile.license_number,
            })
            .execute(conn)?;
        info!(user_id = %user.id, email = %user.email, "doctor account provisioned");
        Ok(user)
    })
}

pub fn find_by_email(conn: &mut PgConnection, email: &str) -> AccountResult<User> {
    users::table
        .filter(users::email.eq(normalize_email(email)))
        .first(conn)
        .optional()?
        .ok_or(AccountError::UserNotFound)
}

/// Password check for local accounts; external accounts never authenticate here.
pub fn authenticate(conn: &mut PgConnection, email: &str, supplied: &str) -> AccountResult<User> {
    let user = find_by_email(conn, email)?;
    match (user.auth_provider, user.password_hash.as_deref()) {
        (AuthProvider::Local, Some(hash)) => {
            if password::verify_password(supplied, hash).map_err(AccountError::Hashing)? {
                Ok(user)
            } else {
                Err(AccountError::InvalidCredentials)
            }
        }
        _ => Err(AccountError::InvalidCredentials),
    }
}

pub fn change_password(
    conn: &mut PgConnection,
    user_id: Uuid,
    current: &str,
    new_password: &str,
) -> AccountResult<()> {
    let user: User = users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or(AccountError::UserNotFound)?;

    let Some(hash) = user.password_hash.as_deref() else {
        return Err(AccountError::ExternalAccount);
    };
    if user.auth_provider == AuthProvider::External {
        return Err(AccountError::ExternalAccount);
    }
    if !password::verify_password(current, hash).map_err(AccountError::Hashing)? {
        return Err(AccountError::InvalidCredentials);
    }
    validate_password(new_password)?;

    let new_hash = password::hash_password(new_password).map_err(AccountError::Hashing)?;
    diesel::update(users::table.find(user_id))
        .set((
            users::password_hash.eq(Some(new_hash)),
            users::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    info!(user_id = %user_id, "password changed");
    Ok(())
}

/// One dependent entity removed during account deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStep {
    Profile,
    DoctorDetails,
    Reports,
    Assignments,
    ConnectionRequests,
}

impl CascadeStep {
    pub const ALL: [CascadeStep; 5] = [
        CascadeStep::Profile,
        CascadeStep::DoctorDetails,
        CascadeStep::Reports,
        CascadeStep::Assignments,
        CascadeStep::ConnectionRequests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::DoctorDetails => "doctor_details",
            Self::Reports => "reports",
            Self::Assignments => "assignments",
            Self::ConnectionRequests => "connection_requests",
        }
    }

    /// Each step is a single statement, so it is atomic on its own.
    fn run(self, conn: &mut PgConnection, email: &str) -> QueryResult<StepRemoval> {
        match self {
            Self::Profile => diesel::delete(profiles::table.filter(profiles::email.eq(email)))
                .execute(conn)
                .map(StepRemoval::rows),
            Self::DoctorDetails => {
                diesel::delete(doctor_details::table.filter(doctor_details::email.eq(email)))
                    .execute(conn)
                    .map(StepRemoval::rows)
            }
            Self::Reports => diesel::delete(reports::table.filter(reports::user_email.eq(email)))
                .returning(reports::file_path)
                .get_results::<String>(conn)
                .map(|files| StepRemoval {
                    rows: files.len(),
                    files,
                }),
            Self::Assignments => diesel::delete(
                assigned_doctors::table.filter(
                    assigned_doctors::user_email
                        .eq(email)
                        .or(assigned_doctors::doctor_email.eq(email)),
                ),
            )
            .execute(conn)
            .map(StepRemoval::rows),
            Self::ConnectionRequests => diesel::delete(
                connection_requests::table.filter(
                    connection_requests::patient_email
                        .eq(email)
                        .or(connection_requests::doctor_email.eq(email)),
                ),
            )
            .execute(conn)
            .map(StepRemoval::rows),
        }
    }
}

struct StepRemoval {
    rows: usize,
    files: Vec<String>,
}

impl StepRemoval {
    fn rows(rows: usize) -> Self {
        Self {
            rows,
            files: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: CascadeStep,
    pub result: Result<usize, String>,
}

#[derive(Debug)]
pub struct DeletionReport {
    pub user_id: Uuid,
    pub email: String,
    pub steps: Vec<StepOutcome>,
    /// Storage keys of report files whose rows were removed.
    pub removed_files: Vec<String>,
}

impl DeletionReport {
    pub fn failed_steps(&self) -> Vec<CascadeStep> {
        self.steps
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .map(|outcome| outcome.step)
            .collect()
    }
}

pub fn delete_account(
    conn: &mut PgConnection,
    email: &str,
    supplied_password: &str,
) -> AccountResult<DeletionReport> {
    let user = find_by_email(conn, email)?;

    if user.auth_provider == AuthProvider::Local {
        let hash = user
            .password_hash
            .as_deref()
            .ok_or(AccountError::InvalidCredentials)?;
        if !password::verify_password(supplied_password, hash).map_err(AccountError::Hashing)? {
            return Err(AccountError::InvalidCredentials);
        }
    }

    let mut steps = Vec::with_capacity(CascadeStep::ALL.len());
    let mut removed_files = Vec::new();
    for step in CascadeStep::ALL {
        let result = match step.run(conn, &user.email) {
            Ok(removal) => {
                info!(email = %user.email, step = step.as_str(), rows = removal.rows, "cascade step completed");
                removed_files.extend(removal.files);
                Ok(removal.rows)
            }
            Err(err) => {
                warn!(email = %user.email, step = step.as_str(), error = %err, "cascade step failed");
                Err(err.to_string())
            }
        };
        steps.push(StepOutcome { step, result });
    }

    let deleted = diesel::delete(users::table.find(user.id)).execute(conn)?;
    if deleted == 0 {
        return Err(AccountError::UserNotFound);
    }
    info!(user_id = %user.id, email = %user.email, "account deleted");

    Ok(DeletionReport {
        user_id: user.id,
        email: user.email,
        steps,
        removed_files,
    })
}

/// Rows left behind by cascades that failed part-way.
#[derive(Debug, Default)]
pub struct OrphanPurge {
    pub profiles: usize,
    pub doctor_details: usize,
    pub assignments: usize,
    pub connection_requests: usize,
    pub report_files: Vec<String>,
}

pub fn purge_orphans(conn: &mut PgConnection) -> QueryResult<OrphanPurge> {
    let known = || users::table.select(users::email);

    let profiles = diesel::delete(profiles::table.filter(profiles::email.ne_all(known())))
        .execute(conn)?;
    let doctor_details =
        diesel::delete(doctor_details::table.filter(doctor_details::email.ne_all(known())))
            .execute(conn)?;
    let report_files = diesel::delete(reports::table.filter(reports::user_email.ne_all(known())))
        .returning(reports::file_path)
        .get_results::<String>(conn)?;
    let assignments = diesel::delete(
        assigned_doctors::table.filter(
            assigned_doctors::user_email
                .ne_all(known())
                .or(assigned_doctors::doctor_email.ne_all(known())),
        ),
    )
    .execute(conn)?;
    let connection_requests = diesel::delete(
        connection_requests::table.filter(
            connection_requests::patient_email
                .ne_all(known())
                .or(connection_requests::doctor_email.ne_all(known())),
        ),
    )
    .execute(conn)?;

    Ok(OrphanPurge {
        profiles,
        doctor_details,
        assignments,
        connection_requests,
        report_files,
    })
}
