//! Patient to doctor connection lifecycle.
//!
//! A request moves `pending → accepted | rejected` and never back. A patient
//! holds at most one pending request and at most one assignment; both limits
//! are backed by unique indexes. Submits and accepts for the same patient take
//! a row lock on the patient's user record first, so they run one after the
//! other. Accepting a request materialises the assignment and closes any other
//! pending request of the same patient inside one transaction. An assignment
//! to another doctor is never replaced.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use diesel::{
    dsl::exists,
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    select,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::doctors::{self, DoctorSummary};
use crate::error::AppError;
use crate::models::{
    AssignedDoctor, ConnectionRequest, NewAssignedDoctor, NewConnectionRequest, RequestStatus,
};
use crate::schema::{assigned_doctors, connection_requests, users};
use crate::utils::time::{to_iso, to_iso_opt};

pub const SUPERSEDED_MESSAGE: &str = "Another request from this patient was accepted";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("doctor {0} not found")]
    DoctorNotFound(String),
    #[error("patient already has an assigned doctor")]
    AlreadyAssigned,
    #[error("patient already has a pending connection request")]
    PendingRequestExists,
    #[error("connection request not found")]
    RequestNotFound,
    #[error("connection request is addressed to another doctor")]
    NotAddressedToDoctor,
    #[error("connection request is already {0}")]
    NotPending(RequestStatus),
    #[error("connection request was resolved concurrently")]
    ResolvedConcurrently,
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

impl From<WorkflowError> for AppError {
    fn from(value: WorkflowError) -> Self {
        match value {
            WorkflowError::EmptyMessage => AppError::bad_request(value.to_string()),
            WorkflowError::DoctorNotFound(_) | WorkflowError::RequestNotFound => {
                AppError::not_found_with(value.to_string())
            }
            WorkflowError::AlreadyAssigned
            | WorkflowError::PendingRequestExists
            | WorkflowError::ResolvedConcurrently => AppError::conflict(value.to_string()),
            WorkflowError::NotAddressedToDoctor => AppError::forbidden(value.to_string()),
            WorkflowError::NotPending(_) => AppError::invalid_state(value.to_string()),
            WorkflowError::Database(err) => AppError::from(err),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

/// What a patient sees about their connection; an assignment always wins over request rows.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub has_request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_date: Option<String>,
}

impl ConnectionStatus {
    fn none() -> Self {
        Self {
            has_request: false,
            status: None,
            doctor_email: None,
            doctor_name: None,
            rejection_message: None,
            request_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub id: Uuid,
    pub patient_email: String,
    pub patient_name: Option<String>,
    pub doctor_email: String,
    pub message: String,
    pub request_date: String,
    pub status: RequestStatus,
    pub rejection_message: Option<String>,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedPatient {
    pub email: String,
    pub name: String,
    pub assigned_date: String,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

pub fn submit_request(
    conn: &mut PgConnection,
    patient_email: &str,
    doctor_email: &str,
    message: &str,
) -> WorkflowResult<ConnectionRequest> {
    let message = message.trim();
    if message.is_empty() {
        return Err(WorkflowError::EmptyMessage);
    }

    conn.transaction(|conn| {
        lock_patient(conn, patient_email)?;

        if doctors::find_doctor(conn, doctor_email)?.is_none() {
            return Err(WorkflowError::DoctorNotFound(doctor_email.to_owned()));
        }

        let assigned: bool = select(exists(
            assigned_doctors::table.filter(assigned_doctors::user_email.eq(patient_email)),
        ))
        .get_result(conn)?;
        if assigned {
            return Err(WorkflowError::AlreadyAssigned);
        }

        let pending: bool = select(exists(
            connection_requests::table
                .filter(connection_requests::patient_email.eq(patient_email))
                .filter(connection_requests::status.eq(RequestStatus::Pending)),
        ))
        .get_result(conn)?;
        if pending {
            return Err(WorkflowError::PendingRequestExists);
        }

        let new_request = NewConnectionRequest {
            id: Uuid::new_v4(),
            patient_email: patient_email.to_owned(),
            doctor_email: doctor_email.to_owned(),
            message: message.to_owned(),
            request_date: Utc::now().naive_utc(),
            status: RequestStatus::Pending,
        };

        match diesel::insert_into(connection_requests::table)
            .values(&new_request)
            .execute(conn)
        {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(WorkflowError::PendingRequestExists);
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            request_id = %new_request.id,
            patient_email,
            doctor_email,
            "connection request submitted"
        );
        Ok(connection_requests::table.find(new_request.id).first(conn)?)
    })
}

pub fn resolve_request(
    conn: &mut PgConnection,
    request_id: Uuid,
    decision: Decision,
    acting_doctor_email: &str,
    rejection_message: Option<&str>,
) -> WorkflowResult<ConnectionRequest> {
    conn.transaction(|conn| {
        let request: ConnectionRequest = connection_requests::table
            .find(request_id)
            .first(conn)
            .optional()?
            .ok_or(WorkflowError::RequestNotFound)?;

        if request.doctor_email != acting_doctor_email {
            return Err(WorkflowError::NotAddressedToDoctor);
        }
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::NotPending(request.status));
        }

        lock_patient(conn, &request.patient_email)?;

        let now = Utc::now().naive_utc();
        let (next_status, reason) = match decision {
            Decision::Accept => (RequestStatus::Accepted, None),
            Decision::Reject => (RequestStatus::Rejected, non_empty(rejection_message)),
        };

        // Conditional on still being pending: a concurrent resolver that got here
        // first leaves zero rows for the loser.
        let updated = diesel::update(
            connection_requests::table
                .filter(connection_requests::id.eq(request_id))
                .filter(connection_requests::status.eq(RequestStatus::Pending)),
        )
        .set((
            connection_requests::status.eq(next_status),
            connection_requests::rejection_message.eq(reason),
            connection_requests::resolved_at.eq(Some(now)),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(WorkflowError::ResolvedConcurrently);
        }

        if decision == Decision::Accept {
            assign_doctor(conn, &request, now)?;
        }

        info!(
            request_id = %request_id,
            patient_email = %request.patient_email,
            doctor_email = %request.doctor_email,
            status = %next_status,
            "connection request resolved"
        );
        Ok(connection_requests::table.find(request_id).first(conn)?)
    })
}

fn assign_doctor(
    conn: &mut PgConnection,
    request: &ConnectionRequest,
    now: NaiveDateTime,
) -> WorkflowResult<()> {
    let assignment = NewAssignedDoctor {
        user_email: request.patient_email.clone(),
        doctor_email: request.doctor_email.clone(),
        request_id: Some(request.id),
        assigned_date: now,
    };

    let inserted = diesel::insert_into(assigned_doctors::table)
        .values(&assignment)
        .on_conflict(assigned_doctors::user_email)
        .do_nothing()
        .execute(conn)?;

    if inserted == 0 {
        let current: AssignedDoctor = assigned_doctors::table
            .find(&request.patient_email)
            .first(conn)?;
        if current.doctor_email != request.doctor_email {
            warn!(
                request_id = %request.id,
                patient_email = %request.patient_email,
                assigned_doctor = %current.doctor_email,
                "accept refused, patient is assigned to another doctor"
            );
            return Err(WorkflowError::AlreadyAssigned);
        }
        diesel::update(assigned_doctors::table.find(&request.patient_email))
            .set((
                assigned_doctors::request_id.eq(assignment.request_id),
                assigned_doctors::assigned_date.eq(assignment.assigned_date),
            ))
            .execute(conn)?;
    }

    let superseded = diesel::update(
        connection_requests::table
            .filter(connection_requests::patient_email.eq(&request.patient_email))
            .filter(connection_requests::status.eq(RequestStatus::Pending))
            .filter(connection_requests::id.ne(request.id)),
    )
    .set((
        connection_requests::status.eq(RequestStatus::Rejected),
        connection_requests::rejection_message.eq(Some(SUPERSEDED_MESSAGE)),
        connection_requests::resolved_at.eq(Some(now)),
    ))
    .execute(conn)?;

    if superseded > 0 {
        warn!(
            patient_email = %request.patient_email,
            superseded,
            "rejected sibling pending requests on accept"
        );
    }
    Ok(())
}

pub fn connection_status(
    conn: &mut PgConnection,
    patient_email: &str,
) -> QueryResult<ConnectionStatus> {
    conn.build_transaction()
        .read_only()
        .repeatable_read()
        .run(|conn| {
            let assignment: Option<AssignedDoctor> = assigned_doctors::table
                .find(patient_email)
                .first(conn)
                .optional()?;

            if let Some(assignment) = assignment {
                let doctor_name = user_name(conn, &assignment.doctor_email)?;
                return Ok(ConnectionStatus {
                    has_request: true,
                    status: Some(RequestStatus::Accepted),
                    doctor_email: Some(assignment.doctor_email),
                    doctor_name,
                    rejection_message: None,
                    request_date: None,
                });
            }

            let latest: Option<ConnectionRequest> = connection_requests::table
                .filter(connection_requests::patient_email.eq(patient_email))
                .order(connection_requests::request_date.desc())
                .first(conn)
                .optional()?;

            let Some(request) = latest else {
                return Ok(ConnectionStatus::none());
            };

            // An accepted request without an assignment row means the doctor
            // relationship was removed afterwards; report no connection.
            if request.status == RequestStatus::Accepted {
                return Ok(ConnectionStatus::none());
            }

            let doctor_name = user_name(conn, &request.doctor_email)?;
            Ok(ConnectionStatus {
                has_request: true,
                status: Some(request.status),
                doctor_email: Some(request.doctor_email),
                doctor_name,
                rejection_message: request.rejection_message,
                request_date: Some(to_iso(request.request_date)),
            })
        })
}

pub fn assigned_doctor(
    conn: &mut PgConnection,
    patient_email: &str,
) -> QueryResult<Option<DoctorSummary>> {
    let assignment: Option<AssignedDoctor> = assigned_doctors::table
        .find(patient_email)
        .first(conn)
        .optional()?;
    let Some(assignment) = assignment else {
        return Ok(None);
    };

    let summary = doctors::load_doctor_summary(conn, &assignment.doctor_email)?;
    if summary.is_none() {
        warn!(
            patient_email,
            doctor_email = %assignment.doctor_email,
            "assignment references a missing doctor"
        );
    }
    Ok(summary.map(|summary| doctors::with_assigned_date(summary, assignment.assigned_date)))
}

pub fn is_assigned_doctor(
    conn: &mut PgConnection,
    patient_email: &str,
    doctor_email: &str,
) -> QueryResult<bool> {
    select(exists(
        assigned_doctors::table
            .filter(assigned_doctors::user_email.eq(patient_email))
            .filter(assigned_doctors::doctor_email.eq(doctor_email)),
    ))
    .get_result(conn)
}

pub fn list_doctor_requests(
    conn: &mut PgConnection,
    doctor_email: &str,
    status: Option<RequestStatus>,
) -> QueryResult<Vec<RequestView>> {
    let mut query = connection_requests::table
        .filter(connection_requests::doctor_email.eq(doctor_email))
        .into_boxed();
    if let Some(status) = status {
        query = query.filter(connection_requests::status.eq(status));
    }
    let requests: Vec<ConnectionRequest> = query
        .order(connection_requests::request_date.desc())
        .load(conn)?;

    let patient_emails: Vec<String> = requests.iter().map(|r| r.patient_email.clone()).collect();
    let names: HashMap<String, String> = users::table
        .filter(users::email.eq_any(patient_emails))
        .select((users::email, users::name))
        .load::<(String, String)>(conn)?
        .into_iter()
        .collect();

    Ok(requests
        .into_iter()
        .map(|request| RequestView {
            patient_name: names.get(&request.patient_email).cloned(),
            id: request.id,
            patient_email: request.patient_email,
            doctor_email: request.doctor_email,
            message: request.message,
            request_date: to_iso(request.request_date),
            status: request.status,
            rejection_message: request.rejection_message,
            resolved_at: to_iso_opt(request.resolved_at),
        })
        .collect())
}

pub fn assigned_patients(
    conn: &mut PgConnection,
    doctor_email: &str,
) -> QueryResult<Vec<AssignedPatient>> {
    let rows: Vec<(String, String, NaiveDateTime)> = assigned_doctors::table
        .inner_join(users::table.on(users::email.eq(assigned_doctors::user_email)))
        .filter(assigned_doctors::doctor_email.eq(doctor_email))
        .order(assigned_doctors::assigned_date.desc())
        .select((users::email, users::name, assigned_doctors::assigned_date))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(email, name, assigned)| AssignedPatient {
            email,
            name,
            assigned_date: to_iso(assigned),
        })
        .collect())
}

/// `SELECT ... FOR UPDATE` on the patient's user row; a no-op when the row is gone.
fn lock_patient(conn: &mut PgConnection, patient_email: &str) -> QueryResult<()> {
    users::table
        .filter(users::email.eq(patient_email))
        .select(users::id)
        .for_update()
        .first::<Uuid>(conn)
        .optional()
        .map(|_| ())
}

fn user_name(conn: &mut PgConnection, email: &str) -> QueryResult<Option<String>> {
    users::table
        .filter(users::email.eq(email))
        .select(users::name)
        .first(conn)
        .optional()
}
